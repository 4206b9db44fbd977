// src/persona_generator.rs
// TWO-PHASE PERSONA ENGINE
// Phase 1 reflects on which roles are worth interviewing, phase 2 expands each
// outline into a full persona, several at a time.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::brain::{ChatTurn, TextGenerator};
use crate::error::DiscoveryError;
use crate::extract::extract_object;

/// A role worth interviewing and why.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaOutline {
    pub role: String,
    pub description: String,
}

/// A synthetic interview subject. Immutable once generated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub occupation: String,
    pub location: String,
    pub demographics: Map<String, Value>,
    pub behaviors: Vec<String>,
    pub goals: Vec<String>,
    pub pain_points: Vec<String>,
    pub motivations: Vec<String>,
    pub challenges: Vec<String>,
    pub personality: Map<String, Value>,
    pub background: String,
    pub description: String,
}

// What the model must return. Every field is required; serde rejects gaps.
#[derive(Deserialize)]
struct PersonaDraft {
    name: String,
    #[serde(deserialize_with = "lenient_age")]
    age: u32,
    gender: String,
    occupation: String,
    location: String,
    demographics: Map<String, Value>,
    behaviors: Vec<String>,
    goals: Vec<String>,
    pain_points: Vec<String>,
    motivations: Vec<String>,
    challenges: Vec<String>,
    personality: Map<String, Value>,
    background: String,
    description: String,
}

impl PersonaDraft {
    fn into_persona(self) -> Result<Persona, DiscoveryError> {
        if self.name.trim().is_empty() || self.occupation.trim().is_empty() {
            return Err(DiscoveryError::Validation(
                "persona name and occupation must not be blank".to_string(),
            ));
        }
        Ok(Persona {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            age: self.age,
            gender: self.gender,
            occupation: self.occupation,
            location: self.location,
            demographics: self.demographics,
            behaviors: self.behaviors,
            goals: self.goals,
            pain_points: self.pain_points,
            motivations: self.motivations,
            challenges: self.challenges,
            personality: self.personality,
            background: self.background,
            description: self.description,
        })
    }
}

// Models sometimes quote numbers ("age": "34").
fn lenient_age<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| serde::de::Error::custom("age out of range")),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!("invalid age: {other}"))),
    }
}

const FALLBACK_ROLES: [&str; 5] = [
    "Product Manager",
    "Business User",
    "Technical User",
    "New Customer",
    "Experienced User",
];

/// Deterministic outline for slot `index`, cycling through the generic roles.
pub fn fallback_outline(context: &str, index: usize) -> PersonaOutline {
    let slot = index % FALLBACK_ROLES.len();
    let description = match slot {
        0 => format!("A product manager looking for solutions to improve their team's workflow in {context}"),
        1 => format!("A business professional who needs to solve problems related to {context} without technical knowledge"),
        2 => format!("A technical user with deep understanding of {context} who needs advanced solutions"),
        3 => format!("Someone new to {context} who is exploring available solutions for the first time"),
        _ => format!("A longtime user with extensive experience in {context} looking for improvements"),
    };
    PersonaOutline {
        role: FALLBACK_ROLES[slot].to_string(),
        description,
    }
}

/// Deterministic persona carrying the outline's role and description.
pub fn fallback_persona(outline: &PersonaOutline) -> Persona {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let mut demographics = Map::new();
    demographics.insert("income_level".into(), Value::from("Middle"));
    demographics.insert("education".into(), Value::from("Bachelor's degree"));
    demographics.insert("family_status".into(), Value::from("Not specified"));

    let mut personality = Map::new();
    personality.insert("analytical".into(), Value::from("Makes data-driven decisions"));
    personality.insert("pragmatic".into(), Value::from("Focuses on practical outcomes"));

    Persona {
        id: Uuid::new_v4().to_string(),
        name: format!("Sample {}", outline.role),
        age: 35,
        gender: "Not specified".to_string(),
        occupation: outline.role.clone(),
        location: "United States".to_string(),
        demographics,
        behaviors: strings(&["Researches options online", "Price-conscious"]),
        goals: strings(&["Solve business problems efficiently", "Save time and money"]),
        pain_points: strings(&["Frustrated with current solutions", "Lack of support"]),
        motivations: strings(&["Improve productivity", "Reduce costs"]),
        challenges: strings(&["Finding the right solution", "Implementation issues"]),
        personality,
        background: "Has been working in the industry for several years and is looking for better solutions."
            .to_string(),
        description: outline.description.clone(),
    }
}

#[derive(Clone)]
pub struct PersonaGenerator {
    brain: Arc<dyn TextGenerator>,
    max_parallel: usize,
}

impl PersonaGenerator {
    pub fn new(brain: Arc<dyn TextGenerator>, max_parallel: usize) -> Self {
        Self {
            brain,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Propose exactly `count` roles worth interviewing. Never fails.
    pub async fn reflect(&self, context: &str, count: usize) -> Vec<PersonaOutline> {
        if count == 0 {
            return Vec::new();
        }
        info!(count, "reflecting on personas to interview");

        let system_prompt = "You are an expert in user research and market analysis.\n\
            Your task is to reflect on which types of personas would be most valuable to interview \
            about the given topic or context.\n\n\
            Reason step by step about:\n\
            1. The main stakeholders or user groups in this domain.\n\
            2. Which personas would give the most diverse and insightful perspectives.\n\
            3. Which roles have unique pain points, challenges or needs.\n\n\
            After your reasoning, list exactly the requested number of distinct personas, \
            each with a short description of who they are and why they are worth interviewing.\n\n\
            Respond with JSON only:\n\
            {\"reasoning\": \"...\", \"personas\": [{\"role\": \"...\", \"description\": \"...\"}]}";
        let user_prompt = format!(
            "Context for persona identification: {context}\n\n\
            Please identify {count} diverse personas that would be most valuable to interview about this topic."
        );

        let mut outlines = match self
            .brain
            .generate(system_prompt, &[ChatTurn::user(user_prompt)], 0.7, 2000)
            .await
            .and_then(|text| parse_outlines(&text))
        {
            Ok(outlines) => outlines,
            Err(e) => {
                warn!(error = %e, "persona reflection failed, using fallback roles");
                Vec::new()
            }
        };

        outlines.truncate(count);
        if outlines.len() < count {
            warn!(got = outlines.len(), wanted = count, "padding persona outlines with fallback roles");
        }
        while outlines.len() < count {
            let index = outlines.len();
            outlines.push(fallback_outline(context, index));
        }
        outlines
    }

    /// Expand one outline into a full persona. Never fails.
    pub async fn expand(&self, context: &str, outline: &PersonaOutline) -> Persona {
        debug!(role = %outline.role, "expanding persona outline");

        let system_prompt = "You are an expert in creating realistic customer personas for product research.\n\
            Create one detailed, realistic persona for a potential customer in the provided context, \
            based on the role and description given. Make them feel like a real person with nuanced, \
            memorable details rather than a stereotype.\n\n\
            Respond with a single JSON object:\n\
            {\"name\": \"Full Name\", \"age\": 34, \"gender\": \"...\", \"occupation\": \"...\", \
            \"location\": \"city, country\", \
            \"demographics\": {\"income_level\": \"...\", \"education\": \"...\", \"family_status\": \"...\"}, \
            \"behaviors\": [\"...\"], \"goals\": [\"...\"], \"pain_points\": [\"...\"], \
            \"motivations\": [\"...\"], \"challenges\": [\"...\"], \
            \"personality\": {\"trait\": \"description\"}, \
            \"background\": \"...\", \"description\": \"...\"}";
        let user_prompt = format!(
            "Context for persona creation: {context}\n\n\
            Role: {}\n\
            Description: {}\n\n\
            Please create a detailed, realistic customer persona based on this role and description.",
            outline.role, outline.description
        );

        let result = self
            .brain
            .generate(system_prompt, &[ChatTurn::user(user_prompt)], 0.7, 3000)
            .await
            .and_then(|text| parse_persona(&text));

        match result {
            Ok(persona) => {
                info!(name = %persona.name, role = %outline.role, "persona created");
                persona
            }
            Err(e) => {
                warn!(role = %outline.role, error = %e, "persona expansion failed, using fallback persona");
                fallback_persona(outline)
            }
        }
    }

    /// Reflect once, then expand every outline concurrently.
    ///
    /// At most `min(count, max_parallel)` expansions are in flight. The result
    /// is in completion order and always holds exactly `count` personas.
    /// Dropping the returned future aborts the expansions still running.
    pub async fn generate_all(&self, context: &str, count: usize) -> Vec<Persona> {
        let outlines = self.reflect(context, count).await;
        let limiter = Arc::new(Semaphore::new(count.min(self.max_parallel).max(1)));

        let mut tasks = JoinSet::new();
        for (index, outline) in outlines.iter().cloned().enumerate() {
            let generator = self.clone();
            let context = context.to_string();
            let limiter = limiter.clone();
            tasks.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                (index, generator.expand(&context, &outline).await)
            });
        }

        let mut unresolved: Vec<Option<PersonaOutline>> = outlines.into_iter().map(Some).collect();
        let mut personas = Vec::with_capacity(count);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, persona)) => {
                    unresolved[index] = None;
                    personas.push(persona);
                }
                Err(e) => warn!(error = %e, "persona expansion task died"),
            }
            debug!(done = personas.len(), total = count, "persona expansion progress");
        }

        // A task that died never reported back.
        for outline in unresolved.into_iter().flatten() {
            warn!(role = %outline.role, "using fallback persona for lost expansion");
            personas.push(fallback_persona(&outline));
        }

        info!(count = personas.len(), "persona generation finished");
        personas
    }
}

fn parse_outlines(text: &str) -> Result<Vec<PersonaOutline>, DiscoveryError> {
    let value = extract_object(text)?;
    if let Some(reasoning) = value.get("reasoning").and_then(Value::as_str) {
        let preview: String = reasoning.chars().take(200).collect();
        debug!(reasoning = %preview, "persona selection reasoning");
    }

    let entries = value
        .get("personas")
        .and_then(Value::as_array)
        .ok_or_else(|| DiscoveryError::Validation("reflection is missing a personas list".to_string()))?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let role = entry.get("role")?.as_str()?.trim();
            let description = entry.get("description")?.as_str()?.trim();
            (!role.is_empty() && !description.is_empty()).then(|| PersonaOutline {
                role: role.to_string(),
                description: description.to_string(),
            })
        })
        .collect())
}

fn parse_persona(text: &str) -> Result<Persona, DiscoveryError> {
    let value = extract_object(text)?;
    let draft: PersonaDraft =
        serde_json::from_value(value).map_err(|e| DiscoveryError::Validation(e.to_string()))?;
    draft.into_persona()
}
