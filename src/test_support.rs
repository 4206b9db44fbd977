// src/test_support.rs
// Deterministic TextGenerator doubles for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::brain::{ChatTurn, TextGenerator};
use crate::error::DiscoveryError;

/// A complete persona document as a model would return it.
pub fn persona_json(name: &str, occupation: &str) -> String {
    json!({
        "name": name,
        "age": 34,
        "gender": "Female",
        "occupation": occupation,
        "location": "Lisbon, Portugal",
        "demographics": {"income_level": "Middle", "education": "Master's degree", "family_status": "Married"},
        "behaviors": ["Checks reviews before buying"],
        "goals": ["Spend less time on chores"],
        "pain_points": ["Unreliable service providers"],
        "motivations": ["Peace of mind"],
        "challenges": ["Long working hours"],
        "personality": {"organized": "Plans the week on Sunday"},
        "background": format!("{name} has worked as a {occupation} for ten years."),
        "description": format!("A busy {occupation}")
    })
    .to_string()
}

/// Answers by recognising the kind of prompt it was given.
#[derive(Default)]
pub struct ScriptedBrain {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    extractions: AtomicUsize,
}

impl ScriptedBrain {
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn reply(&self, system_prompt: &str, turns: &[ChatTurn]) -> String {
        if system_prompt.contains("user research and market analysis") {
            json!({
                "reasoning": "Owners, walkers and retailers see the problem differently.",
                "personas": [
                    {"role": "Dog Owner", "description": "Works long hours and needs midday walks"},
                    {"role": "Professional Dog Walker", "description": "Runs a small walking business"},
                    {"role": "Pet Shop Manager", "description": "Hears customer complaints every day"}
                ]
            })
            .to_string()
        } else if system_prompt.contains("creating realistic customer personas") {
            let role = turns
                .first()
                .and_then(|t| t.content.lines().find_map(|l| l.strip_prefix("Role: ")))
                .unwrap_or("Customer")
                .to_string();
            persona_json(&format!("Alex {role}"), &role)
        } else if system_prompt.contains("analyzing customer research insights") {
            json!([
                {"theme": "Trust", "description": "Owners need to trust walkers", "evidence": "Most personas", "impact": "Add vetting", "confidence": 4}
            ])
            .to_string()
        } else if system_prompt.contains("analyzing customer discovery interviews") {
            let round = self.extractions.fetch_add(1, Ordering::SeqCst) + 1;
            format!("Key insights:\n1. Extraction {round}: midday walks are hard to arrange\n2. Trust matters more than price")
        } else if system_prompt.contains("summarizing customer discovery interviews") {
            "The persona struggles to find reliable walkers.".to_string()
        } else if system_prompt.contains("roleplaying as a real person") {
            "Honestly, finding someone reliable is the hardest part.".to_string()
        } else {
            "What makes that difficult for you?".to_string()
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedBrain {
    async fn generate(
        &self,
        system_prompt: &str,
        turns: &[ChatTurn],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, DiscoveryError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.reply(system_prompt, turns))
    }
}

/// Every call fails like an unreachable service.
pub struct FailingBrain;

#[async_trait]
impl TextGenerator for FailingBrain {
    async fn generate(&self, _: &str, _: &[ChatTurn], _: f32, _: u32) -> Result<String, DiscoveryError> {
        Err(DiscoveryError::service("connection refused"))
    }
}

/// Reflection fails; persona expansion panics inside the task.
pub struct PanickingExpansionBrain;

#[async_trait]
impl TextGenerator for PanickingExpansionBrain {
    async fn generate(&self, system_prompt: &str, _: &[ChatTurn], _: f32, _: u32) -> Result<String, DiscoveryError> {
        if system_prompt.contains("creating realistic customer personas") {
            panic!("expansion blew up");
        }
        Err(DiscoveryError::service("unavailable"))
    }
}

/// Reflection fails at once; each expansion takes 200ms before it counts as finished.
#[derive(Default)]
pub struct SlowExpansionBrain {
    finished: AtomicUsize,
}

impl SlowExpansionBrain {
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for SlowExpansionBrain {
    async fn generate(&self, system_prompt: &str, _: &[ChatTurn], _: f32, _: u32) -> Result<String, DiscoveryError> {
        if system_prompt.contains("creating realistic customer personas") {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
        Err(DiscoveryError::service("unavailable"))
    }
}

/// Returns one fixed reply and records every call.
pub struct RecordingBrain {
    reply: String,
    calls: Mutex<Vec<(String, Vec<ChatTurn>)>>,
}

impl RecordingBrain {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<ChatTurn>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for RecordingBrain {
    async fn generate(&self, system_prompt: &str, turns: &[ChatTurn], _: f32, _: u32) -> Result<String, DiscoveryError> {
        self.calls
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), turns.to_vec()));
        Ok(self.reply.clone())
    }
}
