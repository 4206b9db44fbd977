// src/interviewer.rs
// INTERVIEW ENGINE
// Drives one interviewer <-> persona dialogue, one message per call.

use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::brain::{ChatTurn, TextGenerator};
use crate::persona_generator::Persona;

pub const SUMMARY_TOO_SHORT: &str = "Conversation not long enough to generate a meaningful summary.";
pub const SUMMARY_FAILED: &str = "Unable to generate summary due to an error.";
pub const PERSONA_PLACEHOLDER: &str = "I'm sorry, I'm having trouble articulating my thoughts right now.";
pub const INTERVIEWER_PLACEHOLDER: &str = "That's interesting. Could you tell me more about that?";

/// Who wrote a message. Only these two parties ever speak.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Interviewer,
    Persona,
}

impl Speaker {
    /// Whose turn it is once `message_count` messages exist.
    pub fn next_for(message_count: usize) -> Self {
        if message_count % 2 == 1 {
            Speaker::Persona
        } else {
            Speaker::Interviewer
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Interviewer => "interviewer",
            Speaker::Persona => "persona",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub persona_id: String,
    pub messages: Vec<Message>,
    pub is_active: bool,
    /// Replaced wholesale on every extraction.
    pub insights: Vec<String>,
    pub summary: Option<String>,
}

impl Conversation {
    pub fn new(persona_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            persona_id: persona_id.to_string(),
            messages: Vec::new(),
            is_active: true,
            insights: Vec::new(),
            summary: None,
        }
    }

    pub fn next_speaker(&self) -> Speaker {
        Speaker::next_for(self.messages.len())
    }

    /// True once an even number of at least six messages exists.
    pub fn due_for_insights(&self) -> bool {
        let count = self.messages.len();
        count >= 6 && count % 2 == 0
    }

    // Appends as whoever's turn it is; roles can't double up.
    fn push(&mut self, content: String) -> Speaker {
        let role = self.next_speaker();
        self.messages.push(Message {
            role,
            content,
            timestamp: Utc::now(),
        });
        role
    }

    /// Sets the closing summary. Later calls are ignored.
    pub fn set_summary(&mut self, summary: String) {
        if self.summary.is_none() {
            self.summary = Some(summary);
        }
    }

    pub fn finish(&mut self) {
        self.is_active = false;
    }

    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Message history as seen by `speaker`: its own lines are assistant turns.
    pub fn history_for(&self, speaker: Speaker) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .map(|m| {
                if m.role == speaker {
                    ChatTurn::assistant(m.content.clone())
                } else {
                    ChatTurn::user(m.content.clone())
                }
            })
            .collect()
    }
}

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:\d+[.)]|[-*•])[ \t]+").expect("valid list marker pattern"));

/// Split a numbered or bulleted model answer into individual items.
pub fn split_insights(text: &str) -> Vec<String> {
    let mut chunks = LIST_MARKER.split(text).map(clean_item);

    // Text before the first marker is either a lone insight or a "Key insights:" heading.
    let mut items: Vec<String> = chunks
        .next()
        .filter(|lead| !lead.is_empty() && !lead.ends_with(':'))
        .into_iter()
        .collect();
    items.extend(chunks.filter(|item| !item.is_empty()));
    items
}

// Drops markdown emphasis anywhere in the item.
fn clean_item(item: &str) -> String {
    item.replace("**", "")
        .replace("__", "")
        .trim()
        .trim_matches(|c: char| c == '*' || c == '_')
        .trim()
        .to_string()
}

#[derive(Clone)]
pub struct Interviewer {
    brain: Arc<dyn TextGenerator>,
}

impl Interviewer {
    pub fn new(brain: Arc<dyn TextGenerator>) -> Self {
        Self { brain }
    }

    /// Start a conversation with the interviewer's opening message.
    pub async fn open(&self, context: &str, persona: &Persona) -> Conversation {
        let mut conversation = Conversation::new(&persona.id);

        let system_prompt = format!(
            "You are an experienced product researcher conducting a customer discovery interview.\n\
            You are interviewing a person with the following profile:\n\n\
            Name: {}\nAge: {}\nOccupation: {}\nLocation: {}\n\n\
            Your goal is to understand their pain points, challenges, goals and motivations related to:\n{}\n\n\
            Begin with a warm, professional introduction and an open-ended question. \
            Start broad, avoid leading questions and focus on problems rather than solutions.",
            persona.name, persona.age, persona.occupation, persona.location, context
        );
        let turns = [ChatTurn::user("Generate an opening message for this interview.")];

        let opening = match self.brain.generate(&system_prompt, &turns, 0.7, 300).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!(persona = %persona.name, "blank opening message, using greeting");
                fallback_opening(context, persona)
            }
            Err(e) => {
                warn!(persona = %persona.name, error = %e, "opening message failed, using greeting");
                fallback_opening(context, persona)
            }
        };

        conversation.push(opening);
        conversation
    }

    /// Append exactly one message from whoever's turn it is.
    pub async fn advance(&self, conversation: &mut Conversation, context: &str, persona: &Persona) -> Speaker {
        let speaker = conversation.next_speaker();
        let (system_prompt, temperature, max_tokens, placeholder) = match speaker {
            Speaker::Persona => (persona_system_prompt(context, persona), 0.8, 500, PERSONA_PLACEHOLDER),
            Speaker::Interviewer => (
                interviewer_system_prompt(context, persona),
                0.7,
                300,
                INTERVIEWER_PLACEHOLDER,
            ),
        };

        let history = conversation.history_for(speaker);
        let content = match self
            .brain
            .generate(&system_prompt, &history, temperature, max_tokens)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!(conversation = %conversation.id, %speaker, "blank turn, using placeholder");
                placeholder.to_string()
            }
            Err(e) => {
                warn!(conversation = %conversation.id, %speaker, error = %e, "turn generation failed, using placeholder");
                placeholder.to_string()
            }
        };

        let spoke = conversation.push(content);
        debug!(conversation = %conversation.id, %spoke, messages = conversation.messages.len(), "turn appended");
        spoke
    }

    /// Key insights so far. Empty for fewer than three messages or on failure.
    pub async fn extract_insights(&self, conversation: &Conversation, context: &str) -> Vec<String> {
        if conversation.messages.len() < 3 {
            return Vec::new();
        }

        let system_prompt = format!(
            "You are an expert at analyzing customer discovery interviews and extracting key insights.\n\
            Review the following conversation about {context} and identify 3-5 key insights, focusing on \
            pain points, unmet needs, opportunities, surprises and underlying motivations.\n\
            Give each insight as a concise, actionable statement on its own numbered line."
        );
        let user_prompt = format!(
            "Here is the conversation to analyze:\n\n{}\n\nExtract 3-5 key insights from this conversation.",
            conversation.transcript()
        );

        match self
            .brain
            .generate(&system_prompt, &[ChatTurn::user(user_prompt)], 0.3, 500)
            .await
        {
            Ok(text) => split_insights(&text),
            Err(e) => {
                warn!(conversation = %conversation.id, error = %e, "insight extraction failed");
                Vec::new()
            }
        }
    }

    /// Closing summary of the dialogue.
    pub async fn summarize(&self, conversation: &Conversation, context: &str) -> String {
        if conversation.messages.len() < 4 {
            return SUMMARY_TOO_SHORT.to_string();
        }

        let system_prompt = format!(
            "You are an expert at summarizing customer discovery interviews.\n\
            Review the following conversation about {context} and write a concise summary covering the key \
            points discussed, main pain points, needs expressed, behavioral patterns and opportunities."
        );
        let user_prompt = format!(
            "Here is the conversation to summarize:\n\n{}\n\nProvide a concise summary of this customer discovery conversation.",
            conversation.transcript()
        );

        match self
            .brain
            .generate(&system_prompt, &[ChatTurn::user(user_prompt)], 0.3, 300)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => SUMMARY_FAILED.to_string(),
            Err(e) => {
                warn!(conversation = %conversation.id, error = %e, "summary generation failed");
                SUMMARY_FAILED.to_string()
            }
        }
    }
}

fn fallback_opening(context: &str, persona: &Persona) -> String {
    format!(
        "Hello {}, thank you for joining me today. I'd like to learn about your experiences with {}. \
        Could you start by telling me about any challenges you face in this area?",
        persona.name, context
    )
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn persona_system_prompt(context: &str, persona: &Persona) -> String {
    format!(
        "You are roleplaying as a real person with the following characteristics:\n\n\
        Name: {}\nAge: {}\nGender: {}\nOccupation: {}\nLocation: {}\n\n\
        Demographics:\n{}\n\nBehaviors:\n{}\n\nGoals:\n{}\n\nPain Points:\n{}\n\n\
        Motivations:\n{}\n\nChallenges:\n{}\n\nPersonality:\n{}\n\nBackground:\n{}\n\n\
        You are participating in a customer interview about: {}\n\n\
        Respond naturally as this person would. Be authentic, show emotion and share your genuine \
        pain points. Don't be overly formal and don't recite your profile; embody it.",
        persona.name,
        persona.age,
        persona.gender,
        persona.occupation,
        persona.location,
        pretty(&persona.demographics),
        pretty(&persona.behaviors),
        pretty(&persona.goals),
        pretty(&persona.pain_points),
        pretty(&persona.motivations),
        pretty(&persona.challenges),
        pretty(&persona.personality),
        persona.background,
        context
    )
}

fn interviewer_system_prompt(context: &str, persona: &Persona) -> String {
    format!(
        "You are an experienced product researcher conducting a customer discovery interview.\n\n\
        You're interviewing: {}, a {}-year-old {} from {}.\n\n\
        Context for this interview: {}\n\n\
        Uncover their pain points, goals, current workflows and unmet needs. Ask open-ended questions, \
        probe with \"why\", follow up on interesting points, avoid leading questions and stay focused on \
        problems rather than solutions. Keep each reply conversational and short.",
        persona.name, persona.age, persona.occupation, persona.location, context
    )
}
