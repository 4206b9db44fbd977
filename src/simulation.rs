// src/simulation.rs
// SIMULATION RECORD & STATE MACHINE
// created -> generating_personas -> ready -> running -> completed | error

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyst::{AggregatedInsight, RawInsight};
use crate::error::{DiscoveryError, Result};
use crate::interviewer::Conversation;
use crate::persona_generator::Persona;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Created,
    GeneratingPersonas,
    Ready,
    Running,
    Completed,
    Error,
}

impl SimulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStatus::Created => "created",
            SimulationStatus::GeneratingPersonas => "generating_personas",
            SimulationStatus::Ready => "ready",
            SimulationStatus::Running => "running",
            SimulationStatus::Completed => "completed",
            SimulationStatus::Error => "error",
        }
    }

    /// Forward-only transitions; nothing leaves `completed` or `error`.
    pub fn can_transition_to(self, next: SimulationStatus) -> bool {
        use SimulationStatus::*;
        matches!(
            (self, next),
            (Created, GeneratingPersonas)
                | (GeneratingPersonas, Ready)
                | (GeneratingPersonas, Error)
                | (Ready, Running)
                | (Running, Completed)
                | (Running, Error)
        )
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Simulation {
    pub id: String,
    pub context: String,
    pub num_personas: usize,
    pub max_turns: usize,
    pub status: SimulationStatus,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Completion order of generation.
    pub personas: Vec<Persona>,
    /// At most one per persona, in the order they were opened.
    pub conversations: Vec<Conversation>,
    pub aggregated_insights: Vec<AggregatedInsight>,
}

impl Simulation {
    pub fn new(context: &str, num_personas: usize, max_turns: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context: context.to_string(),
            num_personas,
            max_turns,
            status: SimulationStatus::Created,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            error: None,
            personas: Vec::new(),
            conversations: Vec::new(),
            aggregated_insights: Vec::new(),
        }
    }

    /// Move to `next`, stamping start/end times. Illegal moves change nothing.
    pub fn transition(&mut self, next: SimulationStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DiscoveryError::InvalidState {
                id: self.id.clone(),
                expected: expected_before(next).to_string(),
                actual: self.status.to_string(),
            });
        }
        self.status = next;
        let now = Utc::now();
        match next {
            SimulationStatus::Running => self.start_time = Some(now),
            SimulationStatus::Completed | SimulationStatus::Error => self.end_time = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Record a failure. Returns false when the status can no longer become `error`.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.transition(SimulationStatus::Error).is_err() {
            return false;
        }
        self.error = Some(message.into());
        true
    }

    pub fn persona(&self, persona_id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == persona_id)
    }

    /// Replace the conversation held for the same persona, or add it.
    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        match self
            .conversations
            .iter_mut()
            .find(|c| c.persona_id == conversation.persona_id)
        {
            Some(slot) => *slot = conversation,
            None => self.conversations.push(conversation),
        }
    }

    /// Every conversation's current insights, tagged with where they came from.
    pub fn raw_insights(&self) -> Vec<RawInsight> {
        self.conversations
            .iter()
            .flat_map(|conversation| {
                let persona_name = self
                    .persona(&conversation.persona_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                conversation.insights.iter().map(move |insight| RawInsight {
                    insight: insight.clone(),
                    persona_id: conversation.persona_id.clone(),
                    persona_name: persona_name.clone(),
                    conversation_id: conversation.id.clone(),
                })
            })
            .collect()
    }

    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            id: self.id.clone(),
            context: self.context.clone(),
            num_personas: self.num_personas,
            max_turns: self.max_turns,
            status: self.status,
            personas_count: self.personas.len(),
            conversations_count: self.conversations.len(),
            insights_count: self.aggregated_insights.len(),
            start_time: self.start_time,
            end_time: self.end_time,
            error: self.error.clone(),
        }
    }

    pub fn progress(&self) -> Progress {
        if !matches!(self.status, SimulationStatus::Running | SimulationStatus::Completed) {
            return Progress::Pending(PendingProgress {
                status: self.status,
                personas_count: self.personas.len(),
                conversations_count: self.conversations.len(),
            });
        }

        let turn_capacity = (self.max_turns * 2).max(1) as f64;
        let mut conversation_stats = Vec::with_capacity(self.conversations.len());
        let mut active_conversations = 0;
        let mut completed_conversations = 0;
        let mut total_messages = 0;

        for conversation in &self.conversations {
            let Some(persona) = self.persona(&conversation.persona_id) else {
                continue;
            };
            let message_count = conversation.messages.len();
            if conversation.is_active {
                active_conversations += 1;
            } else {
                completed_conversations += 1;
            }
            total_messages += message_count;

            conversation_stats.push(ConversationProgress {
                conversation_id: conversation.id.clone(),
                persona_id: persona.id.clone(),
                persona_name: persona.name.clone(),
                message_count,
                is_active: conversation.is_active,
                progress_percentage: round1((message_count as f64 / turn_capacity * 100.0).min(100.0)),
                has_summary: conversation.summary.is_some(),
            });
        }

        let total = self.conversations.len();
        let overall_progress = if total > 0 {
            round1(completed_conversations as f64 / total as f64 * 100.0)
        } else {
            0.0
        };

        Progress::Detailed(DetailedProgress {
            status: self.status,
            overall_progress,
            personas_count: self.personas.len(),
            conversations_count: total,
            active_conversations,
            completed_conversations,
            total_messages,
            conversation_stats,
            insights_count: self.aggregated_insights.len(),
            parallel_execution: true,
        })
    }
}

fn expected_before(next: SimulationStatus) -> &'static str {
    match next {
        SimulationStatus::Created => "nothing",
        SimulationStatus::GeneratingPersonas => "created",
        SimulationStatus::Ready => "generating_personas",
        SimulationStatus::Running => "ready",
        SimulationStatus::Completed => "running",
        SimulationStatus::Error => "generating_personas or running",
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Listing view of a simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub id: String,
    pub context: String,
    pub num_personas: usize,
    pub max_turns: usize,
    pub status: SimulationStatus,
    pub personas_count: usize,
    pub conversations_count: usize,
    pub insights_count: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Progress {
    Pending(PendingProgress),
    Detailed(DetailedProgress),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingProgress {
    pub status: SimulationStatus,
    pub personas_count: usize,
    pub conversations_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetailedProgress {
    pub status: SimulationStatus,
    pub overall_progress: f64,
    pub personas_count: usize,
    pub conversations_count: usize,
    pub active_conversations: usize,
    pub completed_conversations: usize,
    pub total_messages: usize,
    pub conversation_stats: Vec<ConversationProgress>,
    pub insights_count: usize,
    pub parallel_execution: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationProgress {
    pub conversation_id: String,
    pub persona_id: String,
    pub persona_name: String,
    pub message_count: usize,
    pub is_active: bool,
    pub progress_percentage: f64,
    pub has_summary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona_generator::{fallback_outline, fallback_persona};
    use SimulationStatus::*;

    const ALL: [SimulationStatus; 6] = [Created, GeneratingPersonas, Ready, Running, Completed, Error];

    fn running_simulation(max_turns: usize) -> Simulation {
        let mut sim = Simulation::new("dog walking app", 2, max_turns);
        for step in [GeneratingPersonas, Ready, Running] {
            sim.transition(step).unwrap();
        }
        sim
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [Completed, Error] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn error_only_from_generation_or_running() {
        let sources: Vec<_> = ALL.into_iter().filter(|s| s.can_transition_to(Error)).collect();
        assert_eq!(sources, vec![GeneratingPersonas, Running]);
        let sources: Vec<_> = ALL.into_iter().filter(|s| s.can_transition_to(Completed)).collect();
        assert_eq!(sources, vec![Running]);
    }

    #[test]
    fn illegal_transition_leaves_state_alone() {
        let mut sim = Simulation::new("ctx", 1, 1);
        let err = sim.transition(Running).unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidState { .. }));
        assert_eq!(sim.status, Created);
        assert!(sim.start_time.is_none());
    }

    #[test]
    fn timestamps_follow_transitions() {
        let mut sim = running_simulation(3);
        assert!(sim.start_time.is_some());
        assert!(sim.end_time.is_none());
        sim.transition(Completed).unwrap();
        assert!(sim.end_time.is_some());
        assert!(!sim.fail("late failure"));
        assert_eq!(sim.status, Completed);
        assert!(sim.error.is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&GeneratingPersonas).unwrap(), "\"generating_personas\"");
        assert_eq!(GeneratingPersonas.to_string(), "generating_personas");
    }

    #[test]
    fn pending_progress_before_running() {
        let sim = Simulation::new("ctx", 2, 3);
        let progress = sim.progress();
        assert!(matches!(&progress, Progress::Pending(p) if p.status == Created));
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            serde_json::json!({"status": "created", "personas_count": 0, "conversations_count": 0})
        );
    }

    #[test]
    fn detailed_progress_counts_messages_and_finished_dialogues() {
        let mut sim = running_simulation(2);
        let a = fallback_persona(&fallback_outline("ctx", 0));
        let b = fallback_persona(&fallback_outline("ctx", 1));
        sim.personas = vec![a.clone(), b.clone()];

        let mut first = Conversation::new(&a.id);
        first.messages = (0..3)
            .map(|i| crate::interviewer::Message {
                role: crate::interviewer::Speaker::next_for(i),
                content: format!("m{i}"),
                timestamp: Utc::now(),
            })
            .collect();
        let mut second = Conversation::new(&b.id);
        second.set_summary("done".into());
        second.finish();
        sim.upsert_conversation(first);
        sim.upsert_conversation(second);

        let Progress::Detailed(progress) = sim.progress() else {
            panic!("running simulation must report detailed progress");
        };
        assert_eq!(progress.total_messages, 3);
        assert_eq!(progress.active_conversations, 1);
        assert_eq!(progress.completed_conversations, 1);
        assert_eq!(progress.overall_progress, 50.0);
        assert_eq!(progress.conversation_stats[0].progress_percentage, 75.0);
        assert!(progress.conversation_stats[1].has_summary);
        assert_eq!(sim.progress(), sim.progress());
    }

    #[test]
    fn upsert_replaces_by_persona() {
        let mut sim = Simulation::new("ctx", 1, 1);
        let mut conversation = Conversation::new("p1");
        sim.upsert_conversation(conversation.clone());
        conversation.insights = vec!["x".into()];
        sim.upsert_conversation(conversation);
        assert_eq!(sim.conversations.len(), 1);
        assert_eq!(sim.conversations[0].insights, vec!["x"]);
    }

    #[test]
    fn raw_insights_carry_their_origin() {
        let mut sim = Simulation::new("ctx", 1, 1);
        let persona = fallback_persona(&fallback_outline("ctx", 2));
        let mut conversation = Conversation::new(&persona.id);
        conversation.insights = vec!["Setup is slow".into(), "Docs are thin".into()];
        let conversation_id = conversation.id.clone();
        sim.personas.push(persona);
        sim.upsert_conversation(conversation);

        let raw = sim.raw_insights();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].persona_name, "Sample Technical User");
        assert_eq!(raw[1].conversation_id, conversation_id);
    }
}
