// src/reporter.rs
// Transcript & insight export (CSV / JSON) plus the completion summary log.

use csv::Writer;
use tracing::info;

use crate::error::{DiscoveryError, Result};
use crate::interviewer::Conversation;
use crate::persona_generator::Persona;
use crate::simulation::Simulation;

pub struct Reporter;

impl Reporter {
    /// One row per message across every conversation.
    pub fn export_transcripts_csv(
        conversations: &[Conversation],
        personas: &[Persona],
    ) -> Result<Vec<u8>> {
        let mut wtr = Writer::from_writer(vec![]);

        wtr.write_record([
            "conversation_id",
            "persona_id",
            "persona_name",
            "turn",
            "role",
            "timestamp",
            "content",
        ])
        .map_err(csv_error)?;

        for conversation in conversations {
            let persona_name = personas
                .iter()
                .find(|p| p.id == conversation.persona_id)
                .map(|p| p.name.as_str())
                .unwrap_or("");

            for (index, message) in conversation.messages.iter().enumerate() {
                let turn = (index + 1).to_string();
                let timestamp = message.timestamp.to_rfc3339();
                wtr.write_record([
                    conversation.id.as_str(),
                    conversation.persona_id.as_str(),
                    persona_name,
                    turn.as_str(),
                    message.role.as_str(),
                    timestamp.as_str(),
                    message.content.as_str(),
                ])
                .map_err(csv_error)?;
            }
        }

        wtr.into_inner()
            .map_err(|e| DiscoveryError::Internal(format!("failed to finish CSV export: {e}")))
    }

    pub fn export_json(simulation: &Simulation) -> Result<String> {
        let conversations: Vec<_> = simulation
            .conversations
            .iter()
            .map(|conversation| {
                let persona_name = simulation
                    .persona(&conversation.persona_id)
                    .map(|p| p.name.clone());
                serde_json::json!({
                    "id": conversation.id,
                    "persona_id": conversation.persona_id,
                    "persona_name": persona_name,
                    "messages": conversation.messages,
                    "insights": conversation.insights,
                    "summary": conversation.summary,
                })
            })
            .collect();

        let output = serde_json::json!({
            "simulation": simulation.summary(),
            "personas": simulation.personas,
            "conversations": conversations,
            "aggregated_insights": simulation.aggregated_insights,
            "total_personas": simulation.personas.len(),
            "total_messages": simulation.conversations.iter().map(|c| c.messages.len()).sum::<usize>(),
            "export_timestamp": chrono::Utc::now().to_rfc3339(),
        });

        serde_json::to_string_pretty(&output)
            .map_err(|e| DiscoveryError::Internal(format!("failed to serialize export: {e}")))
    }

    pub fn log_summary(simulation: &Simulation) {
        let messages: usize = simulation.conversations.iter().map(|c| c.messages.len()).sum();
        let raw_insights: usize = simulation.conversations.iter().map(|c| c.insights.len()).sum();
        info!(
            simulation_id = %simulation.id,
            status = %simulation.status,
            personas = simulation.personas.len(),
            conversations = simulation.conversations.len(),
            messages,
            raw_insights,
            themes = simulation.aggregated_insights.len(),
            "simulation report"
        );
    }
}

fn csv_error(e: csv::Error) -> DiscoveryError {
    DiscoveryError::Internal(format!("failed to write CSV: {e}"))
}
