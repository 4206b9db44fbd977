#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::runtime::Handle;

use discovery_core::brain::{ChatTurn, TextGenerator};
use discovery_core::config::SimulationConfig;
use discovery_core::manager::SimulationManager;
use discovery_core::DiscoveryError;

/// Answers every prompt kind with canned, well-formed output.
#[derive(Default)]
pub struct ScriptedBrain {
    pub delay: Duration,
}

impl ScriptedBrain {
    pub fn slow(delay: Duration) -> Self {
        Self { delay }
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
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = if system_prompt.contains("user research and market analysis") {
            json!({"personas": [
                {"role": "Dog Owner", "description": "Needs midday walks"},
                {"role": "Dog Walker", "description": "Walks five dogs a day"},
                {"role": "Vet", "description": "Sees the consequences of missed walks"}
            ]})
            .to_string()
        } else if system_prompt.contains("creating realistic customer personas") {
            let role = turns
                .first()
                .and_then(|t| t.content.lines().find_map(|l| l.strip_prefix("Role: ")))
                .unwrap_or("Customer");
            persona_json(&format!("Sam {role}"), role)
        } else if system_prompt.contains("analyzing customer research insights") {
            json!([{"theme": "Reliability", "description": "Walkers cancel", "evidence": "All personas",
                    "impact": "Offer backup walkers", "confidence": 5}])
            .to_string()
        } else if system_prompt.contains("analyzing customer discovery interviews") {
            "1. Walkers cancel at short notice\n2. Owners pay for reliability".to_string()
        } else if system_prompt.contains("summarizing customer discovery interviews") {
            "Reliability is the main concern.".to_string()
        } else if system_prompt.contains("roleplaying as a real person") {
            "My walker cancelled twice last week.".to_string()
        } else {
            "How did you handle that?".to_string()
        };
        Ok(reply)
    }
}

pub struct FailingBrain;

#[async_trait]
impl TextGenerator for FailingBrain {
    async fn generate(&self, _: &str, _: &[ChatTurn], _: f32, _: u32) -> Result<String, DiscoveryError> {
        Err(DiscoveryError::service("503 service unavailable"))
    }
}

pub fn persona_json(name: &str, occupation: &str) -> String {
    json!({
        "name": name,
        "age": "29",
        "gender": "Male",
        "occupation": occupation,
        "location": "Austin, USA",
        "demographics": {"income_level": "Middle"},
        "behaviors": ["Books services on mobile"],
        "goals": ["A reliable routine"],
        "pain_points": ["Last-minute cancellations"],
        "motivations": ["Happy dog"],
        "challenges": ["Unpredictable schedule"],
        "personality": {"direct": "Says what he thinks"},
        "background": "Moved to the city two years ago.",
        "description": format!("A {occupation} in a busy city")
    })
    .to_string()
}

pub fn fast_settings() -> SimulationConfig {
    SimulationConfig {
        turn_delay_ms: 0,
        ..SimulationConfig::default()
    }
}

pub fn manager_with(brain: impl TextGenerator + 'static) -> SimulationManager {
    SimulationManager::new(Arc::new(brain), fast_settings(), Handle::current())
}
