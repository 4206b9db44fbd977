// src/config.rs
// Layered configuration: compiled defaults < ./discovery.toml < DISCOVERY_* env vars.

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Connection settings for the OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
            max_retries: 2,
            retry_base_delay_ms: 500,
        }
    }
}

/// Limits and pacing for simulations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub default_personas: usize,
    pub default_max_turns: usize,
    pub max_personas: usize,
    pub max_turns_limit: usize,
    /// Pause between turns of one conversation, in milliseconds.
    pub turn_delay_ms: u64,
    pub max_parallel_expansions: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_personas: 5,
            default_max_turns: 10,
            max_personas: 20,
            max_turns_limit: 50,
            turn_delay_ms: 1000,
            max_parallel_expansions: 5,
        }
    }
}

impl SimulationConfig {
    pub fn turn_delay(&self) -> Duration {
        Duration::from_millis(self.turn_delay_ms)
    }
}

/// Load configuration from defaults, `./discovery.toml` and the environment.
pub fn load_config() -> Result<AppConfig> {
    let mut config: AppConfig = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("discovery.toml"))
        .merge(env_provider())
        .extract()
        .map_err(|e| DiscoveryError::Config(e.to_string()))?;

    if config.llm.api_key.is_empty() {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.llm.api_key = key;
        }
    }
    Ok(config)
}

/// Defaults merged with an inline TOML document. No file or env lookup.
pub fn load_config_from_str(toml_content: &str) -> Result<AppConfig> {
    Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
        .map_err(|e| DiscoveryError::Config(e.to_string()))
}

// Section prefixes are mapped explicitly; `split("_")` would break keys like `api_key`.
fn env_provider() -> Env {
    Env::prefixed("DISCOVERY_").map(|key| {
        key.as_str()
            .replacen("server_", "server.", 1)
            .replacen("llm_", "llm.", 1)
            .replacen("simulation_", "simulation.", 1)
            .into()
    })
}
