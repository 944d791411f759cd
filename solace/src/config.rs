//! Layered configuration.
//!
//! Priority (highest to lowest):
//! 1. `SOLACE_` environment variables (`__` separates sections, e.g. `SOLACE_UPSTREAM__MODEL`)
//! 2. Explicit `--config` path
//! 3. Project file: `./solace.toml`
//! 4. Global file: `$XDG_CONFIG_HOME/solace/config.toml`
//! 5. Built-in defaults
//!
//! CLI flags are applied on top by the `serve` command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const PROJECT_FILE: &str = "solace.toml";
const ENV_PREFIX: &str = "SOLACE_";

const DEFAULT_PREAMBLE: &str = "You are a warm, non-judgmental support companion inside a \
women's community app. The person you are talking to is anonymous. Listen carefully, \
respond with empathy and practical, gentle suggestions, and keep replies concise. \
You are not a medical or legal professional; if someone may be in danger, encourage \
them to contact local emergency services or use the app's Safety Hub.";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 58231,
        }
    }
}

/// Model backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the Ollama-compatible backend; `/api/chat` is appended.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Whole-request timeout. Generation routinely takes minutes.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Bearer token for hosted backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.2".to_string(),
            temperature: 0.7,
            timeout_secs: 300,
            connect_timeout_secs: 10,
            api_key: None,
        }
    }
}

impl UpstreamConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

/// Conversation relay behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Seeded as turn 0 of every session.
    pub system_preamble: String,
    /// Number of recent user/assistant pairs sent upstream.
    pub history_pairs: usize,
    /// Sessions kept before the least recently active one is evicted.
    pub max_sessions: usize,
    /// Upstream generations allowed to run at once across all users.
    pub max_concurrent_generations: usize,
    /// Cancel a user's generation when their last live connection drops.
    pub cancel_on_disconnect: bool,
    /// Per-channel event buffer.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_preamble: DEFAULT_PREAMBLE.to_string(),
            history_pairs: 10,
            max_sessions: 10_000,
            max_concurrent_generations: 8,
            cancel_on_disconnect: true,
            channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(global) = Self::global_path() {
            if global.exists() {
                figment = figment.merge(Toml::file(global));
            }
        }

        let project = PathBuf::from(PROJECT_FILE);
        if project.exists() {
            figment = figment.merge(Toml::file(project));
        }

        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// `$XDG_CONFIG_HOME/solace/config.toml`, or the platform equivalent.
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("solace").join("config.toml"))
    }

    /// Render as TOML (used by `solace config`). The API key is masked.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        let mut shown = self.clone();
        if shown.upstream.api_key.is_some() {
            shown.upstream.api_key = Some("********".to_string());
        }
        toml::to_string_pretty(&shown)
    }
}
