use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Bounded conversation tail kept in memory per connection (user/assistant pairs).
pub const DEFAULT_MAX_HISTORY_PAIRS: usize = 12;

/// Top-level config (arbor.toml + ARBOR_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArborConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub time: TimeConfig,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            time: TimeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Anthropic-compatible API key. Empty means the gateway refuses model calls.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: String::new(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding `projects/<user>/<project>/...`.
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Context and history bounds. All caps are characters unless noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_history_pairs")]
    pub max_history_pairs: usize,
    /// Cap for the compact facts-map injection.
    #[serde(default = "default_facts_map_chars")]
    pub facts_map_max_chars: usize,
    /// Tail truncation for a single artifact excerpt.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_max_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_history_pairs: DEFAULT_MAX_HISTORY_PAIRS,
            facts_map_max_chars: default_facts_map_chars(),
            excerpt_max_chars: default_excerpt_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_storage_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.arbor", home)
}
fn default_history_pairs() -> usize {
    DEFAULT_MAX_HISTORY_PAIRS
}
fn default_facts_map_chars() -> usize {
    2_400
}
fn default_excerpt_chars() -> usize {
    9_000
}
fn default_timezone() -> String {
    crate::time::DEFAULT_TIMEZONE.to_string()
}

impl ArborConfig {
    /// Load config from a TOML file with ARBOR_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.arbor/arbor.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ArborConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ARBOR_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.arbor/arbor.toml", home)
}
