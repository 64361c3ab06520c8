use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::adapters::MarketDataConfig;
use crate::agents::AgentEndpoint;
use crate::collector::CollectorConfig;
use crate::consensus::ConsensusConfig;
use crate::policy::PolicyConfig;
use crate::recalibration::{RecalibrationConfig, WeightsConfig};
use crate::scheduler::SchedulerConfig;
use crate::shadow::ShadowConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
    #[serde(default)]
    pub recalibration: RecalibrationConfig,
    #[serde(default)]
    pub weights: WeightsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    /// Remote scoring agents registered at startup
    #[serde(default)]
    pub agents: Vec<AgentEndpoint>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; unset keeps everything in memory
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("QUORUM_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (QUORUM_COLLECTOR__ROUND_DEADLINE_MS, etc.)
            .add_source(
                Environment::with_prefix("QUORUM")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        errors.extend(self.collector.validate());
        if let Err(e) = self.consensus.quorum_table() {
            errors.push(format!("consensus: {}", e));
        }
        errors.extend(self.shadow.validate());
        errors.extend(self.recalibration.validate());
        errors.extend(self.weights.validate());
        errors.extend(self.scheduler.validate());

        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be positive".to_string());
        }

        let mut seen = std::collections::BTreeSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                errors.push("agents: id must not be empty".to_string());
            } else if !seen.insert(agent.id.as_str()) {
                errors.push(format!("agents: duplicate id {}", agent.id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
