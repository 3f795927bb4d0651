//! Configuration management for CaliBot
//!
//! Loads from YAML files + environment variable overrides

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::evaluator::EvaluatorConfig;
use crate::gateway::GatewayConfig;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub evaluator: EvaluatorConfig,
    pub gateway: GatewayConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Data directory for the evaluation history CSV
    pub data_dir: String,
    /// Enable durable history (disable for ephemeral replays)
    pub enabled: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Evaluator defaults
            .set_default("evaluator.default_target_atr", 2.0)?
            .set_default("evaluator.default_stop_atr", 1.0)?
            .set_default("evaluator.entry_tolerance_secs", 120)?
            .set_default("evaluator.tie_break", "target_wins")?
            // Gateway defaults
            .set_default("gateway.cooldown_secs", 3600)?
            .set_default("gateway.idempotency_ttl_secs", 86_400)?
            .set_default("gateway.kill_switch_key", "execution:kill_switch")?
            .set_default("gateway.regime_key", "market:regime")?
            .set_default("gateway.op_timeout_ms", 2000)?
            // History defaults
            .set_default("history.data_dir", "./data")?
            .set_default("history.enabled", true)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (CALIBOT_*)
            .add_source(Environment::with_prefix("CALIBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "target_atr={:.1} stop_atr={:.1} cooldown_secs={} data_dir={}",
            self.evaluator.default_target_atr,
            self.evaluator.default_stop_atr,
            self.gateway.cooldown_secs,
            self.history.data_dir
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::TieBreak;

    #[test]
    fn test_defaults_load() {
        let config = AppConfig::load().expect("default config should load");
        assert_eq!(config.evaluator.default_target_atr, 2.0);
        assert_eq!(config.evaluator.default_stop_atr, 1.0);
        assert_eq!(config.evaluator.tie_break, TieBreak::TargetWins);
        assert_eq!(config.gateway.cooldown_secs, 3600);
        assert_eq!(config.gateway.idempotency_ttl_secs, 86_400);
        assert!(config.history.enabled);
    }

    #[test]
    fn test_digest_mentions_core_knobs() {
        let config = AppConfig::load().unwrap();
        let digest = config.digest();
        assert!(digest.contains("cooldown_secs=3600"));
    }
}
