use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::account::TransferLimits;
use crate::fee::FeePolicy;

/// Engine configuration, loaded from `config/<env>.yaml`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub fees: FeePolicy,
    /// Transfer limits applied to newly opened user accounts.
    #[serde(default)]
    pub default_limits: TransferLimits,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "vaultledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        Self::load_path(format!("config/{}.yaml", env))
    }

    pub fn load_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config yaml: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.fees.external_fee_rate, dec!(0.01));
        assert_eq!(config.default_limits.daily, dec!(5000));
        assert_eq!(config.logging.rotation, "daily");
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
fees:
  external_fee_rate: "0.02"
default_limits:
  per_transaction: 1000
  daily: 3000
  monthly: 20000
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.fees.external_fee_rate, dec!(0.02));
        assert_eq!(config.default_limits.per_transaction, dec!(1000));
        // omitted sections fall back to defaults
        assert_eq!(config.logging.log_level, "info");
    }
}
