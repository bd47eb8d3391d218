//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Decimal values are written as strings (`tolerance = "0.01"`) to keep them
//! exact.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::types::{SettlementError, SettlementResult};

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Magnitude at or below which a balance counts as zero
    pub tolerance: BigDecimal,
    /// Prefixes bank importers put in front of entity ids (`cp_123`)
    pub importer_prefixes: Vec<String>,
    pub auto_match: AutoMatchConfig,
}

/// Thresholds for the auto-match classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMatchConfig {
    /// Similarity at or above which a name match is a medium suggestion
    pub name_threshold: f64,
    /// Similarity at or above which an unmatched line gets a low-confidence hint
    pub weak_name_threshold: f64,
    /// Allowed gap between a bank amount and an open balance
    pub amount_epsilon: BigDecimal,
    /// Days after the week end a payment is still attributed to it
    pub date_grace_days: i64,
    /// Shorter keys are never searched for in memos
    pub min_memo_key_len: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            tolerance: cents(1),
            importer_prefixes: vec!["cp_".to_string()],
            auto_match: AutoMatchConfig::default(),
        }
    }
}

impl Default for AutoMatchConfig {
    fn default() -> Self {
        Self {
            name_threshold: 0.85,
            weak_name_threshold: 0.6,
            amount_epsilon: cents(1),
            date_grace_days: 2,
            min_memo_key_len: 3,
        }
    }
}

fn cents(value: i64) -> BigDecimal {
    BigDecimal::new(value.into(), 2)
}

impl SettlementConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> SettlementResult<Self> {
        let config: SettlementConfig =
            toml::from_str(source).map_err(|e| SettlementError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> SettlementResult<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|e| {
            SettlementError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// Reject values that would make classification meaningless
    pub fn validate(&self) -> SettlementResult<()> {
        if self.tolerance < BigDecimal::from(0) {
            return Err(SettlementError::Config(
                "tolerance cannot be negative".to_string(),
            ));
        }

        let auto = &self.auto_match;
        if !(0.0..=1.0).contains(&auto.name_threshold)
            || !(0.0..=1.0).contains(&auto.weak_name_threshold)
        {
            return Err(SettlementError::Config(
                "name thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if auto.weak_name_threshold > auto.name_threshold {
            return Err(SettlementError::Config(
                "weak_name_threshold cannot exceed name_threshold".to_string(),
            ));
        }
        if auto.amount_epsilon < BigDecimal::from(0) || auto.date_grace_days < 0 {
            return Err(SettlementError::Config(
                "amount_epsilon and date_grace_days cannot be negative".to_string(),
            ));
        }
        if self.importer_prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err(SettlementError::Config(
                "importer prefixes cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Convenience for tests and callers that tune only the tolerance
    pub fn with_tolerance(mut self, tolerance: &str) -> SettlementResult<Self> {
        self.tolerance = BigDecimal::from_str(tolerance)
            .map_err(|e| SettlementError::Config(e.to_string()))?;
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SettlementConfig::from_toml_str("").unwrap();
        assert_eq!(config, SettlementConfig::default());
        assert_eq!(config.tolerance, BigDecimal::from_str("0.01").unwrap());
        assert_eq!(config.importer_prefixes, vec!["cp_".to_string()]);
    }

    #[test]
    fn test_partial_override() {
        let config = SettlementConfig::from_toml_str(
            r#"
            importer_prefixes = ["cp_", "ofx_"]

            [auto_match]
            name_threshold = 0.9
            amount_epsilon = "0.05"
            "#,
        )
        .unwrap();

        assert_eq!(config.importer_prefixes.len(), 2);
        assert_eq!(config.auto_match.name_threshold, 0.9);
        assert_eq!(
            config.auto_match.amount_epsilon,
            BigDecimal::from_str("0.05").unwrap()
        );
        assert_eq!(config.auto_match.date_grace_days, 2);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let result = SettlementConfig::from_toml_str(
            r#"
            [auto_match]
            name_threshold = 0.5
            weak_name_threshold = 0.7
            "#,
        );
        assert!(matches!(result, Err(SettlementError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = SettlementConfig::load("/nonexistent/settlement.toml");
        assert!(matches!(result, Err(SettlementError::Config(_))));
    }
}
