use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KpiError, KpiResult};
use crate::types::MetricRule;

pub const DEFAULT_DECLINE_THRESHOLD: f64 = 2.0;
pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;
pub const DEFAULT_CRITICAL_METRICS: &[&str] =
    &["MTCL_2024", "CSSR", "CDR", "ERAB_SR_2022", "HOSR_4G_2024"];

/// Configuration consumed by a detection run.
///
/// Passed explicitly into the detector; nothing here is process-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Minimum relative change, in percent, before a decline can fire.
    #[serde(default = "default_threshold")]
    pub decline_threshold: f64,
    /// Days back from the latest observation that bound the baseline window.
    #[serde(default = "default_lookback")]
    pub lookback_days: u32,
    /// Metrics analysed by a full pipeline run.
    #[serde(default)]
    pub critical_metrics: Vec<String>,
    /// Exact metric id -> rule.
    #[serde(default)]
    pub rules: BTreeMap<String, MetricRule>,
}

fn default_threshold() -> f64 {
    DEFAULT_DECLINE_THRESHOLD
}

fn default_lookback() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert("CDR".to_string(), MetricRule::lower_better(Some(0.35)));

        Self {
            decline_threshold: DEFAULT_DECLINE_THRESHOLD,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            critical_metrics: DEFAULT_CRITICAL_METRICS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rules,
        }
    }
}

impl DetectionConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// `KPI_DECLINE_THRESHOLD`, `KPI_LOOKBACK_DAYS`, `KPI_CRITICAL_METRICS`
    /// (comma separated) and `KPI_RULES_FILE` (JSON object of rules).
    pub fn from_env() -> KpiResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> KpiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(raw) = var("KPI_DECLINE_THRESHOLD") {
            config.decline_threshold = raw.parse().map_err(|_| {
                KpiError::Config(format!("KPI_DECLINE_THRESHOLD is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = var("KPI_LOOKBACK_DAYS") {
            config.lookback_days = raw.parse().map_err(|_| {
                KpiError::Config(format!("KPI_LOOKBACK_DAYS is not a whole number: {raw}"))
            })?;
        }
        if let Some(raw) = var("KPI_CRITICAL_METRICS") {
            config.critical_metrics = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(path) = var("KPI_RULES_FILE") {
            config.rules = load_rules(Path::new(&path))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a full configuration document from a JSON file.
    pub fn from_json_file(path: &Path) -> KpiResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> KpiResult<()> {
        if !self.decline_threshold.is_finite() || self.decline_threshold <= 0.0 {
            return Err(KpiError::Config(format!(
                "decline_threshold must be a positive percentage, got {}",
                self.decline_threshold
            )));
        }
        if self.lookback_days < 1 {
            return Err(KpiError::Config("lookback_days must be at least 1".to_string()));
        }
        for (metric, rule) in &self.rules {
            if let Some(limit) = rule.limit {
                if !limit.is_finite() {
                    return Err(KpiError::Config(format!(
                        "limit for {metric} must be finite, got {limit}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Exact lookup on the canonical metric id.
    pub fn rule_for(&self, metric_id: &str) -> Option<&MetricRule> {
        self.rules.get(metric_id)
    }

    pub fn with_threshold(mut self, decline_threshold: f64) -> Self {
        self.decline_threshold = decline_threshold;
        self
    }

    pub fn with_lookback(mut self, lookback_days: u32) -> Self {
        self.lookback_days = lookback_days;
        self
    }

    pub fn with_rule(mut self, metric_id: impl Into<String>, rule: MetricRule) -> Self {
        self.rules.insert(metric_id.into(), rule);
        self
    }

    pub fn without_rules(mut self) -> Self {
        self.rules.clear();
        self
    }
}

fn load_rules(path: &Path) -> KpiResult<BTreeMap<String, MetricRule>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        KpiError::Config(format!("cannot read rules file {}: {e}", path.display()))
    })?;
    let rules = serde_json::from_str(&raw).map_err(|e| {
        KpiError::Config(format!("invalid rules file {}: {e}", path.display()))
    })?;
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DetectionConfig::default();
        assert_eq!(config.decline_threshold, 2.0);
        assert_eq!(config.lookback_days, 7);
        assert_eq!(config.critical_metrics.len(), 5);

        let cdr = config.rule_for("CDR").unwrap();
        assert_eq!(cdr.direction, Direction::LowerBetter);
        assert_eq!(cdr.limit, Some(0.35));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rule_lookup_is_exact() {
        let config = DetectionConfig::default();
        assert!(config.rule_for("cdr").is_none());
        assert!(config.rule_for("CDR_GiamTru").is_none());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = DetectionConfig::from_lookup(lookup(&[
            ("KPI_DECLINE_THRESHOLD", "1.5"),
            ("KPI_LOOKBACK_DAYS", "14"),
            ("KPI_CRITICAL_METRICS", "CSSR, CDR ,"),
        ]))
        .unwrap();

        assert_eq!(config.decline_threshold, 1.5);
        assert_eq!(config.lookback_days, 14);
        assert_eq!(config.critical_metrics, vec!["CSSR", "CDR"]);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(matches!(
            DetectionConfig::from_lookup(lookup(&[("KPI_DECLINE_THRESHOLD", "abc")])),
            Err(KpiError::Config(_))
        ));
        assert!(matches!(
            DetectionConfig::from_lookup(lookup(&[("KPI_DECLINE_THRESHOLD", "0")])),
            Err(KpiError::Config(_))
        ));
        assert!(matches!(
            DetectionConfig::from_lookup(lookup(&[("KPI_LOOKBACK_DAYS", "0")])),
            Err(KpiError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_finite_threshold() {
        let config = DetectionConfig::default().with_threshold(f64::NAN);
        assert!(config.validate().is_err());
        let config = DetectionConfig::default().with_threshold(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_defaults_missing_fields() {
        let config: DetectionConfig = serde_json::from_str(
            r#"{"rules":{"CSSR":{"direction":"higher_better","limit":99.0}}}"#,
        )
        .unwrap();
        assert_eq!(config.decline_threshold, 2.0);
        assert_eq!(config.lookback_days, 7);
        assert_eq!(config.rule_for("CSSR").unwrap().limit, Some(99.0));
    }
}
