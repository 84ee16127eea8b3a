use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One reported observation of a metric for an entity on a date.
///
/// Duplicates for the same (entity, metric, date) are allowed; a missing
/// or unparseable cell is carried as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub entity_id: String,
    pub metric_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub value: Option<f64>,
}

impl Sample {
    pub fn new(
        entity_id: impl Into<String>,
        metric_id: impl Into<String>,
        date: NaiveDate,
        value: Option<f64>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            metric_id: metric_id.into(),
            date,
            value,
        }
    }

    /// The value if it is usable in a statistic: present, finite and > 0.
    pub fn valid_value(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite() && *v > 0.0)
    }
}

/// Which way a metric moves when it gets worse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// A decrease is worsening (success rates, throughput).
    #[default]
    HigherBetter,
    /// An increase is worsening (drop rates, failure ratios).
    LowerBetter,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::HigherBetter => "higher_better",
            Direction::LowerBetter => "lower_better",
        }
    }

    /// Whether a signed relative change moves the metric the wrong way.
    pub fn is_worsening(&self, raw_change_pct: f64) -> bool {
        match self {
            Direction::HigherBetter => raw_change_pct < 0.0,
            Direction::LowerBetter => raw_change_pct > 0.0,
        }
    }

    /// Whether `value` is on the bad side of `limit`.
    pub fn breaches(&self, value: f64, limit: f64) -> bool {
        match self {
            Direction::HigherBetter => value < limit,
            Direction::LowerBetter => value > limit,
        }
    }
}

/// Static per-metric configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricRule {
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
}

impl MetricRule {
    pub fn higher_better(limit: Option<f64>) -> Self {
        Self {
            direction: Direction::HigherBetter,
            limit,
        }
    }

    pub fn lower_better(limit: Option<f64>) -> Self {
        Self {
            direction: Direction::LowerBetter,
            limit,
        }
    }
}

/// Severity tier of a decline magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Warning,
    Severe,
    Critical,
}

impl Severity {
    /// Classify a canonical decline magnitude (always <= 0).
    ///
    /// The cutoffs are percent-of-baseline and shared by every metric.
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude < -10.0 {
            Severity::Critical
        } else if magnitude < -5.0 {
            Severity::Severe
        } else if magnitude < -2.0 {
            Severity::Warning
        } else {
            Severity::Minor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Warning => "warning",
            Severity::Severe => "severe",
            Severity::Critical => "critical",
        }
    }

    /// Severe and critical declines warrant fetching finer-grained data.
    pub fn needs_drill_down(&self) -> bool {
        matches!(self, Severity::Severe | Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A surfaced decline for one (entity, metric) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclineEvent {
    pub entity_id: String,
    pub metric_id: String,
    pub observation_date: NaiveDate,
    pub latest_value: f64,
    pub baseline_value: f64,
    /// Direction-normalized decline magnitude, always <= 0.
    pub change_pct: f64,
    pub severity: Severity,
    /// `None` when no limit is configured for the metric.
    pub limit_breached: Option<bool>,
    pub direction: Direction,
    pub lookback_days: u32,
    pub limit: Option<f64>,
}

/// Day-over-day trend label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendLabel {
    /// Changes beyond +/-0.5% count as movement; an undefined change is stable.
    pub fn from_change(day_change_pct: Option<f64>) -> Self {
        match day_change_pct {
            Some(c) if c > 0.5 => TrendLabel::Increasing,
            Some(c) if c < -0.5 => TrendLabel::Decreasing,
            _ => TrendLabel::Stable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLabel::Increasing => "increasing",
            TrendLabel::Decreasing => "decreasing",
            TrendLabel::Stable => "stable",
        }
    }
}

/// Why an entity was left out of a detection run. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Fewer than two valid samples.
    InsufficientSamples,
    NonPositiveLatest,
    /// Nothing on or before the lookback boundary.
    EmptyBaselineWindow,
    NonPositiveBaseline,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InsufficientSamples => "insufficient_samples",
            SkipReason::NonPositiveLatest => "non_positive_latest",
            SkipReason::EmptyBaselineWindow => "empty_baseline_window",
            SkipReason::NonPositiveBaseline => "non_positive_baseline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_cutoffs() {
        assert_eq!(Severity::from_magnitude(-45.0), Severity::Critical);
        assert_eq!(Severity::from_magnitude(-10.01), Severity::Critical);
        assert_eq!(Severity::from_magnitude(-10.0), Severity::Severe);
        assert_eq!(Severity::from_magnitude(-5.01), Severity::Severe);
        assert_eq!(Severity::from_magnitude(-5.0), Severity::Warning);
        assert_eq!(Severity::from_magnitude(-2.01), Severity::Warning);
        assert_eq!(Severity::from_magnitude(-2.0), Severity::Minor);
        assert_eq!(Severity::from_magnitude(-0.1), Severity::Minor);
    }

    #[test]
    fn test_direction_worsening() {
        assert!(Direction::HigherBetter.is_worsening(-3.0));
        assert!(!Direction::HigherBetter.is_worsening(3.0));
        assert!(Direction::LowerBetter.is_worsening(3.0));
        assert!(!Direction::LowerBetter.is_worsening(-3.0));
        assert!(!Direction::LowerBetter.is_worsening(0.0));
        assert!(!Direction::HigherBetter.is_worsening(0.0));
    }

    #[test]
    fn test_limit_breach() {
        assert!(Direction::LowerBetter.breaches(0.40, 0.35));
        assert!(!Direction::LowerBetter.breaches(0.32, 0.35));
        assert!(Direction::HigherBetter.breaches(98.0, 99.0));
        assert!(!Direction::HigherBetter.breaches(99.0, 99.0));
    }

    #[test]
    fn test_trend_label() {
        assert_eq!(TrendLabel::from_change(Some(0.6)), TrendLabel::Increasing);
        assert_eq!(TrendLabel::from_change(Some(0.5)), TrendLabel::Stable);
        assert_eq!(TrendLabel::from_change(Some(-0.51)), TrendLabel::Decreasing);
        assert_eq!(TrendLabel::from_change(None), TrendLabel::Stable);
    }

    #[test]
    fn test_valid_value() {
        let d = NaiveDate::from_ymd_opt(2025, 10, 16).unwrap();
        assert_eq!(Sample::new("A", "CSSR", d, Some(99.1)).valid_value(), Some(99.1));
        assert_eq!(Sample::new("A", "CSSR", d, Some(0.0)).valid_value(), None);
        assert_eq!(Sample::new("A", "CSSR", d, Some(-1.0)).valid_value(), None);
        assert_eq!(Sample::new("A", "CSSR", d, Some(f64::NAN)).valid_value(), None);
        assert_eq!(Sample::new("A", "CSSR", d, None).valid_value(), None);
    }

    #[test]
    fn test_rule_deserializes_snake_case() {
        let rule: MetricRule =
            serde_json::from_str(r#"{"direction":"lower_better","limit":0.35}"#).unwrap();
        assert_eq!(rule.direction, Direction::LowerBetter);
        assert_eq!(rule.limit, Some(0.35));

        let rule: MetricRule = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(rule.direction, Direction::HigherBetter);
        assert_eq!(rule.limit, None);
    }
}
