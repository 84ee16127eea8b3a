//! Decline Detection
//!
//! Compares each entity's latest measurement against the mean of its
//! samples on or before the lookback boundary, applies the metric's
//! direction and optional absolute limit, and classifies what fires.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use kpi_core::{
    DeclineEvent, DetectionConfig, Direction, KpiError, KpiResult, MetricRule, Sample, Severity,
    SkipReason,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::quality::DataQualityFilter;

/// Everything one metric's detection pass produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRun {
    pub metric_id: String,
    pub lookback_days: u32,
    pub decline_threshold: f64,
    /// Most severe (most negative change) first.
    pub events: Vec<DeclineEvent>,
    /// Entities that had at least one valid sample.
    pub evaluated: usize,
    pub skipped: Vec<(String, SkipReason)>,
    pub valid_samples: usize,
    pub rejected_buckets: usize,
}

impl DetectionRun {
    /// Distinguishes "ran on zero valid data" from "ran, found no decline".
    pub fn has_valid_data(&self) -> bool {
        self.valid_samples > 0
    }

    pub fn events_for_entity<'a>(
        &'a self,
        entity_id: &'a str,
    ) -> impl Iterator<Item = &'a DeclineEvent> + 'a {
        self.events.iter().filter(move |e| e.entity_id == entity_id)
    }
}

enum EntityOutcome {
    Fired(DeclineEvent),
    Quiet,
    Skipped(SkipReason),
}

pub struct DeclineDetector {
    config: DetectionConfig,
    filter: DataQualityFilter,
}

impl DeclineDetector {
    /// Create a detector; the configuration is validated up front.
    pub fn new(config: DetectionConfig) -> KpiResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            filter: DataQualityFilter::new(),
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Detect declines for one metric using the configured lookback.
    pub fn detect(&self, samples: &[Sample], metric_id: &str) -> KpiResult<DetectionRun> {
        self.detect_with_lookback(samples, metric_id, self.config.lookback_days)
    }

    pub fn detect_with_lookback(
        &self,
        samples: &[Sample],
        metric_id: &str,
        lookback_days: u32,
    ) -> KpiResult<DetectionRun> {
        if lookback_days < 1 {
            return Err(KpiError::Config("lookback_days must be at least 1".to_string()));
        }
        ensure_metric_present(samples, metric_id)?;
        Ok(self.run(samples, metric_id, lookback_days))
    }

    /// Detect several metrics in parallel. Every metric is checked against
    /// the data before any detection runs.
    pub fn detect_many(&self, samples: &[Sample], metrics: &[String]) -> KpiResult<Vec<DetectionRun>> {
        for metric in metrics {
            ensure_metric_present(samples, metric)?;
        }
        let lookback = self.config.lookback_days;
        Ok(metrics
            .par_iter()
            .map(|metric| self.run(samples, metric, lookback))
            .collect())
    }

    /// Run every configured critical metric present in the data.
    pub fn analyze_critical(&self, samples: &[Sample]) -> Vec<DetectionRun> {
        let present: Vec<String> = self
            .config
            .critical_metrics
            .iter()
            .filter(|metric| {
                let found = samples.iter().any(|s| &s.metric_id == *metric);
                if !found {
                    tracing::warn!("Metric {} not found in data, skipping", metric);
                }
                found
            })
            .cloned()
            .collect();

        let lookback = self.config.lookback_days;
        present
            .par_iter()
            .map(|metric| self.run(samples, metric, lookback))
            .collect()
    }

    fn run(&self, samples: &[Sample], metric_id: &str, lookback_days: u32) -> DetectionRun {
        let outcome = self
            .filter
            .filter(samples.iter().filter(|s| s.metric_id == metric_id));

        let mut by_entity: BTreeMap<&str, Vec<&Sample>> = BTreeMap::new();
        for &sample in &outcome.retained {
            by_entity.entry(sample.entity_id.as_str()).or_default().push(sample);
        }

        let rule = self.config.rule_for(metric_id);
        let mut events = Vec::new();
        let mut skipped = Vec::new();

        for (entity, entity_samples) in &mut by_entity {
            match self.evaluate_entity(entity, metric_id, entity_samples, rule, lookback_days) {
                EntityOutcome::Fired(event) => events.push(event),
                EntityOutcome::Quiet => {}
                EntityOutcome::Skipped(reason) => {
                    tracing::debug!("{} {}: skipped ({})", entity, metric_id, reason.as_str());
                    skipped.push((entity.to_string(), reason));
                }
            }
        }

        events.sort_by(|a, b| a.change_pct.total_cmp(&b.change_pct));

        tracing::info!(
            "{}: {} declines across {} entities ({} skipped, {} buckets rejected)",
            metric_id,
            events.len(),
            by_entity.len(),
            skipped.len(),
            outcome.rejected.len()
        );

        DetectionRun {
            metric_id: metric_id.to_string(),
            lookback_days,
            decline_threshold: self.config.decline_threshold,
            events,
            evaluated: by_entity.len(),
            skipped,
            valid_samples: outcome.retained.len(),
            rejected_buckets: outcome.rejected.len(),
        }
    }

    fn evaluate_entity(
        &self,
        entity: &str,
        metric_id: &str,
        samples: &mut [&Sample],
        rule: Option<&MetricRule>,
        lookback_days: u32,
    ) -> EntityOutcome {
        if samples.len() < 2 {
            return EntityOutcome::Skipped(SkipReason::InsufficientSamples);
        }

        // Stable: among same-day duplicates the first in input order wins.
        samples.sort_by_key(|s| s.date);

        let latest_date = samples[samples.len() - 1].date;
        let latest_value = samples
            .iter()
            .find(|s| s.date == latest_date)
            .and_then(|s| s.value)
            .unwrap_or(0.0);
        if !latest_value.is_finite() || latest_value <= 0.0 {
            return EntityOutcome::Skipped(SkipReason::NonPositiveLatest);
        }

        let Some(baseline_value) = baseline_mean(samples, latest_date, lookback_days) else {
            return EntityOutcome::Skipped(SkipReason::EmptyBaselineWindow);
        };
        if !baseline_value.is_finite() || baseline_value <= 0.0 {
            return EntityOutcome::Skipped(SkipReason::NonPositiveBaseline);
        }

        let raw_change_pct = (latest_value - baseline_value) / baseline_value * 100.0;
        let direction = rule.map(|r| r.direction).unwrap_or(Direction::HigherBetter);
        let is_worsening = direction.is_worsening(raw_change_pct);
        let limit = rule.and_then(|r| r.limit);
        let limit_breached = limit.map(|l| direction.breaches(latest_value, l));

        // With a limit both gates must pass; without one the trend gate alone decides.
        let fires = is_worsening
            && raw_change_pct.abs() >= self.config.decline_threshold
            && limit_breached.unwrap_or(true);
        if !fires {
            return EntityOutcome::Quiet;
        }

        let magnitude = -raw_change_pct.abs();
        EntityOutcome::Fired(DeclineEvent {
            entity_id: entity.to_string(),
            metric_id: metric_id.to_string(),
            observation_date: latest_date,
            latest_value,
            baseline_value,
            change_pct: magnitude,
            severity: Severity::from_magnitude(magnitude),
            limit_breached,
            direction,
            lookback_days,
            limit,
        })
    }
}

/// Mean of the samples dated on or before `latest - lookback` days.
fn baseline_mean(samples: &[&Sample], latest: NaiveDate, lookback_days: u32) -> Option<f64> {
    let compare_date = latest.checked_sub_days(Days::new(u64::from(lookback_days)))?;

    let (sum, n) = samples
        .iter()
        .filter(|s| s.date <= compare_date)
        .filter_map(|s| s.value)
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));

    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

fn ensure_metric_present(samples: &[Sample], metric_id: &str) -> KpiResult<()> {
    if samples.iter().any(|s| s.metric_id == metric_id) {
        Ok(())
    } else {
        Err(KpiError::UnknownMetric(metric_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    #[test]
    fn test_baseline_mean_window() {
        let owned: Vec<Sample> = [10.0, 20.0, 30.0, 40.0]
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new("A", "CSSR", day(i as u32 + 1), Some(*v)))
            .collect();
        let refs: Vec<&Sample> = owned.iter().collect();

        // boundary day 2 is inclusive
        assert_relative_eq!(baseline_mean(&refs, day(4), 2).unwrap(), 15.0);
        assert_relative_eq!(baseline_mean(&refs, day(4), 3).unwrap(), 10.0);
        assert!(baseline_mean(&refs, day(4), 4).is_none());
    }

    #[test]
    fn test_rejects_invalid_lookback_override() {
        let detector = DeclineDetector::new(DetectionConfig::default()).unwrap();
        let samples = vec![Sample::new("A", "CSSR", day(1), Some(1.0))];
        assert!(matches!(
            detector.detect_with_lookback(&samples, "CSSR", 0),
            Err(KpiError::Config(_))
        ));
    }

    #[test]
    fn test_new_validates_config() {
        let config = DetectionConfig::default().with_threshold(0.0);
        assert!(DeclineDetector::new(config).is_err());
    }

    #[test]
    fn test_unknown_metric() {
        let detector = DeclineDetector::new(DetectionConfig::default()).unwrap();
        let samples = vec![Sample::new("A", "CSSR", day(1), Some(1.0))];
        match detector.detect(&samples, "HOSR_4G_2024") {
            Err(KpiError::UnknownMetric(m)) => assert_eq!(m, "HOSR_4G_2024"),
            other => panic!("expected UnknownMetric, got {other:?}"),
        }
    }
}
