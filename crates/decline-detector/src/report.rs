//! Decline Reporting
//!
//! Flattens detection runs into report rows and picks out the entities
//! whose finer-grained data should be pulled for a closer look.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use kpi_core::Severity;
use serde::{Deserialize, Serialize};

use crate::detector::DetectionRun;

/// One line of the decline report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub metric_id: String,
    pub entity_id: String,
    /// `DD/MM/YYYY`
    pub date: String,
    pub latest_value: f64,
    pub baseline_value: f64,
    pub change_pct: f64,
    pub severity: Severity,
}

/// An (entity, metric) pair severe enough to warrant drilling down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillDownTarget {
    pub entity_id: String,
    pub metric_id: String,
    pub change_pct: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclineReport {
    pub rows: Vec<ReportRow>,
    pub drill_down: Vec<DrillDownTarget>,
    pub metrics_analyzed: Vec<String>,
    /// Metrics that ran on zero valid samples.
    pub metrics_without_data: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl DeclineReport {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Severe and critical (entity, metric) pairs, first occurrence kept.
    pub fn drill_down_targets(&self) -> &[DrillDownTarget] {
        &self.drill_down
    }

    pub fn severity_counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.severity).or_insert(0) += 1;
        }
        counts
    }

    pub fn rows_for_metric<'a>(&'a self, metric_id: &'a str) -> impl Iterator<Item = &'a ReportRow> + 'a {
        self.rows.iter().filter(move |r| r.metric_id == metric_id)
    }
}

/// Builder for decline reports
#[derive(Default)]
pub struct DeclineReportBuilder {
    runs: Vec<DetectionRun>,
}

impl DeclineReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run(mut self, run: DetectionRun) -> Self {
        self.runs.push(run);
        self
    }

    pub fn with_runs<I>(mut self, runs: I) -> Self
    where
        I: IntoIterator<Item = DetectionRun>,
    {
        self.runs.extend(runs);
        self
    }

    pub fn build(self) -> DeclineReport {
        let mut rows: Vec<ReportRow> = self
            .runs
            .iter()
            .flat_map(|run| run.events.iter())
            .map(|event| ReportRow {
                metric_id: event.metric_id.clone(),
                entity_id: event.entity_id.clone(),
                date: event.observation_date.format("%d/%m/%Y").to_string(),
                latest_value: round2(event.latest_value),
                baseline_value: round2(event.baseline_value),
                change_pct: round2(event.change_pct),
                severity: event.severity,
            })
            .collect();
        rows.sort_by(|a, b| a.change_pct.total_cmp(&b.change_pct));

        let mut seen = HashSet::new();
        let drill_down = self
            .runs
            .iter()
            .flat_map(|run| run.events.iter())
            .filter(|event| event.severity.needs_drill_down())
            .filter(|event| seen.insert((event.entity_id.clone(), event.metric_id.clone())))
            .map(|event| DrillDownTarget {
                entity_id: event.entity_id.clone(),
                metric_id: event.metric_id.clone(),
                change_pct: round2(event.change_pct),
                severity: event.severity,
            })
            .collect();

        DeclineReport {
            rows,
            drill_down,
            metrics_analyzed: self.runs.iter().map(|r| r.metric_id.clone()).collect(),
            metrics_without_data: self
                .runs
                .iter()
                .filter(|r| !r.has_valid_data())
                .map(|r| r.metric_id.clone())
                .collect(),
            generated_at: Utc::now(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
