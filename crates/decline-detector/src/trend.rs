//! Trend Analysis
//!
//! Per-entity daily means, day-over-day change and trailing moving
//! averages. These are auxiliary signals for reporting and charts; the
//! decline detector does not depend on them.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use kpi_core::{Sample, TrendLabel};
use serde::{Deserialize, Serialize};

use crate::quality::DataQualityFilter;

pub const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 7;

/// Mean of one entity's valid samples on one date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyMean {
    pub date: NaiveDate,
    pub value: f64,
    pub samples: usize,
}

/// One row of an entity's trend sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub mean_value: f64,
    /// `None` for the first observation of a series.
    pub day_change_pct: Option<f64>,
    pub moving_avg: f64,
    pub label: TrendLabel,
}

/// Descriptive statistics over an entity's daily means.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub first: f64,
    pub latest: f64,
    pub total_change_pct: f64,
}

pub struct TrendAnalyzer {
    window: usize,
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_MOVING_AVERAGE_WINDOW)
    }
}

impl TrendAnalyzer {
    /// Create an analyzer with a trailing moving-average window (min 1).
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    /// Collapse `metric_id` samples into per-entity ascending daily means.
    ///
    /// Raw input is fine: buckets that fail the quality gate are dropped
    /// whole before any mean is taken.
    pub fn analyze(&self, samples: &[Sample], metric_id: &str, entity: Option<&str>) -> TrendTable {
        let selected = samples.iter().filter(|s| {
            s.metric_id == metric_id && entity.map_or(true, |e| e == s.entity_id)
        });
        let outcome = DataQualityFilter::new().filter(selected);

        let mut sums: BTreeMap<&str, BTreeMap<NaiveDate, (f64, usize)>> = BTreeMap::new();

        for sample in &outcome.retained {
            let Some(value) = sample.valid_value() else {
                continue;
            };
            let slot = sums
                .entry(sample.entity_id.as_str())
                .or_default()
                .entry(sample.date)
                .or_insert((0.0, 0));
            slot.0 += value;
            slot.1 += 1;
        }

        let series = sums
            .into_iter()
            .map(|(entity, days)| {
                let means = days
                    .into_iter()
                    .map(|(date, (sum, n))| DailyMean {
                        date,
                        value: sum / n as f64,
                        samples: n,
                    })
                    .collect();
                (entity.to_string(), means)
            })
            .collect();

        TrendTable {
            metric_id: metric_id.to_string(),
            window: self.window,
            series,
        }
    }
}

/// Per-entity daily series for one metric. Trend rows are derived lazily.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendTable {
    pub metric_id: String,
    window: usize,
    series: BTreeMap<String, Vec<DailyMean>>,
}

impl TrendTable {
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn daily_means(&self, entity: &str) -> Option<&[DailyMean]> {
        self.series.get(entity).map(Vec::as_slice)
    }

    /// Restartable trend sequence for one entity; clone it to replay.
    pub fn points(&self, entity: &str) -> Option<TrendPoints<'_>> {
        self.series.get(entity).map(|days| TrendPoints {
            days,
            window: self.window,
            index: 0,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TrendPoints<'_>)> {
        self.series.iter().map(move |(entity, days)| {
            (
                entity.as_str(),
                TrendPoints {
                    days,
                    window: self.window,
                    index: 0,
                },
            )
        })
    }

    pub fn summary(&self, entity: &str) -> Option<SeriesSummary> {
        let days = self.series.get(entity)?;
        let first = days.first()?.value;
        let latest = days.last()?.value;
        let n = days.len() as f64;

        let min = days.iter().map(|d| d.value).fold(f64::INFINITY, f64::min);
        let max = days.iter().map(|d| d.value).fold(f64::NEG_INFINITY, f64::max);
        let mean = days.iter().map(|d| d.value).sum::<f64>() / n;

        Some(SeriesSummary {
            count: days.len(),
            min,
            max,
            mean,
            first,
            latest,
            total_change_pct: (latest - first) / first * 100.0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TrendPoints<'a> {
    days: &'a [DailyMean],
    window: usize,
    index: usize,
}

impl Iterator for TrendPoints<'_> {
    type Item = TrendPoint;

    fn next(&mut self) -> Option<TrendPoint> {
        let i = self.index;
        let current = self.days.get(i)?;
        self.index += 1;

        let day_change_pct = i
            .checked_sub(1)
            .map(|p| self.days[p].value)
            .map(|prev| (current.value - prev) / prev * 100.0);

        let start = (i + 1).saturating_sub(self.window);
        let trailing = &self.days[start..=i];
        let moving_avg = trailing.iter().map(|d| d.value).sum::<f64>() / trailing.len() as f64;

        Some(TrendPoint {
            date: current.date,
            mean_value: current.value,
            day_change_pct,
            moving_avg,
            label: TrendLabel::from_change(day_change_pct),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.days.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TrendPoints<'_> {}
