//! Chart Series Preparation
//!
//! Builds the filtered per-entity time series a chart renderer draws,
//! together with the highlighted sub-range and the metric's limit line.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Days, NaiveDate};
use kpi_core::{DetectionConfig, Direction, Sample};
use serde::{Deserialize, Serialize};

use crate::quality::DataQualityFilter;

/// Which part of the chart to highlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Highlight {
    /// Explicit dates; swapped if given in reverse.
    Range { start: NaiveDate, end: NaiveDate },
    /// The last `days` days ending at the latest date in the chart.
    Trailing { days: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySeries {
    pub entity_id: String,
    pub points: Vec<SeriesPoint>,
}

/// Everything a renderer needs for one metric's trend chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub metric_id: String,
    pub series: Vec<EntitySeries>,
    pub highlight: Option<HighlightRange>,
    pub limit_line: Option<f64>,
    pub lower_better: Option<bool>,
    pub rejected_buckets: usize,
}

impl ChartData {
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.series
            .iter()
            .filter_map(|s| s.points.last().map(|p| p.date))
            .max()
    }
}

/// Builder for chart series
pub struct ChartSeriesBuilder {
    metric_id: String,
    entities: Option<BTreeSet<String>>,
    date_range: Option<(NaiveDate, NaiveDate)>,
    exclude_dates: BTreeSet<NaiveDate>,
    highlight: Option<Highlight>,
}

impl ChartSeriesBuilder {
    pub fn new(metric_id: &str) -> Self {
        Self {
            metric_id: metric_id.to_string(),
            entities: None,
            date_range: None,
            exclude_dates: BTreeSet::new(),
            highlight: None,
        }
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = Some(entities.into_iter().map(Into::into).collect());
        self
    }

    /// Only keep samples dated within `[start, end]`.
    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_range = Some((start, end));
        self
    }

    /// Manually drop whole days, e.g. ones known to be bad upstream.
    pub fn excluding_dates<I>(mut self, dates: I) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        self.exclude_dates.extend(dates);
        self
    }

    pub fn with_highlight(mut self, highlight: Highlight) -> Self {
        self.highlight = Some(highlight);
        self
    }

    pub fn build(self, samples: &[Sample], config: &DetectionConfig) -> ChartData {
        let candidates = samples.iter().filter(|s| {
            s.metric_id == self.metric_id
                && self
                    .date_range
                    .map_or(true, |(start, end)| s.date >= start && s.date <= end)
                && !self.exclude_dates.contains(&s.date)
                && self
                    .entities
                    .as_ref()
                    .map_or(true, |set| set.contains(&s.entity_id))
        });

        let outcome = DataQualityFilter::new().filter(candidates);

        let mut buckets: BTreeMap<&str, BTreeMap<NaiveDate, (f64, usize)>> = BTreeMap::new();
        for sample in &outcome.retained {
            if let Some(value) = sample.valid_value() {
                let slot = buckets
                    .entry(sample.entity_id.as_str())
                    .or_default()
                    .entry(sample.date)
                    .or_insert((0.0, 0));
                slot.0 += value;
                slot.1 += 1;
            }
        }

        let series: Vec<EntitySeries> = buckets
            .into_iter()
            .map(|(entity, days)| EntitySeries {
                entity_id: entity.to_string(),
                points: days
                    .into_iter()
                    .map(|(date, (sum, n))| SeriesPoint {
                        date,
                        value: sum / n as f64,
                    })
                    .collect(),
            })
            .collect();

        let rule = config.rule_for(&self.metric_id);
        let mut chart = ChartData {
            metric_id: self.metric_id,
            series,
            highlight: None,
            limit_line: rule.and_then(|r| r.limit),
            lower_better: rule.map(|r| r.direction == Direction::LowerBetter),
            rejected_buckets: outcome.rejected.len(),
        };
        chart.highlight = self
            .highlight
            .and_then(|h| resolve_highlight(h, chart.latest_date()));

        tracing::debug!(
            "Chart for {}: {} series, {} buckets rejected",
            chart.metric_id,
            chart.series.len(),
            chart.rejected_buckets
        );
        chart
    }
}

fn resolve_highlight(highlight: Highlight, latest: Option<NaiveDate>) -> Option<HighlightRange> {
    match highlight {
        Highlight::Range { start, end } if start <= end => Some(HighlightRange { start, end }),
        Highlight::Range { start, end } => Some(HighlightRange {
            start: end,
            end: start,
        }),
        Highlight::Trailing { days: 0 } => None,
        Highlight::Trailing { days } => {
            let end = latest?;
            let start = end.checked_sub_days(Days::new(u64::from(days - 1)))?;
            Some(HighlightRange { start, end })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use kpi_core::MetricRule;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    fn sample(entity: &str, d: u32, value: f64) -> Sample {
        Sample::new(entity, "CDR", day(d), Some(value))
    }

    fn fixture() -> Vec<Sample> {
        vec![
            sample("A", 1, 0.30),
            sample("A", 2, 0.32),
            sample("A", 2, 0.34),
            sample("A", 3, 0.0),
            sample("A", 3, 0.40),
            sample("A", 4, 0.36),
            sample("B", 1, 0.20),
            sample("B", 4, 0.25),
        ]
    }

    #[test]
    fn test_series_are_filtered_and_averaged() {
        let chart = ChartSeriesBuilder::new("CDR").build(&fixture(), &DetectionConfig::default());

        assert_eq!(chart.series.len(), 2);
        let a = &chart.series[0];
        assert_eq!(a.entity_id, "A");
        let dates: Vec<NaiveDate> = a.points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day(1), day(2), day(4)]);
        assert_relative_eq!(a.points[1].value, 0.33, epsilon = 1e-12);
        assert_eq!(chart.rejected_buckets, 1);
        assert_eq!(chart.limit_line, Some(0.35));
        assert_eq!(chart.lower_better, Some(true));
    }

    #[test]
    fn test_entity_date_range_and_exclusions() {
        let chart = ChartSeriesBuilder::new("CDR")
            .with_entities(["A"])
            .with_date_range(day(2), day(4))
            .excluding_dates([day(4)])
            .build(&fixture(), &DetectionConfig::default());

        assert_eq!(chart.series.len(), 1);
        assert_eq!(chart.series[0].points.len(), 1);
        assert_eq!(chart.series[0].points[0].date, day(2));
    }

    #[test]
    fn test_trailing_highlight_ends_at_latest_date() {
        let chart = ChartSeriesBuilder::new("CDR")
            .with_highlight(Highlight::Trailing { days: 3 })
            .build(&fixture(), &DetectionConfig::default());

        assert_eq!(
            chart.highlight,
            Some(HighlightRange {
                start: day(2),
                end: day(4)
            })
        );
    }

    #[test]
    fn test_explicit_highlight_is_normalized() {
        let chart = ChartSeriesBuilder::new("CDR")
            .with_highlight(Highlight::Range {
                start: day(9),
                end: day(5),
            })
            .build(&fixture(), &DetectionConfig::default());

        assert_eq!(
            chart.highlight,
            Some(HighlightRange {
                start: day(5),
                end: day(9)
            })
        );
    }

    #[test]
    fn test_no_highlight_without_data_or_days() {
        let empty: Vec<Sample> = Vec::new();
        let chart = ChartSeriesBuilder::new("CDR")
            .with_highlight(Highlight::Trailing { days: 7 })
            .build(&empty, &DetectionConfig::default());
        assert!(chart.highlight.is_none());

        let chart = ChartSeriesBuilder::new("CDR")
            .with_highlight(Highlight::Trailing { days: 0 })
            .build(&fixture(), &DetectionConfig::default());
        assert!(chart.highlight.is_none());
    }

    #[test]
    fn test_metric_without_rule_has_no_limit_line() {
        let config = DetectionConfig::default().with_rule("CSSR", MetricRule::higher_better(None));
        let samples = vec![Sample::new("A", "CSSR", day(1), Some(99.0))];
        let chart = ChartSeriesBuilder::new("CSSR").build(&samples, &config);

        assert_eq!(chart.limit_line, None);
        assert_eq!(chart.lower_better, Some(false));

        let chart = ChartSeriesBuilder::new("MTCL_2024").build(&samples, &config);
        assert!(chart.series.is_empty());
        assert_eq!(chart.lower_better, None);
    }
}
