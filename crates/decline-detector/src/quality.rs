//! Data Quality Gating
//!
//! Drops whole (metric, entity, date) buckets that contain any null,
//! non-finite, zero or negative value. A bucket with one zero among
//! otherwise plausible values is dropped as a whole.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use kpi_core::Sample;
use serde::{Deserialize, Serialize};

/// A bucket removed by the filter, with what made it invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedBucket {
    pub metric_id: String,
    pub entity_id: String,
    pub date: NaiveDate,
    pub samples: usize,
    pub nulls: usize,
    pub zeros: usize,
    pub negatives: usize,
}

impl RejectedBucket {
    /// Zeros mixed with positive values: the partial-outage pattern.
    pub fn is_partial_outage(&self) -> bool {
        self.zeros > 0 && self.samples > self.nulls + self.zeros + self.negatives
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BucketTally {
    samples: usize,
    nulls: usize,
    zeros: usize,
    negatives: usize,
}

impl BucketTally {
    fn record(&mut self, value: Option<f64>) {
        self.samples += 1;
        match value {
            Some(v) if !v.is_finite() => self.nulls += 1,
            Some(v) if v == 0.0 => self.zeros += 1,
            Some(v) if v < 0.0 => self.negatives += 1,
            Some(_) => {}
            None => self.nulls += 1,
        }
    }

    fn is_valid(&self) -> bool {
        self.nulls + self.zeros + self.negatives == 0
    }
}

type BucketKey<'a> = (&'a str, &'a str, NaiveDate);

fn bucket_key(sample: &Sample) -> BucketKey<'_> {
    (&sample.metric_id, &sample.entity_id, sample.date)
}

/// Result of a filtering pass. Retained samples keep their input order.
#[derive(Debug, Clone)]
pub struct QualityOutcome<'a> {
    pub retained: Vec<&'a Sample>,
    pub rejected: Vec<RejectedBucket>,
    pub bucket_count: usize,
}

impl QualityOutcome<'_> {
    /// True when no bucket survived, including the empty-input case.
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    pub fn to_owned_samples(&self) -> Vec<Sample> {
        self.retained.iter().map(|s| (*s).clone()).collect()
    }
}

/// Removes corrupt observation buckets before any statistic is computed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataQualityFilter;

impl DataQualityFilter {
    pub fn new() -> Self {
        Self
    }

    /// Single grouping pass; validity is a per-bucket property so no
    /// fixed-point iteration is needed.
    pub fn filter<'a, I>(&self, samples: I) -> QualityOutcome<'a>
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let samples: Vec<&'a Sample> = samples.into_iter().collect();

        let mut tallies: BTreeMap<BucketKey<'a>, BucketTally> = BTreeMap::new();
        for &sample in &samples {
            tallies.entry(bucket_key(sample)).or_default().record(sample.value);
        }

        let retained: Vec<&'a Sample> = samples
            .into_iter()
            .filter(|s| {
                tallies
                    .get(&bucket_key(*s))
                    .map(BucketTally::is_valid)
                    .unwrap_or(false)
            })
            .collect();

        let rejected: Vec<RejectedBucket> = tallies
            .iter()
            .filter(|(_, tally)| !tally.is_valid())
            .map(|((metric, entity, date), tally)| RejectedBucket {
                metric_id: metric.to_string(),
                entity_id: entity.to_string(),
                date: *date,
                samples: tally.samples,
                nulls: tally.nulls,
                zeros: tally.zeros,
                negatives: tally.negatives,
            })
            .collect();

        for bucket in rejected.iter().filter(|b| b.is_partial_outage()) {
            tracing::debug!(
                "Dropping {} {} on {}: {} zero values among {} samples",
                bucket.entity_id,
                bucket.metric_id,
                bucket.date,
                bucket.zeros,
                bucket.samples
            );
        }

        if !rejected.is_empty() {
            tracing::warn!(
                "Dropped {} of {} buckets containing null, zero or negative values",
                rejected.len(),
                tallies.len()
            );
        }

        QualityOutcome {
            retained,
            rejected,
            bucket_count: tallies.len(),
        }
    }
}
