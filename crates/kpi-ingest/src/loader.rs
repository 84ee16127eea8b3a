//! CSV Loader
//!
//! Reads the wide daily export (one row per entity per day, one column per
//! metric) and flattens it into long-form samples.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use kpi_core::{KpiError, KpiResult, Sample};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENTITY_COLUMN: &str = "CTKD7";
pub const DEFAULT_DATE_COLUMN: &str = "Ngay7";

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderOptions {
    pub entity_column: String,
    pub date_column: String,
    /// Restrict loading to these columns; every other column is a metric
    /// candidate when unset.
    pub metric_columns: Option<Vec<String>>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            entity_column: DEFAULT_ENTITY_COLUMN.to_string(),
            date_column: DEFAULT_DATE_COLUMN.to_string(),
            metric_columns: None,
        }
    }
}

/// Long-form samples plus the metric and entity names found in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub samples: Vec<Sample>,
    /// Columns holding at least one numeric cell, in file order.
    pub metrics: Vec<String>,
    /// Sorted, distinct.
    pub entities: Vec<String>,
}

impl Snapshot {
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.samples.iter().map(|s| s.date).min()?;
        let max = self.samples.iter().map(|s| s.date).max()?;
        Some((min, max))
    }

    pub fn has_metric(&self, metric_id: &str) -> bool {
        self.metrics.iter().any(|m| m == metric_id)
    }
}

pub struct CsvLoader {
    options: LoaderOptions,
}

impl Default for CsvLoader {
    fn default() -> Self {
        Self::new(LoaderOptions::default())
    }
}

impl CsvLoader {
    pub fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    pub fn load_path(&self, path: &Path) -> KpiResult<Snapshot> {
        tracing::info!("Loading KPI export from {}", path.display());
        let file = File::open(path)?;
        self.load_reader(file)
    }

    pub fn load_str(&self, data: &str) -> KpiResult<Snapshot> {
        self.load_reader(data.as_bytes())
    }

    pub fn load_reader<R: Read>(&self, reader: R) -> KpiResult<Snapshot> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let entity_idx = column_index(&headers, &self.options.entity_column)?;
        let date_idx = column_index(&headers, &self.options.date_column)?;

        let metric_cols: Vec<(usize, &str)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != entity_idx && *i != date_idx)
            .filter(|(_, name)| {
                self.options
                    .metric_columns
                    .as_ref()
                    .map_or(true, |wanted| wanted.iter().any(|w| w == *name))
            })
            .map(|(i, name)| (i, name.as_str()))
            .collect();

        let mut samples = Vec::new();
        let mut entities = BTreeSet::new();
        let mut numeric = vec![false; metric_cols.len()];
        let mut dropped_rows = 0usize;

        for (index, result) in reader.records().enumerate() {
            let record = result.map_err(csv_error)?;
            let row = record
                .position()
                .map(|p| p.line())
                .unwrap_or(index as u64 + 2);

            let entity = record.get(entity_idx).unwrap_or("").trim();
            if entity.is_empty() {
                dropped_rows += 1;
                continue;
            }

            let raw_date = record.get(date_idx).unwrap_or("").trim();
            let date = parse_date(raw_date).ok_or_else(|| {
                KpiError::Data(format!("row {}: unparseable date '{}'", row, raw_date))
            })?;

            entities.insert(entity.to_string());
            for (slot, &(col, metric)) in metric_cols.iter().enumerate() {
                let value = record.get(col).and_then(parse_number);
                numeric[slot] |= value.is_some();
                samples.push(Sample::new(entity, metric, date, value));
            }
        }

        let metrics: Vec<String> = metric_cols
            .iter()
            .zip(&numeric)
            .filter(|(_, has_number)| **has_number)
            .map(|((_, name), _)| name.to_string())
            .collect();

        // text-only columns never become samples
        samples.retain(|s| metrics.contains(&s.metric_id));

        if dropped_rows > 0 {
            tracing::warn!("Dropped {} rows with no entity", dropped_rows);
        }
        tracing::info!(
            "Loaded {} samples: {} metrics, {} entities",
            samples.len(),
            metrics.len(),
            entities.len()
        );

        Ok(Snapshot {
            samples,
            metrics,
            entities: entities.into_iter().collect(),
        })
    }
}

fn column_index(headers: &[String], name: &str) -> KpiResult<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| KpiError::Data(format!("missing required column '{}'", name)))
}

fn csv_error(err: csv::Error) -> KpiError {
    KpiError::Data(format!("CSV error: {}", err))
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Strips quotes and thousands separators; blanks and junk become `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != '"' && *c != ',').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}
