//! KPI Decline Detection
//!
//! Gates out corrupt observation buckets, derives per-entity trends and
//! flags entities whose indicator has degraded against a recent baseline.

pub mod detector;
pub mod quality;
pub mod report;
pub mod series;
pub mod trend;


pub use detector::{DeclineDetector, DetectionRun};
pub use quality::{DataQualityFilter, QualityOutcome, RejectedBucket};
pub use report::{DeclineReport, DeclineReportBuilder, DrillDownTarget, ReportRow};
pub use series::{ChartData, ChartSeriesBuilder, EntitySeries, Highlight, HighlightRange, SeriesPoint};
pub use trend::{DailyMean, SeriesSummary, TrendAnalyzer, TrendPoint, TrendPoints, TrendTable};
