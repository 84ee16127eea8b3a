use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use decline_detector::Highlight;
use kpi_ingest::loader::parse_date;

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Every configured critical metric.
    All,
    Metric(String),
    Entity { metric: String, entity: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub file: PathBuf,
    pub mode: Mode,
    pub lookback: Option<u32>,
    pub threshold: Option<f64>,
    pub report_dir: Option<PathBuf>,
    pub chart_json: Option<PathBuf>,
    pub highlight: Option<Highlight>,
    pub no_alerts: bool,
}

pub fn usage() {
    eprintln!("Usage:");
    eprintln!("  kpi-monitor --file PATH --all                         Analyse all critical KPIs");
    eprintln!("  kpi-monitor --file PATH --metric NAME                 One KPI, every entity");
    eprintln!("  kpi-monitor --file PATH --metric NAME --entity NAME   One KPI, one entity");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --lookback N                   Baseline lookback in days (default: 7)");
    eprintln!("  --threshold T                  Minimum decline in percent (default: 2.0)");
    eprintln!("  --report-dir DIR               Write decline_report_YYYYMMDD.csv into DIR");
    eprintln!("  --chart-json PATH              Export chart series as JSON");
    eprintln!("  --highlight-days N             Highlight the last N days of the chart");
    eprintln!("  --highlight-start D --highlight-end D");
    eprintln!("                                 Highlight an explicit date range");
    eprintln!("  --no-alerts                    Do not dispatch alerts");
}

fn value<'a>(args: &'a [String], flag: &str) -> anyhow::Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        None => Ok(None),
        Some(i) => match args.get(i + 1) {
            Some(v) if !v.starts_with("--") => Ok(Some(v.as_str())),
            _ => bail!("{} needs a value", flag),
        },
    }
}

fn parsed<T>(args: &[String], flag: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value(args, flag)?
        .map(|v| v.parse::<T>().with_context(|| format!("invalid value for {}: {}", flag, v)))
        .transpose()
}

fn date(args: &[String], flag: &str) -> anyhow::Result<Option<NaiveDate>> {
    value(args, flag)?
        .map(|v| parse_date(v).with_context(|| format!("invalid date for {}: {}", flag, v)))
        .transpose()
}

/// Parse everything after the program name.
pub fn parse(args: &[String]) -> anyhow::Result<CliArgs> {
    let file = value(args, "--file")?
        .map(PathBuf::from)
        .context("--file is required")?;

    let metric = value(args, "--metric")?.map(str::to_string);
    let entity = value(args, "--entity")?.map(str::to_string);
    let all = args.iter().any(|a| a == "--all");

    let mode = match (all, metric, entity) {
        (true, None, None) => Mode::All,
        (true, _, _) => bail!("--all cannot be combined with --metric or --entity"),
        (false, Some(metric), None) => Mode::Metric(metric),
        (false, Some(metric), Some(entity)) => Mode::Entity { metric, entity },
        (false, None, Some(_)) => bail!("--entity needs --metric"),
        (false, None, None) => bail!("one of --all or --metric is required"),
    };

    let highlight_days: Option<u32> = parsed(args, "--highlight-days")?;
    let highlight_start = date(args, "--highlight-start")?;
    let highlight_end = date(args, "--highlight-end")?;
    let highlight = match (highlight_days, highlight_start, highlight_end) {
        (None, None, None) => None,
        (Some(days), None, None) => Some(Highlight::Trailing { days }),
        (None, Some(start), Some(end)) => Some(Highlight::Range { start, end }),
        (Some(_), _, _) => bail!("--highlight-days cannot be combined with --highlight-start/--highlight-end"),
        _ => bail!("--highlight-start and --highlight-end must be given together"),
    };

    Ok(CliArgs {
        file,
        mode,
        lookback: parsed(args, "--lookback")?,
        threshold: parsed(args, "--threshold")?,
        report_dir: value(args, "--report-dir")?.map(PathBuf::from),
        chart_json: value(args, "--chart-json")?.map(PathBuf::from),
        highlight,
        no_alerts: args.iter().any(|a| a == "--no-alerts"),
    })
}
