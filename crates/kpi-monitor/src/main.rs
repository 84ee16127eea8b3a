//! kpi-monitor: detect KPI declines in a daily CSV export.
//!
//! Usage:
//!   cargo run -p kpi-monitor -- --file data.csv --all --report-dir reports
//!   cargo run -p kpi-monitor -- --file data.csv --metric cssr
//!   cargo run -p kpi-monitor -- --file data.csv --metric cdr --entity "ha noi" --highlight-days 7

mod args;
mod output;

use args::{CliArgs, Mode};
use decline_detector::{
    ChartData, ChartSeriesBuilder, DeclineDetector, DeclineReportBuilder, DetectionRun,
    TrendAnalyzer,
};
use kpi_alerts::{Alert, AlertConfig, AlertService};
use kpi_core::DetectionConfig;
use kpi_ingest::{resolve, CsvLoader, LoaderOptions, Resolution, Snapshot};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const TREND_TAIL_DAYS: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = match args::parse(&argv) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!();
            args::usage();
            std::process::exit(1);
        }
    };

    let mut config = DetectionConfig::from_env()?;
    if let Some(lookback) = cli.lookback {
        config = config.with_lookback(lookback);
    }
    if let Some(threshold) = cli.threshold {
        config = config.with_threshold(threshold);
    }
    let detector = DeclineDetector::new(config)?;

    let snapshot = CsvLoader::new(LoaderOptions::default()).load_path(&cli.file)?;
    if let Some((first, last)) = snapshot.date_range() {
        tracing::info!(
            "Data covers {} to {} ({} entities)",
            first,
            last,
            snapshot.entities.len()
        );
    }

    let alerts = if cli.no_alerts {
        AlertService::new(&AlertConfig::disabled())
    } else {
        AlertService::new(&AlertConfig::from_env())
    };

    match cli.mode.clone() {
        Mode::All => run_all(&cli, &snapshot, &detector, &alerts).await,
        Mode::Metric(input) => {
            let metric = resolve_name("KPI", &input, &snapshot.metrics)?;
            run_metric(&cli, &snapshot, &detector, &alerts, &metric, None).await
        }
        Mode::Entity { metric, entity } => {
            let metric = resolve_name("KPI", &metric, &snapshot.metrics)?;
            let entity = resolve_name("entity", &entity, &snapshot.entities)?;
            run_metric(&cli, &snapshot, &detector, &alerts, &metric, Some(&entity)).await
        }
    }
}

fn init_logging() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kpi_monitor=info,decline_detector=info,kpi_ingest=info,kpi_alerts=info".into());

    if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolve a user-typed name against what the snapshot holds.
///
/// Ambiguous and unmatched input is an error listing the candidates.
fn resolve_name(kind: &str, input: &str, candidates: &[String]) -> anyhow::Result<String> {
    match resolve(input, candidates) {
        Resolution::Matched { kind: how, name } => {
            if name != input {
                tracing::info!("Using {} '{}' for '{}' ({} match)", kind, name, input, how.as_str());
            }
            Ok(name)
        }
        Resolution::Ambiguous { candidates, .. } => {
            anyhow::bail!(
                "{} '{}' is ambiguous, candidates: {}",
                kind,
                input,
                candidates.join(", ")
            )
        }
        Resolution::NoMatch => {
            anyhow::bail!(
                "no {} matches '{}', available: {}",
                kind,
                input,
                candidates.join(", ")
            )
        }
    }
}

async fn run_all(
    cli: &CliArgs,
    snapshot: &Snapshot,
    detector: &DeclineDetector,
    alerts: &AlertService,
) -> anyhow::Result<()> {
    let runs = detector.analyze_critical(&snapshot.samples);
    if runs.is_empty() {
        anyhow::bail!("none of the critical KPIs are present in {}", cli.file.display());
    }

    if let Some(path) = &cli.chart_json {
        let charts: Vec<ChartData> = runs
            .iter()
            .map(|run| chart_for(cli, snapshot, detector, &run.metric_id, None))
            .collect();
        output::write_json(&charts, path)?;
    }

    finish(cli, runs, alerts).await
}

async fn run_metric(
    cli: &CliArgs,
    snapshot: &Snapshot,
    detector: &DeclineDetector,
    alerts: &AlertService,
    metric: &str,
    entity: Option<&str>,
) -> anyhow::Result<()> {
    let mut run = detector.detect(&snapshot.samples, metric)?;

    if let Some(entity) = entity {
        run.events.retain(|e| e.entity_id == entity);

        let table = TrendAnalyzer::default().analyze(&snapshot.samples, metric, Some(entity));
        output::print_trend(&table, entity, TREND_TAIL_DAYS);
        if let Some((_, reason)) = run.skipped.iter().find(|(e, _)| e == entity) {
            println!("{} was not evaluated: {}", entity, reason.as_str());
        }
        println!();
    }

    if let Some(path) = &cli.chart_json {
        let chart = chart_for(cli, snapshot, detector, metric, entity);
        output::write_json(&chart, path)?;
    }

    finish(cli, vec![run], alerts).await
}

fn chart_for(
    cli: &CliArgs,
    snapshot: &Snapshot,
    detector: &DeclineDetector,
    metric: &str,
    entity: Option<&str>,
) -> ChartData {
    let mut builder = ChartSeriesBuilder::new(metric);
    if let Some(entity) = entity {
        builder = builder.with_entities([entity]);
    }
    if let Some(highlight) = cli.highlight {
        builder = builder.with_highlight(highlight);
    }
    builder.build(&snapshot.samples, detector.config())
}

async fn finish(cli: &CliArgs, runs: Vec<DetectionRun>, alerts: &AlertService) -> anyhow::Result<()> {
    let events: Vec<_> = runs.iter().flat_map(|r| r.events.iter().cloned()).collect();
    let report = DeclineReportBuilder::new().with_runs(runs).build();

    output::print_report(&report);

    if let Some(dir) = &cli.report_dir {
        let path = output::write_report_csv(&report, dir, chrono::Local::now().naive_local())?;
        println!("\nReport written to {}", path.display());
    }

    alerts.send_decline_alerts(&events).await;
    if matches!(cli.mode, Mode::All) {
        alerts.send_alert_async(&Alert::run_summary(&report)).await;
    }

    Ok(())
}
