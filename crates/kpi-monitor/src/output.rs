use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDateTime;
use decline_detector::{DeclineReport, TrendTable};
use serde::Serialize;

/// Write the report as `DIR/decline_report_YYYYMMDD.csv`.
///
/// If that file is held open elsewhere (spreadsheet apps lock it), the report
/// goes to `DIR/YYYYMMDD/decline_report_YYYYMMDD_HHMMSS.csv` instead.
pub fn write_report_csv(report: &DeclineReport, dir: &Path, now: NaiveDateTime) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create report directory {}", dir.display()))?;

    let day = now.format("%Y%m%d").to_string();
    let primary = dir.join(format!("decline_report_{}.csv", day));

    let (path, file) = match File::create(&primary) {
        Ok(file) => (primary, file),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            let fallback_dir = dir.join(&day);
            std::fs::create_dir_all(&fallback_dir)?;
            let fallback = fallback_dir.join(format!(
                "decline_report_{}_{}.csv",
                day,
                now.format("%H%M%S")
            ));
            tracing::warn!(
                "{} is locked, writing report to {}",
                primary.display(),
                fallback.display()
            );
            let file = File::create(&fallback)
                .with_context(|| format!("cannot write {}", fallback.display()))?;
            (fallback, file)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("cannot write {}", primary.display()));
        }
    };

    let mut writer = csv::Writer::from_writer(file);
    for row in &report.rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    tracing::info!("Report saved: {} ({} rows)", path.display(), report.rows.len());
    Ok(path)
}

pub fn write_json<T: Serialize>(value: &T, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("cannot write {}", path.display()))?;
    tracing::info!("Chart data saved: {}", path.display());
    Ok(())
}

pub fn print_report(report: &DeclineReport) {
    if report.is_empty() {
        println!("No declines detected.");
    } else {
        println!(
            "{:<12} {:<24} {:<10} {:>10} {:>10} {:>9}  {}",
            "KPI", "Entity", "Date", "Latest", "Baseline", "Change%", "Severity"
        );
        for row in &report.rows {
            println!(
                "{:<12} {:<24} {:<10} {:>10.2} {:>10.2} {:>9.2}  {}",
                row.metric_id,
                row.entity_id,
                row.date,
                row.latest_value,
                row.baseline_value,
                row.change_pct,
                row.severity
            );
        }
    }

    let counts = report.severity_counts();
    if !counts.is_empty() {
        let parts: Vec<String> = counts
            .iter()
            .rev()
            .map(|(severity, n)| format!("{} {}", n, severity))
            .collect();
        println!("\nBy severity: {}", parts.join(", "));
    }

    if !report.drill_down.is_empty() {
        println!("\nDrill down ({}):", report.drill_down.len());
        for target in &report.drill_down {
            println!(
                "  {} / {}: {:.2}% ({})",
                target.entity_id, target.metric_id, target.change_pct, target.severity
            );
        }
    }

    for metric in &report.metrics_without_data {
        println!("Warning: {} had no valid data", metric);
    }
}

/// Last `tail` trend rows for one entity plus its summary line.
pub fn print_trend(table: &TrendTable, entity: &str, tail: usize) {
    let Some(points) = table.points(entity) else {
        println!("No valid {} data for {}", table.metric_id, entity);
        return;
    };

    println!("\n{} trend for {}", table.metric_id, entity);
    println!("{:<10} {:>10} {:>9} {:>10}  {}", "Date", "Value", "Day%", "MA", "Trend");
    let skip = points.len().saturating_sub(tail);
    for point in points.skip(skip) {
        let day = point
            .day_change_pct
            .map(|c| format!("{:.2}", c))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:>10.2} {:>9} {:>10.2}  {}",
            point.date.format("%d/%m/%Y"),
            point.mean_value,
            day,
            point.moving_avg,
            point.label.as_str()
        );
    }

    if let Some(summary) = table.summary(entity) {
        println!(
            "{} days, min {:.2}, max {:.2}, mean {:.2}, total change {:.2}%",
            summary.count, summary.min, summary.max, summary.mean, summary.total_change_pct
        );
    }
}
