use crate::{Alert, AlertType};

pub struct AlertTemplate;

impl AlertTemplate {
    pub fn title(alert_type: &AlertType) -> String {
        match alert_type {
            AlertType::KpiDecline(event) => {
                format!("{} decline at {}", event.metric_id, event.entity_id)
            }
            AlertType::RunSummary { events, .. } => {
                format!("KPI decline run: {} declines", events)
            }
        }
    }

    pub fn body(alert_type: &AlertType) -> String {
        match alert_type {
            AlertType::KpiDecline(event) => {
                let limit = match (event.limit, event.limit_breached) {
                    (Some(limit), Some(true)) => format!(", limit {} breached", limit),
                    (Some(limit), _) => format!(", limit {}", limit),
                    (None, _) => String::new(),
                };
                format!(
                    "{}: {} changed {:.2}% ({:.2} vs {:.2} baseline over {} days, {}{}), severity {}",
                    event.entity_id,
                    event.metric_id,
                    event.change_pct,
                    event.latest_value,
                    event.baseline_value,
                    event.lookback_days,
                    event.direction.as_str(),
                    limit,
                    event.severity
                )
            }
            AlertType::RunSummary {
                metrics_analyzed,
                events,
                drill_down,
            } => {
                let mut text = format!(
                    "{} metrics analysed, {} declines, {} need drill-down",
                    metrics_analyzed,
                    events,
                    drill_down.len()
                );
                for target in drill_down {
                    text.push_str(&format!(
                        "\n  - {} / {}: {:.2}% ({})",
                        target.entity_id, target.metric_id, target.change_pct, target.severity
                    ));
                }
                text
            }
        }
    }

    /// Plain-text rendering used by chat webhooks.
    pub fn render(alert: &Alert) -> String {
        format!(
            "[{}] {}\n{}\nSent at {} UTC",
            alert.level.as_str().to_uppercase(),
            alert.title,
            alert.message,
            alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::event;
    use decline_detector::DrillDownTarget;
    use kpi_core::Severity;

    #[test]
    fn test_decline_text() {
        let mut e = event("Ha Noi", -45.0);
        e.limit = Some(99.0);
        e.limit_breached = Some(true);
        let alert = Alert::decline(&e);

        assert_eq!(alert.title, "CSSR decline at Ha Noi");
        assert!(alert.message.contains("-45.00%"));
        assert!(alert.message.contains("limit 99 breached"));
        assert!(alert.message.ends_with("severity critical"));
        assert!(AlertTemplate::render(&alert).starts_with("[CRITICAL] CSSR decline at Ha Noi"));
    }

    #[test]
    fn test_summary_lists_drill_down() {
        let alert_type = AlertType::RunSummary {
            metrics_analyzed: 5,
            events: 3,
            drill_down: vec![DrillDownTarget {
                entity_id: "Hue".to_string(),
                metric_id: "CDR".to_string(),
                change_pct: -12.5,
                severity: Severity::Critical,
            }],
        };
        let body = AlertTemplate::body(&alert_type);
        assert!(body.starts_with("5 metrics analysed, 3 declines, 1 need drill-down"));
        assert!(body.contains("Hue / CDR: -12.50% (critical)"));
    }
}
