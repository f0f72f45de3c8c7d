//! Renders core alert payloads into message templates.

use adpilot_core::alerting::{AlertMessage, AlertSink, RollbackAlert, SweepSummary, WindowSnapshot};
use adpilot_core::domain::performance::signed_pct;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::blocks::{MessageBuilder, MessageTemplate, TextObject};

pub fn render(message: &AlertMessage) -> MessageTemplate {
    match message {
        AlertMessage::Rollback(alert) => render_rollback(alert),
        AlertMessage::SweepSummary(summary) => render_summary(summary),
    }
}

fn render_rollback(alert: &RollbackAlert) -> MessageTemplate {
    let fallback = format!(
        "Rollback applied: change {} on {} ({} lever) for {}",
        alert.change_id, alert.entity, alert.lever, alert.customer_id
    );

    MessageBuilder::new(fallback)
        .section(
            "headline",
            TextObject::mrkdwn(format!(
                "*Rollback applied*: change {} on {} was reversed by change {}",
                alert.change_id, alert.entity, alert.inverse_change_id
            )),
        )
        .section("trigger", TextObject::plain(format!("Trigger: {}", alert.trigger_reason)))
        .section(
            "metrics",
            TextObject::mrkdwn(format!(
                "Before: {}\nAfter: {}\nDelta: {}",
                describe_window(&alert.baseline),
                describe_window(&alert.current),
                alert.delta.describe()
            )),
        )
        .context(
            "meta",
            vec![
                TextObject::plain(format!("customer {}", alert.customer_id)),
                TextObject::plain(format!("lever {}", alert.lever)),
                TextObject::plain(alert.occurred_at.to_rfc3339()),
            ],
        )
        .build()
}

fn render_summary(summary: &SweepSummary) -> MessageTemplate {
    let fallback = format!(
        "Rollback sweep for {}: {} monitored, {} rolled back",
        summary.customer_id, summary.monitored, summary.rolled_back
    );

    MessageBuilder::new(fallback)
        .section(
            "headline",
            TextObject::mrkdwn(format!(
                "*Rollback sweep* for {} at {}",
                summary.customer_id,
                summary.swept_at.to_rfc3339()
            )),
        )
        .section(
            "counts",
            TextObject::plain(format!(
                "{} monitored | {} rolled back | {} confirmed good | {} insufficient data | {} deferred | {} rollback failures",
                summary.monitored,
                summary.rolled_back,
                summary.confirmed_good,
                summary.insufficient_data,
                summary.deferred,
                summary.rollback_failures
            )),
        )
        .build()
}

fn describe_window(snapshot: &WindowSnapshot) -> String {
    format!(
        "cost {}, conversions {}, value {}, CPA {}, ROAS {}",
        money(snapshot.cost),
        snapshot.conversions,
        money(snapshot.conversion_value),
        snapshot.cpa.map(money).unwrap_or_else(insufficient),
        snapshot.roas.map(ratio).unwrap_or_else(insufficient),
    )
}

fn money(value: Decimal) -> String {
    format!("${}", value.round_dp(2))
}

fn ratio(value: Decimal) -> String {
    format!("{}x", value.round_dp(2))
}

fn insufficient() -> String {
    "n/a (insufficient data)".to_string()
}

/// Sink that logs every alert as a structured tracing event. Rollbacks log
/// at warn because they mean a live change regressed.
#[derive(Clone, Debug, Default)]
pub struct TracingAlertSink;

impl TracingAlertSink {
    pub fn new() -> Self {
        Self
    }
}

impl AlertSink for TracingAlertSink {
    fn emit(&self, message: AlertMessage) {
        let template = render(&message);
        match &message {
            AlertMessage::Rollback(alert) => {
                warn!(
                    customer_id = %alert.customer_id,
                    change_id = %alert.change_id,
                    inverse_change_id = %alert.inverse_change_id,
                    entity = %alert.entity,
                    lever = %alert.lever,
                    trigger = %alert.trigger_reason,
                    conversions_delta = %signed_pct(alert.delta.conversions_pct),
                    "{}",
                    template.fallback_text
                );
            }
            AlertMessage::SweepSummary(summary) => {
                info!(
                    customer_id = %summary.customer_id,
                    monitored = summary.monitored,
                    rolled_back = summary.rolled_back,
                    confirmed_good = summary.confirmed_good,
                    insufficient_data = summary.insufficient_data,
                    deferred = summary.deferred,
                    rollback_failures = summary.rollback_failures,
                    "{}",
                    template.fallback_text
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use adpilot_core::alerting::{AlertMessage, RollbackAlert, SweepSummary, WindowSnapshot};
    use adpilot_core::domain::action::{EntityRef, EntityType, Lever};
    use adpilot_core::domain::ledger::ChangeId;
    use adpilot_core::domain::performance::{DateRange, PerformanceDelta, PerformanceWindow};
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::render;

    fn window(cost_cents: i64, conversions: i64, value_cents: i64) -> PerformanceWindow {
        let now = Utc::now();
        PerformanceWindow {
            range: DateRange::new(now - Duration::days(7), now),
            impressions: 10_000,
            clicks: 500,
            cost: Decimal::new(cost_cents, 2),
            conversions: Decimal::new(conversions, 0),
            conversion_value: Decimal::new(value_cents, 2),
        }
    }

    fn rollback_alert(baseline: PerformanceWindow, current: PerformanceWindow) -> RollbackAlert {
        let delta = PerformanceDelta::between(&baseline, &current).expect("delta");
        RollbackAlert {
            customer_id: "cust-1".to_string(),
            change_id: ChangeId(7),
            inverse_change_id: ChangeId(11),
            entity: EntityRef::new(EntityType::Campaign, "cmp-1"),
            lever: Lever::Budget,
            trigger_reason: "CPA rose +35% while conversions fell -16.7%".to_string(),
            baseline: WindowSnapshot::from_window(&baseline),
            current: WindowSnapshot::from_window(&current),
            delta,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn rollback_render_embeds_trigger_and_metrics() {
        let alert = rollback_alert(window(240_00, 12, 960_00), window(270_00, 10, 860_00));
        let template = render(&AlertMessage::Rollback(alert));
        let text = template.full_text();

        assert!(text.contains("change 7"));
        assert!(text.contains("change 11"));
        assert!(text.contains("CPA rose +35%"));
        assert!(text.contains("$20.00"));
        assert!(text.contains("$27.00"));
    }

    #[test]
    fn collapsed_window_renders_insufficient_data_not_nan() {
        let alert = rollback_alert(window(240_00, 12, 960_00), window(270_00, 0, 0));
        let template = render(&AlertMessage::Rollback(alert));
        let text = template.full_text();

        assert!(text.contains("insufficient data"));
        assert!(!text.contains("NaN"));
        assert!(!text.contains("inf"));
    }

    #[test]
    fn summary_render_carries_every_count() {
        let template = render(&AlertMessage::SweepSummary(SweepSummary {
            customer_id: "cust-1".to_string(),
            swept_at: Utc::now(),
            monitored: 5,
            rolled_back: 1,
            confirmed_good: 2,
            insufficient_data: 1,
            deferred: 1,
            rollback_failures: 0,
        }));
        let text = template.full_text();

        assert!(text.contains("5 monitored"));
        assert!(text.contains("1 rolled back"));
        assert!(text.contains("2 confirmed good"));
    }
}
