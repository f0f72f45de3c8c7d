use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use adpilot_alerts::TracingAlertSink;
use adpilot_core::chrono::{DateTime, Duration, Utc};
use adpilot_core::config::{AppConfig, LoadOptions};
use adpilot_core::domain::performance::{DateRange, PerformanceWindow};
use adpilot_core::domain::policy::ClientPolicy;
use adpilot_core::executor::Executor;
use adpilot_core::monitor::{MonitoringOutcome, RollbackMonitor, SweepReport};
use adpilot_core::mutation::SimulatedMutationClient;
use adpilot_core::performance_store::StaticPerformanceReader;
use adpilot_core::rust_decimal::Decimal;
use adpilot_db::{connect_with_settings, migrations, SqlChangeLedger};
use serde::Deserialize;

use crate::commands::CommandResult;

/// Performance snapshot format consumed by `--metrics`: pre-aggregated
/// windows per entity, exported from the analytical store.
#[derive(Debug, Default, Deserialize)]
struct MetricsFixture {
    #[serde(default)]
    windows: Vec<WindowSpec>,
    /// Median click-to-conversion lag per entity, in hours.
    #[serde(default)]
    conversion_lag_hours: BTreeMap<String, i64>,
}

#[derive(Debug, Deserialize)]
struct WindowSpec {
    entity_id: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default)]
    impressions: u64,
    #[serde(default)]
    clicks: u64,
    cost: Decimal,
    conversions: Decimal,
    conversion_value: Decimal,
}

pub fn run(policy_path: &Path, metrics: Option<&Path>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let policy = match load_policy(policy_path) {
        Ok(policy) => policy,
        Err(message) => return CommandResult::failure("sweep", "policy_file", message, 2),
    };

    let performance = Arc::new(StaticPerformanceReader::new());
    if let Some(path) = metrics {
        match load_metrics(path) {
            Ok(fixture) => {
                for spec in fixture.windows {
                    performance.insert_window(
                        spec.entity_id.clone(),
                        PerformanceWindow {
                            range: DateRange::new(spec.start, spec.end),
                            impressions: spec.impressions,
                            clicks: spec.clicks,
                            cost: spec.cost,
                            conversions: spec.conversions,
                            conversion_value: spec.conversion_value,
                        },
                    );
                }
                for (entity_id, hours) in fixture.conversion_lag_hours {
                    performance.set_conversion_lag(entity_id, Duration::hours(hours));
                }
            }
            Err(message) => return CommandResult::failure("sweep", "metrics_file", message, 2),
        }
    }

    // Sweeps apply inverse actions live; this binary only ships the
    // simulated client.
    if !config.ads_api.simulate {
        return CommandResult::failure(
            "sweep",
            "mutation_client",
            "sweeps apply inverse actions live and require a mutation client; set \
             ads_api.simulate = true",
            2,
        );
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let ledger = Arc::new(SqlChangeLedger::new(pool.clone()));
        let executor = Arc::new(
            Executor::new(Arc::clone(&ledger), Arc::new(SimulatedMutationClient::new()))
                .with_approver("rollback_monitor"),
        );
        let monitor = RollbackMonitor::new(
            ledger,
            performance,
            executor,
            Arc::new(TracingAlertSink::new()),
        );

        let report = monitor
            .sweep(&policy, Utc::now())
            .await
            .map_err(|error| ("sweep_execution", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<SweepReport, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) => CommandResult::success("sweep", render_report(&report)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}

fn load_policy(path: &Path) -> Result<ClientPolicy, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read policy file `{}`: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("could not parse policy file `{}`: {error}", path.display()))
}

fn load_metrics(path: &Path) -> Result<MetricsFixture, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read metrics file `{}`: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("could not parse metrics file `{}`: {error}", path.display()))
}

fn render_report(report: &SweepReport) -> String {
    let mut lines = vec![format!(
        "sweep for {}: {} monitored, {} rolled back, {} confirmed good, {} insufficient data, \
         {} deferred, {} rollback failures",
        report.customer_id,
        report.outcomes.len(),
        report.rolled_back(),
        report.confirmed_good(),
        report.insufficient_data(),
        report.deferred(),
        report.rollback_failures()
    )];

    for entry in &report.outcomes {
        let detail = match &entry.outcome {
            MonitoringOutcome::RolledBack { inverse_change_id, reason } => {
                format!("rolled_back via change {inverse_change_id}: {reason}")
            }
            MonitoringOutcome::ConfirmedGood { note: Some(note) } => {
                format!("confirmed_good ({note})")
            }
            MonitoringOutcome::ConfirmedGood { note: None } => "confirmed_good".to_string(),
            MonitoringOutcome::InsufficientData { detail } => {
                format!("insufficient data ({detail})")
            }
            MonitoringOutcome::Deferred { detail } => format!("deferred ({detail})"),
            MonitoringOutcome::RollbackFailed { detail } => {
                format!("rollback failed ({detail})")
            }
        };
        lines.push(format!(
            "  - change {} on {} ({}): {detail}",
            entry.change_id, entry.entity, entry.lever
        ));
    }

    lines.join("\n")
}
