use std::fs;
use std::path::Path;
use std::sync::Arc;

use adpilot_core::config::{AppConfig, LoadOptions};
use adpilot_core::domain::action::CandidateAction;
use adpilot_core::domain::policy::ClientPolicy;
use adpilot_core::executor::{BatchResult, ExecutionError, ExecutionMode, Executor};
use adpilot_core::mutation::SimulatedMutationClient;
use adpilot_db::{connect_with_settings, migrations, SqlChangeLedger};

use crate::commands::CommandResult;

pub fn run(input: &Path, policy_path: &Path, live: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "execute",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let policy = match load_policy(policy_path) {
        Ok(policy) => policy,
        Err(message) => return CommandResult::failure("execute", "policy_file", message, 2),
    };

    let actions = match load_actions(input) {
        Ok(actions) => actions,
        Err(message) => return CommandResult::failure("execute", "input_file", message, 2),
    };

    // The real platform client is wired by the embedding service; this
    // binary only ships the simulated one.
    if live && !config.ads_api.simulate {
        return CommandResult::failure(
            "execute",
            "mutation_client",
            "live mode in the CLI requires the simulated mutation client; set \
             ads_api.simulate = true",
            2,
        );
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "execute",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let mode = if live { ExecutionMode::Live } else { ExecutionMode::DryRun };
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
        // The in-repo client only simulates; a real platform client is wired
        // by the embedding service.
        let executor = Executor::new(ledger, Arc::new(SimulatedMutationClient::new()));

        let batch_result = executor
            .execute(&policy.customer_id, actions, &policy, mode)
            .await
            .map_err(execution_failure)?;

        pool.close().await;
        Ok::<BatchResult, (&'static str, String, u8)>(batch_result)
    });

    match result {
        Ok(batch_result) => CommandResult::success("execute", render_batch(&batch_result)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("execute", error_class, message, exit_code)
        }
    }
}

fn execution_failure(error: ExecutionError) -> (&'static str, String, u8) {
    match &error {
        ExecutionError::Policy(_) => ("policy_validation", error.to_string(), 2),
        ExecutionError::CustomerMismatch { .. } => ("input_validation", error.to_string(), 2),
        ExecutionError::Ledger(_) => ("ledger", error.to_string(), 5),
    }
}

fn load_policy(path: &Path) -> Result<ClientPolicy, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read policy file `{}`: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("could not parse policy file `{}`: {error}", path.display()))
}

fn load_actions(path: &Path) -> Result<Vec<CandidateAction>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read actions file `{}`: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("could not parse actions file `{}`: {error}", path.display()))
}

fn render_batch(result: &BatchResult) -> String {
    let mut lines = vec![result.summary()];

    for executed in &result.successful {
        lines.push(format!(
            "  - executed: {} {} {} -> {} (change {})",
            executed.entry.entity,
            executed.entry.lever,
            executed.entry.old_value,
            executed.entry.new_value,
            executed.entry.change_id
        ));
    }
    for blocked in &result.blocked {
        let label = if blocked.requires_manual { "manual" } else { "blocked" };
        lines.push(format!(
            "  - {label}: {} {} [{}]",
            blocked.action.entity,
            blocked.action.lever,
            blocked.reasons.join("; ")
        ));
    }
    for failure in &result.failed {
        lines.push(format!(
            "  - failed: {} {} ({}: {})",
            failure.action.entity,
            failure.action.lever,
            failure.error.error_class(),
            failure.error
        ));
    }

    lines.join("\n")
}
