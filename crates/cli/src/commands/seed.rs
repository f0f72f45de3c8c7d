use adpilot_core::config::{AppConfig, LoadOptions};
use adpilot_db::{connect_with_settings, migrations, DemoSeedDataset};

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
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

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        pool.close().await;

        if !verification.all_present {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(("seed_verification", format!("missing seed objects: {failed}"), 6u8));
        }

        Ok::<usize, (&'static str, String, u8)>(seed_result.entries_created)
    });

    match result {
        Ok(entries_created) => {
            let mut lines = vec![format!(
                "seeded demo ledger ({entries_created} entries created this run):"
            )];
            lines.push("  - monitoring: demo-cmp-monitoring (budget +8% under monitoring)".to_string());
            lines.push("  - confirmed_good: demo-kw-confirmed (bid +6.7% confirmed good)".to_string());
            lines.push(
                "  - rolled_back: demo-kw-rolled-back (keyword pause reversed with linkage)"
                    .to_string(),
            );
            CommandResult::success("seed", lines.join("\n"))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
