use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use adpilot_cli::commands::{execute, migrate, seed, sweep};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(
        &[("ADPILOT_DATABASE_URL", "sqlite::memory:"), ("ADPILOT_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "ok");
        },
    );
}

#[test]
fn migrate_returns_config_failure_with_bad_database_url() {
    with_env(&[("ADPILOT_DATABASE_URL", "postgres://nope")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_loads_and_verifies_demo_ledger() {
    with_env(
        &[("ADPILOT_DATABASE_URL", "sqlite::memory:"), ("ADPILOT_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = seed::run();
            assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "seed");
            assert_eq!(payload["status"], "ok");

            let message = payload["message"].as_str().unwrap_or("");
            assert!(message.contains("demo-cmp-monitoring"));
            assert!(message.contains("demo-kw-rolled-back"));
        },
    );
}

#[test]
fn execute_dry_run_journals_and_blocks_repeats() {
    let dir = TempDir::new().expect("temp dir");
    let db_url = format!("sqlite://{}/adpilot-test.db?mode=rwc", dir.path().display());

    let policy_path = dir.path().join("policy.json");
    fs::write(
        &policy_path,
        r#"{
            "customer_id": "cust-cli",
            "automation_mode": "autopilot",
            "primary_kpi": "cpa"
        }"#,
    )
    .expect("write policy");

    let actions_path = dir.path().join("actions.json");
    fs::write(
        &actions_path,
        r#"[
            {
                "rule_id": "budget_scaler",
                "customer_id": "cust-cli",
                "entity": { "entity_type": "campaign", "entity_id": "cmp-cli-1" },
                "lever": "budget",
                "current_value": "100.00",
                "proposed_value": "105.00",
                "risk_tier": "low",
                "confidence": 0.9,
                "evidence": {
                    "kind": "budget",
                    "spend_7d": "650.00",
                    "conversions_7d": 40,
                    "budget_utilization_pct": "97"
                },
                "rationale": "budget constrained"
            }
        ]"#,
    )
    .expect("write actions");

    with_env(&[("ADPILOT_DATABASE_URL", db_url.as_str())], || {
        let first = execute::run(&actions_path, &policy_path, false);
        assert_eq!(first.exit_code, 0, "expected dry-run success: {}", first.output);

        let payload = parse_payload(&first.output);
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("1 executed"), "message: {message}");
        assert!(message.contains("cmp-cli-1"));

        // The dry-run consumed the cooldown, so an identical re-run blocks.
        let second = execute::run(&actions_path, &policy_path, false);
        assert_eq!(second.exit_code, 0);
        let payload = parse_payload(&second.output);
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("0 executed"), "message: {message}");
        assert!(message.contains("1 blocked"), "message: {message}");
        assert!(message.contains("cooldown"), "message: {message}");
    });
}

#[test]
fn execute_live_without_mutation_client_fails_fast() {
    let dir = TempDir::new().expect("temp dir");
    let policy_path = dir.path().join("policy.json");
    fs::write(&policy_path, r#"{ "customer_id": "cust-cli", "automation_mode": "autopilot" }"#)
        .expect("write policy");
    let actions_path = dir.path().join("actions.json");
    fs::write(&actions_path, "[]").expect("write actions");

    with_env(
        &[("ADPILOT_DATABASE_URL", "sqlite::memory:"), ("ADPILOT_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = execute::run(&actions_path, &policy_path, true);
            assert_eq!(result.exit_code, 2);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["error_class"], "mutation_client");
        },
    );
}

#[test]
fn sweep_reports_an_empty_monitoring_queue() {
    let dir = TempDir::new().expect("temp dir");
    let policy_path = dir.path().join("policy.json");
    fs::write(&policy_path, r#"{ "customer_id": "cust-cli", "automation_mode": "autopilot" }"#)
        .expect("write policy");

    with_env(
        &[
            ("ADPILOT_DATABASE_URL", "sqlite::memory:"),
            ("ADPILOT_DATABASE_MAX_CONNECTIONS", "1"),
            ("ADPILOT_ADS_SIMULATE", "true"),
        ],
        || {
            let result = sweep::run(&policy_path, None);
            assert_eq!(result.exit_code, 0, "expected sweep success: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "sweep");
            let message = payload["message"].as_str().unwrap_or("");
            assert!(message.contains("0 monitored"), "message: {message}");
        },
    );
}

#[test]
fn sweep_without_mutation_client_fails_fast() {
    let dir = TempDir::new().expect("temp dir");
    let policy_path = dir.path().join("policy.json");
    fs::write(&policy_path, r#"{ "customer_id": "cust-cli", "automation_mode": "autopilot" }"#)
        .expect("write policy");

    with_env(
        &[("ADPILOT_DATABASE_URL", "sqlite::memory:"), ("ADPILOT_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = sweep::run(&policy_path, None);
            assert_eq!(result.exit_code, 2);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["error_class"], "mutation_client");
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).unwrap_or_else(|error| {
        panic!("command output should be JSON, got error {error}: {output}")
    })
}

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const MANAGED_VARS: &[&str] = &[
    "ADPILOT_DATABASE_URL",
    "ADPILOT_DATABASE_MAX_CONNECTIONS",
    "ADPILOT_ADS_SIMULATE",
    "ADPILOT_ADS_ENDPOINT",
    "ADPILOT_ADS_DEVELOPER_TOKEN",
];

fn with_env(vars: &[(&str, &str)], run: impl FnOnce()) {
    let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
    let _guard = match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    for var in MANAGED_VARS {
        env::remove_var(var);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    run();

    for var in MANAGED_VARS {
        env::remove_var(var);
    }
}
