use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::policy::PolicyError;
use crate::executor::ExecutionError;
use crate::ledger::LedgerError;
use crate::monitor::SweepError;
use crate::performance_store::PerformanceError;

/// Top-level error taxonomy for callers that drive whole runs (the CLI and
/// schedulers). Policy violations and per-item mutation failures are *not*
/// here: they are data inside `BatchResult` and `SweepReport`, because a
/// caller must always be able to tell partial success from a full abort.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Sweep(#[from] SweepError),
    #[error(transparent)]
    Performance(#[from] PerformanceError),
}

impl ApplicationError {
    /// Stable class identifier for structured command output and exit-code
    /// mapping.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_validation",
            Self::Policy(_) => "policy_validation",
            Self::Ledger(_) => "ledger",
            Self::Execution(ExecutionError::Policy(_)) => "policy_validation",
            Self::Execution(_) => "execution",
            Self::Sweep(SweepError::Policy(_)) => "policy_validation",
            Self::Sweep(_) => "sweep",
            Self::Performance(_) => "performance_store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ApplicationError;
    use crate::domain::policy::PolicyError;
    use crate::executor::ExecutionError;

    #[test]
    fn policy_failures_share_a_class_wherever_they_surface() {
        let direct = ApplicationError::from(PolicyError::Validation("bad".to_string()));
        assert_eq!(direct.error_class(), "policy_validation");

        let via_execution = ApplicationError::from(ExecutionError::Policy(
            PolicyError::Validation("bad".to_string()),
        ));
        assert_eq!(via_execution.error_class(), "policy_validation");
    }
}
