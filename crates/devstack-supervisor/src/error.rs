use std::time::Duration;

use devstack_process::LivenessRef;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("{service}: not ready within {}s", timeout.as_secs())]
    StartupTimeout { service: String, timeout: Duration },

    #[error("{service}: exited before becoming ready ({liveness})")]
    ImmediateExit {
        service: String,
        liveness: LivenessRef,
    },

    #[error("{service}: not running")]
    NotRunning { service: String },

    #[error("{service}: still alive after forceful stop ({liveness})")]
    StopFailed {
        service: String,
        liveness: LivenessRef,
    },

    #[error("prerequisite missing: {what}: {reason}")]
    PrerequisiteMissing { what: String, reason: String },

    #[error("{service}: already running ({liveness})")]
    AlreadyRunning {
        service: String,
        liveness: LivenessRef,
    },

    #[error("{service}: port {port} is held by a unit that could not be reclaimed")]
    PortConflict { service: String, port: u16 },

    #[error("{service}: {step} failed: {reason}")]
    Launch {
        service: String,
        step: &'static str,
        reason: String,
    },

    #[error("handle store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),
}

impl SupervisorError {
    pub fn service(&self) -> Option<&str> {
        match self {
            SupervisorError::StartupTimeout { service, .. }
            | SupervisorError::ImmediateExit { service, .. }
            | SupervisorError::NotRunning { service }
            | SupervisorError::StopFailed { service, .. }
            | SupervisorError::AlreadyRunning { service, .. }
            | SupervisorError::PortConflict { service, .. }
            | SupervisorError::Launch { service, .. } => Some(service),
            SupervisorError::PrerequisiteMissing { .. }
            | SupervisorError::Store(_)
            | SupervisorError::Config(_) => None,
        }
    }

    /// Whether the orchestration may try `start` again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SupervisorError::StartupTimeout { .. }
                | SupervisorError::ImmediateExit { .. }
                | SupervisorError::PortConflict { .. }
                | SupervisorError::Launch { .. }
        )
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        SupervisorError::Store(format_error_chain(&err))
    }

    pub(crate) fn launch(service: &str, step: &'static str, err: anyhow::Error) -> Self {
        SupervisorError::Launch {
            service: service.to_string(),
            step,
            reason: format_error_chain(&err),
        }
    }
}

pub fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last() == Some(&s) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}
