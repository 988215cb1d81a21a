use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::error::SupervisorError;
use crate::supervisor::{ServiceHandle, Stopped, Supervisor};

/// Set by the operator interrupt. Startup checks it between services and attempts; an
/// attempt already in flight runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct StartupReport {
    /// Services launched by this run.
    pub started: Vec<ServiceHandle>,
    /// Services found healthy and left alone.
    pub already_running: Vec<String>,
}

impl StartupReport {
    fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.already_running.clone();
        names.extend(self.started.iter().map(|h| h.spec_name.clone()));
        names
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Prerequisite(SupervisorError),

    #[error("{service}: giving up after {attempts} attempt(s): {source}")]
    ServiceFailed {
        service: String,
        attempts: u32,
        #[source]
        source: SupervisorError,
        /// Earlier services; they are not rolled back.
        left_running: Vec<String>,
    },

    #[error("startup interrupted before {next}")]
    Cancelled {
        next: String,
        left_running: Vec<String>,
    },
}

impl StartupError {
    pub fn left_running(&self) -> &[String] {
        match self {
            StartupError::Prerequisite(_) => &[],
            StartupError::ServiceFailed { left_running, .. }
            | StartupError::Cancelled { left_running, .. } => left_running,
        }
    }
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Services in the order their stop was attempted.
    pub order: Vec<String>,
    pub stopped: Vec<Stopped>,
    pub not_running: Vec<String>,
    pub failures: Vec<SupervisorError>,
    pub swept: Vec<String>,
}

impl ShutdownReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct RestartReport {
    pub shutdown: ShutdownReport,
    /// `None` when the shutdown failed and startup was never attempted.
    pub startup: Option<Result<StartupReport, StartupError>>,
}

impl RestartReport {
    pub fn is_success(&self) -> bool {
        self.shutdown.is_success() && matches!(self.startup, Some(Ok(_)))
    }
}

impl Supervisor {
    /// Starts every service in declared order, retrying retryable failures.
    ///
    /// Healthy services are left as they are. The first service to exhaust its attempts
    /// aborts the sequence; services before it stay up.
    pub async fn start_all(&self, cancel: &CancelFlag) -> Result<StartupReport, StartupError> {
        self.check_prerequisites()
            .await
            .map_err(StartupError::Prerequisite)?;

        let attempts = self.policy().start_attempts.max(1);
        let backoff = self.policy().retry_backoff;
        let mut report = StartupReport::default();

        for spec in self.specs() {
            let service = spec.name.as_str();
            let mut attempt = 0;
            loop {
                if cancel.is_cancelled() {
                    tracing::warn!(service, "startup interrupted");
                    return Err(StartupError::Cancelled {
                        next: service.to_string(),
                        left_running: report.running(),
                    });
                }
                attempt += 1;
                tracing::info!(service, attempt, "starting");

                match self.start(spec).await {
                    Ok(handle) => {
                        report.started.push(handle);
                        break;
                    }
                    Err(SupervisorError::AlreadyRunning { liveness, .. }) => {
                        tracing::info!(service, %liveness, "already running");
                        report.already_running.push(service.to_string());
                        break;
                    }
                    Err(err) if err.is_retryable() && attempt < attempts => {
                        tracing::warn!(
                            service,
                            attempt,
                            error = %err,
                            "start failed; retrying in {}ms",
                            backoff.as_millis()
                        );
                        self.clock().sleep(backoff).await;
                    }
                    Err(err) => {
                        tracing::error!(
                            service,
                            attempt,
                            error = %err,
                            "start failed; aborting startup"
                        );
                        return Err(StartupError::ServiceFailed {
                            service: service.to_string(),
                            attempts: attempt,
                            source: err,
                            left_running: report.running(),
                        });
                    }
                }
            }
        }

        Ok(report)
    }

    /// Stops every service in reverse declared order, continuing past failures, then
    /// sweeps stale records.
    pub async fn stop_all(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for spec in self.specs().iter().rev() {
            report.order.push(spec.name.clone());
            match self.stop(spec).await {
                Ok(stopped) => report.stopped.push(stopped),
                Err(SupervisorError::NotRunning { service }) => {
                    tracing::info!(service = %service, "not running");
                    report.not_running.push(service);
                }
                Err(err) => {
                    tracing::error!(service = %spec.name, error = %err, "stop failed");
                    report.failures.push(err);
                }
            }
        }

        match self.sweep().await {
            Ok(swept) => report.swept = swept,
            Err(err) => tracing::warn!(error = %err, "sweep failed"),
        }
        report
    }

    /// `stop_all`, then `start_all` only if every stop succeeded.
    pub async fn restart(&self, cancel: &CancelFlag) -> RestartReport {
        let shutdown = self.stop_all().await;
        if !shutdown.is_success() {
            tracing::error!(
                failures = shutdown.failures.len(),
                "not starting: some services could not be stopped"
            );
            return RestartReport {
                shutdown,
                startup: None,
            };
        }
        let startup = self.start_all(cancel).await;
        RestartReport {
            shutdown,
            startup: Some(startup),
        }
    }
}
