use std::{ops::ControlFlow, path::Path, sync::Arc, time::Duration};

use devstack_process::{HandleRecord, LivenessRef, ServiceState, ServiceStatus};

use crate::clock::{Clock, poll_until};
use crate::container::ContainerRuntime;
use crate::error::{SupervisorError, format_error_chain};
use crate::logs::{SUPERVISOR_LOG, ServiceLogs};
use crate::probe::Probe;
use crate::process_control::{ProcessControl, Signal};
use crate::spec::{
    ContainerRef, ProbeTarget, ProcessLaunch, ServiceKind, ServiceSpec, SupervisorPolicy,
};
use crate::store::{HandleStore, StoredRecord};

/// Everything the supervisor talks to outside its own memory.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn HandleStore>,
    pub processes: Arc<dyn ProcessControl>,
    pub containers: Arc<dyn ContainerRuntime>,
    pub probe: Arc<dyn Probe>,
    pub clock: Arc<dyn Clock>,
}

/// Runtime view of one started service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceHandle {
    pub spec_name: String,
    pub liveness: LivenessRef,
    pub state: ServiceState,
}

/// Confirmed termination of a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Stopped {
    pub service: String,
    pub liveness: LivenessRef,
    /// The unit ignored the graceful request and needed the forceful one.
    pub forced: bool,
    /// The unit had no record and was found through its declared port.
    pub adopted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Graceful,
    Forced,
    Survived,
}

pub struct Supervisor {
    specs: Vec<ServiceSpec>,
    policy: SupervisorPolicy,
    logs: ServiceLogs,
    store: Arc<dyn HandleStore>,
    processes: Arc<dyn ProcessControl>,
    containers: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn Probe>,
    clock: Arc<dyn Clock>,
}

impl Supervisor {
    pub fn new(
        specs: Vec<ServiceSpec>,
        policy: SupervisorPolicy,
        logs: ServiceLogs,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            store,
            processes,
            containers,
            probe,
            clock,
        } = collaborators;
        Self {
            specs,
            policy,
            logs,
            store,
            processes,
            containers,
            probe,
            clock,
        }
    }

    /// Services in declared (startup) order.
    pub fn specs(&self) -> &[ServiceSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&ServiceSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn policy(&self) -> &SupervisorPolicy {
        &self.policy
    }

    pub fn logs(&self) -> &ServiceLogs {
        &self.logs
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Launches one service and waits for it to become ready.
    ///
    /// A failed attempt terminates what it launched and removes its record before
    /// returning, so the caller can simply try again.
    pub async fn start(&self, spec: &ServiceSpec) -> Result<ServiceHandle, SupervisorError> {
        match &spec.kind {
            ServiceKind::Process(launch) => self.start_process(spec, launch).await,
            ServiceKind::Container(container) => self.start_container(spec, container).await,
        }
    }

    async fn start_process(
        &self,
        spec: &ServiceSpec,
        launch: &ProcessLaunch,
    ) -> Result<ServiceHandle, SupervisorError> {
        let service = spec.name.as_str();
        let _lock = self
            .store
            .lock(service)
            .await
            .map_err(SupervisorError::store)?;

        self.clear_previous_run(spec).await?;
        self.reclaim_port(spec).await?;

        let log_path = self
            .logs
            .prepare(service)
            .await
            .map_err(|e| SupervisorError::launch(service, "prepare log", e))?;
        let argv = launch.argv();
        self.logs
            .mark(service, format!("start requested: {}", argv.join(" ")))
            .await;

        let pid = self
            .processes
            .spawn(service, launch, &log_path)
            .await
            .map_err(|e| SupervisorError::launch(service, "spawn", e))?;
        tracing::info!(service, pid, "launched");
        self.logs.mark(service, format!("launched pid {pid}")).await;

        let liveness = LivenessRef::Pid(pid);
        let mut record = HandleRecord::starting(service, liveness.clone());
        record.command = argv;
        record.log_path = Some(log_path.display().to_string());
        if let Err(e) = self.store.save(&record).await {
            // Without a record nobody could find this unit again.
            self.terminate_pid(service, pid, spec.grace_period).await;
            return Err(SupervisorError::store(e));
        }

        match self.await_ready(spec, &liveness).await {
            Ok(()) => {
                let record = record.with_state(ServiceState::Healthy);
                self.store
                    .save(&record)
                    .await
                    .map_err(SupervisorError::store)?;
                tracing::info!(service, pid, "healthy");
                self.logs.mark(service, "healthy").await;
                Ok(ServiceHandle {
                    spec_name: spec.name.clone(),
                    liveness,
                    state: ServiceState::Healthy,
                })
            }
            Err(err) => {
                self.abandon_attempt(spec, record, &err).await;
                Err(err)
            }
        }
    }

    /// Deals with whatever a previous run left in the store for this service.
    async fn clear_previous_run(&self, spec: &ServiceSpec) -> Result<(), SupervisorError> {
        let service = spec.name.as_str();
        let Some(record) = self.load_record(service).await? else {
            return Ok(());
        };

        if let Some(pid) = record.liveness.pid()
            && self.processes.is_alive(pid)
        {
            if self.probe_ready(&spec.readiness.target).await {
                return Err(SupervisorError::AlreadyRunning {
                    service: service.to_string(),
                    liveness: record.liveness,
                });
            }
            tracing::warn!(
                service,
                pid,
                state = %record.state,
                "previous run is alive but not ready; replacing it"
            );
            if self.terminate_pid(service, pid, spec.grace_period).await == Termination::Survived {
                return Err(SupervisorError::StopFailed {
                    service: service.to_string(),
                    liveness: record.liveness,
                });
            }
        } else {
            tracing::info!(service, liveness = %record.liveness, "discarding stale record");
        }

        self.store
            .remove(service)
            .await
            .map_err(SupervisorError::store)
    }

    /// Frees the declared port by terminating whatever listens on it.
    async fn reclaim_port(&self, spec: &ServiceSpec) -> Result<(), SupervisorError> {
        let Some(port) = spec.port else {
            return Ok(());
        };
        if !self.probe.port_listening(port).await {
            return Ok(());
        }

        let service = spec.name.as_str();
        let conflict = || SupervisorError::PortConflict {
            service: service.to_string(),
            port,
        };
        let Some(pid) = self.processes.pid_on_port(port).await else {
            tracing::warn!(service, port, "port is busy and its owner cannot be identified");
            return Err(conflict());
        };

        tracing::warn!(service, port, pid, "port is busy; terminating its occupant");
        self.logs
            .mark(service, format!("reclaiming port {port} from pid {pid}"))
            .await;
        if self.terminate_pid(service, pid, spec.grace_period).await == Termination::Survived {
            return Err(conflict());
        }

        // The occupant may have had children holding the socket.
        let probe = self.probe.as_ref();
        let released = poll_until(
            self.clock(),
            self.policy.poll_interval,
            self.policy.kill_wait,
            move || async move {
                if probe.port_listening(port).await {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            },
        )
        .await;
        match released {
            Some(()) => Ok(()),
            None => Err(conflict()),
        }
    }

    async fn start_container(
        &self,
        spec: &ServiceSpec,
        container: &ContainerRef,
    ) -> Result<ServiceHandle, SupervisorError> {
        let service = spec.name.as_str();
        let existing = self
            .containers
            .inspect(container)
            .await
            .map_err(|e| SupervisorError::launch(service, "inspect container", e))?;
        if let Some(info) = existing
            && info.is_ready()
            && self.probe_ready(&spec.readiness.target).await
        {
            return Err(SupervisorError::AlreadyRunning {
                service: service.to_string(),
                liveness: LivenessRef::Container(info.id),
            });
        }

        self.logs
            .mark(service, format!("start requested: container {}", container.name))
            .await;
        let id = self
            .containers
            .start(container)
            .await
            .map_err(|e| SupervisorError::launch(service, "container start", e))?;
        tracing::info!(service, container = %container.name, id = %id, "container started");

        let liveness = LivenessRef::Container(id);
        match self.await_ready(spec, &liveness).await {
            Ok(()) => {
                tracing::info!(service, "healthy");
                self.logs.mark(service, "healthy").await;
                Ok(ServiceHandle {
                    spec_name: spec.name.clone(),
                    liveness,
                    state: ServiceState::Healthy,
                })
            }
            Err(err) => {
                tracing::warn!(
                    service,
                    error = %err,
                    "container did not become ready; stopping it"
                );
                self.logs.mark(service, format!("start failed: {err}")).await;
                if let Err(e) = self.containers.stop(container, spec.grace_period).await {
                    tracing::warn!(
                        service,
                        error = %format_error_chain(&e),
                        "container cleanup failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Polls until the probe passes while the unit is ready, the unit dies, or the
    /// readiness timeout runs out. A container with its own healthcheck must also report
    /// healthy.
    async fn await_ready(
        &self,
        spec: &ServiceSpec,
        liveness: &LivenessRef,
    ) -> Result<(), SupervisorError> {
        let this = self;
        let outcome = poll_until(
            self.clock(),
            self.policy.poll_interval,
            spec.readiness.timeout,
            move || async move {
                if !this.unit_alive(spec, liveness).await {
                    return ControlFlow::Break(false);
                }
                if this.probe_ready(&spec.readiness.target).await
                    && this.unit_ready(spec, liveness).await
                {
                    return ControlFlow::Break(true);
                }
                ControlFlow::Continue(())
            },
        )
        .await;

        match outcome {
            Some(true) => Ok(()),
            Some(false) => Err(SupervisorError::ImmediateExit {
                service: spec.name.clone(),
                liveness: liveness.clone(),
            }),
            None => Err(SupervisorError::StartupTimeout {
                service: spec.name.clone(),
                timeout: spec.readiness.timeout,
            }),
        }
    }

    async fn abandon_attempt(
        &self,
        spec: &ServiceSpec,
        record: HandleRecord,
        err: &SupervisorError,
    ) {
        let service = spec.name.as_str();
        tracing::warn!(service, error = %err, "start attempt failed");
        self.logs.mark(service, format!("start failed: {err}")).await;

        let record = record.with_state(ServiceState::Unhealthy);
        if let Err(e) = self.store.save(&record).await {
            tracing::warn!(
                service,
                error = %format_error_chain(&e),
                "could not record unhealthy state"
            );
        }

        let Some(pid) = record.liveness.pid() else {
            return;
        };
        if self.terminate_pid(service, pid, spec.grace_period).await == Termination::Survived {
            // Leave the unhealthy record behind; it still points at a live unit.
            tracing::error!(service, pid, "failed attempt left a unit that survived SIGKILL");
            return;
        }
        if let Err(e) = self.store.remove(service).await {
            tracing::warn!(service, error = %format_error_chain(&e), "could not remove record");
        }
    }

    /// Terminates one service: graceful request first, forceful after the grace period.
    pub async fn stop(&self, spec: &ServiceSpec) -> Result<Stopped, SupervisorError> {
        match &spec.kind {
            ServiceKind::Process(_) => self.stop_process(spec).await,
            ServiceKind::Container(container) => self.stop_container(spec, container).await,
        }
    }

    async fn stop_process(&self, spec: &ServiceSpec) -> Result<Stopped, SupervisorError> {
        let service = spec.name.as_str();
        let _lock = self
            .store
            .lock(service)
            .await
            .map_err(SupervisorError::store)?;

        let mut target = None;
        if let Some(record) = self.load_record(service).await? {
            match record.liveness.pid() {
                Some(pid) if self.processes.is_alive(pid) => {
                    self.store
                        .save(&record.with_state(ServiceState::Stopping))
                        .await
                        .map_err(SupervisorError::store)?;
                    target = Some((pid, false));
                }
                _ => {
                    tracing::info!(
                        service,
                        liveness = %record.liveness,
                        "record points at a dead unit"
                    );
                    self.store
                        .remove(service)
                        .await
                        .map_err(SupervisorError::store)?;
                }
            }
        }
        if target.is_none() {
            target = self.adopt_by_port(spec).await?.map(|pid| (pid, true));
        }
        let Some((pid, adopted)) = target else {
            return Err(SupervisorError::NotRunning {
                service: service.to_string(),
            });
        };

        let liveness = LivenessRef::Pid(pid);
        match self.terminate_pid(service, pid, spec.grace_period).await {
            Termination::Survived => {
                tracing::error!(service, pid, "still alive after SIGKILL");
                Err(SupervisorError::StopFailed {
                    service: service.to_string(),
                    liveness,
                })
            }
            outcome => {
                self.store
                    .remove(service)
                    .await
                    .map_err(SupervisorError::store)?;
                tracing::info!(service, pid, adopted, "stopped");
                self.logs.mark(service, "stopped").await;
                Ok(Stopped {
                    service: service.to_string(),
                    liveness,
                    forced: outcome == Termination::Forced,
                    adopted,
                })
            }
        }
    }

    /// Looks up an unrecorded occupant of the declared port.
    async fn adopt_by_port(&self, spec: &ServiceSpec) -> Result<Option<u32>, SupervisorError> {
        let Some(port) = spec.port else {
            return Ok(None);
        };
        if !self.probe.port_listening(port).await {
            return Ok(None);
        }
        match self.processes.pid_on_port(port).await {
            Some(pid) => {
                tracing::info!(service = %spec.name, port, pid, "adopting unrecorded occupant");
                Ok(Some(pid))
            }
            None => Err(SupervisorError::PortConflict {
                service: spec.name.clone(),
                port,
            }),
        }
    }

    async fn stop_container(
        &self,
        spec: &ServiceSpec,
        container: &ContainerRef,
    ) -> Result<Stopped, SupervisorError> {
        let service = spec.name.as_str();
        let info = self
            .containers
            .inspect(container)
            .await
            .map_err(|e| SupervisorError::launch(service, "inspect container", e))?;
        let Some(info) = info.filter(|i| i.running) else {
            return Err(SupervisorError::NotRunning {
                service: service.to_string(),
            });
        };
        let liveness = LivenessRef::Container(info.id);

        self.logs
            .mark(service, format!("stopping container {}", container.name))
            .await;
        if let Err(e) = self.containers.stop(container, spec.grace_period).await {
            tracing::warn!(service, error = %format_error_chain(&e), "container stop failed");
        }
        if self.wait_container_exit(container, spec.grace_period).await {
            tracing::info!(service, "stopped");
            return Ok(Stopped {
                service: service.to_string(),
                liveness,
                forced: false,
                adopted: false,
            });
        }

        tracing::warn!(service, "container still running after grace period; killing");
        if let Err(e) = self.containers.kill(container).await {
            tracing::warn!(service, error = %format_error_chain(&e), "container kill failed");
        }
        if self.wait_container_exit(container, self.policy.kill_wait).await {
            return Ok(Stopped {
                service: service.to_string(),
                liveness,
                forced: true,
                adopted: false,
            });
        }
        Err(SupervisorError::StopFailed {
            service: service.to_string(),
            liveness,
        })
    }

    async fn wait_container_exit(&self, container: &ContainerRef, timeout: Duration) -> bool {
        let containers = self.containers.as_ref();
        poll_until(
            self.clock(),
            self.policy.poll_interval,
            timeout,
            move || async move {
                match containers.inspect(container).await {
                    Ok(Some(info)) if info.running => ControlFlow::Continue(()),
                    Ok(_) => ControlFlow::Break(()),
                    // Cannot tell; keep waiting.
                    Err(_) => ControlFlow::Continue(()),
                }
            },
        )
        .await
        .is_some()
    }

    /// SIGTERM, wait up to `grace`, SIGKILL, wait up to `kill_wait`.
    async fn terminate_pid(&self, service: &str, pid: u32, grace: Duration) -> Termination {
        if !self.processes.is_alive(pid) {
            return Termination::Graceful;
        }

        self.logs.mark(service, format!("SIGTERM pid {pid}")).await;
        if let Err(e) = self.processes.signal(pid, Signal::Graceful) {
            tracing::warn!(service, pid, error = %format_error_chain(&e), "SIGTERM failed");
        }
        if self.wait_pid_exit(pid, grace).await {
            return Termination::Graceful;
        }

        tracing::warn!(
            service,
            pid,
            grace_ms = grace.as_millis() as u64,
            "grace period expired; sending SIGKILL"
        );
        self.logs.mark(service, format!("SIGKILL pid {pid}")).await;
        if let Err(e) = self.processes.signal(pid, Signal::Forceful) {
            tracing::warn!(service, pid, error = %format_error_chain(&e), "SIGKILL failed");
        }
        if self.wait_pid_exit(pid, self.policy.kill_wait).await {
            Termination::Forced
        } else {
            Termination::Survived
        }
    }

    async fn wait_pid_exit(&self, pid: u32, timeout: Duration) -> bool {
        let processes = self.processes.as_ref();
        poll_until(
            self.clock(),
            self.policy.poll_interval,
            timeout,
            move || async move {
                if processes.is_alive(pid) {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            },
        )
        .await
        .is_some()
    }

    /// Observes every declared service directly. Never mutates anything.
    pub async fn status(&self) -> Vec<ServiceStatus> {
        let mut out = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            out.push(self.status_of(spec).await);
        }
        out
    }

    /// Direct observation of one service. A process without a live record that still
    /// holds the declared port is reported through that port's owner.
    pub async fn status_of(&self, spec: &ServiceSpec) -> ServiceStatus {
        let port_listening = match spec.port {
            Some(port) => Some(self.probe.port_listening(port).await),
            None => None,
        };

        let mut healthcheck_ok = true;
        let (mut handle, mut recorded_state, mut alive) = match &spec.kind {
            ServiceKind::Process(_) => match self.store.load(&spec.name).await {
                Ok(Some(record)) => {
                    let alive = record
                        .liveness
                        .pid()
                        .is_some_and(|pid| self.processes.is_alive(pid));
                    (Some(record.liveness), Some(record.state), alive)
                }
                Ok(None) => (None, None, false),
                Err(e) => {
                    tracing::warn!(
                        service = %spec.name,
                        error = %format_error_chain(&e),
                        "unreadable record"
                    );
                    (None, None, false)
                }
            },
            ServiceKind::Container(container) => match self.containers.inspect(container).await {
                Ok(Some(info)) if info.running => {
                    healthcheck_ok = info.is_ready();
                    (Some(LivenessRef::Container(info.id)), None, true)
                }
                Ok(_) => (None, None, false),
                Err(e) => {
                    tracing::warn!(
                        service = %spec.name,
                        error = %format_error_chain(&e),
                        "container inspect failed"
                    );
                    (None, None, false)
                }
            },
        };

        if !alive
            && !spec.is_container()
            && port_listening == Some(true)
            && let Some(port) = spec.port
            && let Some(pid) = self.processes.pid_on_port(port).await
        {
            handle = Some(LivenessRef::Pid(pid));
            recorded_state = None;
            alive = true;
        }

        let ready = match &spec.readiness.target {
            ProbeTarget::None => (!healthcheck_ok).then_some(false),
            target => Some(healthcheck_ok && self.probe.check(target).await),
        };

        ServiceStatus {
            name: spec.name.clone(),
            kind: spec.kind_label().to_string(),
            handle,
            recorded_state,
            alive,
            port: spec.port,
            port_listening,
            ready,
            state: ServiceStatus::derive_state(alive, ready),
        }
    }

    /// Removes every record whose unit is gone, plus unreadable ones. Records locked by
    /// another invocation are left alone. Returns the services swept.
    pub async fn sweep(&self) -> Result<Vec<String>, SupervisorError> {
        let records = self.store.list().await.map_err(SupervisorError::store)?;
        let mut swept = Vec::new();
        for stored in records {
            let service = stored.service().to_string();
            let _lock = match self.store.lock(&service).await {
                Ok(lock) => lock,
                Err(e) => {
                    tracing::debug!(
                        service,
                        error = %format_error_chain(&e),
                        "record busy; skipping sweep"
                    );
                    continue;
                }
            };

            let stale = match &stored {
                StoredRecord::Corrupt { reason, .. } => {
                    tracing::warn!(service, reason = %reason, "removing unreadable record");
                    true
                }
                StoredRecord::Valid(record) => !self.record_alive(record).await,
            };
            if stale {
                self.store
                    .remove(&service)
                    .await
                    .map_err(SupervisorError::store)?;
                tracing::info!(service, "swept stale record");
                swept.push(service);
            }
        }
        Ok(swept)
    }

    /// Verifies the environment before any service is touched.
    pub async fn check_prerequisites(&self) -> Result<(), SupervisorError> {
        if self.specs.iter().any(ServiceSpec::is_container) {
            self.containers.ensure_available().await.map_err(|e| {
                SupervisorError::PrerequisiteMissing {
                    what: "container runtime".to_string(),
                    reason: format_error_chain(&e),
                }
            })?;
        }

        for spec in &self.specs {
            let ServiceKind::Process(launch) = &spec.kind else {
                continue;
            };
            let program = resolve_program(launch);
            if !self.processes.program_available(&program) {
                return Err(SupervisorError::PrerequisiteMissing {
                    what: format!("{}: program `{}`", spec.name, launch.program),
                    reason: "not found on PATH".to_string(),
                });
            }
        }

        self.logs
            .ensure_dir()
            .await
            .map_err(|e| SupervisorError::PrerequisiteMissing {
                what: "log directory".to_string(),
                reason: format_error_chain(&e),
            })?;
        Ok(())
    }

    /// Last lines of a service log, or of the supervisor's own log.
    pub async fn tail(&self, service: &str, lines: usize) -> anyhow::Result<Vec<String>> {
        if service != SUPERVISOR_LOG && self.spec(service).is_none() {
            anyhow::bail!("unknown service `{service}`");
        }
        self.logs.tail(service, lines).await
    }

    /// Loads a record, treating an unreadable one as absent after removing it.
    async fn load_record(&self, service: &str) -> Result<Option<HandleRecord>, SupervisorError> {
        match self.store.load(service).await {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::warn!(
                    service,
                    error = %format_error_chain(&e),
                    "discarding unreadable record"
                );
                self.store
                    .remove(service)
                    .await
                    .map_err(SupervisorError::store)?;
                Ok(None)
            }
        }
    }

    async fn unit_alive(&self, spec: &ServiceSpec, liveness: &LivenessRef) -> bool {
        match (liveness, &spec.kind) {
            (LivenessRef::Pid(pid), _) => self.processes.is_alive(*pid),
            (LivenessRef::Container(_), ServiceKind::Container(container)) => self
                .containers
                .inspect(container)
                .await
                .ok()
                .flatten()
                .is_some_and(|info| info.running),
            (LivenessRef::Container(_), ServiceKind::Process(_)) => false,
        }
    }

    async fn unit_ready(&self, spec: &ServiceSpec, liveness: &LivenessRef) -> bool {
        match (liveness, &spec.kind) {
            (LivenessRef::Container(_), ServiceKind::Container(container)) => self
                .containers
                .inspect(container)
                .await
                .ok()
                .flatten()
                .is_some_and(|info| info.is_ready()),
            _ => self.unit_alive(spec, liveness).await,
        }
    }

    async fn record_alive(&self, record: &HandleRecord) -> bool {
        match &record.liveness {
            LivenessRef::Pid(pid) => self.processes.is_alive(*pid),
            LivenessRef::Container(id) => {
                let Some(ServiceKind::Container(container)) =
                    self.spec(&record.service).map(|s| &s.kind)
                else {
                    return false;
                };
                self.containers
                    .inspect(container)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|info| info.running && info.id == *id)
            }
        }
    }

    async fn probe_ready(&self, target: &ProbeTarget) -> bool {
        match target {
            ProbeTarget::None => true,
            target => self.probe.check(target).await,
        }
    }
}

/// Relative program paths are resolved against the launch directory.
fn resolve_program(launch: &ProcessLaunch) -> String {
    let program = Path::new(&launch.program);
    match &launch.cwd {
        Some(cwd) if program.is_relative() && program.components().count() > 1 => {
            cwd.join(program).display().to_string()
        }
        _ => launch.program.clone(),
    }
}
