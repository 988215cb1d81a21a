use std::fmt;

use chrono::{DateTime, Utc};

/// Identifies one launch of a service. A fresh id is minted per start attempt so a
/// record left behind by a crashed run can be told apart from the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Starting,
    Healthy,
    Unhealthy,
    Stopping,
    Stopped,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Starting => "starting",
            ServiceState::Healthy => "healthy",
            ServiceState::Unhealthy => "unhealthy",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to a running unit: an OS process (group leader) or a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessRef {
    Pid(u32),
    Container(String),
}

impl LivenessRef {
    pub fn pid(&self) -> Option<u32> {
        match self {
            LivenessRef::Pid(pid) => Some(*pid),
            LivenessRef::Container(_) => None,
        }
    }
}

impl fmt::Display for LivenessRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessRef::Pid(pid) => write!(f, "pid {pid}"),
            LivenessRef::Container(id) => write!(f, "container {id}"),
        }
    }
}

/// What the supervisor writes to stable storage for a managed process.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HandleRecord {
    pub run_id: RunId,
    pub service: String,
    pub liveness: LivenessRef,
    pub state: ServiceState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
}

impl HandleRecord {
    pub fn starting(service: impl Into<String>, liveness: LivenessRef) -> Self {
        Self {
            run_id: RunId::new(),
            service: service.into(),
            liveness,
            state: ServiceState::Starting,
            started_at: Utc::now(),
            command: Vec::new(),
            log_path: None,
        }
    }

    pub fn with_state(mut self, state: ServiceState) -> Self {
        self.state = state;
        self
    }
}

/// One row of the status report. Every field is an independent observation; nothing
/// here is copied from the persisted record except `recorded_state`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub kind: String,
    pub handle: Option<LivenessRef>,
    pub recorded_state: Option<ServiceState>,
    pub alive: bool,
    pub port: Option<u16>,
    pub port_listening: Option<bool>,
    pub ready: Option<bool>,
    pub state: ServiceState,
}

impl ServiceStatus {
    /// Derives the effective state from direct observations.
    ///
    /// `ready` is `None` when the service declares no readiness probe, in which case a
    /// live unit counts as healthy.
    pub fn derive_state(alive: bool, ready: Option<bool>) -> ServiceState {
        match (alive, ready) {
            (false, _) => ServiceState::Stopped,
            (true, Some(false)) => ServiceState::Unhealthy,
            (true, _) => ServiceState::Healthy,
        }
    }
}
