use std::{collections::BTreeMap, path::PathBuf, time::Duration};

/// Static declaration of one service, loaded once from config.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub kind: ServiceKind,
    pub readiness: Readiness,
    /// Port the service owns. Used for takeover on start and adoption on stop.
    pub port: Option<u16>,
    pub grace_period: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceKind {
    Process(ProcessLaunch),
    Container(ContainerRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessLaunch {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ProcessLaunch {
    pub fn argv(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + 1);
        out.push(self.program.clone());
        out.extend(self.args.iter().cloned());
        out
    }
}

/// An already-declared container. Startup is delegated to the container runtime, either
/// `docker start <name>` or `docker compose up -d <service>` when a compose file is given.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRef {
    pub name: String,
    pub compose: Option<ComposeRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposeRef {
    pub file: PathBuf,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Readiness {
    pub target: ProbeTarget,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    Tcp { host: String, port: u16 },
    Http { url: String, port: u16 },
    None,
}

impl ProbeTarget {
    pub fn port(&self) -> Option<u16> {
        match self {
            ProbeTarget::Tcp { port, .. } | ProbeTarget::Http { port, .. } => Some(*port),
            ProbeTarget::None => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ProbeTarget::Tcp { host, port } => format!("tcp {host}:{port}"),
            ProbeTarget::Http { url, .. } => format!("http {url}"),
            ProbeTarget::None => "none".to_string(),
        }
    }
}

impl ServiceSpec {
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            ServiceKind::Process(_) => "process",
            ServiceKind::Container(_) => "container",
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, ServiceKind::Container(_))
    }
}

/// Timing and retry knobs shared by every service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorPolicy {
    pub poll_interval: Duration,
    pub start_attempts: u32,
    pub retry_backoff: Duration,
    pub grace_period: Duration,
    pub kill_wait: Duration,
    pub probe_timeout: Duration,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            start_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            grace_period: Duration::from_secs(10),
            kill_wait: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(2),
        }
    }
}
