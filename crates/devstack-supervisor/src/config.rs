use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::SupervisorError;
use crate::spec::{
    ComposeRef, ContainerRef, ProbeTarget, ProcessLaunch, Readiness, ServiceKind, ServiceSpec,
    SupervisorPolicy,
};

pub const DEFAULT_CONFIG_FILE: &str = "devstack.toml";

const DEFAULT_STATE_DIR: &str = ".devstack/run";
const DEFAULT_LOG_DIR: &str = ".devstack/logs";
const DEFAULT_LOG_FILE_MAX_BYTES: u64 = 10 * 1024 * 1024; // 10 MiB
const DEFAULT_LOG_FILE_MAX_FILES: usize = 3;
const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 30;

/// Fully resolved configuration: file values, then env overrides, then validation.
#[derive(Debug, Clone)]
pub struct Config {
    pub policy: SupervisorPolicy,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file_max_bytes: u64,
    pub log_file_max_files: usize,
    pub docker_binary: String,
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    supervisor: SupervisorSection,
    #[serde(default, rename = "service")]
    services: Vec<ServiceSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SupervisorSection {
    poll_interval_ms: Option<u64>,
    start_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
    grace_period_ms: Option<u64>,
    kill_wait_ms: Option<u64>,
    probe_timeout_ms: Option<u64>,
    state_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    log_file_max_bytes: Option<u64>,
    log_file_max_files: Option<usize>,
    docker_binary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum KindName {
    Process,
    Container,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceSection {
    name: String,
    kind: KindName,
    #[serde(default)]
    command: Vec<String>,
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    container: Option<String>,
    compose_file: Option<PathBuf>,
    compose_service: Option<String>,
    readiness: Option<ReadinessSection>,
    port: Option<u16>,
    grace_period_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadinessSection {
    probe: String,
    host: Option<String>,
    port: Option<u16>,
    url: Option<String>,
    timeout_secs: Option<u64>,
}

fn config_err(msg: impl Into<String>) -> SupervisorError {
    SupervisorError::Config(msg.into())
}

fn parse_u64(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    lookup(name).and_then(|v| v.trim().parse::<u64>().ok())
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

impl Config {
    /// Loads `path`, or `devstack.toml` in the working directory, or falls back to the
    /// reference stack when neither exists. Env overrides are read from the process.
    pub fn load(path: Option<&Path>) -> Result<Self, SupervisorError> {
        let lookup = |k: &str| std::env::var(k).ok();
        match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| config_err(format!("read {}: {e}", p.display())))?;
                Self::parse(&raw, &lookup)
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    let raw = std::fs::read_to_string(default)
                        .map_err(|e| config_err(format!("read {}: {e}", default.display())))?;
                    Self::parse(&raw, &lookup)
                } else {
                    tracing::debug!("no {DEFAULT_CONFIG_FILE} found; using reference stack");
                    Self::parse(REFERENCE_STACK, &lookup)
                }
            }
        }
    }

    pub fn parse(
        raw: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, SupervisorError> {
        let file: FileConfig = toml::from_str(raw).map_err(|e| config_err(e.to_string()))?;
        if file.services.is_empty() {
            return Err(config_err("at least one [[service]] must be declared"));
        }

        let sup = file.supervisor;
        let defaults = SupervisorPolicy::default();

        // File values first, env wins, then clamp to sane bounds.
        let poll_interval_ms = parse_u64(lookup, "DEVSTACK_POLL_INTERVAL_MS")
            .or(sup.poll_interval_ms)
            .unwrap_or(defaults.poll_interval.as_millis() as u64)
            .clamp(50, 60_000);
        let start_attempts = parse_u64(lookup, "DEVSTACK_START_ATTEMPTS")
            .map(|v| v.min(u32::MAX as u64) as u32)
            .or(sup.start_attempts)
            .unwrap_or(defaults.start_attempts)
            .clamp(1, 100);
        let retry_backoff_ms = parse_u64(lookup, "DEVSTACK_RETRY_BACKOFF_MS")
            .or(sup.retry_backoff_ms)
            .unwrap_or(defaults.retry_backoff.as_millis() as u64)
            .clamp(0, 10 * 60 * 1000);
        let grace_period_ms = parse_u64(lookup, "DEVSTACK_GRACE_PERIOD_MS")
            .or(sup.grace_period_ms)
            .unwrap_or(defaults.grace_period.as_millis() as u64)
            .clamp(0, 10 * 60 * 1000);
        let kill_wait_ms = parse_u64(lookup, "DEVSTACK_KILL_WAIT_MS")
            .or(sup.kill_wait_ms)
            .unwrap_or(defaults.kill_wait.as_millis() as u64)
            .clamp(100, 60_000);
        let probe_timeout_ms = parse_u64(lookup, "DEVSTACK_PROBE_TIMEOUT_MS")
            .or(sup.probe_timeout_ms)
            .unwrap_or(defaults.probe_timeout.as_millis() as u64)
            .clamp(100, 60_000);
        let log_file_max_bytes = parse_u64(lookup, "DEVSTACK_LOG_FILE_MAX_BYTES")
            .or(sup.log_file_max_bytes)
            .unwrap_or(DEFAULT_LOG_FILE_MAX_BYTES)
            .clamp(256 * 1024, 1024 * 1024 * 1024);
        let log_file_max_files = parse_u64(lookup, "DEVSTACK_LOG_FILE_MAX_FILES")
            .map(|v| v as usize)
            .or(sup.log_file_max_files)
            .unwrap_or(DEFAULT_LOG_FILE_MAX_FILES)
            .clamp(1, 20);

        let state_dir = lookup("DEVSTACK_STATE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or(sup.state_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        let log_dir = lookup("DEVSTACK_LOG_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or(sup.log_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));

        let policy = SupervisorPolicy {
            poll_interval: ms(poll_interval_ms),
            start_attempts,
            retry_backoff: ms(retry_backoff_ms),
            grace_period: ms(grace_period_ms),
            kill_wait: ms(kill_wait_ms),
            probe_timeout: ms(probe_timeout_ms),
        };

        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(file.services.len());
        for section in file.services {
            let spec = resolve_service(section, &policy)?;
            if !seen.insert(spec.name.clone()) {
                return Err(config_err(format!("duplicate service name: {}", spec.name)));
            }
            services.push(spec);
        }

        Ok(Self {
            policy,
            state_dir,
            log_dir,
            log_file_max_bytes,
            log_file_max_files,
            docker_binary: sup.docker_binary.unwrap_or_else(|| "docker".to_string()),
            services,
        })
    }
}

fn resolve_service(
    s: ServiceSection,
    policy: &SupervisorPolicy,
) -> Result<ServiceSpec, SupervisorError> {
    let name = s.name.trim().to_string();
    if name.is_empty() {
        return Err(config_err("service name must be non-empty"));
    }
    // Names become file names in the state and log directories.
    if name == "supervisor"
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(config_err(format!(
            "{name}: service names use [A-Za-z0-9_-] and cannot be `supervisor`"
        )));
    }

    let kind = match s.kind {
        KindName::Process => {
            let mut argv = s.command.into_iter();
            let program = argv
                .next()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| config_err(format!("{name}: process needs a non-empty command")))?;
            ServiceKind::Process(ProcessLaunch {
                program,
                args: argv.collect(),
                cwd: s.cwd,
                env: s.env,
            })
        }
        KindName::Container => {
            let container = s
                .container
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| config_err(format!("{name}: container needs `container`")))?;
            let compose = match (s.compose_file, s.compose_service) {
                (Some(file), Some(service)) => Some(ComposeRef { file, service }),
                (None, None) => None,
                _ => {
                    return Err(config_err(format!(
                        "{name}: compose_file and compose_service go together"
                    )));
                }
            };
            ServiceKind::Container(ContainerRef {
                name: container,
                compose,
            })
        }
    };

    let readiness = match s.readiness {
        None => Readiness {
            target: ProbeTarget::None,
            timeout: Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS),
        },
        Some(r) => resolve_readiness(&name, r)?,
    };

    let port = s.port.or_else(|| readiness.target.port());

    Ok(ServiceSpec {
        name,
        kind,
        readiness,
        port,
        grace_period: s.grace_period_ms.map(ms).unwrap_or(policy.grace_period),
    })
}

fn resolve_readiness(name: &str, r: ReadinessSection) -> Result<Readiness, SupervisorError> {
    let timeout_secs = r.timeout_secs.unwrap_or(DEFAULT_READINESS_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(config_err(format!("{name}: readiness timeout must be > 0")));
    }

    let target = match r.probe.trim().to_ascii_lowercase().as_str() {
        "tcp" => {
            let port = r
                .port
                .filter(|p| *p != 0)
                .ok_or_else(|| config_err(format!("{name}: tcp probe needs a port")))?;
            ProbeTarget::Tcp {
                host: r.host.unwrap_or_else(|| "127.0.0.1".to_string()),
                port,
            }
        }
        "http" => {
            let url = r
                .url
                .ok_or_else(|| config_err(format!("{name}: http probe needs a url")))?;
            let parsed = reqwest::Url::parse(&url)
                .map_err(|e| config_err(format!("{name}: invalid url {url}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(config_err(format!("{name}: url must be http(s): {url}")));
            }
            let port = parsed
                .port_or_known_default()
                .ok_or_else(|| config_err(format!("{name}: url has no port: {url}")))?;
            ProbeTarget::Http { url, port }
        }
        "none" => ProbeTarget::None,
        other => {
            return Err(config_err(format!(
                "{name}: unknown probe `{other}` (expected tcp, http or none)"
            )));
        }
    };

    Ok(Readiness {
        target,
        timeout: Duration::from_secs(timeout_secs),
    })
}

/// The stack this tool was written for: database container, experiment tracker, API.
pub const REFERENCE_STACK: &str = r#"
[[service]]
name = "postgres"
kind = "container"
container = "mlops-postgres"
compose_file = "docker/docker-compose.yml"
compose_service = "postgres"
readiness = { probe = "tcp", port = 5433, timeout_secs = 30 }

[[service]]
name = "mlflow"
kind = "process"
command = ["mlflow", "server", "--host", "127.0.0.1", "--port", "5001", "--backend-store-uri", "sqlite:///mlflow.db"]
readiness = { probe = "tcp", port = 5001, timeout_secs = 10 }

[[service]]
name = "api"
kind = "process"
command = ["uvicorn", "app.main:app", "--host", "127.0.0.1", "--port", "8000"]
cwd = "backend"
readiness = { probe = "http", url = "http://127.0.0.1:8000/health", timeout_secs = 10 }
"#;
