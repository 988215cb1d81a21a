//! In-memory stand-ins for the supervisor's collaborators.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use devstack_process::HandleRecord;

use crate::clock::Clock;
use crate::container::{ContainerInfo, ContainerRuntime};
use crate::logs::ServiceLogs;
use crate::probe::Probe;
use crate::process_control::{ProcessControl, Signal};
use crate::spec::{
    ContainerRef, ProbeTarget, ProcessLaunch, Readiness, ServiceKind, ServiceSpec,
    SupervisorPolicy,
};
use crate::store::{HandleStore, RecordLock, StoredRecord};
use crate::supervisor::{Collaborators, Supervisor};

pub struct FakeClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, HandleRecord>>,
}

impl MemoryStore {
    pub fn names(&self) -> Vec<String> {
        self.records.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl HandleStore for MemoryStore {
    async fn load(&self, service: &str) -> anyhow::Result<Option<HandleRecord>> {
        Ok(self.records.lock().unwrap().get(service).cloned())
    }

    async fn save(&self, record: &HandleRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.service.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, service: &str) -> anyhow::Result<()> {
        self.records.lock().unwrap().remove(service);
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<StoredRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .cloned()
            .map(StoredRecord::Valid)
            .collect())
    }

    async fn lock(&self, _service: &str) -> anyhow::Result<RecordLock> {
        Ok(RecordLock::unlocked())
    }
}

/// How a fake unit reacts to being launched and signalled.
#[derive(Debug, Clone, Copy)]
pub struct Behavior {
    /// Probe checks before the unit starts listening. `None` never listens.
    pub ready_after: Option<u32>,
    pub exits_immediately: bool,
    pub ignores_term: bool,
    pub unkillable: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            ready_after: Some(0),
            exits_immediately: false,
            ignores_term: false,
            unkillable: false,
        }
    }
}

#[derive(Debug)]
struct FakeProc {
    service: String,
    alive: bool,
    ignores_term: bool,
    unkillable: bool,
}

#[derive(Debug)]
struct FakeContainer {
    id: String,
    running: bool,
}

#[derive(Debug, Default)]
struct World {
    next_pid: u32,
    procs: HashMap<u32, FakeProc>,
    containers: HashMap<String, FakeContainer>,
    behaviors: HashMap<String, Behavior>,
    ports: HashMap<String, u16>,
    /// port -> pid (0 for containers)
    listening: HashMap<u16, u32>,
    pending: HashMap<String, u32>,
    events: Vec<String>,
    docker_missing: bool,
    missing_programs: HashSet<String>,
    container_stop_ignored: HashSet<String>,
    container_health: HashMap<String, String>,
}

/// One shared fake machine: processes, containers and the network they listen on.
#[derive(Debug, Default)]
pub struct FakeWorld {
    inner: Mutex<World>,
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(World {
                next_pid: 1000,
                ..Default::default()
            }),
        })
    }

    pub fn set_behavior(&self, service: &str, behavior: Behavior) {
        self.inner
            .lock()
            .unwrap()
            .behaviors
            .insert(service.to_string(), behavior);
    }

    pub fn register_port(&self, service: &str, port: u16) {
        self.inner
            .lock()
            .unwrap()
            .ports
            .insert(service.to_string(), port);
    }

    pub fn set_docker_missing(&self) {
        self.inner.lock().unwrap().docker_missing = true;
    }

    pub fn set_program_missing(&self, program: &str) {
        self.inner
            .lock()
            .unwrap()
            .missing_programs
            .insert(program.to_string());
    }

    pub fn ignore_container_stop(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .container_stop_ignored
            .insert(name.to_string());
    }

    /// Healthcheck status reported by `inspect` for the named container.
    pub fn set_container_health(&self, name: &str, health: &str) {
        self.inner
            .lock()
            .unwrap()
            .container_health
            .insert(name.to_string(), health.to_string());
    }

    /// Something listens on `port` but its owner cannot be identified.
    pub fn occupy_port_anonymously(&self, port: u16) {
        self.inner.lock().unwrap().listening.insert(port, 0);
    }

    /// A live process that nobody recorded, listening on `port`.
    pub fn spawn_orphan(&self, service: &str, port: u16, behavior: Behavior) -> u32 {
        let mut w = self.inner.lock().unwrap();
        w.next_pid += 1;
        let pid = w.next_pid;
        w.procs.insert(
            pid,
            FakeProc {
                service: service.to_string(),
                alive: true,
                ignores_term: behavior.ignores_term,
                unkillable: behavior.unkillable,
            },
        );
        w.listening.insert(port, pid);
        pid
    }

    pub fn events(&self) -> Vec<String> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn alive(&self, pid: u32) -> bool {
        self.inner
            .lock()
            .unwrap()
            .procs
            .get(&pid)
            .is_some_and(|p| p.alive)
    }

    pub fn container_running(&self, name: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .containers
            .get(name)
            .is_some_and(|c| c.running)
    }

    /// The unit stays alive but stops accepting connections.
    pub fn drop_listener(&self, port: u16) {
        self.inner.lock().unwrap().listening.remove(&port);
    }

    pub fn kill_silently(&self, pid: u32) {
        let mut w = self.inner.lock().unwrap();
        if let Some(p) = w.procs.get_mut(&pid) {
            p.alive = false;
        }
        w.listening.retain(|_, owner| *owner != pid);
    }

    fn launch(w: &mut World, service: &str) -> Behavior {
        let behavior = w.behaviors.get(service).copied().unwrap_or_default();
        if let Some(n) = behavior.ready_after {
            w.pending.insert(service.to_string(), n);
        } else {
            w.pending.remove(service);
        }
        behavior
    }
}

#[async_trait]
impl ProcessControl for FakeWorld {
    async fn spawn(
        &self,
        service: &str,
        _launch: &ProcessLaunch,
        _log_path: &Path,
    ) -> anyhow::Result<u32> {
        let mut w = self.inner.lock().unwrap();
        w.events.push(format!("spawn {service}"));
        let behavior = Self::launch(&mut w, service);
        w.next_pid += 1;
        let pid = w.next_pid;
        w.procs.insert(
            pid,
            FakeProc {
                service: service.to_string(),
                alive: !behavior.exits_immediately,
                ignores_term: behavior.ignores_term,
                unkillable: behavior.unkillable,
            },
        );
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.alive(pid)
    }

    fn signal(&self, pid: u32, signal: Signal) -> anyhow::Result<()> {
        let mut w = self.inner.lock().unwrap();
        let Some(p) = w.procs.get_mut(&pid) else {
            return Ok(());
        };
        let label = match signal {
            Signal::Graceful => "term",
            Signal::Forceful => "kill",
        };
        let event = format!("{label} {}", p.service);
        let dies = match signal {
            Signal::Graceful => !p.ignores_term,
            Signal::Forceful => !p.unkillable,
        };
        if dies {
            p.alive = false;
        }
        w.events.push(event);
        if dies {
            w.listening.retain(|_, owner| *owner != pid);
        }
        Ok(())
    }

    async fn pid_on_port(&self, port: u16) -> Option<u32> {
        self.inner
            .lock()
            .unwrap()
            .listening
            .get(&port)
            .copied()
            .filter(|pid| *pid != 0)
    }

    fn program_available(&self, program: &str) -> bool {
        !self
            .inner
            .lock()
            .unwrap()
            .missing_programs
            .contains(program)
    }
}

#[async_trait]
impl ContainerRuntime for FakeWorld {
    async fn ensure_available(&self) -> anyhow::Result<()> {
        if self.inner.lock().unwrap().docker_missing {
            anyhow::bail!("Cannot connect to the Docker daemon");
        }
        Ok(())
    }

    async fn start(&self, container: &ContainerRef) -> anyhow::Result<String> {
        let mut w = self.inner.lock().unwrap();
        w.events.push(format!("container-start {}", container.name));
        Self::launch(&mut w, &container.name);
        let id = format!("c-{}", container.name);
        w.containers.insert(
            container.name.clone(),
            FakeContainer {
                id: id.clone(),
                running: true,
            },
        );
        Ok(id)
    }

    async fn stop(&self, container: &ContainerRef, _grace: Duration) -> anyhow::Result<()> {
        let mut w = self.inner.lock().unwrap();
        w.events.push(format!("container-stop {}", container.name));
        if w.container_stop_ignored.contains(&container.name) {
            return Ok(());
        }
        if let Some(c) = w.containers.get_mut(&container.name) {
            c.running = false;
        }
        if let Some(port) = w.ports.get(&container.name).copied() {
            w.listening.remove(&port);
        }
        Ok(())
    }

    async fn kill(&self, container: &ContainerRef) -> anyhow::Result<()> {
        let mut w = self.inner.lock().unwrap();
        w.events.push(format!("container-kill {}", container.name));
        if w.container_stop_ignored.contains(&container.name) {
            return Ok(());
        }
        if let Some(c) = w.containers.get_mut(&container.name) {
            c.running = false;
        }
        if let Some(port) = w.ports.get(&container.name).copied() {
            w.listening.remove(&port);
        }
        Ok(())
    }

    async fn inspect(&self, container: &ContainerRef) -> anyhow::Result<Option<ContainerInfo>> {
        let w = self.inner.lock().unwrap();
        Ok(w.containers.get(&container.name).map(|c| ContainerInfo {
            id: c.id.clone(),
            running: c.running,
            health: w.container_health.get(&container.name).cloned(),
        }))
    }
}

#[async_trait]
impl Probe for FakeWorld {
    async fn check(&self, target: &ProbeTarget) -> bool {
        let Some(port) = target.port() else {
            return true;
        };
        let mut w = self.inner.lock().unwrap();
        if w.listening.contains_key(&port) {
            return true;
        }

        // Advance whichever live unit is due to bind this port.
        let Some(service) = w
            .ports
            .iter()
            .find(|(_, p)| **p == port)
            .map(|(s, _)| s.clone())
        else {
            return false;
        };
        let owner = w
            .procs
            .iter()
            .find(|(_, p)| p.service == service && p.alive)
            .map(|(pid, _)| *pid)
            .or_else(|| {
                w.containers
                    .get(&service)
                    .filter(|c| c.running)
                    .map(|_| 0)
            });
        let Some(owner) = owner else {
            return false;
        };
        let Some(remaining) = w.pending.get_mut(&service) else {
            return false;
        };
        if *remaining > 0 {
            *remaining -= 1;
            return false;
        }
        w.pending.remove(&service);
        w.listening.insert(port, owner);
        true
    }

    async fn port_listening(&self, port: u16) -> bool {
        self.inner.lock().unwrap().listening.contains_key(&port)
    }
}

pub fn process_spec(name: &str, port: u16, timeout_secs: u64) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        kind: ServiceKind::Process(ProcessLaunch {
            program: format!("{name}-bin"),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }),
        readiness: Readiness {
            target: ProbeTarget::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            },
            timeout: Duration::from_secs(timeout_secs),
        },
        port: Some(port),
        grace_period: Duration::from_secs(10),
    }
}

pub fn http_spec(name: &str, port: u16, timeout_secs: u64) -> ServiceSpec {
    let mut spec = process_spec(name, port, timeout_secs);
    spec.readiness.target = ProbeTarget::Http {
        url: format!("http://127.0.0.1:{port}/health"),
        port,
    };
    spec
}

pub fn container_spec(name: &str, port: u16, timeout_secs: u64) -> ServiceSpec {
    let mut spec = process_spec(name, port, timeout_secs);
    spec.kind = ServiceKind::Container(ContainerRef {
        name: name.to_string(),
        compose: None,
    });
    spec
}

pub struct Harness {
    pub world: Arc<FakeWorld>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FakeClock>,
    pub supervisor: Supervisor,
    pub _log_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(specs: Vec<ServiceSpec>) -> Self {
        let world = FakeWorld::new();
        for s in &specs {
            if let Some(port) = s.port {
                world.register_port(&s.name, port);
            }
        }
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FakeClock::new());
        let log_dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(
            specs,
            SupervisorPolicy::default(),
            ServiceLogs::new(log_dir.path(), 0, 1),
            Collaborators {
                store: store.clone(),
                processes: world.clone(),
                containers: world.clone(),
                probe: world.clone(),
                clock: clock.clone(),
            },
        );
        Self {
            world,
            store,
            clock,
            supervisor,
            _log_dir: log_dir,
        }
    }

    pub fn spec(&self, name: &str) -> ServiceSpec {
        self.supervisor.spec(name).cloned().unwrap()
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.supervisor.logs().path(name)
    }
}
