use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use devstack_process::HandleRecord;
use tokio::io::AsyncWriteExt;

/// A lock file without a readable holder pid is treated as in use until it is this old.
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(5);

/// A record as found on disk. Corrupt entries are surfaced instead of skipped so the
/// sweep can clean them up.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRecord {
    Valid(HandleRecord),
    Corrupt { service: String, reason: String },
}

impl StoredRecord {
    pub fn service(&self) -> &str {
        match self {
            StoredRecord::Valid(r) => &r.service,
            StoredRecord::Corrupt { service, .. } => service,
        }
    }
}

/// Exclusive access to one service's record. Released on drop.
#[derive(Debug)]
pub struct RecordLock {
    path: Option<PathBuf>,
}

impl RecordLock {
    pub fn unlocked() -> Self {
        Self { path: None }
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Persisted liveness references, one record per service name.
#[async_trait]
pub trait HandleStore: Send + Sync {
    async fn load(&self, service: &str) -> anyhow::Result<Option<HandleRecord>>;
    async fn save(&self, record: &HandleRecord) -> anyhow::Result<()>;
    async fn remove(&self, service: &str) -> anyhow::Result<()>;
    async fn list(&self) -> anyhow::Result<Vec<StoredRecord>>;
    async fn lock(&self, service: &str) -> anyhow::Result<RecordLock>;
}

/// `<dir>/<service>.json`, written atomically via a temp file and rename.
#[derive(Debug, Clone)]
pub struct FileHandleStore {
    dir: PathBuf,
}

impl FileHandleStore {
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create state dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.json"))
    }

    fn lock_path(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.lock"))
    }

    /// The pid is written to a private file first and hard-linked into place, so the lock
    /// file never exists without its holder.
    fn try_create_lock(path: &Path) -> std::io::Result<()> {
        let pid = std::process::id();
        let tmp = path.with_extension(format!("lock.{pid}"));
        std::fs::write(&tmp, format!("{pid}\n"))?;
        let linked = std::fs::hard_link(&tmp, path);
        let _ = std::fs::remove_file(&tmp);
        linked
    }
}

#[async_trait]
impl HandleStore for FileHandleStore {
    async fn load(&self, service: &str) -> anyhow::Result<Option<HandleRecord>> {
        let path = self.record_path(service);
        let data = match tokio::fs::read(&path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let record = serde_json::from_slice(&data)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &HandleRecord) -> anyhow::Result<()> {
        let path = self.record_path(&record.service);
        let tmp = self.dir.join(format!("{}.json.tmp", record.service));
        let data = serde_json::to_vec_pretty(record).context("serialize handle record")?;
        let mut f = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(&data)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        f.flush().await.ok();
        f.sync_all().await.ok();
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("persist {}", path.display()))?;
        Ok(())
    }

    async fn remove(&self, service: &str) -> anyhow::Result<()> {
        let path = self.record_path(service);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }

    async fn list(&self) -> anyhow::Result<Vec<StoredRecord>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("read state dir {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(service) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let service = service.to_string();
            match self.load(&service).await {
                Ok(Some(r)) => out.push(StoredRecord::Valid(r)),
                Ok(None) => {}
                Err(e) => out.push(StoredRecord::Corrupt {
                    service,
                    reason: crate::error::format_error_chain(&e),
                }),
            }
        }
        out.sort_by(|a, b| a.service().cmp(b.service()));
        Ok(out)
    }

    async fn lock(&self, service: &str) -> anyhow::Result<RecordLock> {
        let path = self.lock_path(service);
        // Two tries: the second one after clearing a lock whose holder has died.
        for _ in 0..2 {
            match Self::try_create_lock(&path) {
                Ok(()) => return Ok(RecordLock { path: Some(path) }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = std::fs::read_to_string(&path)
                        .ok()
                        .and_then(|s| s.trim().parse::<u32>().ok());
                    match holder {
                        Some(pid) if crate::process_control::pid_alive(pid) => {
                            anyhow::bail!("{service} is locked by another devstack (pid {pid})");
                        }
                        None if lock_age(&path).is_some_and(|age| age < UNREADABLE_LOCK_GRACE) => {
                            anyhow::bail!("{service} is being locked by another devstack");
                        }
                        _ => {
                            tracing::warn!(service, "removing stale lock {}", path.display());
                            let _ = std::fs::remove_file(&path);
                        }
                    }
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("create lock {}", path.display()));
                }
            }
        }
        anyhow::bail!("could not acquire lock {}", path.display())
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(modified.elapsed().unwrap_or(Duration::ZERO))
}
