use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

pub const SUPERVISOR_LOG: &str = "supervisor";
pub const DEFAULT_TAIL_LINES: usize = 50;
pub const MAX_TAIL_LINES: usize = 2000;

const TAIL_CHUNK_BYTES: u64 = 64 * 1024;
const MAX_TAIL_BYTES: u64 = 4 * 1024 * 1024;

/// One append-only log per service under a shared directory, plus `supervisor.log`.
#[derive(Debug, Clone)]
pub struct ServiceLogs {
    dir: PathBuf,
    max_bytes: u64,
    max_files: usize,
}

impl ServiceLogs {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
            max_files,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.log"))
    }

    pub async fn ensure_dir(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create log dir {}", self.dir.display()))
    }

    /// Readies the service log for a new launch, rotating it first when it has grown past
    /// the size limit. Returns the path the unit should append to.
    pub async fn prepare(&self, service: &str) -> anyhow::Result<PathBuf> {
        self.ensure_dir().await?;
        let path = self.path(service);
        let size = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if self.max_bytes > 0 && size > self.max_bytes {
            self.rotate(&path).await;
        }
        Ok(path)
    }

    async fn rotate(&self, path: &Path) {
        // Shift old rotations: .(n-1) -> .n
        for i in (1..self.max_files).rev() {
            let from = PathBuf::from(format!("{}.{}", path.display(), i));
            let to = PathBuf::from(format!("{}.{}", path.display(), i + 1));
            if tokio::fs::metadata(&from).await.is_ok() {
                let _ = tokio::fs::rename(from, to).await;
            }
        }

        // Current -> .1
        let rotated = PathBuf::from(format!("{}.1", path.display()));
        if tokio::fs::metadata(path).await.is_ok() {
            let _ = tokio::fs::rename(path, &rotated).await;
        }
    }

    /// Appends a supervisor marker line (`[devstack] ...`) to the service log.
    pub async fn mark(&self, service: &str, line: impl AsRef<str>) {
        if let Err(e) = self.append(service, line.as_ref()).await {
            tracing::debug!(service, error = %e, "could not write service log marker");
        }
    }

    async fn append(&self, service: &str, line: &str) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(service))
            .await?;
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        f.write_all(format!("[devstack] {stamp} {line}\n").as_bytes())
            .await?;
        Ok(())
    }

    /// Last `lines` lines of the named log, oldest first.
    pub async fn tail(&self, service: &str, lines: usize) -> anyhow::Result<Vec<String>> {
        let lines = lines.clamp(1, MAX_TAIL_LINES);
        let path = self.path(service);
        let mut f = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        let size = f.metadata().await?.len();

        // Grow the window from the end until it holds enough complete lines.
        let mut window = TAIL_CHUNK_BYTES.min(size);
        loop {
            let start = size - window;
            // One byte of lookbehind tells whether the window opens on a line boundary.
            let read_from = start.saturating_sub(1);
            f.seek(SeekFrom::Start(read_from)).await?;
            let mut buf = vec![0u8; (size - read_from) as usize];
            f.read_exact(&mut buf).await?;
            let on_boundary = start == 0 || buf[0] == b'\n';
            let body = if start == 0 { &buf[..] } else { &buf[1..] };

            let mut out = split_lines(body);
            if !on_boundary && !out.is_empty() {
                out.remove(0);
            }
            if out.len() >= lines || start == 0 || window >= MAX_TAIL_BYTES {
                if out.len() > lines {
                    out.drain(0..(out.len() - lines));
                }
                return Ok(out);
            }
            window = (window * 2).min(size).min(MAX_TAIL_BYTES);
        }
    }
}

fn split_lines(buf: &[u8]) -> Vec<String> {
    // Best-effort UTF-8: replace invalid sequences.
    let text = String::from_utf8_lossy(buf);
    let mut out: Vec<String> = text.lines().map(|l| l.to_string()).collect();
    if out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out
}
