use std::{process::Stdio, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use crate::spec::ContainerRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub running: bool,
    /// Docker healthcheck status when the image defines one.
    pub health: Option<String>,
}

impl ContainerInfo {
    /// Running, and healthy by its own healthcheck when it has one.
    pub fn is_ready(&self) -> bool {
        self.running && self.health.as_deref().is_none_or(|h| h == "healthy")
    }
}

/// Lifecycle delegate for external containers. The supervisor never manages container
/// internals; it only asks the runtime to start, stop and describe them.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ensure_available(&self) -> anyhow::Result<()>;

    /// Starts the container and returns its id.
    async fn start(&self, container: &ContainerRef) -> anyhow::Result<String>;

    async fn stop(&self, container: &ContainerRef, grace: Duration) -> anyhow::Result<()>;

    async fn kill(&self, container: &ContainerRef) -> anyhow::Result<()>;

    /// `None` when the container does not exist.
    async fn inspect(&self, container: &ContainerRef) -> anyhow::Result<Option<ContainerInfo>>;
}

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env_remove("DOCKER_API_VERSION")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, what: &str) -> anyhow::Result<String> {
        let out = cmd
            .output()
            .await
            .with_context(|| format!("run {} ({what})", self.binary))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            anyhow::bail!("{what} failed: {}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

const INSPECT_FORMAT: &str =
    "{{.Id}} {{.State.Running}} {{if .State.Health}}{{.State.Health.Status}}{{end}}";

fn parse_inspect(line: &str) -> Option<ContainerInfo> {
    let mut it = line.split_whitespace();
    let id = it.next()?.to_string();
    let running = it.next()? == "true";
    let health = it.next().map(str::to_string);
    Some(ContainerInfo {
        id,
        running,
        health,
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ensure_available(&self) -> anyhow::Result<()> {
        let mut cmd = self.command();
        cmd.arg("info").arg("--format").arg("{{.ServerVersion}}");
        let version = self.run(cmd, "docker info").await?;
        tracing::debug!(%version, "container runtime available");
        Ok(())
    }

    async fn start(&self, container: &ContainerRef) -> anyhow::Result<String> {
        let mut cmd = self.command();
        match &container.compose {
            Some(compose) => {
                cmd.arg("compose")
                    .arg("-f")
                    .arg(&compose.file)
                    .arg("up")
                    .arg("-d")
                    .arg(&compose.service);
                self.run(cmd, "docker compose up").await?;
            }
            None => {
                cmd.arg("start").arg(&container.name);
                self.run(cmd, "docker start").await?;
            }
        }

        let info = self
            .inspect(container)
            .await?
            .ok_or_else(|| anyhow::anyhow!("container {} not found after start", container.name))?;
        Ok(info.id)
    }

    async fn stop(&self, container: &ContainerRef, grace: Duration) -> anyhow::Result<()> {
        let secs = grace.as_secs().max(1).to_string();
        let mut cmd = self.command();
        match &container.compose {
            Some(compose) => {
                cmd.arg("compose")
                    .arg("-f")
                    .arg(&compose.file)
                    .arg("stop")
                    .arg("-t")
                    .arg(&secs)
                    .arg(&compose.service);
                self.run(cmd, "docker compose stop").await?;
            }
            None => {
                cmd.arg("stop").arg("-t").arg(&secs).arg(&container.name);
                self.run(cmd, "docker stop").await?;
            }
        }
        Ok(())
    }

    async fn kill(&self, container: &ContainerRef) -> anyhow::Result<()> {
        let mut cmd = self.command();
        cmd.arg("kill").arg(&container.name);
        self.run(cmd, "docker kill").await?;
        Ok(())
    }

    async fn inspect(&self, container: &ContainerRef) -> anyhow::Result<Option<ContainerInfo>> {
        let mut cmd = self.command();
        cmd.arg("inspect")
            .arg("--type")
            .arg("container")
            .arg("--format")
            .arg(INSPECT_FORMAT)
            .arg(&container.name);
        let out = cmd
            .output()
            .await
            .with_context(|| format!("run {} inspect", self.binary))?;
        if !out.status.success() {
            // Unknown container.
            return Ok(None);
        }
        Ok(parse_inspect(&String::from_utf8_lossy(&out.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inspect_with_and_without_health() {
        assert_eq!(
            parse_inspect("abc123 true healthy\n"),
            Some(ContainerInfo {
                id: "abc123".into(),
                running: true,
                health: Some("healthy".into()),
            })
        );
        assert_eq!(
            parse_inspect("abc123 false "),
            Some(ContainerInfo {
                id: "abc123".into(),
                running: false,
                health: None,
            })
        );
        assert_eq!(parse_inspect(""), None);
    }

    #[test]
    fn readiness_follows_the_healthcheck() {
        let info = |running: bool, health: Option<&str>| ContainerInfo {
            id: "abc".into(),
            running,
            health: health.map(str::to_string),
        };
        assert!(info(true, None).is_ready());
        assert!(info(true, Some("healthy")).is_ready());
        assert!(!info(true, Some("starting")).is_ready());
        assert!(!info(true, Some("unhealthy")).is_ready());
        assert!(!info(false, None).is_ready());
    }

    #[tokio::test]
    async fn missing_binary_is_reported_not_panicked() {
        let docker = DockerCli::new("/nonexistent/devstack-docker");
        let err = docker.ensure_available().await.unwrap_err();
        assert!(err.to_string().contains("docker info"));

        let c = ContainerRef {
            name: "db".into(),
            compose: None,
        };
        assert!(docker.inspect(&c).await.is_err());
    }
}
