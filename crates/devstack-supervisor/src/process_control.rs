use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use crate::spec::ProcessLaunch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Graceful,
    /// SIGKILL
    Forceful,
}

/// Launches managed processes and delivers signals to them.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Spawns `launch` detached from the supervisor, with stdout and stderr appended to
    /// `log_path`. Returns the pid, which is also the process group id.
    async fn spawn(
        &self,
        service: &str,
        launch: &ProcessLaunch,
        log_path: &Path,
    ) -> anyhow::Result<u32>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Signals the process group led by `pid`, or `pid` alone when it leads no group.
    /// A target that is already gone is not an error.
    fn signal(&self, pid: u32, signal: Signal) -> anyhow::Result<()>;

    /// Pid of the process listening on `port`, if it can be determined.
    async fn pid_on_port(&self, port: u16) -> Option<u32>;

    fn program_available(&self, program: &str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcesses;

#[async_trait]
impl ProcessControl for UnixProcesses {
    async fn spawn(
        &self,
        service: &str,
        launch: &ProcessLaunch,
        log_path: &Path,
    ) -> anyhow::Result<u32> {
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("open log {}", log_path.display()))?;
        let log_err = log.try_clone().context("clone log handle")?;

        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            // The unit must outlive this invocation; `devstack stop` ends it.
            .kill_on_drop(false);
        if let Some(cwd) = &launch.cwd {
            cmd.current_dir(cwd);
        }
        // New session: terminal Ctrl-C does not reach the services, the unit outlives the
        // controlling terminal and stop can signal the whole group.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn `{}` for {service}", launch.program))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("{service} exited before its pid was known"))?;

        // Reap the child if it exits while we are still running, otherwise it lingers as a
        // zombie and looks alive to kill(pid, 0).
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        pid_alive(pid)
    }

    fn signal(&self, pid: u32, signal: Signal) -> anyhow::Result<()> {
        send_signal(pid, signal)
    }

    async fn pid_on_port(&self, port: u16) -> Option<u32> {
        let out = Command::new("lsof")
            .arg("-t")
            .arg("-n")
            .arg("-P")
            .arg(format!("-iTCP:{port}"))
            .arg("-sTCP:LISTEN")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .ok()?;
        parse_lsof_pids(&String::from_utf8_lossy(&out.stdout))
            .into_iter()
            .find(|pid| *pid != std::process::id())
    }

    fn program_available(&self, program: &str) -> bool {
        find_program(program, std::env::var_os("PATH").as_deref()).is_some()
    }
}

#[cfg(unix)]
pub(crate) fn pid_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as i32, 0) };
    let exists = rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    exists && !is_zombie(pid)
}

#[cfg(not(unix))]
pub(crate) fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    proc_stat_state(&stat) == Some('Z')
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// State letter from a `/proc/<pid>/stat` line. The command name may contain spaces and
/// parentheses, so parse from the last `)`.
fn proc_stat_state(stat: &str) -> Option<char> {
    let end = stat.rfind(')')?;
    stat.get(end + 1..)?.split_whitespace().next()?.chars().next()
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> anyhow::Result<()> {
    if pid == 0 || pid > i32::MAX as u32 {
        anyhow::bail!("invalid pid {pid}");
    }
    let sig = match signal {
        Signal::Graceful => libc::SIGTERM,
        Signal::Forceful => libc::SIGKILL,
    };

    let rc = unsafe { libc::kill(-(pid as i32), sig) };
    if rc == 0 {
        return Ok(());
    }
    // Adopted units are usually not group leaders; fall back to the single process.
    let rc = unsafe { libc::kill(pid as i32, sig) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err).with_context(|| format!("kill({pid}, {sig})"))
}

#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: Signal) -> anyhow::Result<()> {
    anyhow::bail!("signals are not supported on this platform (pid {pid})")
}

fn parse_lsof_pids(out: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = out
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn find_program(program: &str, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(program);
        return p.is_file().then_some(p);
    }
    let path_var = path_var?;
    std::env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn proc_stat_state_handles_odd_names() {
        assert_eq!(proc_stat_state("42 (python3) S 1 42 42"), Some('S'));
        assert_eq!(proc_stat_state("42 (my (odd) name) Z 1 42"), Some('Z'));
        assert_eq!(proc_stat_state("garbage"), None);
    }

    #[test]
    fn lsof_output_is_deduplicated() {
        assert_eq!(parse_lsof_pids("123\n99\n123\n\nnot-a-pid\n"), vec![99, 123]);
        assert!(parse_lsof_pids("").is_empty());
    }

    #[test]
    fn find_program_searches_path() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("fake-tool");
        std::fs::write(&exe, b"#!/bin/sh\n").unwrap();

        let path = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(find_program("fake-tool", Some(&path)), Some(exe.clone()));
        assert_eq!(find_program("missing-tool", Some(&path)), None);
        assert_eq!(
            find_program(exe.to_str().unwrap(), None),
            Some(exe.clone())
        );
        assert_eq!(find_program("fake-tool", None), None);
    }

    #[test]
    fn signalling_a_dead_pid_is_ok() {
        // Max pid on Linux is far below this.
        assert!(!pid_alive(i32::MAX as u32 - 1));
        assert!(send_signal(i32::MAX as u32 - 1, Signal::Graceful).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_signal_and_reap() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sleeper.log");
        let launch = ProcessLaunch {
            program: "sh".into(),
            args: vec!["-c".into(), "echo started; exec sleep 30".into()],
            cwd: None,
            env: BTreeMap::new(),
        };

        let procs = UnixProcesses;
        let pid = procs.spawn("sleeper", &launch, &log).await.unwrap();
        assert!(procs.is_alive(pid));

        // Output is only guaranteed once the shell has run; SIGTERM before that loses it.
        let mut logged = false;
        for _ in 0..100 {
            let text = std::fs::read_to_string(&log).unwrap_or_default();
            if text.contains("started") {
                logged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(logged, "sleeper output never reached its log");

        procs.signal(pid, Signal::Graceful).unwrap();
        let mut alive = true;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if !procs.is_alive(pid) {
                alive = false;
                break;
            }
        }
        assert!(!alive, "sleeper should exit on SIGTERM");
    }
}
