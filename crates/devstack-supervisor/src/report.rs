use std::fmt::Write;

use devstack_process::ServiceStatus;

use crate::orchestrate::{ShutdownReport, StartupError, StartupReport};

fn yes_no(v: Option<bool>) -> &'static str {
    match v {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    }
}

pub fn render_status(rows: &[ServiceStatus]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} | {:<9} | {:<9} | {:<24} | {:<5} | {:<9} | {:<5}",
        "NAME", "KIND", "STATE", "HANDLE", "PORT", "LISTENING", "READY"
    );
    let _ = writeln!(
        out,
        "{:-<12}-+-{:-<9}-+-{:-<9}-+-{:-<24}-+-{:-<5}-+-{:-<9}-+-{:-<5}",
        "", "", "", "", "", "", ""
    );
    for row in rows {
        let handle = match (&row.handle, row.alive) {
            (Some(h), true) if row.kind == "process" && row.recorded_state.is_none() => {
                format!("{h} (unrecorded)")
            }
            (Some(h), true) => h.to_string(),
            (Some(h), false) => format!("{h} (dead)"),
            (None, _) => "-".to_string(),
        };
        let port = row.port.map_or_else(|| "-".to_string(), |p| p.to_string());
        let _ = writeln!(
            out,
            "{:<12} | {:<9} | {:<9} | {:<24} | {:<5} | {:<9} | {:<5}",
            row.name,
            row.kind,
            row.state.as_str(),
            handle,
            port,
            yes_no(row.port_listening),
            yes_no(row.ready),
        );
    }
    out
}

pub fn render_startup(result: &Result<StartupReport, StartupError>) -> String {
    let mut out = String::new();
    match result {
        Ok(report) => {
            for name in &report.already_running {
                let _ = writeln!(out, "{name}: already running");
            }
            for handle in &report.started {
                let _ = writeln!(
                    out,
                    "{}: {} ({})",
                    handle.spec_name, handle.state, handle.liveness
                );
            }
            let _ = writeln!(out, "startup complete");
        }
        Err(err) => {
            let _ = writeln!(out, "startup failed: {err}");
            let left = err.left_running();
            if !left.is_empty() {
                let _ = writeln!(out, "left running: {}", left.join(", "));
            }
        }
    }
    out
}

pub fn render_shutdown(report: &ShutdownReport) -> String {
    let mut out = String::new();
    for stopped in &report.stopped {
        let mut how = Vec::new();
        if stopped.forced {
            how.push("forced");
        }
        if stopped.adopted {
            how.push("adopted");
        }
        let suffix = if how.is_empty() {
            String::new()
        } else {
            format!(", {}", how.join(", "))
        };
        let _ = writeln!(out, "{}: stopped ({}{suffix})", stopped.service, stopped.liveness);
    }
    for name in &report.not_running {
        let _ = writeln!(out, "{name}: not running");
    }
    for err in &report.failures {
        let _ = writeln!(out, "{err}");
    }
    if !report.swept.is_empty() {
        let _ = writeln!(out, "swept stale records: {}", report.swept.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SupervisorError;
    use crate::supervisor::Stopped;
    use devstack_process::{LivenessRef, ServiceState};

    #[test]
    fn status_table_marks_dead_handles() {
        let rows = vec![
            ServiceStatus {
                name: "postgres".into(),
                kind: "container".into(),
                handle: Some(LivenessRef::Container("abc".into())),
                recorded_state: None,
                alive: true,
                port: Some(5433),
                port_listening: Some(true),
                ready: Some(true),
                state: ServiceState::Healthy,
            },
            ServiceStatus {
                name: "api".into(),
                kind: "process".into(),
                handle: Some(LivenessRef::Pid(77)),
                recorded_state: Some(ServiceState::Healthy),
                alive: false,
                port: Some(8000),
                port_listening: Some(false),
                ready: Some(false),
                state: ServiceState::Stopped,
            },
            ServiceStatus {
                name: "mlflow".into(),
                kind: "process".into(),
                handle: Some(LivenessRef::Pid(88)),
                recorded_state: None,
                alive: true,
                port: Some(5001),
                port_listening: Some(true),
                ready: Some(true),
                state: ServiceState::Healthy,
            },
        ];
        let text = render_status(&rows);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("NAME "));
        assert!(lines[2].contains("container abc"));
        assert!(lines[2].contains("healthy"));
        assert!(lines[3].contains("pid 77 (dead)"));
        assert!(lines[3].contains("stopped"));
        assert!(lines[4].contains("pid 88 (unrecorded)"));
    }

    #[test]
    fn shutdown_summary_lists_every_outcome() {
        let report = ShutdownReport {
            order: vec!["api".into(), "mlflow".into(), "postgres".into()],
            stopped: vec![Stopped {
                service: "api".into(),
                liveness: LivenessRef::Pid(10),
                forced: true,
                adopted: true,
            }],
            not_running: vec!["postgres".into()],
            failures: vec![SupervisorError::StopFailed {
                service: "mlflow".into(),
                liveness: LivenessRef::Pid(11),
            }],
            swept: vec!["mlflow".into()],
        };
        let text = render_shutdown(&report);
        assert_eq!(
            text,
            "api: stopped (pid 10, forced, adopted)\n\
             postgres: not running\n\
             mlflow: still alive after forceful stop (pid 11)\n\
             swept stale records: mlflow\n"
        );
    }

    #[test]
    fn startup_failure_names_survivors() {
        let err = StartupError::ServiceFailed {
            service: "mlflow".into(),
            attempts: 3,
            source: SupervisorError::StartupTimeout {
                service: "mlflow".into(),
                timeout: std::time::Duration::from_secs(10),
            },
            left_running: vec!["postgres".into()],
        };
        let text = render_startup(&Err(err));
        assert!(text.starts_with(
            "startup failed: mlflow: giving up after 3 attempt(s): mlflow: not ready within 10s\n"
        ));
        assert!(text.ends_with("left running: postgres\n"));
    }
}
