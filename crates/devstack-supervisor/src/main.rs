use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use devstack_supervisor::{
    CancelFlag, Collaborators, Supervisor,
    clock::TokioClock,
    config::Config,
    container::DockerCli,
    error::format_error_chain,
    logs::{DEFAULT_TAIL_LINES, ServiceLogs},
    probe::NetProbe,
    process_control::UnixProcesses,
    report,
    store::FileHandleStore,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "devstack", version)]
#[command(about = "Start, stop and inspect the local development stack")]
struct Cli {
    /// Stack declaration. Defaults to ./devstack.toml, then the built-in stack.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every service in declared order
    Start,
    /// Stop every service in reverse order
    Stop,
    /// Report what is running (never changes anything)
    Status {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Stop, then start if every stop succeeded
    Restart,
    /// Print the tail of a service log (or `supervisor`)
    Logs {
        service: String,
        /// Number of lines
        #[arg(short = 'n', long, default_value_t = DEFAULT_TAIL_LINES)]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("devstack: {e}");
            return ExitCode::from(2);
        }
    };
    let _log_guard = init_tracing(&config.log_dir);

    let supervisor = match build_supervisor(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("devstack: {}", format_error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Start => {
            let cancel = cancel_on_interrupt();
            let result = supervisor.start_all(&cancel).await;
            let text = report::render_startup(&result);
            match result {
                Ok(_) => {
                    print!("{text}");
                    ExitCode::SUCCESS
                }
                Err(_) => {
                    eprint!("{text}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Stop => {
            let shutdown = supervisor.stop_all().await;
            print!("{}", report::render_shutdown(&shutdown));
            exit_code(shutdown.is_success())
        }
        Commands::Status { json } => {
            let rows = supervisor.status().await;
            if json {
                match serde_json::to_string_pretty(&rows) {
                    Ok(s) => println!("{s}"),
                    Err(e) => eprintln!("devstack: encode status: {e}"),
                }
            } else {
                print!("{}", report::render_status(&rows));
            }
            ExitCode::SUCCESS
        }
        Commands::Restart => {
            let cancel = cancel_on_interrupt();
            let restart = supervisor.restart(&cancel).await;
            print!("{}", report::render_shutdown(&restart.shutdown));
            match &restart.startup {
                Some(result) => print!("{}", report::render_startup(result)),
                None => eprintln!("devstack: not starting: some services could not be stopped"),
            }
            exit_code(restart.is_success())
        }
        Commands::Logs { service, lines } => match supervisor.tail(&service, lines).await {
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("devstack: {}", format_error_chain(&e));
                ExitCode::FAILURE
            }
        },
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// stderr plus `<log_dir>/supervisor.log`. The file layer is skipped when the directory
/// cannot be created; the prerequisite check reports that case.
fn init_tracing(log_dir: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(log_dir, "supervisor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn build_supervisor(config: &Config) -> anyhow::Result<Supervisor> {
    let store = FileHandleStore::open(&config.state_dir)?;
    let probe = NetProbe::new(config.policy.probe_timeout)?;
    let logs = ServiceLogs::new(
        &config.log_dir,
        config.log_file_max_bytes,
        config.log_file_max_files,
    );
    Ok(Supervisor::new(
        config.services.clone(),
        config.policy,
        logs,
        Collaborators {
            store: Arc::new(store),
            processes: Arc::new(UnixProcesses),
            containers: Arc::new(DockerCli::new(&config.docker_binary)),
            probe: Arc::new(probe),
            clock: Arc::new(TokioClock),
        },
    ))
}

/// Ctrl-C stops the startup sequence after the step in flight. Managed units run in
/// their own sessions and never see the terminal's SIGINT.
fn cancel_on_interrupt() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing the current step");
            flag.cancel();
        }
    });
    cancel
}
