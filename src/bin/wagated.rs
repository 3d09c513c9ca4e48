//! wagate daemon - HTTP gateway for a self-healing WhatsApp session
//!
//! Runs the session worker under a lifecycle supervisor and serves the
//! HTTP API in front of it.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! wagated start
//!
//! # Start the daemon (background/daemonized)
//! wagated start -d
//!
//! # Custom configuration file and port
//! wagated start --config /etc/wagate.toml --port 8080
//!
//! # Stop the daemon
//! wagated stop
//!
//! # Check daemon status
//! wagated status
//!
//! # Enable debug logging
//! RUST_LOG=wagated=debug wagated start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown (HTTP drain, worker teardown)

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wagated::client::{SessionClient, SidecarClient};
use wagated::config::Config;
use wagated::lifecycle::spawn_lifecycle;
use wagated::monitor::spawn_monitor_task;
use wagated::sender::GatedSender;
use wagated::server::{self, AppState};

/// wagate daemon - WhatsApp session gateway
#[derive(Parser, Debug)]
#[command(name = "wagated", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// TOML configuration file
        #[arg(short, long, env = "WAGATE_CONFIG")]
        config: Option<PathBuf>,

        /// HTTP port (overrides the file and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("wagate")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("wagated.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("wagated.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Returns the daemon's PID, removing a stale PID file.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let Ok(raw) = i32::try_from(pid) else {
            bail!("Invalid PID {pid}");
        };
        let result = unsafe { libc::kill(raw, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

/// File, then environment, then CLI flags.
fn load_config(path: Option<PathBuf>, port: Option<u16>) -> Result<Config> {
    let mut config = Config::load(path.as_deref()).context("Failed to load configuration")?;
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("Invalid environment override")?;
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
        port: None,
    });

    match command {
        Command::Start {
            daemon,
            config,
            port,
        } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'wagated stop' to stop it first.");
                process::exit(1);
            }

            let config = load_config(config, port)?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                // The worker gets a grace period, so allow a little longer.
                for _ in 0..100 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 10 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                println!("Log: {}", log_file_path().display());
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    // Relative auth and worker paths resolve against the launch directory.
    let cwd = std::env::current_dir().context("Failed to read working directory")?;

    Daemonize::new()
        .working_directory(cwd)
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wagated=info".parse()?)
                .add_directive("wagate_core=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        environment = %config.environment,
        auth_dir = %config.auth.dir.display(),
        "wagate daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let (client, client_events) = SidecarClient::new(config.worker.clone(), &config.auth);
    let client: Arc<dyn SessionClient> = Arc::new(client);

    let lifecycle = spawn_lifecycle(&config, Arc::clone(&client), client_events);
    let sender = GatedSender::new(Arc::clone(&client), lifecycle.clone());
    info!("Lifecycle manager started");

    let (memory, monitor_handle) = spawn_monitor_task(
        &config.monitor,
        config.reaper.process_names.clone(),
        cancel_token.clone(),
    );

    let addr = config.bind_addr();
    let listener = server::bind(&addr).await?;
    info!(
        url = %format!("http://localhost:{}", config.server.port),
        "Server is running"
    );

    // The HTTP API comes up first so /health answers during a slow login.
    let initial = lifecycle.clone();
    tokio::spawn(async move {
        match initial.request_initialize().await {
            Ok(outcome) => info!(outcome = ?outcome, "Initial initialization settled"),
            Err(e) => error!(error = %e, "Initial initialization request failed"),
        }
    });

    let state = AppState::new(lifecycle, sender, config.environment).with_memory(memory);
    let result = server::serve(listener, state, cancel_token.clone()).await;

    cancel_token.cancel();
    client.teardown().await;
    let _ = monitor_handle.await;

    info!("wagate daemon stopped");
    result.map_err(Into::into)
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
