#![forbid(unsafe_code)]

//! `euslime`: SWANK backend binary.
//!
//! Loads configuration, binds the editor listener, and serves SLIME
//! connections against a freshly spawned interpreter until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use euslime::config::GlobalConfig;
use euslime::interpreter::process::ProcessInterpreter;
use euslime::interpreter::{Interpreter, OutputSender};
use euslime::server::{self, InterpreterFactory, ServerContext};
use euslime::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "euslime", about = "SWANK backend for EusLisp", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the listen address.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port (0 picks a free port).
    #[arg(long)]
    port: Option<u16>,

    /// Write the bound port to this file.
    #[arg(long)]
    port_file: Option<PathBuf>,

    /// Override the interpreter executable.
    #[arg(long)]
    program: Option<String>,

    /// Override the interpreter init file.
    #[arg(long)]
    init_file: Option<PathBuf>,

    /// Keep serving after the first editor disconnects.
    #[arg(long)]
    dont_close: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("euslime bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(&args))
}

fn load_config(args: &Cli) -> Result<GlobalConfig> {
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    if let Some(ref host) = args.host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref path) = args.port_file {
        config.server.port_file = Some(path.clone());
    }
    if let Some(ref program) = args.program {
        config.interpreter.program.clone_from(program);
    }
    if let Some(ref path) = args.init_file {
        config.interpreter.init_file = Some(path.clone());
    }
    if args.dont_close {
        config.server.dont_close = true;
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: &Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = load_config(args)?;
    info!(program = %config.interpreter.program, "configuration loaded");

    // ── Bind listener ───────────────────────────────────
    let listener = server::bind(&config.server).await?;

    let process_config = config.process_config();
    let factory: InterpreterFactory = Arc::new(move |output: OutputSender| {
        Arc::new(ProcessInterpreter::new(process_config.clone(), output)) as Arc<dyn Interpreter>
    });
    let ctx = ServerContext {
        settings: config.session_settings(),
        factory,
        shutdown_grace: config.shutdown_grace(),
        dont_close: config.server.dont_close,
    };

    // ── Serve until shutdown ────────────────────────────
    let ct = CancellationToken::new();
    let mut server_handle = server::spawn_server(listener, ctx, ct.clone());

    let interrupted = tokio::select! {
        () = shutdown_signal() => true,
        joined = &mut server_handle => {
            if let Err(err) = joined {
                error!(%err, "server task failed");
            }
            false
        }
    };

    if interrupted {
        info!("shutdown signal received");
        ct.cancel();
        if let Err(err) = server_handle.await {
            error!(%err, "server task failed");
        }
    }

    info!("euslime stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
