//! Toolrun Gateway
//!
//! Serves the Control API and the event channel, and owns the orchestrator
//! for the lifetime of the process. On ctrl-c every active session is
//! stopped and its container removed before the process exits.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use toolrun::config::{self, Config, EngineKind};
use toolrun::gateway::build_router;
use toolrun::orchestrator::Orchestrator;
use toolrun::sandbox::create_engine;

#[derive(Parser)]
#[command(name = "toolrun-gateway", version, about = "Sandboxed tool execution gateway")]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(long, short, env = "TOOLRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides the config file)
    #[arg(long, short)]
    port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Run against the in-memory engine instead of Docker
    #[arg(long)]
    mock_engine: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,bollard=warn".into());
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            dotenvy::dotenv().ok();
            let mut config = config::load_config_from_path(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config::apply_env_overrides(&mut config);
            config
        }
        None => Config::from_env()?,
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.mock_engine {
        config.container.engine = EngineKind::Mock;
    }
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = load(&args)?;
    let validation = config::validate_config(&config);
    for issue in &validation.warnings {
        warn!("Config warning: {}", issue);
    }
    if !validation.valid {
        for issue in &validation.errors {
            error!("Config error: {}", issue);
        }
        anyhow::bail!("invalid configuration ({} errors)", validation.errors.len());
    }

    let engine = create_engine(&config.container).await?;
    info!("Using {} container engine", engine.name());

    let orchestrator = Arc::new(Orchestrator::new(engine, &config));
    match orchestrator.reap_orphans().await {
        Ok(0) => {}
        Ok(n) => info!("Removed {} containers left by a previous run", n),
        Err(e) => warn!("Orphan sweep failed: {}", e),
    }
    let janitor = orchestrator.spawn_janitor();

    let app = build_router(orchestrator.clone(), &config.server);
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Gateway listening on http://{}", addr);
    if config.server.websocket {
        info!("Event channel at ws://{}/ws", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.cleanup().await;
    janitor.abort();
    info!("Gateway shutdown complete");
    Ok(())
}
