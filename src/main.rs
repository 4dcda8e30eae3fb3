use claude_bridge::config::config_search_paths;
use claude_bridge::{build_router, AppState, ProxyConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-bridge",
    about = "Serve the Claude Messages API on top of an OpenAI-compatible backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config and HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request log file (JSONL)
    #[arg(long, default_value = "claude-bridge.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    if config.resolve_api_key().is_none() {
        warn!(
            env = %config.provider.api_key_env,
            "No provider API key set; relying on caller credentials"
        );
    }

    info!("claude-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Base URL:  {}", config.provider.base_url);
    if let Some(ref version) = config.provider.api_version {
        info!("  API version: {}", version);
    }
    info!(
        "  Models:    big={} middle={} small={}",
        config.models.big,
        config.models.effective_middle(),
        config.models.small
    );
    info!("  max_tokens limit: {}", config.limits.max_tokens_limit);
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting claude-bridge base_url={} port={}",
            config.provider.base_url, config.port
        ),
    );

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, logger));
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://{} claude", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
