use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tubecast::api::{self, AppState};
use tubecast::config::Config;
use tubecast::feed::build_feed;
use tubecast::pipeline::YtDlp;
use tubecast::refresh::{is_due, Coordinator, RefreshSettings, RunState, Scheduler, SystemClock};
use tubecast::storage::Database;
use tubecast::util::format_duration;

#[derive(Parser, Debug)]
#[command(name = "tubecast", about = "Video channels as podcast feeds")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "FILE", default_value = "appdata/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and the HTTP API (default)
    Serve,
    /// Run one refresh and exit
    Refresh {
        /// Refresh only this channel
        #[arg(long, value_name = "NAME")]
        channel: Option<String>,
    },
    /// Print a channel's feed document
    Feed { name: String },
    /// List channels and whether they are due
    Channels,
}

async fn build_coordinator(config: &Config) -> Result<Arc<Coordinator>> {
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory '{}'",
            config.data_dir.display()
        )
    })?;

    let db_path = config.database_path();
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = Database::open(db_path_str)
        .await
        .with_context(|| format!("Failed to open database '{}'", db_path.display()))?;

    let ytdlp = Arc::new(YtDlp::new(&config.ytdlp_path, config.adapter_timeout()));
    let settings = RefreshSettings {
        media_root: config.media_root(),
        download_pause: config.download_pause(),
        defaults: config.channel_defaults(),
    };

    Ok(Arc::new(Coordinator::new(
        db,
        ytdlp.clone(),
        ytdlp,
        Arc::new(SystemClock),
        settings,
        config.log_capacity,
    )))
}

async fn serve(config: &Config, coordinator: Arc<Coordinator>) -> Result<()> {
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&coordinator), config.tick_period()));
    let ticker = scheduler.start();

    let state = Arc::new(AppState {
        coordinator,
        base_url: config.public_base_url()?,
        api_token: config.api_secret(),
    });
    if state.api_token.is_none() {
        tracing::warn!("No api_token configured, management API is open");
    }

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;

    tokio::select! {
        result = api::serve(listener, state) => result.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    ticker.abort();
    Ok(())
}

async fn refresh_once(coordinator: Arc<Coordinator>, channel: Option<String>) -> Result<()> {
    let ticket = match channel {
        Some(name) => coordinator.trigger_channel(&name).await?,
        None => coordinator.trigger_global().await?,
    };
    let report = ticket.wait().await;

    println!(
        "{:?}: {} downloaded, {} too new, {} failed, {} evicted",
        report.state, report.downloaded, report.skipped_too_new, report.failed_items, report.evicted
    );
    for name in &report.unreachable_channels {
        println!("  unreachable: {name}");
    }
    if report.state == RunState::Failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn print_feed(config: &Config, coordinator: &Coordinator, name: &str) -> Result<()> {
    let channel = coordinator.get_channel(name).await?;
    let episodes = coordinator.db().list_episodes(name).await?;
    let xml = build_feed(&channel, &episodes, &config.public_base_url()?)
        .context("Failed to render feed")?;
    println!("{xml}");
    Ok(())
}

async fn print_channels(coordinator: &Coordinator) -> Result<()> {
    let now = coordinator.now();
    let channels = coordinator.list_channels().await?;
    if channels.is_empty() {
        println!("No channels configured");
        return Ok(());
    }
    for channel in channels {
        let episodes = coordinator.db().count_episodes(&channel.name).await?;
        let since = channel
            .last_refresh_at
            .map(|last| format!("{} ago", format_duration(now.timestamp() - last)))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<24} {:>4} episodes  refreshed {:<16} {}",
            channel.name,
            episodes,
            since,
            if is_due(&channel, now) { "due" } else { "" }
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?
        .with_env_overrides()
        .context("Invalid environment override")?;
    tracing::debug!(config = ?config, "Configuration");

    let coordinator = build_coordinator(&config).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, coordinator).await,
        Command::Refresh { channel } => refresh_once(coordinator, channel).await,
        Command::Feed { name } => print_feed(&config, &coordinator, &name).await,
        Command::Channels => print_channels(&coordinator).await,
    }
}
