use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

mod config;
mod logging;
mod models;
mod monitor;
mod organizer;
mod services;

use config::{AppConfig, Settings, PLUGIN_ID};
use models::{PluginInput, PluginOutput, ServerConnection};
use monitor::{AutoMover, MonitorMode};
use organizer::posters::{self, ExtensionSets};
use organizer::Organizer;
use services::http;
use services::stash::StashClient;

#[derive(Parser)]
#[command(name = "stash-organizer", version, about = "Organize media server scenes into a templated library")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run as a media server plugin task or hook (default)
    Plugin {
        /// Read the JSON envelope from a file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Scan the download folder and move scraped scenes
    Monitor {
        #[arg(long, value_enum, default_value_t = MonitorMode::CheckAndMove)]
        mode: MonitorMode,
        /// Connection descriptor as passed by the plugin runner
        #[arg(long)]
        server_connection: Option<String>,
        /// Media server base URL when no descriptor is given
        #[arg(long, env = "STASH_URL")]
        url: Option<String>,
        #[arg(long, env = "STASH_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Rename `<x>-poster.<ext>` images to match the single video in their folder
    FixPosters {
        root: PathBuf,
        /// Media server configuration export with `general.*Extensions`
        #[arg(long)]
        stash_config: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Plugin { input: None });

    match &command {
        Command::Plugin { .. } => logging::init_plugin(),
        _ => logging::init_cli(),
    }

    // Load .env file if present
    dotenvy::dotenv().ok();

    match command {
        Command::Plugin { input } => {
            let output = match run_plugin(input).await {
                Ok(message) => PluginOutput::ok(message),
                Err(e) => {
                    tracing::error!("Plugin run failed: {:#}", e);
                    PluginOutput::error(format!("{:#}", e))
                }
            };
            let line = serde_json::to_string(&output)
                .unwrap_or_else(|_| r#"{"error":"failed to encode output"}"#.to_string());
            println!("{}", line);
            Ok(())
        }
        Command::Monitor {
            mode,
            server_connection,
            url,
            api_key,
        } => run_monitor(mode, server_connection, url, api_key).await,
        Command::FixPosters {
            root,
            stash_config,
            dry_run,
        } => {
            let exts = match stash_config {
                Some(path) => ExtensionSets::from_stash_config(&path),
                None => ExtensionSets::default(),
            };
            tracing::info!("Image extensions: {:?}", exts.image);
            tracing::info!("Video extensions: {:?}", exts.video);
            tracing::info!("Fixing posters under {}", root.display());

            tokio::task::spawn_blocking(move || posters::fix_posters(&root, &exts, dry_run))
                .await
                .context("Task join error")??;
            Ok(())
        }
    }
}

async fn read_input(path: Option<PathBuf>) -> Result<PluginInput> {
    let raw = match path {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read input file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read plugin input from stdin")?;
            buf
        }
    };

    if raw.trim().is_empty() {
        tracing::warn!("Empty plugin input, using defaults");
        return Ok(PluginInput::default());
    }
    serde_json::from_str(&raw).context("Plugin input is not valid JSON")
}

/// Fetch the server-side plugin settings; an unreachable config query is not fatal
async fn plugin_settings(stash: &StashClient) -> Option<Value> {
    match stash.plugin_settings(PLUGIN_ID).await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Could not load plugin settings, using local config: {:#}", e);
            None
        }
    }
}

/// Shared setup for plugin and monitor modes
struct Session {
    client: Client,
    stash: StashClient,
}

impl Session {
    fn connect(
        config: &AppConfig,
        conn: Option<&ServerConnection>,
        base_url: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<Self> {
        let graphql_url = match (conn, base_url) {
            (Some(conn), _) => conn.graphql_url(),
            (None, Some(url)) => format!("{}/graphql", url.trim_end_matches('/')),
            (None, None) => format!("{}/graphql", config.stash.url.trim_end_matches('/')),
        };
        tracing::debug!("GraphQL endpoint: {}", graphql_url);

        let api_key = api_key.or(config.stash.api_key.as_deref());
        let client = http::authenticated_client(conn, api_key, config.download.timeout())?;
        let stash = StashClient::new(client.clone(), graphql_url);
        Ok(Self { client, stash })
    }

    async fn settings(&self, config: &AppConfig) -> Settings {
        let remote = plugin_settings(&self.stash).await;
        let settings = config.resolve_settings(remote.as_ref());
        settings.log_settings();
        settings
    }

    fn organizer(&self, config: &AppConfig, settings: Settings) -> Result<Organizer> {
        Ok(
            Organizer::new(settings, self.client.clone(), config.download.retry_policy())?
                .with_rsvg_convert(config.rsvg_convert_path.clone()),
        )
    }
}

async fn run_plugin(input: Option<PathBuf>) -> Result<String> {
    let input = read_input(input).await?;

    let config = AppConfig::load();
    config.log_config();

    let conn = input
        .server_connection
        .as_ref()
        .map(ServerConnection::parse)
        .transpose()
        .context("Invalid server_connection")?;

    let session = Session::connect(&config, conn.as_ref(), None, None)?;
    let settings = session.settings(&config).await;
    let organizer = session.organizer(&config, settings)?;

    if let Some(mode) = input.args.mode.as_deref() {
        tracing::debug!("Plugin mode argument: {}", mode);
    }

    let scene_id = input
        .args
        .hook_context
        .as_ref()
        .and_then(|ctx| ctx.scene_id());

    match scene_id {
        Some(id) => organizer.run_hook(&session.stash, &id).await,
        None => {
            let (_, message) = organizer.run_task(&session.stash).await?;
            Ok(message)
        }
    }
}

async fn run_monitor(
    mode: MonitorMode,
    server_connection: Option<String>,
    url: Option<String>,
    api_key: Option<String>,
) -> Result<()> {
    let config = AppConfig::load();
    config.log_config();

    let conn = server_connection
        .map(|raw| ServerConnection::parse(&Value::String(raw)))
        .transpose()
        .context("Invalid --server-connection")?;

    let session = Session::connect(&config, conn.as_ref(), url.as_deref(), api_key.as_deref())?;
    let settings = session.settings(&config).await;
    let organizer = session.organizer(&config, settings)?;
    let mover = AutoMover::new(session.stash, organizer, config.monitor.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, stopping...");
            on_signal.cancel();
        }
    });

    let message = mover.run(mode, cancel).await?;
    tracing::info!("{}", message);
    Ok(())
}
