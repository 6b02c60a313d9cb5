use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connector::config;
use connector::models::settings::NewSettings;
use connector::{api, store, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        None => run_server(cfg, None).await,
        Some(cli::Commands::Settings { command }) => {
            let state = build_state(cfg).await?;
            handle_settings_command(command, &state).await
        }
        Some(cli::Commands::Sync) => {
            let state = build_state(cfg).await?;
            let settings = state.settings.require_active().await?;
            let summary = state.sync_engine().sync_all(&settings).await?;
            println!(
                "Synchronization finished:\n  Workspaces: {} created, {} updated\n  Reports:    {} created, {} updated",
                summary.workspaces_created,
                summary.workspaces_updated,
                summary.reports_created,
                summary.reports_updated
            );
            if !summary.failed_workspaces.is_empty() {
                println!("  Failed workspaces: {}", summary.failed_workspaces.join(", "));
            }
            Ok(())
        }
        Some(cli::Commands::Report { command }) => {
            let state = build_state(cfg).await?;
            match command {
                cli::ReportCommands::Refresh { id } => {
                    let settings = state.settings.require_active().await?;
                    let report = state.sync_engine().refresh_report(&settings, id).await?;
                    println!("Report {} refreshed:\n  Name: {}\n  URL:  {}", report.id, report.name, report.url);
                }
            }
            Ok(())
        }
        Some(cli::Commands::TestConnection { id, aad_only }) => {
            let state = build_state(cfg).await?;
            test_connection(&state, id, aad_only).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "connector=debug,tower_http=debug".into()),
    );
    let json = std::env::var("CONNECTOR_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_state(cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    tracing::info!("Connecting to record store...");
    let store = store::connect(&cfg.database_url)
        .await
        .context("failed to open record store")?;
    Ok(Arc::new(AppState::new(cfg, store)?))
}

async fn run_server(cfg: config::Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(cfg.port);
    let state = build_state(cfg).await?;

    match state.settings.active().await {
        Ok(Some(s)) => tracing::info!(settings_id = s.id, "active Power BI configuration found"),
        Ok(None) => tracing::warn!("no active Power BI configuration; data API will reject every request"),
        Err(e) => tracing::warn!("failed to look up active configuration: {}", e),
    }

    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Power BI connector listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("shutting down");
}

async fn handle_settings_command(
    cmd: cli::SettingsCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    match cmd {
        cli::SettingsCommands::Create {
            name,
            allowed_models,
            max_records,
            tenant_id,
            client_id,
            client_secret,
            access_level,
            inactive,
        } => {
            let defaults = NewSettings::default();
            let new = NewSettings {
                name: name.unwrap_or(defaults.name),
                allowed_models: allowed_models
                    .map(|m| m.into_iter().map(|s| s.trim().to_string()).collect())
                    .unwrap_or(defaults.allowed_models),
                max_records: max_records.unwrap_or(defaults.max_records),
                tenant_id,
                client_id,
                client_secret,
                default_access_level: access_level.into(),
                is_active: !inactive,
            };
            let settings = state.settings.create(new).await?;
            println!(
                "Configuration created:\n  ID:     {}\n  Active: {}\n  Use:    X-PowerBI-Token: {}",
                settings.id,
                settings.is_active,
                settings.token.unwrap_or_default()
            );
        }
        cli::SettingsCommands::Show => match state.settings.active().await? {
            Some(settings) => {
                println!("{}", serde_json::to_string_pretty(&settings.masked())?);
            }
            None => println!("No active configuration."),
        },
        cli::SettingsCommands::Activate { id } => {
            state.settings.activate(id).await?;
            println!("Configuration {} is now active.", id);
        }
        cli::SettingsCommands::RotateToken { id } => {
            let token = state.settings.regenerate_token(id).await?;
            println!(
                "Token regenerated; the previous token no longer works.\n  Use: X-PowerBI-Token: {}",
                token
            );
        }
        cli::SettingsCommands::Delete { id } => {
            if state.settings.delete(id).await? {
                println!("Configuration deleted.");
            } else {
                println!("Configuration not found.");
            }
        }
    }
    Ok(())
}

async fn test_connection(state: &AppState, id: Option<i64>, aad_only: bool) -> anyhow::Result<()> {
    let settings = match id {
        Some(id) => state
            .settings
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Configuration not found: {}", id))?,
        None => state.settings.require_active().await?,
    };
    let creds = settings.aad_credentials()?;

    state.powerbi.broker().acquire(&creds).await?;
    println!("Azure AD token acquired for tenant {}.", creds.tenant_id);
    if aad_only {
        return Ok(());
    }

    let workspaces = state.powerbi.list_workspaces(&creds).await?;
    println!("Connected: {} workspace(s) accessible.", workspaces.len());
    for ws in workspaces {
        println!("  {:<38} {}", ws.id, ws.name.unwrap_or_default());
    }
    Ok(())
}
