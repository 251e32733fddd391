use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use courier_client::{
    CacheSynchronizer, ClientConfig, ConnectOutcome, ConnectionManager, MemoryViewStore, SyncConfig,
    WsTransport,
};
use courier_core::events::EventName;
use courier_core::security::{Credential, Role};
use courier_core::settings::{self, CourierSettings};
use courier_gateway::{GatewayConfig, StaticTokenVerifier};
use courier_telemetry::{init_telemetry, MetricsRecorder, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "courier", about = "Real-time event delivery over WebSocket")]
struct Cli {
    /// Settings file (defaults to ~/.courier/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Extra end-user token, as TOKEN=SUBJECT. Repeatable.
        #[arg(long = "token", value_name = "TOKEN=SUBJECT")]
        tokens: Vec<String>,
    },
    /// Connect as a client and log every event received.
    Watch {
        #[arg(long, value_enum, default_value_t = RoleArg::Operator)]
        role: RoleArg,
        #[arg(long)]
        credential: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    Operator,
    EndUser,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Operator => Role::Operator,
            RoleArg::EndUser => Role::EndUser,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => settings::load_settings_from_path(path),
        None => settings::load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = init_telemetry(TelemetryConfig::from(&settings.telemetry));
    let metrics = telemetry.metrics();

    match cli.command {
        Command::Serve { port, tokens } => serve(&settings, port, &tokens, metrics).await,
        Command::Watch {
            role,
            credential,
            url,
        } => watch(&settings, role.into(), credential, url, metrics).await,
    }
}

async fn serve(
    settings: &CourierSettings,
    port: Option<u16>,
    tokens: &[String],
    metrics: Option<Arc<MetricsRecorder>>,
) -> anyhow::Result<()> {
    let mut config = GatewayConfig::from(&settings.gateway);
    if let Some(port) = port {
        config.port = port;
    }

    let mut verifier = StaticTokenVerifier::from_map(&settings.gateway.end_user_tokens);
    for entry in tokens {
        let Some((token, subject)) = entry.split_once('=') else {
            bail!("--token expects TOKEN=SUBJECT, got '{entry}'");
        };
        verifier = verifier.with_token(token, subject);
    }
    if verifier.is_empty() {
        tracing::warn!("no end-user tokens configured, only operators can connect");
    }

    let handle = courier_gateway::start_with_metrics(config, Arc::new(verifier), metrics)
        .await
        .context("failed to start gateway")?;
    tracing::info!(port = handle.port, "courier gateway ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn watch(
    settings: &CourierSettings,
    role: Role,
    credential: Option<String>,
    url: Option<String>,
    metrics: Option<Arc<MetricsRecorder>>,
) -> anyhow::Result<()> {
    let mut config = ClientConfig::from(&settings.client);
    if let Some(url) = url {
        config.url = url;
    }

    let transport = Arc::new(WsTransport::new(config.url.clone()));
    let mut manager = ConnectionManager::new(transport, config);
    if let Some(metrics) = &metrics {
        manager = manager.with_metrics(Arc::clone(metrics));
    }

    let store = Arc::new(MemoryViewStore::new());
    let _bindings = CacheSynchronizer::bind(
        manager.registry(),
        store.clone(),
        role,
        SyncConfig::from(&settings.client),
    );
    let _loggers: Vec<_> = EventName::ALL
        .iter()
        .map(|&name| {
            manager.on(name, move |event| {
                tracing::info!(event = %name, payload = %event.payload, "event received");
                Ok(())
            })
        })
        .collect();

    match manager.connect(role, credential.map(Credential::new)).await {
        ConnectOutcome::Rejected(reason) => bail!("connect refused: {reason:?}"),
        ConnectOutcome::Opened | ConnectOutcome::AlreadyConnected => {}
    }

    let mut state = manager.watch_state();
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                tracing::info!(state = current.name(), "connection state changed");
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl+c")?;
                break;
            }
        }
    }

    manager.disconnect().await;
    tracing::info!(cached_views = store.len(), "watch ended");
    if let Some(metrics) = &metrics {
        for series in metrics.snapshot() {
            tracing::info!(
                metric = %series.name,
                value = series.value,
                labels = series.labels.as_deref().unwrap_or("-"),
                "final metric"
            );
        }
    }
    Ok(())
}
