//! Stormwire server
//!
//! Ingests NWS severe-weather products from the Weather Wire (XMPP push)
//! and the NWS API (REST pull), maintains the authoritative set of active
//! alerts, and streams changes to WebSocket subscribers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stormwire_server::config::Config;
use stormwire_server::diagnostics::DiagnosticsRing;
use stormwire_server::parser::{ParserConfig, ProductParser};
use stormwire_server::refdata::UgcTable;
use stormwire_server::server::{self, AppState};
use stormwire_server::sources::nws_api::{NwsApiClient, PullSource};
use stormwire_server::sources::nwws::PushSource;
use stormwire_server::sources::SourceHealth;
use stormwire_server::store::{persist, AlertStore};
use stormwire_server::ws::BroadcastHub;

/// Stormwire - NWS severe weather alert pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host address to bind to (overrides environment configuration)
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to bind to (overrides environment configuration)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("stormwire_server={log_level},stormwire_common={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Stormwire starting...");

    let mut config = Config::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    // Reference table is mandatory; no table means no readable locations.
    let table = Arc::new(UgcTable::load(&config.ugc_table_path)?);

    let store = Arc::new(AlertStore::new(config.expiration_grace_seconds));
    if let Some(path) = &config.persist_path {
        let restored = persist::load(path, Utc::now())?;
        if !restored.is_empty() {
            info!(count = restored.len(), "rehydrated persisted alerts");
            store.restore(restored);
        }
    }

    let parser = Arc::new(ProductParser::new(
        Arc::clone(&table),
        ParserConfig {
            filter_states: config.filter_states.clone(),
        },
    ));
    let diagnostics = Arc::new(DiagnosticsRing::new(
        stormwire_server::diagnostics::DEFAULT_CAPACITY,
    ));

    // One shutdown signal cascades to every task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Fatal source failures (bad credentials) surface here.
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<stormwire_server::Error>(1);

    // Store eviction loop.
    {
        let store = Arc::clone(&store);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            store.run_eviction(shutdown).await;
        });
    }

    // Periodic persistence.
    if let Some(path) = config.persist_path.clone() {
        let store = Arc::clone(&store);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            persist::run_persistence(&store, path, shutdown).await;
        });
    }

    // Pull source.
    let pull_health = Arc::new(SourceHealth::default());
    {
        let client = NwsApiClient::new(&config.nws_api_base, &config.nws_user_agent)?;
        let pull = PullSource::new(
            client,
            Arc::clone(&parser),
            Arc::clone(&store),
            Arc::clone(&diagnostics),
            Arc::clone(&pull_health),
            Duration::from_secs(config.poll_interval_seconds),
        );
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            pull.run(shutdown).await;
        });
    }

    // Push source, when configured.
    let push_health = if let Some(nwws_config) = config.nwws.clone() {
        let health = Arc::new(SourceHealth::default());
        let push = PushSource::new(
            nwws_config,
            Arc::clone(&parser),
            Arc::clone(&store),
            Arc::clone(&diagnostics),
            Arc::clone(&health),
        );
        let shutdown = shutdown_rx.clone();
        let fatal = fatal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = push.run(shutdown).await {
                let _ = fatal.send(e).await;
            }
        });
        Some(health)
    } else {
        warn!("NWWS_ENABLED is off; running in pull-only mode");
        None
    };

    let hub = Arc::new(BroadcastHub::new(
        Arc::clone(&store),
        shutdown_rx.clone(),
    ));

    let state = AppState {
        store: Arc::clone(&store),
        hub,
        diagnostics,
        push_health,
        pull_health,
        started_at: Utc::now(),
    };

    let bind_addr = config.bind_addr();
    info!(addr = %bind_addr, "starting HTTP server");
    let mut server_task = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { server::start(&bind_addr, state, shutdown).await })
    };

    let exit: anyhow::Result<()> = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
        Some(err) = fatal_rx.recv() => {
            error!(error = %err, "fatal source failure");
            Err(err.into())
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(anyhow::anyhow!("server task panicked: {e}")),
            }
        }
    };

    let _ = shutdown_tx.send(true);
    // Give subscribers and the persistence loop their drain window.
    tokio::time::sleep(Duration::from_secs(1)).await;

    match &exit {
        Ok(()) => info!("Stormwire stopped"),
        Err(e) => error!(error = %e, "Stormwire stopped with error"),
    }
    exit
}
