mod alert;
mod broker;
mod config;
mod db;
mod handlers;
mod messages;
mod push;
mod state;
mod store;
#[cfg(test)]
mod testing;
mod validator;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use alert::AlertDispatcher;
use broker::{BrokerConnection, RunOutcome};
use db::Db;
use handlers::Pipeline;
use store::StoreGateway;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = config::load(&config_path)?;
    cfg.apply_env(|k| env::var(k).ok())?;
    cfg.validate()
        .with_context(|| format!("invalid config: {config_path}"))?;

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&cfg.database.url, cfg.database.max_connections).await?;
    db.migrate().await?;
    config::apply(&cfg, &db).await?;

    let (greenhouses, presets) = db.counts().await?;
    if greenhouses == 0 {
        warn!("no greenhouses registered; every message will be dropped");
    }
    info!(greenhouses, presets, "db ready");

    // ── Pipeline ────────────────────────────────────────────────────
    let store: Arc<dyn StoreGateway> = Arc::new(db.clone());
    let gateway = push::gateway_from_settings(&cfg.push_settings())
        .context("failed to build push gateway")?;
    let dispatcher = AlertDispatcher::new(Arc::clone(&store), gateway);

    let shared = state::shared();
    shared
        .write()
        .await
        .record_system("consumer started".to_string());

    let pipeline = Arc::new(Pipeline::new(
        store,
        dispatcher,
        cfg.topics(),
        Arc::clone(&shared),
    ));

    // ── Status API ──────────────────────────────────────────────────
    if cfg.web.enabled {
        let web_state = web::AppState {
            shared: Arc::clone(&shared),
            db,
        };
        let port = cfg.web.port;
        tokio::spawn(async move {
            if let Err(e) = web::serve(web_state, port).await {
                error!("status api stopped: {e:#}");
            }
        });
    }

    // ── MQTT ────────────────────────────────────────────────────────
    let connection = BrokerConnection::new(cfg.broker_settings(), pipeline, Arc::clone(&shared));
    info!(
        client_id = connection.client_id(),
        topics = ?cfg.topics().all(),
        "starting broker connection"
    );

    tokio::select! {
        RunOutcome::GaveUp { failures } = connection.run() => {
            warn!(failures, "broker connection abandoned; waiting for shutdown signal");
            shutdown_signal().await;
        }
        _ = shutdown_signal() => {}
    }

    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
