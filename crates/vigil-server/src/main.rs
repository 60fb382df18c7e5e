use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use vigil_storage::Store;

use vigil_server::state::AppState;
use vigil_server::{app, config, heartbeat, outbox, probe, runtime, sweep};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  vigil-server [config.toml]                         Start the server");
    eprintln!("  vigil-server init-client <config.toml> <name> <api-key>");
    eprintln!("                                                     Provision a client and agent key");
}

#[tokio::main]
async fn main() -> Result<()> {
    vigil_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("--help") || args.get(1).map(String::as_str) == Some("-h") {
        print_usage();
        return Ok(());
    }
    if args.get(1).map(String::as_str) == Some("init-client") {
        let (config_path, name, key) = match (args.get(2), args.get(3), args.get(4)) {
            (Some(c), Some(n), Some(k)) => (c.clone(), n.clone(), k.clone()),
            _ => {
                print_usage();
                anyhow::bail!("init-client requires <config.toml> <name> <api-key>");
            }
        };
        return run_init_client(&config_path, &name, &key).await;
    }

    let config_path = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = Arc::new(config::ServerConfig::load(&config_path)?);

    tracing::info!(
        http_port = config.http_port,
        prober_enabled = config.prober.enabled,
        "vigil-server starting"
    );

    if let Some(dir) = sqlite_parent_dir(&config.database_url) {
        std::fs::create_dir_all(dir)?;
    }
    let store = Arc::new(Store::connect(&config.database_url).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (eval_router, notify_router, worker_handles) =
        runtime::spawn(store.clone(), config.clone(), shutdown_rx.clone())?;

    let state = AppState::new(
        store.clone(),
        config.clone(),
        eval_router.clone(),
        notify_router.clone(),
    );

    // Background schedulers.
    let mut scheduler_handles = Vec::new();
    if config.prober.enabled {
        let prober = Arc::new(probe::Prober::new(
            store.clone(),
            eval_router.clone(),
            config.clone(),
        )?);
        scheduler_handles.push(tokio::spawn(prober.run(shutdown_rx.clone())));
    } else {
        tracing::info!("HTTP prober disabled");
    }
    if config.heartbeat.enabled {
        scheduler_handles.push(tokio::spawn(heartbeat::run(
            store.clone(),
            eval_router.clone(),
            config.clone(),
            shutdown_rx.clone(),
        )));
    } else {
        tracing::info!("heartbeat sweep disabled");
    }
    scheduler_handles.push(tokio::spawn(sweep::evaluation_sweep(
        store.clone(),
        eval_router.clone(),
        config.clone(),
        shutdown_rx.clone(),
    )));
    scheduler_handles.push(tokio::spawn(sweep::reminder_sweep(
        store.clone(),
        notify_router.clone(),
        config.clone(),
        shutdown_rx.clone(),
    )));
    scheduler_handles.push(tokio::spawn(sweep::retention_sweep(
        store.clone(),
        config.clone(),
        shutdown_rx.clone(),
    )));
    scheduler_handles.push(tokio::spawn(outbox::run(
        store.clone(),
        notify_router.clone(),
        config.clone(),
        shutdown_rx.clone(),
    )));

    // HTTP server.
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let router = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(http = %addr, "server started");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Drain workers with a bounded deadline. Anything unfinished is
    // re-driven on next boot: the sweeps regenerate evaluation intents
    // and the outbox replays undelivered notifications.
    let _ = shutdown_tx.send(true);
    let drain = async {
        for handle in scheduler_handles.into_iter().chain(worker_handles) {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(std::time::Duration::from_secs(10), drain)
        .await
        .is_err()
    {
        tracing::warn!("drain deadline exceeded, exiting with tasks in flight");
    }

    tracing::info!("server stopped");
    Ok(())
}

/// Provisions a tenant and its agent API key. Re-running with the same
/// name or key reports the conflict instead of duplicating.
async fn run_init_client(config_path: &str, name: &str, key: &str) -> Result<()> {
    let config = config::ServerConfig::load(config_path)?;
    if let Some(dir) = sqlite_parent_dir(&config.database_url) {
        std::fs::create_dir_all(dir)?;
    }
    let store = Store::connect(&config.database_url).await?;

    let client = store.create_client(name).await?;
    let api_key = store.create_api_key(&client.id, "agent", key).await?;
    tracing::info!(
        client_id = %client.id,
        api_key_id = %api_key.id,
        name,
        "client provisioned"
    );
    Ok(())
}

/// For `sqlite://relative/path.db` URLs, the parent directory must exist
/// before the first connect.
fn sqlite_parent_dir(url: &str) -> Option<std::path::PathBuf> {
    let path = url.strip_prefix("sqlite://")?;
    if path.contains(":memory:") {
        return None;
    }
    let path = path.split('?').next()?;
    std::path::Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
}
