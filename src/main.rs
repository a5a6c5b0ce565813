use blobsync::config::CONFIG;
use blobsync::server::{AdminState, admin_router};
use blobsync::utils::logging::init_tracing;
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = &*CONFIG;
    init_tracing(&cfg.basic.loglevel);

    if cfg.basic.admin_key.trim().is_empty() {
        error!("basic.admin_key is empty; set it in config.toml or BLOBSYNC_BASIC__ADMIN_KEY");
        return Err("basic.admin_key must be set".into());
    }

    info!(
        database_path = %cfg.basic.database_path.display(),
        remote_base_url = %cfg.remote.base_url.as_ref().map_or("<none>", |u| u.as_str()),
        remote_dir = %cfg.remote.dir.as_ref().map_or_else(|| "<none>".into(), |d| d.display().to_string()),
        proxy = %cfg.remote.proxy.as_ref().map_or("<none>", |u| u.as_str()),
        primary_key = %cfg.remote.primary_key,
        backup_key = %cfg.remote.backup_key,
        loglevel = %cfg.basic.loglevel,
        listen_addr = %cfg.basic.listen_addr,
        listen_port = cfg.basic.listen_port,
    );

    let provider = blobsync::global();
    // Nothing is served until reconciliation (and bootstrap) has settled.
    provider.get_handle().await?;

    let state = AdminState::new(provider.clone(), cfg.basic.admin_key.as_str());
    let app = admin_router(state);

    let addr = SocketAddr::from((cfg.basic.listen_addr, cfg.basic.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Admin server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match provider.notify_write_committed().await {
        Ok(outcome) => info!(outcome = ?outcome, "Final sync before shutdown"),
        Err(e) => warn!(error = %e, "Final sync before shutdown failed"),
    }
    provider.close().await;
    info!("Server has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
