// crates/server/src/main.rs
//! Intelcraft server binary.

use anyhow::Result;
use clap::Parser;
use intelcraft_server::{create_app, init_metrics, AppState, ServerArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,intelcraft=info".into()),
        )
        .compact()
        .init();

    let args = ServerArgs::parse();
    init_metrics();

    let config = args.engine_config();
    tracing::info!(?config, "engine configuration");
    let app = create_app(AppState::new(&config));

    let addr = args.addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    eprintln!("\n  intelcraft v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  \u{2192} http://{addr}\n");
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
