//! consult-server binary: bind, accept, coordinate.

use std::sync::Arc;

use consult_crypto::TokenVerifier;
use consult_server::config::Config;
use consult_server::connection;
use consult_server::coordinator::Coordinator;
use consult_server::gateway::{LlmGateway, MediaPipeline};
use consult_store::{Database, MemoryCache, MessageStore, RoomStore};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let rooms = RoomStore::new(db.clone());
    let messages = MessageStore::new(db);

    let gateway = Arc::new(LlmGateway::new(
        &config.provider_base_url,
        &config.provider_api_key,
        config.provider_timeout,
    )?);
    let pipeline = MediaPipeline::new(
        Arc::new(MemoryCache::new()),
        gateway.clone(),
        gateway.clone(),
        gateway,
    );

    let verifier = TokenVerifier::new(&config.token_secret);
    let coordinator = Coordinator::new(rooms, messages, pipeline, verifier, config.offline_queue_cap);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("consult-server listening on ws://{}", config.bind_addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let coordinator = coordinator.clone();
                        let origin = config.cors_origin.clone();
                        tokio::spawn(async move {
                            if let Err(e) = connection::serve(stream, addr, coordinator, origin).await {
                                tracing::warn!("[main] connection from {addr} failed: {e}");
                            }
                        });
                    }
                    Err(e) => tracing::warn!("[main] accept failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[main] shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
