//! KeyHouse Server
//!
//! Entry point for a serving node. Wires the cache, lookup stack (local
//! or sharded), UDF host, protocol codec, and the three listeners:
//!
//! - gRPC `KeyValueService` (default `0.0.0.0:50051`)
//! - HTTP endpoints (default `0.0.0.0:51052`)
//! - internal lookup peer endpoint (default `0.0.0.0:50099`)
//!
//! Configuration is environment-driven; see [`keyhouse_server::config`].
//! Logging is controlled via `RUST_LOG`.

use std::sync::Arc;
use std::time::Duration;

use keyhouse_data::reader::ReadOptions;
use keyhouse_ohttp::{KeyProvider, StaticKeyProvider};
use keyhouse_proto::internal::internal_lookup_service_server::InternalLookupServiceServer;
use keyhouse_proto::v2::key_value_service_server::KeyValueServiceServer;
use keyhouse_server::loader::DataLoader;
use keyhouse_server::{
    discovery::EnvInstanceClient, KeyValueServiceImpl, ProtocolCodec, RequestHandler, ServerConfig,
};
use keyhouse_sharding::lookup_server::LookupServiceImpl;
use keyhouse_sharding::{
    ClusterMappingsManager, GrpcRemoteLookupClient, RemoteLookupClient, ShardManager,
    ShardedLookup,
};
use keyhouse_store::{KeyValueCache, LocalLookup, Lookup};
use keyhouse_udf::wasm::WasmEngine;
use keyhouse_udf::{UdfClient, UdfHooks};
use tonic::transport::Server;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(?config, "Starting KeyHouse server");

    let cache = Arc::new(KeyValueCache::new());
    let local_lookup: Arc<dyn Lookup> = Arc::new(LocalLookup::new(cache.clone()));
    let key_provider: Arc<dyn KeyProvider> = Arc::new(StaticKeyProvider::with_test_key());

    // Lookup stack: single-shard deployments serve everything locally;
    // sharded deployments fan out through the shard manager.
    let (lookup, _mappings_task): (Arc<dyn Lookup>, Option<tokio::task::JoinHandle<()>>) =
        if config.num_shards > 1 {
            let instance_client = Arc::new(EnvInstanceClient::from_env(&config.environment)?);
            let mappings_manager = Arc::new(ClusterMappingsManager::new(
                config.environment.clone(),
                config.num_shards,
                config.mapping_refresh,
                instance_client,
            )?);
            let provider_for_factory = key_provider.clone();
            let factory: keyhouse_sharding::shard_manager::RemoteClientFactory =
                Arc::new(move |address: &str| {
                    Arc::new(GrpcRemoteLookupClient::new(
                        address.to_string(),
                        keyhouse_ohttp::TEST_KEY_ID,
                        provider_for_factory.clone(),
                    )) as Arc<dyn RemoteLookupClient>
                });

            // Discovery may lag behind process start; retry with backoff
            // until every shard reports at least one replica.
            let mut backoff = Duration::from_millis(500);
            let shard_manager = loop {
                let mappings = mappings_manager.get_cluster_mappings().await?;
                match ShardManager::create(mappings, factory.clone()) {
                    Ok(manager) => break Arc::new(manager),
                    Err(e) => {
                        info!(error = %e, backoff_ms = backoff.as_millis() as u64, "Cluster mapping incomplete, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(30));
                    }
                }
            };
            let task = mappings_manager.start(shard_manager.clone());
            (
                Arc::new(ShardedLookup::new(
                    local_lookup.clone(),
                    config.num_shards,
                    config.current_shard_num,
                    shard_manager,
                )),
                Some(task),
            )
        } else {
            (local_lookup.clone(), None)
        };

    // UDF host: hooks first (the engine links them), lookup wired after
    // the lookup stack exists.
    let hooks = UdfHooks::new();
    hooks.finish_init(lookup.clone(), tokio::runtime::Handle::current());
    let engine = Arc::new(WasmEngine::new(hooks));
    let udf_client = Arc::new(UdfClient::new(engine, config.udf.clone()));

    // Bootstrap data from disk when configured.
    if let Some(delta_dir) = &config.delta_dir {
        let loader = DataLoader::new(cache.clone(), udf_client.clone(), ReadOptions::default());
        let applied = loader.load_directory(std::path::Path::new(delta_dir)).await?;
        info!(applied, delta_dir = %delta_dir, "Delta bootstrap complete");
    }

    let handler = Arc::new(RequestHandler::new(udf_client));
    let codec = Arc::new(ProtocolCodec::new(handler, key_provider.clone()));

    // Internal lookup peer endpoint. Peers query the local cache, not the
    // sharded view, or lookups would loop between nodes.
    let internal_service = LookupServiceImpl::new(local_lookup, key_provider);
    let internal_addr = config.internal_addr;
    tokio::spawn(async move {
        if let Err(e) = Server::builder()
            .add_service(InternalLookupServiceServer::new(internal_service))
            .serve(internal_addr)
            .await
        {
            tracing::error!(error = %e, "Internal lookup server exited");
        }
    });

    // HTTP listener.
    let http_router = keyhouse_server::http::router(codec.clone());
    let http_addr = config.http_addr;
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(http_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "Failed to bind HTTP listener");
                return;
            }
        };
        info!(%http_addr, "HTTP endpoints listening");
        if let Err(e) = axum::serve(listener, http_router).await {
            tracing::error!(error = %e, "HTTP server exited");
        }
    });

    // Graceful shutdown on SIGINT/SIGTERM.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down"),
            _ = terminate => info!("Received SIGTERM, shutting down"),
        }
        let _ = shutdown_tx.send(());
    });

    info!(grpc_addr = %config.grpc_addr, "KeyValueService listening");
    Server::builder()
        .add_service(KeyValueServiceServer::new(KeyValueServiceImpl::new(codec)))
        .serve_with_shutdown(config.grpc_addr, async {
            shutdown_rx.await.ok();
        })
        .await?;

    info!("KeyHouse server shut down gracefully");
    Ok(())
}
