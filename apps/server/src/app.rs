//! Wires the receiver, service, worker pool, and bus server together.

use std::sync::Arc;

use chunkbus_bus_server::{BusServer, ServerConfig};
use chunkbus_receiver::FileReceiver;
use chunkbus_service::{BroadcastEmitter, ServiceDispatcher, TestService};
use chunkbus_task_pool::TaskPool;

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let receiver = Arc::new(FileReceiver::new(&config.outdir, config.memory_budget_bytes)?);
    let service = Arc::new(TestService::new(receiver));
    let pool = Arc::new(TaskPool::new(config.workers));
    tracing::info!(workers = pool.worker_count(), "worker pool ready");

    let dispatcher = ServiceDispatcher::new(service.clone(), pool.clone());
    let server = BusServer::new(ServerConfig { port: config.port }, dispatcher);

    // Broadcasts flow through the emit-only interface, wired after
    // construction.
    service.set_emitter(Arc::new(BroadcastEmitter::new(server.broadcaster())));

    let runner = Arc::clone(&server);
    let server_task = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");

    server.shutdown();
    server_task.await??;
    pool.shutdown().await;
    Ok(())
}
