//! Shared harness for the end-to-end scenarios: a full server stack on
//! an ephemeral loopback port plus a supervised client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chunkbus_bus_client::{ConnectionSupervisor, SupervisorConfig};
use chunkbus_bus_server::{BusServer, ServerConfig};
use chunkbus_protocol::constants::OBJECT_PATH;
use chunkbus_receiver::FileReceiver;
use chunkbus_sender::FileSender;
use chunkbus_service::{BroadcastEmitter, ServiceDispatcher, TestService};
use chunkbus_task_pool::TaskPool;

/// A running server half: bus server + service + worker pool.
pub struct ServerStack {
    pub server: Arc<BusServer<ServiceDispatcher>>,
    pub service: Arc<TestService>,
    pub pool: Arc<TaskPool>,
    task: tokio::task::JoinHandle<()>,
}

impl ServerStack {
    /// Starts a full server on `port` (0 = ephemeral) writing into
    /// `outdir` with the given admission budget.
    pub async fn start(outdir: &Path, budget: usize, port: u16) -> Self {
        let receiver = Arc::new(FileReceiver::new(outdir, budget).unwrap());
        let service = Arc::new(TestService::new(receiver));
        let pool = Arc::new(TaskPool::new(4));
        let dispatcher = ServiceDispatcher::new(service.clone(), pool.clone());
        let server = BusServer::new(ServerConfig { port }, dispatcher);
        service.set_emitter(Arc::new(BroadcastEmitter::new(server.broadcaster())));

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move {
            runner.run().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.port().await > 0, "server failed to bind");

        Self {
            server,
            service,
            pool,
            task,
        }
    }

    pub async fn port(&self) -> u16 {
        self.server.port().await
    }

    pub async fn stop(self) {
        self.server.shutdown();
        self.task.await.unwrap();
        self.pool.shutdown().await;
    }
}

/// Supervisor timings shortened for tests.
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        heartbeat_interval: Duration::from_millis(200),
        probe_timeout: Duration::from_millis(500),
        call_timeout: Duration::from_secs(2),
        reconnect_interval: Duration::from_millis(100),
        max_reconnect_attempts: 10,
        auto_reconnect: true,
    }
}

pub fn bus_url(port: u16) -> String {
    format!("ws://127.0.0.1:{port}{OBJECT_PATH}")
}

/// Connects a supervisor + sender pair to `port`.
pub async fn connect_client(port: u16) -> (Arc<ConnectionSupervisor>, FileSender) {
    let supervisor = ConnectionSupervisor::new(bus_url(port), fast_config());
    supervisor.init().await.unwrap();
    let sender = FileSender::new(supervisor.clone(), Arc::new(TaskPool::new(4)));
    (supervisor, sender)
}

/// Deterministic pseudo-random test payload.
pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 253) as u8).collect()
}
