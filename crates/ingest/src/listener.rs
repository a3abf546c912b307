use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::pipeline::IngestPipeline;

pub const DEFAULT_INGEST_PORT: u16 = 12345;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound on how long a single accept waits before the shutdown
    /// flag is checked again.
    pub poll_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_INGEST_PORT)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Loopback socket that turns each inbound connection into one ingested document.
///
/// The wire protocol is one-way: the producer writes a document and closes its
/// write side, and nothing is ever written back.
pub struct IngestListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    pipeline: IngestPipeline,
    poll_interval: Duration,
}

impl IngestListener {
    pub async fn bind(config: &IngestConfig, pipeline: IngestPipeline) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind ingest socket on {}", config.bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read ingest socket address")?;

        Ok(Self {
            listener,
            local_addr,
            pipeline,
            poll_interval: config.poll_interval,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> IngestHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let local_addr = self.local_addr;
        let task = tokio::spawn(self.run(shutdown_rx));
        IngestHandle {
            shutdown: shutdown_tx,
            task,
            local_addr,
        }
    }

    async fn run(self, shutdown: watch::Receiver<bool>) {
        info!("Ingest listener accepting documents on {}", self.local_addr);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let (stream, peer) = match timeout(self.poll_interval, self.listener.accept()).await {
                Err(_) => continue,
                Ok(Err(err)) => {
                    warn!("Ingest accept failed: {}", err);
                    sleep(self.poll_interval).await;
                    continue;
                }
                Ok(Ok(accepted)) => accepted,
            };

            self.handle_connection(stream, peer).await;
        }

        info!("Ingest listener on {} stopped", self.local_addr);
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let mut raw = Vec::new();
        if let Err(err) = stream.read_to_end(&mut raw).await {
            warn!("Failed to read document from {}: {}", peer, err);
            return;
        }
        debug!("Received {} bytes from {}", raw.len(), peer);

        match self.pipeline.ingest(&raw).await {
            Ok(receipt) => debug!(
                "Ingested document from {} as {} (payload {})",
                peer, receipt.content_id, receipt.payload_hex
            ),
            Err(err) => warn!("Dropped document from {} [{}]: {}", peer, err.kind(), err),
        }
    }
}

/// Control handle for a spawned [`IngestListener`].
pub struct IngestHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl IngestHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the loop to exit. Observed between poll iterations; a connection
    /// that is already being read is finished first.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait until the loop has exited and the socket is released.
    pub async fn join(self) -> Result<()> {
        self.task.await.context("ingest listener task failed")
    }

    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }
}
