//! Broker that multiplexes many local clients onto the one device line.
//!
//! Clients connect over local TCP, announce an identity and send request
//! frames. Connection tasks only parse frames and enqueue requests; a single
//! worker task owns the [`Transport`] and services the queue in arrival
//! order, one exchange at a time. Each reply is routed back to the identity
//! that asked.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{LinkError, LinkResult};
use crate::frame::{self, Frame, FrameCodec, FrameKind};
use crate::transport::Transport;

/// Default broker endpoint.
pub const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:5555";

/// Default depth of the inbound request queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Address to listen on.
    pub bind_addr: String,
    /// Capacity of the inbound request queue. Connection tasks wait when it
    /// is full.
    pub queue_depth: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            bind_addr: DEFAULT_BROKER_ADDR.to_string(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Client identity exactly as announced. Opaque to the broker.
type Identity = Vec<u8>;

/// One queued request.
#[derive(Debug)]
struct Job {
    identity: Identity,
    seq: u16,
    command: String,
}

/// Reply route for one connected identity.
#[derive(Debug)]
struct Session {
    conn_id: u64,
    replies: mpsc::UnboundedSender<Frame>,
    /// Last announcement or request from this identity.
    last_activity: Instant,
}

/// Shared map from identity to reply route.
type Sessions = Arc<Mutex<HashMap<Identity, Session>>>;

/// Printable form of an identity for logs.
fn show(identity: &[u8]) -> String {
    identity.escape_ascii().to_string()
}

// ============================================================================
// Broker
// ============================================================================

/// A bound broker, ready to run.
pub struct Broker<T: Transport> {
    listener: TcpListener,
    transport: T,
    config: BrokerConfig,
}

impl<T: Transport> Broker<T> {
    /// Bind the listener. The transport is not touched until the first
    /// request arrives.
    pub async fn bind(transport: T, config: BrokerConfig) -> LinkResult<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!(
            "Broker listening on {} for {}",
            listener.local_addr()?,
            transport.describe()
        );
        Ok(Broker {
            listener,
            transport,
            config,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> LinkResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get the configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Serve until `shutdown` turns true (or its sender is dropped).
    ///
    /// On shutdown the listener stops accepting, the in-flight exchange is
    /// allowed to finish and the transport is closed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> LinkResult<()> {
        let Broker {
            listener,
            transport,
            config,
        } = self;

        let (job_tx, job_rx) = mpsc::channel::<Job>(config.queue_depth.max(1));
        let sessions: Sessions = Arc::default();
        let worker = tokio::spawn(run_worker(
            transport,
            job_rx,
            sessions.clone(),
            shutdown.clone(),
        ));

        let next_conn = AtomicU64::new(1);
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn_id = next_conn.fetch_add(1, Ordering::Relaxed);
                        debug!("Accepted broker client {} as connection {}", peer, conn_id);
                        let connection = Connection {
                            conn_id,
                            identity: None,
                            jobs: job_tx.clone(),
                            sessions: sessions.clone(),
                        };
                        tokio::spawn(connection.serve(stream, shutdown.clone()));
                    }
                    Err(e) => warn!("Broker accept failed: {}", e),
                },
            }
        }

        info!("Broker shutting down");
        drop(listener);
        drop(job_tx);
        worker
            .await
            .map_err(|e| LinkError::WorkerFailed(e.to_string()))?
    }
}

/// Resolve once shutdown has been requested.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Map a transport failure to the sentinel sent back to the client.
pub fn sentinel_for(err: &LinkError) -> String {
    match err {
        LinkError::TransportTimeout => frame::DEVICE_TIMEOUT.to_string(),
        LinkError::TransportClosed => frame::DEVICE_CLOSED.to_string(),
        other => frame::device_failure(&other.to_string()),
    }
}

/// The serializing worker: sole owner of the transport.
async fn run_worker<T: Transport>(
    mut transport: T,
    mut jobs: mpsc::Receiver<Job>,
    sessions: Sessions,
    mut shutdown: watch::Receiver<bool>,
) -> LinkResult<()> {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        // The exchange blocks; the transport moves onto a blocking thread
        // and comes back with the result.
        let command = job.command.clone();
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = transport.exchange(&command);
            (transport, result)
        })
        .await
        .map_err(|e| LinkError::WorkerFailed(e.to_string()))?;
        transport = returned;

        let reply = match result {
            Ok(line) => line,
            Err(e) => {
                warn!(
                    "Exchange {:?} for {} failed: {}",
                    job.command,
                    show(&job.identity),
                    e
                );
                sentinel_for(&e)
            }
        };
        route(&sessions, &job.identity, Frame::reply(job.seq, reply.as_bytes()));
    }

    transport.close();
    info!("Released {}", transport.describe());
    Ok(())
}

fn route(sessions: &Sessions, identity: &[u8], reply: Frame) {
    let sessions = sessions.lock();
    match sessions.get(identity) {
        Some(session) => {
            if session.replies.send(reply).is_err() {
                debug!(
                    "Connection for {} closed before its reply (last active {:?} ago)",
                    show(identity),
                    session.last_activity.elapsed()
                );
            }
        }
        None => debug!("Dropping reply for disconnected client {}", show(identity)),
    }
}

// ============================================================================
// Connections
// ============================================================================

/// State of one client connection.
struct Connection {
    conn_id: u64,
    identity: Option<Identity>,
    jobs: mpsc::Sender<Job>,
    sessions: Sessions,
}

impl Connection {
    async fn serve(mut self, stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.pump(stream, tx, rx, &mut shutdown).await {
            warn!("Broker connection {} ended: {}", self.conn_id, e);
        }
        self.unregister();
    }

    async fn pump(
        &mut self,
        stream: TcpStream,
        tx: mpsc::UnboundedSender<Frame>,
        mut rx: mpsc::UnboundedReceiver<Frame>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> LinkResult<()> {
        let (mut reader, mut writer) = stream.into_split();
        let mut codec = FrameCodec::new();
        let mut read_buf = [0u8; 1024];

        loop {
            tokio::select! {
                _ = shutdown_requested(shutdown) => return Ok(()),

                // Client -> broker
                result = reader.read(&mut read_buf) => {
                    let n = result?;
                    if n == 0 {
                        return Ok(());
                    }
                    codec.push(&read_buf[..n]);
                    loop {
                        match codec.decode() {
                            Ok(Some(frame)) => self.on_frame(frame, &tx).await?,
                            Ok(None) => break,
                            Err(e) => {
                                let reply = Frame::reply(0, frame::malformed_request(&e.to_string()).as_bytes());
                                writer.write_all(&reply.encode()?).await?;
                                return Err(e);
                            }
                        }
                    }
                }

                // Broker -> client
                Some(reply) = rx.recv() => {
                    writer.write_all(&reply.encode()?).await?;
                    writer.flush().await?;
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame, tx: &mpsc::UnboundedSender<Frame>) -> LinkResult<()> {
        let conn_id = self.conn_id;
        let reject = |detail: &str| {
            debug!("Connection {}: malformed request: {}", conn_id, detail);
            let _ = tx.send(Frame::reply(frame.seq, frame::malformed_request(detail).as_bytes()));
        };

        match frame.kind {
            FrameKind::Identity if frame.payload.is_empty() => reject("identity must not be empty"),
            FrameKind::Identity => self.register(frame.payload.clone(), tx.clone()),
            FrameKind::Request if frame.is_probe() => {
                let _ = tx.send(Frame::reply(frame.seq, &[]));
            }
            FrameKind::Request => {
                let Some(identity) = self.identity.clone() else {
                    reject("request before identity announcement");
                    return Ok(());
                };
                let Ok(command) = std::str::from_utf8(&frame.payload) else {
                    reject("payload is not UTF-8");
                    return Ok(());
                };
                if command.contains(['\n', '\r']) {
                    reject("payload contains a line terminator");
                    return Ok(());
                }
                self.touch(&identity);
                let job = Job {
                    identity,
                    seq: frame.seq,
                    command: command.to_string(),
                };
                self.jobs
                    .send(job)
                    .await
                    .map_err(|_| LinkError::WorkerFailed("request queue closed".to_string()))?;
            }
            FrameKind::Reply => reject("reply frames are broker to client only"),
            FrameKind::Unknown(kind) => reject(&format!("unknown frame kind 0x{:02x}", kind)),
        }
        Ok(())
    }

    fn register(&mut self, identity: Identity, tx: mpsc::UnboundedSender<Frame>) {
        let mut sessions = self.sessions.lock();
        if let Some(previous) = self.identity.take() {
            if sessions.get(&previous).is_some_and(|s| s.conn_id == self.conn_id) {
                sessions.remove(&previous);
            }
        }
        let session = Session {
            conn_id: self.conn_id,
            replies: tx,
            last_activity: Instant::now(),
        };
        if let Some(replaced) = sessions.insert(identity.clone(), session) {
            warn!(
                "Identity {} reconnected; replacing its previous route (last active {:?} ago)",
                show(&identity),
                replaced.last_activity.elapsed()
            );
        }
        info!("Broker client {} registered", show(&identity));
        self.identity = Some(identity);
    }

    /// Record activity for a session this connection still owns.
    fn touch(&self, identity: &[u8]) {
        if let Some(session) = self
            .sessions
            .lock()
            .get_mut(identity)
            .filter(|s| s.conn_id == self.conn_id)
        {
            session.last_activity = Instant::now();
        }
    }

    fn unregister(&mut self) {
        let Some(identity) = self.identity.take() else {
            return;
        };
        let mut sessions = self.sessions.lock();
        // A newer connection may have taken over the identity.
        if sessions.get(&identity).is_some_and(|s| s.conn_id == self.conn_id) {
            if let Some(session) = sessions.remove(&identity) {
                info!(
                    "Broker client {} disconnected (last active {:?} ago)",
                    show(&identity),
                    session.last_activity.elapsed()
                );
                return;
            }
        }
        info!("Broker client {} disconnected", show(&identity));
    }
}

// ============================================================================
// Synchronous API for callers without a runtime
// ============================================================================

/// A broker running on its own thread with its own runtime.
pub struct BrokerThread {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: Option<thread::JoinHandle<LinkResult<()>>>,
}

impl BrokerThread {
    /// Bind and start a broker in the background.
    pub fn spawn<T: Transport>(transport: T, config: BrokerConfig) -> LinkResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let broker = runtime.block_on(Broker::bind(transport, config))?;
        let addr = broker.local_addr()?;
        let (shutdown, rx) = watch::channel(false);

        let handle = thread::Builder::new()
            .name("pvpi-broker".to_string())
            .spawn(move || runtime.block_on(broker.run(rx)))?;

        Ok(BrokerThread {
            addr,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Address the broker is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop the broker and wait for it to release the transport.
    pub fn shutdown(mut self) -> LinkResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> LinkResult<()> {
        let _ = self.shutdown.send(true);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| LinkError::WorkerFailed("broker thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for BrokerThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Broker stopped with error: {}", e);
        }
    }
}
