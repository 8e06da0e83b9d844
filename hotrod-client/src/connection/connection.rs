//! Single multiplexed connection to a Hot Rod server.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use hotrod_core::protocol::{CacheEvent, HotRodCodec, RequestFrame, Response, ResponseBody};
use hotrod_core::{HotRodError, Result, ServerAddress};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::ClientConfig;
#[cfg(feature = "metrics")]
use crate::metrics::ClientMetrics;

/// What a connection reports to the client that opened it.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A cache event pushed by the server for a registered listener.
    Cache(CacheEvent),
    /// The connection was torn down, by either side.
    Closed {
        /// The connection that closed.
        id: ConnectionId,
        /// Server it was connected to.
        address: ServerAddress,
    },
}

/// Channel receiving server pushed events and connection closures.
pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

// Late responses are expected within a few socket timeouts; ids older than
// this are forgotten.
const ABANDONED_RETENTION: u32 = 4;

type Pending = DashMap<u64, oneshot::Sender<Result<Response>>>;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Socket settings taken from the client configuration.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Bound on waiting for each response.
    pub socket_timeout: Duration,
    /// Whether to disable Nagle's algorithm.
    pub tcp_no_delay: bool,
    /// Counters for opened and closed connections.
    #[cfg(feature = "metrics")]
    pub metrics: Option<Arc<ClientMetrics>>,
}

impl ConnectionOptions {
    /// Extracts the socket settings from `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            socket_timeout: config.socket_timeout(),
            tcp_no_delay: config.tcp_no_delay(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            socket_timeout: Duration::from_secs(60),
            tcp_no_delay: true,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }
}

#[derive(Debug)]
struct Shared {
    id: ConnectionId,
    address: ServerAddress,
    pending: Pending,
    // Requests whose caller stopped waiting, with the time they gave up.
    // Their late responses are dropped.
    abandoned: DashMap<u64, Instant>,
    closed: AtomicBool,
    events: Option<EventSender>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<ClientMetrics>>,
}

impl Shared {
    /// Marks the connection closed and fails every request in flight.
    ///
    /// Only the first call reports the closure.
    fn shut_down(&self, error: impl Fn() -> HotRodError) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(id = %self.id, address = %self.address, "connection closed");
            self.abandoned.clear();
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                metrics.record_connection_closed();
            }
            if let Some(events) = &self.events {
                let _ = events.send(ConnectionEvent::Closed {
                    id: self.id,
                    address: self.address.clone(),
                });
            }
        }
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(error()));
            }
        }
    }

    fn abandon(&self, message_id: u64, retention: Duration) {
        let now = Instant::now();
        self.abandoned
            .retain(|_, since| now.saturating_duration_since(*since) < retention);
        self.abandoned.insert(message_id, now);
    }
}

/// A connection that pipelines requests and matches responses by message id.
///
/// A background task owns the read half. Responses complete the waiting
/// request; events go to the event channel. A framing violation closes the
/// connection and fails every request still in flight.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    shared: Arc<Shared>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, HotRodCodec>>,
    reader: JoinHandle<()>,
    socket_timeout: Duration,
    created_at: Instant,
}

impl Connection {
    /// Connects to `address` and starts the reader task.
    pub async fn connect(
        address: &ServerAddress,
        options: &ConnectionOptions,
        events: Option<EventSender>,
    ) -> Result<Self> {
        let stream = timeout(
            options.connect_timeout,
            TcpStream::connect((address.host(), address.port())),
        )
        .await
        .map_err(|_| {
            HotRodError::Timeout(format!(
                "connection to {} timed out after {:?}",
                address, options.connect_timeout
            ))
        })?
        .map_err(|e| HotRodError::Connection(format!("failed to connect to {}: {}", address, e)))?;

        if options.tcp_no_delay {
            stream.set_nodelay(true).map_err(|e| {
                HotRodError::Connection(format!("failed to set TCP_NODELAY: {}", e))
            })?;
        }

        let id = ConnectionId::new();
        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared {
            id,
            address: address.clone(),
            pending: DashMap::new(),
            abandoned: DashMap::new(),
            closed: AtomicBool::new(false),
            events,
            #[cfg(feature = "metrics")]
            metrics: options.metrics.clone(),
        });
        let reader = tokio::spawn(read_loop(
            FramedRead::new(read_half, HotRodCodec::new()),
            Arc::clone(&shared),
        ));

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &options.metrics {
            metrics.record_connection_opened();
        }
        tracing::debug!(id = %id, address = %address, "established connection");
        Ok(Self {
            id,
            shared,
            writer: Mutex::new(FramedWrite::new(write_half, HotRodCodec::new())),
            reader,
            socket_timeout: options.socket_timeout,
            created_at: Instant::now(),
        })
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the server this connection talks to.
    pub fn address(&self) -> &ServerAddress {
        &self.shared.address
    }

    /// Returns when this connection was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.shared.pending.len()
    }

    /// Whether the connection was torn down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Sends a request and waits for the response carrying its message id.
    ///
    /// The returned response has not been validated; error statuses are
    /// left to the caller.
    pub async fn send(&self, frame: RequestFrame) -> Result<Response> {
        if self.is_closed() {
            return Err(HotRodError::Connection(format!(
                "connection to {} is closed",
                self.address()
            )));
        }

        let message_id = frame.header.message_id;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(message_id, tx);

        let written = {
            let mut writer = self.writer.lock().await;
            writer.send(frame).await
        };
        if let Err(e) = written {
            self.shared.pending.remove(&message_id);
            let address = self.address().clone();
            self.shared.shut_down(|| {
                HotRodError::Connection(format!("write to {} failed", address))
            });
            return Err(HotRodError::Connection(format!(
                "failed to write to {}: {}",
                self.address(),
                e
            )));
        }

        match timeout(self.socket_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HotRodError::Connection(format!(
                "connection to {} closed",
                self.address()
            ))),
            Err(_) => {
                self.shared
                    .abandon(message_id, self.socket_timeout * ABANDONED_RETENTION);
                if self.shared.pending.remove(&message_id).is_none() {
                    self.shared.abandoned.remove(&message_id);
                }
                tracing::warn!(
                    id = %self.id,
                    message_id,
                    timeout = ?self.socket_timeout,
                    "request timed out"
                );
                Err(HotRodError::Timeout(format!(
                    "no response from {} within {:?}",
                    self.address(),
                    self.socket_timeout
                )))
            }
        }
    }

    /// Closes this connection, failing requests still in flight.
    pub fn close(&self) {
        self.reader.abort();
        let address = self.address().clone();
        self.shared
            .shut_down(|| HotRodError::Connection(format!("connection to {} closed", address)));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(mut frames: FramedRead<OwnedReadHalf, HotRodCodec>, shared: Arc<Shared>) {
    let id = shared.id;
    let address = shared.address.clone();
    loop {
        match frames.next().await {
            Some(Ok(response)) => {
                if let ResponseBody::Event(event) = response.body {
                    match &shared.events {
                        Some(events) => {
                            let _ = events.send(ConnectionEvent::Cache(event));
                        }
                        None => tracing::trace!(id = %id, "dropping event without listener"),
                    }
                    continue;
                }

                let message_id = response.header.message_id;
                if let Some((_, tx)) = shared.pending.remove(&message_id) {
                    let _ = tx.send(Ok(response));
                } else if shared.abandoned.remove(&message_id).is_some() {
                    tracing::trace!(id = %id, message_id, "discarding late response");
                } else {
                    tracing::warn!(id = %id, message_id, "response for unknown message id");
                    shared.shut_down(|| {
                        HotRodError::Protocol(format!(
                            "unexpected message id {} from {}",
                            message_id, address
                        ))
                    });
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(id = %id, address = %address, error = %e, "closing connection");
                let transport = matches!(e, HotRodError::Io(_));
                let message = e.to_string();
                shared.shut_down(|| {
                    if transport {
                        HotRodError::Connection(message.clone())
                    } else {
                        HotRodError::Protocol(message.clone())
                    }
                });
                return;
            }
            None => {
                tracing::debug!(id = %id, address = %address, "connection closed by server");
                shared.shut_down(|| {
                    HotRodError::Connection(format!("connection to {} closed by server", address))
                });
                return;
            }
        }
    }
}
