//! Common test utilities for integration tests.
//!
//! [`MockServer`] speaks enough Hot Rod to exercise the client: a versioned
//! key/value store shared by every server of a [`Cluster`], listener events,
//! topology frames, injected error statuses and dropped connections.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use hotrod_client::core::protocol::constants::*;
use hotrod_client::core::protocol::{
    CacheEvent, CacheEventKind, MetadataValue, Request, RequestFrame, Response, ResponseBody,
    ResponseHeader, ServerCodec, ServerHash, TopologyUpdate, VersionedValue,
};
use hotrod_client::{ClientConfig, ClientConfigBuilder, ServerAddress};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::codec::Framed;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    version: i64,
}

struct Subscriber {
    listener_id: Bytes,
    events: mpsc::UnboundedSender<Response>,
}

/// Data shared by the servers of one simulated cluster.
#[derive(Default)]
pub struct Cluster {
    entries: Mutex<HashMap<Bytes, StoredEntry>>,
    versions: AtomicI64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Cluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Writes an entry behind the clients' back, without events.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> i64 {
        let version = self.next_version();
        self.entries.lock().unwrap().insert(
            Bytes::copy_from_slice(key),
            StoredEntry {
                value: Bytes::copy_from_slice(value),
                version,
            },
        );
        version
    }

    pub fn value(&self, key: &[u8]) -> Option<Bytes> {
        self.entries.lock().unwrap().get(key).map(|e| e.value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    fn next_version(&self) -> i64 {
        self.versions.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, kind: CacheEventKind, key: &Bytes, version: Option<i64>) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| {
            let event = Response {
                header: ResponseHeader {
                    message_id: 0,
                    opcode: kind.opcode(),
                    status: NO_ERROR_STATUS,
                    topology: None,
                },
                body: ResponseBody::Event(CacheEvent {
                    listener_id: s.listener_id.clone(),
                    kind,
                    key: key.clone(),
                    version,
                    is_retried: false,
                    custom_data: None,
                }),
            };
            s.events.send(event).is_ok()
        });
    }
}

struct ServerState {
    cluster: Arc<Cluster>,
    counts: Mutex<HashMap<u8, usize>>,
    topology: Mutex<Option<TopologyUpdate>>,
    failures: AtomicUsize,
    errors: Mutex<VecDeque<(u8, String)>>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl ServerState {
    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// An in-process Hot Rod server bound to `127.0.0.1:0`.
pub struct MockServer {
    address: ServerAddress,
    state: Arc<ServerState>,
    accept: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server with its own store.
    pub async fn start() -> Self {
        Self::start_in(Cluster::new()).await
    }

    /// Starts a server sharing `cluster` with other servers.
    pub async fn start_in(cluster: Arc<Cluster>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = ServerAddress::from(listener.local_addr().unwrap());
        let state = Arc::new(ServerState {
            cluster,
            counts: Mutex::new(HashMap::new()),
            topology: Mutex::new(None),
            failures: AtomicUsize::new(0),
            errors: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(Vec::new()),
        });

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handle = tokio::spawn(serve(stream, Arc::clone(&accept_state)));
                accept_state.tasks.lock().unwrap().push(handle.abort_handle());
            }
        });

        Self {
            address,
            state,
            accept,
        }
    }

    pub fn address(&self) -> ServerAddress {
        self.address.clone()
    }

    /// `host:port` form for configuration builders.
    pub fn endpoint(&self) -> String {
        self.address.to_string()
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.state.cluster
    }

    /// Requests received with `opcode`, failed ones included.
    pub fn count(&self, opcode: u8) -> usize {
        self.state
            .counts
            .lock()
            .unwrap()
            .get(&opcode)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.state.counts.lock().unwrap().values().sum()
    }

    /// Announces `topology` to every client still sending another id.
    pub fn set_topology(&self, topology: TopologyUpdate) {
        *self.state.topology.lock().unwrap() = Some(topology);
    }

    /// Drops the connection instead of answering the next `n` requests.
    pub fn fail_next(&self, n: usize) {
        self.state.failures.store(n, Ordering::SeqCst);
    }

    /// Answers the next request with an error frame.
    pub fn respond_with_error(&self, status: u8, message: &str) {
        self.state
            .errors
            .lock()
            .unwrap()
            .push_back((status, message.to_string()));
    }

    /// Stops accepting and closes every connection.
    pub fn shutdown(&self) {
        self.accept.abort();
        for task in self.state.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve(stream: TcpStream, state: Arc<ServerState>) {
    let (mut sink, mut requests) = Framed::new(stream, ServerCodec::new()).split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            if sink.send(response).await.is_err() {
                break;
            }
        }
    });
    state.tasks.lock().unwrap().push(writer.abort_handle());

    while let Some(Ok(frame)) = requests.next().await {
        *state
            .counts
            .lock()
            .unwrap()
            .entry(frame.header.opcode)
            .or_default() += 1;
        if state.take_failure() {
            break;
        }
        let injected = state.errors.lock().unwrap().pop_front();
        let response = match injected {
            Some((status, message)) => Response {
                header: ResponseHeader {
                    message_id: frame.header.message_id,
                    opcode: ERROR_RESPONSE,
                    status,
                    topology: None,
                },
                body: ResponseBody::Error(message),
            },
            None => handle(&state, frame, &tx),
        };
        if tx.send(response).is_err() {
            break;
        }
    }
    writer.abort();
}

fn written(force: bool, executed: bool, previous: Option<Bytes>) -> (u8, ResponseBody) {
    match (force, executed) {
        (true, true) => (SUCCESS_WITH_PREVIOUS, ResponseBody::Previous(previous)),
        (true, false) => (NOT_EXECUTED_WITH_PREVIOUS, ResponseBody::Previous(previous)),
        (false, true) => (NO_ERROR_STATUS, ResponseBody::Empty),
        (false, false) => (NOT_PUT_REMOVED_REPLACED_STATUS, ResponseBody::Empty),
    }
}

fn handle(
    state: &ServerState,
    frame: RequestFrame,
    tx: &mpsc::UnboundedSender<Response>,
) -> Response {
    let cluster = &state.cluster;
    let force = frame.header.flags & FLAG_FORCE_RETURN_VALUE != 0;

    let (status, body) = match frame.request {
        Request::Get { key } => match cluster.value(&key) {
            Some(value) => (NO_ERROR_STATUS, ResponseBody::Value(Some(value))),
            None => (KEY_DOES_NOT_EXIST_STATUS, ResponseBody::Value(None)),
        },
        Request::Put { key, value, .. } => {
            let version = cluster.next_version();
            let previous = cluster
                .entries
                .lock()
                .unwrap()
                .insert(key.clone(), StoredEntry { value, version })
                .map(|e| e.value);
            let kind = if previous.is_some() {
                CacheEventKind::Modified
            } else {
                CacheEventKind::Created
            };
            cluster.notify(kind, &key, Some(version));
            written(force, true, previous)
        }
        Request::PutIfAbsent { key, value, .. } => {
            let version = cluster.next_version();
            let existing = {
                let mut entries = cluster.entries.lock().unwrap();
                match entries.get(&key) {
                    Some(e) => Some(e.value.clone()),
                    None => {
                        entries.insert(key.clone(), StoredEntry { value, version });
                        None
                    }
                }
            };
            if existing.is_none() {
                cluster.notify(CacheEventKind::Created, &key, Some(version));
            }
            written(force, existing.is_none(), existing)
        }
        Request::Replace { key, value, .. } => {
            let version = cluster.next_version();
            let previous = {
                let mut entries = cluster.entries.lock().unwrap();
                entries
                    .get_mut(&key)
                    .map(|e| std::mem::replace(e, StoredEntry { value, version }).value)
            };
            if previous.is_some() {
                cluster.notify(CacheEventKind::Modified, &key, Some(version));
            }
            written(force, previous.is_some(), previous)
        }
        Request::ReplaceIfUnmodified {
            key,
            value,
            version,
            ..
        } => {
            let next = cluster.next_version();
            let outcome = {
                let mut entries = cluster.entries.lock().unwrap();
                match entries.get_mut(&key) {
                    None => None,
                    Some(e) if e.version != version => Some((false, e.value.clone())),
                    Some(e) => {
                        let old = std::mem::replace(
                            e,
                            StoredEntry {
                                value,
                                version: next,
                            },
                        );
                        Some((true, old.value))
                    }
                }
            };
            match outcome {
                None => (KEY_DOES_NOT_EXIST_STATUS, ResponseBody::Empty),
                Some((executed, previous)) => {
                    if executed {
                        cluster.notify(CacheEventKind::Modified, &key, Some(next));
                    }
                    written(force, executed, Some(previous))
                }
            }
        }
        Request::Remove { key } => {
            let removed = cluster.entries.lock().unwrap().remove(&key);
            match removed {
                Some(old) => {
                    cluster.notify(CacheEventKind::Removed, &key, None);
                    written(force, true, Some(old.value))
                }
                None => (KEY_DOES_NOT_EXIST_STATUS, ResponseBody::Empty),
            }
        }
        Request::RemoveIfUnmodified { key, version } => {
            let outcome = {
                let mut entries = cluster.entries.lock().unwrap();
                match entries.get(&key).map(|e| (e.version, e.value.clone())) {
                    None => None,
                    Some((current, value)) if current != version => Some((false, value)),
                    Some((_, value)) => {
                        entries.remove(&key);
                        Some((true, value))
                    }
                }
            };
            match outcome {
                None => (KEY_DOES_NOT_EXIST_STATUS, ResponseBody::Empty),
                Some((executed, previous)) => {
                    if executed {
                        cluster.notify(CacheEventKind::Removed, &key, None);
                    }
                    written(force, executed, Some(previous))
                }
            }
        }
        Request::ContainsKey { key } => {
            if cluster.value(&key).is_some() {
                (NO_ERROR_STATUS, ResponseBody::Empty)
            } else {
                (KEY_DOES_NOT_EXIST_STATUS, ResponseBody::Empty)
            }
        }
        Request::GetWithVersion { key } => {
            let entry = cluster.entries.lock().unwrap().get(&key).cloned();
            match entry {
                Some(e) => (
                    NO_ERROR_STATUS,
                    ResponseBody::Versioned(VersionedValue {
                        value: e.value,
                        version: e.version,
                    }),
                ),
                None => (KEY_DOES_NOT_EXIST_STATUS, ResponseBody::Empty),
            }
        }
        Request::GetWithMetadata { key } => {
            let entry = cluster.entries.lock().unwrap().get(&key).cloned();
            match entry {
                Some(e) => (
                    NO_ERROR_STATUS,
                    ResponseBody::Metadata(MetadataValue {
                        value: e.value,
                        version: e.version,
                        created: -1,
                        lifespan: -1,
                        last_used: -1,
                        max_idle: -1,
                    }),
                ),
                None => (KEY_DOES_NOT_EXIST_STATUS, ResponseBody::Empty),
            }
        }
        Request::Clear => {
            cluster.entries.lock().unwrap().clear();
            (NO_ERROR_STATUS, ResponseBody::Empty)
        }
        Request::Stats => (
            NO_ERROR_STATUS,
            ResponseBody::Stats(vec![(
                "currentNumberOfEntries".to_string(),
                cluster.len().to_string(),
            )]),
        ),
        Request::Ping => (NO_ERROR_STATUS, ResponseBody::Empty),
        Request::Size => (NO_ERROR_STATUS, ResponseBody::Size(cluster.len() as u64)),
        Request::AddClientListener { listener_id, .. } => {
            cluster.subscribers.lock().unwrap().push(Subscriber {
                listener_id,
                events: tx.clone(),
            });
            (NO_ERROR_STATUS, ResponseBody::Empty)
        }
        Request::RemoveClientListener { listener_id } => {
            cluster
                .subscribers
                .lock()
                .unwrap()
                .retain(|s| s.listener_id != listener_id);
            (NO_ERROR_STATUS, ResponseBody::Empty)
        }
    };

    let topology = state
        .topology
        .lock()
        .unwrap()
        .clone()
        .filter(|t| t.topology_id != frame.header.topology_id);

    Response {
        header: ResponseHeader {
            message_id: frame.header.message_id,
            opcode: frame.header.opcode + 1,
            status,
            topology,
        },
        body,
    }
}

/// Topology announcing `servers` with evenly spread hash ids, one owner per
/// segment and one segment per server.
pub fn topology(topology_id: i32, servers: &[&MockServer]) -> TopologyUpdate {
    let step = i32::MAX / servers.len() as i32;
    TopologyUpdate {
        topology_id,
        num_owners: 1,
        hash_function_version: 2,
        num_segments: servers.len() as i32,
        servers: servers
            .iter()
            .enumerate()
            .map(|(i, s)| ServerHash {
                address: s.address(),
                hash_id: step * i as i32 + i as i32,
            })
            .collect(),
    }
}

/// Builder preconfigured for fast failing tests against `servers`.
pub fn config_for(servers: &[&MockServer]) -> ClientConfigBuilder {
    ClientConfig::builder()
        .servers(servers.iter().map(|s| s.endpoint()))
        .ping_on_start(false)
        .connect_timeout(Duration::from_secs(2))
        .socket_timeout(Duration::from_secs(2))
}

pub fn key(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Polls `condition` until it holds or two seconds passed.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// An endpoint nothing listens on.
pub fn dead_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{}", port)
}
