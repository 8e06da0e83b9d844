//! Client listeners for server-pushed cache events.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use hotrod_core::protocol::{CacheEvent, CacheEventKind, Request};
use hotrod_core::{HotRodError, Result, ServerAddress};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::connection::{ConnectionEvent, ConnectionId};
use crate::dispatcher::OperationDispatcher;

/// Unique identifier for a listener registration.
///
/// Sent to the server as the 16 raw bytes of a UUID; the server echoes it
/// in every event addressed to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new unique listener ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wire form of the id.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }

    /// Parses the wire form.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Receives entry events for one cache.
///
/// Callbacks run on the client's event task, one at a time, so they should
/// return quickly.
pub trait ClientCacheListener: Send + Sync {
    /// An entry was created.
    fn on_created(&self, event: &CacheEvent) {
        let _ = event;
    }

    /// An entry was modified.
    fn on_modified(&self, event: &CacheEvent) {
        let _ = event;
    }

    /// An entry was removed.
    fn on_removed(&self, event: &CacheEvent) {
        let _ = event;
    }

    /// An entry expired.
    fn on_expired(&self, event: &CacheEvent) {
        let _ = event;
    }

    /// The connection carrying this listener closed.
    ///
    /// Events may have been missed. Called before the listener is
    /// registered again elsewhere.
    fn on_failover(&self) {}
}

/// The request registering listener `id`.
pub(crate) fn add_listener_request(id: ListenerId) -> Request {
    Request::AddClientListener {
        listener_id: id.to_bytes(),
        include_current_state: false,
        filter_factory: String::new(),
        converter_factory: String::new(),
    }
}

#[derive(Clone)]
struct Registration {
    cache_name: String,
    server: ServerAddress,
    // Set once the server acknowledged the registration.
    connection: Option<ConnectionId>,
    listener: Arc<dyn ClientCacheListener>,
}

/// Routes events from every connection to the registered listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    registrations: DashMap<ListenerId, Registration>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.registrations.len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the task delivering events received on `events`.
    ///
    /// Listeners whose connection closes are registered again through
    /// `dispatcher`. The task handles one event at a time, so events that
    /// arrive during a failover wait until it is done.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
        dispatcher: Weak<OperationDispatcher>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ConnectionEvent::Cache(event) => registry.dispatch(&event),
                    ConnectionEvent::Closed { id, address } => {
                        if let Some(dispatcher) = dispatcher.upgrade() {
                            registry.fail_over(&dispatcher, id, &address).await;
                        }
                    }
                }
            }
            tracing::debug!("event channel closed");
        })
    }

    /// Records a listener registered on `server` for `cache_name`.
    pub fn register(
        &self,
        id: ListenerId,
        cache_name: &str,
        server: ServerAddress,
        listener: Arc<dyn ClientCacheListener>,
    ) {
        self.registrations.insert(
            id,
            Registration {
                cache_name: cache_name.to_string(),
                server,
                connection: None,
                listener,
            },
        );
    }

    /// Records that `server` acknowledged listener `id` on `connection`.
    ///
    /// Returns `false` when the listener was unregistered meanwhile.
    pub fn bind(&self, id: &ListenerId, server: ServerAddress, connection: ConnectionId) -> bool {
        match self.registrations.get_mut(id) {
            Some(mut registration) => {
                registration.server = server;
                registration.connection = Some(connection);
                true
            }
            None => false,
        }
    }

    /// Forgets a listener, returning the server it was registered on.
    pub fn unregister(&self, id: &ListenerId) -> Option<ServerAddress> {
        self.registrations.remove(id).map(|(_, r)| r.server)
    }

    /// Server a listener was registered on.
    pub fn server_of(&self, id: &ListenerId) -> Option<ServerAddress> {
        self.registrations.get(id).map(|r| r.server.clone())
    }

    /// Cache a listener belongs to.
    pub fn cache_of(&self, id: &ListenerId) -> Option<String> {
        self.registrations.get(id).map(|r| r.cache_name.clone())
    }

    /// Listeners registered on `server`.
    pub fn listeners_on(&self, server: &ServerAddress) -> Vec<ListenerId> {
        self.registrations
            .iter()
            .filter(|e| &e.value().server == server)
            .map(|e| *e.key())
            .collect()
    }

    /// Listeners whose events arrive on `connection`.
    pub fn listeners_on_connection(&self, connection: ConnectionId) -> Vec<ListenerId> {
        self.registrations
            .iter()
            .filter(|e| e.value().connection == Some(connection))
            .map(|e| *e.key())
            .collect()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Delivers one event to its listener.
    pub fn dispatch(&self, event: &CacheEvent) {
        let listener = ListenerId::from_bytes(&event.listener_id)
            .and_then(|id| self.registrations.get(&id).map(|r| Arc::clone(&r.listener)));
        let Some(listener) = listener else {
            tracing::trace!(kind = ?event.kind, "event for unknown listener");
            return;
        };
        match event.kind {
            CacheEventKind::Created => listener.on_created(event),
            CacheEventKind::Modified => listener.on_modified(event),
            CacheEventKind::Removed => listener.on_removed(event),
            CacheEventKind::Expired => listener.on_expired(event),
        }
    }

    /// Registers again every listener that lived on a closed connection.
    ///
    /// Each listener is told first, so state it derived from events can be
    /// dropped. Another server is preferred; the one that closed the
    /// connection is used only when no other is known.
    pub async fn fail_over(
        &self,
        dispatcher: &OperationDispatcher,
        connection: ConnectionId,
        address: &ServerAddress,
    ) {
        for id in self.listeners_on_connection(connection) {
            let Some(registration) = self.registrations.get(&id).map(|r| r.clone()) else {
                continue;
            };
            registration.listener.on_failover();
            match self.register_again(dispatcher, id, &registration.cache_name, address).await {
                Ok(Some(server)) => tracing::info!(
                    listener = %id,
                    cache = %registration.cache_name,
                    from = %address,
                    to = %server,
                    "listener failed over"
                ),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    listener = %id,
                    cache = %registration.cache_name,
                    error = %e,
                    "listener failover failed"
                ),
            }
        }
    }

    async fn register_again(
        &self,
        dispatcher: &OperationDispatcher,
        id: ListenerId,
        cache_name: &str,
        closed: &ServerAddress,
    ) -> Result<Option<ServerAddress>> {
        let tracker = dispatcher.tracker();
        let attempts = dispatcher.config().max_retries().max(1);
        let mut failed: HashSet<ServerAddress> = HashSet::new();
        failed.insert(closed.clone());
        let mut last_error = None;

        for _ in 0..attempts {
            if !self.registrations.contains_key(&id) {
                return Ok(None);
            }
            let server = tracker
                .route(cache_name, None, &failed)
                .or_else(|| tracker.route(cache_name, None, &HashSet::new()));
            let Some(server) = server else {
                break;
            };

            match dispatcher
                .execute_on_connection(&server, cache_name, 0, add_listener_request(id))
                .await
            {
                Ok((_, connection)) => {
                    if self.bind(&id, server.clone(), connection) {
                        return Ok(Some(server));
                    }
                    // Removed while failing over; drop the new registration.
                    let request = Request::RemoveClientListener {
                        listener_id: id.to_bytes(),
                    };
                    dispatcher.execute_on(&server, cache_name, 0, request).await?;
                    return Ok(None);
                }
                Err(e) => {
                    failed.insert(server);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            HotRodError::Connection(format!(
                "no server available to register a listener on cache '{}'",
                cache_name
            ))
        }))
    }
}
