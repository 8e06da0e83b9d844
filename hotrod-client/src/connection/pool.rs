//! Per-server connection pools.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

use dashmap::DashMap;
use hotrod_core::{HotRodError, Result, ServerAddress};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::instrument;

use super::connection::{Connection, ConnectionOptions, EventSender};
use crate::config::{ConnectionPoolConfig, ExhaustedAction};
#[cfg(feature = "metrics")]
use crate::metrics::ClientMetrics;

/// A checked-out connection.
///
/// Holds one of the pool's request slots; dropping the guard returns it,
/// whether the operation succeeded or not.
#[derive(Debug)]
pub struct PooledConnection {
    connection: Arc<Connection>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// The shared connection behind this guard.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

#[derive(Debug, Default)]
struct PoolState {
    open: Vec<Arc<Connection>>,
    // Connects in progress; each holds a connection slot.
    connecting: usize,
    closed: bool,
}

/// A connection slot held while a connect runs without the pool lock.
///
/// Dropping it unfulfilled, on failure or cancellation, frees the slot.
struct ConnectReservation<'a> {
    pool: &'a ServerPool,
    pending: bool,
}

impl<'a> ConnectReservation<'a> {
    fn new(pool: &'a ServerPool, state: &mut PoolState) -> Self {
        state.connecting += 1;
        Self {
            pool,
            pending: true,
        }
    }

    fn fulfil(mut self, connection: Arc<Connection>) -> Result<Arc<Connection>> {
        self.pending = false;
        let mut state = self.pool.state();
        state.connecting -= 1;
        let closed = state.closed;
        if !closed {
            state.open.push(Arc::clone(&connection));
        }
        drop(state);
        self.pool.connected.notify_waiters();

        if closed {
            connection.close();
            return Err(HotRodError::Connection(format!(
                "connection pool for {} closed",
                self.pool.address
            )));
        }
        Ok(connection)
    }
}

impl Drop for ConnectReservation<'_> {
    fn drop(&mut self) {
        if self.pending {
            self.pool.state().connecting -= 1;
            self.pool.connected.notify_waiters();
        }
    }
}

/// Bounded set of pipelined connections to one server.
///
/// At most `max_connections_per_server` sockets are opened, each carrying up
/// to `max_pending_requests` requests at a time. Connects run outside the
/// pool lock, so callers that can share an open connection never queue
/// behind a slow connect.
#[derive(Debug)]
pub struct ServerPool {
    address: ServerAddress,
    options: ConnectionOptions,
    config: ConnectionPoolConfig,
    state: Mutex<PoolState>,
    connected: Notify,
    permits: Arc<Semaphore>,
    events: Option<EventSender>,
}

impl ServerPool {
    /// Creates an empty pool; connections are opened on demand.
    pub fn new(
        address: ServerAddress,
        options: ConnectionOptions,
        config: ConnectionPoolConfig,
        events: Option<EventSender>,
    ) -> Self {
        let slots = config.max_connections_per_server() * config.max_pending_requests();
        Self {
            address,
            options,
            config,
            state: Mutex::new(PoolState::default()),
            connected: Notify::new(),
            permits: Arc::new(Semaphore::new(slots)),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Server this pool connects to.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.state().open.len()
    }

    /// Request slots currently free.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Checks out a connection, opening one if all existing ones are busy.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let exhausted = || {
            HotRodError::Connection(format!("connection pool for {} exhausted", self.address))
        };
        let permit = match self.config.exhausted_action() {
            ExhaustedAction::Wait => {
                let max_wait = self.config.max_wait();
                timeout(max_wait, Arc::clone(&self.permits).acquire_owned())
                    .await
                    .map_err(|_| {
                        HotRodError::Timeout(format!(
                            "no connection to {} available within {:?}",
                            self.address, max_wait
                        ))
                    })?
                    .map_err(|_| exhausted())?
            }
            ExhaustedAction::Exception => Arc::clone(&self.permits)
                .try_acquire_owned()
                .map_err(|_| exhausted())?,
        };

        let max_connections = self.config.max_connections_per_server();
        let reservation = loop {
            let connected = self.connected.notified();
            tokio::pin!(connected);
            {
                let mut state = self.state();
                state.open.retain(|c| !c.is_closed());
                let slots_taken = state.open.len() + state.connecting;

                let least_busy = state
                    .open
                    .iter()
                    .min_by_key(|c| c.in_flight())
                    .filter(|c| c.in_flight() == 0 || slots_taken >= max_connections)
                    .cloned();
                if let Some(connection) = least_busy {
                    return Ok(PooledConnection {
                        connection,
                        _permit: permit,
                    });
                }
                if slots_taken < max_connections {
                    break ConnectReservation::new(self, &mut state);
                }
                // Every slot is a connect still in progress.
                connected.as_mut().enable();
            }
            connected.await;
        };

        let connection =
            Connection::connect(&self.address, &self.options, self.events.clone()).await?;
        let connection = reservation.fulfil(Arc::new(connection))?;
        Ok(PooledConnection {
            connection,
            _permit: permit,
        })
    }

    /// Closes every connection of this pool.
    pub fn close(&self) {
        let connections: Vec<Arc<Connection>> = {
            let mut state = self.state();
            state.closed = true;
            state.open.drain(..).collect()
        };
        for connection in connections {
            connection.close();
        }
        self.permits.close();
        self.connected.notify_waiters();
    }
}

/// Pools for every server the client talks to.
#[derive(Debug)]
pub struct ConnectionManager {
    pools: DashMap<ServerAddress, Arc<ServerPool>>,
    options: ConnectionOptions,
    pool_config: ConnectionPoolConfig,
    events: Option<EventSender>,
    #[cfg(feature = "metrics")]
    metrics: OnceLock<Arc<ClientMetrics>>,
}

impl ConnectionManager {
    /// Creates a manager without any pool.
    pub fn new(
        options: ConnectionOptions,
        pool_config: ConnectionPoolConfig,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            pools: DashMap::new(),
            options,
            pool_config,
            events,
            #[cfg(feature = "metrics")]
            metrics: OnceLock::new(),
        }
    }

    /// Counts connections opened and closed from now on.
    ///
    /// Only the first call has an effect.
    #[cfg(feature = "metrics")]
    pub fn attach_metrics(&self, metrics: Arc<ClientMetrics>) {
        let _ = self.metrics.set(metrics);
    }

    /// The pool of `address`, created on first use.
    pub fn pool(&self, address: &ServerAddress) -> Arc<ServerPool> {
        let pool = self.pools.entry(address.clone()).or_insert_with(|| {
            #[allow(unused_mut)]
            let mut options = self.options.clone();
            #[cfg(feature = "metrics")]
            if let Some(metrics) = self.metrics.get() {
                options.metrics = Some(Arc::clone(metrics));
            }
            Arc::new(ServerPool::new(
                address.clone(),
                options,
                self.pool_config.clone(),
                self.events.clone(),
            ))
        });
        Arc::clone(pool.value())
    }

    /// Checks out a connection to `address`.
    #[instrument(name = "connection_manager.acquire", skip(self), fields(address = %address))]
    pub async fn acquire(&self, address: &ServerAddress) -> Result<PooledConnection> {
        self.pool(address).acquire().await
    }

    /// Servers with an open pool.
    pub fn servers(&self) -> Vec<ServerAddress> {
        self.pools.iter().map(|e| e.key().clone()).collect()
    }

    /// Closes and forgets the pools of servers that left the cluster.
    pub fn close_servers(&self, servers: &[ServerAddress]) {
        for address in servers {
            if let Some((_, pool)) = self.pools.remove(address) {
                tracing::debug!(address = %address, "closing pool of departed server");
                pool.close();
            }
        }
    }

    /// Closes every pool.
    pub fn shutdown(&self) {
        let pools: Vec<Arc<ServerPool>> =
            self.pools.iter().map(|e| Arc::clone(e.value())).collect();
        self.pools.clear();
        for pool in pools {
            pool.close();
        }
    }
}
