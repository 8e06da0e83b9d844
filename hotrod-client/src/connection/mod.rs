//! Connection management for the Hot Rod client.

mod connection;
mod load_balancer;
mod pool;

pub use connection::{Connection, ConnectionEvent, ConnectionId, ConnectionOptions, EventSender};
pub use load_balancer::{
    create_balancer, FailoverRequestBalancingStrategy, RandomBalancingStrategy,
    RoundRobinBalancingStrategy,
};
pub use pool::{ConnectionManager, PooledConnection, ServerPool};
