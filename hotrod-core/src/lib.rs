//! Core types for the Hot Rod remote cache protocol.
//!
//! This crate holds everything that does not touch the network: the error
//! taxonomy, the binary codec for requests, responses, topology frames and
//! events, and the hash functions used to route keys to segments.

#![warn(missing_docs)]

pub mod address;
pub mod error;
pub mod hash;
pub mod protocol;

pub use address::ServerAddress;
pub use error::{HotRodError, Result};
pub use hash::{HashFunction, HashFunctionRegistry};
