//! Server addresses as carried in configuration and topology frames.

use std::fmt;
use std::str::FromStr;

use crate::error::HotRodError;
use crate::protocol::constants::DEFAULT_PORT;

/// A Hot Rod server endpoint.
///
/// Hosts are kept as strings so that names announced by the server are
/// resolved at connect time rather than when the topology is decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Creates an address from a host name or IP and a port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = HotRodError;

    /// Parses `host`, `host:port` or `[v6]:port`. A missing port means 11222.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HotRodError::Configuration("empty server address".to_string()));
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let end = rest.find(']').ok_or_else(|| {
                HotRodError::Configuration(format!("unterminated IPv6 address: {}", s))
            })?;
            let host = &rest[..end];
            let port = rest[end + 1..].strip_prefix(':');
            (host, port)
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                _ => (s, None),
            }
        };

        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| {
                HotRodError::Configuration(format!("invalid port in address: {}", s))
            })?,
            None => DEFAULT_PORT,
        };

        if host.is_empty() {
            return Err(HotRodError::Configuration(format!("missing host in address: {}", s)));
        }
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for ServerAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
