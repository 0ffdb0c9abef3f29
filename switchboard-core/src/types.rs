//! Core identity types.
//!
//! A channel endpoint is identified by the `"host:port"` pair it announces
//! during the identify handshake. [`HostPort`] is that identity: validated
//! on construction, printable, and usable as a registry key.

use serde::{Deserialize, Serialize};

/// A validated `"host:port"` endpoint identity.
///
/// The host part is kept as a string (it may be an IP literal or a name
/// resolvable by the connector); the port is numeric. Parsing and display
/// round-trip, and the display form is what travels in init frames.
///
/// # Examples
///
/// ```
/// use switchboard_core::HostPort;
///
/// let hp = HostPort::parse("127.0.0.1:4040").expect("parse");
/// assert_eq!(hp.host(), "127.0.0.1");
/// assert_eq!(hp.port(), 4040);
/// assert_eq!(hp.to_string(), "127.0.0.1:4040");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    /// Create a host/port identity from parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or contains a `:` (IPv6
    /// literals must use bracket notation).
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, HostPortParseError> {
        let host = host.into();
        if host.is_empty() {
            return Err(HostPortParseError::MissingHost);
        }
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(HostPortParseError::InvalidHost);
        }
        Ok(Self { host, port })
    }

    /// Parse from string `"host:port"` format.
    ///
    /// Supports IPv6 bracket notation (`[::1]:4040`).
    ///
    /// # Errors
    ///
    /// Returns an error if the separator is missing or either part is
    /// malformed.
    pub fn parse(s: &str) -> Result<Self, HostPortParseError> {
        let (host, port_str) = s.rsplit_once(':').ok_or(HostPortParseError::MissingPort)?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| HostPortParseError::InvalidPort)?;
        Self::new(host, port)
    }

    /// The host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the port is the unbound wildcard (0).
    ///
    /// A wildcard port is acceptable before listening; the canonical
    /// identity is fixed once the listener reports its bound port.
    pub fn is_wildcard_port(&self) -> bool {
        self.port == 0
    }

    /// Return the same host with a different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host.clone(),
            port,
        }
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for HostPort {
    type Err = HostPortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error parsing a host/port identity from string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostPortParseError {
    /// The host part is empty.
    #[error("missing host")]
    MissingHost,
    /// The host part is malformed.
    #[error("invalid host")]
    InvalidHost,
    /// The port number could not be parsed.
    #[error("invalid port number")]
    InvalidPort,
    /// No port separator (`:`) found in the input.
    #[error("missing port separator")]
    MissingPort,
}
