//! Transport boundary
//!
//! The engine never opens sockets or negotiates TLS; it is handed an
//! already-established duplex byte stream and owns it exclusively from
//! then on (read half in the read loop, write half in the write loop).

use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// An established duplex byte stream the engine can drive
///
/// Blanket-implemented for anything async-readable and -writable; TLS
/// streams, TCP streams and in-memory test pipes all qualify.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

/// Remote endpoint identity: the connection-pool key
///
/// Host comparison is case-insensitive; the host is lowercased at
/// construction so equality and hashing stay cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Authority {
    host: String,
    port: u16,
    secure: bool,
}

impl Authority {
    /// Create an authority; the host is normalized to lowercase
    pub fn new(host: &str, port: u16, secure: bool) -> Self {
        Authority {
            host: host.to_ascii_lowercase(),
            port,
            secure,
        }
    }

    /// Normalized (lowercase) host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the transport to this endpoint is TLS
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}
