//! h2mux - Upstream HTTP/2 engine for an intercepting proxy
//!
//! This crate provides the client side of an HTTP/2 connection: it
//! multiplexes many logical request/response exchanges over a single
//! established byte stream, enforces connection- and stream-level flow
//! control, and serializes all outbound frames through a single writer
//! while a single reader demultiplexes inbound frames back to the owning
//! exchange.
//!
//! Transport establishment (TCP, TLS, ALPN) is the caller's job; the
//! engine accepts anything implementing [`transport::Transport`].

pub mod cancel;
pub mod exchange;
pub mod h2;
pub mod headers;
pub mod pool;
pub mod transport;

pub use exchange::{Exchange, RequestHead, ResponseHandle, ResponseHead};
pub use h2::config::ConnectionConfig;
pub use h2::connection::Connection;
pub use h2::error::{Error, ErrorCode, Result};
pub use pool::ConnectionPool;
pub use transport::Authority;
