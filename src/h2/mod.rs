//! HTTP/2 connection and stream-multiplexing engine
//!
//! The engine is built leaf-first: a stateless frame codec, an async
//! flow-control credit holder, the per-stream state machine, the
//! admission/routing pool, and finally the connection with its single
//! read loop and single write loop.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frames;
pub mod pool;
pub mod settings;
pub mod stream;
pub mod window;
pub mod write_queue;

pub use connection::{Connection, ConnectionState};
pub use error::{Error, ErrorCode, Result};
pub use frames::{Frame, FrameFlags, FrameType, PrioritySpec};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{StreamManager, StreamState};
pub use window::WindowSize;

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Default cap on concurrently open streams when the peer does not
/// advertise one
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Maximum flow-control window size (2^31 - 1)
pub const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
