//! HTTP/2 engine error types
//!
//! The error taxonomy separates faults by blast radius: wire-level and
//! transport errors are fatal to the whole connection, stream-level
//! errors (resets, cancellation) are isolated to one exchange.

use std::fmt;

/// Errors surfaced by the HTTP/2 engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the shared transport (fatal to the connection)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire-level decode failure (fatal to the connection)
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The peer never acknowledged our SETTINGS within the configured
    /// timeout; the connection never reached the ready state
    #[error("Settings timeout")]
    SettingsTimeout,

    /// RST_STREAM was sent or received for this stream (fatal to the
    /// stream only)
    #[error("Stream reset: {0}")]
    StreamReset(ErrorCode),

    /// The connection's read or write loop died; broadcast to every
    /// live and future stream
    #[error("Connection faulted")]
    ConnectionFaulted,

    /// Caller-initiated or timeout-initiated abandonment of one
    /// stream's operation
    #[error("Cancelled")]
    Cancelled,

    /// Header block compression or decompression failure (fatal to the
    /// connection: HPACK state is shared)
    #[error("Compression error: {0}")]
    Compression(String),

    /// Invalid configuration or settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),
}

impl Error {
    /// Whether this error takes down the whole connection rather than a
    /// single stream
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::MalformedFrame(_)
                | Error::SettingsTimeout
                | Error::ConnectionFaulted
                | Error::Compression(_)
        )
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ErrorCode::NoError.as_u32(), 0x0);
        assert_eq!(ErrorCode::Cancel.as_u32(), 0x8);
        assert_eq!(ErrorCode::Http11Required.as_u32(), 0xd);

        assert_eq!(ErrorCode::from_u32(0x0), Some(ErrorCode::NoError));
        assert_eq!(ErrorCode::from_u32(0x8), Some(ErrorCode::Cancel));
        assert_eq!(ErrorCode::from_u32(0xff), None);
    }

    #[test]
    fn test_error_display() {
        let err = Error::StreamReset(ErrorCode::Cancel);
        assert_eq!(err.to_string(), "Stream reset: CANCEL (0x8)");

        let err = Error::MalformedFrame("short header".to_string());
        assert_eq!(err.to_string(), "Malformed frame: short header");
    }

    #[test]
    fn test_fatality_split() {
        assert!(Error::MalformedFrame(String::new()).is_connection_fatal());
        assert!(Error::SettingsTimeout.is_connection_fatal());
        assert!(!Error::StreamReset(ErrorCode::Cancel).is_connection_fatal());
        assert!(!Error::Cancelled.is_connection_fatal());
    }
}
