//! Connection configuration
//!
//! Local settings plus the connection-scoped knobs that are not part of
//! the SETTINGS exchange: the settings-ack timeout and the read buffer
//! size (which must be able to hold a full frame).

use super::error::{Error, Result};
use super::settings::{Settings, SettingsBuilder};
use super::{DEFAULT_MAX_CONCURRENT_STREAMS, DEFAULT_MAX_FRAME_SIZE};
use std::time::Duration;

/// Configuration for one HTTP/2 connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Settings advertised to the peer. Push is always advertised
    /// disabled regardless of what the caller sets here.
    pub settings: Settings,
    /// How long to wait for the peer to acknowledge our SETTINGS before
    /// failing the handshake
    pub settings_ack_timeout: Duration,
    /// Read buffer capacity; must be at least the local max frame size
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        ConnectionConfig::default()
    }

    /// Replace the advertised settings
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the settings-ack timeout
    pub fn settings_ack_timeout(mut self, timeout: Duration) -> Self {
        self.settings_ack_timeout = timeout;
        self
    }

    /// Set the read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Local cap on concurrently open streams, used until the peer
    /// advertises its own limit
    pub fn local_max_concurrent_streams(&self) -> u32 {
        self.settings
            .get_max_concurrent_streams()
            .unwrap_or(DEFAULT_MAX_CONCURRENT_STREAMS)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        let max_frame = self.settings.get_max_frame_size() as usize;
        if self.read_buffer_size < max_frame {
            return Err(Error::InvalidSettings(format!(
                "Read buffer size {} is smaller than max frame size {}",
                self.read_buffer_size, max_frame
            )));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        // enable_push is advertised false: this engine rejects server push
        let settings = SettingsBuilder::new()
            .enable_push(false)
            .max_concurrent_streams(DEFAULT_MAX_CONCURRENT_STREAMS)
            .build()
            .unwrap_or_default();

        ConnectionConfig {
            settings,
            settings_ack_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_MAX_FRAME_SIZE as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.settings.get_enable_push(), false);
        assert_eq!(
            config.local_max_concurrent_streams(),
            DEFAULT_MAX_CONCURRENT_STREAMS
        );
    }

    #[test]
    fn test_read_buffer_must_hold_a_frame() {
        let config = ConnectionConfig::default().read_buffer_size(1024);
        assert!(config.validate().is_err());
    }
}
