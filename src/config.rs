//! Engine configuration.
//!
//! `EngineConfig` groups the tunables for the resolver cache and the peer
//! protocol's idle/backoff behavior, the way `Config` groups workspace and
//! sync settings.

/// Configuration for a [`crate::engine::Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of resolved paths cached by the path resolver.
    pub resolver_cache_capacity: usize,

    /// How long a `Synchronizing` peer may stay silent before the driver
    /// moves it to `Reconnecting`.
    pub peer_idle_timeout: std::time::Duration,

    /// Base delay for the peer reconnect backoff (first retry).
    pub reconnect_backoff_base: std::time::Duration,

    /// Maximum delay for the peer reconnect backoff.
    pub reconnect_backoff_max: std::time::Duration,

    /// Number of reconnect attempts to allow before giving up on a peer.
    pub max_reconnect_attempts: u32,

    /// Number of local/remote messages to buffer for a peer in the
    /// `Reconnecting` state before the oldest are dropped.
    pub reconnect_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver_cache_capacity: 1024,
            peer_idle_timeout: std::time::Duration::from_secs(30),
            reconnect_backoff_base: std::time::Duration::from_millis(500),
            reconnect_backoff_max: std::time::Duration::from_secs(30),
            max_reconnect_attempts: 10,
            reconnect_buffer_size: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_bounds() {
        let cfg = EngineConfig::default();
        assert!(cfg.reconnect_backoff_base < cfg.reconnect_backoff_max);
        assert!(cfg.resolver_cache_capacity > 0);
    }
}
