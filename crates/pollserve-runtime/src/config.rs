//! Server configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use pollserve_runtime::ServerConfig;
//!
//! // Defaults with env overrides
//! let config = ServerConfig::from_env();
//!
//! // Or customize programmatically
//! let config = ServerConfig::new()
//!     .max_clients(64)
//!     .buffer_size(4096)
//!     .poll_timeout_ms(100);
//! ```

use pollserve_core::constants::{
    BLOCK_INDEFINITELY, DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CLIENTS,
};
use pollserve_core::env::env_get;
use pollserve_core::{kprintln, ServeError, ServeResult};

/// Server configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Maximum concurrently connected clients
    pub max_clients: usize,
    /// Initial capacity of each connection buffer (power of two)
    pub buffer_size: usize,
    /// Readiness wait timeout; -1 blocks, 0 polls
    pub poll_timeout_ms: i32,
    /// listen(2) backlog
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `PSV_MAX_CLIENTS` - Maximum concurrent clients
    /// - `PSV_BUFFER_SIZE` - Per-connection buffer capacity
    /// - `PSV_POLL_TIMEOUT_MS` - Wait timeout in milliseconds (-1 = block)
    /// - `PSV_BACKLOG` - Listen backlog
    pub fn from_env() -> Self {
        Self {
            max_clients: env_get("PSV_MAX_CLIENTS", DEFAULT_MAX_CLIENTS),
            buffer_size: env_get("PSV_BUFFER_SIZE", DEFAULT_BUFFER_SIZE),
            poll_timeout_ms: env_get("PSV_POLL_TIMEOUT_MS", BLOCK_INDEFINITELY),
            backlog: env_get("PSV_BACKLOG", DEFAULT_BACKLOG),
        }
    }

    /// Create config with library defaults (no env override).
    pub fn new() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_timeout_ms: BLOCK_INDEFINITELY,
            backlog: DEFAULT_BACKLOG,
        }
    }

    // Builder methods

    pub fn max_clients(mut self, n: usize) -> Self {
        self.max_clients = n;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn poll_timeout_ms(mut self, ms: i32) -> Self {
        self.poll_timeout_ms = ms;
        self
    }

    pub fn backlog(mut self, n: i32) -> Self {
        self.backlog = n;
        self
    }

    /// Readiness set slots: every client plus the listener.
    pub fn poll_capacity(&self) -> usize {
        self.max_clients.saturating_add(1)
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> ServeResult<()> {
        if self.max_clients == 0 {
            return Err(ServeError::InvalidConfig("max_clients must be > 0"));
        }
        if !self.buffer_size.is_power_of_two() {
            return Err(ServeError::InvalidConfig("buffer_size must be a power of two"));
        }
        if self.poll_timeout_ms < BLOCK_INDEFINITELY {
            return Err(ServeError::InvalidConfig("poll_timeout_ms must be >= -1"));
        }
        if self.backlog <= 0 {
            return Err(ServeError::InvalidConfig("backlog must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        kprintln!("pollserve configuration:");
        kprintln!("  max_clients:      {}", self.max_clients);
        kprintln!("  buffer_size:      {}", self.buffer_size);
        kprintln!("  poll_timeout_ms:  {}", self.poll_timeout_ms);
        kprintln!("  backlog:          {}", self.backlog);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let config = ServerConfig::new();
        assert_eq!(config.max_clients, 1024);
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.poll_timeout_ms, -1);
        assert_eq!(config.backlog, 1024);
        assert_eq!(config.poll_capacity(), 1025);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .max_clients(8)
            .buffer_size(256)
            .poll_timeout_ms(0)
            .backlog(16);
        assert_eq!(config.max_clients, 8);
        assert_eq!(config.buffer_size, 256);
        assert_eq!(config.poll_timeout_ms, 0);
        assert_eq!(config.backlog, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        assert!(ServerConfig::new().max_clients(0).validate().is_err());
        assert!(ServerConfig::new().buffer_size(0).validate().is_err());
        assert!(ServerConfig::new().buffer_size(1000).validate().is_err());
        assert!(ServerConfig::new().poll_timeout_ms(-2).validate().is_err());
        assert!(ServerConfig::new().backlog(0).validate().is_err());
    }

    #[test]
    fn test_from_env_override() {
        std::env::set_var("PSV_MAX_CLIENTS", "17");
        let config = ServerConfig::from_env();
        std::env::remove_var("PSV_MAX_CLIENTS");
        assert_eq!(config.max_clients, 17);
    }
}
