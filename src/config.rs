//! Runtime configuration for channel I/O
//!
//! Provides IoConfig with builder pattern, validation, and environment
//! overrides for the timeouts and chunk size used by the binary.

use std::env;

use crate::timeout::{ParseTimeoutError, Timeout};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default bound for one selector wait (500 ms)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 500;

/// Default bound for one socket readiness wait (10 seconds)
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u32 = 10;

/// Default socket transfer chunk (one native read unit)
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Upper bound on the socket transfer chunk (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

pub const ENV_WAIT_TIMEOUT: &str = "LINEMUX_WAIT_TIMEOUT";
pub const ENV_SOCKET_TIMEOUT: &str = "LINEMUX_SOCKET_TIMEOUT";
pub const ENV_CHUNK_SIZE: &str = "LINEMUX_CHUNK_SIZE";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid timeout value
    #[error("Invalid timeout for {field}: {timeout} - {reason}")]
    InvalidTimeout {
        field: &'static str,
        timeout: Timeout,
        reason: String,
    },

    /// Invalid chunk size
    #[error("Invalid chunk size {size}: {reason}")]
    InvalidChunkSize { size: usize, reason: String },

    /// An environment variable could not be parsed
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn env(var: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Core Configuration Type
// ============================================================================

/// Timeouts and transfer sizing for one run of the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoConfig {
    /// Bound for each `Selector::wait`
    pub wait_timeout: Timeout,

    /// Bound for each socket readiness wait
    pub socket_timeout: Timeout,

    /// Largest slice handed to a single send or recv
    pub chunk_size: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Timeout::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            socket_timeout: Timeout::from_secs(DEFAULT_SOCKET_TIMEOUT_SECS),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl IoConfig {
    pub fn builder() -> IoConfigBuilder {
        IoConfigBuilder::default()
    }

    /// Defaults overridden by `LINEMUX_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(value) = lookup(ENV_WAIT_TIMEOUT) {
            let timeout = parse_timeout(ENV_WAIT_TIMEOUT, &value)?;
            builder = builder.wait_timeout(timeout);
        }
        if let Some(value) = lookup(ENV_SOCKET_TIMEOUT) {
            let timeout = parse_timeout(ENV_SOCKET_TIMEOUT, &value)?;
            builder = builder.socket_timeout(timeout);
        }
        if let Some(value) = lookup(ENV_CHUNK_SIZE) {
            let size = value
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::env(ENV_CHUNK_SIZE, &value, e))?;
            builder = builder.chunk_size(size);
        }

        builder.build()
    }

    /// Override values from CLI arguments
    pub fn with_overrides(
        mut self,
        wait_timeout: Option<Timeout>,
        socket_timeout: Option<Timeout>,
        chunk_size: Option<usize>,
    ) -> Result<Self, ConfigError> {
        if let Some(timeout) = wait_timeout {
            self.wait_timeout = timeout;
        }
        if let Some(timeout) = socket_timeout {
            self.socket_timeout = timeout;
        }
        if let Some(size) = chunk_size {
            self.chunk_size = size;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                field: "socket_timeout",
                timeout: self.socket_timeout,
                reason: "a socket wait must allow some time".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize {
                size: self.chunk_size,
                reason: "must be positive".to_string(),
            });
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                size: self.chunk_size,
                reason: format!("exceeds maximum of {MAX_CHUNK_SIZE}"),
            });
        }
        Ok(())
    }
}

fn parse_timeout(var: &'static str, value: &str) -> Result<Timeout, ConfigError> {
    value
        .parse()
        .map_err(|e: ParseTimeoutError| ConfigError::env(var, value, e))
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for IoConfig with validation and defaults
#[derive(Debug, Default)]
pub struct IoConfigBuilder {
    wait_timeout: Option<Timeout>,
    socket_timeout: Option<Timeout>,
    chunk_size: Option<usize>,
}

impl IoConfigBuilder {
    pub fn wait_timeout(mut self, timeout: Timeout) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn socket_timeout(mut self, timeout: Timeout) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<IoConfig, ConfigError> {
        let defaults = IoConfig::default();
        let config = IoConfig {
            wait_timeout: self.wait_timeout.unwrap_or(defaults.wait_timeout),
            socket_timeout: self.socket_timeout.unwrap_or(defaults.socket_timeout),
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
        };
        config.validate()?;
        Ok(config)
    }
}
