//! Engine configuration.
//!
//! All fields have defaults that let a router work out of the box; use
//! [`RpcConfig::default()`] or the `with_*` setters.
//!
//! # Example
//! ```rust,ignore
//! use brpc::{FormLimits, RpcConfig};
//!
//! let config = RpcConfig::new()
//!     .with_max_input_size(512 * 1024)
//!     .with_channel_buffer(64)
//!     .with_form_limits(FormLimits::new().max_field_size(5 * 1024 * 1024));
//! ```

use crate::form::FormLimits;

/// Configuration accepted at router creation.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Maximum input JSON size in bytes (default: 1MB)
    pub max_input_size: usize,
    /// Buffer size for stream-emitter and connection-outbox channels
    /// (default: 32)
    pub channel_buffer: usize,
    /// Limits applied while decoding multipart bodies
    pub form: FormLimits,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_input_size: 1024 * 1024, // 1MB
            channel_buffer: 32,
            form: FormLimits::default(),
        }
    }
}

impl RpcConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum input size in bytes.
    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = size;
        self
    }

    /// Set the channel buffer size.
    pub fn with_channel_buffer(mut self, size: usize) -> Self {
        self.channel_buffer = size;
        self
    }

    /// Set the multipart decode limits.
    pub fn with_form_limits(mut self, limits: FormLimits) -> Self {
        self.form = limits;
        self
    }
}
