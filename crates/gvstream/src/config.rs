//! Bridge and runtime configuration
//!
//! Library defaults with environment overrides, adjusted through a
//! builder.
//!
//! ```rust,ignore
//! use gvstream::StreamConfig;
//!
//! let config = StreamConfig::from_env()
//!     .pool_buffers(256)
//!     .poll_timeout(Duration::from_millis(50));
//! ```

use std::time::Duration;

use gvstream_core::env::env_get;

/// Library defaults.
pub mod defaults {
    pub const READ_BUF_SIZE: usize = 64 * 1024;
    pub const POOL_BUFFERS: usize = 0;
    pub const POLL_TIMEOUT_MS: u64 = 100;
    pub const WRITE_BATCH: usize = 64;
    pub const STACK_SIZE: usize = 256 * 1024;
}

/// Configuration for [`Runtime`](crate::Runtime).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Size of each read buffer handed to the reactor
    pub read_buf_size: usize,
    /// Buffers kept for reuse; `0` allocates per read
    pub pool_buffers: usize,
    /// Longest the loop waits in the reactor when no context is ready
    pub poll_timeout: Duration,
    /// Write attempts per handle per reactor pass
    pub write_batch: usize,
    /// Stack size of each execution context thread
    pub stack_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl StreamConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `GVS_READ_BUF_SIZE` - read buffer size in bytes
    /// - `GVS_POOL_BUFFERS` - pooled read buffers (0 disables pooling)
    /// - `GVS_POLL_TIMEOUT_MS` - reactor wait in milliseconds
    /// - `GVS_WRITE_BATCH` - write attempts per handle per pass
    /// - `GVS_STACK_SIZE` - context stack size in bytes
    pub fn from_env() -> Self {
        Self {
            read_buf_size: env_get("GVS_READ_BUF_SIZE", defaults::READ_BUF_SIZE),
            pool_buffers: env_get("GVS_POOL_BUFFERS", defaults::POOL_BUFFERS),
            poll_timeout: Duration::from_millis(env_get(
                "GVS_POLL_TIMEOUT_MS",
                defaults::POLL_TIMEOUT_MS,
            )),
            write_batch: env_get("GVS_WRITE_BATCH", defaults::WRITE_BATCH),
            stack_size: env_get("GVS_STACK_SIZE", defaults::STACK_SIZE),
        }
    }

    /// Library defaults, ignoring the environment.
    pub fn builtin() -> Self {
        Self {
            read_buf_size: defaults::READ_BUF_SIZE,
            pool_buffers: defaults::POOL_BUFFERS,
            poll_timeout: Duration::from_millis(defaults::POLL_TIMEOUT_MS),
            write_batch: defaults::WRITE_BATCH,
            stack_size: defaults::STACK_SIZE,
        }
    }

    pub fn read_buf_size(mut self, n: usize) -> Self {
        self.read_buf_size = n;
        self
    }

    pub fn pool_buffers(mut self, n: usize) -> Self {
        self.pool_buffers = n;
        self
    }

    pub fn poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }

    pub fn write_batch(mut self, n: usize) -> Self {
        self.write_batch = n;
        self
    }

    pub fn stack_size(mut self, n: usize) -> Self {
        self.stack_size = n;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.read_buf_size == 0 {
            return Err("read_buf_size must be at least 1");
        }
        if self.write_batch == 0 {
            return Err("write_batch must be at least 1");
        }
        if self.stack_size < 16 * 1024 {
            return Err("stack_size must be at least 16KiB");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_is_valid() {
        let c = StreamConfig::builtin();
        assert!(c.validate().is_ok());
        assert_eq!(c.read_buf_size, defaults::READ_BUF_SIZE);
        assert_eq!(c.pool_buffers, 0);
    }

    #[test]
    fn test_builder_and_validate() {
        let c = StreamConfig::builtin()
            .read_buf_size(0)
            .pool_buffers(8)
            .poll_timeout(Duration::from_millis(5));
        assert_eq!(c.pool_buffers, 8);
        assert_eq!(c.poll_timeout, Duration::from_millis(5));
        assert!(c.validate().is_err());

        assert!(StreamConfig::builtin().write_batch(0).validate().is_err());
        assert!(StreamConfig::builtin().stack_size(1024).validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("GVS_WRITE_BATCH", "7");
        let c = StreamConfig::from_env();
        std::env::remove_var("GVS_WRITE_BATCH");
        assert_eq!(c.write_batch, 7);
    }
}
