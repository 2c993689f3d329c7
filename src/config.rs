//! Configuration for gencache
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GenCacheError, Result};

/// Main configuration for a gencache storage instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding every generation's file pair
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── {prefix}{stamp}{data_extension}    (records)
    ///     └── {prefix}{stamp}{index_extension}   (index log)
    pub data_dir: PathBuf,

    /// Prefix for generation file names
    pub file_prefix: String,

    /// Extension of generation data files (including the dot)
    pub data_extension: String,

    /// Extension of generation index logs (including the dot)
    pub index_extension: String,

    // -------------------------------------------------------------------------
    // Generation Configuration
    // -------------------------------------------------------------------------
    /// Objects never outlive this, whatever their TTL. A new generation is
    /// started once the newest one is half this old.
    pub max_age: Duration,

    /// Number of generations kept in the chain
    pub max_instances: usize,

    /// Length of the background write queue; 0 writes synchronously
    pub background_put_length: usize,

    /// Backing files grow in multiples of this many bytes
    pub allocation_chunk_size: u64,

    /// Store a checksum with every record written to new generations
    pub use_checksums: bool,

    /// Byte budget of each generation's decoded payload cache; 0 disables it
    pub payload_cache_bytes: usize,

    /// How often a file's handle pool adapts its retained capacity
    pub handle_pool_resize_interval: Duration,

    // -------------------------------------------------------------------------
    // Maintenance Configuration
    // -------------------------------------------------------------------------
    /// Interval between rotation / TTL purge passes
    pub maintenance_interval: Duration,

    /// Delay before the first maintenance pass after open
    pub first_maintenance_delay: Duration,

    /// How often load/close progress is reported
    pub load_progress_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./gencache_data"),
            file_prefix: "gencache".to_string(),
            data_extension: ".db".to_string(),
            index_extension: ".idx".to_string(),
            max_age: Duration::from_secs(12 * 60 * 60), // 12 hours
            max_instances: 3,
            background_put_length: 1000,
            allocation_chunk_size: 16 * 1024 * 1024, // 16 MB
            use_checksums: false,
            payload_cache_bytes: 64 * 1024 * 1024, // 64 MB
            handle_pool_resize_interval: Duration::from_secs(5 * 60),
            maintenance_interval: Duration::from_secs(15 * 60),
            first_maintenance_delay: Duration::from_secs(2 * 60),
            load_progress_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Age at which the newest generation is rotated out of the write path
    pub fn rotation_age(&self) -> Duration {
        self.max_age / 2
    }

    /// Check the values for combinations the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_instances == 0 {
            return Err(GenCacheError::Config(
                "max_instances must be at least 1".to_string(),
            ));
        }
        if self.max_age.is_zero() {
            return Err(GenCacheError::Config("max_age must be non-zero".to_string()));
        }
        if self.allocation_chunk_size == 0 {
            return Err(GenCacheError::Config(
                "allocation_chunk_size must be non-zero".to_string(),
            ));
        }
        for (name, ext) in [
            ("data_extension", &self.data_extension),
            ("index_extension", &self.index_extension),
        ] {
            if !ext.starts_with('.') || ext.len() < 2 || ext[1..].contains('.') {
                return Err(GenCacheError::Config(format!(
                    "{} must look like \".ext\", got {:?}",
                    name, ext
                )));
            }
        }
        if self.data_extension.eq_ignore_ascii_case(&self.index_extension) {
            return Err(GenCacheError::Config(
                "data and index extensions must differ".to_string(),
            ));
        }
        if self.file_prefix.contains('.') || self.file_prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(GenCacheError::Config(format!(
                "file_prefix must be a plain name, got {:?}",
                self.file_prefix
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the prefix used for generation file names
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// Set the data file extension (e.g. ".db")
    pub fn data_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.data_extension = ext.into();
        self
    }

    /// Set the index log extension (e.g. ".idx")
    pub fn index_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.index_extension = ext.into();
        self
    }

    /// Set the maximum object age
    pub fn max_age(mut self, age: Duration) -> Self {
        self.config.max_age = age;
        self
    }

    /// Set how many generations are chained
    pub fn max_instances(mut self, count: usize) -> Self {
        self.config.max_instances = count;
        self
    }

    /// Set the background write queue length (0 = synchronous writes)
    pub fn background_put_length(mut self, len: usize) -> Self {
        self.config.background_put_length = len;
        self
    }

    /// Set the file growth quantum (in bytes)
    pub fn allocation_chunk_size(mut self, size: u64) -> Self {
        self.config.allocation_chunk_size = size;
        self
    }

    /// Enable or disable record checksums for new generations
    pub fn use_checksums(mut self, enabled: bool) -> Self {
        self.config.use_checksums = enabled;
        self
    }

    /// Set the per-generation payload cache budget (in bytes)
    pub fn payload_cache_bytes(mut self, bytes: usize) -> Self {
        self.config.payload_cache_bytes = bytes;
        self
    }

    /// Set the handle pool resize interval
    pub fn handle_pool_resize_interval(mut self, interval: Duration) -> Self {
        self.config.handle_pool_resize_interval = interval;
        self
    }

    /// Set the maintenance interval
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    /// Set the delay before the first maintenance pass
    pub fn first_maintenance_delay(mut self, delay: Duration) -> Self {
        self.config.first_maintenance_delay = delay;
        self
    }

    /// Set the load/close progress reporting interval
    pub fn load_progress_interval(mut self, interval: Duration) -> Self {
        self.config.load_progress_interval = interval;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
