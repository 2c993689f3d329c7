//! Driver callbacks
//!
//! The surrounding server supplies a driver; the engine reports through it
//! and never exits the process itself.

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::GenCacheError;

/// Callbacks from the storage engine to its host
pub trait StorageDriver: Send + Sync {
    /// Log a message. `newline = false` fragments belong to the same line
    /// as the next message.
    fn log(&self, message: &str, error: Option<&GenCacheError>, newline: bool);

    /// Report an error that has no caller to return to
    fn notify_exception(&self, error: &GenCacheError) {
        self.log("storage error", Some(error), true);
    }

    /// The engine hit an unrecoverable condition (e.g. out of disk space)
    fn set_error_state(&self, message: &str);

    /// A group removal dropped `key`; outer layers should drop their copies
    fn remove(&self, _key: &str) {}
}

/// Driver that forwards everything to `tracing`
#[derive(Default)]
pub struct TracingDriver {
    partial: Mutex<String>,
    error_state: Mutex<Option<String>>,
}

impl TracingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message of the last `set_error_state`, if any
    pub fn error_state(&self) -> Option<String> {
        self.error_state.lock().clone()
    }
}

impl StorageDriver for TracingDriver {
    fn log(&self, message: &str, error: Option<&GenCacheError>, newline: bool) {
        let line = {
            let mut partial = self.partial.lock();
            partial.push_str(message);
            if !newline {
                return;
            }
            std::mem::take(&mut *partial)
        };

        match error {
            Some(error) => warn!(%error, "{}", line),
            None => info!("{}", line),
        }
    }

    fn notify_exception(&self, error: &GenCacheError) {
        error!(%error, "storage error");
    }

    fn set_error_state(&self, message: &str) {
        error!(message, "storage entered error state");
        *self.error_state.lock() = Some(message.to_string());
    }
}
