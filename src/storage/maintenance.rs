//! Maintenance thread
//!
//! Runs a task after an initial delay and then on a fixed interval until
//! stopped. Stopping drops the shutdown sender, which wakes the thread
//! immediately.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use tracing::debug;

pub struct Maintenance {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Maintenance {
    pub fn start<F>(first_delay: Duration, interval: Duration, mut task: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown, signal) = channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("gencache-maintenance".to_string())
            .spawn(move || {
                let mut wait = first_delay;
                loop {
                    match signal.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => task(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    wait = interval;
                }
                debug!("maintenance thread stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to finish its current pass
    pub fn stop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.stop();
    }
}
