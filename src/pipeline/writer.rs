//! Background writer thread

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::queue::{CoalescingQueue, PendingPut};

/// Start a thread that feeds every queued put to `handler` until the queue
/// is closed and empty
pub fn spawn_writer<F>(name: String, queue: Arc<CoalescingQueue>, mut handler: F) -> io::Result<JoinHandle<()>>
where
    F: FnMut(PendingPut) + Send + 'static,
{
    thread::Builder::new().name(name.clone()).spawn(move || {
        debug!(writer = %name, "writer started");
        let mut written: u64 = 0;
        while let Some(put) = queue.take() {
            handler(put);
            written += 1;
        }
        debug!(writer = %name, written, "writer drained and stopped");
    })
}
