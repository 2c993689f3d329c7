//! Write Pipeline Module
//!
//! Moves record writes off the caller's thread.
//!
//! ## Responsibilities
//! - Hold puts that are visible in the index but not yet on disk
//! - Collapse repeated puts of one key into a single write of the latest
//! - Run one writer thread per generation that drains the queue on close
//!
//! ```text
//!   put(k, v1) ─┐
//!   put(j, w1) ─┼─► [ k:v3 | j:w1 ] ──► writer ──► record + index log
//!   put(k, v3) ─┘     (k replaced in place)
//! ```

mod queue;
mod writer;

pub use queue::{CoalescingQueue, PendingPut};
pub use writer::spawn_writer;
