//! File Module
//!
//! Raw space management for generation files.
//!
//! ## Responsibilities
//! - Block allocation with quantized growth ([`BlockFile`])
//! - Concurrent positional access through pooled handles ([`HandlePool`])

mod block;
mod pool;

pub use block::{quantize, BlockFile, DEFAULT_CHUNK_SIZE};
pub use pool::{quantize_capacity, HandlePool, PooledHandle, INITIAL_POOL_CAPACITY};
