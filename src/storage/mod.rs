//! Storage Module
//!
//! The public engine: a chain of generations behind one `Storage` handle.
//!
//! ## Responsibilities
//! - Route get/put/remove across the generation chain
//! - Rotate generations on a maintenance thread
//! - Load and close generations in parallel with progress reports
//! - Report to the host through a `StorageDriver`
//!
//! ## Rotation
//! ```text
//!   t0          t0 + max_age/2       t0 + max_age
//!   ┌─────────┐
//!   │  gen A  │─────────────────────────────────────► deleted once the
//!   └─────────┘ ┌─────────┐                           chain exceeds
//!               │  gen B  │──────────────────────►    max_instances
//!               └─────────┘ ┌─────────┐
//!                           │  gen C  │ ◄── writes
//!                           └─────────┘
//! ```

mod driver;
mod loader;
mod maintenance;
mod manager;

pub use driver::{StorageDriver, TracingDriver};
pub use loader::for_each_parallel;
pub use maintenance::Maintenance;
pub use manager::Storage;
