// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
}

// Domain modules: identity/documents, per-catalog stores, the aggregate
// collection database, reference resolution, queue assembly/execution, and
// the background task pool.
pub mod almanac;
pub mod catalog;
pub mod collection;
pub mod ports;
pub mod queue;
pub mod resolver;
pub mod solution;
pub mod task;

// Re-exports for convenience
pub use crate::almanac::{Almanac, CatalogChangelog};
pub use crate::core::config::AlmanacConfig;
pub use crate::core::errors::{AlmanacError, Result};
pub use crate::solution::Coordinates;

pub use crate::catalog::*;
pub use crate::collection::*;
pub use crate::ports::*;
pub use crate::queue::*;
pub use crate::resolver::*;
pub use crate::solution::*;
pub use crate::task::*;
