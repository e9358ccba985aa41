//! Storage layer: extents, metadata stores and garbage collection.

mod extent;
mod extent_metadata;
mod gc;
mod keyed_lock;
mod lifecycle;
mod metadata;
mod snapshot;

pub use extent::*;
pub use extent_metadata::*;
pub use gc::*;
pub use metadata::*;
