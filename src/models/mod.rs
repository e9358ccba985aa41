//! Records kept by the metadata stores.

mod blob;
mod block;
mod container;
mod extent;
mod marker;
mod service;

pub use blob::*;
pub use block::*;
pub use container::*;
pub use extent::*;
pub use marker::*;
pub use service::*;

/// Generates a fresh quoted ETag value.
pub fn new_etag() -> String {
    format!("\"0x{}\"", uuid::Uuid::new_v4().simple())
}
