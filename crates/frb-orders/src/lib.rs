//! In-memory order tracking shared by every worker and request path.

pub mod bucket;
pub mod registry;

pub use bucket::{BucketError, OrderBucket};
pub use registry::{OrderRegistry, RegistryError, Transition};
