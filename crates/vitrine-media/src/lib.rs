//! Token-media resolution: URI fetching with gateway fallback, byte-level
//! media classification, preview building, and blob publication.

pub mod blob;
pub mod builder;
pub mod preview;
pub mod resolver;

pub use blob::{BlobStorage, FsBlobStore, MemoryBlobStore};
pub use builder::{MediaError, MediaProcessor};
pub use resolver::{Resolved, ResolveError, ResolverConfig, UriResolver};
