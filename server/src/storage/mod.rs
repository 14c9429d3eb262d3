pub mod blob_store;
pub mod ownership;
pub mod tree_walker;

pub use blob_store::{BlobStore, FsBlobStore};
pub use ownership::{OwnershipIndex, PgOwnershipIndex};
