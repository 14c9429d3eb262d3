pub mod rest;

use std::sync::Arc;

use crate::config::Config;
use crate::db::DbPool;
use crate::storage::blob_store::BlobStore;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub blob_store: Arc<dyn BlobStore>,
    pub config: Config,
}

impl AppState {
    pub fn new(db: DbPool, blob_store: Arc<dyn BlobStore>, config: Config) -> Self {
        Self { db, blob_store, config }
    }
}
