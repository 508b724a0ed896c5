use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::realtime::GalleryNotifier;
use crate::rpc::{build_schema, RpcSchema};
use crate::storage::BlobStore;
use crate::upload::sessions::UploadSessionStore;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub blobs: BlobStore,
    pub notifier: GalleryNotifier,
    pub uploads: Arc<Mutex<UploadSessionStore>>,
    pub rpc_schema: RpcSchema,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let uploads = UploadSessionStore::new(
            config.upload_tmp_path(),
            Duration::from_secs(config.upload.session_ttl_secs),
        );

        Self {
            db,
            blobs: BlobStore::new(config.blobs_path()),
            notifier: GalleryNotifier::new(),
            uploads: Arc::new(Mutex::new(uploads)),
            rpc_schema: build_schema(),
            config: Arc::new(config),
        }
    }
}
