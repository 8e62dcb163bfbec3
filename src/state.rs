use std::sync::Arc;

use crate::assets::AssetStore;
use crate::config::{Backend, Config};
use crate::db::{DocumentStore, JsonFileStore, SqliteStore, Store, StoreResult};
use crate::integrity::Integrity;
use crate::repos::{
    ConferenceRepository, ForumRepository, ModerationPipeline, NotificationRepository,
    PostRepository, RelationshipGraph, UserRepository,
};

/// Shared handles every caller needs. Cheap to clone; repositories are built
/// on demand over the same store and asset root.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub assets: Arc<AssetStore>,
    pub config: Config,
}

impl AppState {
    /// Open the configured backend and asset root.
    pub fn open(config: Config) -> StoreResult<Self> {
        let path = config.storage_path();
        let backend: Arc<dyn DocumentStore> = match config.storage.backend {
            Backend::Json => Arc::new(JsonFileStore::open(&path)?),
            Backend::Sqlite => Arc::new(SqliteStore::open(&path)?),
        };
        tracing::info!(
            "Opened {:?} store at {}",
            config.storage.backend,
            path.display()
        );

        let assets = AssetStore::new(config.assets_path(), config.max_upload_bytes());
        Ok(Self {
            store: Arc::new(Store::new(backend)),
            assets: Arc::new(assets),
            config,
        })
    }

    /// Memory-backed state with assets under `assets_root`.
    pub fn in_memory(assets_root: impl Into<std::path::PathBuf>) -> Self {
        let config = Config::default();
        let assets = AssetStore::new(assets_root, config.max_upload_bytes());
        Self {
            store: Arc::new(Store::in_memory()),
            assets: Arc::new(assets),
            config,
        }
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(
            self.store.clone(),
            self.assets.clone(),
            self.config.auth.bcrypt_cost,
        )
    }

    pub fn posts(&self) -> PostRepository {
        PostRepository::new(self.store.clone(), self.assets.clone())
    }

    pub fn graph(&self) -> RelationshipGraph {
        RelationshipGraph::new(self.store.clone())
    }

    pub fn forums(&self) -> ForumRepository {
        ForumRepository::new(self.store.clone())
    }

    pub fn moderation(&self) -> ModerationPipeline {
        ModerationPipeline::new(self.store.clone(), self.assets.clone())
    }

    pub fn conferences(&self) -> ConferenceRepository {
        ConferenceRepository::new(self.store.clone(), self.assets.clone())
    }

    pub fn notifications(&self) -> NotificationRepository {
        NotificationRepository::new(self.store.clone())
    }

    pub fn integrity(&self) -> Integrity {
        Integrity::new(self.store.clone())
    }
}
