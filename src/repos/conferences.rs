use std::sync::Arc;

use crate::assets::AssetStore;
use crate::auth::RequestContext;
use crate::db::models::Conference;
use crate::db::Store;
use crate::error::{AppError, AppResult};

/// Published conferences. New ones only arrive through
/// [`super::ModerationPipeline::approve`].
pub struct ConferenceRepository {
    store: Arc<Store>,
    assets: Arc<AssetStore>,
}

impl ConferenceRepository {
    pub fn new(store: Arc<Store>, assets: Arc<AssetStore>) -> Self {
        Self { store, assets }
    }

    /// In stored order.
    pub fn list(&self) -> AppResult<Vec<Conference>> {
        Ok(self.store.table::<Conference>()?.into_vec())
    }

    pub fn get(&self, id: u64) -> AppResult<Conference> {
        self.store
            .table::<Conference>()?
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("conference {}", id)))
    }

    /// Unpublish a conference and delete its banner.
    pub fn delete(&self, ctx: &RequestContext, id: u64) -> AppResult<Conference> {
        let admin = ctx.require_verified_admin()?;

        let mut tx = self.store.transaction();
        let mut conferences = tx.table::<Conference>()?;
        let removed = conferences
            .remove_where(|c| c.id == id)
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found(format!("conference {}", id)))?;

        self.assets.delete(&removed.banner)?;
        tx.stage(&conferences)?;
        tx.commit()?;

        tracing::info!("{} deleted conference {}", admin.username, id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{Bucket, Upload};
    use crate::db::{Collection, Table};
    use serde_json::json;
    use tempfile::TempDir;

    fn seeded() -> (ConferenceRepository, Arc<Store>, Arc<AssetStore>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let assets = Arc::new(AssetStore::new(tmp.path().join("static"), 1 << 20));
        let banner = assets
            .store(Bucket::Banners, &Upload::new("rc.png", b"png".to_vec()))
            .unwrap();

        let store = Arc::new(Store::in_memory());
        let mut tx = store.transaction();
        let mut conferences = Table::<Conference>::default();
        conferences.push(Conference {
            id: 1,
            name: "RustConf".into(),
            date: "2026-09-01".into(),
            location: "Montreal".into(),
            description: String::new(),
            banner,
            tags: vec![],
        });
        tx.stage(&conferences).unwrap();
        tx.commit().unwrap();

        (
            ConferenceRepository::new(store.clone(), assets.clone()),
            store,
            assets,
            tmp,
        )
    }

    #[test]
    fn get_and_list() {
        let (repo, _store, _assets, _tmp) = seeded();
        assert_eq!(repo.list().unwrap().len(), 1);
        assert_eq!(repo.get(1).unwrap().name, "RustConf");
        assert!(matches!(repo.get(2), Err(AppError::NotFound(_))));
    }

    #[test]
    fn delete_removes_banner_and_needs_verified_admin() {
        let (repo, _store, assets, _tmp) = seeded();
        let banner = repo.get(1).unwrap().banner;

        assert!(matches!(
            repo.delete(&RequestContext::admin("root", false), 1),
            Err(AppError::Forbidden(_))
        ));
        repo.delete(&RequestContext::operator(), 1).unwrap();
        assert!(!assets.exists(&banner));
        assert!(repo.list().unwrap().is_empty());
    }

    #[test]
    fn legacy_string_ids_are_kept() {
        let (repo, store, _assets, _tmp) = seeded();
        let mut raw = store.backend().load(Collection::Conferences).unwrap();
        raw.push(json!({"id": "legacy-conf", "name": "Old"}));
        store.backend().save(Collection::Conferences, &raw).unwrap();

        repo.delete(&RequestContext::operator(), 1).unwrap();
        let remaining = store.backend().load(Collection::Conferences).unwrap();
        assert_eq!(remaining, vec![json!({"id": "legacy-conf", "name": "Old"})]);
    }
}
