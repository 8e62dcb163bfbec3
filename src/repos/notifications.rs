use std::sync::Arc;

use serde_json::Value;

use crate::auth::RequestContext;
use crate::db::models::{Notification, NotificationKind};
use crate::db::{Store, StoreResult, Table, Transaction};
use crate::error::{AppError, AppResult};

use super::unix_now;

/// Admin inbox.
pub struct NotificationRepository {
    store: Arc<Store>,
}

impl NotificationRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Newest first.
    pub fn list(&self, ctx: &RequestContext) -> AppResult<Vec<Notification>> {
        ctx.require_admin()?;
        let mut notifications = self.store.table::<Notification>()?.into_vec();
        notifications.sort_by(|a, b| b.ts.cmp(&a.ts).then(b.id.cmp(&a.id)));
        Ok(notifications)
    }

    pub fn dismiss(&self, ctx: &RequestContext, id: u64) -> AppResult<Notification> {
        ctx.require_admin()?;
        let mut tx = self.store.transaction();
        let mut notifications = tx.table::<Notification>()?;
        let removed = notifications
            .remove_where(|n| n.id == id)
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found(format!("notification {}", id)))?;
        tx.stage(&notifications)?;
        tx.commit()?;
        Ok(removed)
    }
}

/// Append a notification to a table loaded inside `tx`. The caller stages
/// and commits it with the rest of its writes.
pub(crate) fn emit(
    tx: &mut Transaction<'_>,
    notifications: &mut Table<Notification>,
    kind: NotificationKind,
    payload: Value,
) -> StoreResult<u64> {
    let id = tx.allocate_id(notifications)?;
    notifications.push(Notification {
        id,
        kind,
        payload,
        ts: unix_now(),
    });
    Ok(id)
}
