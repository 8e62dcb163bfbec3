//! Conference submissions.
//!
//! A submission is `pending` until a verified admin approves or rejects it.
//! Both decisions are terminal and remove the pending record. The banner sits
//! in the staging bucket until approval moves it to the live bucket.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::assets::{AssetStore, Bucket, Upload};
use crate::auth::RequestContext;
use crate::db::models::{
    Conference, ModerationStatus, Notification, NotificationKind, PendingConference,
};
use crate::db::{Store, StoreResult, Table, Transaction};
use crate::error::{AppError, AppResult};

use super::notifications::emit;
use super::{parse_tags, unix_now};

#[derive(Debug, Clone, Default)]
pub struct NewConference {
    pub name: String,
    pub date: String,
    pub location: String,
    pub description: String,
    /// Comma-separated.
    pub tags: String,
}

pub struct ModerationPipeline {
    store: Arc<Store>,
    assets: Arc<AssetStore>,
}

impl ModerationPipeline {
    pub fn new(store: Arc<Store>, assets: Arc<AssetStore>) -> Self {
        Self { store, assets }
    }

    /// Queue a conference for review and notify admins.
    pub fn submit(
        &self,
        ctx: &RequestContext,
        new: NewConference,
        banner: &Upload,
    ) -> AppResult<PendingConference> {
        let actor = ctx.require_actor()?;
        let name = new.name.trim();
        let date = new.date.trim();
        let location = new.location.trim();
        if name.is_empty() || date.is_empty() || location.is_empty() {
            return Err(AppError::validation(
                "Name, date and location are required.",
            ));
        }
        if banner.filename.is_empty() {
            return Err(AppError::validation("No banner uploaded."));
        }

        let staged = self.assets.stage(banner)?;
        let pending = PendingConference {
            id: 0,
            name: name.to_string(),
            date: date.to_string(),
            location: location.to_string(),
            description: new.description.trim().to_string(),
            banner: staged.clone(),
            tags: parse_tags(&new.tags),
            submitted_by: actor.username.clone(),
            submitted_ts: unix_now(),
            status: ModerationStatus::Pending,
        };

        match self.record_submission(pending) {
            Ok(pending) => {
                tracing::info!(
                    "{} submitted conference {} for review",
                    actor.username,
                    pending.id
                );
                Ok(pending)
            }
            Err(e) => {
                if let Err(cleanup) = self.assets.delete(&staged) {
                    tracing::error!("Failed to remove staged banner {}: {}", staged, cleanup);
                }
                Err(e)
            }
        }
    }

    fn record_submission(&self, mut pending: PendingConference) -> AppResult<PendingConference> {
        let mut tx = self.store.transaction();
        let mut queue = tx.table::<PendingConference>()?;
        let mut notifications = tx.table::<Notification>()?;

        pending.id = tx.allocate_id(&queue)?;
        queue.push(pending.clone());
        emit(
            &mut tx,
            &mut notifications,
            NotificationKind::ConferenceSubmitted,
            json!({
                "pending_id": pending.id,
                "name": pending.name,
                "submitted_by": pending.submitted_by,
            }),
        )?;

        tx.stage(&queue)?;
        tx.stage(&notifications)?;
        tx.commit()?;
        Ok(pending)
    }

    /// Submissions awaiting a decision, oldest first.
    pub fn list_pending(&self, ctx: &RequestContext) -> AppResult<Vec<PendingConference>> {
        ctx.require_admin()?;
        let mut queue: Vec<PendingConference> = self
            .store
            .table::<PendingConference>()?
            .into_vec()
            .into_iter()
            .filter(|p| !p.status.is_terminal())
            .collect();
        queue.sort_by(|a, b| a.submitted_ts.cmp(&b.submitted_ts).then(a.id.cmp(&b.id)));
        Ok(queue)
    }

    /// Publish a submission. The banner is moved to the live bucket before
    /// anything is written. The pending removal is written ahead of the live
    /// record, so a backend that saves collections one by one can never leave
    /// both. If the write fails while the submission is still pending, the
    /// banner is moved back and the approval can be retried. If the removal
    /// already landed, the banner stays where it is: either it belongs to the
    /// live record or it is an orphaned asset.
    pub fn approve(&self, ctx: &RequestContext, pending_id: u64) -> AppResult<Conference> {
        let admin = ctx.require_verified_admin()?;

        let mut tx = self.store.transaction();
        let mut queue = tx.table::<PendingConference>()?;
        let mut conferences = tx.table::<Conference>()?;
        let notifications = tx.table::<Notification>()?;

        let pending = Self::take_pending(&mut queue, pending_id)?;
        let id = tx.allocate_id(&conferences)?;
        let banner = self.assets.relocate(&pending.banner, Bucket::Banners)?;

        let conference = pending.to_conference(id, banner.clone());
        conferences.push(conference.clone());

        let payload = json!({
            "pending_id": pending.id,
            "conference_id": id,
            "name": conference.name,
            "decided_by": admin.username,
        });
        let written = Self::commit_approval(tx, &queue, &conferences, notifications, payload);

        if let Err(e) = written {
            self.recover_banner(pending.id, &banner, &pending.banner);
            return Err(e.into());
        }

        tracing::info!(
            "{} approved submission {} as conference {}",
            admin.username,
            pending.id,
            id
        );
        Ok(conference)
    }

    /// Turn a submission down. The staged banner is deleted first; if that
    /// fails the submission stays pending.
    pub fn reject(&self, ctx: &RequestContext, pending_id: u64) -> AppResult<PendingConference> {
        let admin = ctx.require_verified_admin()?;

        let mut tx = self.store.transaction();
        let mut queue = tx.table::<PendingConference>()?;
        let mut notifications = tx.table::<Notification>()?;

        let mut pending = Self::take_pending(&mut queue, pending_id)?;
        self.assets.delete(&pending.banner)?;

        emit(
            &mut tx,
            &mut notifications,
            NotificationKind::ConferenceRejected,
            json!({
                "pending_id": pending.id,
                "name": pending.name,
                "decided_by": admin.username,
            }),
        )?;
        tx.stage(&queue)?;
        tx.stage(&notifications)?;
        tx.commit()?;

        tracing::info!("{} rejected submission {}", admin.username, pending.id);
        pending.status = ModerationStatus::Rejected;
        Ok(pending)
    }

    fn commit_approval(
        mut tx: Transaction<'_>,
        queue: &Table<PendingConference>,
        conferences: &Table<Conference>,
        mut notifications: Table<Notification>,
        payload: Value,
    ) -> StoreResult<()> {
        emit(
            &mut tx,
            &mut notifications,
            NotificationKind::ConferenceApproved,
            payload,
        )?;
        tx.stage(queue)?;
        tx.stage(conferences)?;
        tx.stage(&notifications)?;
        tx.commit()
    }

    fn take_pending(
        queue: &mut Table<PendingConference>,
        pending_id: u64,
    ) -> AppResult<PendingConference> {
        let pending = queue
            .find(|p| p.id == pending_id && !p.status.is_terminal())
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("pending conference {}", pending_id)))?;
        queue.retain(|p| p.id != pending_id);
        Ok(pending)
    }

    /// Undo the banner move after a failed approval, but only while the
    /// submission is still pending and so still points at `staged`.
    fn recover_banner(&self, pending_id: u64, live: &str, staged: &str) {
        let still_pending = self
            .store
            .table::<PendingConference>()
            .map(|queue| queue.find(|p| p.id == pending_id).is_some());
        match still_pending {
            Ok(true) => self.restore_banner(live, staged),
            Ok(false) => tracing::warn!(
                "Approval of submission {} was partly written; keeping banner at {}",
                pending_id,
                live
            ),
            Err(e) => tracing::error!(
                "Could not reload submissions after failed approval of {}: {}",
                pending_id,
                e
            ),
        }
    }

    fn restore_banner(&self, live: &str, staged: &str) {
        if let Err(e) = self.assets.move_file(live, staged) {
            tracing::error!(
                "Failed to move banner {} back to {} after aborted approval: {}",
                live,
                staged,
                e
            );
        }
    }
}
