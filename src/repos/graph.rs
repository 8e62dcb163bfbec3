//! Follow graph.
//!
//! Both directions of an edge live in the users collection, so a follow or
//! unfollow rewrites that one collection once and both sides land together.

use std::sync::Arc;

use serde::Serialize;

use crate::auth::RequestContext;
use crate::db::models::User;
use crate::db::Store;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowAction {
    Followed,
    Unfollowed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowOutcome {
    pub action: FollowAction,
    /// Follower count of the target after the change.
    pub followers: usize,
    /// Following count of the actor after the change.
    pub following: usize,
}

pub struct RelationshipGraph {
    store: Arc<Store>,
}

impl RelationshipGraph {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Follow `target`, or unfollow if the actor already follows them.
    pub fn toggle_follow(&self, ctx: &RequestContext, target: &str) -> AppResult<FollowOutcome> {
        let actor = ctx.require_actor()?;
        let me = actor.username.as_str();
        if me == target {
            return Err(AppError::SelfFollow);
        }

        let mut tx = self.store.transaction();
        let mut users = tx.table::<User>()?;
        if users.find(|u| u.username == target).is_none() {
            return Err(AppError::not_found(format!("user {}", target)));
        }
        let actor_record = users
            .find_mut(|u| u.username == me)
            .ok_or_else(|| AppError::not_found(format!("user {}", me)))?;

        let action = if actor_record.following.remove(target) {
            FollowAction::Unfollowed
        } else {
            actor_record.following.insert(target.to_string());
            FollowAction::Followed
        };
        let following = actor_record.following.len();

        let target_record = users
            .find_mut(|u| u.username == target)
            .ok_or_else(|| AppError::not_found(format!("user {}", target)))?;
        match action {
            FollowAction::Followed => target_record.followers.insert(me.to_string()),
            FollowAction::Unfollowed => target_record.followers.remove(me),
        };
        let followers = target_record.followers.len();

        tx.stage(&users)?;
        tx.commit()?;

        tracing::debug!("{} {:?} {}", me, action, target);
        Ok(FollowOutcome {
            action,
            followers,
            following,
        })
    }

    pub fn is_following(&self, follower: &str, followee: &str) -> AppResult<bool> {
        let users = self.store.table::<User>()?;
        Ok(users
            .find(|u| u.username == follower)
            .is_some_and(|u| u.following.contains(followee)))
    }

    pub fn followers(&self, username: &str) -> AppResult<Vec<String>> {
        let users = self.store.table::<User>()?;
        users
            .find(|u| u.username == username)
            .map(|u| u.followers.iter().cloned().collect())
            .ok_or_else(|| AppError::not_found(format!("user {}", username)))
    }

    pub fn following(&self, username: &str) -> AppResult<Vec<String>> {
        let users = self.store.table::<User>()?;
        users
            .find(|u| u.username == username)
            .map(|u| u.following.iter().cloned().collect())
            .ok_or_else(|| AppError::not_found(format!("user {}", username)))
    }
}
