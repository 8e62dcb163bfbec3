//! Cross-collection consistency checks.
//!
//! Nothing here runs automatically. `audit` is read-only and can be run at any
//! time; `repair` fixes what can be derived from other data (graph symmetry
//! and counters) and leaves the rest for an operator.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::auth::RequestContext;
use crate::db::ids::integer_id;
use crate::db::models::{ForumReply, ForumThread, Post, User};
use crate::db::{Collection, Store, Table};
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// Only one side of a follow edge is recorded.
    AsymmetricFollow { follower: String, followee: String },
    /// A follow list names a user that does not exist.
    DanglingFollow { username: String, missing: String },
    /// Stored `likes` differs from the size of `liked_by`.
    LikesDrift {
        post_id: u64,
        stored: Option<u64>,
        actual: usize,
    },
    /// Stored `replies` differs from the replies pointing at the thread.
    RepliesDrift {
        thread_id: u64,
        stored: usize,
        actual: usize,
    },
    OrphanPost { post_id: u64, username: String },
    OrphanReply { reply_id: u64, thread_id: u64 },
    DuplicateId { collection: String, id: u64 },
}

impl Finding {
    /// Whether [`Integrity::repair`] can fix this on its own.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            Finding::AsymmetricFollow { .. }
                | Finding::DanglingFollow { .. }
                | Finding::LikesDrift { .. }
                | Finding::RepliesDrift { .. }
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub findings: Vec<Finding>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairOutcome {
    pub repaired: Vec<Finding>,
    pub unresolved: Vec<Finding>,
}

pub struct Integrity {
    store: Arc<Store>,
}

impl Integrity {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn audit(&self) -> AppResult<IntegrityReport> {
        let users = self.store.table::<User>()?;
        let raw_posts = self.store.backend().load(Collection::Posts)?;
        let threads = self.store.table::<ForumThread>()?;
        let replies = self.store.table::<ForumReply>()?;

        let mut findings = follow_findings(&users);
        findings.extend(likes_findings(&raw_posts));
        findings.extend(replies_findings(&threads, &replies));

        let usernames: BTreeSet<&str> = users.iter().map(|u| u.username.as_str()).collect();
        let posts = Table::<Post>::from_values(raw_posts);
        findings.extend(
            posts
                .iter()
                .filter(|p| !usernames.contains(p.username.as_str()))
                .map(|p| Finding::OrphanPost {
                    post_id: p.id,
                    username: p.username.clone(),
                }),
        );

        let thread_ids: BTreeSet<u64> = threads.iter().map(|t| t.id).collect();
        findings.extend(
            replies
                .iter()
                .filter(|r| !thread_ids.contains(&r.thread_id))
                .map(|r| Finding::OrphanReply {
                    reply_id: r.id,
                    thread_id: r.thread_id,
                }),
        );

        for collection in Collection::ALL {
            if matches!(collection, Collection::Users | Collection::Sequences) {
                continue;
            }
            let values = self.store.backend().load(collection)?;
            findings.extend(duplicate_ids(collection, &values));
        }

        if !findings.is_empty() {
            tracing::warn!("Integrity audit found {} problem(s)", findings.len());
        }
        Ok(IntegrityReport { findings })
    }

    /// Restore follow symmetry and recount denormalized counters in one
    /// batch. A one-sided edge is completed rather than dropped; edges to
    /// missing users are dropped.
    pub fn repair(&self, ctx: &RequestContext) -> AppResult<RepairOutcome> {
        let admin = ctx.require_verified_admin()?;

        let mut tx = self.store.transaction();
        let report = self.audit()?;
        let (repaired, unresolved): (Vec<Finding>, Vec<Finding>) = report
            .findings
            .into_iter()
            .partition(Finding::is_repairable);
        if repaired.is_empty() {
            return Ok(RepairOutcome {
                repaired,
                unresolved,
            });
        }

        let mut users = tx.table::<User>()?;
        let mut users_dirty = false;
        let mut posts_dirty = false;
        let mut threads_dirty = false;
        for finding in &repaired {
            match finding {
                Finding::AsymmetricFollow { follower, followee } => {
                    if let Some(u) = users.find_mut(|u| &u.username == follower) {
                        u.following.insert(followee.clone());
                    }
                    if let Some(u) = users.find_mut(|u| &u.username == followee) {
                        u.followers.insert(follower.clone());
                    }
                    users_dirty = true;
                }
                Finding::DanglingFollow { username, missing } => {
                    if let Some(u) = users.find_mut(|u| &u.username == username) {
                        u.following.remove(missing);
                        u.followers.remove(missing);
                    }
                    users_dirty = true;
                }
                Finding::LikesDrift { .. } => posts_dirty = true,
                Finding::RepliesDrift { .. } => threads_dirty = true,
                _ => {}
            }
        }

        if users_dirty {
            tx.stage(&users)?;
        }
        if posts_dirty {
            // Loading normalizes `likes` from `liked_by`.
            let posts = tx.table::<Post>()?;
            tx.stage(&posts)?;
        }
        if threads_dirty {
            let replies = tx.table::<ForumReply>()?;
            let mut threads = tx.table::<ForumThread>()?;
            let counts = reply_counts(&replies);
            for thread in threads.iter_mut() {
                thread.replies = counts.get(&thread.id).copied().unwrap_or(0);
            }
            tx.stage(&threads)?;
        }
        tx.commit()?;

        tracing::info!(
            "{} repaired {} integrity problem(s), {} left for review",
            admin.username,
            repaired.len(),
            unresolved.len()
        );
        Ok(RepairOutcome {
            repaired,
            unresolved,
        })
    }
}

fn follow_findings(users: &Table<User>) -> Vec<Finding> {
    let by_name: HashMap<&str, &User> = users.iter().map(|u| (u.username.as_str(), u)).collect();
    let mut findings = BTreeSet::new();

    for user in users.iter() {
        for followee in &user.following {
            match by_name.get(followee.as_str()) {
                None => findings.insert((user.username.clone(), followee.clone(), true)),
                Some(other) if !other.followers.contains(&user.username) => {
                    findings.insert((user.username.clone(), followee.clone(), false))
                }
                Some(_) => false,
            };
        }
        for follower in &user.followers {
            match by_name.get(follower.as_str()) {
                None => findings.insert((user.username.clone(), follower.clone(), true)),
                Some(other) if !other.following.contains(&user.username) => {
                    findings.insert((follower.clone(), user.username.clone(), false))
                }
                Some(_) => false,
            };
        }
    }

    findings
        .into_iter()
        .map(|(a, b, dangling)| {
            if dangling {
                Finding::DanglingFollow {
                    username: a,
                    missing: b,
                }
            } else {
                Finding::AsymmetricFollow {
                    follower: a,
                    followee: b,
                }
            }
        })
        .collect()
}

fn likes_findings(raw_posts: &[serde_json::Value]) -> Vec<Finding> {
    raw_posts
        .iter()
        .filter_map(|value| {
            let post: Post = serde_json::from_value(value.clone()).ok()?;
            let stored = value.get("likes").and_then(|l| l.as_u64());
            let actual = post.liked_by.len();
            (stored != Some(actual as u64)).then_some(Finding::LikesDrift {
                post_id: post.id,
                stored,
                actual,
            })
        })
        .collect()
}

fn replies_findings(threads: &Table<ForumThread>, replies: &Table<ForumReply>) -> Vec<Finding> {
    let counts = reply_counts(replies);
    threads
        .iter()
        .filter_map(|t| {
            let actual = counts.get(&t.id).copied().unwrap_or(0);
            (t.replies != actual).then_some(Finding::RepliesDrift {
                thread_id: t.id,
                stored: t.replies,
                actual,
            })
        })
        .collect()
}

fn reply_counts(replies: &Table<ForumReply>) -> HashMap<u64, usize> {
    let mut counts = HashMap::new();
    for reply in replies.iter() {
        *counts.entry(reply.thread_id).or_insert(0) += 1;
    }
    counts
}

fn duplicate_ids(collection: Collection, values: &[serde_json::Value]) -> Vec<Finding> {
    let mut seen: BTreeMap<u64, usize> = BTreeMap::new();
    for id in values.iter().filter_map(integer_id) {
        *seen.entry(id).or_insert(0) += 1;
    }
    seen.into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| Finding::DuplicateId {
            collection: collection.name().to_string(),
            id,
        })
        .collect()
}
