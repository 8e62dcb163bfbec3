use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{Collection, Record};

/// Avatar every user without an uploaded photo points at. Never deleted.
pub const DEFAULT_AVATAR: &str = "img/users/default.png";

/// Legacy records sometimes carry `null` where a value is expected.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_avatar() -> String {
    DEFAULT_AVATAR.to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub school: String,
    #[serde(default, deserialize_with = "nullable")]
    pub bio: String,
    #[serde(default = "default_avatar")]
    pub profile_pic: String,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub role: Role,
    #[serde(
        default,
        rename = "attendingConferences",
        deserialize_with = "nullable"
    )]
    pub attending_conferences: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub followers: BTreeSet<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub following: BTreeSet<String>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            name: String::new(),
            school: String::new(),
            bio: String::new(),
            profile_pic: default_avatar(),
            password_hash: None,
            role: Role::User,
            attending_conferences: Vec::new(),
            followers: BTreeSet::new(),
            following: BTreeSet::new(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;

    fn normalize(&mut self) {
        if self.profile_pic.is_empty() {
            self.profile_pic = default_avatar();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub username: String,
    pub text: String,
    #[serde(rename = "ts", alias = "timestamp")]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub username: String,
    #[serde(default, deserialize_with = "nullable")]
    pub caption: String,
    #[serde(default, deserialize_with = "nullable")]
    pub image: String,
    #[serde(default)]
    pub likes: usize,
    #[serde(default, deserialize_with = "nullable")]
    pub liked_by: BTreeSet<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub comments: Vec<Comment>,
}

impl Post {
    pub fn new(
        id: u64,
        username: impl Into<String>,
        caption: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            caption: caption.into(),
            image: image.into(),
            likes: 0,
            liked_by: BTreeSet::new(),
            comments: Vec::new(),
        }
    }
}

impl Record for Post {
    const COLLECTION: Collection = Collection::Posts;

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }

    /// `likes` is always derived from `liked_by`.
    fn normalize(&mut self) {
        self.likes = self.liked_by.len();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumThread {
    pub id: u64,
    pub slug: String,
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub body: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<String>,
    pub author: String,
    #[serde(default)]
    pub created_ts: i64,
    #[serde(default)]
    pub replies: usize,
    #[serde(default)]
    pub views: u64,
}

impl ForumThread {
    pub fn matches_key(&self, key: &str) -> bool {
        self.slug == key || self.id.to_string() == key
    }
}

impl Record for ForumThread {
    const COLLECTION: Collection = Collection::ForumThreads;

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumReply {
    pub id: u64,
    pub thread_id: u64,
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub created_ts: i64,
}

impl Record for ForumReply {
    const COLLECTION: Collection = Collection::ForumReplies;

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conference {
    pub id: u64,
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub date: String,
    #[serde(default, deserialize_with = "nullable")]
    pub location: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub banner: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<String>,
}

impl Record for Conference {
    const COLLECTION: Collection = Collection::Conferences;

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ModerationStatus::Pending)
    }
}

/// A user-submitted conference awaiting an admin decision. Its banner lives
/// under the staging bucket until approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConference {
    pub id: u64,
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub date: String,
    #[serde(default, deserialize_with = "nullable")]
    pub location: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    pub banner: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<String>,
    pub submitted_by: String,
    #[serde(default)]
    pub submitted_ts: i64,
    #[serde(default)]
    pub status: ModerationStatus,
}

impl PendingConference {
    /// The live record this submission becomes, with its relocated banner.
    pub fn to_conference(&self, id: u64, banner: String) -> Conference {
        Conference {
            id,
            name: self.name.clone(),
            date: self.date.clone(),
            location: self.location.clone(),
            description: self.description.clone(),
            banner,
            tags: self.tags.clone(),
        }
    }
}

impl Record for PendingConference {
    const COLLECTION: Collection = Collection::PendingConferences;

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ConferenceSubmitted,
    ConferenceApproved,
    ConferenceRejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    #[serde(default)]
    pub payload: Value,
    pub ts: i64,
}

impl Record for Notification {
    const COLLECTION: Collection = Collection::Notifications;

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_post_is_backfilled() {
        let mut post: Post = serde_json::from_value(json!({
            "id": 4,
            "username": "alice",
            "caption": "old",
            "image": "img/posts/old.png"
        }))
        .unwrap();
        post.normalize();
        assert_eq!(post.likes, 0);
        assert!(post.liked_by.is_empty());
        assert!(post.comments.is_empty());
    }

    #[test]
    fn normalize_is_idempotent_and_recomputes_likes() {
        let mut post: Post = serde_json::from_value(json!({
            "id": 1,
            "username": "alice",
            "likes": 9,
            "liked_by": ["bob", "carol", "bob"]
        }))
        .unwrap();
        post.normalize();
        let once = post.clone();
        post.normalize();
        assert_eq!(post, once);
        assert_eq!(post.likes, 2);
    }

    #[test]
    fn legacy_user_with_nulls_loads() {
        let user: User = serde_json::from_value(json!({
            "username": "bob",
            "bio": null,
            "followers": null,
            "attendingConferences": []
        }))
        .unwrap();
        assert_eq!(user.bio, "");
        assert!(user.followers.is_empty());
        assert_eq!(user.role, Role::User);
        assert_eq!(user.profile_pic, DEFAULT_AVATAR);
    }

    #[test]
    fn comment_timestamp_uses_ts_field() {
        let comment = Comment {
            id: 1,
            username: "a".into(),
            text: "hi".into(),
            timestamp: "2026-01-01T00:00:00+00:00".into(),
        };
        let value = serde_json::to_value(&comment).unwrap();
        assert_eq!(value["ts"], json!("2026-01-01T00:00:00+00:00"));
    }

    #[test]
    fn thread_matches_slug_or_id() {
        let thread = ForumThread {
            id: 12,
            slug: "hello-world-12".into(),
            title: "Hello World".into(),
            body: "b".into(),
            tags: vec![],
            author: "a".into(),
            created_ts: 0,
            replies: 0,
            views: 0,
        };
        assert!(thread.matches_key("hello-world-12"));
        assert!(thread.matches_key("12"));
        assert!(!thread.matches_key("hello-world"));
    }
}
