//! Typed operations over the collections. Each mutating call runs one
//! load → mutate → commit cycle through [`crate::db::Store::transaction`].

pub mod conferences;
pub mod forums;
pub mod graph;
pub mod moderation;
pub mod notifications;
pub mod posts;
pub mod users;

pub use conferences::ConferenceRepository;
pub use forums::{slugify, ForumRepository, NewThread, ThreadQuery, ThreadView};
pub use graph::{FollowAction, FollowOutcome, RelationshipGraph};
pub use moderation::{ModerationPipeline, NewConference};
pub use notifications::NotificationRepository;
pub use posts::{LikeOutcome, PostRepository};
pub use users::{DeletedUser, NewUser, Profile, ProfileUpdate, UserRepository};

use chrono::{SecondsFormat, Utc};

/// Split a comma-separated tag field, trimming and dropping empties and
/// repeats while keeping the first-seen order.
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// UTC time with second precision, e.g. `2026-10-18T09:30:00+00:00`.
pub(crate) fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        assert_eq!(
            parse_tags(" rust, ml ,,rust, ai "),
            vec!["rust".to_string(), "ml".to_string(), "ai".to_string()]
        );
        assert!(parse_tags("").is_empty());
        assert!(parse_tags(" , ,").is_empty());
    }

    #[test]
    fn iso_now_is_utc_seconds() {
        let ts = iso_now();
        assert!(ts.ends_with("+00:00"));
        assert!(!ts.contains('.'));
    }
}
