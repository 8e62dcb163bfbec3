use std::sync::Arc;

use serde::Serialize;

use crate::auth::RequestContext;
use crate::db::models::{ForumReply, ForumThread};
use crate::db::{Store, Table};
use crate::error::{AppError, AppResult};

use super::{parse_tags, unix_now};

const MAX_SLUG_LEN: usize = 80;

/// URL-safe form of a title: lowercase, `[a-z0-9 -]` only, whitespace runs
/// become one hyphen, hyphen runs collapse, at most 80 characters, and
/// `"topic"` when nothing is left.
pub fn slugify(title: &str) -> String {
    let kept: String = title
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-'
        })
        .collect();

    let mut slug = String::with_capacity(kept.len());
    let mut in_space = false;
    for c in kept.chars() {
        if c.is_whitespace() {
            if !in_space {
                slug.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        slug.push(c);
    }
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }

    slug.truncate(MAX_SLUG_LEN);
    if slug.is_empty() {
        "topic".to_string()
    } else {
        slug
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewThread {
    pub title: String,
    pub body: String,
    /// Comma-separated tags as typed by the author.
    pub tags: String,
}

#[derive(Debug, Clone, Default)]
pub struct ThreadQuery {
    /// Substring matched against title, body and tags.
    pub q: Option<String>,
    /// Exact tag, case-insensitive.
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    pub thread: ForumThread,
    /// Oldest first.
    pub replies: Vec<ForumReply>,
}

pub struct ForumRepository {
    store: Arc<Store>,
}

impl ForumRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn create_thread(&self, ctx: &RequestContext, new: NewThread) -> AppResult<ForumThread> {
        let actor = ctx.require_actor()?;
        let title = new.title.trim();
        let body = new.body.trim();
        if title.is_empty() || body.is_empty() {
            return Err(AppError::validation("Title and body are required."));
        }

        let mut tx = self.store.transaction();
        let mut threads = tx.table::<ForumThread>()?;
        let id = tx.allocate_id(&threads)?;
        let thread = ForumThread {
            id,
            slug: format!("{}-{}", slugify(title), id),
            title: title.to_string(),
            body: body.to_string(),
            tags: parse_tags(&new.tags),
            author: actor.username.clone(),
            created_ts: unix_now(),
            replies: 0,
            views: 0,
        };
        threads.push(thread.clone());
        tx.stage(&threads)?;
        tx.commit()?;

        tracing::debug!("{} opened thread {}", actor.username, thread.slug);
        Ok(thread)
    }

    /// Threads matching the query, newest first, with reply counts taken
    /// from the replies collection.
    pub fn list_threads(&self, query: &ThreadQuery) -> AppResult<Vec<ForumThread>> {
        let replies = self.store.table::<ForumReply>()?;
        let mut threads = self.store.table::<ForumThread>()?.into_vec();

        if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let q = q.to_lowercase();
            threads.retain(|t| {
                let haystack =
                    format!("{} {} {}", t.title, t.body, t.tags.join(" ")).to_lowercase();
                haystack.contains(&q)
            });
        }
        if let Some(tag) = query.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let tag = tag.to_lowercase();
            threads.retain(|t| t.tags.iter().any(|x| x.to_lowercase() == tag));
        }

        for thread in &mut threads {
            thread.replies = reply_count(&replies, thread.id);
        }
        threads.sort_by(|a, b| b.created_ts.cmp(&a.created_ts).then(b.id.cmp(&a.id)));
        Ok(threads)
    }

    /// Look a thread up by slug or numeric id without counting a view.
    pub fn find_thread(&self, key: &str) -> AppResult<ThreadView> {
        let threads = self.store.table::<ForumThread>()?;
        let replies = self.store.table::<ForumReply>()?;
        let thread = threads
            .find(|t| t.matches_key(key))
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("thread {}", key)))?;
        Ok(Self::view(thread, &replies))
    }

    /// Open a thread for reading. Every call counts a view and is persisted.
    pub fn view_thread(&self, key: &str) -> AppResult<ThreadView> {
        let mut tx = self.store.transaction();
        let mut threads = tx.table::<ForumThread>()?;
        let replies = tx.table::<ForumReply>()?;
        let thread = threads
            .find_mut(|t| t.matches_key(key))
            .ok_or_else(|| AppError::not_found(format!("thread {}", key)))?;
        thread.views += 1;
        let thread = thread.clone();

        tx.stage(&threads)?;
        tx.commit()?;
        Ok(Self::view(thread, &replies))
    }

    /// Reply to a thread. The reply and the parent's `replies` counter are
    /// committed together; the counter is recounted rather than bumped.
    pub fn add_reply(&self, ctx: &RequestContext, key: &str, text: &str) -> AppResult<ForumReply> {
        let actor = ctx.require_actor()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::validation("Reply cannot be empty."));
        }

        let mut tx = self.store.transaction();
        let mut threads = tx.table::<ForumThread>()?;
        let mut replies = tx.table::<ForumReply>()?;
        let thread_id = threads
            .find(|t| t.matches_key(key))
            .map(|t| t.id)
            .ok_or_else(|| AppError::not_found(format!("thread {}", key)))?;

        let reply = ForumReply {
            id: tx.allocate_id(&replies)?,
            thread_id,
            author: actor.username.clone(),
            text: text.to_string(),
            created_ts: unix_now(),
        };
        replies.push(reply.clone());

        let count = reply_count(&replies, thread_id);
        if let Some(thread) = threads.find_mut(|t| t.id == thread_id) {
            thread.replies = count;
        }

        tx.stage(&replies)?;
        tx.stage(&threads)?;
        tx.commit()?;
        Ok(reply)
    }

    fn view(mut thread: ForumThread, replies: &Table<ForumReply>) -> ThreadView {
        let mut own: Vec<ForumReply> = replies
            .iter()
            .filter(|r| r.thread_id == thread.id)
            .cloned()
            .collect();
        own.sort_by(|a, b| a.created_ts.cmp(&b.created_ts).then(a.id.cmp(&b.id)));
        thread.replies = own.len();
        ThreadView {
            thread,
            replies: own,
        }
    }
}

fn reply_count(replies: &Table<ForumReply>, thread_id: u64) -> usize {
    replies.iter().filter(|r| r.thread_id == thread_id).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ForumRepository {
        ForumRepository::new(Arc::new(Store::in_memory()))
    }

    fn thread(title: &str, body: &str, tags: &str) -> NewThread {
        NewThread {
            title: title.into(),
            body: body.into(),
            tags: tags.into(),
        }
    }

    #[test]
    fn slugify_examples() {
        assert_eq!(slugify("Hello, World!!"), "hello-world");
        assert_eq!(slugify(""), "topic");
        assert_eq!(slugify("!!!"), "topic");
        assert_eq!(slugify("  Rust   &  Go -- compared "), "rust-go-compared");
        assert_eq!(slugify("a - b"), "a-b");
        assert_eq!(slugify("a &"), "a-");
        assert_eq!(slugify("Ünïcödé title"), "ncd-title");
    }

    #[test]
    fn slugify_truncates_to_80() {
        let slug = slugify(&"word ".repeat(40));
        assert_eq!(slug.len(), 80);
        assert!(slug.starts_with("word-word"));
    }

    #[test]
    fn create_thread_derives_unique_slug() {
        let forums = repo();
        let ctx = RequestContext::user("alice");
        let a = forums.create_thread(&ctx, thread("Hello", "b", "")).unwrap();
        let b = forums.create_thread(&ctx, thread("Hello", "b", "")).unwrap();
        assert_eq!(a.slug, "hello-1");
        assert_eq!(b.slug, "hello-2");
    }

    #[test]
    fn create_thread_requires_title_and_body() {
        let forums = repo();
        let ctx = RequestContext::user("alice");
        assert!(matches!(
            forums.create_thread(&ctx, thread(" ", "body", "")),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            forums.create_thread(&ctx, thread("title", "", "")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn every_view_is_counted() {
        let forums = repo();
        let t = forums
            .create_thread(&RequestContext::user("alice"), thread("Hi", "b", ""))
            .unwrap();
        forums.view_thread(&t.slug).unwrap();
        let view = forums.view_thread(&t.id.to_string()).unwrap();
        assert_eq!(view.thread.views, 2);
        assert_eq!(forums.find_thread(&t.slug).unwrap().thread.views, 2);
    }

    #[test]
    fn unknown_thread_is_not_found() {
        let forums = repo();
        assert!(matches!(
            forums.view_thread("nope-9"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn replies_update_counter_and_list_in_order() {
        let forums = repo();
        let ctx = RequestContext::user("alice");
        let t1 = forums.create_thread(&ctx, thread("One", "b", "")).unwrap();
        let t2 = forums.create_thread(&ctx, thread("Two", "b", "")).unwrap();

        let r1 = forums.add_reply(&ctx, &t1.slug, "first").unwrap();
        let r2 = forums.add_reply(&RequestContext::user("bob"), "1", "second").unwrap();
        let r3 = forums.add_reply(&ctx, &t2.slug, "other").unwrap();
        assert_eq!((r1.id, r2.id, r3.id), (1, 2, 3));

        let view = forums.find_thread(&t1.slug).unwrap();
        assert_eq!(view.thread.replies, 2);
        let texts: Vec<&str> = view.replies.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);

        let stored = forums.store.table::<ForumThread>().unwrap();
        assert_eq!(stored.find(|t| t.id == t1.id).unwrap().replies, 2);
        assert_eq!(stored.find(|t| t.id == t2.id).unwrap().replies, 1);
    }

    #[test]
    fn empty_reply_is_rejected() {
        let forums = repo();
        let ctx = RequestContext::user("alice");
        let t = forums.create_thread(&ctx, thread("One", "b", "")).unwrap();
        assert!(matches!(
            forums.add_reply(&ctx, &t.slug, "  "),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn list_filters_by_query_and_tag() {
        let forums = repo();
        let ctx = RequestContext::user("alice");
        forums
            .create_thread(&ctx, thread("Rust tips", "borrowing", "Rust, lang"))
            .unwrap();
        forums
            .create_thread(&ctx, thread("Garden", "tomatoes", "outdoors"))
            .unwrap();

        let all = forums.list_threads(&ThreadQuery::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "Garden");

        let by_q = forums
            .list_threads(&ThreadQuery {
                q: Some("BORROW".into()),
                tag: None,
            })
            .unwrap();
        assert_eq!(by_q.len(), 1);

        let by_tag = forums
            .list_threads(&ThreadQuery {
                q: None,
                tag: Some("rust".into()),
            })
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].tags, vec!["Rust".to_string(), "lang".to_string()]);
    }
}
