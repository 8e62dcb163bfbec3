use std::sync::Arc;

use serde::Serialize;

use crate::assets::{AssetStore, Bucket, Upload};
use crate::auth::RequestContext;
use crate::db::ids::next_id_from;
use crate::db::models::{Comment, Post};
use crate::db::Store;
use crate::error::{AppError, AppResult};

use super::iso_now;

pub const MAX_COMMENT_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes: usize,
}

pub struct PostRepository {
    store: Arc<Store>,
    assets: Arc<AssetStore>,
}

impl PostRepository {
    pub fn new(store: Arc<Store>, assets: Arc<AssetStore>) -> Self {
        Self { store, assets }
    }

    pub fn create(&self, ctx: &RequestContext, caption: &str, image: &Upload) -> AppResult<Post> {
        let actor = ctx.require_actor()?;
        if image.filename.is_empty() {
            return Err(AppError::validation("No image uploaded."));
        }

        let mut tx = self.store.transaction();
        let mut posts = tx.table::<Post>()?;
        let id = tx.allocate_id(&posts)?;
        let image_path = self.assets.store(Bucket::PostImages, image)?;

        let post = Post::new(id, actor.username.clone(), caption.trim(), image_path.clone());
        posts.push(post.clone());
        tx.stage(&posts)?;
        if let Err(e) = tx.commit() {
            let _ = self.assets.delete(&image_path);
            return Err(e.into());
        }

        tracing::debug!("{} created post {}", actor.username, id);
        Ok(post)
    }

    pub fn get(&self, id: u64) -> AppResult<Post> {
        self.store
            .table::<Post>()?
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("post {}", id)))
    }

    /// All posts, newest first.
    pub fn feed(&self) -> AppResult<Vec<Post>> {
        let mut posts = self.store.table::<Post>()?.into_vec();
        posts.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(posts)
    }

    /// Posts whose caption or author contains `query`, case-insensitively.
    /// An empty query returns the whole feed.
    pub fn explore(&self, query: &str) -> AppResult<Vec<Post>> {
        let q = query.trim().to_lowercase();
        let mut posts = self.feed()?;
        if !q.is_empty() {
            posts.retain(|p| {
                p.caption.to_lowercase().contains(&q) || p.username.to_lowercase().contains(&q)
            });
        }
        Ok(posts)
    }

    pub fn posts_by(&self, username: &str) -> AppResult<Vec<Post>> {
        Ok(self
            .store
            .table::<Post>()?
            .into_vec()
            .into_iter()
            .filter(|p| p.username == username)
            .collect())
    }

    /// Like, or unlike if already liked. `likes` is recomputed from
    /// `liked_by` every time.
    pub fn toggle_like(&self, ctx: &RequestContext, post_id: u64) -> AppResult<LikeOutcome> {
        let actor = ctx.require_actor()?;

        let mut tx = self.store.transaction();
        let mut posts = tx.table::<Post>()?;
        let post = posts
            .find_mut(|p| p.id == post_id)
            .ok_or_else(|| AppError::not_found(format!("post {}", post_id)))?;

        if !post.liked_by.remove(&actor.username) {
            post.liked_by.insert(actor.username.clone());
        }
        post.likes = post.liked_by.len();
        let outcome = LikeOutcome {
            liked: post.liked_by.contains(&actor.username),
            likes: post.likes,
        };

        tx.stage(&posts)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn add_comment(&self, ctx: &RequestContext, post_id: u64, text: &str) -> AppResult<Comment> {
        let actor = ctx.require_actor()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::validation("Comment cannot be empty."));
        }
        if text.chars().count() > MAX_COMMENT_CHARS {
            return Err(AppError::validation(format!(
                "Comment must be {} characters or less.",
                MAX_COMMENT_CHARS
            )));
        }

        let mut tx = self.store.transaction();
        let mut posts = tx.table::<Post>()?;
        let post = posts
            .find_mut(|p| p.id == post_id)
            .ok_or_else(|| AppError::not_found(format!("post {}", post_id)))?;

        let comment = Comment {
            id: next_id_from(post.comments.iter().map(|c| Some(c.id))),
            username: actor.username.clone(),
            text: text.to_string(),
            timestamp: iso_now(),
        };
        post.comments.push(comment.clone());

        tx.stage(&posts)?;
        tx.commit()?;
        Ok(comment)
    }

    /// Replace caption and/or image. A new image is stored first; the old
    /// file is deleted only once the record points at the new one.
    pub fn edit(
        &self,
        ctx: &RequestContext,
        post_id: u64,
        caption: Option<&str>,
        image: Option<&Upload>,
    ) -> AppResult<Post> {
        let actor = ctx.require_actor()?;

        let mut tx = self.store.transaction();
        let mut posts = tx.table::<Post>()?;
        let post = posts
            .find_mut(|p| p.id == post_id)
            .ok_or_else(|| AppError::not_found(format!("post {}", post_id)))?;
        if post.username != actor.username {
            return Err(AppError::forbidden("You can only edit your own posts."));
        }

        if let Some(caption) = caption {
            post.caption = caption.trim().to_string();
        }
        let superseded = match image.filter(|u| !u.filename.is_empty()) {
            Some(upload) => {
                let new_path = self.assets.store(Bucket::PostImages, upload)?;
                Some(std::mem::replace(&mut post.image, new_path))
            }
            None => None,
        };
        let updated = post.clone();

        tx.stage(&posts)?;
        if let Err(e) = tx.commit() {
            if superseded.is_some() {
                let _ = self.assets.delete(&updated.image);
            }
            return Err(e.into());
        }

        if let Some(old) = superseded {
            self.assets.delete(&old)?;
        }
        Ok(updated)
    }

    /// Delete a post and its image. Only the author may do so.
    pub fn delete(&self, ctx: &RequestContext, post_id: u64) -> AppResult<()> {
        let actor = ctx.require_actor()?;

        let mut tx = self.store.transaction();
        let mut posts = tx.table::<Post>()?;
        let post = posts
            .find(|p| p.id == post_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("post {}", post_id)))?;
        if post.username != actor.username {
            return Err(AppError::forbidden("You can only delete your own posts."));
        }

        self.assets.delete(&post.image)?;
        posts.retain(|p| p.id != post_id);
        tx.stage(&posts)?;
        tx.commit()?;

        tracing::debug!("{} deleted post {}", actor.username, post_id);
        Ok(())
    }
}
