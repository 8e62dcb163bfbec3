use std::sync::Arc;

use serde::Serialize;

use crate::assets::{AssetStore, Bucket, Upload};
use crate::auth::{hash_password, verify_password, RequestContext};
use crate::db::models::{Post, Role, User, DEFAULT_AVATAR};
use crate::db::Store;
use crate::error::{AppError, AppResult};

/// Signup form.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub school: String,
    pub bio: String,
    pub password: String,
    pub password_confirm: String,
    /// Existing asset path to use instead of an uploaded photo. Only the
    /// default avatar or the user's own avatar file is accepted.
    pub profile_pic: Option<String>,
}

/// Profile fields to change; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub school: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user: User,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedUser {
    pub username: String,
    pub posts_removed: usize,
    pub assets_removed: usize,
}

/// Usernames become avatar file names, so they are limited to
/// `[A-Za-z0-9_.-]` and may not start with a dot.
pub fn validate_username(username: &str) -> AppResult<()> {
    if username.is_empty() {
        return Err(AppError::validation("Username is required."));
    }
    if username.len() > 64 {
        return Err(AppError::validation("Username must be 64 characters or less."));
    }
    let valid = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid || username.starts_with('.') {
        return Err(AppError::validation(
            "Username may only contain letters, digits, '_', '.' and '-'.",
        ));
    }
    Ok(())
}

/// A user may only point at the shared default avatar or at their own
/// avatar file; anything else would be deleted along with the user.
fn check_profile_pic(username: &str, path: &str) -> AppResult<()> {
    if AssetStore::is_reserved(path) || AssetStore::is_avatar_of(path, username) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Profile picture must be {} or {}/{}.<ext>.",
            DEFAULT_AVATAR,
            Bucket::Avatars.dir(),
            username
        )))
    }
}

pub struct UserRepository {
    store: Arc<Store>,
    assets: Arc<AssetStore>,
    bcrypt_cost: u32,
}

impl UserRepository {
    pub fn new(store: Arc<Store>, assets: Arc<AssetStore>, bcrypt_cost: u32) -> Self {
        Self {
            store,
            assets,
            bcrypt_cost,
        }
    }

    pub fn create(&self, new: NewUser, photo: Option<&Upload>) -> AppResult<User> {
        let username = new.username.trim().to_string();
        validate_username(&username)?;

        let password = new.password.trim();
        if password.is_empty() || password != new.password_confirm.trim() {
            return Err(AppError::validation("Passwords do not match."));
        }
        let requested_pic = new
            .profile_pic
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        if let Some(path) = requested_pic {
            check_profile_pic(&username, path)?;
        }
        let password_hash = hash_password(password, self.bcrypt_cost)?;

        let mut tx = self.store.transaction();
        let mut users = tx.table::<User>()?;
        if users.find(|u| u.username == username).is_some() {
            return Err(AppError::DuplicateUsername(username));
        }

        let uploaded = match photo.filter(|p| !p.filename.is_empty()) {
            Some(upload) => Some(self.assets.store_named(Bucket::Avatars, &username, upload)?),
            None => None,
        };
        let profile_pic = uploaded
            .clone()
            .or_else(|| requested_pic.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_AVATAR.to_string());

        let mut user = User::new(username.clone());
        user.name = new.name.trim().to_string();
        user.school = new.school.trim().to_string();
        user.bio = new.bio.trim().to_string();
        user.profile_pic = profile_pic;
        user.password_hash = Some(password_hash);

        users.push(user.clone());
        tx.stage(&users)?;
        if let Err(e) = tx.commit() {
            if let Some(path) = uploaded {
                let _ = self.assets.delete(&path);
            }
            return Err(e.into());
        }

        tracing::info!("Created user {}", username);
        Ok(user)
    }

    /// Check credentials. Unknown users and wrong passwords fail alike.
    pub fn authenticate(&self, username: &str, password: &str) -> AppResult<User> {
        let user = self.find(username.trim())?;
        match user {
            Some(user)
                if user
                    .password_hash
                    .as_deref()
                    .is_some_and(|hash| verify_password(password.trim(), hash)) =>
            {
                Ok(user)
            }
            _ => Err(AppError::forbidden("Invalid username or password.")),
        }
    }

    pub fn find(&self, username: &str) -> AppResult<Option<User>> {
        let users = self.store.table::<User>()?;
        Ok(users.find(|u| u.username == username).cloned())
    }

    pub fn get(&self, username: &str) -> AppResult<User> {
        self.find(username)?
            .ok_or_else(|| AppError::not_found(format!("user {}", username)))
    }

    pub fn list(&self) -> AppResult<Vec<User>> {
        Ok(self.store.table::<User>()?.into_vec())
    }

    /// A user together with their posts.
    pub fn profile(&self, username: &str) -> AppResult<Profile> {
        let user = self.get(username)?;
        let posts = self
            .store
            .table::<Post>()?
            .into_vec()
            .into_iter()
            .filter(|p| p.username == username)
            .collect();
        Ok(Profile { user, posts })
    }

    /// Insert or replace the record keyed by `user.username`.
    ///
    /// Follow lists and the password hash are owned by their own operations
    /// and are carried over from the stored record; the role may only be
    /// changed by a verified admin. A changed avatar path must be the default
    /// avatar or the user's own file.
    pub fn upsert(&self, ctx: &RequestContext, mut user: User) -> AppResult<User> {
        ctx.require_owner_or_admin(&user.username)?;
        validate_username(&user.username)?;

        let mut tx = self.store.transaction();
        let mut users = tx.table::<User>()?;
        match users.find_mut(|u| u.username == user.username) {
            Some(existing) => {
                if existing.role != user.role {
                    ctx.require_verified_admin()?;
                }
                if existing.profile_pic != user.profile_pic {
                    check_profile_pic(&user.username, &user.profile_pic)?;
                }
                user.followers = existing.followers.clone();
                user.following = existing.following.clone();
                user.password_hash = existing.password_hash.clone();
                *existing = user.clone();
            }
            None => {
                if user.role != Role::User {
                    ctx.require_verified_admin()?;
                }
                check_profile_pic(&user.username, &user.profile_pic)?;
                user.followers.clear();
                user.following.clear();
                users.push(user.clone());
            }
        }
        tx.stage(&users)?;
        tx.commit()?;
        Ok(user)
    }

    /// Change profile fields and optionally the avatar. The previous avatar
    /// is removed only after the new one is stored and the record saved.
    pub fn update_profile(
        &self,
        ctx: &RequestContext,
        username: &str,
        update: ProfileUpdate,
        photo: Option<&Upload>,
    ) -> AppResult<User> {
        if !ctx.is_owner(username) {
            ctx.require_actor()?;
            return Err(AppError::forbidden("You can only edit your own profile."));
        }

        let mut tx = self.store.transaction();
        let mut users = tx.table::<User>()?;
        let user = users
            .find_mut(|u| u.username == username)
            .ok_or_else(|| AppError::not_found(format!("user {}", username)))?;

        if let Some(name) = update.name {
            user.name = name.trim().to_string();
        }
        if let Some(school) = update.school {
            user.school = school.trim().to_string();
        }
        if let Some(bio) = update.bio {
            user.bio = bio.trim().to_string();
        }

        let previous = user.profile_pic.clone();
        let replaced = match photo.filter(|p| !p.filename.is_empty()) {
            Some(upload) => {
                let path = self.assets.store_named(Bucket::Avatars, username, upload)?;
                user.profile_pic = path.clone();
                Some(path)
            }
            None => None,
        };
        let updated = user.clone();

        tx.stage(&users)?;
        tx.commit()?;

        if let Some(new_path) = replaced {
            if new_path != previous && AssetStore::is_avatar_of(&previous, username) {
                self.assets.delete(&previous)?;
            }
        }
        Ok(updated)
    }

    pub fn change_password(
        &self,
        ctx: &RequestContext,
        old: &str,
        new: &str,
        confirm: &str,
    ) -> AppResult<()> {
        let actor = ctx.require_actor()?;
        let new = new.trim();
        if new.is_empty() || new != confirm.trim() {
            return Err(AppError::validation("New passwords do not match."));
        }
        let new_hash = hash_password(new, self.bcrypt_cost)?;

        let mut tx = self.store.transaction();
        let mut users = tx.table::<User>()?;
        let user = users
            .find_mut(|u| u.username == actor.username)
            .ok_or_else(|| AppError::not_found(format!("user {}", actor.username)))?;

        let current_ok = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(old.trim(), hash));
        if !current_ok {
            return Err(AppError::forbidden("Current password is incorrect."));
        }

        user.password_hash = Some(new_hash);
        tx.stage(&users)?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_role(&self, ctx: &RequestContext, username: &str, role: Role) -> AppResult<User> {
        let admin = ctx.require_verified_admin()?;

        let mut tx = self.store.transaction();
        let mut users = tx.table::<User>()?;
        let user = users
            .find_mut(|u| u.username == username)
            .ok_or_else(|| AppError::not_found(format!("user {}", username)))?;
        user.role = role;
        let updated = user.clone();

        tx.stage(&users)?;
        tx.commit()?;
        tracing::info!("{} set role of {} to {:?}", admin.username, username, role);
        Ok(updated)
    }

    /// Delete a user, their posts and the posts' images, their own avatar
    /// file, and every follow edge that mentions them. Other users and posts are left
    /// as they are.
    pub fn delete(&self, ctx: &RequestContext, username: &str) -> AppResult<DeletedUser> {
        ctx.require_owner_or_admin(username)?;

        let mut tx = self.store.transaction();
        let mut users = tx.table::<User>()?;
        let mut posts = tx.table::<Post>()?;

        let removed = users.remove_where(|u| u.username == username);
        let user = removed
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found(format!("user {}", username)))?;
        let owned = posts.remove_where(|p| p.username == username);

        let mut assets_removed = 0;
        for post in &owned {
            if self.assets.delete(&post.image)? {
                assets_removed += 1;
            }
        }
        if AssetStore::is_avatar_of(&user.profile_pic, username)
            && self.assets.delete(&user.profile_pic)?
        {
            assets_removed += 1;
        }

        for other in users.iter_mut() {
            other.followers.remove(username);
            other.following.remove(username);
        }

        tx.stage(&users)?;
        tx.stage(&posts)?;
        tx.commit()?;

        tracing::info!("Deleted user {} with {} posts", username, owned.len());
        Ok(DeletedUser {
            username: username.to_string(),
            posts_removed: owned.len(),
            assets_removed,
        })
    }
}
