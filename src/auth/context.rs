use crate::db::models::{Role, User};
use crate::error::{AppError, AppResult};

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub username: String,
    pub role: Role,
    /// Second factor confirmed for this request. Required on top of the
    /// admin role for role changes and moderation decisions.
    pub verified: bool,
}

/// Request-scoped identity passed into every repository call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    actor: Option<Actor>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self { actor: None }
    }

    /// Signed-in regular user.
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            actor: Some(Actor {
                username: username.into(),
                role: Role::User,
                verified: false,
            }),
        }
    }

    pub fn admin(username: impl Into<String>, verified: bool) -> Self {
        Self {
            actor: Some(Actor {
                username: username.into(),
                role: Role::Admin,
                verified,
            }),
        }
    }

    /// Context for a stored user, taking the role from the record.
    pub fn for_user(user: &User, verified: bool) -> Self {
        Self {
            actor: Some(Actor {
                username: user.username.clone(),
                role: user.role,
                verified,
            }),
        }
    }

    /// Shell operator running the admin binary.
    pub fn operator() -> Self {
        Self::admin("operator", true)
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.actor.as_ref().map(|a| a.username.as_str())
    }

    pub fn require_actor(&self) -> AppResult<&Actor> {
        self.actor
            .as_ref()
            .ok_or_else(|| AppError::forbidden("Please sign in to continue"))
    }

    pub fn is_owner(&self, username: &str) -> bool {
        self.username() == Some(username)
    }

    pub fn is_admin(&self) -> bool {
        self.actor.as_ref().is_some_and(|a| a.role == Role::Admin)
    }

    pub fn is_verified_admin(&self) -> bool {
        self.actor
            .as_ref()
            .is_some_and(|a| a.role == Role::Admin && a.verified)
    }

    pub fn require_admin(&self) -> AppResult<&Actor> {
        let actor = self.require_actor()?;
        if actor.role != Role::Admin {
            return Err(AppError::forbidden("Admin access required"));
        }
        Ok(actor)
    }

    pub fn require_verified_admin(&self) -> AppResult<&Actor> {
        let actor = self.require_admin()?;
        if !actor.verified {
            return Err(AppError::forbidden("Admin verification required"));
        }
        Ok(actor)
    }

    /// The owner of `username`, or a verified admin.
    pub fn require_owner_or_admin(&self, username: &str) -> AppResult<&Actor> {
        let actor = self.require_actor()?;
        if actor.username == username || self.is_verified_admin() {
            return Ok(actor);
        }
        Err(AppError::forbidden("Not allowed to modify this account"))
    }
}
