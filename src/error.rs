use crate::db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Username already taken: {0}")]
    DuplicateUsername(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid asset type: {0}")]
    InvalidAssetType(String),

    #[error("Cannot follow yourself")]
    SelfFollow,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        AppError::Forbidden(why.into())
    }

    /// HTTP status an upstream handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::SelfFollow => 400,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::DuplicateUsername(_) => 409,
            AppError::InvalidAssetType(_) => 415,
            AppError::Store(_) | AppError::Io(_) | AppError::PasswordHash(_) => 500,
        }
    }

    /// Message safe to show to the user. Internal failures are logged and
    /// replaced with a generic message.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Store(e) => {
                tracing::error!("Storage error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Io(e) => {
                tracing::error!("I/O error: {}", e);
                "Internal server error".to_string()
            }
            AppError::PasswordHash(e) => {
                tracing::error!("Password hashing error: {}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True for failures of the underlying disk or database rather than the request.
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            AppError::Store(_) | AppError::Io(_) | AppError::PasswordHash(_)
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(AppError::not_found("post 3").status_code(), 404);
    }

    #[test]
    fn forbidden_maps_to_403() {
        assert_eq!(AppError::forbidden("not yours").status_code(), 403);
    }

    #[test]
    fn validation_and_self_follow_map_to_400() {
        assert_eq!(AppError::validation("empty").status_code(), 400);
        assert_eq!(AppError::SelfFollow.status_code(), 400);
    }

    #[test]
    fn duplicate_username_maps_to_409() {
        assert_eq!(
            AppError::DuplicateUsername("alice".into()).status_code(),
            409
        );
    }

    #[test]
    fn io_failures_hide_details() {
        let err = AppError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/srv/secret/path",
        ));
        assert_eq!(err.status_code(), 500);
        assert!(err.is_io_failure());
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn user_errors_keep_their_message() {
        let err = AppError::validation("Comment must be 1000 characters or less");
        assert_eq!(
            err.public_message(),
            "Comment must be 1000 characters or less"
        );
        assert!(!err.is_io_failure());
    }
}
