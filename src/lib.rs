pub mod auth;
pub mod backend;
pub mod config;
pub mod db;
pub mod profiles;
pub mod res;
pub mod rooms;

use std::fmt;

use axum::{http::StatusCode, response::{Html, IntoResponse, Response}};
use serde_json::Value;
use tokio::task::JoinHandle;

pub use auth::{Auth, SocialLogin};
pub use config::Config;
pub use profiles::UserService;
pub use rooms::{MessageChannel, RoomDirectory};

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
    fn get_obj_field(&self, field: &str) -> AppResult<&Value>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or(format!("expected {field} in {self}"))?
            .as_str()
            .ok_or(format!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_obj_field(&self, field: &str) -> AppResult<&Value> {
        self.get(field)
        .ok_or(format!("expected {field} in {self}").into())
    }
}

/// The failures callers are expected to tell apart.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("write to {path} rejected: {reason}")]
    Rejected { path: String, reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no signed-in user profile")]
    NotSignedIn,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// The typed cause, when the error came from this crate rather than a library.
    pub fn kind(&self) -> Option<&ChatError> {
        self.0.downcast_ref::<ChatError>()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            Some(ChatError::Auth(_)) | Some(ChatError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Html(res::lockin_page(false, &self.to_string()))).into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(ChatError);
apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(std::io::Error);
apperr_impl!(reqwest::Error);
apperr_impl!(oauth2::url::ParseError);

impl<E: core::error::Error + Send + Sync + 'static, R: oauth2::ErrorResponse + Send + Sync + 'static> From<oauth2::RequestTokenError<E, R>> for AppError {
    fn from(err: oauth2::RequestTokenError<E, R>) -> Self {
        Self(anyhow::Error::from(err))
    }
}

/// Aborts the wrapped task when dropped, so live views release their listeners.
#[derive(Debug)]
pub struct AbortOnDrop(pub(crate) JoinHandle<()>);

impl AbortOnDrop {
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
