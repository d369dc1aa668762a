use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API-surface error. Translated to a 4xx/5xx with a `{detail}` JSON body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(e.into())
    }
}

/// Errors raised by source-network and price-oracle clients. Collectors
/// recover from all of these locally: upstream and rate-limit failures end
/// the tick without advancing the checkpoint, decode failures skip the
/// record and continue.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("rate limited")]
    RateLimited,

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().map(|s| s.as_u16()) == Some(429) {
            SourceError::RateLimited
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Upstream(e.to_string())
        }
    }
}

impl SourceError {
    /// True when the whole tick should end and retry later (checkpoint
    /// untouched), as opposed to a single bad record.
    pub fn ends_tick(&self) -> bool {
        matches!(self, SourceError::Upstream(_) | SourceError::RateLimited)
    }
}
