use crate::error::Error;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

/// Error returned by handlers. Every variant renders as
/// `{"success": false, "message": ...}` with a matching status.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] Error),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// `axum::Json` whose rejection renders as the JSON error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `axum::extract::Path` whose rejection renders as the JSON error envelope.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Domain(err) => match err {
                Error::Validation(_) | Error::ShowInPast(_) => StatusCode::BAD_REQUEST,
                Error::SeatConflict { .. } | Error::AlreadyTerminal { .. } => StatusCode::CONFLICT,
                Error::ShowNotFound(_) | Error::MovieNotFound(_) | Error::BookingNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                Error::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            },
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Domain(Error::UpstreamUnavailable(detail)) => {
                error!(error = %detail, "Upstream call failed");
                "An upstream service is unavailable, please try again".to_string()
            }
            other => {
                warn!(status = status.as_u16(), "Request rejected: {}", other);
                other.to_string()
            }
        };

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
