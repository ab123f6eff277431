//! Mapping from service errors to HTTP responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use statkeep_service::UpdateError;
use statkeep_sign::IntegrityError;

/// Any failure a handler can report.
#[derive(Debug)]
pub enum ApiError {
    Update(UpdateError),
    Integrity(IntegrityError),
    /// Request body was not a usable JSON document.
    Payload(String),
    /// JSON route called without a JSON content type.
    MediaType(String),
    /// Metric type unknown on a read route, where it can never match.
    UnknownType(String),
    /// The HTML listing failed to render.
    Render(String),
}

impl From<UpdateError> for ApiError {
    fn from(e: UpdateError) -> Self {
        ApiError::Update(e)
    }
}

impl From<IntegrityError> for ApiError {
    fn from(e: IntegrityError) -> Self {
        ApiError::Integrity(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(r) => ApiError::MediaType(r.body_text()),
            other => ApiError::Payload(other.body_text()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Update(UpdateError::UnsupportedType(_)) => StatusCode::NOT_IMPLEMENTED,
            ApiError::Update(UpdateError::MalformedValue { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Update(UpdateError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Update(UpdateError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Integrity(_) | ApiError::Payload(_) => StatusCode::BAD_REQUEST,
            ApiError::MediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::UnknownType(_) => StatusCode::NOT_FOUND,
            ApiError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Update(e @ UpdateError::Backend(_)) => {
                error!(error = %e, "backend failure");
                e.to_string()
            }
            ApiError::Update(e) => e.to_string(),
            ApiError::Integrity(e) => {
                warn!("rejected sample with invalid signature");
                e.to_string()
            }
            ApiError::Payload(msg) | ApiError::MediaType(msg) => msg.clone(),
            ApiError::UnknownType(kind) => format!("unknown metric type: {kind}"),
            ApiError::Render(e) => {
                error!(error = %e, "listing render failed");
                "failed to render listing".to_string()
            }
        };
        (status, body).into_response()
    }
}
