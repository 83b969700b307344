//! Error envelope: `{ "error": { "code": "...", "message": "..." } }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use overseer_core::GovernanceError;
use serde_json::json;
use tracing::{error, warn};

/// A [`GovernanceError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub GovernanceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        status_for(&self.0)
    }
}

impl From<GovernanceError> for ApiError {
    fn from(e: GovernanceError) -> Self {
        Self(e)
    }
}

pub fn status_for(err: &GovernanceError) -> StatusCode {
    match err.code() {
        "Validation" => StatusCode::BAD_REQUEST,
        "Unauthorized" => StatusCode::UNAUTHORIZED,
        "NotFound" => StatusCode::NOT_FOUND,
        "SessionClosed" | "NotApproved" | "AlreadyResolved" | "RuleConflict" => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal detail stays in the log
        let message = if status.is_server_error() {
            error!(error = %self.0, "request failed");
            "internal error".to_string()
        } else {
            warn!(code = self.0.code(), error = %self.0, "request rejected");
            self.0.to_string()
        };
        let code = if status.is_server_error() {
            "Internal"
        } else {
            self.0.code()
        };
        (
            status,
            Json(json!({ "error": { "code": code, "message": message } })),
        )
            .into_response()
    }
}
