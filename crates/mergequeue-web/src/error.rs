//! Error type for the HTTP surface (ambient stack — `thiserror` in the
//! library layer, mapped to status codes at the axum boundary).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebError {
    #[error("unauthorized webhook request")]
    Unauthorized,

    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] mergequeue_core::Error),
}

impl WebError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::Engine(mergequeue_core::Error::TrainNotFound(..)) => StatusCode::NOT_FOUND,
            WebError::Engine(mergequeue_core::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            WebError::Engine(mergequeue_core::Error::QueueRuleNotFound(_)) => StatusCode::BAD_REQUEST,
            WebError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({"status": "error", "message": self.to_string()}));
        (status, body).into_response()
    }
}
