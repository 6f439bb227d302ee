use std::error::Error as _;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{store::StoreError, validation::ValidationError};

pub type AppResult<T> = Result<T, AppError>;

/// Everything a request can fail with, mapped onto the HTTP contract.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found")]
    NotFound,
    #[error("malformed JSON body")]
    MalformedBody,
    #[error("request body too large")]
    PayloadTooLarge,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MalformedBody => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Details of a 500, attached to the response for the error-rendering
/// middleware. The body itself never carries them.
#[derive(Debug, Clone)]
pub struct InternalErrorDetail {
    pub message: String,
    pub stack: Vec<String>,
}

impl InternalErrorDetail {
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = vec![format!("{err:?}")];
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            stack,
        }
    }
}

pub fn internal_error_response(detail: InternalErrorDetail) -> Response {
    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response();
    response.extensions_mut().insert(detail);
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, source = ?self.source(), "request failed");
            return internal_error_response(InternalErrorDetail::from_error(&self));
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
