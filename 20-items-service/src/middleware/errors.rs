use std::any::Any;

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::{
    error::{InternalErrorDetail, internal_error_response},
    routes::AppState,
};

/// Replaces the generic 500 body with the failure's details in development.
///
/// Outside development the details are dropped here, so they never reach
/// the client or any outer layer.
pub async fn render_internal_errors(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let Some(detail) = response.extensions_mut().remove::<InternalErrorDetail>() else {
        return response;
    };

    if !state.mode.exposes_internals() {
        return response;
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": detail.message,
            "stack": detail.stack,
        })),
    )
        .into_response()
}

/// Turns a handler panic into the same 500 an internal error gets.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    };

    error!(panic = %message, "request handler panicked");
    internal_error_response(InternalErrorDetail {
        message: message.clone(),
        stack: vec![format!("panic: {message}")],
    })
}
