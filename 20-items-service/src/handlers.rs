//! Item handlers and probes.
//!
//! Each item handler validates, calls the store once and maps the result.
//! Not-found and validation failures are decided here; anything else the
//! store reports travels up as an internal error.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};

use crate::{
    error::{AppError, AppResult},
    item::{Item, ItemId},
    middleware::Payload,
    routes::AppState,
    validation::{validate_create, validate_update},
};

pub async fn create_item(
    State(state): State<AppState>,
    Payload(payload): Payload,
) -> AppResult<(StatusCode, Json<Item>)> {
    let item = validate_create(&payload)?;
    let created = state.store.insert(item).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_items(State(state): State<AppState>) -> AppResult<Json<Vec<Item>>> {
    Ok(Json(state.store.find_all().await?))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Item>> {
    let item = state
        .store
        .find_by_id(&ItemId::new(id))
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(item))
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Payload(payload): Payload,
) -> AppResult<Json<Item>> {
    let changes = validate_update(&payload)?;
    let item = state
        .store
        .update_by_id(&ItemId::new(id), changes)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state
        .store
        .delete_by_id(&ItemId::new(id))
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// Answers once the listener is up; store connectivity is not re-checked.
pub async fn readyz() -> Json<Value> {
    Json(json!({ "ready": true }))
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}
