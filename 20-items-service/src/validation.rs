//! Validation and normalization of item payloads.
//!
//! Payloads arrive as untyped JSON objects. Text fields are trimmed before
//! any length rule is applied, and numbers or booleans are accepted in
//! their textual form. Nothing here touches the store.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::item::{ItemChanges, NewItem};

pub const NAME_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{0} must be a string")]
    InvalidType(&'static str),
}

pub fn validate_create(payload: &Map<String, Value>) -> Result<NewItem, ValidationError> {
    let name = text_field(payload, "name")?
        .filter(|name| !name.is_empty())
        .ok_or(ValidationError::MissingField("name"))?;
    check_length("name", &name, NAME_MAX_CHARS)?;

    let description = text_field(payload, "description")?.filter(|text| !text.is_empty());
    if let Some(text) = &description {
        check_length("description", text, DESCRIPTION_MAX_CHARS)?;
    }

    Ok(NewItem { name, description })
}

/// Only keys present in `payload` end up in the result.
///
/// A blank `name` counts as not supplied, so an update can never empty it.
/// A `description` that is present but blank or `null` clears the stored one.
pub fn validate_update(payload: &Map<String, Value>) -> Result<ItemChanges, ValidationError> {
    let mut changes = ItemChanges::default();

    if let Some(name) = text_field(payload, "name")?.filter(|name| !name.is_empty()) {
        check_length("name", &name, NAME_MAX_CHARS)?;
        changes.name = Some(name);
    }

    if payload.contains_key("description") {
        let description = text_field(payload, "description")?.filter(|text| !text.is_empty());
        if let Some(text) = &description {
            check_length("description", text, DESCRIPTION_MAX_CHARS)?;
        }
        changes.description = Some(description);
    }

    Ok(changes)
}

fn text_field(
    payload: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.trim().to_string())),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
        Some(Value::Array(_) | Value::Object(_)) => Err(ValidationError::InvalidType(field)),
    }
}

fn check_length(field: &'static str, text: &str, max: usize) -> Result<(), ValidationError> {
    if text.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}
