use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier assigned by the store when an item is created.
///
/// The service never looks inside it: ids are compared for equality and
/// echoed back to clients, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted item as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalized create payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub name: String,
    pub description: Option<String>,
}

/// Normalized partial update. Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemChanges {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
}

impl ItemChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }

    /// Applies the changes to `item` in place. Timestamps are left to the caller.
    pub fn apply_to(&self, item: &mut Item) {
        if let Some(name) = &self.name {
            item.name = name.clone();
        }
        if let Some(description) = &self.description {
            item.description = description.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Item {
        let now = Utc::now();
        Item {
            id: ItemId::new("abc"),
            name: "A".into(),
            description: Some("B".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn serializes_with_camel_case_timestamps() {
        let json = serde_json::to_value(sample()).expect("serialize item");
        assert_eq!(json["id"], "abc");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
    }

    #[test]
    fn missing_description_is_omitted() {
        let mut item = sample();
        item.description = None;
        let json = serde_json::to_value(item).expect("serialize item");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn partial_changes_only_touch_supplied_fields() {
        let mut item = sample();
        let changes = ItemChanges {
            name: None,
            description: Some(Some("C".into())),
        };
        changes.apply_to(&mut item);
        assert_eq!(item.name, "A");
        assert_eq!(item.description.as_deref(), Some("C"));

        ItemChanges {
            name: None,
            description: Some(None),
        }
        .apply_to(&mut item);
        assert_eq!(item.description, None);
    }
}
