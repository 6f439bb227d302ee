//! MongoDB backend, enabled with the `mongo` feature.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, IndexModel,
    bson::{DateTime as BsonDateTime, Document, doc, oid::ObjectId},
    options::{ClientOptions, ReturnDocument},
};
use tracing::warn;

use super::{ItemStore, Provisioned, StoreConnector, StoreError};
use crate::item::{Item, ItemChanges, ItemId, NewItem};
use crate::provision::AppCredentials;

const COLLECTION: &str = "items";
const FALLBACK_DATABASE: &str = "devsecops";

pub struct MongoConnector {
    uri: String,
    connect_timeout: Duration,
}

impl MongoConnector {
    pub fn new(uri: String, connect_timeout: Duration) -> Self {
        Self {
            uri,
            connect_timeout,
        }
    }

    async fn client(&self) -> Result<Client, StoreError> {
        let mut options = ClientOptions::parse(self.uri.as_str())
            .await
            .map_err(|err| StoreError::Connect(err.to_string()))?;
        options.server_selection_timeout = Some(self.connect_timeout);
        options.connect_timeout = Some(self.connect_timeout);
        Client::with_options(options).map_err(|err| StoreError::Connect(err.to_string()))
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(&self) -> Result<Arc<dyn ItemStore>, StoreError> {
        let client = self.client().await?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(FALLBACK_DATABASE));

        // The driver connects lazily; a ping forces server selection now.
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|err| StoreError::Connect(err.to_string()))?;

        let items = database.collection::<Document>(COLLECTION);
        let index = IndexModel::builder().keys(doc! { "name": 1 }).build();
        if let Err(err) = items.create_index(index).await {
            warn!(error = %err, "failed to ensure name index");
        }

        Ok(Arc::new(MongoStore { client, items }))
    }

    async fn provision(&self, credentials: &AppCredentials) -> Result<Provisioned, StoreError> {
        let client = self.client().await?;
        let created = client
            .database(&credentials.database)
            .run_command(doc! {
                "createUser": credentials.username.as_str(),
                "pwd": credentials.password.as_str(),
                "roles": [{ "role": "readWrite", "db": credentials.database.as_str() }],
            })
            .await;
        client.shutdown().await;
        created.map_err(|err| StoreError::operation("createUser", err))?;
        Ok(Provisioned::Created)
    }
}

pub struct MongoStore {
    client: Client,
    items: Collection<Document>,
}

fn object_id(id: &ItemId) -> Option<ObjectId> {
    ObjectId::parse_str(id.as_str()).ok()
}

fn to_chrono(value: &BsonDateTime) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(value.timestamp_millis())
        .ok_or_else(|| StoreError::operation("decode", "timestamp out of range"))
}

/// Update pipeline for `changes`. `updatedAt` always moves forward, even
/// when the server clock reads the same millisecond as the last write.
fn update_pipeline(changes: ItemChanges) -> Vec<Document> {
    let mut set = doc! {
        "updatedAt": { "$max": ["$$NOW", { "$add": ["$updatedAt", 1] }] },
    };
    // Values are wrapped so a leading `$` is stored, not read as a field path.
    if let Some(name) = changes.name {
        set.insert("name", doc! { "$literal": name });
    }
    let mut pipeline = Vec::with_capacity(2);
    match changes.description {
        Some(Some(description)) => {
            set.insert("description", doc! { "$literal": description });
            pipeline.push(doc! { "$set": set });
        }
        Some(None) => {
            pipeline.push(doc! { "$set": set });
            pipeline.push(doc! { "$unset": ["description"] });
        }
        None => pipeline.push(doc! { "$set": set }),
    }
    pipeline
}

fn item_from_document(document: &Document) -> Result<Item, StoreError> {
    let decode = |err| StoreError::operation("decode", err);
    Ok(Item {
        id: ItemId::new(document.get_object_id("_id").map_err(decode)?.to_hex()),
        name: document.get_str("name").map_err(decode)?.to_string(),
        description: document.get_str("description").ok().map(str::to_string),
        created_at: to_chrono(document.get_datetime("createdAt").map_err(decode)?)?,
        updated_at: to_chrono(document.get_datetime("updatedAt").map_err(decode)?)?,
    })
}

#[async_trait]
impl ItemStore for MongoStore {
    async fn insert(&self, item: NewItem) -> Result<Item, StoreError> {
        let now = BsonDateTime::now();
        let mut document = doc! {
            "name": item.name,
            "createdAt": now,
            "updatedAt": now,
        };
        if let Some(description) = item.description {
            document.insert("description", description);
        }

        let inserted = self
            .items
            .insert_one(&document)
            .await
            .map_err(|err| StoreError::operation("insert", err))?;
        document.insert("_id", inserted.inserted_id);
        item_from_document(&document)
    }

    async fn find_all(&self) -> Result<Vec<Item>, StoreError> {
        let documents: Vec<Document> = self
            .items
            .find(doc! {})
            .sort(doc! { "createdAt": -1 })
            .await
            .map_err(|err| StoreError::operation("find_all", err))?
            .try_collect()
            .await
            .map_err(|err| StoreError::operation("find_all", err))?;
        documents.iter().map(item_from_document).collect()
    }

    async fn find_by_id(&self, id: &ItemId) -> Result<Option<Item>, StoreError> {
        let Some(oid) = object_id(id) else {
            return Ok(None);
        };
        self.items
            .find_one(doc! { "_id": oid })
            .await
            .map_err(|err| StoreError::operation("find_by_id", err))?
            .as_ref()
            .map(item_from_document)
            .transpose()
    }

    async fn update_by_id(
        &self,
        id: &ItemId,
        changes: ItemChanges,
    ) -> Result<Option<Item>, StoreError> {
        let Some(oid) = object_id(id) else {
            return Ok(None);
        };

        self.items
            .find_one_and_update(doc! { "_id": oid }, update_pipeline(changes))
            .return_document(ReturnDocument::After)
            .await
            .map_err(|err| StoreError::operation("update_by_id", err))?
            .as_ref()
            .map(item_from_document)
            .transpose()
    }

    async fn delete_by_id(&self, id: &ItemId) -> Result<Option<Item>, StoreError> {
        let Some(oid) = object_id(id) else {
            return Ok(None);
        };
        self.items
            .find_one_and_delete(doc! { "_id": oid })
            .await
            .map_err(|err| StoreError::operation("delete_by_id", err))?
            .as_ref()
            .map(item_from_document)
            .transpose()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::Bson;

    use super::*;

    fn set_stage(pipeline: &[Document]) -> &Document {
        pipeline[0].get_document("$set").expect("first stage sets fields")
    }

    #[test]
    fn untouched_fields_only_bump_updated_at() {
        let pipeline = update_pipeline(ItemChanges::default());
        assert_eq!(pipeline.len(), 1);
        let set = set_stage(&pipeline);
        assert_eq!(set.keys().collect::<Vec<_>>(), ["updatedAt"]);
        assert_eq!(
            set.get_document("updatedAt").expect("updatedAt"),
            &doc! { "$max": ["$$NOW", { "$add": ["$updatedAt", 1] }] }
        );
    }

    #[test]
    fn name_and_description_are_set_literally() {
        let pipeline = update_pipeline(ItemChanges {
            name: Some("$lamp".into()),
            description: Some(Some("desk".into())),
        });
        assert_eq!(pipeline.len(), 1);
        let set = set_stage(&pipeline);
        assert_eq!(set.get_document("name").expect("name"), &doc! { "$literal": "$lamp" });
        assert_eq!(
            set.get_document("description").expect("description"),
            &doc! { "$literal": "desk" }
        );
    }

    #[test]
    fn cleared_description_is_unset() {
        let pipeline = update_pipeline(ItemChanges {
            name: None,
            description: Some(None),
        });
        assert_eq!(pipeline.len(), 2);
        assert!(!set_stage(&pipeline).contains_key("description"));
        assert_eq!(pipeline[1], doc! { "$unset": ["description"] });
    }

    #[test]
    fn decodes_stored_documents() {
        let oid = ObjectId::new();
        let created = BsonDateTime::from_millis(1_700_000_000_000);
        let updated = BsonDateTime::from_millis(1_700_000_000_001);
        let document = doc! {
            "_id": oid,
            "name": "Lamp",
            "description": "desk lamp",
            "createdAt": created,
            "updatedAt": updated,
        };

        let item = item_from_document(&document).expect("decodes");
        assert_eq!(item.id.as_str(), oid.to_hex());
        assert_eq!(item.name, "Lamp");
        assert_eq!(item.description.as_deref(), Some("desk lamp"));
        assert_eq!(item.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(item.updated_at.timestamp_millis(), 1_700_000_000_001);
        assert_eq!(object_id(&item.id), Some(oid));
    }

    #[test]
    fn missing_description_decodes_as_none() {
        let now = BsonDateTime::now();
        let document = doc! {
            "_id": ObjectId::new(),
            "name": "Lamp",
            "createdAt": now,
            "updatedAt": now,
        };
        assert_eq!(item_from_document(&document).expect("decodes").description, None);
    }

    #[test]
    fn rejects_documents_without_a_name() {
        let now = BsonDateTime::now();
        let document = doc! {
            "_id": ObjectId::new(),
            "name": Bson::Null,
            "createdAt": now,
            "updatedAt": now,
        };
        assert!(item_from_document(&document).is_err());
    }

    #[test]
    fn malformed_ids_never_reach_the_server() {
        assert_eq!(object_id(&ItemId::new("not-an-object-id".to_string())), None);
    }
}
