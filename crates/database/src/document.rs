use std::{collections::BTreeSet, fmt, sync::Arc};

use mongodb::bson::{Bson, Document as BsonDocument};
use serde::{Serialize, Serializer};

use crate::{Model, RepositoryError};

/// A document bound to the model that persists it.
#[derive(Clone)]
pub struct ModelDocument {
    model: Arc<dyn Model>,
    fields: BsonDocument,
    is_new: bool,
    populated: Vec<String>,
    modified: BTreeSet<String>,
}

impl ModelDocument {
    /// Creates a document that has not been persisted yet.
    pub fn new(model: Arc<dyn Model>, fields: BsonDocument) -> Self {
        Self {
            model,
            fields,
            is_new: true,
            populated: Vec::new(),
            modified: BTreeSet::new(),
        }
    }

    /// Wraps a row read from the store. `populated` lists the paths whose ids
    /// were replaced by referenced documents.
    pub fn from_stored(model: Arc<dyn Model>, fields: BsonDocument, populated: Vec<String>) -> Self {
        Self {
            model,
            fields,
            is_new: false,
            populated,
            modified: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> Option<&Bson> {
        self.fields.get("_id")
    }

    pub fn get(&self, path: &str) -> Option<&Bson> {
        self.fields.get(path)
    }

    pub fn set(&mut self, path: impl Into<String>, value: impl Into<Bson>) {
        let path = path.into();
        self.fields.insert(path.clone(), value.into());
        self.modified.insert(path);
    }

    /// Shallow merge: every key of `values` overrides the current value,
    /// other fields are kept. `_id` is never overwritten.
    pub fn assign(&mut self, values: BsonDocument) {
        for (path, value) in values {
            if path != "_id" {
                self.set(path, value);
            }
        }
    }

    pub fn fields(&self) -> &BsonDocument {
        &self.fields
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn collection(&self) -> &str {
        self.model.collection_name()
    }

    pub fn into_lean(self) -> BsonDocument {
        self.fields
    }

    /// Persists the document.
    ///
    /// New documents are inserted whole. Stored ones only have their modified
    /// paths set, so fields changed elsewhere in the meantime are kept.
    /// Expanded references written back are reduced to their ids.
    pub async fn save(&mut self) -> Result<(), RepositoryError> {
        let model = Arc::clone(&self.model);

        if self.is_new {
            let mut fields = self.fields.clone();
            model.insert(&mut fields).await?;
            if let Some(id) = fields.get("_id") {
                self.fields.insert("_id", id.clone());
            }
            self.is_new = false;
        } else {
            let id = self.id().cloned().ok_or(RepositoryError::MissingIdentifier)?;
            model.update_fields(&id, &self.changes()).await?;
        }

        self.modified.clear();
        Ok(())
    }

    fn changes(&self) -> BsonDocument {
        let mut changes = BsonDocument::new();
        for path in self.modified.iter().filter(|path| *path != "_id") {
            let Some(value) = self.fields.get(path) else {
                continue;
            };
            let value = if self.populated.contains(path) {
                reference_ids(value)
            } else {
                value.clone()
            };
            changes.insert(path.as_str(), value);
        }
        changes
    }
}

fn reference_ids(value: &Bson) -> Bson {
    match value {
        Bson::Document(doc) => doc.get("_id").cloned().unwrap_or(Bson::Null),
        Bson::Array(values) => Bson::Array(values.iter().map(reference_ids).collect()),
        other => other.clone(),
    }
}

impl fmt::Debug for ModelDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDocument")
            .field("collection", &self.collection())
            .field("fields", &self.fields)
            .field("is_new", &self.is_new)
            .finish()
    }
}

impl Serialize for ModelDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockModel, Model, PopulateSpec, Query, Schema};
    use mongodb::bson::{doc, oid::ObjectId};

    #[tokio::test]
    async fn test_save_inserts_then_updates() {
        let model = Arc::new(MockModel::new(Schema::new("users").required("name")));
        let mut document = ModelDocument::new(model.clone(), doc! { "name": "ada", "age": 36 });

        document.save().await.unwrap();
        assert!(!document.is_new());
        let id = document.id().cloned().unwrap();

        document.assign(doc! { "age": 37, "_id": ObjectId::new() });
        document.save().await.unwrap();

        assert_eq!(document.id(), Some(&id));
        assert_eq!(
            model.rows().await,
            vec![doc! { "name": "ada", "age": 37, "_id": id }]
        );
    }

    #[tokio::test]
    async fn test_failed_validation_keeps_document_new() {
        let model = Arc::new(MockModel::new(Schema::new("users").required("name")));
        let mut document = ModelDocument::new(model.clone(), doc! {});

        let err = document.save().await.unwrap_err();

        assert!(matches!(err, RepositoryError::Validation(_)));
        assert!(document.is_new());
        assert!(model.rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_writes_expanded_references_as_ids() {
        let author = ObjectId::new();
        let reader = ObjectId::new();
        let id = ObjectId::new();
        let model = Arc::new(MockModel::with_rows(
            Schema::new("posts"),
            vec![doc! { "_id": id, "author": author, "readers": [reader] }],
        ));

        let mut document = ModelDocument::from_stored(
            model.clone(),
            doc! {
                "_id": id,
                "author": { "_id": author, "name": "ada" },
                "readers": [{ "_id": reader, "name": "bob" }],
            },
            vec!["author".into(), "readers".into()],
        );
        document.set("title", "hello");
        document.save().await.unwrap();

        assert_eq!(
            model.rows().await,
            vec![doc! { "_id": id, "author": author, "readers": [reader], "title": "hello" }]
        );
    }

    #[tokio::test]
    async fn test_save_keeps_unresolved_references() {
        let id = ObjectId::new();
        let (author, reader) = (ObjectId::new(), ObjectId::new());
        let users: Arc<dyn Model> = Arc::new(MockModel::new(Schema::new("users")));
        let model = Arc::new(MockModel::with_rows(
            Schema::new("posts")
                .reference("author", users.clone())
                .reference("readers", users),
            vec![doc! { "_id": id, "author": author, "readers": [reader] }],
        ));

        let mut query = Query::one(doc! { "_id": id });
        query
            .populate(PopulateSpec::field("author"))
            .populate(PopulateSpec::field("readers"));
        let row = model.fetch(&query).await.unwrap().remove(0);
        assert_eq!(row.get("author"), Some(&Bson::Null));

        let mut document = ModelDocument::from_stored(model.clone(), row, query.expanded_paths());
        document.set("title", "x");
        document.save().await.unwrap();

        assert_eq!(
            model.rows().await,
            vec![doc! { "_id": id, "author": author, "readers": [reader], "title": "x" }]
        );
    }

    #[tokio::test]
    async fn test_save_writes_only_modified_paths() {
        let id = ObjectId::new();
        let row = doc! { "_id": id, "a": 1, "b": 1 };
        let model = Arc::new(MockModel::with_rows(Schema::new("items"), vec![row.clone()]));

        let mut first = ModelDocument::from_stored(model.clone(), row.clone(), vec![]);
        let mut second = ModelDocument::from_stored(model.clone(), row, vec![]);

        first.set("a", 2);
        first.save().await.unwrap();
        second.set("b", 2);
        second.save().await.unwrap();

        assert_eq!(model.rows().await, vec![doc! { "_id": id, "a": 2, "b": 2 }]);
    }

    #[tokio::test]
    async fn test_setting_an_expanded_path_stores_ids() {
        let id = ObjectId::new();
        let (old, new) = (ObjectId::new(), ObjectId::new());
        let model = Arc::new(MockModel::with_rows(
            Schema::new("posts"),
            vec![doc! { "_id": id, "author": old }],
        ));

        let mut document = ModelDocument::from_stored(
            model.clone(),
            doc! { "_id": id, "author": { "_id": old, "name": "ada" } },
            vec!["author".into()],
        );
        document.set("author", doc! { "_id": new, "name": "bob" });
        document.save().await.unwrap();

        assert_eq!(model.rows().await, vec![doc! { "_id": id, "author": new }]);
    }

    #[test]
    fn test_serializes_as_plain_fields() {
        let model = Arc::new(MockModel::new(Schema::new("users")));
        let document = ModelDocument::new(model, doc! { "name": "ada" });

        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            serde_json::json!({ "name": "ada" })
        );
    }
}
