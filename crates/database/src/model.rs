use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document as BsonDocument};
use serde::{Deserialize, Serialize};

use crate::{Query, RepositoryError, Schema};

/// Outcome of a bulk delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

/// Handle on one collection of documents.
///
/// Implementations own persistence; everything above this trait only builds
/// [`Query`] values and hands them over.
#[async_trait]
pub trait Model: Send + Sync {
    fn schema(&self) -> &Schema;

    fn collection_name(&self) -> &str {
        self.schema().collection()
    }

    fn find_many(&self, filter: BsonDocument) -> Query {
        Query::many(filter)
    }

    fn find_one(&self, filter: BsonDocument) -> Query {
        Query::one(filter)
    }

    /// Number of documents matching the query filter.
    async fn count(&self, query: &Query) -> Result<u64, RepositoryError>;

    /// Resolves the query to plain rows, with its expansions applied.
    async fn fetch(&self, query: &Query) -> Result<Vec<BsonDocument>, RepositoryError>;

    async fn find_by_ids(&self, ids: &[Bson]) -> Result<Vec<BsonDocument>, RepositoryError> {
        self.fetch(&Query::many(doc! { "_id": { "$in": ids.to_vec() } }))
            .await
    }

    /// Persists a new document, assigning an `_id` when it has none.
    async fn insert(&self, fields: &mut BsonDocument) -> Result<(), RepositoryError>;

    /// Sets `fields` on the document identified by `id`.
    async fn update_fields(&self, id: &Bson, fields: &BsonDocument) -> Result<(), RepositoryError>;

    async fn remove_many(&self, filter: BsonDocument) -> Result<DeleteOutcome, RepositoryError>;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod tests {
    use super::*;
    use crate::populate;
    use mongodb::bson::oid::ObjectId;
    use tokio::sync::RwLock;

    /// In-memory model keeping rows in insertion order.
    ///
    /// Filters support top-level equality (matching array members too) and `$in`.
    #[derive(Debug)]
    pub struct MockModel {
        schema: Schema,
        rows: RwLock<Vec<BsonDocument>>,
        failure: RwLock<Option<String>>,
    }

    impl MockModel {
        pub fn new(schema: Schema) -> Self {
            Self::with_rows(schema, vec![])
        }

        pub fn with_rows(schema: Schema, rows: Vec<BsonDocument>) -> Self {
            Self {
                schema,
                rows: RwLock::new(rows),
                failure: RwLock::new(None),
            }
        }

        /// Makes every following operation fail with `message`.
        pub async fn fail_with(&self, message: impl Into<String>) {
            *self.failure.write().await = Some(message.into());
        }

        pub async fn rows(&self) -> Vec<BsonDocument> {
            self.rows.read().await.clone()
        }

        async fn check_failure(&self) -> Result<(), RepositoryError> {
            match self.failure.read().await.as_ref() {
                Some(message) => Err(RepositoryError::Generic(message.clone())),
                None => Ok(()),
            }
        }
    }

    fn matches_value(actual: Option<&Bson>, expected: &Bson) -> bool {
        if let Bson::Document(operators) = expected {
            if let Some(Bson::Array(candidates)) = operators.get("$in") {
                return candidates.iter().any(|c| matches_value(actual, c));
            }
        }

        match actual {
            Some(Bson::Array(values)) => {
                values.iter().any(|v| v == expected) || actual == Some(expected)
            }
            Some(value) => value == expected,
            None => matches!(expected, Bson::Null),
        }
    }

    pub(crate) fn matches(filter: &BsonDocument, row: &BsonDocument) -> bool {
        filter
            .iter()
            .all(|(key, expected)| matches_value(row.get(key), expected))
    }

    #[async_trait]
    impl Model for MockModel {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        async fn count(&self, query: &Query) -> Result<u64, RepositoryError> {
            self.check_failure().await?;
            let rows = self.rows.read().await;
            Ok(rows.iter().filter(|row| matches(query.filter(), row)).count() as u64)
        }

        async fn fetch(&self, query: &Query) -> Result<Vec<BsonDocument>, RepositoryError> {
            self.check_failure().await?;

            let mut matched: Vec<BsonDocument> = {
                let rows = self.rows.read().await;
                rows.iter()
                    .filter(|row| matches(query.filter(), row))
                    .cloned()
                    .collect()
            };

            if let Some(sort) = query.ordering() {
                matched.sort_by(|a, b| sort.compare(a, b));
            }

            let skip = query.offset().unwrap_or(0) as usize;
            let take = match (query.is_multiple(), query.max_results()) {
                (false, _) => 1,
                (true, Some(limit)) if limit != 0 => limit.unsigned_abs() as usize,
                (true, _) => usize::MAX,
            };

            let mut rows: Vec<BsonDocument> = matched
                .into_iter()
                .skip(skip)
                .take(take)
                .map(|row| match query.selection() {
                    Some(projection) => projection.apply(&row),
                    None => row,
                })
                .collect();

            for spec in query.expansions() {
                populate::expand(&self.schema, &mut rows, spec).await?;
            }

            Ok(rows)
        }

        async fn insert(&self, fields: &mut BsonDocument) -> Result<(), RepositoryError> {
            self.check_failure().await?;
            self.schema.validate(fields, true)?;

            if !fields.contains_key("_id") {
                fields.insert("_id", ObjectId::new());
            }

            let mut rows = self.rows.write().await;
            if rows.iter().any(|row| row.get("_id") == fields.get("_id")) {
                return Err(RepositoryError::Generic(format!(
                    "E11000 duplicate key error collection: {}",
                    self.schema.collection()
                )));
            }
            rows.push(fields.clone());
            Ok(())
        }

        async fn update_fields(
            &self,
            id: &Bson,
            fields: &BsonDocument,
        ) -> Result<(), RepositoryError> {
            self.check_failure().await?;
            self.schema.validate(fields, false)?;

            let mut rows = self.rows.write().await;
            let row = rows
                .iter_mut()
                .find(|row| row.get("_id") == Some(id))
                .ok_or(RepositoryError::TargetNotFound)?;

            for (key, value) in fields {
                if key != "_id" {
                    row.insert(key.clone(), value.clone());
                }
            }
            Ok(())
        }

        async fn remove_many(&self, filter: BsonDocument) -> Result<DeleteOutcome, RepositoryError> {
            self.check_failure().await?;

            let mut rows = self.rows.write().await;
            let before = rows.len();
            rows.retain(|row| !matches(&filter, row));

            Ok(DeleteOutcome {
                deleted_count: (before - rows.len()) as u64,
            })
        }
    }

    #[test]
    fn test_filter_matching() {
        let row = doc! { "name": "ada", "tags": ["a", "b"] };

        assert!(matches(&doc! {}, &row));
        assert!(matches(&doc! { "name": "ada" }, &row));
        assert!(matches(&doc! { "tags": "b" }, &row));
        assert!(matches(&doc! { "name": { "$in": ["bob", "ada"] } }, &row));
        assert!(matches(&doc! { "missing": Bson::Null }, &row));
        assert!(!matches(&doc! { "name": "bob" }, &row));
        assert!(!matches(&doc! { "name": { "$in": [] } }, &row));
    }

    #[tokio::test]
    async fn test_fetch_sorts_then_pages() {
        let model = MockModel::with_rows(
            Schema::new("numbers"),
            (1..=5).map(|n| doc! { "n": n }).collect(),
        );

        let mut query = Query::many(doc! {});
        query.sort(crate::Sort::new().desc("n")).skip(1).limit(2);
        let rows = model.fetch(&query).await.unwrap();

        assert_eq!(rows, vec![doc! { "n": 4 }, doc! { "n": 3 }]);
    }

    #[tokio::test]
    async fn test_find_one_returns_first_match() {
        let model = MockModel::with_rows(
            Schema::new("numbers"),
            vec![doc! { "n": 1, "odd": true }, doc! { "n": 3, "odd": true }],
        );

        let rows = model.fetch(&Query::one(doc! { "odd": true })).await.unwrap();

        assert_eq!(rows, vec![doc! { "n": 1, "odd": true }]);
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_rejects_duplicates() {
        let model = MockModel::new(Schema::new("users"));
        let mut fields = doc! { "name": "ada" };

        model.insert(&mut fields).await.unwrap();
        assert!(matches!(fields.get("_id"), Some(Bson::ObjectId(_))));

        let err = model.insert(&mut fields.clone()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Generic(_)));
        assert_eq!(model.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let model = MockModel::new(Schema::new("users"));

        let err = model
            .update_fields(&Bson::ObjectId(ObjectId::new()), &doc! { "name": "x" })
            .await
            .unwrap_err();

        assert_eq!(err, RepositoryError::TargetNotFound);
    }

    #[tokio::test]
    async fn test_injected_failure_is_reported() {
        let model = MockModel::new(Schema::new("users"));
        model.fail_with("connection reset").await;

        let err = model.count(&Query::many(doc! {})).await.unwrap_err();

        assert_eq!(err, RepositoryError::Generic("connection reset".into()));
    }

}
