use async_trait::async_trait;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, Document as BsonDocument},
    options::{FindOneOptions, FindOptions},
    Collection, Database,
};
use tracing::debug;

use crate::{
    populate, query::id_filter, DeleteOutcome, Model, Projection, Query, RepositoryError, Schema,
    Sort,
};

/// Model backed by a MongoDB collection named after its schema.
pub struct MongoModel {
    collection: Collection<BsonDocument>,
    schema: Schema,
}

impl MongoModel {
    pub fn from_db(db: &Database, schema: Schema) -> Self {
        Self {
            collection: db.collection(schema.collection()),
            schema,
        }
    }
}

#[async_trait]
impl Model for MongoModel {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn count(&self, query: &Query) -> Result<u64, RepositoryError> {
        Ok(self.collection.count_documents(query.filter().clone()).await?)
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<BsonDocument>, RepositoryError> {
        let projection = query.selection().map(Projection::to_document);
        let sort = query.ordering().map(Sort::to_document);
        let mut rows = Vec::new();

        debug!(collection = self.schema.collection(), filter = %query.filter(), "fetching documents");

        if query.is_multiple() {
            let options = FindOptions::builder()
                .projection(projection)
                .limit(query.max_results())
                .skip(query.offset())
                .sort(sort)
                .build();

            let mut cursor = self
                .collection
                .find(query.filter().clone())
                .with_options(options)
                .await?;
            while cursor.advance().await? {
                rows.push(cursor.deserialize_current()?);
            }
        } else {
            let options = FindOneOptions::builder()
                .projection(projection)
                .skip(query.offset())
                .sort(sort)
                .build();

            if let Some(row) = self
                .collection
                .find_one(query.filter().clone())
                .with_options(options)
                .await?
            {
                rows.push(row);
            }
        }

        for spec in query.expansions() {
            populate::expand(&self.schema, &mut rows, spec).await?;
        }

        Ok(rows)
    }

    async fn insert(&self, fields: &mut BsonDocument) -> Result<(), RepositoryError> {
        self.schema.validate(fields, true)?;

        // Assigned client side so the caller sees the id without a round trip.
        if !fields.contains_key("_id") {
            fields.insert("_id", ObjectId::new());
        }

        self.collection.insert_one(&*fields).await?;
        Ok(())
    }

    async fn update_fields(&self, id: &Bson, fields: &BsonDocument) -> Result<(), RepositoryError> {
        self.schema.validate(fields, false)?;

        let mut changes = fields.clone();
        changes.remove("_id");

        // `$set` rejects an empty document
        let matched = if changes.is_empty() {
            self.collection.count_documents(id_filter(id)).await?
        } else {
            self.collection
                .update_one(id_filter(id), doc! { "$set": changes })
                .await?
                .matched_count
        };

        if matched > 0 {
            Ok(())
        } else {
            Err(RepositoryError::TargetNotFound)
        }
    }

    async fn remove_many(&self, filter: BsonDocument) -> Result<DeleteOutcome, RepositoryError> {
        let result = self.collection.delete_many(filter).await?;

        Ok(DeleteOutcome {
            deleted_count: result.deleted_count,
        })
    }
}
