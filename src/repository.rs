use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use database::{
    static_helper, DeleteOutcome, Model, ModelDocument, PopulateSpec, Query, RepositoryError,
    StaticFn,
};
use mongodb::bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use tracing::{debug, warn};

use crate::{FindOptions, FindResult};

/// Construction flags for [`DocumentRepository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryOptions {
    /// Bind the static helpers declared by the model's schema.
    pub apply_statics: bool,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            apply_statics: true,
        }
    }
}

/// Repository over one model.
///
/// Holds the model handle and the static helpers it dispatches to. It keeps
/// no other state, so clones are cheap and share the same model.
#[derive(Clone, Default)]
pub struct DocumentRepository {
    model: Option<Arc<dyn Model>>,
    statics: BTreeMap<String, StaticFn>,
}

impl DocumentRepository {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self::with_options(model, RepositoryOptions::default())
    }

    pub fn with_options(model: Arc<dyn Model>, options: RepositoryOptions) -> Self {
        let statics = if options.apply_statics {
            model.schema().statics().clone()
        } else {
            BTreeMap::new()
        };

        Self {
            model: Some(model),
            statics,
        }
    }

    /// A repository without a model. Operations that need the store fail
    /// with [`RepositoryError::Unbound`].
    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn model(&self) -> Result<&Arc<dyn Model>, RepositoryError> {
        self.model.as_ref().ok_or(RepositoryError::Unbound)
    }

    /// Registers an extension helper in addition to the schema's statics.
    pub fn with_static<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<dyn Model>, Bson) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bson, RepositoryError>> + Send + 'static,
    {
        self.statics.insert(name.into(), static_helper(f));
        self
    }

    pub fn has_static(&self, name: &str) -> bool {
        self.statics.contains_key(name)
    }

    pub fn static_names(&self) -> impl Iterator<Item = &str> {
        self.statics.keys().map(String::as_str)
    }

    /// Invokes the helper registered under `name` with the bound model.
    pub async fn call_static(&self, name: &str, args: Bson) -> Result<Bson, RepositoryError> {
        let helper = self
            .statics
            .get(name)
            .ok_or_else(|| RepositoryError::UnknownStatic(name.to_owned()))?;
        let model = Arc::clone(self.model()?);

        helper(model, args).await
    }

    /// Creates a new document from `input` and saves it.
    pub async fn create(&self, input: BsonDocument) -> Result<ModelDocument, RepositoryError> {
        let model = self.model()?;
        debug!(collection = model.collection_name(), "creating document");

        let mut document = ModelDocument::new(Arc::clone(model), input);
        document
            .save()
            .await
            .inspect_err(|err| warn!(collection = model.collection_name(), "create failed: {err}"))?;

        Ok(document)
    }

    /// Searches for documents matching `filter`.
    ///
    /// Options apply in the order select, limit, skip, populate, sort. The
    /// result is a count when `count` is set, plain rows when `lean` is set,
    /// documents otherwise. Nothing matching is not an error.
    pub async fn find(
        &self,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<FindResult, RepositoryError> {
        let model = self.model()?;
        let multiple = options.is_multiple();
        let (lean, count) = (options.is_lean(), options.is_count());

        let mut query = if multiple {
            model.find_many(filter)
        } else {
            model.find_one(filter)
        };

        if let Some(select) = options.select {
            query.select(select);
        }
        if let Some(limit) = options.limit.filter(|limit| *limit != 0) {
            query.limit(limit);
        }
        if let Some(skip) = options.skip.filter(|skip| *skip != 0) {
            query.skip(skip);
        }
        if let Some(populate) = options.populate {
            populate_query(&mut query, populate)?;
        }
        if let Some(sort) = options.sort {
            query.sort(sort);
        }

        debug!(
            collection = model.collection_name(),
            filter = %query.filter(),
            multiple,
            lean,
            count,
            "finding documents"
        );

        if count {
            let matched = model
                .count(&query)
                .await
                .inspect_err(|err| warn!(collection = model.collection_name(), "count failed: {err}"))?;
            return Ok(FindResult::Count(matched));
        }

        let rows = model
            .fetch(&query)
            .await
            .inspect_err(|err| warn!(collection = model.collection_name(), "find failed: {err}"))?;

        let result = match (lean, multiple) {
            (true, true) => FindResult::LeanMany(rows),
            (true, false) => FindResult::LeanOne(rows.into_iter().next()),
            (false, multiple) => {
                let populated = query.expanded_paths();
                let mut documents = rows.into_iter().map(|row| {
                    ModelDocument::from_stored(Arc::clone(model), row, populated.clone())
                });
                if multiple {
                    FindResult::Many(documents.collect())
                } else {
                    FindResult::One(documents.next())
                }
            }
        };

        Ok(result)
    }

    /// Looks up one document by `_id`.
    ///
    /// A null, undefined or empty identifier fails with
    /// [`RepositoryError::MissingIdentifier`] before the store is touched.
    /// A missing document fails with [`RepositoryError::TargetNotFound`].
    /// Only `select`, `populate` and `lean` are taken from `options`.
    pub async fn find_by_id(
        &self,
        id: impl Into<Bson>,
        options: FindOptions,
    ) -> Result<FindResult, RepositoryError> {
        let id = identifier(id.into())?;
        let options = FindOptions {
            select: options.select,
            populate: options.populate,
            lean: options.lean,
            multiple: Some(false),
            ..Default::default()
        };

        match self.find(doc! { "_id": id }, options).await? {
            FindResult::One(None) | FindResult::LeanOne(None) => Err(RepositoryError::TargetNotFound),
            found => Ok(found),
        }
    }

    /// Every document of the collection.
    pub async fn find_all(&self) -> Result<Vec<ModelDocument>, RepositoryError> {
        Ok(self
            .find(BsonDocument::new(), FindOptions::default())
            .await?
            .into_documents())
    }

    /// Fetches the document, merges `new_values` over its fields and saves it.
    pub async fn update(
        &self,
        id: impl Into<Bson>,
        new_values: BsonDocument,
    ) -> Result<ModelDocument, RepositoryError> {
        let mut document = self
            .find_by_id(id, FindOptions::default())
            .await?
            .into_document()
            .ok_or(RepositoryError::TargetNotFound)?;

        document.assign(new_values);
        document.save().await.inspect_err(|err| {
            warn!(collection = document.collection(), "update failed: {err}")
        })?;

        Ok(document)
    }

    /// Deletes every document whose `_id` equals `id`.
    pub async fn remove(&self, id: impl Into<Bson>) -> Result<DeleteOutcome, RepositoryError> {
        let id = identifier(id.into())?;
        let model = self.model()?;
        debug!(collection = model.collection_name(), %id, "removing document");

        model.remove_many(doc! { "_id": id }).await
    }

    /// Merges `overrides` into `base` and returns it.
    pub fn merge_options(base: &mut FindOptions, overrides: FindOptions) -> &mut FindOptions {
        base.merge(overrides)
    }
}

impl fmt::Debug for DocumentRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRepository")
            .field("collection", &self.model.as_ref().map(|m| m.collection_name()))
            .field("statics", &self.statics.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Adds the expansions described by `populate` to `query`: one call for a
/// path or descriptor, one per entry for a sequence.
pub fn populate_query(query: &mut Query, populate: PopulateSpec) -> Result<(), RepositoryError> {
    match populate {
        PopulateSpec::Sequence(specs) => {
            for spec in specs {
                if let PopulateSpec::Sequence(_) = spec {
                    return Err(RepositoryError::InvalidPopulate(
                        "nested populate sequences are not supported".into(),
                    ));
                }
                query.populate(spec);
            }
        }
        spec => {
            query.populate(spec);
        }
    }
    Ok(())
}

/// Rejects falsy identifiers and casts 24 character hex strings to `ObjectId`.
///
/// The cast ignores the collection's `_id` type: a collection keyed by plain
/// strings cannot be looked up by a string that happens to be valid hex.
fn identifier(id: Bson) -> Result<Bson, RepositoryError> {
    match id {
        Bson::Null | Bson::Undefined => Err(RepositoryError::MissingIdentifier),
        Bson::String(s) if s.is_empty() => Err(RepositoryError::MissingIdentifier),
        Bson::String(s) => Ok(ObjectId::parse_str(&s)
            .map(Bson::ObjectId)
            .unwrap_or(Bson::String(s))),
        other => Ok(other),
    }
}
