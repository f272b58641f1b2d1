use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use futures::future::{BoxFuture, FutureExt};
use mongodb::bson::{Bson, Document as BsonDocument};

use crate::{Model, RepositoryError};

/// Future returned by a static helper.
pub type StaticFuture = BoxFuture<'static, Result<Bson, RepositoryError>>;

/// A named helper declared alongside a schema.
///
/// Helpers receive the model they are bound to and a single argument value.
pub type StaticFn = Arc<dyn Fn(Arc<dyn Model>, Bson) -> StaticFuture + Send + Sync>;

/// Wraps an async closure into a [`StaticFn`].
pub fn static_helper<F, Fut>(f: F) -> StaticFn
where
    F: Fn(Arc<dyn Model>, Bson) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bson, RepositoryError>> + Send + 'static,
{
    Arc::new(move |model, args| f(model, args).boxed())
}

/// Describes one collection: its name, the paths that must be present,
/// the paths referencing other models and the declared static helpers.
#[derive(Clone)]
pub struct Schema {
    collection: String,
    required: Vec<String>,
    references: Vec<(String, Arc<dyn Model>)>,
    statics: BTreeMap<String, StaticFn>,
}

impl Schema {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            required: Vec::new(),
            references: Vec::new(),
            statics: BTreeMap::new(),
        }
    }

    /// Marks a top-level path as required.
    pub fn required(mut self, path: impl Into<String>) -> Self {
        self.required.push(path.into());
        self
    }

    /// Declares `path` as holding ids of documents stored by `model`.
    pub fn reference(mut self, path: impl Into<String>, model: Arc<dyn Model>) -> Self {
        let path = path.into();
        self.references.retain(|(existing, _)| *existing != path);
        self.references.push((path, model));
        self
    }

    /// Declares a static helper under `name`.
    pub fn static_fn<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<dyn Model>, Bson) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bson, RepositoryError>> + Send + 'static,
    {
        self.statics.insert(name.into(), static_helper(f));
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn statics(&self) -> &BTreeMap<String, StaticFn> {
        &self.statics
    }

    pub fn reference_for(&self, path: &str) -> Option<&Arc<dyn Model>> {
        self.references
            .iter()
            .find(|(candidate, _)| candidate == path)
            .map(|(_, model)| model)
    }

    /// Checks required paths.
    ///
    /// New documents must carry every required path with a non-null value.
    /// Partial updates only fail when they set a required path to null.
    pub fn validate(&self, fields: &BsonDocument, is_new: bool) -> Result<(), RepositoryError> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|path| match fields.get(path.as_str()) {
                None => is_new,
                Some(Bson::Null) | Some(Bson::Undefined) => true,
                Some(Bson::String(value)) => value.is_empty(),
                Some(_) => false,
            })
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        let reasons = missing
            .iter()
            .map(|path| format!("{path}: Path `{path}` is required."))
            .collect::<Vec<_>>()
            .join(", ");

        Err(RepositoryError::Validation(format!(
            "{} validation failed: {reasons}",
            self.collection
        )))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("collection", &self.collection)
            .field("required", &self.required)
            .field(
                "references",
                &self
                    .references
                    .iter()
                    .map(|(path, model)| (path.as_str(), model.collection_name()))
                    .collect::<Vec<_>>(),
            )
            .field("statics", &self.statics.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockModel;
    use mongodb::bson::doc;

    #[test]
    fn test_validate_reports_every_missing_path() {
        let schema = Schema::new("users").required("name").required("email");

        let err = schema.validate(&doc! {}, true).unwrap_err();

        assert_eq!(
            err,
            RepositoryError::Validation(
                "users validation failed: name: Path `name` is required., \
                 email: Path `email` is required."
                    .to_string()
            )
        );
    }

    #[test]
    fn test_validate_partial_update() {
        let schema = Schema::new("users").required("name");

        assert!(schema.validate(&doc! { "age": 3 }, false).is_ok());
        assert!(schema.validate(&doc! { "name": "a" }, false).is_ok());
        assert!(schema.validate(&doc! { "name": Bson::Null }, false).is_err());
        assert!(schema.validate(&doc! { "name": "" }, true).is_err());
    }

    #[tokio::test]
    async fn test_static_helpers_are_invocable() {
        let schema = Schema::new("users").static_fn("echo", |_model, args| async move { Ok(args) });
        let model: Arc<dyn Model> = Arc::new(MockModel::new(schema.clone()));

        let helper = schema.statics().get("echo").unwrap();
        let out = helper(model, Bson::String("hi".into())).await.unwrap();

        assert_eq!(out, Bson::String("hi".into()));
    }

    #[test]
    fn test_reference_redeclaration_replaces_target() {
        let users: Arc<dyn Model> = Arc::new(MockModel::new(Schema::new("users")));
        let admins: Arc<dyn Model> = Arc::new(MockModel::new(Schema::new("admins")));

        let schema = Schema::new("posts")
            .reference("author", users)
            .reference("author", admins);

        assert_eq!(schema.reference_for("author").unwrap().collection_name(), "admins");
        assert!(schema.reference_for("title").is_none());
    }
}
