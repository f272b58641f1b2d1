//! Reference expansion.
//!
//! A [`PopulateSpec`] names paths holding ids of documents owned by another
//! model. [`expand`] replaces those ids with the referenced documents,
//! recursing into the referenced model's own references for nested specs.

use futures::future::{BoxFuture, FutureExt};
use mongodb::bson::{Bson, Document as BsonDocument};
use serde::Deserialize;

use crate::{RepositoryError, Schema};

/// Which reference paths to expand.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Bson")]
pub enum PopulateSpec {
    /// Expand a single path.
    Field(String),
    /// Expand `path`, then expand `populate` inside the referenced documents.
    Nested {
        path: String,
        populate: Option<Box<PopulateSpec>>,
    },
    /// Expand each entry in order.
    Sequence(Vec<PopulateSpec>),
}

impl PopulateSpec {
    pub fn field(path: impl Into<String>) -> Self {
        PopulateSpec::Field(path.into())
    }

    pub fn nested(path: impl Into<String>, populate: Option<PopulateSpec>) -> Self {
        PopulateSpec::Nested {
            path: path.into(),
            populate: populate.map(Box::new),
        }
    }

    /// Top-level paths touched by this spec, in order.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            PopulateSpec::Field(path) | PopulateSpec::Nested { path, .. } => vec![path.as_str()],
            PopulateSpec::Sequence(specs) => specs.iter().flat_map(PopulateSpec::paths).collect(),
        }
    }

    fn from_entry(value: Bson) -> Result<Self, RepositoryError> {
        match value {
            Bson::Array(_) => Err(RepositoryError::InvalidPopulate(
                "nested populate sequences are not supported".into(),
            )),
            other => other.try_into(),
        }
    }
}

impl From<&str> for PopulateSpec {
    fn from(path: &str) -> Self {
        PopulateSpec::field(path)
    }
}

impl TryFrom<Bson> for PopulateSpec {
    type Error = RepositoryError;

    /// Accepts a path (space separated paths expand in order), a
    /// `{ path, populate? }` document, or an array of either.
    fn try_from(value: Bson) -> Result<Self, Self::Error> {
        match value {
            Bson::String(paths) => {
                let mut fields: Vec<PopulateSpec> =
                    paths.split_whitespace().map(PopulateSpec::field).collect();
                match fields.len() {
                    0 => Err(RepositoryError::InvalidPopulate("empty path".into())),
                    1 => Ok(fields.remove(0)),
                    _ => Ok(PopulateSpec::Sequence(fields)),
                }
            }
            Bson::Document(descriptor) => descriptor.try_into(),
            Bson::Array(entries) => entries
                .into_iter()
                .map(PopulateSpec::from_entry)
                .collect::<Result<Vec<_>, _>>()
                .map(PopulateSpec::Sequence),
            other => Err(RepositoryError::InvalidPopulate(format!(
                "unsupported value {other}"
            ))),
        }
    }
}

impl TryFrom<BsonDocument> for PopulateSpec {
    type Error = RepositoryError;

    fn try_from(mut descriptor: BsonDocument) -> Result<Self, Self::Error> {
        let path = match descriptor.remove("path") {
            Some(Bson::String(path)) if !path.trim().is_empty() => path,
            _ => {
                return Err(RepositoryError::InvalidPopulate(
                    "descriptor requires a string `path`".into(),
                ))
            }
        };

        match descriptor.remove("populate") {
            None | Some(Bson::Null) => Ok(PopulateSpec::Field(path)),
            Some(inner) => Ok(PopulateSpec::nested(path, Some(inner.try_into()?))),
        }
    }
}

/// Expands `spec` over `rows` using the references declared by `schema`.
pub fn expand<'a>(
    schema: &'a Schema,
    rows: &'a mut [BsonDocument],
    spec: &'a PopulateSpec,
) -> BoxFuture<'a, Result<(), RepositoryError>> {
    async move {
        match spec {
            PopulateSpec::Field(path) => expand_path(schema, rows, path, None).await,
            PopulateSpec::Nested { path, populate } => {
                expand_path(schema, rows, path, populate.as_deref()).await
            }
            PopulateSpec::Sequence(specs) => {
                for spec in specs {
                    expand(schema, rows, spec).await?;
                }
                Ok(())
            }
        }
    }
    .boxed()
}

async fn expand_path(
    schema: &Schema,
    rows: &mut [BsonDocument],
    path: &str,
    inner: Option<&PopulateSpec>,
) -> Result<(), RepositoryError> {
    let target = schema
        .reference_for(path)
        .cloned()
        .ok_or_else(|| RepositoryError::UnknownReference(path.to_owned()))?;

    let mut ids: Vec<Bson> = Vec::new();
    for row in rows.iter() {
        let referenced: &[Bson] = match row.get(path) {
            Some(Bson::Array(values)) => values.as_slice(),
            Some(value) => std::slice::from_ref(value),
            None => &[],
        };
        for id in referenced {
            if !matches!(id, Bson::Null | Bson::Document(_)) && !ids.contains(id) {
                ids.push(id.clone());
            }
        }
    }

    if ids.is_empty() {
        return Ok(());
    }

    let mut found = target.find_by_ids(&ids).await?;
    if let Some(inner) = inner {
        expand(target.schema(), &mut found, inner).await?;
    }

    let lookup = |id: &Bson| -> Option<Bson> {
        found
            .iter()
            .find(|doc| doc.get("_id") == Some(id))
            .cloned()
            .map(Bson::Document)
    };

    for row in rows.iter_mut() {
        let replacement = match row.get(path) {
            Some(Bson::Array(values)) => Bson::Array(
                values
                    .iter()
                    .filter_map(|value| match value {
                        Bson::Document(_) => Some(value.clone()),
                        id => lookup(id),
                    })
                    .collect(),
            ),
            Some(Bson::Null) | Some(Bson::Document(_)) | None => continue,
            Some(id) => lookup(id).unwrap_or(Bson::Null),
        };
        row.insert(path, replacement);
    }

    Ok(())
}
