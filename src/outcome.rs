use database::{ModelDocument, RepositoryError};
use mongodb::bson::Document as BsonDocument;
use serde::{Deserialize, Serialize};

/// What a find resolved to. Which variant comes back is decided by the
/// `count`, `lean` and `multiple` options, in that priority.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FindResult {
    Count(u64),
    One(Option<ModelDocument>),
    Many(Vec<ModelDocument>),
    LeanOne(Option<BsonDocument>),
    LeanMany(Vec<BsonDocument>),
}

impl FindResult {
    pub fn count(&self) -> Option<u64> {
        match self {
            FindResult::Count(count) => Some(*count),
            _ => None,
        }
    }

    pub fn into_document(self) -> Option<ModelDocument> {
        match self {
            FindResult::One(document) => document,
            FindResult::Many(documents) => documents.into_iter().next(),
            _ => None,
        }
    }

    pub fn into_documents(self) -> Vec<ModelDocument> {
        match self {
            FindResult::One(document) => document.into_iter().collect(),
            FindResult::Many(documents) => documents,
            _ => Vec::new(),
        }
    }

    /// Plain rows, whether the find was lean or not.
    pub fn into_lean(self) -> Vec<BsonDocument> {
        match self {
            FindResult::LeanOne(row) => row.into_iter().collect(),
            FindResult::LeanMany(rows) => rows,
            FindResult::One(document) => document.into_iter().map(ModelDocument::into_lean).collect(),
            FindResult::Many(documents) => {
                documents.into_iter().map(ModelDocument::into_lean).collect()
            }
            FindResult::Count(_) => Vec::new(),
        }
    }

    /// True when nothing matched, counting a zero count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            FindResult::Count(count) => *count == 0,
            FindResult::One(document) => document.is_none(),
            FindResult::Many(documents) => documents.is_empty(),
            FindResult::LeanOne(row) => row.is_none(),
            FindResult::LeanMany(rows) => rows.is_empty(),
        }
    }
}

/// `{ "error": message }` rendering of a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub error: String,
}

impl From<&RepositoryError> for OperationFailure {
    fn from(error: &RepositoryError) -> Self {
        let error = match error {
            RepositoryError::Generic(message) => message.clone(),
            other => other.to_string(),
        };
        OperationFailure { error }
    }
}

impl From<RepositoryError> for OperationFailure {
    fn from(error: RepositoryError) -> Self {
        OperationFailure::from(&error)
    }
}
