mod document;
mod model;
mod mongo;
pub mod populate;
mod query;
mod schema;

pub use document::ModelDocument;
pub use model::{DeleteOutcome, Model};
pub use mongo::MongoModel;
pub use populate::PopulateSpec;
pub use query::{Projection, Query, Sort, SortOrder};
pub use schema::{static_helper, Schema, StaticFn, StaticFuture};

#[cfg(any(test, feature = "test-utils"))]
pub use model::tests::MockModel;

use mongodb::{error::Error as MongoError, options::ClientOptions, Client, Database};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Definition of custom errors for repository operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum RepositoryError {
    #[error("failed to convert to bson format")]
    BsonConversionError,
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("generic: {0}")]
    Generic(String),
    #[error("invalid populate specification: {0}")]
    InvalidPopulate(String),
    #[error("invalid projection: {0}")]
    InvalidProjection(String),
    #[error("invalid sort: {0}")]
    InvalidSort(String),
    #[error("No ObjectId given")]
    MissingIdentifier,
    #[error("No object found")]
    TargetNotFound,
    #[error("repository is not bound to a model")]
    Unbound,
    #[error("path `{0}` is not a declared reference")]
    UnknownReference(String),
    #[error("unknown static helper `{0}`")]
    UnknownStatic(String),
    #[error("{0}")]
    Validation(String),
}

impl From<MongoError> for RepositoryError {
    fn from(error: MongoError) -> Self {
        RepositoryError::Generic(error.to_string())
    }
}

impl From<mongodb::bson::de::Error> for RepositoryError {
    fn from(_: mongodb::bson::de::Error) -> Self {
        RepositoryError::BsonConversionError
    }
}

/// Connection settings for the backing MongoDB deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub uri: String,
    pub database: String,
}

impl DatabaseConfig {
    /// Reads `MONGO_URI` and `MONGO_DBN` from the environment.
    pub fn from_env() -> Result<Self, RepositoryError> {
        let uri = std::env::var("MONGO_URI")
            .map_err(|_| RepositoryError::Configuration("MONGO_URI env variable required".into()))?;
        let database = std::env::var("MONGO_DBN")
            .map_err(|_| RepositoryError::Configuration("MONGO_DBN env variable required".into()))?;

        Ok(Self { uri, database })
    }
}

/// Create a handle to a database.
pub async fn connect(config: &DatabaseConfig) -> Result<Database, RepositoryError> {
    let client_options = ClientOptions::parse(&config.uri).await?;
    let client = Client::with_options(client_options)?;

    info!(database = %config.database, "connected to MongoDB");
    Ok(client.database(&config.database))
}

static MONGO_DB: OnceCell<Database> = OnceCell::new();

/// Get a handle to a database.
///
/// The first successful connection is kept for the lifetime of the process;
/// later calls return it regardless of the config they are given.
pub async fn get_or_init_database(config: &DatabaseConfig) -> Result<Database, RepositoryError> {
    if let Some(db) = MONGO_DB.get() {
        return Ok(db.clone());
    }

    let db = connect(config).await?;
    Ok(MONGO_DB.get_or_init(|| db).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_match_legacy_wording() {
        assert_eq!(RepositoryError::MissingIdentifier.to_string(), "No ObjectId given");
        assert_eq!(RepositoryError::TargetNotFound.to_string(), "No object found");
        assert_eq!(
            RepositoryError::Validation("users validation failed".into()).to_string(),
            "users validation failed"
        );
    }
}
