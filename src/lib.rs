//! A generic repository over a schema-backed document model.
//!
//! [`DocumentRepository`] binds one [`Model`] and exposes create, find,
//! find by id, update and remove on top of it. Every operation returns a
//! `Result`; [`OperationFailure`] renders an error in the `{ "error": message }`
//! shape for callers that expect it.

mod options;
mod outcome;
mod repository;

pub use options::{merge_documents, FindOptions};
pub use outcome::{FindResult, OperationFailure};
pub use repository::{populate_query, DocumentRepository, RepositoryOptions};

pub use database::{
    DeleteOutcome, Model, ModelDocument, PopulateSpec, Projection, Query, RepositoryError, Schema,
    Sort, StaticFn,
};
