use std::sync::Arc;

use database::{DatabaseConfig, MongoModel};
use document_repository::{
    DocumentRepository, FindOptions, Model, OperationFailure, RepositoryError, RepositoryOptions,
    Schema,
};
use dotenv_flow::dotenv_flow;
use eyre::Result;
use mongodb::bson::{doc, Bson};
use tracing::{error, info};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load dotenv-flow variables
    dotenv_flow().ok();

    // Enable logging
    config_tracing();

    let config = DatabaseConfig::from_env()?;
    let db = database::get_or_init_database(&config).await?;

    let users: Arc<dyn Model> = Arc::new(MongoModel::from_db(&db, user_schema()));
    let repository = DocumentRepository::new(users);

    if let Err(err) = walkthrough(&repository).await {
        error!("walkthrough failed: {err}");
        println!("{}", serde_json::to_string(&OperationFailure::from(&err))?);
    }

    Ok(())
}

fn user_schema() -> Schema {
    Schema::new("users")
        .required("name")
        .static_fn("byName", |model, name| async move {
            let repository = DocumentRepository::with_options(
                model,
                RepositoryOptions {
                    apply_statics: false,
                },
            );
            let found = repository
                .find(
                    doc! { "name": name },
                    FindOptions {
                        lean: Some(true),
                        ..Default::default()
                    },
                )
                .await?;

            Ok::<_, RepositoryError>(Bson::Array(
                found.into_lean().into_iter().map(Bson::Document).collect(),
            ))
        })
}

async fn walkthrough(repository: &DocumentRepository) -> Result<(), RepositoryError> {
    let created = repository.create(doc! { "name": "ada", "role": "admin" }).await?;
    let id = created.id().cloned().ok_or(RepositoryError::MissingIdentifier)?;
    info!(%id, "created user");
    print_json(&created);

    let updated = repository.update(id.clone(), doc! { "role": "owner" }).await?;
    print_json(&updated);

    let matches = repository.call_static("byName", Bson::from("ada")).await?;
    print_json(&matches);

    let count = repository
        .find(doc! {}, FindOptions { count: Some(true), ..Default::default() })
        .await?;
    print_json(&count);

    let outcome = repository.remove(id).await?;
    print_json(&outcome);

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => error!("failed to render output: {err}"),
    }
}

fn config_tracing() {
    let tracing_layer = tracing_subscriber::fmt::layer();
    let filter = filter::Targets::new()
        .with_target("mongodb", tracing::Level::INFO)
        .with_default(tracing::Level::DEBUG);

    tracing_subscriber::registry()
        .with(tracing_layer)
        .with(filter)
        .init();
}
