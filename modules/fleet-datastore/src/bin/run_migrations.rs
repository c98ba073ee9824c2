//! Applies the embedded FIM/YARA schema migrations to `DATABASE_URL`.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use fleet_datastore::{DatastoreConfig, PgDatastore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = DatastoreConfig::from_env()?;
    let store = PgDatastore::connect(&config)
        .await
        .context("Failed to connect to datastore")?;

    store.migrate().await.context("Failed to run migrations")?;

    Ok(())
}
