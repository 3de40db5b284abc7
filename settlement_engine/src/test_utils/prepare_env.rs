use std::path::Path;

use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};

use crate::SqliteDocumentStore;

pub fn random_db_path() -> String {
    let dir = std::env::temp_dir();
    format!("sqlite://{}/mkt_test_store_{:016x}.db", dir.display(), rand::random::<u64>())
}

pub async fn create_database<P: AsRef<Path>>(path: P) {
    let p = path.as_ref().as_os_str().to_str().expect("database path is not valid UTF-8");
    if let Err(e) = Sqlite::drop_database(p).await {
        trace!("Could not drop database {p}: {e:?}");
    }
    Sqlite::create_database(p).await.expect("Error creating database");
    info!("Created Sqlite database {p}");
}

/// Loads `.env.test`, initialises logging, and returns a migrated document store backed by a fresh database file.
pub async fn prepare_test_store() -> SqliteDocumentStore {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let url = random_db_path();
    create_database(&url).await;
    let store = SqliteDocumentStore::new_with_url(&url, 5).await.expect("Error creating connection to database");
    store.migrate().await.expect("Error running DB migrations");
    debug!("🚀️ Test store ready at {url}");
    store
}
