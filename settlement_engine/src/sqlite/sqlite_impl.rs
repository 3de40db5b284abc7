//! `SqliteDocumentStore` keeps every container in a single `documents` table, with the JSON body stored as text.
//!
//! Queries filter by container and partition in SQL and apply the [`Predicate`] in process. That is plenty for the
//! volumes a single marketplace node sees, and keeps the backend free of any JSON query dialect.
use std::fmt::Debug;

use log::*;
use serde_json::Value;
use sqlx::SqlitePool;

use super::db::{db_url, documents, new_pool};
use crate::{
    db_types::Container,
    patch::{apply_patch, PatchOp},
    traits::{Document, DocumentStore, Predicate, Scope, StoreError},
};

#[derive(Clone)]
pub struct SqliteDocumentStore {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDocumentStore ({:?})", self.pool)
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn get_by_id(&self, container: Container, id: &str, partition: &str) -> Result<Option<Document>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        documents::fetch_document(container, id, partition, &mut conn).await
    }

    async fn query(
        &self,
        container: Container,
        predicate: &Predicate,
        scope: &Scope,
    ) -> Result<Vec<Document>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let partition = match scope {
            Scope::Partition(p) => Some(p.as_str()),
            Scope::CrossPartition => None,
        };
        let docs = documents::fetch_documents(container, partition, &mut conn).await?;
        let result = docs.into_iter().filter(|d| predicate.matches(&d.body)).collect::<Vec<_>>();
        trace!("🗃️ Query on {container} returned {} documents", result.len());
        Ok(result)
    }

    async fn apply_ordered_patch(
        &self,
        container: Container,
        id: &str,
        partition: &str,
        ops: &[PatchOp],
        actor: &str,
        expected_version: Option<i64>,
    ) -> Result<Document, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut doc = documents::fetch_document(container, id, partition, &mut tx).await?.ok_or_else(|| {
            StoreError::NotFound { container, id: id.to_string(), partition: partition.to_string() }
        })?;
        if let Some(expected) = expected_version {
            if expected != doc.version {
                debug!("🗃️ Stale patch for {container}/{id}. Expected version {expected}, found {}", doc.version);
                return Err(StoreError::VersionConflict {
                    container,
                    id: id.to_string(),
                    expected,
                    found: doc.version,
                });
            }
        }
        apply_patch(&mut doc.body, ops).map_err(|source| StoreError::Patch {
            container,
            id: id.to_string(),
            source,
        })?;
        let read_version = doc.version;
        if !documents::update_document(&doc, actor, &mut tx).await? {
            let found = documents::fetch_document(container, id, partition, &mut tx)
                .await?
                .map(|d| d.version)
                .unwrap_or_default();
            return Err(StoreError::VersionConflict { container, id: id.to_string(), expected: read_version, found });
        }
        tx.commit().await?;
        doc.version = read_version + 1;
        debug!("🗃️ {} ops applied to {container}/{id} by {actor}. Now at version {}", ops.len(), doc.version);
        Ok(doc)
    }

    async fn insert(
        &self,
        container: Container,
        body: Value,
        partition: &str,
        actor: &str,
    ) -> Result<Document, StoreError> {
        let id = body.get("id").and_then(Value::as_str).ok_or(StoreError::MissingId)?.to_string();
        let mut conn = self.pool.acquire().await?;
        let doc = Document { container, id, partition: partition.to_string(), version: 1, body };
        if documents::insert_document(&doc, actor, &mut conn).await? {
            debug!("🗃️ {container}/{} inserted by {actor}", doc.id);
            Ok(doc)
        } else {
            Err(StoreError::AlreadyExists { container, id: doc.id, partition: doc.partition })
        }
    }
}

impl SqliteDocumentStore {
    /// Creates a new store using the URL in `MKT_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDocumentStore::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Document store migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
