use serde_json::Value;
use thiserror::Error;

use crate::{
    db_types::Container,
    patch::{PatchError, PatchOp},
    traits::{Document, Predicate, Scope},
};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Document store error: {0}")]
    DatabaseError(String),
    #[error("{container}/{id} does not exist in partition {partition}")]
    NotFound { container: Container, id: String, partition: String },
    #[error("{container}/{id} already exists in partition {partition}")]
    AlreadyExists { container: Container, id: String, partition: String },
    #[error("{container}/{id} was modified concurrently. Expected version {expected}, found {found}")]
    VersionConflict { container: Container, id: String, expected: i64, found: i64 },
    #[error("Cannot patch {container}/{id}: {source}")]
    Patch { container: Container, id: String, source: PatchError },
    #[error("{container}/{id} does not have the expected shape: {reason}")]
    Serialization { container: Container, id: String, reason: String },
    #[error("Documents must carry a string 'id' field")]
    MissingId,
}

impl StoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// The document database the engine reads from and writes to.
///
/// Documents are JSON objects addressed by `(container, id, partition)`. Every document carries a version; writers
/// supply the version they computed their change from, and the store refuses stale writes with
/// [`StoreError::VersionConflict`].
#[allow(async_fn_in_trait)]
pub trait DocumentStore: Clone {
    /// The URL of the store
    fn url(&self) -> &str;

    async fn get_by_id(&self, container: Container, id: &str, partition: &str) -> Result<Option<Document>, StoreError>;

    /// Returns every document in `container` within `scope` that matches `predicate`.
    async fn query(&self, container: Container, predicate: &Predicate, scope: &Scope)
        -> Result<Vec<Document>, StoreError>;

    async fn exists_by_id(&self, container: Container, id: &str, partition: &str) -> Result<bool, StoreError> {
        Ok(self.get_by_id(container, id, partition).await?.is_some())
    }

    /// Applies `ops` in order, atomically. Either every op is applied and the version is incremented, or the
    /// document is left untouched.
    ///
    /// If `expected_version` is given and differs from the stored version, nothing is written and
    /// [`StoreError::VersionConflict`] is returned. The patched document is returned on success.
    async fn apply_ordered_patch(
        &self,
        container: Container,
        id: &str,
        partition: &str,
        ops: &[PatchOp],
        actor: &str,
        expected_version: Option<i64>,
    ) -> Result<Document, StoreError>;

    /// Inserts a new document. The id is taken from the body's `id` field. Fails with [`StoreError::AlreadyExists`]
    /// if the id is taken in that partition.
    async fn insert(&self, container: Container, body: Value, partition: &str, actor: &str)
        -> Result<Document, StoreError>;
}
