use log::warn;
use serde_json::Value;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::Container,
    traits::{Document, StoreError},
};

#[derive(Debug, Clone, FromRow)]
struct DocumentRow {
    container: String,
    id: String,
    partition_key: String,
    version: i64,
    body: String,
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let container = row.container.parse::<Container>().map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        let body = serde_json::from_str::<Value>(&row.body).map_err(|e| StoreError::Serialization {
            container,
            id: row.id.clone(),
            reason: e.to_string(),
        })?;
        Ok(Document { container, id: row.id, partition: row.partition_key, version: row.version, body })
    }
}

fn body_text(doc: &Document) -> Result<String, StoreError> {
    serde_json::to_string(&doc.body).map_err(|e| StoreError::Serialization {
        container: doc.container,
        id: doc.id.clone(),
        reason: e.to_string(),
    })
}

pub async fn fetch_document(
    container: Container,
    id: &str,
    partition: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Document>, StoreError> {
    let row: Option<DocumentRow> = sqlx::query_as(
        r#"
            SELECT container, id, partition_key, version, body
            FROM documents
            WHERE container = $1 AND id = $2 AND partition_key = $3;
        "#,
    )
    .bind(container.as_str())
    .bind(id)
    .bind(partition)
    .fetch_optional(conn)
    .await?;
    row.map(Document::try_from).transpose()
}

/// Fetches every document in the container, optionally restricted to one partition. Rows that cannot be decoded are
/// skipped with a warning.
pub async fn fetch_documents(
    container: Container,
    partition: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Document>, StoreError> {
    let rows: Vec<DocumentRow> = match partition {
        Some(p) => {
            sqlx::query_as(
                r#"
                    SELECT container, id, partition_key, version, body
                    FROM documents
                    WHERE container = $1 AND partition_key = $2
                    ORDER BY created_at, id;
                "#,
            )
            .bind(container.as_str())
            .bind(p)
            .fetch_all(conn)
            .await?
        },
        None => {
            sqlx::query_as(
                r#"
                    SELECT container, id, partition_key, version, body
                    FROM documents
                    WHERE container = $1
                    ORDER BY created_at, id;
                "#,
            )
            .bind(container.as_str())
            .fetch_all(conn)
            .await?
        },
    };
    let docs = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            Document::try_from(row)
                .map_err(|e| warn!("🗃️ Skipping undecodable document {container}/{id}: {e}"))
                .ok()
        })
        .collect();
    Ok(docs)
}

/// Inserts the document, returning `false` if a document with the same key already exists.
pub async fn insert_document(doc: &Document, actor: &str, conn: &mut SqliteConnection) -> Result<bool, StoreError> {
    let body = body_text(doc)?;
    let result = sqlx::query(
        r#"
            INSERT INTO documents (container, id, partition_key, version, body, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (container, id, partition_key) DO NOTHING;
        "#,
    )
    .bind(doc.container.as_str())
    .bind(&doc.id)
    .bind(&doc.partition)
    .bind(doc.version)
    .bind(body)
    .bind(actor)
    .bind(actor)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Writes `doc.body` and bumps the version, provided the stored version still equals `doc.version`. Returns `false`
/// if another writer got there first.
pub async fn update_document(doc: &Document, actor: &str, conn: &mut SqliteConnection) -> Result<bool, StoreError> {
    let body = body_text(doc)?;
    let result = sqlx::query(
        r#"
            UPDATE documents
            SET body = $1, version = version + 1, updated_by = $2, updated_at = CURRENT_TIMESTAMP
            WHERE container = $3 AND id = $4 AND partition_key = $5 AND version = $6;
        "#,
    )
    .bind(body)
    .bind(actor)
    .bind(doc.container.as_str())
    .bind(&doc.id)
    .bind(&doc.partition)
    .bind(doc.version)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
