//! SQLite-backed [`CollectionStore`].
//!
//! Documents live in `collection_docs`; `collection_fts` is an FTS5 index
//! over their bodies. Queries OR together the query terms and rank matches
//! by BM25.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{query_terms, CollectionStore};

pub struct SqliteCollectionStore {
    pool: SqlitePool,
}

impl SqliteCollectionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// FTS5 match expression for free text: every term quoted, OR-joined.
/// `None` when the text has no searchable terms.
pub fn fts_expression(text: &str) -> Option<String> {
    let terms = query_terms(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[async_trait]
impl CollectionStore for SqliteCollectionStore {
    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<String>> {
        let limit_i = limit as i64;
        let mut ids: Vec<String> = Vec::new();
        let mut bodies: Vec<String> = Vec::new();

        if let Some(expr) = fts_expression(text) {
            let rows = sqlx::query(
                r#"
                SELECT d.id AS id, d.body AS body
                FROM collection_fts
                JOIN collection_docs d ON d.id = collection_fts.doc_id
                WHERE collection_fts MATCH ? AND collection_fts.collection = ?
                ORDER BY collection_fts.rank
                LIMIT ?
                "#,
            )
            .bind(&expr)
            .bind(collection)
            .bind(limit_i)
            .fetch_all(&self.pool)
            .await?;

            for row in rows {
                ids.push(row.get("id"));
                bodies.push(row.get("body"));
            }
        }

        if bodies.len() < limit {
            let rows = sqlx::query(
                r#"
                SELECT id, body FROM collection_docs
                WHERE collection = ?
                ORDER BY created_at ASC, rowid ASC
                LIMIT ?
                "#,
            )
            .bind(collection)
            .bind(limit_i + ids.len() as i64)
            .fetch_all(&self.pool)
            .await?;

            for row in rows {
                if bodies.len() >= limit {
                    break;
                }
                let id: String = row.get("id");
                if !ids.contains(&id) {
                    ids.push(id);
                    bodies.push(row.get("body"));
                }
            }
        }

        Ok(bodies)
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collection_docs WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
