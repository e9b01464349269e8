//! Loading documents into collections.
//!
//! `persona-bridge load <collection> <dir>` walks a directory, turns each
//! matching file (or each paragraph of it) into a [`CollectionDoc`], and
//! upserts it into the SQLite store. Re-loading the same file replaces the
//! stored document in place.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::migrate::run_migrations;

/// A document destined for one collection.
#[derive(Debug, Clone)]
pub struct CollectionDoc {
    pub collection: String,
    /// Stable identity within the collection (relative path, plus `#n` for paragraphs).
    pub source_id: String,
    pub title: Option<String>,
    pub body: String,
    pub updated_at: i64,
}

pub async fn run_load(
    config: &Config,
    collection: &str,
    dir: &Path,
    split_paragraphs: bool,
) -> Result<()> {
    let collection = resolve_collection(config, collection);
    let docs = scan_directory(collection, dir, &config.rag.include_globs, split_paragraphs)?;

    let pool = db::connect(&config.rag.db_path).await?;
    run_migrations(&pool).await?;

    let mut upserted = 0u64;
    for doc in &docs {
        upsert_document(&pool, doc).await?;
        upserted += 1;
    }

    info!(collection, upserted, "load complete");
    println!("load {}", collection);
    println!("  documents found: {}", docs.len());
    println!("  upserted documents: {}", upserted);
    println!("ok");

    pool.close().await;
    Ok(())
}

/// A configured key (`corpus`) maps to its store name (`sergio_corpus`);
/// anything else is taken as a store name.
pub fn resolve_collection<'a>(config: &'a Config, collection: &'a str) -> &'a str {
    config
        .rag
        .collections
        .iter()
        .find(|c| c.key == collection)
        .map(|c| c.name.as_str())
        .unwrap_or(collection)
}

pub fn scan_directory(
    collection: &str,
    root: &Path,
    include_globs: &[String],
    split_paragraphs: bool,
) -> Result<Vec<CollectionDoc>> {
    if !root.is_dir() {
        bail!("load directory does not exist: {}", root.display());
    }

    let include_set = build_globset(include_globs)?;
    let exclude_set = build_globset(&["**/.git/**".to_string()])?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let body = std::fs::read_to_string(path)?;
        let updated_at = modified_secs(path);
        let title = path.file_name().map(|n| n.to_string_lossy().to_string());

        if split_paragraphs {
            for (i, para) in split_into_paragraphs(&body).into_iter().enumerate() {
                docs.push(CollectionDoc {
                    collection: collection.to_string(),
                    source_id: format!("{}#{}", rel_str, i),
                    title: title.clone(),
                    body: para,
                    updated_at,
                });
            }
        } else if !body.trim().is_empty() {
            docs.push(CollectionDoc {
                collection: collection.to_string(),
                source_id: rel_str,
                title,
                body: body.trim().to_string(),
                updated_at,
            });
        } else {
            debug!(path = %path.display(), "skipping empty file");
        }
    }

    // Sort for deterministic ordering
    docs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(docs)
}

/// Blank-line separated paragraphs, trimmed, empties dropped.
pub fn split_into_paragraphs(body: &str) -> Vec<String> {
    let normalized = body.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn modified_secs(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

pub fn dedup_hash(doc: &CollectionDoc) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc.collection.as_bytes());
    hasher.update(doc.source_id.as_bytes());
    hasher.update(doc.body.as_bytes());
    hex::encode(hasher.finalize())
}

/// Insert or replace a document and its FTS entry. Returns the document id.
pub async fn upsert_document(pool: &SqlitePool, doc: &CollectionDoc) -> Result<String> {
    let hash = dedup_hash(doc);

    let existing: Option<(String, String)> = sqlx::query_as(
        "SELECT id, dedup_hash FROM collection_docs WHERE collection = ? AND source_id = ?",
    )
    .bind(&doc.collection)
    .bind(&doc.source_id)
    .fetch_optional(pool)
    .await?;

    if let Some((id, existing_hash)) = &existing {
        if *existing_hash == hash {
            return Ok(id.clone());
        }
    }

    let doc_id = existing
        .map(|(id, _)| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO collection_docs (id, collection, source_id, title, body, created_at, updated_at, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(collection, source_id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            updated_at = excluded.updated_at,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&doc_id)
    .bind(&doc.collection)
    .bind(&doc.source_id)
    .bind(&doc.title)
    .bind(&doc.body)
    .bind(now)
    .bind(doc.updated_at)
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM collection_fts WHERE doc_id = ?")
        .bind(&doc_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT INTO collection_fts (doc_id, collection, body) VALUES (?, ?, ?)")
        .bind(&doc_id)
        .bind(&doc.collection)
        .bind(&doc.body)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(doc_id)
}
