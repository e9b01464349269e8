//! Collection store abstraction.
//!
//! A store holds named collections of short text documents and answers
//! free-text queries against one collection at a time. The bridge only
//! reads from it while serving; documents are written by `persona-bridge load`.
//!
//! Implementations must be `Send + Sync`: one handle is opened at startup
//! and shared by every request without further locking.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::InMemoryCollectionStore;
pub use sqlite::SqliteCollectionStore;

#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Return up to `limit` documents of `collection`, most relevant first.
    ///
    /// Documents sharing terms with `text` rank ahead of the rest; when
    /// fewer than `limit` match, the remaining slots are filled with other
    /// documents of the collection in insertion order, so a non-empty
    /// collection always answers.
    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<String>>;

    /// Number of documents in `collection` (0 if it does not exist).
    async fn count(&self, collection: &str) -> Result<i64>;
}

/// Lowercased alphanumeric terms of `text`, deduplicated, in first-seen order.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let term = raw.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}
