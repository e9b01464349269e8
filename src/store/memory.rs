//! In-memory [`CollectionStore`] for tests and embedding.
//!
//! Ranking is term overlap: the number of distinct query terms found in
//! the lowercased document. Ties keep insertion order.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{query_terms, CollectionStore};

#[derive(Default)]
pub struct InMemoryCollectionStore {
    collections: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, doc: impl Into<String>) {
        let mut guard = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .entry(collection.to_string())
            .or_default()
            .push(doc.into());
    }

    /// Builder-style [`insert`](Self::insert) for several documents.
    pub fn with_docs<I, S>(self, collection: &str, docs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for d in docs {
            self.insert(collection, d);
        }
        self
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<String>> {
        let guard = self
            .collections
            .read()
            .map_err(|_| anyhow!("collection store lock poisoned"))?;
        let docs = match guard.get(collection) {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };

        let terms = query_terms(text);
        let mut scored: Vec<(usize, usize)> = docs
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let lower = doc.to_lowercase();
                let hits = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                (i, hits)
            })
            .collect();
        // Stable sort: equal scores stay in insertion order.
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(i, _)| docs[i].clone())
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        let guard = self
            .collections
            .read()
            .map_err(|_| anyhow!("collection store lock poisoned"))?;
        Ok(guard.get(collection).map(|d| d.len() as i64).unwrap_or(0))
    }
}
