//! Context retrieval across several collections.
//!
//! For one query string every configured collection is asked for its best
//! documents. Each collection's documents are cut to that collection's
//! character cap and headed by its label. Collections are queried
//! concurrently; the resulting blocks always come back in configuration
//! order, so the same inputs always produce the same context text.
//!
//! ```text
//!  query ──┬─▶ corpus       (3 × 500)  ─┐
//!          ├─▶ personality  (2 × 300)  ─┤
//!          ├─▶ rhetorical   (1 × 200)  ─┼─▶ join in config order ─▶ context block
//!          └─▶ humor        (2 × 200)  ─┘
//!              (keyword gated)
//! ```
//!
//! A missing store or a failing collection never fails the request: the
//! collection is skipped and a warning is logged.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{CollectionConfig, Config};
use crate::db;
use crate::error::BridgeError;
use crate::models::{ContextBlock, ContextFragment};
use crate::store::{CollectionStore, SqliteCollectionStore};

/// Topic words that open the humor collection.
pub const HUMOR_KEYWORDS: &[&str] = &[
    "absurd", "ridicul", "spirit", "vibra", "energ", "manifest", "univers",
];

/// Case-insensitive substring match of any keyword.
pub fn mentions_any<S: AsRef<str>>(query: &str, keywords: &[S]) -> bool {
    let lower = query.to_lowercase();
    keywords
        .iter()
        .any(|kw| lower.contains(&kw.as_ref().to_lowercase()))
}

/// When a collection takes part in retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Always,
    Keywords(Vec<String>),
}

impl Activation {
    pub fn is_active(&self, query: &str) -> bool {
        match self {
            Activation::Always => true,
            Activation::Keywords(kws) => mentions_any(query, kws),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub key: String,
    pub name: String,
    pub result_count: usize,
    pub truncate_chars: usize,
    pub label: String,
    pub activation: Activation,
}

impl From<&CollectionConfig> for CollectionSpec {
    fn from(c: &CollectionConfig) -> Self {
        let activation = if c.keywords.is_empty() {
            Activation::Always
        } else {
            Activation::Keywords(c.keywords.clone())
        };
        Self {
            key: c.key.clone(),
            name: c.name.clone(),
            result_count: c.n_results,
            truncate_chars: c.truncate_chars,
            label: c.label.clone(),
            activation,
        }
    }
}

/// Hard cut at `cap` characters. Not sentence-aware.
pub fn truncate_chars(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}

/// Blocks rendered and separated by a blank line.
pub fn render_context(blocks: &[ContextBlock]) -> String {
    blocks
        .iter()
        .map(ContextBlock::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Retrieval state reported by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalStatus {
    pub available: bool,
    pub location: String,
    pub collections: BTreeMap<String, i64>,
}

/// Source of the context block injected into the persona.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Rendered context for `query`; empty when nothing was found.
    async fn context_for(&self, query: &str) -> String;

    /// `None` when retrieval is not part of this deployment.
    async fn status(&self) -> Option<RetrievalStatus>;
}

/// Provider for deployments without retrieval.
pub struct NoContext;

#[async_trait]
impl ContextProvider for NoContext {
    async fn context_for(&self, _query: &str) -> String {
        String::new()
    }

    async fn status(&self) -> Option<RetrievalStatus> {
        None
    }
}

/// Multi-collection retriever over a shared, read-only store.
pub struct Retriever {
    store: Option<Arc<dyn CollectionStore>>,
    specs: Vec<CollectionSpec>,
    location: String,
}

impl Retriever {
    /// `store` is `None` when it could not be opened at startup.
    pub fn new(
        store: Option<Arc<dyn CollectionStore>>,
        specs: Vec<CollectionSpec>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            store,
            specs,
            location: location.into(),
        }
    }

    /// Labeled blocks for `query`, in configuration order.
    pub async fn retrieve(&self, query: &str) -> Vec<ContextBlock> {
        let store = match &self.store {
            Some(s) => s.clone(),
            None => {
                debug!("collection store unavailable; skipping retrieval");
                return Vec::new();
            }
        };
        if query.trim().is_empty() {
            return Vec::new();
        }

        let lookups = self
            .specs
            .iter()
            .filter(|spec| spec.activation.is_active(query))
            .map(|spec| query_collection(store.as_ref(), spec, query));

        // join_all yields results in input order regardless of completion order.
        join_all(lookups)
            .await
            .into_iter()
            .filter_map(|res| match res {
                Ok(block) => block,
                Err(e) => {
                    warn!(error = %e, "collection skipped");
                    None
                }
            })
            .collect()
    }

    pub async fn collection_counts(&self) -> BTreeMap<String, i64> {
        let mut counts = BTreeMap::new();
        for spec in &self.specs {
            let n = match &self.store {
                Some(store) => store.count(&spec.name).await.unwrap_or_else(|e| {
                    warn!(collection = %spec.name, error = %e, "count failed");
                    0
                }),
                None => 0,
            };
            counts.insert(spec.key.clone(), n);
        }
        counts
    }
}

async fn query_collection(
    store: &dyn CollectionStore,
    spec: &CollectionSpec,
    query: &str,
) -> Result<Option<ContextBlock>, BridgeError> {
    let docs = store
        .query(&spec.name, query, spec.result_count)
        .await
        .map_err(|e| BridgeError::RetrievalUnavailable {
            collection: spec.name.clone(),
            reason: e.to_string(),
        })?;

    if docs.is_empty() {
        return Ok(None);
    }

    let fragments = docs
        .iter()
        .take(spec.result_count)
        .enumerate()
        .map(|(rank, doc)| ContextFragment {
            source_collection: spec.key.clone(),
            text: truncate_chars(doc, spec.truncate_chars),
            relevance_rank: rank,
        })
        .collect();

    Ok(Some(ContextBlock {
        label: spec.label.clone(),
        fragments,
    }))
}

#[async_trait]
impl ContextProvider for Retriever {
    async fn context_for(&self, query: &str) -> String {
        render_context(&self.retrieve(query).await)
    }

    async fn status(&self) -> Option<RetrievalStatus> {
        Some(RetrievalStatus {
            available: self.store.is_some(),
            location: self.location.clone(),
            collections: self.collection_counts().await,
        })
    }
}

/// The provider for a deployment: [`NoContext`] when retrieval is disabled,
/// otherwise a [`Retriever`] over the SQLite store. A store that cannot be
/// opened leaves the retriever without one; serving continues.
pub async fn open_provider(config: &Config) -> Arc<dyn ContextProvider> {
    if !config.rag.enabled {
        info!("retrieval disabled");
        return Arc::new(NoContext);
    }

    let location = config.rag.db_path.display().to_string();
    let store: Option<Arc<dyn CollectionStore>> =
        match db::connect_read_only(&config.rag.db_path).await {
            Ok(pool) => Some(Arc::new(SqliteCollectionStore::new(pool))),
            Err(e) => {
                warn!(path = %location, error = %e, "collection store unavailable");
                None
            }
        };

    let specs = config
        .rag
        .collections
        .iter()
        .map(CollectionSpec::from)
        .collect();
    Arc::new(Retriever::new(store, specs, location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_collections;
    use crate::store::InMemoryCollectionStore;
    use anyhow::{anyhow, Result};
    use std::collections::HashMap;
    use std::time::Duration;

    fn default_specs() -> Vec<CollectionSpec> {
        default_collections().iter().map(CollectionSpec::from).collect()
    }

    fn full_store() -> InMemoryCollectionStore {
        InMemoryCollectionStore::new()
            .with_docs("sergio_corpus", ["C1", "C2", "C3", "C4"])
            .with_docs("sergio_personality", ["P1", "P2"])
            .with_docs("sergio_rhetorical", ["R1", "R2"])
            .with_docs("sergio_humor", ["H1", "H2"])
    }

    /// Answers after a per-collection delay, or fails for listed collections.
    struct ScriptedStore {
        delays_ms: HashMap<&'static str, u64>,
        failing: Vec<&'static str>,
        inner: InMemoryCollectionStore,
    }

    #[async_trait]
    impl CollectionStore for ScriptedStore {
        async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<String>> {
            if let Some(ms) = self.delays_ms.get(collection) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            if self.failing.iter().any(|f| *f == collection) {
                return Err(anyhow!("collection {} is corrupt", collection));
            }
            self.inner.query(collection, text, limit).await
        }

        async fn count(&self, collection: &str) -> Result<i64> {
            if self.failing.iter().any(|f| *f == collection) {
                return Err(anyhow!("collection {} is corrupt", collection));
            }
            self.inner.count(collection).await
        }
    }

    #[test]
    fn humor_keywords_match_case_insensitive_substrings() {
        let humor = Activation::Keywords(HUMOR_KEYWORDS.iter().map(|k| k.to_string()).collect());
        assert!(humor.is_active("Siento malas VIBRAS"));
        assert!(humor.is_active("the Universe told me"));
        assert!(humor.is_active("es absurdo"));
        assert!(!humor.is_active("tengo mucha ansiedad"));
        assert!(Activation::Always.is_active(""));
    }

    #[test]
    fn truncation_is_a_hard_char_cap() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        // multi-byte characters count once
        assert_eq!(truncate_chars("ñañaña", 4), "ñaña");
    }

    #[tokio::test]
    async fn unconditional_collections_in_config_order() {
        let r = Retriever::new(Some(Arc::new(full_store())), default_specs(), "mem");
        let blocks = r.retrieve("tengo mucha ansiedad").await;
        let labels: Vec<&str> = blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "CONVERSATION EXAMPLES FROM SERGIO:",
                "PERSONALITY FRAMEWORKS:",
                "RHETORICAL DEVICE TO USE:",
            ]
        );
        assert_eq!(blocks[0].fragments.len(), 3);
        assert_eq!(blocks[2].fragments.len(), 1);
    }

    #[tokio::test]
    async fn humor_joins_when_gate_opens() {
        let r = Retriever::new(Some(Arc::new(full_store())), default_specs(), "mem");
        let blocks = r.retrieve("todo es energía del universo").await;
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[3].label, "HUMOR PATTERNS TO DEPLOY:");
    }

    #[tokio::test]
    async fn fragments_never_exceed_collection_cap() {
        let long = "x".repeat(2_000);
        let store = InMemoryCollectionStore::new()
            .with_docs("sergio_corpus", [long.clone()])
            .with_docs("sergio_personality", [long.clone()])
            .with_docs("sergio_rhetorical", [long.clone()])
            .with_docs("sergio_humor", [long]);
        let r = Retriever::new(Some(Arc::new(store)), default_specs(), "mem");
        let blocks = r.retrieve("energía").await;
        let caps = [500, 300, 200, 200];
        assert_eq!(blocks.len(), 4);
        for (block, cap) in blocks.iter().zip(caps) {
            for f in &block.fragments {
                assert_eq!(f.text.chars().count(), cap);
            }
        }
    }

    #[tokio::test]
    async fn order_ignores_completion_timing() {
        let store = ScriptedStore {
            delays_ms: HashMap::from([
                ("sergio_corpus", 60),
                ("sergio_personality", 30),
                ("sergio_rhetorical", 0),
                ("sergio_humor", 10),
            ]),
            failing: vec![],
            inner: full_store(),
        };
        let r = Retriever::new(Some(Arc::new(store)), default_specs(), "mem");
        let text = r.context_for("manifestar energía").await;
        let positions: Vec<usize> = ["CONVERSATION", "PERSONALITY", "RHETORICAL", "HUMOR"]
            .iter()
            .map(|l| text.find(l).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", text);
    }

    #[tokio::test]
    async fn failing_collection_is_skipped() {
        let store = ScriptedStore {
            delays_ms: HashMap::new(),
            failing: vec!["sergio_personality"],
            inner: full_store(),
        };
        let r = Retriever::new(Some(Arc::new(store)), default_specs(), "mem");
        let blocks = r.retrieve("hola").await;
        let labels: Vec<&str> = blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["CONVERSATION EXAMPLES FROM SERGIO:", "RHETORICAL DEVICE TO USE:"]
        );

        let counts = r.collection_counts().await;
        assert_eq!(counts["personality"], 0);
        assert_eq!(counts["corpus"], 4);
    }

    #[tokio::test]
    async fn missing_store_yields_empty_context() {
        let r = Retriever::new(None, default_specs(), "/nope.sqlite");
        assert_eq!(r.context_for("hola").await, "");
        let status = r.status().await.unwrap();
        assert!(!status.available);
        assert_eq!(status.collections.len(), 4);
    }

    #[tokio::test]
    async fn empty_collections_produce_no_block() {
        let store = InMemoryCollectionStore::new().with_docs("sergio_corpus", ["solo uno"]);
        let r = Retriever::new(Some(Arc::new(store)), default_specs(), "mem");
        assert_eq!(
            r.context_for("hola").await,
            "CONVERSATION EXAMPLES FROM SERGIO:\nsolo uno"
        );
    }

    #[tokio::test]
    async fn no_context_provider_is_silent() {
        assert_eq!(NoContext.context_for("hola").await, "");
        assert!(NoContext.status().await.is_none());
    }
}
