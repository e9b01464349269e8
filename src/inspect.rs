//! Read-only CLI commands: `collections` and `prompt`.

use anyhow::Result;

use crate::config::Config;
use crate::models::Message;
use crate::prompt::{assemble, load_persona};
use crate::retrieve::{open_provider, ContextProvider};

pub async fn list_collections(config: &Config) -> Result<()> {
    let provider = open_provider(config).await;
    let status = match provider.status().await {
        Some(s) => s,
        None => {
            println!("retrieval disabled");
            return Ok(());
        }
    };

    println!("store: {} (available: {})", status.location, status.available);
    println!(
        "{:<14} {:<24} {:>7} {:>6} {:>6}  GATED",
        "KEY", "COLLECTION", "RESULTS", "CHARS", "DOCS"
    );
    for c in &config.rag.collections {
        let docs = status.collections.get(&c.key).copied().unwrap_or(0);
        let gated = if c.keywords.is_empty() { "no" } else { "yes" };
        println!(
            "{:<14} {:<24} {:>7} {:>6} {:>6}  {}",
            c.key, c.name, c.n_results, c.truncate_chars, docs, gated
        );
    }
    Ok(())
}

/// Print the transcript the backend would receive for one user message.
pub async fn run_prompt(config: &Config, message: &str) -> Result<()> {
    let persona = load_persona(&config.persona)?;
    let provider = open_provider(config).await;
    let context = provider.context_for(message).await;
    println!(
        "{}",
        assemble(&persona, &context, &[Message::user(message)])
    );
    Ok(())
}
