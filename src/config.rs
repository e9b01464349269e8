//! TOML configuration.
//!
//! Every section has defaults, so the bridge runs without a config file
//! (see [`Config::default`]). A file only needs to name what it changes:
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [backend]
//! cli_path = "/usr/local/bin/claude"
//!
//! [rag]
//! db_path = "/srv/persona/collections.sqlite"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub rag: RagConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Reported as `service` by `GET /health`.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Model echoed back when a request omits `model`.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Static catalog served by `GET /v1/models`.
    #[serde(default = "default_models")]
    pub models: Vec<ModelEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            service_name: default_service_name(),
            default_model: default_model(),
            models: default_models(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    pub id: String,
    pub owned_by: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3001
}
fn default_service_name() -> String {
    "claude-max-api".to_string()
}
fn default_model() -> String {
    "sergio-rag".to_string()
}
fn default_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry {
            id: "sergio-rag".to_string(),
            owned_by: "infrafabric".to_string(),
        },
        ModelEntry {
            id: "claude-max".to_string(),
            owned_by: "anthropic".to_string(),
        },
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_cli_path")]
    pub cli_path: PathBuf,
    /// Arguments placed before `--print <prompt>`.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub stream_timeout_secs: u64,
    /// Capacity of the line channel between the reader task and the SSE body.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    /// Variables removed from the child environment.
    #[serde(default = "default_strip_env")]
    pub strip_env: Vec<String>,
    /// Variables forced into the child environment.
    #[serde(default = "default_set_env")]
    pub set_env: BTreeMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            extra_args: Vec::new(),
            credentials_path: default_credentials_path(),
            timeout_secs: default_timeout_secs(),
            stream_timeout_secs: default_timeout_secs(),
            stream_buffer: default_stream_buffer(),
            strip_env: default_strip_env(),
            set_env: default_set_env(),
        }
    }
}

fn default_cli_path() -> PathBuf {
    expand_home(Path::new("~/.local/bin/claude"))
}
fn default_credentials_path() -> PathBuf {
    expand_home(Path::new("~/.claude/.credentials.json"))
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_stream_buffer() -> usize {
    64
}
fn default_strip_env() -> Vec<String> {
    vec!["ANTHROPIC_API_KEY".to_string()]
}
fn default_set_env() -> BTreeMap<String, String> {
    BTreeMap::from([("CLAUDE_USE_SUBSCRIPTION".to_string(), "true".to_string())])
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PersonaConfig {
    /// Persona template file. The built-in persona is used when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RagConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Queried and rendered in this order.
    #[serde(default = "default_collections")]
    pub collections: Vec<CollectionConfig>,
    /// Globs used by `load` when scanning a directory.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
            collections: default_collections(),
            include_globs: default_include_globs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    /// Short key used in logs and the health report (`corpus`, `humor`, ...).
    pub key: String,
    /// Collection name inside the store.
    pub name: String,
    pub n_results: usize,
    pub truncate_chars: usize,
    pub label: String,
    /// Activation keywords; empty means the collection is always queried.
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/collections.sqlite")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn collection(
    key: &str,
    n_results: usize,
    truncate_chars: usize,
    label: &str,
    keywords: &[&str],
) -> CollectionConfig {
    CollectionConfig {
        key: key.to_string(),
        name: format!("sergio_{}", key),
        n_results,
        truncate_chars,
        label: label.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

pub fn default_collections() -> Vec<CollectionConfig> {
    vec![
        collection("corpus", 3, 500, "CONVERSATION EXAMPLES FROM SERGIO:", &[]),
        collection("personality", 2, 300, "PERSONALITY FRAMEWORKS:", &[]),
        collection("rhetorical", 1, 200, "RHETORICAL DEVICE TO USE:", &[]),
        collection(
            "humor",
            2,
            200,
            "HUMOR PATTERNS TO DEPLOY:",
            crate::retrieve::HUMOR_KEYWORDS,
        ),
    ]
}

/// Replace a leading `~/` with `$HOME`. Other paths are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

impl Config {
    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn expand_paths(&mut self) {
        self.backend.cli_path = expand_home(&self.backend.cli_path);
        self.backend.credentials_path = expand_home(&self.backend.credentials_path);
        self.rag.db_path = expand_home(&self.rag.db_path);
        if let Some(p) = &self.persona.path {
            self.persona.path = Some(expand_home(p));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be > 0");
        }
        if self.backend.timeout_secs == 0 || self.backend.stream_timeout_secs == 0 {
            bail!("backend.timeout_secs and backend.stream_timeout_secs must be > 0");
        }
        if self.backend.stream_buffer == 0 {
            bail!("backend.stream_buffer must be > 0");
        }

        let mut seen = HashSet::new();
        for c in &self.rag.collections {
            if !seen.insert(c.key.as_str()) {
                bail!("rag.collections: duplicate key '{}'", c.key);
            }
            if c.n_results == 0 {
                bail!("rag.collections.{}: n_results must be >= 1", c.key);
            }
            if c.truncate_chars == 0 {
                bail!("rag.collections.{}: truncate_chars must be >= 1", c.key);
            }
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.expand_paths();
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
