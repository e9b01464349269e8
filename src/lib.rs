//! # Persona Bridge
//!
//! An OpenAI-compatible chat-completion server in front of a local
//! text-in/text-out CLI (`claude --print`). Each request is grounded in a
//! persona whose system prompt is enriched with passages retrieved from
//! several document collections.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌────────────┐
//!  request ───────▶│  server    │──────────────────────────────┐
//!                  └─────┬──────┘                              │
//!                        │ latest user message                 │
//!                        ▼                                     │
//!                  ┌────────────┐   ┌──────────────┐           │
//!                  │  retrieve  │──▶│ store        │           │
//!                  │ (fan-out)  │   │ SQLite FTS5  │           │
//!                  └─────┬──────┘   └──────────────┘           │
//!                        │ context block                       │
//!                        ▼                                     ▼
//!                  ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//!                  │  prompt    │──▶│  backend     │──▶│  openai      │
//!                  │ (assemble) │   │ (CLI child)  │   │ (framing/SSE)│
//!                  └────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! persona-bridge init
//! persona-bridge load corpus ./transcripts
//! persona-bridge load humor ./humor --split-paragraphs
//! persona-bridge prompt "tengo mucha ansiedad"
//! persona-bridge serve --port 3001
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Messages, requests and context fragments |
//! | [`error`] | Request-path failure taxonomy |
//! | [`store`] | Collection store trait, SQLite and in-memory stores |
//! | [`retrieve`] | Multi-collection context retrieval |
//! | [`prompt`] | Persona rendering and transcript assembly |
//! | [`backend`] | Backend CLI invocation, buffered and streamed |
//! | [`openai`] | Completion and chunk framing, SSE events |
//! | [`server`] | HTTP server |
//! | [`credentials`] | Subscription type from the CLI credentials file |
//! | [`ingest`] | Loading documents into collections |
//! | [`inspect`] | `collections` and `prompt` commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backend;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod ingest;
pub mod inspect;
pub mod migrate;
pub mod models;
pub mod openai;
pub mod prompt;
pub mod retrieve;
pub mod server;
pub mod store;
