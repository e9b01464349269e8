//! Prompt assembly.
//!
//! Turns a persona template, a rendered context block and the caller's
//! messages into the single transcript handed to the backend:
//!
//! ```text
//! System: <persona, with context substituted>
//!
//! System: <caller system message>
//!
//! Human: <user message>
//!
//! Assistant: <assistant message>
//! ```
//!
//! Everything here is pure: no I/O beyond loading the template file once at
//! startup.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::PersonaConfig;
use crate::models::{Message, Role};

/// Placeholder in the persona template replaced by the context block.
pub const CONTEXT_SLOT: &str = "{personality_context}";

/// Fills the slot when retrieval produced nothing.
pub const NO_CONTEXT_SENTINEL: &str = "No additional context retrieved.";

const BUILTIN_PERSONA: &str = include_str!("../assets/persona.txt");

#[derive(Debug, Clone)]
pub struct Persona {
    template: String,
}

impl Persona {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_PERSONA)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let template = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read persona file: {}", path.display()))?;
        Ok(Self::new(template))
    }

    pub fn has_slot(&self) -> bool {
        self.template.contains(CONTEXT_SLOT)
    }

    /// Persona text with `context` in place.
    ///
    /// With a slot, an empty context becomes [`NO_CONTEXT_SENTINEL`].
    /// Without one, a non-empty context is appended after a blank line.
    pub fn render(&self, context: &str) -> String {
        if self.has_slot() {
            let fill = if context.is_empty() {
                NO_CONTEXT_SENTINEL
            } else {
                context
            };
            self.template.replace(CONTEXT_SLOT, fill)
        } else if context.is_empty() {
            self.template.clone()
        } else {
            format!("{}\n\n{}", self.template.trim_end(), context)
        }
    }
}

pub fn load_persona(config: &PersonaConfig) -> Result<Persona> {
    match &config.path {
        Some(path) => Persona::from_file(path),
        None => Ok(Persona::builtin()),
    }
}

pub fn render_message(msg: &Message) -> String {
    let tag = match msg.role {
        Role::System => "System",
        Role::Assistant => "Assistant",
        Role::User | Role::Other => "Human",
    };
    format!("{}: {}", tag, msg.content)
}

/// Full transcript: persona first, then every message in order.
pub fn assemble(persona: &Persona, context: &str, messages: &[Message]) -> String {
    let mut parts = Vec::with_capacity(messages.len() + 1);
    parts.push(format!("System: {}", persona.render(context)));
    parts.extend(messages.iter().map(render_message));
    parts.join("\n\n")
}

/// Content of the last message whose wire role was `user`, used as the
/// retrieval query. [`Role::Other`] messages are skipped.
pub fn latest_user_message(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}
