//! Language model collaborator.
//!
//! The workflow only needs `complete(prompt) -> text`; everything that
//! interprets the text lives next to the step that asked for it.

pub mod client;

pub use client::InferenceClient;

use anyhow::Result;
use async_trait::async_trait;

/// A text-completion backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a single prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Pull the outermost `{ ... }` object out of a model response.
///
/// Models wrap JSON in prose or code fences often enough that a strict
/// parse of the whole text is useless.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(&text[start..=end]) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}
