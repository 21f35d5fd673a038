//! System instruction sources
//!
//! The instruction text is fetched once per connect and passed to the
//! remote verbatim.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Error, Result};

/// Instruction used when none is configured
pub const DEFAULT_INSTRUCTION: &str = "You are a friendly voice assistant. \
Keep answers short and conversational, since they are spoken aloud. \
Answer in the language the user speaks.";

/// Supplies the behavioral instructions for a session
#[async_trait]
pub trait InstructionProvider: Send + Sync {
    /// Fetch the instruction text
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be read
    async fn system_instruction(&self) -> Result<String>;
}

/// A fixed instruction string
#[derive(Debug, Clone)]
pub struct StaticInstructions(String);

impl StaticInstructions {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

impl Default for StaticInstructions {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTION)
    }
}

#[async_trait]
impl InstructionProvider for StaticInstructions {
    async fn system_instruction(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Instruction read from a file on every connect
#[derive(Debug, Clone)]
pub struct FileInstructions {
    path: PathBuf,
}

impl FileInstructions {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl InstructionProvider for FileInstructions {
    async fn system_instruction(&self) -> Result<String> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Knowledge(format!("failed to read {}: {e}", self.path.display()))
        })?;

        tracing::debug!(path = %self.path.display(), chars = text.len(), "loaded system instruction");
        Ok(text)
    }
}

/// Provider for an optional instruction file, falling back to the default
#[must_use]
pub fn provider(path: Option<&Path>) -> Arc<dyn InstructionProvider> {
    match path {
        Some(path) => Arc::new(FileInstructions::new(path)),
        None => Arc::new(StaticInstructions::default()),
    }
}
