//! The typed error taxonomy for the core engine.
//!
//! Call sites that only care about logging keep using `anyhow::Result`; call
//! sites that need to branch on the kind of failure (the job/HTTP layer, the
//! background loop's backoff decision) match on [`CoreError`] via
//! `anyhow::Error::downcast_ref`.

use std::fmt;

/// A taxonomy of the ways the engine can fail, independent of the underlying
/// cause. See `SPEC_FULL.md` §7.
#[derive(Debug)]
pub enum CoreError {
    /// The caller passed an inconsistent set of pipeline options.
    InvalidOptions(String),

    /// An OCR backend failed for a specific page.
    BackendError { page: usize, source: anyhow::Error },

    /// An LLM call failed after exhausting retries.
    LlmError(anyhow::Error),

    /// A prompt's fixed overhead alone exceeds the token budget.
    PromptTooLarge { header_tokens: usize, budget: usize },

    /// The DMS client returned a transport or remote error.
    DmsError(anyhow::Error),

    /// A filesystem failure under the page cache.
    CacheIoError(std::io::Error),

    /// The searchable-PDF upload task did not reach success within the poll
    /// budget; the original document was retained.
    DeletionBlocked { task_id: String },

    /// A history row has already been undone.
    AlreadyUndone { history_id: i64 },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidOptions(msg) => write!(f, "invalid options: {msg}"),
            CoreError::BackendError { page, source } => {
                write!(f, "OCR backend failed on page {page}: {source}")
            }
            CoreError::LlmError(source) => write!(f, "LLM call failed: {source}"),
            CoreError::PromptTooLarge {
                header_tokens,
                budget,
            } => write!(
                f,
                "prompt overhead ({header_tokens} tokens) exceeds budget ({budget} tokens)"
            ),
            CoreError::DmsError(source) => write!(f, "DMS error: {source}"),
            CoreError::CacheIoError(source) => write!(f, "page cache I/O error: {source}"),
            CoreError::DeletionBlocked { task_id } => write!(
                f,
                "upload task {task_id} did not confirm success; original document retained"
            ),
            CoreError::AlreadyUndone { history_id } => {
                write!(f, "history row {history_id} has already been undone")
            }
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::BackendError { source, .. } => Some(source.as_ref()),
            CoreError::LlmError(source) => Some(source.as_ref()),
            CoreError::DmsError(source) => Some(source.as_ref()),
            CoreError::CacheIoError(source) => Some(source),
            _ => None,
        }
    }
}

impl CoreError {
    /// True if this error kind should trigger the background loop's backoff.
    pub fn triggers_backoff(&self) -> bool {
        !matches!(self, CoreError::InvalidOptions(_) | CoreError::AlreadyUndone { .. })
    }
}
