//! Error taxonomy for the canvas runtime.
//!
//! Plumbing code returns [`anyhow::Result`]. The variants here are the
//! failures that carry product meaning: the dispatcher and orchestrator
//! recover them with `downcast_ref` and turn them into user-visible
//! messages instead of unwinding the session.

use thiserror::Error;

use canvas_runtime_core::models::Language;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanvasError {
    /// A capability's `render` or `refresh` hook failed. Only that panel degrades.
    #[error("capability '{capability}' failed to render: {message}")]
    PluginRenderFailure { capability: String, message: String },

    /// No registered connector accepts the document's language.
    #[error("no connector")]
    NoConnectorAvailable { language: Language },

    /// The sandbox or backend exceeded its time bound and was torn down.
    #[error("execution timed out after {elapsed_ms} ms")]
    ExecutionTimeout { elapsed_ms: u64 },

    /// The backend was reachable but rejected the content. Shown verbatim.
    #[error("{0}")]
    ExecutionBackend(String),

    /// The user dismissed an input prompt. Treated as a silent no-op.
    #[error("cancelled by user")]
    CancelledByUser,

    /// The session could not be constructed because there is nowhere to mount it.
    #[error("missing mount target")]
    MissingMountTarget,

    #[error("unknown tab: '{0}'")]
    UnknownTab(String),
}

impl CanvasError {
    /// Find a [`CanvasError`] anywhere in an `anyhow` error chain.
    pub fn find(err: &anyhow::Error) -> Option<&CanvasError> {
        err.chain().find_map(|cause| cause.downcast_ref::<CanvasError>())
    }
}
