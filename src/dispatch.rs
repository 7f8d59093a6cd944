//! Routing of "run" requests to a connector.
//!
//! [`execute_via_connector`] resolves the connector for the session's
//! language, calls it, and folds every failure into an
//! [`ExecutionResult`]. Nothing here unwinds the session: the caller
//! always gets a structured result, except for a dismissed input prompt,
//! which is reported as [`RunOutcome::Cancelled`] and shown as nothing.

use std::sync::Arc;
use std::time::Instant;

use canvas_runtime_core::models::{ExecutionResult, ExecutionStats};

use crate::error::CanvasError;
use crate::session::CanvasSession;
use crate::traits::{Connector, ConnectorRegistry};

/// What a run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished(ExecutionResult),
    /// The user dismissed an input prompt. Not an error.
    Cancelled,
}

impl RunOutcome {
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            RunOutcome::Finished(result) => Some(result),
            RunOutcome::Cancelled => None,
        }
    }
}

/// Pick the connector a run of `session` would use.
///
/// A bound connector wins if it accepts the document's language;
/// otherwise the first registered match.
pub fn resolve_connector(
    registry: &ConnectorRegistry,
    session: &CanvasSession,
) -> Option<Arc<dyn Connector>> {
    let language = session.document.language;
    session
        .connector_binding
        .as_ref()
        .and_then(|binding| registry.get(&binding.connector_id))
        .filter(|connector| connector.languages().matches(language))
        .or_else(|| registry.connector_for_language(language))
}

/// Run the session's live content through its connector.
pub async fn execute_via_connector(
    registry: &ConnectorRegistry,
    session: &CanvasSession,
) -> RunOutcome {
    let language = session.document.language;
    let Some(connector) = resolve_connector(registry, session) else {
        let err = CanvasError::NoConnectorAvailable { language };
        tracing::info!(title = %session.document.title, %language, "{}", err);
        return RunOutcome::Finished(ExecutionResult::failure(
            err.to_string(),
            ExecutionStats::default(),
        ));
    };

    let content = session.content();
    let credentials = session.credentials();
    let started = Instant::now();
    tracing::info!(
        connector = %connector.id(),
        title = %session.document.title,
        %language,
        "executing"
    );

    match connector.execute(&content, &credentials, session).await {
        Ok(result) => {
            tracing::debug!(
                connector = %connector.id(),
                unit_count = result.stats.unit_count,
                time_ms = result.stats.time_ms,
                "execution finished"
            );
            RunOutcome::Finished(result)
        }
        Err(err) => classify_failure(connector.id(), &err, started),
    }
}

fn classify_failure(connector: &str, err: &anyhow::Error, started: Instant) -> RunOutcome {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let classified = CanvasError::find(err);
    match classified {
        Some(CanvasError::CancelledByUser) => {
            tracing::debug!(%connector, "run cancelled by user");
            RunOutcome::Cancelled
        }
        Some(CanvasError::ExecutionTimeout { elapsed_ms }) => {
            tracing::warn!(%connector, elapsed_ms = *elapsed_ms, "execution timed out");
            RunOutcome::Finished(ExecutionResult::failure(
                classified.map(ToString::to_string).unwrap_or_default(),
                ExecutionStats {
                    unit_count: 0,
                    time_ms: *elapsed_ms,
                },
            ))
        }
        Some(CanvasError::ExecutionBackend(message)) => {
            tracing::info!(%connector, "backend rejected content");
            RunOutcome::Finished(ExecutionResult::failure(
                message.clone(),
                ExecutionStats {
                    unit_count: 0,
                    time_ms: elapsed_ms,
                },
            ))
        }
        _ => {
            tracing::error!(%connector, error = %format!("{:#}", err), "execution failed");
            RunOutcome::Finished(ExecutionResult::failure(
                format!("{:#}", err),
                ExecutionStats {
                    unit_count: 0,
                    time_ms: elapsed_ms,
                },
            ))
        }
    }
}
