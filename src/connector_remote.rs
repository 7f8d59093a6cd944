//! Delegated execution over HTTP.
//!
//! Sends the document to an execution service and normalizes its reply.
//!
//! # Protocol
//!
//! ```text
//! POST {base_url}/connections/{connection_id}/execute   (connection bound)
//! POST {base_url}/execute                               (otherwise)
//! Authorization: Bearer <api_key>
//!
//! { "title": "...", "language": "sql", "content": "..." }
//! ```
//!
//! Reply:
//!
//! ```text
//! { "output": "...", "error": null, "rows": 3 }
//! ```
//!
//! | Reply | Result |
//! |-------|--------|
//! | non-2xx status | `ExecutionBackend` with the response body |
//! | `error` set | `ExecutionBackend` with that message |
//! | client timeout | `ExecutionTimeout` |
//! | otherwise | success; `unit_count` is `rows`, or the output line count |
//!
//! The API key comes from the session credentials (`api_key`) when bound,
//! falling back to `remote.api_key` in the config.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use canvas_runtime_core::models::{ExecutionResult, ExecutionStats, LanguageSet};

use crate::config::RemoteConfig;
use crate::error::CanvasError;
use crate::session::CanvasSession;
use crate::traits::{Connector, ConnectorStatus, Credentials};

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    title: &'a str,
    language: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    rows: Option<u64>,
}

/// Forwards content to a remote execution service.
pub struct RemoteConnector {
    config: RemoteConfig,
    base: Url,
    client: reqwest::Client,
}

impl RemoteConnector {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("invalid remote.base_url '{}'", config.base_url))?;
        if base.cannot_be_a_base() {
            bail!("remote.base_url '{}' cannot carry a path", config.base_url);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            config,
            base,
            client,
        })
    }

    /// Endpoint for a run, scoped to `connection_id` when one is bound.
    ///
    /// The connection id is one percent-encoded path segment.
    pub fn endpoint(&self, connection_id: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            if let Some(id) = connection_id {
                segments.push("connections").push(id);
            }
            segments.push("execute");
        }
        url
    }

    fn api_key<'a>(&'a self, credentials: &'a Credentials) -> Option<&'a str> {
        credentials
            .get("api_key")
            .map(String::as_str)
            .or(self.config.api_key.as_deref())
    }
}

#[async_trait]
impl Connector for RemoteConnector {
    fn id(&self) -> &str {
        "remote"
    }

    fn name(&self) -> &str {
        "Remote execution"
    }

    fn languages(&self) -> &LanguageSet {
        &self.config.languages
    }

    fn requires_external_backend(&self) -> bool {
        true
    }

    fn credential_schema(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "type": "object",
            "properties": {
                "api_key": {
                    "type": "string",
                    "description": "Bearer token for the execution service"
                }
            }
        }))
    }

    async fn execute(
        &self,
        content: &str,
        credentials: &Credentials,
        session: &CanvasSession,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let url = self.endpoint(session.connection_id());
        let body = ExecuteRequest {
            title: &session.document.title,
            language: session.document.language.as_str(),
            content,
        };

        let mut request = self.client.post(url.clone()).json(&body);
        if let Some(key) = self.api_key(credentials) {
            request = request.bearer_auth(key);
        }

        tracing::debug!(%url, "dispatching to remote execution service");
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                return Err(CanvasError::ExecutionTimeout { elapsed_ms }.into());
            }
            Err(e) => return Err(e).with_context(|| format!("request to {} failed", url)),
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = if text.trim().is_empty() {
                format!("execution service returned {}", status)
            } else {
                text
            };
            return Err(CanvasError::ExecutionBackend(message).into());
        }

        let reply: ExecuteResponse = match response.json().await {
            Ok(reply) => reply,
            Err(e) if e.is_timeout() => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                return Err(CanvasError::ExecutionTimeout { elapsed_ms }.into());
            }
            Err(e) => return Err(e).context("invalid response from execution service"),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Some(error) = reply.error {
            return Err(CanvasError::ExecutionBackend(error).into());
        }

        let output = reply.output.unwrap_or_default();
        let unit_count = reply
            .rows
            .unwrap_or_else(|| output.lines().count() as u64);
        Ok(ExecutionResult::success(
            output,
            ExecutionStats {
                unit_count,
                time_ms: elapsed_ms,
            },
        ))
    }

    fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            id: self.id().to_string(),
            name: self.name().to_string(),
            languages: self.languages().clone(),
            requires_external_backend: true,
            healthy: true,
            notes: Some(self.config.base_url.clone()),
        }
    }
}
