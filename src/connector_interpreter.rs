//! Embedded foreign-language interpreter.
//!
//! Runs document content through an external interpreter process
//! (`python3` by default). The interpreter is resolved once per process
//! and shared by every run afterwards.
//!
//! # Interactive input
//!
//! Content that reads from the user (`input("Name? ")`) cannot prompt
//! mid-run. Before execution the content is scanned for `input(...)`
//! calls, the prompts are handed to an [`InputProvider`], and the
//! collected answers are piped to the child's stdin one per line. A
//! provider returning `None` means the user dismissed the prompt; the run
//! is abandoned with [`CanvasError::CancelledByUser`].
//!
//! # Streams
//!
//! stdout and stderr are captured separately. On success the result
//! output is stdout followed by any stderr text. On a non-zero exit the
//! stderr text becomes an [`CanvasError::ExecutionBackend`] message.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::{BufRead, Write};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;

use canvas_runtime_core::models::{ExecutionResult, ExecutionStats, LanguageSet};

use crate::config::InterpreterConfig;
use crate::error::CanvasError;
use crate::session::CanvasSession;
use crate::traits::{Connector, ConnectorStatus, Credentials};

// ═══════════════════════════════════════════════════════════════════════
// Input providers
// ═══════════════════════════════════════════════════════════════════════

/// Collects answers for interactive prompts before a run.
///
/// Called on a blocking thread. Return one answer per prompt, or `None`
/// if the user dismissed the request.
pub trait InputProvider: Send + Sync {
    fn collect(&self, prompts: &[String]) -> Option<Vec<String>>;
}

/// Answers prompts from a fixed list.
///
/// Fewer values than prompts counts as a dismissal.
#[derive(Debug, Clone, Default)]
pub struct StaticInputs {
    values: Option<Vec<String>>,
}

impl StaticInputs {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: Some(values.into_iter().map(Into::into).collect()),
        }
    }

    /// A provider that dismisses every request.
    pub fn dismissed() -> Self {
        Self { values: None }
    }
}

impl InputProvider for StaticInputs {
    fn collect(&self, prompts: &[String]) -> Option<Vec<String>> {
        let values = self.values.as_ref()?;
        if values.len() < prompts.len() {
            return None;
        }
        Some(values[..prompts.len()].to_vec())
    }
}

/// Asks on the controlling terminal: prompt on stderr, answer on stdin.
///
/// End of input dismisses the request.
#[derive(Debug, Default)]
pub struct TerminalInputProvider {
    lock: Mutex<()>,
}

impl TerminalInputProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputProvider for TerminalInputProvider {
    fn collect(&self, prompts: &[String]) -> Option<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let stdin = std::io::stdin();
        let mut answers = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let label = if prompt.is_empty() { "input" } else { prompt };
            eprint!("{} ", label.trim_end());
            let _ = std::io::stderr().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return None,
                Ok(_) => answers.push(line.trim_end_matches(['\r', '\n']).to_string()),
            }
        }
        Some(answers)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Prompt scanning
// ═══════════════════════════════════════════════════════════════════════

/// Find the prompts of every `input(...)` call in `content`, in order.
///
/// Calls inside comments and string literals are ignored, as are
/// attribute calls (`obj.input(`) and longer identifiers (`my_input(`).
/// A call without a literal prompt yields an empty string.
pub fn scan_input_prompts(content: &str) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    let mut prompts = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            i = skip_string(&chars, i);
            continue;
        }
        if is_ident_char(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let attribute = start > 0 && chars[start - 1] == '.';
            if word == "input" && !attribute {
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && chars[j] == '(' {
                    let (prompt, next) = read_prompt(&chars, j + 1);
                    prompts.push(prompt);
                    i = next;
                }
            }
            continue;
        }
        i += 1;
    }
    prompts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Skip the string literal opening at `start`. Returns the index after it.
fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let triple = chars.len() >= start + 3 && chars[start + 1] == quote && chars[start + 2] == quote;
    let mut i = if triple { start + 3 } else { start + 1 };
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if triple {
            if chars.len() >= i + 3 && chars[i] == quote && chars[i + 1] == quote && chars[i + 2] == quote {
                return i + 3;
            }
        } else if chars[i] == quote || chars[i] == '\n' {
            return i + 1;
        }
        i += 1;
    }
    i
}

/// Read the literal prompt argument starting after `input(`.
fn read_prompt(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    if i >= chars.len() || (chars[i] != '"' && chars[i] != '\'') {
        return (String::new(), i);
    }
    let quote = chars[i];
    let mut prompt = String::new();
    i += 1;
    while i < chars.len() && chars[i] != quote && chars[i] != '\n' {
        if chars[i] == '\\' && i + 1 < chars.len() {
            prompt.push(match chars[i + 1] {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            i += 2;
            continue;
        }
        prompt.push(chars[i]);
        i += 1;
    }
    (prompt, (i + 1).min(chars.len()))
}

// ═══════════════════════════════════════════════════════════════════════
// Connector trait implementation
// ═══════════════════════════════════════════════════════════════════════

/// Runs content through an external interpreter process.
pub struct InterpreterConnector {
    config: InterpreterConfig,
    timeout: Duration,
    input: Arc<dyn InputProvider>,
    /// `Ok(version)` or `Err(reason)`, resolved on first use.
    availability: OnceCell<std::result::Result<String, String>>,
}

impl InterpreterConnector {
    pub fn new(config: InterpreterConfig, input: Arc<dyn InputProvider>) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self {
            config,
            timeout,
            input,
            availability: OnceCell::new(),
        }
    }

    /// Override the configured time bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the interpreter once; later calls reuse the result.
    pub async fn ensure_ready(&self) -> Result<&str> {
        let availability = self
            .availability
            .get_or_init(|| async {
                let result = check_interpreter(&self.config.command).await;
                match &result {
                    Ok(version) => tracing::info!(command = %self.config.command, %version, "interpreter ready"),
                    Err(reason) => tracing::warn!(command = %self.config.command, %reason, "interpreter unavailable"),
                }
                result
            })
            .await;
        match availability {
            Ok(version) => Ok(version.as_str()),
            Err(reason) => Err(CanvasError::ExecutionBackend(format!(
                "interpreter '{}' is unavailable: {}",
                self.config.command, reason
            ))
            .into()),
        }
    }

    /// Spawn the interpreter on `content`, feed `stdin_lines`, and wait
    /// for it under the time bound.
    async fn run_process(&self, content: &str, stdin_lines: &[String]) -> Result<ExecutionResult> {
        let started = Instant::now();
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(content)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.config.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut payload = stdin_lines.join("\n");
            if !payload.is_empty() {
                payload.push('\n');
            }
            // Written off to the side so a child that never reads cannot
            // hold the write ahead of the time bound. The pipe closes when
            // the task ends or the child exits.
            tokio::spawn(async move {
                let _ = stdin.write_all(payload.as_bytes()).await;
            });
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.context("failed to wait for interpreter")?,
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(elapsed_ms, "interpreter exceeded its time bound, killed");
                return Err(CanvasError::ExecutionTimeout { elapsed_ms }.into());
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!("interpreter exited with {}", output.status)
            } else {
                stderr.trim_end().to_string()
            };
            return Err(CanvasError::ExecutionBackend(message).into());
        }

        let unit_count = stdout.lines().count() as u64;
        let mut text = stdout;
        text.push_str(&stderr);
        Ok(ExecutionResult::success(
            text,
            ExecutionStats {
                unit_count,
                time_ms: elapsed_ms,
            },
        ))
    }
}

async fn check_interpreter(command: &str) -> std::result::Result<String, String> {
    let output = Command::new(command)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(format!("'{} --version' exited with {}", command, output.status));
    }
    // Older interpreters print their version on stderr.
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    Ok(String::from_utf8_lossy(&text).trim().to_string())
}

#[async_trait]
impl Connector for InterpreterConnector {
    fn id(&self) -> &str {
        "interpreter"
    }

    fn name(&self) -> &str {
        &self.config.command
    }

    fn languages(&self) -> &LanguageSet {
        &self.config.languages
    }

    async fn execute(
        &self,
        content: &str,
        _credentials: &Credentials,
        _session: &CanvasSession,
    ) -> Result<ExecutionResult> {
        self.ensure_ready().await?;

        let prompts = scan_input_prompts(content);
        let answers = if prompts.is_empty() {
            Vec::new()
        } else {
            let provider = self.input.clone();
            let asked = prompts.clone();
            let collected = tokio::task::spawn_blocking(move || provider.collect(&asked))
                .await
                .context("input collection task failed")?;
            match collected {
                Some(answers) => answers,
                None => return Err(CanvasError::CancelledByUser.into()),
            }
        };

        self.run_process(content, &answers).await
    }

    fn status(&self) -> ConnectorStatus {
        let (healthy, notes) = match self.availability.get() {
            None => (true, Some("not started".to_string())),
            Some(Ok(version)) => (true, Some(version.clone())),
            Some(Err(reason)) => (false, Some(reason.clone())),
        };
        ConnectorStatus {
            id: self.id().to_string(),
            name: self.name().to_string(),
            languages: self.languages().clone(),
            requires_external_backend: false,
            healthy,
            notes,
        }
    }
}
