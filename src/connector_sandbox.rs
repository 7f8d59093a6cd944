//! Isolated in-process execution of Lua content.
//!
//! Each run spawns a fresh, sandboxed Lua 5.4 VM on a dedicated thread,
//! hands it the content, and waits for exactly one of output, error, or
//! timeout. The VM and its thread are discarded afterwards.
//!
//! # Termination
//!
//! Untrusted content cannot be expected to check a cancellation flag, so
//! termination is forced from outside the script:
//!
//! - an instruction hook aborts the VM once the deadline passes or the
//!   host sets the cancel flag;
//! - the host races the result channel against [`tokio::time::timeout`]
//!   and reports [`CanvasError::ExecutionTimeout`] as soon as the bound
//!   elapses, whether or not the VM has unwound yet;
//! - the VM runs on its own detached thread, so a script stuck inside a C
//!   function (pattern backtracking, say) is abandoned and does not keep
//!   the process alive.
//!
//! The VM heap is capped with `Lua::set_memory_limit`; exceeding it is a
//! backend error.
//!
//! # Output
//!
//! Everything passed to `print` is captured. A non-nil value returned by
//! the chunk is appended as JSON. `unit_count` is the number of output
//! lines.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mlua::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use canvas_runtime_core::models::{ExecutionResult, ExecutionStats, Language, LanguageSet};

use crate::config::SandboxConfig;
use crate::error::CanvasError;
use crate::lua_runtime::{register_all_host_apis, to_json, OutputBuffer};
use crate::session::CanvasSession;
use crate::traits::{Connector, Credentials};

/// Resource limits for one sandboxed run.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub instruction_check_interval: u32,
    pub max_output_bytes: usize,
    /// Allocation ceiling for the VM heap.
    pub max_memory_bytes: usize,
}

impl From<&SandboxConfig> for SandboxLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            instruction_check_interval: config.instruction_check_interval,
            max_output_bytes: config.max_output_bytes,
            max_memory_bytes: config.max_memory_bytes,
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Connector trait implementation
// ═══════════════════════════════════════════════════════════════════════

/// Runs Lua documents in an isolated, time-bounded VM.
pub struct LuaSandboxConnector {
    limits: SandboxLimits,
    languages: LanguageSet,
}

impl LuaSandboxConnector {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            limits,
            languages: LanguageSet::only([Language::Lua]),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(SandboxLimits::from(config))
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }
}

#[async_trait]
impl Connector for LuaSandboxConnector {
    fn id(&self) -> &str {
        "lua-sandbox"
    }

    fn name(&self) -> &str {
        "Lua sandbox"
    }

    fn languages(&self) -> &LanguageSet {
        &self.languages
    }

    async fn execute(
        &self,
        content: &str,
        _credentials: &Credentials,
        session: &CanvasSession,
    ) -> Result<ExecutionResult> {
        let name = format!("sandbox:{}", session.document.title);
        run_sandboxed(content, &name, &self.limits).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════

/// Run `source` in a fresh sandbox and wait for its single result.
pub async fn run_sandboxed(
    source: &str,
    name: &str,
    limits: &SandboxLimits,
) -> Result<ExecutionResult> {
    let (tx, rx) = oneshot::channel();
    let cancel = Arc::new(AtomicBool::new(false));
    let started = Instant::now();

    let source = source.to_string();
    let name = name.to_string();
    let task_limits = limits.clone();
    let task_cancel = cancel.clone();
    // Detached: a VM stuck inside a C function never reaches the hook and
    // must not hold up runtime shutdown.
    std::thread::Builder::new()
        .name("canvas-sandbox".to_string())
        .spawn(move || {
            let result = run_lua_chunk(&source, &name, &task_limits, started, &task_cancel);
            // The receiver is gone if the host already timed out.
            let _ = tx.send(result);
        })
        .context("failed to start sandbox thread")?;

    match tokio::time::timeout(limits.timeout, rx).await {
        Ok(received) => received.context("sandbox task ended without a result")?,
        Err(_) => {
            cancel.store(true, Ordering::SeqCst);
            let elapsed_ms = started.elapsed().as_millis() as u64;
            tracing::warn!(elapsed_ms, "sandbox exceeded its time bound, terminating");
            Err(CanvasError::ExecutionTimeout { elapsed_ms }.into())
        }
    }
}

/// Run the Lua chunk synchronously on a blocking thread.
fn run_lua_chunk(
    source: &str,
    name: &str,
    limits: &SandboxLimits,
    started: Instant,
    cancel: &Arc<AtomicBool>,
) -> Result<ExecutionResult> {
    let lua = Lua::new();

    let deadline = started + limits.timeout;
    let hook_cancel = cancel.clone();
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(limits.instruction_check_interval),
        move |_lua, _debug| {
            if hook_cancel.load(Ordering::SeqCst) || Instant::now() > deadline {
                Err(mlua::Error::RuntimeError(
                    "sandbox deadline exceeded".to_string(),
                ))
            } else {
                Ok(mlua::VmState::Continue)
            }
        },
    );

    lua.set_memory_limit(limits.max_memory_bytes)
        .map_err(|e| anyhow::anyhow!("failed to limit sandbox memory: {}", e))?;

    let output = OutputBuffer::new(limits.max_output_bytes);
    register_all_host_apis(&lua, name, &output)
        .map_err(|e| anyhow::anyhow!("failed to prepare sandbox: {}", e))?;

    let returned = lua.load(source).set_name(name).eval::<LuaValue>();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let returned = match returned {
        Ok(value) => value,
        Err(_) if cancel.load(Ordering::SeqCst) || Instant::now() > deadline => {
            return Err(CanvasError::ExecutionTimeout { elapsed_ms }.into());
        }
        Err(e) => return Err(CanvasError::ExecutionBackend(e.to_string()).into()),
    };

    let (mut text, truncated) = output.take();
    if !matches!(returned, LuaValue::Nil) {
        let json = to_json(&lua, returned)
            .map_err(|e| anyhow::anyhow!("failed to convert returned value: {}", e))?;
        text.push_str(&json.to_string());
        text.push('\n');
    }
    if truncated {
        text.push_str("[output truncated]\n");
    }

    let stats = ExecutionStats {
        unit_count: text.lines().count() as u64,
        time_ms: elapsed_ms,
    };
    Ok(ExecutionResult::success(text, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(timeout_ms: u64) -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_millis(timeout_ms),
            instruction_check_interval: 1_000,
            max_output_bytes: 4096,
            max_memory_bytes: 16 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn test_captures_print_output() {
        let result = run_sandboxed("print('hello')\nprint(1 + 2)", "t", &limits(2_000))
            .await
            .unwrap();
        assert_eq!(result.output(), Some("hello\n3\n"));
        assert_eq!(result.stats.unit_count, 2);
    }

    #[tokio::test]
    async fn test_returned_value_is_appended() {
        let result = run_sandboxed("return { ok = true }", "t", &limits(2_000))
            .await
            .unwrap();
        assert_eq!(result.output(), Some("{\"ok\":true}\n"));
    }

    #[tokio::test]
    async fn test_runtime_error_is_backend_error() {
        let err = run_sandboxed("error('nope')", "t", &limits(2_000))
            .await
            .unwrap_err();
        match CanvasError::find(&err) {
            Some(CanvasError::ExecutionBackend(msg)) => assert!(msg.contains("nope")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let started = Instant::now();
        let err = run_sandboxed("while true do end", "t", &limits(300))
            .await
            .unwrap_err();
        match CanvasError::find(&err) {
            Some(CanvasError::ExecutionTimeout { elapsed_ms }) => {
                assert!(*elapsed_ms >= 300, "elapsed {}", elapsed_ms);
                assert!(*elapsed_ms < 2_000, "elapsed {}", elapsed_ms);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_sandbox_has_no_os_access() {
        let err = run_sandboxed("return os.getenv('HOME')", "t", &limits(2_000))
            .await
            .unwrap_err();
        assert!(matches!(
            CanvasError::find(&err),
            Some(CanvasError::ExecutionBackend(_))
        ));
    }
}
