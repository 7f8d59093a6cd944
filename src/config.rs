//! Configuration parsing and validation.
//!
//! Canvas Runtime is configured via a TOML file (default: `config/canvas.toml`).
//! Every section is optional; omitted values fall back to the defaults below.
//!
//! # Example
//!
//! ```toml
//! [sandbox]
//! timeout_secs = 10
//!
//! [interpreter]
//! command = "python3"
//! args = ["-u", "-c"]
//! languages = ["python"]
//!
//! [remote]
//! base_url = "http://127.0.0.1:8700"
//! api_key = "${CANVAS_REMOTE_KEY}"
//! languages = ["sql"]
//!
//! [animation]
//! target_ms = 1200
//!
//! [connections."quarterly report"]
//! connector = "remote"
//! connection = "warehouse"
//! ```
//!
//! String values support `${VAR}` expansion from the process environment.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use canvas_runtime_core::models::{Language, LanguageSet};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "./config/canvas.toml";

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub animation: AnimationConfig,
    /// Pre-seeded connection selections keyed by document title.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

/// Limits for the in-process Lua sandbox.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    /// How many VM instructions run between deadline checks.
    #[serde(default = "default_instruction_interval")]
    pub instruction_check_interval: u32,
    /// Captured output beyond this many bytes is dropped.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Heap ceiling for one VM.
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sandbox_timeout(),
            instruction_check_interval: default_instruction_interval(),
            max_output_bytes: default_max_output_bytes(),
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

fn default_sandbox_timeout() -> u64 {
    10
}
fn default_instruction_interval() -> u32 {
    10_000
}
fn default_max_output_bytes() -> usize {
    1024 * 1024
}
fn default_max_memory_bytes() -> usize {
    64 * 1024 * 1024
}

/// The embedded foreign-language interpreter.
#[derive(Debug, Deserialize, Clone)]
pub struct InterpreterConfig {
    #[serde(default = "default_interpreter_command")]
    pub command: String,
    #[serde(default = "default_interpreter_args")]
    pub args: Vec<String>,
    #[serde(default = "default_interpreter_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_interpreter_languages")]
    pub languages: LanguageSet,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            command: default_interpreter_command(),
            args: default_interpreter_args(),
            timeout_secs: default_interpreter_timeout(),
            languages: default_interpreter_languages(),
        }
    }
}

fn default_interpreter_command() -> String {
    "python3".to_string()
}
fn default_interpreter_args() -> Vec<String> {
    vec!["-u".to_string(), "-c".to_string()]
}
fn default_interpreter_timeout() -> u64 {
    30
}
fn default_interpreter_languages() -> LanguageSet {
    LanguageSet::only([Language::Python])
}

/// A delegated execution service reached over HTTP.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_remote_languages")]
    pub languages: LanguageSet,
}

fn default_remote_timeout() -> u64 {
    30
}
fn default_remote_languages() -> LanguageSet {
    LanguageSet::only([Language::Sql])
}

/// Pacing for the live-insertion animation.
#[derive(Debug, Deserialize, Clone)]
pub struct AnimationConfig {
    /// Total time the animation aims to take, regardless of size.
    #[serde(default = "default_target_ms")]
    pub target_ms: u64,
    /// Documents up to this many lines are revealed one line at a time.
    #[serde(default = "default_small_document_lines")]
    pub small_document_lines: usize,
    #[serde(default = "default_min_line_delay")]
    pub min_line_delay_ms: u64,
    #[serde(default = "default_max_line_delay")]
    pub max_line_delay_ms: u64,
    /// Fixed delay between batches for large documents.
    #[serde(default = "default_large_batch_delay")]
    pub large_batch_delay_ms: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            target_ms: default_target_ms(),
            small_document_lines: default_small_document_lines(),
            min_line_delay_ms: default_min_line_delay(),
            max_line_delay_ms: default_max_line_delay(),
            large_batch_delay_ms: default_large_batch_delay(),
        }
    }
}

fn default_target_ms() -> u64 {
    1200
}
fn default_small_document_lines() -> usize {
    40
}
fn default_min_line_delay() -> u64 {
    15
}
fn default_max_line_delay() -> u64 {
    80
}
fn default_large_batch_delay() -> u64 {
    16
}

/// A pre-seeded connection selection for one document title.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    pub connector: String,
    #[serde(default)]
    pub connection: Option<String>,
}

/// Load and validate a configuration file.
///
/// A missing file at [`DEFAULT_CONFIG_PATH`] yields [`Config::default`];
/// a missing file anywhere else is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse, expand, and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config file")?;

    if let Some(remote) = config.remote.as_mut() {
        remote.base_url = expand_env_vars(&remote.base_url);
        remote.api_key = remote.api_key.as_deref().map(expand_env_vars);
    }
    config.interpreter.command = expand_env_vars(&config.interpreter.command);

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.sandbox.timeout_secs == 0 {
        bail!("sandbox.timeout_secs must be > 0");
    }
    if config.sandbox.instruction_check_interval == 0 {
        bail!("sandbox.instruction_check_interval must be > 0");
    }
    if config.sandbox.max_memory_bytes < 1024 * 1024 {
        bail!("sandbox.max_memory_bytes must be at least 1 MiB");
    }
    if config.interpreter.command.trim().is_empty() {
        bail!("interpreter.command must not be empty");
    }
    if config.interpreter.timeout_secs == 0 {
        bail!("interpreter.timeout_secs must be > 0");
    }

    if let Some(remote) = &config.remote {
        if !(remote.base_url.starts_with("http://") || remote.base_url.starts_with("https://")) {
            bail!(
                "remote.base_url must be an http(s) URL, got '{}'",
                remote.base_url
            );
        }
        if remote.timeout_secs == 0 {
            bail!("remote.timeout_secs must be > 0");
        }
    }

    let anim = &config.animation;
    if anim.target_ms == 0 {
        bail!("animation.target_ms must be > 0");
    }
    if anim.min_line_delay_ms > anim.max_line_delay_ms {
        bail!(
            "animation.min_line_delay_ms ({}) must not exceed animation.max_line_delay_ms ({})",
            anim.min_line_delay_ms,
            anim.max_line_delay_ms
        );
    }
    if anim.large_batch_delay_ms == 0 {
        bail!("animation.large_batch_delay_ms must be > 0");
    }

    for (title, conn) in &config.connections {
        if conn.connector.trim().is_empty() {
            bail!("connections.\"{}\".connector must not be empty", title);
        }
    }

    Ok(())
}

/// Expand `${VAR_NAME}` patterns in a string from the process environment.
///
/// Substituted values are inserted as-is and never expanded again. An
/// unterminated `${` is kept literally.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + 2 + len];
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + 2 + len + 1..];
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.sandbox.timeout_secs, 10);
        assert_eq!(config.interpreter.command, "python3");
        assert!(config.interpreter.languages.matches(Language::Python));
        assert!(config.remote.is_none());
        assert_eq!(config.animation.target_ms, 1200);
    }

    #[test]
    fn test_full_config() {
        let config = parse_config(
            r#"
[sandbox]
timeout_secs = 2

[remote]
base_url = "http://127.0.0.1:9999"
languages = ["sql", "json"]

[animation]
target_ms = 500
min_line_delay_ms = 5
max_line_delay_ms = 40

[connections."Sales Report"]
connector = "remote"
connection = "warehouse"
"#,
        )
        .unwrap();

        assert_eq!(config.sandbox.timeout_secs, 2);
        let remote = config.remote.unwrap();
        assert!(remote.languages.matches(Language::Json));
        assert_eq!(remote.timeout_secs, 30);
        assert_eq!(
            config.connections["Sales Report"].connection.as_deref(),
            Some("warehouse")
        );
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/canvas.example.toml")).unwrap();
        assert_eq!(config.interpreter.args, vec!["-u", "-c"]);
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_validation_errors() {
        assert!(parse_config("[sandbox]\ntimeout_secs = 0").is_err());
        assert!(parse_config("[remote]\nbase_url = \"ftp://x\"").is_err());
        assert!(
            parse_config("[animation]\nmin_line_delay_ms = 90\nmax_line_delay_ms = 10").is_err()
        );
        assert!(parse_config("[connections.t]\nconnector = \"  \"").is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("CANVAS_TEST_EXPAND", "secret");
        assert_eq!(expand_env_vars("key=${CANVAS_TEST_EXPAND}!"), "key=secret!");
        assert_eq!(expand_env_vars("${CANVAS_TEST_UNSET_VAR}"), "");
        assert_eq!(expand_env_vars("no vars"), "no vars");
        assert_eq!(expand_env_vars("open ${NEVER_CLOSED"), "open ${NEVER_CLOSED");
    }

    #[test]
    fn test_expanded_values_are_not_rescanned() {
        std::env::set_var("CANVAS_TEST_SELF_REF", "x${CANVAS_TEST_SELF_REF}");
        std::env::set_var("CANVAS_TEST_INNER", "inner");
        std::env::set_var("CANVAS_TEST_OUTER", "${CANVAS_TEST_INNER}");
        assert_eq!(
            expand_env_vars("${CANVAS_TEST_SELF_REF}!"),
            "x${CANVAS_TEST_SELF_REF}!"
        );
        assert_eq!(
            expand_env_vars("${CANVAS_TEST_OUTER}/${CANVAS_TEST_INNER}"),
            "${CANVAS_TEST_INNER}/inner"
        );
    }

    #[test]
    fn test_sandbox_memory_floor() {
        assert_eq!(parse_config("").unwrap().sandbox.max_memory_bytes, 64 * 1024 * 1024);
        assert!(parse_config("[sandbox]\nmax_memory_bytes = 1024").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canvas.toml");
        std::fs::write(&path, "[sandbox]\ntimeout_secs = 3\n").unwrap();
        assert_eq!(load_config(&path).unwrap().sandbox.timeout_secs, 3);
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
