//! Core data models shared by the diff engine, version history, and the
//! plugin runtime.
//!
//! These types describe the documents that flow into the workspace, the
//! immutable revisions recorded for them, and the normalized execution
//! result envelope returned by every connector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ═══════════════════════════════════════════════════════════════════════
// Languages
// ═══════════════════════════════════════════════════════════════════════

/// Content language understood by capability and connector filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Sql,
    Lua,
    Html,
    Css,
    Markdown,
    Json,
    Yaml,
    Shell,
    Svg,
    Mermaid,
    Rust,
    Text,
}

impl Language {
    /// All languages, in declaration order.
    pub const ALL: [Language; 15] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Sql,
        Language::Lua,
        Language::Html,
        Language::Css,
        Language::Markdown,
        Language::Json,
        Language::Yaml,
        Language::Shell,
        Language::Svg,
        Language::Mermaid,
        Language::Rust,
        Language::Text,
    ];

    /// Canonical lowercase name (e.g. `"python"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Sql => "sql",
            Language::Lua => "lua",
            Language::Html => "html",
            Language::Css => "css",
            Language::Markdown => "markdown",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Shell => "shell",
            Language::Svg => "svg",
            Language::Mermaid => "mermaid",
            Language::Rust => "rust",
            Language::Text => "text",
        }
    }

    /// File extension used when a presented document does not carry one.
    pub fn default_extension(self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::TypeScript => "ts",
            Language::Sql => "sql",
            Language::Lua => "lua",
            Language::Html => "html",
            Language::Css => "css",
            Language::Markdown => "md",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Shell => "sh",
            Language::Svg => "svg",
            Language::Mermaid => "mmd",
            Language::Rust => "rs",
            Language::Text => "txt",
        }
    }

    /// Parse a language name, falling back to [`Language::Text`] for
    /// anything unrecognized.
    pub fn parse_lossy(name: &str) -> Language {
        name.parse().unwrap_or(Language::Text)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lang = match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Language::Python,
            "javascript" | "js" => Language::JavaScript,
            "typescript" | "ts" => Language::TypeScript,
            "sql" => Language::Sql,
            "lua" => Language::Lua,
            "html" | "htm" => Language::Html,
            "css" => Language::Css,
            "markdown" | "md" => Language::Markdown,
            "json" => Language::Json,
            "yaml" | "yml" => Language::Yaml,
            "shell" | "sh" | "bash" => Language::Shell,
            "svg" => Language::Svg,
            "mermaid" | "mmd" => Language::Mermaid,
            "rust" | "rs" => Language::Rust,
            "text" | "txt" | "plaintext" => Language::Text,
            other => anyhow::bail!("unknown language: '{}'", other),
        };
        Ok(lang)
    }
}

/// The set of languages a capability or connector applies to.
///
/// Serialized as `"*"` for the wildcard or as a list of language names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageSet {
    /// Matches every language.
    Any,
    /// Matches only the listed languages.
    Only(Vec<Language>),
}

impl LanguageSet {
    /// Build a set from a list of languages.
    pub fn only(languages: impl IntoIterator<Item = Language>) -> Self {
        LanguageSet::Only(languages.into_iter().collect())
    }

    /// Returns `true` if `language` is in the set or the set is the wildcard.
    pub fn matches(&self, language: Language) -> bool {
        match self {
            LanguageSet::Any => true,
            LanguageSet::Only(langs) => langs.contains(&language),
        }
    }

    /// Returns `true` for the wildcard set.
    pub fn is_any(&self) -> bool {
        matches!(self, LanguageSet::Any)
    }
}

impl fmt::Display for LanguageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LanguageSet::Any => f.write_str("*"),
            LanguageSet::Only(langs) => {
                let names: Vec<&str> = langs.iter().map(|l| l.as_str()).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

impl Serialize for LanguageSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LanguageSet::Any => serializer.serialize_str("*"),
            LanguageSet::Only(langs) => langs.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for LanguageSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Single(String),
            List(Vec<String>),
        }

        let names = match Raw::deserialize(deserializer)? {
            Raw::Single(s) if s.trim() == "*" => return Ok(LanguageSet::Any),
            Raw::Single(s) => vec![s],
            Raw::List(list) => list,
        };
        if names.iter().any(|n| n.trim() == "*") {
            return Ok(LanguageSet::Any);
        }
        names
            .iter()
            .map(|n| n.parse::<Language>().map_err(serde::de::Error::custom))
            .collect::<Result<Vec<_>, _>>()
            .map(LanguageSet::Only)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Documents and versions
// ═══════════════════════════════════════════════════════════════════════

/// A document presented to the workspace by the surrounding chat layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub language: Language,
    pub content: String,
    pub file_extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_ref: Option<String>,
}

impl Document {
    /// Create a document, deriving the file extension from the language.
    pub fn new(title: impl Into<String>, language: Language, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            language,
            content: content.into(),
            file_extension: language.default_extension().to_string(),
            sources_ref: None,
        }
    }

    /// Override the file extension (a leading `.` is stripped).
    pub fn with_extension(mut self, ext: &str) -> Self {
        self.file_extension = ext.trim_start_matches('.').to_string();
        self
    }

    /// Attach an opaque reference to the sources this document was built from.
    pub fn with_sources_ref(mut self, sources_ref: impl Into<String>) -> Self {
        self.sources_ref = Some(sources_ref.into());
        self
    }

    /// Number of lines in the content (an empty document has one line).
    pub fn line_count(&self) -> usize {
        self.content.split('\n').count()
    }
}

/// One immutable snapshot of a document's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub content: String,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
    /// Global turn index, shared across all documents.
    pub ordinal: u64,
}

// ═══════════════════════════════════════════════════════════════════════
// Diff operations
// ═══════════════════════════════════════════════════════════════════════

/// A single line-level edit operation. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DiffOp {
    Equal {
        text: String,
        old_line: usize,
        new_line: usize,
    },
    Added {
        text: String,
        new_line: usize,
    },
    Removed {
        text: String,
        old_line: usize,
    },
}

impl DiffOp {
    /// The line text carried by this operation.
    pub fn text(&self) -> &str {
        match self {
            DiffOp::Equal { text, .. } | DiffOp::Added { text, .. } | DiffOp::Removed { text, .. } => {
                text
            }
        }
    }

    pub fn is_equal(&self) -> bool {
        matches!(self, DiffOp::Equal { .. })
    }
}

/// Summary counts over a list of [`DiffOp`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl DiffStats {
    /// Returns `true` when the diff contains no additions or removals.
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Execution results
// ═══════════════════════════════════════════════════════════════════════

/// Counters attached to every execution result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Output lines, result rows, or whatever unit the connector counts.
    pub unit_count: u64,
    /// Wall-clock time spent executing, in milliseconds.
    pub time_ms: u64,
}

/// The normalized envelope returned for a "run" request.
///
/// Exactly one of `output` and `error` is set. The constructors are the
/// only way to build one, which keeps that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    output: Option<String>,
    error: Option<String>,
    pub stats: ExecutionStats,
}

impl ExecutionResult {
    /// A successful result.
    pub fn success(output: impl Into<String>, stats: ExecutionStats) -> Self {
        Self {
            output: Some(output.into()),
            error: None,
            stats,
        }
    }

    /// A failed result carrying a user-visible message.
    pub fn failure(error: impl Into<String>, stats: ExecutionStats) -> Self {
        Self {
            output: None,
            error: Some(error.into()),
            stats,
        }
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.output.is_some()
    }
}
