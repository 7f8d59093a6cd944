//! Live state for one open document.
//!
//! A [`CanvasSession`] owns everything a mounted canvas needs between
//! lifecycle events: the document, the version pointer, the connector
//! binding, the shared editor buffer, and per-capability state.
//!
//! Content authority lives in [`LiveContent`]: the editor text while an
//! editor is attached, otherwise the last static content. A
//! [`SummaryView`] shown elsewhere holds a clone of that getter instead of
//! a copy of the text, so it always sees edits made in the full view.

use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use canvas_runtime_core::history::{normalize_title, RecordOutcome};
use canvas_runtime_core::models::{Document, Language};

use crate::config::Config;
use crate::traits::Credentials;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ═══════════════════════════════════════════════════════════════════════
// Editor buffer
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct EditorBuffer {
    text: String,
    line_count: usize,
    read_only: bool,
    scroll_line: usize,
    user_scrolled: bool,
}

impl EditorBuffer {
    fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
        self.line_count = text.split('\n').count();
    }
}

/// Shared handle to the editing surface's text buffer.
///
/// Created by the editor capability during `init` and read by everything
/// that needs the live content.
#[derive(Debug, Clone, Default)]
pub struct EditorHandle {
    inner: Arc<RwLock<EditorBuffer>>,
}

impl EditorHandle {
    pub fn new(text: &str) -> Self {
        let handle = Self::default();
        write(&handle.inner).set_text(text);
        handle
    }

    pub fn text(&self) -> String {
        read(&self.inner).text.clone()
    }

    /// Replace the whole buffer. Ignored while read-only; returns whether
    /// the edit was applied.
    pub fn edit(&self, text: &str) -> bool {
        let mut buf = write(&self.inner);
        if buf.read_only {
            return false;
        }
        buf.set_text(text);
        true
    }

    /// Replace the buffer regardless of the read-only flag.
    pub(crate) fn set_text(&self, text: &str) {
        write(&self.inner).set_text(text);
    }

    /// Empty the buffer ahead of a live insertion.
    pub(crate) fn begin_insertion(&self) {
        let mut buf = write(&self.inner);
        buf.text.clear();
        buf.line_count = 0;
        buf.scroll_line = 0;
        buf.user_scrolled = false;
    }

    /// Append whole lines to the end of the buffer.
    pub(crate) fn append_lines(&self, lines: &[String]) {
        let mut buf = write(&self.inner);
        for line in lines {
            if buf.line_count > 0 {
                buf.text.push('\n');
            }
            buf.text.push_str(line);
            buf.line_count += 1;
        }
    }

    pub fn line_count(&self) -> usize {
        read(&self.inner).line_count
    }

    pub fn is_read_only(&self) -> bool {
        read(&self.inner).read_only
    }

    pub(crate) fn set_read_only(&self, read_only: bool) {
        write(&self.inner).read_only = read_only;
    }

    /// Programmatic scroll (auto-scroll during insertion).
    pub(crate) fn scroll_to(&self, line: usize) {
        write(&self.inner).scroll_line = line;
    }

    /// A scroll initiated by the user. Disengages auto-scroll for the
    /// remainder of a running insertion.
    pub fn user_scroll(&self, line: usize) {
        let mut buf = write(&self.inner);
        buf.scroll_line = line;
        buf.user_scrolled = true;
    }

    pub fn scroll_line(&self) -> usize {
        read(&self.inner).scroll_line
    }

    pub(crate) fn user_has_scrolled(&self) -> bool {
        read(&self.inner).user_scrolled
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Content authority
// ═══════════════════════════════════════════════════════════════════════

/// Getter resolving to the live editor text if one is attached, else the
/// last known static content.
#[derive(Debug, Clone)]
pub struct LiveContent {
    editor: Arc<RwLock<Option<EditorHandle>>>,
    fallback: Arc<RwLock<String>>,
}

impl LiveContent {
    pub fn new(content: &str) -> Self {
        Self {
            editor: Arc::new(RwLock::new(None)),
            fallback: Arc::new(RwLock::new(content.to_string())),
        }
    }

    /// Current authoritative content.
    pub fn get(&self) -> String {
        match read(&self.editor).as_ref() {
            Some(editor) => editor.text(),
            None => read(&self.fallback).clone(),
        }
    }

    fn attach(&self, editor: EditorHandle) {
        *write(&self.editor) = Some(editor);
    }

    /// Detach the editor, keeping its final text as the static content.
    fn detach(&self) -> Option<EditorHandle> {
        let editor = write(&self.editor).take();
        if let Some(ref e) = editor {
            *write(&self.fallback) = e.text();
        }
        editor
    }

    fn editor(&self) -> Option<EditorHandle> {
        read(&self.editor).clone()
    }

    fn set_static(&self, content: &str) {
        *write(&self.fallback) = content.to_string();
    }
}

/// Reduced, read-only presentation of a document shown alongside the
/// full canvas.
#[derive(Debug, Clone)]
pub struct SummaryView {
    pub title: String,
    pub language: Language,
    initial_content: String,
    live: LiveContent,
}

impl SummaryView {
    /// Content as the full view currently has it.
    pub fn content(&self) -> String {
        self.live.get()
    }

    /// Whether the content changed since the summary was first shown.
    pub fn is_modified(&self) -> bool {
        self.live.get() != self.initial_content
    }

    /// First line of the content, for compact display.
    pub fn headline(&self) -> String {
        self.live.get().lines().next().unwrap_or_default().to_string()
    }
}

/// Answer to the agent layer's "what is open right now" query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSnapshot {
    pub title: String,
    pub language: Language,
    pub content: String,
    pub modified: bool,
}

// ═══════════════════════════════════════════════════════════════════════
// Connection selections
// ═══════════════════════════════════════════════════════════════════════

/// Which connector, named connection, and credentials a document runs with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionBinding {
    pub connector_id: String,
    pub connection_id: Option<String>,
    pub credentials: Credentials,
}

impl ConnectionBinding {
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            ..Default::default()
        }
    }

    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }
}

/// Process-wide map from normalized document title to its chosen
/// [`ConnectionBinding`], so a selection survives across turns.
#[derive(Debug, Default)]
pub struct ConnectionSelections {
    inner: RwLock<HashMap<String, ConnectionBinding>>,
}

impl ConnectionSelections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed selections from `[connections.<title>]` config entries.
    pub fn from_config(config: &Config) -> Self {
        let selections = Self::new();
        for (title, conn) in &config.connections {
            let mut binding = ConnectionBinding::new(conn.connector.clone());
            binding.connection_id = conn.connection.clone();
            selections.select(title, binding);
        }
        selections
    }

    pub fn select(&self, title: &str, binding: ConnectionBinding) {
        write(&self.inner).insert(normalize_title(title), binding);
    }

    pub fn get(&self, title: &str) -> Option<ConnectionBinding> {
        read(&self.inner).get(&normalize_title(title)).cloned()
    }

    pub fn clear(&self, title: &str) -> Option<ConnectionBinding> {
        write(&self.inner).remove(&normalize_title(title))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════

/// The mounted state of one document instance.
pub struct CanvasSession {
    pub id: Uuid,
    pub document: Document,
    /// 1-based position of the version this session was opened at.
    pub version_number: usize,
    /// Content of the version before it, if any.
    pub previous_content: Option<String>,
    pub connector_binding: Option<ConnectionBinding>,
    /// Id of the active tab, mirrored from the tab state machine.
    pub active_tab: Option<String>,
    /// Ids of capabilities whose `init` succeeded, in order.
    pub capability_instances: Vec<String>,
    initial_content: String,
    live: LiveContent,
    state: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl CanvasSession {
    /// Create a session for `document` at the version described by `outcome`.
    pub fn new(document: Document, outcome: &RecordOutcome) -> Self {
        let live = LiveContent::new(&document.content);
        Self {
            id: Uuid::new_v4(),
            initial_content: document.content.clone(),
            version_number: outcome.version_number,
            previous_content: outcome.previous_content.clone(),
            document,
            connector_binding: None,
            active_tab: None,
            capability_instances: Vec::new(),
            live,
            state: HashMap::new(),
        }
    }

    /// Authoritative content (live editor text when mounted).
    pub fn content(&self) -> String {
        self.live.get()
    }

    /// Whether the live content differs from the content at open time.
    pub fn is_modified(&self) -> bool {
        self.content() != self.initial_content
    }

    /// Attach the editing surface that now owns the content.
    pub fn attach_editor(&mut self, editor: EditorHandle) {
        self.live.attach(editor);
    }

    /// Detach the editing surface, keeping its text as static content.
    pub fn detach_editor(&mut self) -> Option<EditorHandle> {
        self.live.detach()
    }

    pub fn editor(&self) -> Option<EditorHandle> {
        self.live.editor()
    }

    /// Replace the content wholesale (used by version restoration).
    pub(crate) fn replace_content(&mut self, content: &str, outcome: &RecordOutcome) {
        match self.live.editor() {
            Some(editor) => editor.set_text(content),
            None => self.live.set_static(content),
        }
        self.document.content = content.to_string();
        self.version_number = outcome.version_number;
        self.previous_content = outcome.previous_content.clone();
    }

    /// The binding's connection id, if a named connection is selected.
    pub fn connection_id(&self) -> Option<&str> {
        self.connector_binding
            .as_ref()
            .and_then(|b| b.connection_id.as_deref())
    }

    /// Credentials from the binding (empty when unbound).
    pub fn credentials(&self) -> Credentials {
        self.connector_binding
            .as_ref()
            .map(|b| b.credentials.clone())
            .unwrap_or_default()
    }

    /// Store per-session state for a capability under `key`.
    pub fn insert_state<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.state.insert(key.into(), Box::new(value));
    }

    /// Read state stored by [`insert_state`](Self::insert_state).
    pub fn state<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.state.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove_state(&mut self, key: &str) -> bool {
        self.state.remove(key).is_some()
    }

    /// A summary view sharing this session's content authority.
    pub fn summary(&self) -> SummaryView {
        SummaryView {
            title: self.document.title.clone(),
            language: self.document.language,
            initial_content: self.initial_content.clone(),
            live: self.live.clone(),
        }
    }

    pub fn context_snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            title: self.document.title.clone(),
            language: self.document.language,
            content: self.content(),
            modified: self.is_modified(),
        }
    }
}
