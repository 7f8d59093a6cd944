//! Plugin contracts for capabilities and connectors.
//!
//! Two plugin families extend the canvas:
//!
//! - [`Capability`]: contributes a tab (view/edit surface) or a toolbar
//!   action for one or more content languages.
//! - [`Connector`]: executes a document's content against some backend
//!   and returns a normalized [`ExecutionResult`].
//!
//! Optional hooks are trait methods with default bodies, so a plugin only
//! implements the hooks it needs and the lifecycle driver calls every hook
//! unconditionally.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           CapabilityRegistry             │
//! │  ┌─────────┐ ┌─────────┐ ┌────────────┐  │
//! │  │ editor  │ │ changes │ │  custom    │  │   registration order =
//! │  │  (tab)  │ │  (tab)  │ │ tab/toolbar│  │   tab and button order
//! │  └─────────┘ └─────────┘ └────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        RenderOrchestrator::mount()
//! ```
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectorRegistry              │
//! │  ┌─────────┐ ┌────────────┐ ┌─────────┐  │
//! │  │  Lua    │ │ Interpreter│ │ Remote  │  │   first language match
//! │  │ sandbox │ │ (process)  │ │ (HTTP)  │  │   wins
//! │  └─────────┘ └────────────┘ └─────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        dispatch::execute_via_connector()
//! ```
//!
//! # Usage
//!
//! ```rust
//! use canvas_runtime::traits::{CapabilityRegistry, ConnectorRegistry};
//!
//! let capabilities = CapabilityRegistry::with_builtins();
//! let connectors = ConnectorRegistry::new();
//! // connectors.register(Arc::new(MyConnector::new()));
//! assert!(connectors.is_empty());
//! assert_eq!(capabilities.len(), 3);
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use canvas_runtime_core::models::{ExecutionResult, Language, LanguageSet};

use crate::session::CanvasSession;

/// Named credential values handed to a connector (e.g. `api_key`).
pub type Credentials = BTreeMap<String, String>;

// ═══════════════════════════════════════════════════════════════════════
// Surfaces
// ═══════════════════════════════════════════════════════════════════════

/// An in-memory panel a capability renders into.
///
/// The visual layer reads `body` and `error`; the runtime never draws.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Surface {
    pub body: String,
    /// Set when the capability's last render or refresh failed.
    pub error: Option<String>,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the panel body.
    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    pub fn clear(&mut self) {
        self.body.clear();
        self.error = None;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Capability Trait
// ═══════════════════════════════════════════════════════════════════════

/// Where a capability appears in the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// Participates in the tab state machine.
    Tab,
    /// Rendered once into the toolbar after initialization.
    Toolbar,
}

/// A plugin contributing a tab or a toolbar action.
///
/// # Lifecycle
///
/// 1. [`init`](Capability::init) runs for every language-matched
///    capability, sequentially, in registration order.
/// 2. Tab capabilities are filtered by
///    [`should_activate_tab`](Capability::should_activate_tab).
/// 3. Toolbar capabilities are [`render`](Capability::render)ed once.
/// 4. Tabs are rendered on first switch-in and
///    [`refresh`](Capability::refresh)ed on later switch-ins.
/// 5. [`destroy`](Capability::destroy) runs at teardown for every
///    capability whose `init` succeeded.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use canvas_runtime::session::CanvasSession;
/// use canvas_runtime::traits::{Capability, CapabilityKind, Surface};
/// use canvas_runtime_core::models::{Language, LanguageSet};
///
/// pub struct LineCount {
///     languages: LanguageSet,
/// }
///
/// #[async_trait]
/// impl Capability for LineCount {
///     fn id(&self) -> &str { "line-count" }
///     fn label(&self) -> &str { "Lines" }
///     fn kind(&self) -> CapabilityKind { CapabilityKind::Tab }
///     fn languages(&self) -> &LanguageSet { &self.languages }
///
///     fn render(
///         &self,
///         surface: &mut Surface,
///         content: &str,
///         _language: Language,
///         _session: &CanvasSession,
///     ) -> Result<()> {
///         surface.set_body(format!("{} lines", content.lines().count()));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Capability: Send + Sync {
    /// Stable identifier, also used as the tab id.
    fn id(&self) -> &str;

    /// Human-readable tab or button label.
    fn label(&self) -> &str;

    fn kind(&self) -> CapabilityKind;

    /// Languages this capability is active for.
    fn languages(&self) -> &LanguageSet;

    /// Prepare per-session state. May suspend (e.g. to load an editing
    /// engine) and may set session fields that later capabilities read.
    async fn init(&self, _session: &mut CanvasSession) -> Result<()> {
        Ok(())
    }

    /// Draw the capability for the first time.
    fn render(
        &self,
        _surface: &mut Surface,
        _content: &str,
        _language: Language,
        _session: &CanvasSession,
    ) -> Result<()> {
        Ok(())
    }

    /// Pick up content changes on a later switch-in. The default leaves
    /// the panel as last rendered.
    fn refresh(
        &self,
        _surface: &mut Surface,
        _content: &str,
        _language: Language,
        _session: &CanvasSession,
    ) -> Result<()> {
        Ok(())
    }

    /// Release anything acquired in [`init`](Capability::init).
    fn destroy(&self, _session: &mut CanvasSession) -> Result<()> {
        Ok(())
    }

    /// Evaluated once after every `init` has completed. Returning `false`
    /// withdraws a tab capability from the session.
    fn should_activate_tab(&self, _session: &CanvasSession) -> bool {
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Connector Trait
// ═══════════════════════════════════════════════════════════════════════

/// Health and configuration summary reported by a connector.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorStatus {
    pub id: String,
    pub name: String,
    pub languages: LanguageSet,
    pub requires_external_backend: bool,
    pub healthy: bool,
    pub notes: Option<String>,
}

/// An execution backend for document content.
///
/// Implementations may run content in an isolated in-process sandbox,
/// an embedded interpreter, or a delegated service. All of them return
/// the same [`ExecutionResult`] envelope.
///
/// Failures with product meaning are returned as
/// [`CanvasError`](crate::error::CanvasError) values inside the
/// `anyhow::Error` so the dispatcher can classify them.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use canvas_runtime::session::CanvasSession;
/// use canvas_runtime::traits::{Connector, Credentials};
/// use canvas_runtime_core::models::{ExecutionResult, ExecutionStats, LanguageSet};
///
/// pub struct Echo {
///     languages: LanguageSet,
/// }
///
/// #[async_trait]
/// impl Connector for Echo {
///     fn id(&self) -> &str { "echo" }
///     fn name(&self) -> &str { "Echo" }
///     fn languages(&self) -> &LanguageSet { &self.languages }
///
///     async fn execute(
///         &self,
///         content: &str,
///         _credentials: &Credentials,
///         _session: &CanvasSession,
///     ) -> Result<ExecutionResult> {
///         let stats = ExecutionStats { unit_count: content.lines().count() as u64, time_ms: 0 };
///         Ok(ExecutionResult::success(content, stats))
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Registry key; registering a second connector with the same id
    /// replaces the first in place.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    fn languages(&self) -> &LanguageSet;

    /// Whether running requires a service outside this process.
    fn requires_external_backend(&self) -> bool {
        false
    }

    /// JSON Schema describing the credentials this connector accepts.
    fn credential_schema(&self) -> Option<Value> {
        None
    }

    /// Run `content` and return the normalized result.
    async fn execute(
        &self,
        content: &str,
        credentials: &Credentials,
        session: &CanvasSession,
    ) -> Result<ExecutionResult>;

    /// Report configuration and health.
    fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            id: self.id().to_string(),
            name: self.name().to_string(),
            languages: self.languages().clone(),
            requires_external_backend: self.requires_external_backend(),
            healthy: true,
            notes: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registries
// ═══════════════════════════════════════════════════════════════════════

/// Ordered registry of capabilities.
///
/// Registration order is significant: it is the left-to-right tab order
/// and the toolbar button order.
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Create an empty capability registry.
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
        }
    }

    /// Create a registry pre-loaded with the built-in editor, changes,
    /// and run capabilities.
    pub fn with_builtins() -> Self {
        use crate::capabilities::{ChangesCapability, EditorCapability, RunToolbarCapability};

        let mut registry = Self::new();
        registry.register(Arc::new(EditorCapability::new()));
        registry.register(Arc::new(ChangesCapability::new()));
        registry.register(Arc::new(RunToolbarCapability::new()));
        registry
    }

    /// Register a capability after all existing ones.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities.push(capability);
    }

    /// All capabilities in registration order.
    pub fn capabilities(&self) -> &[Arc<dyn Capability>] {
        &self.capabilities
    }

    /// Capabilities active for `language`, in registration order.
    pub fn active_for(&self, language: Language) -> Vec<Arc<dyn Capability>> {
        self.capabilities
            .iter()
            .filter(|c| c.languages().matches(language))
            .cloned()
            .collect()
    }

    /// Find a capability by id.
    pub fn find(&self, id: &str) -> Option<&dyn Capability> {
        self.capabilities
            .iter()
            .find(|c| c.id() == id)
            .map(|c| c.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of execution connectors keyed by id.
///
/// Lookup by language returns the first registered match, so
/// registration order is the tie-break.
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Create an empty connector registry.
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Create a registry with the connectors described by the config:
    /// the Lua sandbox, the interpreter, and (when configured) the
    /// remote execution service.
    pub fn from_config(
        config: &crate::config::Config,
        input: Arc<dyn crate::connector_interpreter::InputProvider>,
    ) -> Result<Self> {
        use crate::connector_interpreter::InterpreterConnector;
        use crate::connector_remote::RemoteConnector;
        use crate::connector_sandbox::LuaSandboxConnector;

        let mut registry = Self::new();
        registry.register(Arc::new(LuaSandboxConnector::from_config(&config.sandbox)));
        registry.register(Arc::new(InterpreterConnector::new(
            config.interpreter.clone(),
            input,
        )));
        if let Some(remote) = &config.remote {
            registry.register(Arc::new(RemoteConnector::new(remote.clone())?));
        }
        Ok(registry)
    }

    /// Register a connector. A connector with an existing id replaces the
    /// old one at the same position.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        if let Some(slot) = self
            .connectors
            .iter_mut()
            .find(|c| c.id() == connector.id())
        {
            *slot = connector;
        } else {
            self.connectors.push(connector);
        }
    }

    /// All connectors in registration order.
    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        &self.connectors
    }

    /// Find a connector by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.id() == id).cloned()
    }

    /// The first registered connector accepting `language`.
    pub fn connector_for_language(&self, language: Language) -> Option<Arc<dyn Connector>> {
        self.connectors
            .iter()
            .find(|c| c.languages().matches(language))
            .cloned()
    }

    /// Status of every connector, in registration order.
    pub fn statuses(&self) -> Vec<ConnectorStatus> {
        self.connectors.iter().map(|c| c.status()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_runtime_core::models::ExecutionStats;

    struct Named {
        id: &'static str,
        languages: LanguageSet,
    }

    #[async_trait]
    impl Connector for Named {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        fn languages(&self) -> &LanguageSet {
            &self.languages
        }
        async fn execute(
            &self,
            _content: &str,
            _credentials: &Credentials,
            _session: &CanvasSession,
        ) -> Result<ExecutionResult> {
            Ok(ExecutionResult::success(self.id, ExecutionStats::default()))
        }
    }

    #[async_trait]
    impl Capability for Named {
        fn id(&self) -> &str {
            self.id
        }
        fn label(&self) -> &str {
            self.id
        }
        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Tab
        }
        fn languages(&self) -> &LanguageSet {
            &self.languages
        }
    }

    fn named(id: &'static str, languages: LanguageSet) -> Arc<Named> {
        Arc::new(Named { id, languages })
    }

    #[test]
    fn test_connector_first_match_wins() {
        let mut registry = ConnectorRegistry::new();
        registry.register(named("first", LanguageSet::only([Language::Sql])));
        registry.register(named("second", LanguageSet::only([Language::Sql])));
        registry.register(named("any", LanguageSet::Any));

        for _ in 0..3 {
            assert_eq!(
                registry.connector_for_language(Language::Sql).unwrap().id(),
                "first"
            );
        }
        assert_eq!(
            registry.connector_for_language(Language::Python).unwrap().id(),
            "any"
        );
    }

    #[test]
    fn test_connector_no_match() {
        let mut registry = ConnectorRegistry::new();
        registry.register(named("sql", LanguageSet::only([Language::Sql])));
        assert!(registry.connector_for_language(Language::Css).is_none());
    }

    #[test]
    fn test_connector_reregistration_replaces_in_place() {
        let mut registry = ConnectorRegistry::new();
        registry.register(named("a", LanguageSet::only([Language::Sql])));
        registry.register(named("b", LanguageSet::only([Language::Sql])));
        registry.register(named("a", LanguageSet::only([Language::Python])));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.connectors()[0].id(), "a");
        assert_eq!(
            registry.connector_for_language(Language::Sql).unwrap().id(),
            "b"
        );
        assert_eq!(registry.statuses().len(), 2);
    }

    #[test]
    fn test_capability_filtering_by_language() {
        let mut registry = CapabilityRegistry::new();
        registry.register(named("sql-only", LanguageSet::only([Language::Sql])));
        registry.register(named("everywhere", LanguageSet::Any));
        registry.register(named("py", LanguageSet::only([Language::Python])));

        let ids: Vec<String> = registry
            .active_for(Language::Python)
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(ids, vec!["everywhere", "py"]);

        for lang in Language::ALL {
            assert!(registry
                .active_for(lang)
                .iter()
                .any(|c| c.id() == "everywhere"));
        }
        assert!(registry.find("sql-only").is_some());
    }

    #[test]
    fn test_builtin_order() {
        let registry = CapabilityRegistry::with_builtins();
        let ids: Vec<&str> = registry.capabilities().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["editor", "changes", "run"]);
    }
}
