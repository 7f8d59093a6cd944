//! Drives a canvas session through its lifecycle.
//!
//! # Mount sequence
//!
//! ```text
//! Presentation ──▶ VersionStore::record_version
//!                        │
//!                        ▼
//!                 CanvasSession::new  ◀── ConnectionSelections (binding)
//!                        │
//!                        ▼
//!        init() each language-matched capability, in order
//!                        │
//!                        ▼
//!        should_activate_tab() filters tab capabilities
//!                        │
//!                        ▼
//!        toolbar render() ──▶ first tab render()
//! ```
//!
//! After mount, [`MountedCanvas`] handles tab switches (render on first
//! switch-in, refresh afterwards), runs, version restoration, and live
//! insertion. [`MountedCanvas::unmount`] calls `destroy` on every
//! capability whose `init` succeeded; dropping a mounted canvas does the
//! same.
//!
//! A capability failing in `render` or `refresh` only degrades its own
//! panel: the error is stored on the panel and logged.

use anyhow::Result;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::sync::Arc;

use canvas_runtime_core::history::{RecordOutcome, VersionStore};
use canvas_runtime_core::models::{Document, Language};

use crate::animation::{animate, AnimationReport, AnimationState, InsertionPlan, SkipHandle};
use crate::capabilities::RUN_TARGET_STATE;
use crate::config::Config;
use crate::connector_interpreter::InputProvider;
use crate::dispatch::{execute_via_connector, resolve_connector, RunOutcome};
use crate::error::CanvasError;
use crate::session::{
    CanvasSession, ConnectionBinding, ConnectionSelections, ContextSnapshot, SummaryView,
};
use crate::traits::{Capability, CapabilityKind, CapabilityRegistry, ConnectorRegistry, Surface};

// ═══════════════════════════════════════════════════════════════════════
// Workspace
// ═══════════════════════════════════════════════════════════════════════

/// Process-wide state shared by every mounted canvas.
pub struct Workspace {
    pub versions: VersionStore,
    pub capabilities: CapabilityRegistry,
    pub connectors: ConnectorRegistry,
    pub selections: ConnectionSelections,
    pub config: Config,
}

impl Workspace {
    pub fn new(
        config: Config,
        capabilities: CapabilityRegistry,
        connectors: ConnectorRegistry,
    ) -> Self {
        Self {
            versions: VersionStore::new(),
            selections: ConnectionSelections::from_config(&config),
            capabilities,
            connectors,
            config,
        }
    }

    /// Built-in capabilities plus the connectors the config describes.
    pub fn from_config(config: Config, input: Arc<dyn InputProvider>) -> Result<Self> {
        let connectors = ConnectorRegistry::from_config(&config, input)?;
        Ok(Self::new(
            config,
            CapabilityRegistry::with_builtins(),
            connectors,
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Inbound types
// ═══════════════════════════════════════════════════════════════════════

/// A document handed over by the surrounding chat or agent layer.
#[derive(Debug, Clone, Deserialize)]
pub struct Presentation {
    pub title: String,
    #[serde(deserialize_with = "lossy_language")]
    pub language: Language,
    pub content: String,
    #[serde(default)]
    pub file_extension: Option<String>,
    #[serde(default)]
    pub sources_ref: Option<String>,
}

fn lossy_language<'de, D>(deserializer: D) -> std::result::Result<Language, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Ok(Language::parse_lossy(&name))
}

impl Presentation {
    pub fn new(title: impl Into<String>, language: Language, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            language,
            content: content.into(),
            file_extension: None,
            sources_ref: None,
        }
    }

    fn into_document(self) -> Document {
        let mut doc = Document::new(self.title, self.language, self.content);
        if let Some(ext) = self.file_extension {
            doc = doc.with_extension(&ext);
        }
        if let Some(sources) = self.sources_ref {
            doc = doc.with_sources_ref(sources);
        }
        doc
    }
}

/// Where a canvas is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTarget {
    pub id: String,
}

impl MountTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tab state machine
// ═══════════════════════════════════════════════════════════════════════

/// What a tab switch requires of the target capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabActivation {
    /// Never shown in this session: call `render`.
    FirstRender,
    /// Shown before: call `refresh`.
    Refresh,
    /// Already the active tab: nothing to do.
    AlreadyActive,
}

/// Exactly one active tab out of the surviving tab capabilities.
#[derive(Debug, Clone, Default)]
pub struct TabState {
    tabs: Vec<String>,
    active: Option<usize>,
    rendered: HashSet<String>,
}

impl TabState {
    pub fn new(tabs: Vec<String>) -> Self {
        Self {
            tabs,
            active: None,
            rendered: HashSet::new(),
        }
    }

    pub fn tabs(&self) -> &[String] {
        &self.tabs
    }

    pub fn active(&self) -> Option<&str> {
        self.active.map(|i| self.tabs[i].as_str())
    }

    pub fn activate(&mut self, id: &str) -> std::result::Result<TabActivation, CanvasError> {
        let index = self
            .tabs
            .iter()
            .position(|t| t == id)
            .ok_or_else(|| CanvasError::UnknownTab(id.to_string()))?;
        if self.active == Some(index) {
            return Ok(TabActivation::AlreadyActive);
        }
        self.active = Some(index);
        if self.rendered.insert(id.to_string()) {
            Ok(TabActivation::FirstRender)
        } else {
            Ok(TabActivation::Refresh)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Mounted canvas
// ═══════════════════════════════════════════════════════════════════════

/// One capability's rendered output.
#[derive(Debug, Clone)]
pub struct Panel {
    pub id: String,
    pub label: String,
    pub surface: Surface,
}

/// Creates mounted canvases against a shared [`Workspace`].
#[derive(Clone)]
pub struct RenderOrchestrator {
    workspace: Arc<Workspace>,
}

impl RenderOrchestrator {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Record the presented content and mount a session for it.
    ///
    /// Fails only when the session cannot be constructed at all.
    pub async fn mount(
        &self,
        presentation: Presentation,
        target: Option<MountTarget>,
    ) -> Result<MountedCanvas> {
        let target = target.ok_or(CanvasError::MissingMountTarget)?;
        let workspace = self.workspace.clone();

        let document = presentation.into_document();
        let outcome =
            workspace
                .versions
                .record_version(&document.title, &document.content, document.language);
        let mut session = CanvasSession::new(document, &outcome);
        session.connector_binding = workspace.selections.get(&session.document.title);

        let language = session.document.language;
        let mut initialized: Vec<Arc<dyn Capability>> = Vec::new();
        for capability in workspace.capabilities.active_for(language) {
            match capability.init(&mut session).await {
                Ok(()) => {
                    session.capability_instances.push(capability.id().to_string());
                    initialized.push(capability);
                }
                Err(e) => {
                    tracing::warn!(
                        capability = %capability.id(),
                        error = %format!("{:#}", e),
                        "capability init failed, excluded from session"
                    );
                }
            }
        }

        let tabs: Vec<Arc<dyn Capability>> = initialized
            .iter()
            .filter(|c| c.kind() == CapabilityKind::Tab && c.should_activate_tab(&session))
            .cloned()
            .collect();
        let toolbar_caps: Vec<Arc<dyn Capability>> = initialized
            .iter()
            .filter(|c| c.kind() == CapabilityKind::Toolbar)
            .cloned()
            .collect();

        let mut canvas = MountedCanvas {
            tab_state: TabState::new(tabs.iter().map(|c| c.id().to_string()).collect()),
            panels: tabs.iter().map(|c| panel_for(c.as_ref())).collect(),
            toolbar: toolbar_caps.iter().map(|c| panel_for(c.as_ref())).collect(),
            tab_caps: tabs,
            toolbar_caps,
            initialized,
            workspace,
            target,
            session,
            skip: SkipHandle::new(),
            mounted: true,
        };

        canvas.update_run_target();
        canvas.render_toolbar();
        if let Some(first) = canvas.tab_state.tabs().first().cloned() {
            canvas.switch_tab(&first)?;
        }

        tracing::info!(
            title = %canvas.session.document.title,
            version = canvas.session.version_number,
            target = %canvas.target.id,
            tabs = canvas.tab_state.tabs().len(),
            "canvas mounted"
        );
        Ok(canvas)
    }
}

fn panel_for(capability: &dyn Capability) -> Panel {
    Panel {
        id: capability.id().to_string(),
        label: capability.label().to_string(),
        surface: Surface::new(),
    }
}

/// Render or refresh one capability into its panel, isolating failures.
fn paint(
    capability: &dyn Capability,
    panel: &mut Panel,
    session: &CanvasSession,
    first: bool,
) {
    let content = session.content();
    let language = session.document.language;
    let result = if first {
        capability.render(&mut panel.surface, &content, language, session)
    } else {
        capability.refresh(&mut panel.surface, &content, language, session)
    };
    match result {
        Ok(()) => panel.surface.error = None,
        Err(e) => {
            let failure = CanvasError::PluginRenderFailure {
                capability: capability.id().to_string(),
                message: format!("{:#}", e),
            };
            tracing::warn!(capability = %capability.id(), "{}", failure);
            panel.surface.clear();
            panel.surface.error = Some(failure.to_string());
        }
    }
}

/// A mounted session with its panels.
pub struct MountedCanvas {
    workspace: Arc<Workspace>,
    target: MountTarget,
    session: CanvasSession,
    /// Capabilities whose `init` succeeded, in registration order.
    initialized: Vec<Arc<dyn Capability>>,
    tab_caps: Vec<Arc<dyn Capability>>,
    toolbar_caps: Vec<Arc<dyn Capability>>,
    tab_state: TabState,
    panels: Vec<Panel>,
    toolbar: Vec<Panel>,
    skip: SkipHandle,
    mounted: bool,
}

impl MountedCanvas {
    pub fn session(&self) -> &CanvasSession {
        &self.session
    }

    pub fn target(&self) -> &MountTarget {
        &self.target
    }

    /// Surviving tab ids in registration order.
    pub fn tabs(&self) -> &[String] {
        self.tab_state.tabs()
    }

    pub fn active_tab(&self) -> Option<&str> {
        self.tab_state.active()
    }

    /// Switch to tab `id`, rendering or refreshing it as needed.
    pub fn switch_tab(&mut self, id: &str) -> Result<TabActivation> {
        let activation = self.tab_state.activate(id)?;
        self.session.active_tab = Some(id.to_string());
        match activation {
            TabActivation::FirstRender => self.paint_tab(id, true),
            TabActivation::Refresh => self.paint_tab(id, false),
            TabActivation::AlreadyActive => {}
        }
        Ok(activation)
    }

    fn paint_tab(&mut self, id: &str, first: bool) {
        let capability = self.tab_caps.iter().find(|c| c.id() == id);
        let panel = self.panels.iter_mut().find(|p| p.id == id);
        if let (Some(capability), Some(panel)) = (capability, panel) {
            paint(capability.as_ref(), panel, &self.session, first);
        }
    }

    /// Refresh the active tab after the content changed underneath it.
    fn refresh_active(&mut self) {
        if let Some(id) = self.tab_state.active().map(str::to_string) {
            self.paint_tab(&id, false);
        }
    }

    fn render_toolbar(&mut self) {
        for (capability, panel) in self.toolbar_caps.iter().zip(self.toolbar.iter_mut()) {
            paint(capability.as_ref(), panel, &self.session, true);
        }
    }

    fn update_run_target(&mut self) {
        match resolve_connector(&self.workspace.connectors, &self.session) {
            Some(connector) => {
                let name = connector.name().to_string();
                self.session.insert_state(RUN_TARGET_STATE, name);
            }
            None => {
                self.session.remove_state(RUN_TARGET_STATE);
            }
        }
    }

    /// The panel of tab `id`.
    pub fn panel(&self, id: &str) -> Option<&Surface> {
        self.panels.iter().find(|p| p.id == id).map(|p| &p.surface)
    }

    /// Toolbar items in registration order.
    pub fn toolbar(&self) -> &[Panel] {
        &self.toolbar
    }

    /// Edit through the editor. Returns `false` when there is no editor
    /// or it is read-only.
    pub fn edit(&mut self, text: &str) -> bool {
        self.session.editor().map(|e| e.edit(text)).unwrap_or(false)
    }

    /// Bring back version `number` as new content.
    pub fn restore_version(&mut self, number: usize) -> Result<RecordOutcome> {
        let title = self.session.document.title.clone();
        let outcome = self.workspace.versions.restore(&title, number)?;
        let content = outcome
            .history
            .last()
            .map(|v| v.content.clone())
            .unwrap_or_default();
        self.session.replace_content(&content, &outcome);
        self.refresh_active();
        tracing::info!(%title, restored = number, version = outcome.version_number, "version restored");
        Ok(outcome)
    }

    /// Bind a connector and connection for this document. The choice is
    /// remembered for later sessions of the same title.
    pub fn bind_connection(&mut self, binding: ConnectionBinding) {
        self.workspace
            .selections
            .select(&self.session.document.title, binding.clone());
        self.session.connector_binding = Some(binding);
        self.update_run_target();
        self.render_toolbar();
    }

    pub fn clear_connection(&mut self) {
        self.workspace.selections.clear(&self.session.document.title);
        self.session.connector_binding = None;
        self.update_run_target();
        self.render_toolbar();
    }

    /// Execute the live content.
    pub async fn run(&self) -> RunOutcome {
        execute_via_connector(&self.workspace.connectors, &self.session).await
    }

    /// Handle for skipping the next (or current) live insertion.
    pub fn skip_handle(&self) -> SkipHandle {
        self.skip.clone()
    }

    /// Record `content` as a new version and reveal it in the editor.
    pub async fn animate_insertion(&mut self, content: &str) -> Result<AnimationReport> {
        let title = self.session.document.title.clone();
        let language = self.session.document.language;
        let outcome = self
            .workspace
            .versions
            .record_version(&title, content, language);
        self.session.replace_content(content, &outcome);

        let report = match self.session.editor() {
            Some(editor) => {
                let lines = content.split('\n').count();
                let plan = InsertionPlan::for_line_count(lines, &self.workspace.config.animation);
                let skip = std::mem::take(&mut self.skip);
                animate(&editor, content, plan, &skip).await?
            }
            None => AnimationReport {
                batches: 0,
                lines: content.split('\n').count(),
                skipped: false,
                final_state: AnimationState::Writable,
            },
        };
        self.refresh_active();
        Ok(report)
    }

    pub fn context_snapshot(&self) -> ContextSnapshot {
        self.session.context_snapshot()
    }

    /// A read-only summary that tracks this canvas's live content.
    pub fn summary(&self) -> SummaryView {
        self.session.summary()
    }

    /// Tear down the session, destroying every initialized capability.
    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        for capability in &self.initialized {
            if let Err(e) = capability.destroy(&mut self.session) {
                tracing::warn!(
                    capability = %capability.id(),
                    error = %format!("{:#}", e),
                    "capability destroy failed"
                );
            }
        }
        tracing::debug!(title = %self.session.document.title, "canvas unmounted");
    }
}

impl Drop for MountedCanvas {
    fn drop(&mut self) {
        self.teardown();
    }
}
