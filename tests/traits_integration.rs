//! Integration tests for the plugin traits.
//!
//! These tests prove that custom capabilities and connectors (implemented
//! via the `Capability` and `Connector` traits) work end-to-end through the
//! orchestrator's mount lifecycle and the execution dispatcher.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use canvas_runtime::config::Config;
use canvas_runtime::dispatch::RunOutcome;
use canvas_runtime::orchestrator::{
    MountTarget, Presentation, RenderOrchestrator, TabActivation, Workspace,
};
use canvas_runtime::session::{CanvasSession, ConnectionBinding};
use canvas_runtime::traits::{
    Capability, CapabilityKind, CapabilityRegistry, Connector, ConnectorRegistry, Credentials,
    Surface,
};
use canvas_runtime_core::models::{ExecutionResult, ExecutionStats, Language, LanguageSet};

type Journal = Arc<Mutex<Vec<String>>>;

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

// ─── Test Capability ────────────────────────────────────────────────

/// Records every lifecycle call it receives.
struct Recorder {
    id: &'static str,
    kind: CapabilityKind,
    languages: LanguageSet,
    journal: Journal,
    fail_init: bool,
    fail_render: bool,
    activate: bool,
}

impl Recorder {
    fn tab(id: &'static str, languages: LanguageSet, journal: &Journal) -> Self {
        Self {
            id,
            kind: CapabilityKind::Tab,
            languages,
            journal: journal.clone(),
            fail_init: false,
            fail_render: false,
            activate: true,
        }
    }

    fn log(&self, event: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.id, event));
    }
}

#[async_trait]
impl Capability for Recorder {
    fn id(&self) -> &str {
        self.id
    }

    fn label(&self) -> &str {
        self.id
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    fn languages(&self) -> &LanguageSet {
        &self.languages
    }

    async fn init(&self, session: &mut CanvasSession) -> Result<()> {
        self.log("init");
        if self.fail_init {
            bail!("engine failed to load");
        }
        // Later capabilities can see what earlier ones initialized.
        let seen = session.capability_instances.join(",");
        session.insert_state(format!("{}.seen", self.id), seen);
        Ok(())
    }

    fn render(
        &self,
        surface: &mut Surface,
        content: &str,
        _language: Language,
        _session: &CanvasSession,
    ) -> Result<()> {
        self.log("render");
        if self.fail_render {
            bail!("renderer crashed");
        }
        surface.set_body(format!("{} chars", content.len()));
        Ok(())
    }

    fn refresh(
        &self,
        surface: &mut Surface,
        content: &str,
        _language: Language,
        _session: &CanvasSession,
    ) -> Result<()> {
        self.log("refresh");
        surface.set_body(format!("{} chars (refreshed)", content.len()));
        Ok(())
    }

    fn destroy(&self, _session: &mut CanvasSession) -> Result<()> {
        self.log("destroy");
        Ok(())
    }

    fn should_activate_tab(&self, _session: &CanvasSession) -> bool {
        self.activate
    }
}

// ─── Test Connector ─────────────────────────────────────────────────

/// Echoes the content back with its own id and the bound connection.
struct EchoConnector {
    id: &'static str,
    languages: LanguageSet,
}

#[async_trait]
impl Connector for EchoConnector {
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
        content: &str,
        credentials: &Credentials,
        session: &CanvasSession,
    ) -> Result<ExecutionResult> {
        let connection = session.connection_id().unwrap_or("default");
        let token = credentials.get("token").map(String::as_str).unwrap_or("-");
        Ok(ExecutionResult::success(
            format!("{}@{}[{}]: {}", self.id, connection, token, content),
            ExecutionStats {
                unit_count: 1,
                time_ms: 0,
            },
        ))
    }
}

fn echo(id: &'static str, languages: LanguageSet) -> Arc<dyn Connector> {
    Arc::new(EchoConnector { id, languages })
}

fn orchestrator(capabilities: CapabilityRegistry, connectors: ConnectorRegistry) -> RenderOrchestrator {
    RenderOrchestrator::new(Arc::new(Workspace::new(
        Config::default(),
        capabilities,
        connectors,
    )))
}

fn target() -> Option<MountTarget> {
    Some(MountTarget::new("canvas"))
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_language_filtering_and_init_order() {
    let log = journal();
    let mut capabilities = CapabilityRegistry::new();
    capabilities.register(Arc::new(Recorder::tab("first", LanguageSet::Any, &log)));
    capabilities.register(Arc::new(Recorder::tab(
        "sql-only",
        LanguageSet::only([Language::Sql]),
        &log,
    )));
    capabilities.register(Arc::new(Recorder::tab("second", LanguageSet::Any, &log)));

    let canvas = orchestrator(capabilities, ConnectorRegistry::new())
        .mount(Presentation::new("p", Language::Python, "x = 1"), target())
        .await
        .unwrap();

    assert_eq!(canvas.tabs(), ["first", "second"]);
    assert_eq!(
        canvas.session().state::<String>("second.seen").map(String::as_str),
        Some("first")
    );
    assert_eq!(
        entries(&log),
        vec!["first:init", "second:init", "first:render"]
    );
}

#[tokio::test]
async fn test_render_on_first_switch_refresh_after() {
    let log = journal();
    let mut capabilities = CapabilityRegistry::new();
    capabilities.register(Arc::new(Recorder::tab("a", LanguageSet::Any, &log)));
    capabilities.register(Arc::new(Recorder::tab("b", LanguageSet::Any, &log)));

    let mut canvas = orchestrator(capabilities, ConnectorRegistry::new())
        .mount(Presentation::new("p", Language::Text, "hello"), target())
        .await
        .unwrap();

    assert_eq!(canvas.switch_tab("b").unwrap(), TabActivation::FirstRender);
    assert_eq!(canvas.switch_tab("a").unwrap(), TabActivation::Refresh);
    assert_eq!(canvas.switch_tab("a").unwrap(), TabActivation::AlreadyActive);
    assert_eq!(canvas.panel("a").unwrap().body, "5 chars (refreshed)");
    assert!(canvas.switch_tab("nope").is_err());
    assert_eq!(canvas.active_tab(), Some("a"));
    assert_eq!(canvas.session().active_tab.as_deref(), Some("a"));

    assert_eq!(
        entries(&log),
        vec!["a:init", "b:init", "a:render", "b:render", "a:refresh"]
    );
}

#[tokio::test]
async fn test_render_failure_is_isolated() {
    let log = journal();
    let mut broken = Recorder::tab("broken", LanguageSet::Any, &log);
    broken.fail_render = true;
    let mut capabilities = CapabilityRegistry::new();
    capabilities.register(Arc::new(broken));
    capabilities.register(Arc::new(Recorder::tab("healthy", LanguageSet::Any, &log)));

    let mut canvas = orchestrator(capabilities, ConnectorRegistry::new())
        .mount(Presentation::new("p", Language::Text, "abc"), target())
        .await
        .unwrap();

    let panel = canvas.panel("broken").unwrap();
    assert_eq!(panel.body, "");
    assert!(panel.error.as_deref().unwrap().contains("renderer crashed"));

    canvas.switch_tab("healthy").unwrap();
    let panel = canvas.panel("healthy").unwrap();
    assert_eq!(panel.body, "3 chars");
    assert!(panel.error.is_none());
}

#[tokio::test]
async fn test_destroy_reaches_every_initialized_capability() {
    let log = journal();
    let mut failing = Recorder::tab("failing", LanguageSet::Any, &log);
    failing.fail_init = true;
    let mut withdrawn = Recorder::tab("withdrawn", LanguageSet::Any, &log);
    withdrawn.activate = false;
    let mut toolbar = Recorder::tab("button", LanguageSet::Any, &log);
    toolbar.kind = CapabilityKind::Toolbar;

    let mut capabilities = CapabilityRegistry::new();
    capabilities.register(Arc::new(Recorder::tab("shown", LanguageSet::Any, &log)));
    capabilities.register(Arc::new(Recorder::tab("hidden", LanguageSet::Any, &log)));
    capabilities.register(Arc::new(failing));
    capabilities.register(Arc::new(withdrawn));
    capabilities.register(Arc::new(toolbar));

    let canvas = orchestrator(capabilities, ConnectorRegistry::new())
        .mount(Presentation::new("p", Language::Text, "abc"), target())
        .await
        .unwrap();
    assert_eq!(canvas.tabs(), ["shown", "hidden"]);
    assert_eq!(canvas.toolbar().len(), 1);
    assert_eq!(
        canvas.session().capability_instances,
        vec!["shown", "hidden", "withdrawn", "button"]
    );
    canvas.unmount();

    let log = entries(&log);
    for id in ["shown", "hidden", "withdrawn", "button"] {
        assert!(log.contains(&format!("{}:destroy", id)), "{} not destroyed", id);
    }
    assert!(!log.contains(&"failing:destroy".to_string()));
    assert!(!log.contains(&"hidden:render".to_string()));
    // Toolbar renders once, right after init and before the first tab.
    let button = log.iter().position(|e| e == "button:render").unwrap();
    let shown = log.iter().position(|e| e == "shown:render").unwrap();
    assert!(button < shown);
}

#[tokio::test]
async fn test_dropping_a_canvas_tears_it_down() {
    let log = journal();
    let mut capabilities = CapabilityRegistry::new();
    capabilities.register(Arc::new(Recorder::tab("only", LanguageSet::Any, &log)));
    let orchestrator = orchestrator(capabilities, ConnectorRegistry::new());

    {
        let _canvas = orchestrator
            .mount(Presentation::new("p", Language::Text, "abc"), target())
            .await
            .unwrap();
    }
    assert_eq!(entries(&log).last().map(String::as_str), Some("only:destroy"));
}

#[tokio::test]
async fn test_first_registered_connector_wins() {
    let mut connectors = ConnectorRegistry::new();
    connectors.register(echo("python-only", LanguageSet::only([Language::Python])));
    connectors.register(echo("warehouse", LanguageSet::only([Language::Sql])));
    connectors.register(echo("anything", LanguageSet::Any));
    connectors.register(echo("lakehouse", LanguageSet::only([Language::Sql])));

    for _ in 0..5 {
        assert_eq!(
            connectors.connector_for_language(Language::Sql).unwrap().id(),
            "warehouse"
        );
    }
    assert_eq!(
        connectors.connector_for_language(Language::Css).unwrap().id(),
        "anything"
    );

    let canvas = orchestrator(CapabilityRegistry::with_builtins(), connectors)
        .mount(Presentation::new("q", Language::Sql, "select 1"), target())
        .await
        .unwrap();
    assert_eq!(canvas.toolbar()[0].surface.body, "Run with warehouse");
    match canvas.run().await {
        RunOutcome::Finished(result) => {
            assert_eq!(result.output(), Some("warehouse@default[-]: select 1"))
        }
        RunOutcome::Cancelled => panic!("unexpected cancellation"),
    }
}

#[tokio::test]
async fn test_connection_selection_survives_remount() {
    let mut connectors = ConnectorRegistry::new();
    connectors.register(echo("warehouse", LanguageSet::only([Language::Sql])));
    connectors.register(echo("lakehouse", LanguageSet::only([Language::Sql])));
    let orchestrator = orchestrator(CapabilityRegistry::with_builtins(), connectors);

    let mut canvas = orchestrator
        .mount(Presentation::new("Report", Language::Sql, "select 1"), target())
        .await
        .unwrap();
    canvas.bind_connection(
        ConnectionBinding::new("lakehouse")
            .with_connection("prod")
            .with_credential("token", "s3cr3t"),
    );
    assert_eq!(canvas.toolbar()[0].surface.body, "Run with lakehouse");
    canvas.unmount();

    // Next turn: same title, new content.
    let canvas = orchestrator
        .mount(Presentation::new(" report", Language::Sql, "select 2"), target())
        .await
        .unwrap();
    assert_eq!(canvas.session().connection_id(), Some("prod"));
    let outcome = canvas.run().await;
    assert_eq!(
        outcome.result().unwrap().output(),
        Some("lakehouse@prod[s3cr3t]: select 2")
    );
}

#[tokio::test]
async fn test_run_uses_live_editor_content() {
    let mut connectors = ConnectorRegistry::new();
    connectors.register(echo("anything", LanguageSet::Any));
    let mut canvas = orchestrator(CapabilityRegistry::with_builtins(), connectors)
        .mount(Presentation::new("p", Language::Python, "print(1)"), target())
        .await
        .unwrap();

    assert!(canvas.edit("print('edited')"));
    let outcome = canvas.run().await;
    assert_eq!(
        outcome.result().unwrap().output(),
        Some("anything@default[-]: print('edited')")
    );
}
