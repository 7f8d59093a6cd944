//! Built-in capabilities.
//!
//! These exercise the capability mechanism for every language:
//!
//! | Id | Kind | Behavior |
//! |----|------|----------|
//! | `editor` | tab | owns the shared [`EditorHandle`] |
//! | `changes` | tab | line diff against the previous version; only present when one exists |
//! | `run` | toolbar | names the connector a run would use |
//!
//! Concrete preview renderers are supplied by the embedding application
//! as additional [`Capability`] implementations.

use anyhow::Result;
use async_trait::async_trait;

use canvas_runtime_core::diff::{compute_line_diff, diff_stats, render_unified};
use canvas_runtime_core::models::{Language, LanguageSet};

use crate::session::{CanvasSession, EditorHandle};
use crate::traits::{Capability, CapabilityKind, Surface};

/// Session state key holding the connector label shown by the run button.
pub const RUN_TARGET_STATE: &str = "run.target";

// ═══════════════════════════════════════════════════════════════════════
// Editor
// ═══════════════════════════════════════════════════════════════════════

/// The editing surface. Its `init` creates the editor buffer every later
/// capability reads content through.
pub struct EditorCapability {
    languages: LanguageSet,
}

impl EditorCapability {
    pub fn new() -> Self {
        Self {
            languages: LanguageSet::Any,
        }
    }
}

impl Default for EditorCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for EditorCapability {
    fn id(&self) -> &str {
        "editor"
    }

    fn label(&self) -> &str {
        "Code"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Tab
    }

    fn languages(&self) -> &LanguageSet {
        &self.languages
    }

    async fn init(&self, session: &mut CanvasSession) -> Result<()> {
        let editor = EditorHandle::new(&session.content());
        session.attach_editor(editor);
        Ok(())
    }

    fn render(
        &self,
        surface: &mut Surface,
        content: &str,
        _language: Language,
        _session: &CanvasSession,
    ) -> Result<()> {
        surface.set_body(content);
        Ok(())
    }

    fn refresh(
        &self,
        surface: &mut Surface,
        content: &str,
        language: Language,
        session: &CanvasSession,
    ) -> Result<()> {
        self.render(surface, content, language, session)
    }

    fn destroy(&self, session: &mut CanvasSession) -> Result<()> {
        session.detach_editor();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Changes
// ═══════════════════════════════════════════════════════════════════════

/// Line diff between the previous version and the live content.
///
/// The diff is computed on render and refresh only, never eagerly.
pub struct ChangesCapability {
    languages: LanguageSet,
}

impl ChangesCapability {
    pub fn new() -> Self {
        Self {
            languages: LanguageSet::Any,
        }
    }
}

impl Default for ChangesCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for ChangesCapability {
    fn id(&self) -> &str {
        "changes"
    }

    fn label(&self) -> &str {
        "Changes"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Tab
    }

    fn languages(&self) -> &LanguageSet {
        &self.languages
    }

    fn should_activate_tab(&self, session: &CanvasSession) -> bool {
        session.previous_content.is_some()
    }

    fn render(
        &self,
        surface: &mut Surface,
        content: &str,
        _language: Language,
        session: &CanvasSession,
    ) -> Result<()> {
        let previous = session.previous_content.as_deref().unwrap_or_default();
        let ops = compute_line_diff(previous, content);
        let stats = diff_stats(&ops);
        surface.set_body(format!(
            "+{} -{} (v{} vs v{})\n{}",
            stats.added,
            stats.removed,
            session.version_number,
            session.version_number.saturating_sub(1),
            render_unified(&ops)
        ));
        Ok(())
    }

    fn refresh(
        &self,
        surface: &mut Surface,
        content: &str,
        language: Language,
        session: &CanvasSession,
    ) -> Result<()> {
        self.render(surface, content, language, session)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Run button
// ═══════════════════════════════════════════════════════════════════════

/// Toolbar button that names the connector a run would go to.
///
/// The orchestrator stores that connector's name under
/// [`RUN_TARGET_STATE`] before toolbars render.
pub struct RunToolbarCapability {
    languages: LanguageSet,
}

impl RunToolbarCapability {
    pub fn new() -> Self {
        Self {
            languages: LanguageSet::Any,
        }
    }
}

impl Default for RunToolbarCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for RunToolbarCapability {
    fn id(&self) -> &str {
        "run"
    }

    fn label(&self) -> &str {
        "Run"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Toolbar
    }

    fn languages(&self) -> &LanguageSet {
        &self.languages
    }

    fn render(
        &self,
        surface: &mut Surface,
        _content: &str,
        _language: Language,
        session: &CanvasSession,
    ) -> Result<()> {
        match session.state::<String>(RUN_TARGET_STATE) {
            Some(target) => surface.set_body(format!("Run with {}", target)),
            None => surface.set_body("Run (no connector)"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_runtime_core::history::VersionStore;
    use canvas_runtime_core::models::Document;

    fn session_with_history(versions: &[&str]) -> CanvasSession {
        let store = VersionStore::new();
        let mut outcome = None;
        for v in versions {
            outcome = Some(store.record_version("t", v, Language::Python));
        }
        let outcome = outcome.expect("at least one version");
        let last = versions[versions.len() - 1];
        CanvasSession::new(Document::new("t", Language::Python, last), &outcome)
    }

    #[tokio::test]
    async fn test_editor_init_attaches_and_destroy_detaches() {
        let mut session = session_with_history(&["x = 1"]);
        let editor = EditorCapability::new();
        editor.init(&mut session).await.unwrap();
        let handle = session.editor().unwrap();
        handle.edit("x = 2");
        assert_eq!(session.content(), "x = 2");

        editor.destroy(&mut session).unwrap();
        assert!(session.editor().is_none());
        assert_eq!(session.content(), "x = 2");
    }

    #[test]
    fn test_changes_only_with_previous_version() {
        let changes = ChangesCapability::new();
        assert!(!changes.should_activate_tab(&session_with_history(&["a"])));
        assert!(changes.should_activate_tab(&session_with_history(&["a", "b"])));
    }

    #[test]
    fn test_changes_render_shows_diff() {
        let session = session_with_history(&["a\nb\nc", "a\nx\nc"]);
        let mut surface = Surface::new();
        ChangesCapability::new()
            .render(&mut surface, "a\nx\nc", Language::Python, &session)
            .unwrap();
        assert!(surface.body.starts_with("+1 -1 (v2 vs v1)\n"));
        assert!(surface.body.contains("- b\n+ x\n"));
    }

    #[test]
    fn test_run_button_label() {
        let mut session = session_with_history(&["print(1)"]);
        let run = RunToolbarCapability::new();
        let mut surface = Surface::new();
        run.render(&mut surface, "", Language::Python, &session).unwrap();
        assert_eq!(surface.body, "Run (no connector)");

        session.insert_state(RUN_TARGET_STATE, "Lua sandbox".to_string());
        run.render(&mut surface, "", Language::Python, &session).unwrap();
        assert_eq!(surface.body, "Run with Lua sandbox");
    }
}
