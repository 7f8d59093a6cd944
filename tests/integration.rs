use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use canvas_runtime::config::Config;
use canvas_runtime::dispatch::RunOutcome;
use canvas_runtime::orchestrator::{MountTarget, Presentation, RenderOrchestrator, Workspace};
use canvas_runtime::traits::{CapabilityRegistry, ConnectorRegistry};
use canvas_runtime_core::diff::{compute_line_diff, diff_stats};
use canvas_runtime_core::models::{DiffOp, Language};

fn canvas_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("canvas");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("old.py"), "a\nb\nc").unwrap();
    fs::write(files_dir.join("new.py"), "a\nx\nc").unwrap();
    fs::write(
        files_dir.join("report.lua"),
        "for i = 1, 3 do print('row ' .. i) end\nreturn { rows = 3 }",
    )
    .unwrap();
    fs::write(files_dir.join("spin.lua"), "while true do end").unwrap();
    fs::write(
        files_dir.join("stuck.lua"),
        "return string.find(string.rep('a', 4000), '.-.-.-.-b')",
    )
    .unwrap();
    fs::write(files_dir.join("page.css"), "body { margin: 0 }").unwrap();

    let config_content = r#"[sandbox]
timeout_secs = 1

[interpreter]
command = "python3"

[animation]
target_ms = 100
"#;
    let config_path = config_dir.join("canvas.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_canvas(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = canvas_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run canvas binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn file(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn workspace() -> Arc<Workspace> {
    Arc::new(Workspace::new(
        Config::default(),
        CapabilityRegistry::with_builtins(),
        ConnectorRegistry::new(),
    ))
}

// ─── CLI ────────────────────────────────────────────────────────────

#[test]
fn test_cli_diff() {
    let (_tmp, config_path) = setup_test_env();
    let old = file(&config_path, "old.py");
    let new = file(&config_path, "new.py");

    let (stdout, stderr, success) = run_canvas(&config_path, &["diff", &old, &new]);
    assert!(success, "diff failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("- b\n+ x\n"));
    assert!(stdout.contains("1 added, 1 removed, 2 unchanged"));
}

#[test]
fn test_cli_run_lua() {
    let (_tmp, config_path) = setup_test_env();
    let script = file(&config_path, "report.lua");

    let (stdout, stderr, success) = run_canvas(&config_path, &["run", &script]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.starts_with("row 1\nrow 2\nrow 3\n{\"rows\":3}\n"));
    assert!(stdout.contains("(4 units,"));
}

#[test]
fn test_cli_run_json_timeout() {
    let (_tmp, config_path) = setup_test_env();
    let script = file(&config_path, "spin.lua");

    let (stdout, stderr, success) = run_canvas(&config_path, &["run", &script, "--json"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(json["output"].is_null());
    assert!(json["error"].as_str().unwrap().contains("timed out"));
    let time_ms = json["stats"]["time_ms"].as_u64().unwrap();
    assert!((1_000..3_000).contains(&time_ms), "time_ms = {}", time_ms);
}

#[test]
fn test_cli_exits_after_stuck_script_times_out() {
    let (_tmp, config_path) = setup_test_env();
    let script = file(&config_path, "stuck.lua");

    let started = Instant::now();
    let mut child = Command::new(canvas_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["run", &script])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if started.elapsed() > Duration::from_secs(15) {
            child.kill().unwrap();
            panic!("canvas did not exit after the sandbox timed out");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    assert!(status.success());

    let mut stdout = String::new();
    child.stdout.take().unwrap().read_to_string(&mut stdout).unwrap();
    assert!(stdout.contains("error: execution timed out"), "stdout: {}", stdout);
}

#[test]
fn test_cli_run_without_connector() {
    let (_tmp, config_path) = setup_test_env();
    let page = file(&config_path, "page.css");

    let (stdout, _, success) = run_canvas(&config_path, &["run", &page]);
    assert!(success);
    assert!(stdout.contains("error: no connector"));
    assert!(stdout.contains("(0 units, 0 ms)"));
}

#[test]
fn test_cli_connectors_and_capabilities() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_canvas(&config_path, &["connectors"]);
    assert!(success);
    let ids: Vec<&str> = stdout
        .lines()
        .skip(1)
        .filter_map(|l| l.split_whitespace().next())
        .collect();
    assert_eq!(ids, vec!["lua-sandbox", "interpreter"]);

    let (stdout, _, success) =
        run_canvas(&config_path, &["capabilities", "--language", "python"]);
    assert!(success);
    assert!(stdout.contains("editor"));
    assert!(stdout.contains("toolbar"));
}

#[test]
fn test_cli_rejects_invalid_config() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[sandbox]\ntimeout_secs = 0\n").unwrap();

    let (_, stderr, success) = run_canvas(&config_path, &["connectors"]);
    assert!(!success);
    assert!(stderr.contains("timeout_secs"));
}

// ─── Library scenarios ──────────────────────────────────────────────

#[tokio::test]
async fn test_present_twice_records_two_versions() {
    let orchestrator = RenderOrchestrator::new(workspace());
    let target = Some(MountTarget::new("chat"));

    let first = orchestrator
        .mount(Presentation::new("t", Language::Python, "print(1)"), target.clone())
        .await
        .unwrap();
    first.unmount();
    let second = orchestrator
        .mount(Presentation::new("T ", Language::Python, "print(2)"), target)
        .await
        .unwrap();

    let versions = &orchestrator.workspace().versions;
    assert_eq!(versions.len("t"), 2);
    assert_eq!(second.session().version_number, 2);
    assert_eq!(second.session().previous_content.as_deref(), Some("print(1)"));
}

#[tokio::test]
async fn test_represent_unchanged_content_is_deduplicated() {
    let orchestrator = RenderOrchestrator::new(workspace());
    for _ in 0..3 {
        let canvas = orchestrator
            .mount(
                Presentation::new("same", Language::Sql, "select 1"),
                Some(MountTarget::new("chat")),
            )
            .await
            .unwrap();
        assert_eq!(canvas.session().version_number, 1);
        assert_eq!(canvas.tabs(), ["editor"]);
    }
    assert_eq!(orchestrator.workspace().versions.current_ordinal(), 1);
}

#[test]
fn test_diff_scenario() {
    let ops = compute_line_diff("a\nb\nc", "a\nx\nc");
    assert_eq!(
        ops,
        vec![
            DiffOp::Equal {
                text: "a".into(),
                old_line: 1,
                new_line: 1
            },
            DiffOp::Removed {
                text: "b".into(),
                old_line: 2
            },
            DiffOp::Added {
                text: "x".into(),
                new_line: 2
            },
            DiffOp::Equal {
                text: "c".into(),
                old_line: 3,
                new_line: 3
            },
        ]
    );
    let stats = diff_stats(&ops);
    assert_eq!((stats.added, stats.removed), (1, 1));
}

#[tokio::test]
async fn test_run_with_zero_connectors() {
    let orchestrator = RenderOrchestrator::new(workspace());
    let canvas = orchestrator
        .mount(
            Presentation::new("q", Language::Sql, "select 1"),
            Some(MountTarget::new("chat")),
        )
        .await
        .unwrap();
    match canvas.run().await {
        RunOutcome::Finished(result) => {
            assert_eq!(result.output(), None);
            assert_eq!(result.error(), Some("no connector"));
            assert_eq!(result.stats.unit_count, 0);
            assert_eq!(result.stats.time_ms, 0);
        }
        RunOutcome::Cancelled => panic!("unexpected cancellation"),
    }
}

#[tokio::test]
async fn test_summary_tracks_full_view_edits() {
    let orchestrator = RenderOrchestrator::new(workspace());
    let mut canvas = orchestrator
        .mount(
            Presentation::new("doc", Language::Markdown, "# Title"),
            Some(MountTarget::new("chat")),
        )
        .await
        .unwrap();

    let summary = canvas.summary();
    assert!(!summary.is_modified());
    assert!(canvas.edit("# Title\n\nMore"));
    assert!(summary.is_modified());
    assert_eq!(summary.content(), "# Title\n\nMore");

    let snapshot = canvas.context_snapshot();
    assert_eq!(snapshot.title, "doc");
    assert!(snapshot.modified);
    assert_eq!(snapshot.content, "# Title\n\nMore");

    canvas.unmount();
    // The editor is gone; the summary keeps the last live content.
    assert_eq!(summary.content(), "# Title\n\nMore");
}
