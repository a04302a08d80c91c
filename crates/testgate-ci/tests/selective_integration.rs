//! Change-scoped selection against real git repositories.

use std::path::Path;
use std::process::Command;

use testgate_ci::fakes::ScriptedExecutor;
use testgate_ci::{
    detect_changes, ChangeDetection, ChangeSelector, FullSuiteReason, ScopeRule, SelectionPlan,
    SelectorConfig, UnmatchedPolicy,
};
use testgate_core::{CommandTaskExecutor, Task};

fn run_git(repo_dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn make_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
    run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
    run_git(dir.path(), &["tag", "base"]);
    dir
}

fn commit_files(repo_dir: &Path, files: &[&str]) {
    for rel in files {
        let path = repo_dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, rel).unwrap();
        run_git(repo_dir, &["add", rel]);
    }
    run_git(repo_dir, &["commit", "-m", "change"]);
}

#[tokio::test]
async fn test_backend_change_runs_only_backend_scope() {
    let repo = make_git_repo();
    commit_files(repo.path(), &["packages/backend/src/orders.ts"]);

    let detection = detect_changes(repo.path(), "base");
    assert!(matches!(detection, ChangeDetection::Diff { .. }));

    let executor = ScriptedExecutor::new();
    let result = ChangeSelector::default()
        .run(&executor, &detection)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(executor.task_labels(), vec!["backend:test"]);
}

#[tokio::test]
async fn test_non_ascii_backend_path_still_selects_backend() {
    let repo = make_git_repo();
    commit_files(repo.path(), &["packages/backend/src/café.ts"]);

    let detection = detect_changes(repo.path(), "base");
    assert_eq!(
        detection.changes().map(|c| c.paths().to_vec()),
        Some(vec!["packages/backend/src/café.ts".to_string()])
    );

    let executor = ScriptedExecutor::new();
    let result = ChangeSelector::default()
        .run(&executor, &detection)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(executor.task_labels(), vec!["backend:test"]);
}

#[tokio::test]
async fn test_two_scopes_run_in_rule_order_and_failure_propagates() {
    let repo = make_git_repo();
    commit_files(
        repo.path(),
        &["packages/frontend/src/App.tsx", "packages/backend/src/db.ts"],
    );

    let executor = ScriptedExecutor::new().fail_task("frontend:test");
    let result = ChangeSelector::default()
        .run(&executor, &detect_changes(repo.path(), "base"))
        .await
        .unwrap();

    assert_eq!(executor.task_labels(), vec!["backend:test", "frontend:test"]);
    assert!(!result.success);
    assert_eq!(result.failed_scopes(), vec!["frontend"]);
}

#[tokio::test]
async fn test_docs_only_change_runs_nothing() {
    let repo = make_git_repo();
    commit_files(repo.path(), &["docs/README.md"]);

    let executor = ScriptedExecutor::new();
    let result = ChangeSelector::default()
        .run(&executor, &detect_changes(repo.path(), "base"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(executor.call_count(), 0);
    assert!(matches!(result.plan, SelectionPlan::NothingToRun { .. }));
}

#[tokio::test]
async fn test_no_changes_runs_full_suite_only() {
    let repo = make_git_repo();

    let executor = ScriptedExecutor::new();
    let result = ChangeSelector::default()
        .run(&executor, &detect_changes(repo.path(), "base"))
        .await
        .unwrap();

    assert_eq!(executor.task_labels(), vec!["test"]);
    assert!(matches!(
        result.plan,
        SelectionPlan::FullSuite {
            reason: FullSuiteReason::NoChanges,
            ..
        }
    ));
}

#[test]
fn test_missing_base_falls_back_to_last_commit() {
    let repo = make_git_repo();
    commit_files(repo.path(), &["packages/backend/a.ts"]);
    commit_files(repo.path(), &["packages/frontend/b.tsx"]);

    let detection = detect_changes(repo.path(), "origin/not-fetched");
    match detection {
        ChangeDetection::LastCommit { changes } => {
            assert_eq!(changes.paths(), &["packages/frontend/b.tsx".to_string()])
        }
        other => panic!("expected last-commit fallback, got {other:?}"),
    }
}

#[tokio::test]
async fn test_outside_repo_runs_full_suite() {
    let dir = tempfile::tempdir().unwrap();
    let detection = detect_changes(dir.path(), "origin/main");

    let executor = ScriptedExecutor::new();
    let result = ChangeSelector::default()
        .run(&executor, &detection)
        .await
        .unwrap();

    assert_eq!(executor.task_labels(), vec!["test"]);
    assert!(matches!(
        result.plan,
        SelectionPlan::FullSuite {
            reason: FullSuiteReason::ChangesUnavailable,
            ..
        }
    ));
}

#[tokio::test]
async fn test_real_commands_run_for_every_scope() {
    let repo = make_git_repo();
    commit_files(repo.path(), &["api/handler.rs", "web/index.html"]);

    let out = tempfile::tempdir().unwrap();
    let log = out.path().join("ran.log");
    let append = |scope: &str| {
        Task::exec([
            "sh".to_string(),
            "-c".to_string(),
            format!("echo {scope} >> {}; [ {scope} != api ]", log.display()),
        ])
    };

    let config = SelectorConfig {
        rules: vec![
            ScopeRule::new("api", append("api")).with_prefix("api/"),
            ScopeRule::new("web", append("web")).with_prefix("web/"),
        ],
        full_suite: Task::exec(["true"]),
        unmatched: UnmatchedPolicy::Skip,
    };
    let executor = CommandTaskExecutor {
        capture: true,
        ..CommandTaskExecutor::default()
    };

    let result = ChangeSelector::new(config)
        .run(&executor, &detect_changes(repo.path(), "base"))
        .await
        .unwrap();

    assert!(!result.success, "api scope exits non-zero");
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "api\nweb\n");
}
