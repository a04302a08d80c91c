//! Git helpers for capturing repository state and changed paths.

use std::path::Path;
use std::process::Command;

use crate::error::{Result, TestgateError};

fn git_stdout(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| TestgateError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TestgateError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Capture the HEAD commit SHA from a git repository.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let sha = git_stdout(repo_dir, &["rev-parse", "HEAD"])?.trim().to_string();
    if sha.is_empty() {
        return Err(TestgateError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// Paths with non-ASCII bytes must come back verbatim, not C-quoted.
const DIFF_NAMES: [&str; 4] = ["-c", "core.quotePath=false", "diff", "--name-only"];

/// List paths changed between the merge base of `base_ref` and HEAD.
///
/// Runs `git diff --name-only <base_ref>...HEAD`. Output is returned in
/// git's order with blank lines dropped.
pub fn changed_files(repo_dir: &Path, base_ref: &str) -> Result<Vec<String>> {
    let range = format!("{base_ref}...HEAD");
    let mut args: Vec<&str> = DIFF_NAMES.to_vec();
    args.push(range.as_str());
    let stdout = git_stdout(repo_dir, &args)?;
    Ok(split_paths(&stdout))
}

/// List paths changed by the HEAD commit alone (`HEAD~1..HEAD`).
pub fn changed_files_last_commit(repo_dir: &Path) -> Result<Vec<String>> {
    let mut args: Vec<&str> = DIFF_NAMES.to_vec();
    args.extend(["HEAD~1", "HEAD"]);
    let stdout = git_stdout(repo_dir, &args)?;
    Ok(split_paths(&stdout))
}

fn split_paths(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
