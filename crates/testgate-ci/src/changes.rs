//! Change sets and their detection from git.

use std::path::Path;

use serde::Serialize;
use testgate_core::git;
use tracing::{debug, warn};

/// Paths reported as changed between two revisions, in diff order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    paths: Vec<String>,
}

impl ChangeSet {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.trim().is_empty())
                .collect(),
        }
    }

    /// Parse newline-delimited `git diff --name-only` output.
    pub fn from_diff_output(output: &str) -> Self {
        Self::new(output.lines().map(str::trim))
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }
}

/// How the change set was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ChangeDetection {
    /// Diff of `base...HEAD`.
    Diff { base: String, changes: ChangeSet },

    /// The base ref could not be resolved; diff of the last commit only.
    LastCommit { changes: ChangeSet },

    /// No version-control context. Callers should run everything.
    Unavailable { reason: String },
}

impl ChangeDetection {
    pub fn changes(&self) -> Option<&ChangeSet> {
        match self {
            ChangeDetection::Diff { changes, .. } | ChangeDetection::LastCommit { changes } => {
                Some(changes)
            }
            ChangeDetection::Unavailable { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ChangeDetection::Diff { base, changes } => {
                format!("{} changed file(s) since {}", changes.len(), base)
            }
            ChangeDetection::LastCommit { changes } => {
                format!("{} changed file(s) in the last commit", changes.len())
            }
            ChangeDetection::Unavailable { reason } => format!("changes unavailable: {reason}"),
        }
    }
}

/// Work out what changed in `repo_dir` relative to `base_ref`.
///
/// Falls back to the last commit when the base ref cannot be diffed and
/// to [`ChangeDetection::Unavailable`] when that fails too. Never errors.
pub fn detect_changes(repo_dir: &Path, base_ref: &str) -> ChangeDetection {
    if !git::is_git_repo(repo_dir) {
        return ChangeDetection::Unavailable {
            reason: format!("{} is not inside a git work tree", repo_dir.display()),
        };
    }

    match git::changed_files(repo_dir, base_ref) {
        Ok(paths) => {
            debug!(base = base_ref, count = paths.len(), "Diffed against base ref");
            return ChangeDetection::Diff {
                base: base_ref.to_string(),
                changes: ChangeSet::new(paths),
            };
        }
        Err(e) => warn!(base = base_ref, error = %e, "Base ref unavailable, diffing last commit"),
    }

    match git::changed_files_last_commit(repo_dir) {
        Ok(paths) => ChangeDetection::LastCommit {
            changes: ChangeSet::new(paths),
        },
        Err(e) => {
            warn!(error = %e, "Could not compute changed files");
            ChangeDetection::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}
