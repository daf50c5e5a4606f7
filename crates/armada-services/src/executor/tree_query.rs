//! Depth-bounded filesystem walk reported as JSON.
//!
//! The request command is the root path. Parameters:
//! - `maxDepth`: recursion limit below the root (default from settings)
//! - `includeFiles`: list files as well as directories (default true)
//!
//! A directory that cannot be read gets an entry in `errors` and the walk
//! continues with its siblings. Only an unreadable root fails the query.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use armada_core::{ErrorKind, ExecutionRequest, ExecutionResult, ExecutorKind};

use super::Executor;
use crate::cancel::CancelSignal;

/// Upper bound on reported nodes; the walk stops and flags `truncated`.
const MAX_NODES: usize = 100_000;

pub struct TreeQueryExecutor {
    default_depth: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    path: String,
    #[serde(rename = "type")]
    node_type: &'static str,
    depth: u32,
}

#[derive(Debug, Serialize)]
struct NodeError {
    path: String,
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TreeReport {
    root: String,
    max_depth: u32,
    nodes: Vec<Node>,
    errors: Vec<NodeError>,
    truncated: bool,
}

impl TreeQueryExecutor {
    pub fn new(default_depth: u32) -> Self {
        Self { default_depth }
    }
}

fn walk(
    root: &Path,
    max_depth: u32,
    include_files: bool,
    abort: &AtomicBool,
) -> std::io::Result<TreeReport> {
    // Fail the whole query only when the root itself is unusable.
    std::fs::read_dir(root)?;

    let mut report = TreeReport {
        root: root.display().to_string(),
        max_depth,
        nodes: Vec::new(),
        errors: Vec::new(),
        truncated: false,
    };
    let mut stack: Vec<(PathBuf, u32)> = vec![(root.to_path_buf(), 0)];

    while let Some((dir, depth)) = stack.pop() {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) => {
                report.errors.push(NodeError {
                    path: dir.display().to_string(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        let mut children: Vec<_> = entries.filter_map(Result::ok).collect();
        children.sort_by_key(|e| e.file_name());

        let mut subdirs = Vec::new();
        for entry in children {
            let path = entry.path();
            // file_type() does not follow symlinks, so link cycles are not walked.
            let is_dir = match entry.file_type() {
                Ok(t) => t.is_dir(),
                Err(e) => {
                    report.errors.push(NodeError {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            if !is_dir && !include_files {
                continue;
            }
            if report.nodes.len() >= MAX_NODES {
                report.truncated = true;
                return Ok(report);
            }
            report.nodes.push(Node {
                path: path.display().to_string(),
                node_type: if is_dir { "directory" } else { "file" },
                depth: depth + 1,
            });
            if is_dir && depth + 1 < max_depth {
                subdirs.push((path, depth + 1));
            }
        }
        // Reverse so the stack pops siblings in name order.
        stack.extend(subdirs.into_iter().rev());
    }
    Ok(report)
}

#[async_trait]
impl Executor for TreeQueryExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::TreeQuery
    }

    fn supports_platform(&self) -> bool {
        true
    }

    async fn execute(&self, request: ExecutionRequest, mut cancel: CancelSignal) -> ExecutionResult {
        let started = armada_core::now_ms();
        let root = request.command.trim();
        if root.is_empty() {
            return ExecutionResult::failed(ErrorKind::InvalidRequest, "empty root path", started);
        }
        let mut root = PathBuf::from(root);
        if root.is_relative() {
            if let Some(dir) = &request.working_directory {
                root = dir.join(root);
            }
        }
        let max_depth = request
            .parameters
            .get("maxDepth")
            .and_then(|v| v.as_u64())
            .map(|d| d.min(u32::MAX as u64) as u32)
            .unwrap_or(self.default_depth);
        let include_files = request
            .parameters
            .get("includeFiles")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let abort = Arc::new(AtomicBool::new(false));
        let flag = abort.clone();
        let walk_root = root.clone();
        let task =
            tokio::task::spawn_blocking(move || walk(&walk_root, max_depth, include_files, &flag));

        tokio::select! {
            joined = task => match joined {
                Ok(Ok(report)) => match serde_json::to_string(&report) {
                    Ok(json) => ExecutionResult::exited(0, json, String::new(), started),
                    Err(e) => ExecutionResult::failed(ErrorKind::Io, e.to_string(), started),
                },
                Ok(Err(e)) => ExecutionResult::failed(
                    ErrorKind::Io,
                    format!("cannot read {}: {e}", root.display()),
                    started,
                ),
                Err(e) => ExecutionResult::failed(ErrorKind::Io, format!("walk panicked: {e}"), started),
            },
            _ = tokio::time::sleep(request.timeout) => {
                abort.store(true, Ordering::Relaxed);
                ExecutionResult::timed_out(request.timeout, String::new(), String::new(), started)
            }
            _ = cancel.cancelled() => {
                abort.store(true, Ordering::Relaxed);
                ExecutionResult::failed(ErrorKind::Cancelled, "cancelled", started)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        std::fs::write(dir.path().join("a/one.txt"), "1").unwrap();
        std::fs::write(dir.path().join("a/b/two.txt"), "2").unwrap();
        std::fs::create_dir(dir.path().join("z")).unwrap();
        dir
    }

    async fn query(
        root: &Path,
        params: serde_json::Value,
    ) -> (ExecutionResult, serde_json::Value) {
        let req = ExecutionRequest::new(root.display().to_string(), Duration::from_secs(5))
            .with_parameters(params.as_object().cloned().unwrap_or_default());
        let r = TreeQueryExecutor::new(8)
            .execute(req, CancelSignal::never())
            .await;
        let json = serde_json::from_str(&r.stdout).unwrap_or(serde_json::Value::Null);
        (r, json)
    }

    #[tokio::test]
    async fn walks_whole_tree() {
        let dir = tree();
        let (r, json) = query(dir.path(), serde_json::json!({})).await;
        assert!(r.succeeded(), "{r:?}");
        let nodes = json["nodes"].as_array().unwrap();
        // a, a/b, a/b/c, a/b/two.txt, a/one.txt, z
        assert_eq!(nodes.len(), 6);
        assert_eq!(json["truncated"], false);
    }

    #[tokio::test]
    async fn depth_is_bounded() {
        let dir = tree();
        let (_, json) = query(dir.path(), serde_json::json!({"maxDepth": 1})).await;
        let nodes = json["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n["depth"] == 1));
    }

    #[tokio::test]
    async fn files_can_be_excluded() {
        let dir = tree();
        let (_, json) = query(dir.path(), serde_json::json!({"includeFiles": false})).await;
        let nodes = json["nodes"].as_array().unwrap();
        assert!(nodes.iter().all(|n| n["type"] == "directory"));
        assert_eq!(nodes.len(), 4);
    }

    #[tokio::test]
    async fn missing_root_is_io_failure() {
        let (r, _) = query(Path::new("/nonexistent/armada-root"), serde_json::json!({})).await;
        assert_eq!(r.error_kind(), Some(ErrorKind::Io));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_subtree_recorded_and_siblings_continue() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tree();
        let locked = dir.path().join("a/b");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        // Permission bits do not restrict a privileged user.
        if std::fs::read_dir(&locked).is_ok() {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let (r, json) = query(dir.path(), serde_json::json!({})).await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(r.succeeded());
        let errors = json["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0]["path"].as_str().unwrap().ends_with("b"));
        let paths: Vec<_> = json["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["path"].as_str().unwrap().to_string())
            .collect();
        assert!(paths.iter().any(|p| p.ends_with("z")));
        assert!(paths.iter().any(|p| p.ends_with("one.txt")));
    }
}
