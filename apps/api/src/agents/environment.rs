// Execution environments for workers
//
// Each worker instance gets its own environment for the length of a run.
// The local adapter confines a worker to a workspace directory and runs
// shell commands there with a timeout.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use uuid::Uuid;

use super::errors::{AgentError, AgentResult};
use super::types::AgentRole;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, command: &str, timeout: Duration) -> AgentResult<CommandOutput>;

    async fn read_file(&self, path: &str) -> AgentResult<String>;

    async fn write_file(&self, path: &str, content: &str) -> AgentResult<()>;

    async fn close(&self) -> AgentResult<()>;
}

#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    async fn provision(
        &self,
        worker_id: Uuid,
        role: AgentRole,
    ) -> AgentResult<Arc<dyn ExecutionEnvironment>>;
}

/// Workspace directory on the local filesystem
pub struct LocalEnvironment {
    id: String,
    root: PathBuf,
    closed: AtomicBool,
}

impl LocalEnvironment {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path inside the workspace
    fn resolve(&self, path: &str) -> AgentResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(AgentError::Environment(format!(
                "path '{path}' is outside the workspace"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn ensure_open(&self) -> AgentResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::Environment(format!(
                "environment {} is closed",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, command: &str, timeout: Duration) -> AgentResult<CommandOutput> {
        self.ensure_open()?;
        tracing::debug!(environment = %self.id, command, "Running command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Environment(format!("failed to spawn command: {e}")))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AgentError::Environment(format!(
                    "command timed out after {}s: {command}",
                    timeout.as_secs_f32()
                ))
            })?
            .map_err(|e| AgentError::Environment(format!("command failed: {e}")))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn read_file(&self, path: &str) -> AgentResult<String> {
        self.ensure_open()?;
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| AgentError::Environment(format!("failed to read {path}: {e}")))
    }

    async fn write_file(&self, path: &str, content: &str) -> AgentResult<()> {
        self.ensure_open()?;
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::Environment(format!("failed to create {path}: {e}")))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| AgentError::Environment(format!("failed to write {path}: {e}")))
    }

    async fn close(&self) -> AgentResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(environment = %self.id, "Closing environment");

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::Environment(format!(
                "failed to remove workspace {}: {e}",
                self.root.display()
            ))),
        }
    }
}

/// Provisions one workspace directory per worker under a common root
pub struct LocalEnvironmentProvider {
    root: PathBuf,
}

impl LocalEnvironmentProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl EnvironmentProvider for LocalEnvironmentProvider {
    async fn provision(
        &self,
        worker_id: Uuid,
        role: AgentRole,
    ) -> AgentResult<Arc<dyn ExecutionEnvironment>> {
        // A restart provisions again for the same worker; each incarnation gets its own directory.
        let incarnation = Uuid::new_v4().simple().to_string();
        let id = format!("{role}-{worker_id}-{}", &incarnation[..8]);
        let root = self.root.join(&id);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| AgentError::Environment(format!("failed to provision {id}: {e}")))?;

        tracing::info!(worker_id = %worker_id, role = %role, path = %root.display(), "Environment provisioned");
        Ok(Arc::new(LocalEnvironment {
            id,
            root,
            closed: AtomicBool::new(false),
        }))
    }
}
