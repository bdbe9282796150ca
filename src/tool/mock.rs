//! Mock tool for testing
//!
//! Returns a scripted exit code and writes its declared artifacts into the
//! step workdir, so orchestrator runs can be exercised without an EDA
//! toolchain installed.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::artifact::ArtifactKind;
use crate::error::Result;

use super::{StepInvocation, Tool, ToolOutcome};

#[derive(Debug, Clone)]
struct MockArtifact {
    kind: ArtifactKind,
    file: String,
    contents: String,
    executable: bool,
}

/// Tool that succeeds or fails on demand and records every invocation
#[derive(Clone)]
pub struct MockTool {
    name: String,
    exit_code: i32,
    artifacts: Vec<MockArtifact>,
    invocations: Arc<Mutex<Vec<StepInvocation>>>,
}

impl MockTool {
    /// Succeeding tool with no outputs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exit_code: 0,
            artifacts: Vec::new(),
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Tool that always exits with `code`
    pub fn failing(name: impl Into<String>, code: i32) -> Self {
        Self::new(name).with_exit_code(code)
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Declare an (empty) artifact file
    pub fn with_artifact(mut self, kind: ArtifactKind, file: impl Into<String>) -> Self {
        self.artifacts.push(MockArtifact {
            kind,
            file: file.into(),
            contents: String::new(),
            executable: false,
        });
        self
    }

    /// Declare an executable artifact containing `script`
    pub fn with_script(
        mut self,
        kind: ArtifactKind,
        file: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        self.artifacts.push(MockArtifact {
            kind,
            file: file.into(),
            contents: script.into(),
            executable: true,
        });
        self
    }

    /// All invocations so far
    pub fn invocations(&self) -> Vec<StepInvocation> {
        self.invocations.lock().clone()
    }

    pub fn last_invocation(&self) -> Option<StepInvocation> {
        self.invocations.lock().last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.invocations.lock().len()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn command_line(&self, inv: &StepInvocation) -> Vec<String> {
        vec!["mock".to_string(), self.name.clone(), inv.step.clone()]
    }

    fn declared_outputs(&self, inv: &StepInvocation) -> Vec<(ArtifactKind, PathBuf)> {
        self.artifacts
            .iter()
            .map(|a| (a.kind.clone(), inv.workdir.join(&a.file)))
            .collect()
    }

    async fn run(&self, inv: &StepInvocation) -> Result<ToolOutcome> {
        self.invocations.lock().push(inv.clone());

        if self.exit_code != 0 {
            return Ok(ToolOutcome::failure(
                Some(self.exit_code),
                format!("mock {} failed", self.name),
            ));
        }

        for artifact in &self.artifacts {
            let path = inv.workdir.join(&artifact.file);
            tokio::fs::write(&path, &artifact.contents).await?;
            #[cfg(unix)]
            if artifact.executable {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
            }
        }

        Ok(ToolOutcome::success(self.declared_outputs(inv)))
    }
}
