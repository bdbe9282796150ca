//! Surelog front-end: parses and elaborates the Verilog sources.
//!
//! Used by the `import` step. Produces nothing the rest of the flow
//! consumes beyond its exit status.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::artifact::ArtifactKind;

use super::{StepInvocation, Tool};

pub struct SurelogTool {
    program: String,
}

impl SurelogTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Tool for SurelogTool {
    fn name(&self) -> &str {
        "surelog"
    }

    fn command_line(&self, inv: &StepInvocation) -> Vec<String> {
        let mut cmd = vec![
            self.program.clone(),
            "-parse".to_string(),
            "-nocache".to_string(),
            "-odir".to_string(),
            inv.workdir.display().to_string(),
            "-top".to_string(),
            inv.entrypoint.clone(),
        ];
        cmd.extend(inv.include_dirs.iter().map(|d| format!("-I{}", d.display())));
        cmd.extend(inv.options.iter().cloned());
        cmd.extend(inv.verilog.iter().map(|p| p.display().to_string()));
        cmd
    }

    fn declared_outputs(&self, _inv: &StepInvocation) -> Vec<(ArtifactKind, PathBuf)> {
        Vec::new()
    }
}
