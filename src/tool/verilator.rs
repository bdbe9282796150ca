//! Verilator: compiles RTL plus C++ testbench sources into a simulator
//! executable (`compile` step).

use std::path::PathBuf;

use async_trait::async_trait;

use crate::artifact::ArtifactKind;

use super::{StepInvocation, Tool};

/// Verilator build directory inside the step workdir
const OBJ_DIR: &str = "obj_dir";

pub struct VerilatorTool {
    program: String,
}

impl VerilatorTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn executable_name(inv: &StepInvocation) -> String {
        format!("{}.vexe", inv.design)
    }
}

#[async_trait]
impl Tool for VerilatorTool {
    fn name(&self) -> &str {
        "verilator"
    }

    fn command_line(&self, inv: &StepInvocation) -> Vec<String> {
        let mut cmd = vec![
            self.program.clone(),
            "--cc".to_string(),
            "--exe".to_string(),
            "--build".to_string(),
            "-j".to_string(),
            "0".to_string(),
            "--top-module".to_string(),
            inv.entrypoint.clone(),
            "-Mdir".to_string(),
            inv.workdir.join(OBJ_DIR).display().to_string(),
            "-o".to_string(),
            Self::executable_name(inv),
        ];
        if inv.trace {
            cmd.push("--trace".to_string());
        }
        cmd.extend(inv.options.iter().cloned());
        cmd.extend(inv.extra_flags.iter().cloned());
        cmd.extend(inv.include_dirs.iter().map(|d| format!("-I{}", d.display())));
        cmd.extend(inv.verilog.iter().map(|p| p.display().to_string()));
        cmd.extend(inv.c_sources.iter().map(|p| p.display().to_string()));
        cmd
    }

    fn declared_outputs(&self, inv: &StepInvocation) -> Vec<(ArtifactKind, PathBuf)> {
        vec![(
            ArtifactKind::Executable,
            inv.workdir.join(OBJ_DIR).join(Self::executable_name(inv)),
        )]
    }
}
