//! Generic external program, used for the synthesis flow steps.
//!
//! Arguments come entirely from the flow's tool config and the job:
//! `<program> <tool options> <extra flags> <verilog>...`. Outputs are
//! declared through the `output` option key as `kind=filename`, relative to
//! the step workdir; `step:kind=filename` limits a declaration to one step
//! when several steps share a tool. Design metadata is exported as `LEMONFLOW_*` variables
//! so tool scripts can pick it up.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::artifact::ArtifactKind;

use super::{StepInvocation, Tool};

pub struct CommandTool {
    name: String,
    program: String,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
        }
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn command_line(&self, inv: &StepInvocation) -> Vec<String> {
        let mut cmd = vec![self.program.clone()];
        cmd.extend(inv.options.iter().cloned());
        cmd.extend(inv.extra_flags.iter().cloned());
        cmd.extend(inv.verilog.iter().map(|p| p.display().to_string()));
        cmd
    }

    fn declared_outputs(&self, inv: &StepInvocation) -> Vec<(ArtifactKind, PathBuf)> {
        inv.outputs
            .iter()
            .filter_map(|entry| {
                let decl = match entry.split_once(':') {
                    Some((step, rest)) if !rest.contains(':') => {
                        if step != inv.step {
                            return None;
                        }
                        rest
                    }
                    _ => entry.as_str(),
                };
                match decl.split_once('=') {
                    Some((kind, file)) if !kind.is_empty() && !file.is_empty() => {
                        kind.parse::<ArtifactKind>().ok().map(|kind| (kind, inv.workdir.join(file)))
                    }
                    _ => {
                        warn!(tool = %self.name, entry = %entry, "ignoring malformed output declaration");
                        None
                    }
                }
            })
            .collect()
    }

    fn environment(&self, inv: &StepInvocation) -> Vec<(String, String)> {
        let includes = inv
            .include_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        vec![
            ("LEMONFLOW_DESIGN".to_string(), inv.design.clone()),
            ("LEMONFLOW_TOP".to_string(), inv.entrypoint.clone()),
            ("LEMONFLOW_JOB".to_string(), inv.job.clone()),
            ("LEMONFLOW_STEP".to_string(), inv.step.clone()),
            ("LEMONFLOW_INCLUDE".to_string(), includes),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::test_invocation;
    use std::path::Path;

    #[test]
    fn outputs_parsed_from_config() {
        let mut inv = test_invocation("syn", "yosys", Path::new("/w/syn"));
        inv.outputs = vec!["vg=lemoncore.vg".into(), "garbage".into(), "log=".into()];
        let outputs = CommandTool::new("yosys", "yosys").declared_outputs(&inv);
        assert_eq!(
            outputs,
            vec![(ArtifactKind::Netlist, PathBuf::from("/w/syn/lemoncore.vg"))]
        );
    }

    #[test]
    fn step_scoped_outputs() {
        let mut inv = test_invocation("route", "openroad", Path::new("/w/route"));
        inv.outputs = vec!["def=lemoncore.def".into(), "export:gds=lemoncore.gds".into()];
        let tool = CommandTool::new("openroad", "openroad");
        assert_eq!(
            tool.declared_outputs(&inv),
            vec![(ArtifactKind::Layout, PathBuf::from("/w/route/lemoncore.def"))]
        );

        inv.step = "export".into();
        inv.workdir = PathBuf::from("/w/export");
        assert_eq!(tool.declared_outputs(&inv).len(), 2);
    }

    #[test]
    fn command_line_and_environment() {
        let mut inv = test_invocation("syn", "yosys", Path::new("/w"));
        inv.options = vec!["-c".into(), "syn.tcl".into()];
        inv.extra_flags = vec!["-DCLOCK_PERIOD=10".into()];
        let tool = CommandTool::new("yosys", "/opt/bin/yosys");
        assert_eq!(
            tool.command_line(&inv),
            ["/opt/bin/yosys", "-c", "syn.tcl", "-DCLOCK_PERIOD=10", "rtl/core/alu.v"]
        );
        let env = tool.environment(&inv);
        assert!(env.contains(&("LEMONFLOW_TOP".to_string(), "alu".to_string())));
        assert!(env.contains(&("LEMONFLOW_INCLUDE".to_string(), "rtl/core".to_string())));
    }
}
