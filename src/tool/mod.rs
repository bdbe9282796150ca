//! # External Tool Layer
//!
//! Every flow step is bound to a tool by name. A tool turns a
//! [`StepInvocation`] into a command line, runs it, and reports the exit
//! code plus the artifacts it declares.
//!
//! - [`SurelogTool`] - SystemVerilog front-end (`import` step)
//! - [`VerilatorTool`] - Verilator compiler (`compile` step)
//! - [`CommandTool`] - generic program, outputs declared via tool config
//! - [`MockTool`] - scripted tool for tests
//!
//! ## Creating Tools
//!
//! ```rust
//! use lemonflow::tool::{create_tool, ToolBinaries};
//!
//! let binaries = ToolBinaries::default();
//! assert!(create_tool("verilator", &binaries).is_ok());
//! assert!(create_tool("iverilog", &binaries).is_err());
//! ```

mod command;
mod mock;
mod surelog;
mod verilator;

pub use command::CommandTool;
pub use mock::MockTool;
pub use surelog::SurelogTool;
pub use verilator::VerilatorTool;

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::artifact::ArtifactKind;
use crate::error::{LemonError, Result};

/// Everything a tool needs to run one step of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInvocation {
    pub flow: String,
    pub job: String,
    pub design: String,
    pub step: String,
    pub tool: String,
    /// Testbench / top module selected by the job
    pub entrypoint: String,
    pub trace: bool,
    pub verilog: Vec<PathBuf>,
    pub c_sources: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    /// `tool/option` values from the flow's tool config
    pub options: Vec<String>,
    /// `tool/output` values (`kind=filename`) from the flow's tool config
    pub outputs: Vec<String>,
    /// Job-level free-form flags
    pub extra_flags: Vec<String>,
    /// Private output directory of this step
    pub workdir: PathBuf,
}

/// What a finished tool process reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// `None` if the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Declared outputs; only meaningful on success
    pub artifacts: Vec<(ArtifactKind, PathBuf)>,
    /// Last line of stderr, for failure reports
    pub message: String,
}

impl ToolOutcome {
    pub fn success(artifacts: Vec<(ArtifactKind, PathBuf)>) -> Self {
        Self {
            exit_code: Some(0),
            artifacts,
            message: String::new(),
        }
    }

    pub fn failure(exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            artifacts: Vec::new(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Single execution contract shared by every external tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as bound in flow graphs
    fn name(&self) -> &str;

    /// Full command line (program first)
    fn command_line(&self, invocation: &StepInvocation) -> Vec<String>;

    /// Outputs the tool promises when it exits cleanly
    fn declared_outputs(&self, invocation: &StepInvocation) -> Vec<(ArtifactKind, PathBuf)>;

    /// Extra environment for the process
    fn environment(&self, _invocation: &StepInvocation) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Run the tool to completion. Errors only when the process cannot be started.
    async fn run(&self, invocation: &StepInvocation) -> Result<ToolOutcome> {
        let command = self.command_line(invocation);
        let env = self.environment(invocation);
        let outcome = run_process(&command, &invocation.workdir, &env).await?;
        if outcome.is_success() {
            Ok(ToolOutcome {
                artifacts: self.declared_outputs(invocation),
                ..outcome
            })
        } else {
            Ok(outcome)
        }
    }
}

/// Spawn `command` in `workdir`, capture output to `<workdir>/<program>.log`
#[instrument(skip(env), fields(program = %command.first().map(String::as_str).unwrap_or("")))]
pub async fn run_process(
    command: &[String],
    workdir: &Path,
    env: &[(String, String)],
) -> Result<ToolOutcome> {
    let Some((program, args)) = command.split_first() else {
        return Err(LemonError::Config {
            reason: "empty command line".to_string(),
        });
    };

    debug!(?args, "spawning");
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(workdir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .output()
        .await?;

    let stem = Path::new(program)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tool".to_string());
    let mut log = output.stdout.clone();
    log.extend_from_slice(&output.stderr);
    tokio::fs::write(workdir.join(format!("{}.log", stem)), &log).await?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string();

    Ok(ToolOutcome {
        exit_code: output.status.code(),
        artifacts: Vec::new(),
        message,
    })
}

/// errno for "text file busy": a freshly written executable can still be
/// held open by a concurrently forked child
const ETXTBSY: i32 = 26;
const LAUNCH_ATTEMPTS: u32 = 5;

/// Launch a produced executable, passing `args` through untouched
pub async fn launch(path: &Path, args: &[String]) -> Result<ExitStatus> {
    debug!(path = %path.display(), ?args, "launching");
    let mut attempt = 1;
    loop {
        match tokio::process::Command::new(path).args(args).status().await {
            Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempt < LAUNCH_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            result => {
                return result.map_err(|source| LemonError::Launch {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// Program paths for the built-in tools
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolBinaries {
    pub surelog: String,
    pub verilator: String,
    pub yosys: String,
    pub openroad: String,
}

impl Default for ToolBinaries {
    fn default() -> Self {
        Self {
            surelog: "surelog".to_string(),
            verilator: "verilator".to_string(),
            yosys: "yosys".to_string(),
            openroad: "openroad".to_string(),
        }
    }
}

/// Instantiate a built-in tool by name
pub fn create_tool(name: &str, binaries: &ToolBinaries) -> Result<Box<dyn Tool>> {
    match name {
        "surelog" => Ok(Box::new(SurelogTool::new(&binaries.surelog))),
        "verilator" => Ok(Box::new(VerilatorTool::new(&binaries.verilator))),
        "yosys" => Ok(Box::new(CommandTool::new("yosys", &binaries.yosys))),
        "openroad" => Ok(Box::new(CommandTool::new("openroad", &binaries.openroad))),
        "mock" => Ok(Box::new(MockTool::new("mock"))),
        _ => Err(LemonError::UnknownTool {
            name: name.to_string(),
        }),
    }
}

/// Name -> tool lookup with lazy creation (lock-free cache)
#[derive(Clone)]
pub struct ToolRegistry {
    binaries: ToolBinaries,
    cache: Arc<DashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new(binaries: ToolBinaries) -> Self {
        Self {
            binaries,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Register (or replace) a tool under its own name
    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.cache.insert(tool.name().to_string(), tool);
    }

    /// Get or create a tool (atomic via DashMap entry API)
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        use dashmap::mapref::entry::Entry;

        match self.cache.entry(name.to_string()) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let tool: Arc<dyn Tool> = Arc::from(create_tool(name, &self.binaries)?);
                e.insert(Arc::clone(&tool));
                Ok(tool)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ToolBinaries::default())
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("binaries", &self.binaries)
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_invocation(step: &str, tool: &str, workdir: &Path) -> StepInvocation {
    StepInvocation {
        flow: "verilator_sim".into(),
        job: "alu_test".into(),
        design: "lemoncore".into(),
        step: step.into(),
        tool: tool.into(),
        entrypoint: "alu".into(),
        trace: false,
        verilog: vec![PathBuf::from("rtl/core/alu.v")],
        c_sources: vec![PathBuf::from("sim/alu_tb.cpp")],
        include_dirs: vec![PathBuf::from("rtl/core")],
        options: vec![],
        outputs: vec![],
        extra_flags: vec![],
        workdir: workdir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_known_tools() {
        let b = ToolBinaries::default();
        for name in ["surelog", "verilator", "yosys", "openroad", "mock"] {
            assert_eq!(create_tool(name, &b).unwrap().name(), name);
        }
        assert!(matches!(
            create_tool("iverilog", &b),
            Err(LemonError::UnknownTool { .. })
        ));
    }

    #[test]
    fn registry_caches_and_overrides() {
        let registry = ToolRegistry::default();
        let a = registry.get("verilator").unwrap();
        let b = registry.get("verilator").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let mock: Arc<dyn Tool> = Arc::new(MockTool::new("verilator"));
        registry.register(Arc::clone(&mock));
        assert!(Arc::ptr_eq(&registry.get("verilator").unwrap(), &mock));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_process_reports_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let cmd: Vec<String> = ["sh", "-c", "echo bad thing >&2; exit 3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let outcome = run_process(&cmd, dir.path(), &[]).await.unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.message, "bad thing");
        assert!(dir.path().join("sh.log").exists());
    }

    #[tokio::test]
    async fn run_process_missing_binary_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = vec!["definitely-not-a-real-eda-tool".to_string()];
        assert!(run_process(&cmd, dir.path(), &[]).await.is_err());
    }
}
