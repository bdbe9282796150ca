//! Orchestrator - runs one job through a flow graph
//!
//! Steps run strictly in topological order. Each step gets its own workdir
//! under `<build_dir>/<design>/<job>/<step>/`; the first failing step aborts
//! the run and nothing downstream of it executes.
//!
//! The orchestrator keeps no per-run state, so one instance can serve
//! concurrent runs of jobs with distinct names.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::artifact::{ArtifactKind, ArtifactStore, StepRecord};
use crate::error::{ArtifactNotFound, LemonError, Result, StepFailure, ValidationError};
use crate::event_log::{EventKind, EventLog};
use crate::flow_graph::FlowGraph;
use crate::job::{InputKind, JobSpec};
use crate::tool::{StepInvocation, Tool, ToolOutcome, ToolRegistry};
use crate::tool_config::{ToolConfig, OPTION_KEY, OUTPUT_KEY};

/// Outcome of one orchestrator run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub job: String,
    pub success: bool,
    /// The step that aborted the run, if any
    pub failed_step: Option<StepFailure>,
    pub store: ArtifactStore,
    pub events: EventLog,
    pub duration: Duration,
}

impl RunResult {
    /// Name of the failing step, if the run failed
    pub fn failed_step_name(&self) -> Option<&str> {
        self.failed_step.as_ref().map(|f| f.step.as_str())
    }

    /// Look up an artifact of this run's job
    pub fn find(&self, step: &str, kind: &ArtifactKind) -> std::result::Result<&Path, ArtifactNotFound> {
        self.store.find(&self.job, step, kind)
    }

    /// Convert a failed run into an error
    pub fn into_result(self) -> Result<Self> {
        match self.failed_step {
            Some(failure) => Err(failure.into()),
            None => Ok(self),
        }
    }

    /// Per-step table: step, tool, status, duration, artifacts
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<12} {:<10} {:<10} {:>9}  artifacts",
            "step", "tool", "status", "time"
        );
        for (_, step, record) in self.store.records() {
            let status = if record.is_completed() { "ok" } else { "FAILED" };
            let artifacts = record
                .artifacts()
                .map(|(kind, path)| format!("{}={}", kind, path.display()))
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(
                out,
                "{:<12} {:<10} {:<10} {:>8.2}s  {}",
                step,
                record.tool,
                status,
                record.duration.as_secs_f64(),
                artifacts
            );
        }
        let _ = write!(
            out,
            "job '{}' {} in {:.2}s",
            self.job,
            if self.success { "passed" } else { "failed" },
            self.duration.as_secs_f64()
        );
        out
    }
}

/// Flow executor
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: ToolRegistry,
    build_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(registry: ToolRegistry, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            build_dir: build_dir.into(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Output directory of a job
    pub fn job_dir(&self, job: &JobSpec) -> PathBuf {
        self.build_dir.join(job.design()).join(job.name())
    }

    /// Run `job` through `graph` using `config`.
    ///
    /// Returns `Err` only for problems detected before any step runs
    /// (mismatched flow, unknown tool). Tool failures and workdirs that
    /// cannot be created are reported through [`RunResult::failed_step`].
    #[instrument(skip_all, fields(job = %job.name(), flow = %graph.name()))]
    pub async fn run(&self, job: &JobSpec, graph: &FlowGraph, config: &ToolConfig) -> Result<RunResult> {
        check_flow(job, graph.name())?;
        check_flow(job, config.flow())?;

        let start = Instant::now();
        let order = graph.topological_order();

        // Resolve every tool before touching the filesystem
        let mut plan: Vec<(Arc<str>, Arc<dyn Tool>)> = Vec::with_capacity(order.len());
        for step in &order {
            let tool_name = graph.tool(step).ok_or_else(|| LemonError::UnknownTool {
                name: format!("<unbound step {}>", step),
            })?;
            plan.push((Arc::clone(step), self.registry.get(tool_name)?));
        }

        let events = EventLog::new();
        let job_name: Arc<str> = Arc::from(job.name());
        events.emit(EventKind::RunStarted {
            job: Arc::clone(&job_name),
            flow: Arc::from(graph.name()),
            step_count: order.len(),
        });
        for step in &order {
            events.emit(EventKind::StepScheduled {
                step: Arc::clone(step),
                dependencies: graph.get_dependencies(step).to_vec(),
            });
        }
        info!(steps = order.len(), "starting run");

        let mut store = ArtifactStore::new();
        let job_dir = self.job_dir(job);

        for (step, tool) in plan {
            let workdir = job_dir.join(step.as_ref());
            let prepared = tokio::fs::create_dir_all(&workdir).await;

            let invocation = build_invocation(job, &step, tool.name(), config, workdir);
            let command = tool.command_line(&invocation);
            events.emit(EventKind::StepStarted {
                step: Arc::clone(&step),
                tool: Arc::from(tool.name()),
                command: command.clone(),
            });
            debug!(step = %step, tool = tool.name(), ?command, "running step");

            let step_start = Instant::now();
            let outcome = match prepared {
                Err(e) => ToolOutcome::failure(
                    None,
                    format!("cannot create workdir {}: {}", invocation.workdir.display(), e),
                ),
                Ok(()) => match tool.run(&invocation).await {
                    Ok(outcome) => outcome,
                    Err(e) => ToolOutcome::failure(None, e.to_string()),
                },
            };
            let duration = step_start.elapsed();

            if outcome.is_success() {
                info!(step = %step, tool = tool.name(), elapsed_ms = duration.as_millis() as u64, "step completed");
                events.emit(EventKind::StepCompleted {
                    step: Arc::clone(&step),
                    artifacts: outcome
                        .artifacts
                        .iter()
                        .map(|(k, p)| (k.to_string(), p.clone()))
                        .collect(),
                    duration_ms: duration.as_millis() as u64,
                });
                store.record(
                    job.name(),
                    &step,
                    StepRecord::completed(tool.name(), command, outcome.artifacts, duration),
                );
                continue;
            }

            let failure = StepFailure {
                step: step.to_string(),
                tool: tool.name().to_string(),
                exit_code: outcome.exit_code,
                reason: outcome.message,
            };
            warn!(step = %step, tool = tool.name(), exit_code = ?failure.exit_code, "step failed, aborting run");
            events.emit(EventKind::StepFailed {
                step: Arc::clone(&step),
                tool: Arc::from(tool.name()),
                exit_code: failure.exit_code,
                duration_ms: duration.as_millis() as u64,
            });
            events.emit(EventKind::RunFailed {
                job: Arc::clone(&job_name),
                failed_step: Arc::clone(&step),
                error: failure.to_string(),
            });
            store.record(job.name(), &step, StepRecord::failed(tool.name(), command, duration));

            return Ok(RunResult {
                job: job.name().to_string(),
                success: false,
                failed_step: Some(failure),
                store,
                events,
                duration: start.elapsed(),
            });
        }

        let duration = start.elapsed();
        events.emit(EventKind::RunCompleted {
            job: job_name,
            total_duration_ms: duration.as_millis() as u64,
        });
        info!(elapsed_ms = duration.as_millis() as u64, "run completed");

        Ok(RunResult {
            job: job.name().to_string(),
            success: true,
            failed_step: None,
            store,
            events,
            duration,
        })
    }
}

fn check_flow(job: &JobSpec, flow: &str) -> std::result::Result<(), ValidationError> {
    if job.flow() == flow {
        Ok(())
    } else {
        Err(ValidationError::FlowMismatch {
            job: job.name().to_string(),
            job_flow: job.flow().to_string(),
            flow: flow.to_string(),
        })
    }
}

/// Assemble a step's view of the job: inputs, includes, tool options, toggles
fn build_invocation(
    job: &JobSpec,
    step: &str,
    tool: &str,
    config: &ToolConfig,
    workdir: PathBuf,
) -> StepInvocation {
    StepInvocation {
        flow: job.flow().to_string(),
        job: job.name().to_string(),
        design: job.design().to_string(),
        step: step.to_string(),
        tool: tool.to_string(),
        entrypoint: job.entrypoint().to_string(),
        trace: job.trace(),
        verilog: job.inputs_of(InputKind::Verilog).map(Path::to_path_buf).collect(),
        c_sources: job.inputs_of(InputKind::C).map(Path::to_path_buf).collect(),
        include_dirs: job.include_dirs().to_vec(),
        options: config.get_options(tool, OPTION_KEY).to_vec(),
        outputs: config.get_options(tool, OUTPUT_KEY).to_vec(),
        extra_flags: job.extra_flags().to_vec(),
        workdir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotFoundReason;
    use crate::tool::MockTool;

    fn graph() -> FlowGraph {
        let mut g = FlowGraph::new("verilator_sim").unwrap();
        g.add_step("import", "surelog").unwrap();
        g.add_step("compile", "verilator").unwrap();
        g.add_edge("import", "compile").unwrap();
        g
    }

    fn job(name: &str) -> JobSpec {
        JobSpec::builder("verilator_sim", "lemoncore")
            .name(name)
            .verilog("rtl/core/alu.v")
            .c_source("sim/alu_tb.cpp")
            .entrypoint("alu")
            .build()
            .unwrap()
    }

    fn orchestrator(dir: &Path, import: MockTool, compile: MockTool) -> Orchestrator {
        let registry = ToolRegistry::default();
        registry.register(Arc::new(import));
        registry.register(Arc::new(compile));
        Orchestrator::new(registry, dir)
    }

    #[tokio::test]
    async fn successful_run_registers_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let compile = MockTool::new("verilator").with_artifact(ArtifactKind::Executable, "lemoncore.vexe");
        let orch = orchestrator(dir.path(), MockTool::new("surelog"), compile);

        let mut config = ToolConfig::new("verilator_sim");
        config.set_option("verilator", OPTION_KEY, ["-Wall"]).unwrap();

        let result = orch.run(&job("alu_test"), &graph(), &config).await.unwrap();
        assert!(result.success);
        assert!(result.failed_step.is_none());

        let exe = result.find("compile", &ArtifactKind::Executable).unwrap();
        assert_eq!(
            exe,
            dir.path().join("lemoncore/alu_test/compile/lemoncore.vexe").as_path()
        );

        // import ran but registered no executable
        let err = result.find("import", &ArtifactKind::Executable).unwrap_err();
        assert_eq!(err.reason, NotFoundReason::NoSuchArtifact);
        assert!(result.summary().contains("job 'alu_test' passed"));
    }

    #[tokio::test]
    async fn options_and_toggles_reach_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let compile = MockTool::new("verilator");
        let orch = orchestrator(dir.path(), MockTool::new("surelog"), compile.clone());

        let mut config = ToolConfig::new("verilator_sim");
        config.set_option("verilator", OPTION_KEY, ["-CFLAGS", "-O2"]).unwrap();
        let job = JobSpec::builder("verilator_sim", "lemoncore")
            .name("lemoncore_test")
            .verilog("rtl/core/lemoncore.v")
            .c_source("sim/lemoncore_tb.cpp")
            .entrypoint("lemoncore")
            .trace(true)
            .build()
            .unwrap();

        orch.run(&job, &graph(), &config).await.unwrap();
        let inv = compile.last_invocation().unwrap();
        assert!(inv.trace);
        assert_eq!(inv.entrypoint, "lemoncore");
        assert_eq!(inv.options, ["-CFLAGS", "-O2"]);
        assert_eq!(inv.c_sources, [PathBuf::from("sim/lemoncore_tb.cpp")]);
    }

    #[tokio::test]
    async fn failure_aborts_downstream_steps() {
        let dir = tempfile::tempdir().unwrap();
        let compile = MockTool::new("verilator");
        let orch = orchestrator(dir.path(), MockTool::failing("surelog", 1), compile.clone());

        let result = orch
            .run(&job("alu_test"), &graph(), &ToolConfig::new("verilator_sim"))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.failed_step_name(), Some("import"));
        assert_eq!(compile.call_count(), 0);
        assert!(!result.store.ran("alu_test", "compile"));
        assert_eq!(
            result.find("compile", &ArtifactKind::Executable).unwrap_err().reason,
            NotFoundReason::StepNeverRan
        );
        assert!(result.clone().into_result().is_err());
    }

    #[tokio::test]
    async fn flow_mismatch_is_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let import = MockTool::new("surelog");
        let orch = orchestrator(dir.path(), import.clone(), MockTool::new("verilator"));

        let err = orch
            .run(&job("alu_test"), &graph(), &ToolConfig::new("asicflow"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LemonError::Validation(ValidationError::FlowMismatch { .. })
        ));
        assert_eq!(import.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = FlowGraph::new("verilator_sim").unwrap();
        g.add_step("import", "iverilog").unwrap();
        let orch = Orchestrator::new(ToolRegistry::default(), dir.path());

        let err = orch
            .run(&job("alu_test"), &g, &ToolConfig::new("verilator_sim"))
            .await
            .unwrap_err();
        assert!(matches!(err, LemonError::UnknownTool { .. }));
        assert!(!dir.path().join("lemoncore").exists());
    }

    #[tokio::test]
    async fn failing_compile_keeps_import_and_reports_step_failed() {
        let dir = tempfile::tempdir().unwrap();
        let compile = MockTool::failing("verilator", 1).with_artifact(ArtifactKind::Executable, "lemoncore.vexe");
        let orch = orchestrator(dir.path(), MockTool::new("surelog"), compile);

        let result = orch
            .run(&job("alu_test"), &graph(), &ToolConfig::new("verilator_sim"))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.failed_step_name(), Some("compile"));
        assert_eq!(
            result.find("compile", &ArtifactKind::Executable).unwrap_err().reason,
            NotFoundReason::StepFailed
        );
        assert!(result.store.step("alu_test", "import").unwrap().is_completed());
    }

    #[tokio::test]
    async fn unwritable_workdir_is_a_step_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = dir.path().join("lemoncore/alu_test");
        std::fs::create_dir_all(&job_dir).unwrap();
        // a plain file where the compile workdir should go
        std::fs::write(job_dir.join("compile"), "").unwrap();

        let compile = MockTool::new("verilator");
        let orch = orchestrator(dir.path(), MockTool::new("surelog"), compile.clone());
        let result = orch
            .run(&job("alu_test"), &graph(), &ToolConfig::new("verilator_sim"))
            .await
            .unwrap();

        let failure = result.failed_step.as_ref().unwrap();
        assert_eq!(failure.step, "compile");
        assert_eq!(failure.exit_code, None);
        assert!(failure.reason.contains("cannot create workdir"));
        assert_eq!(compile.call_count(), 0);
        assert!(result.store.ran("alu_test", "import"));
        assert_eq!(result.events.run_events().len(), 2);
    }

    #[tokio::test]
    async fn events_trace_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), MockTool::new("surelog"), MockTool::failing("verilator", 2));

        let result = orch
            .run(&job("alu_test"), &graph(), &ToolConfig::new("verilator_sim"))
            .await
            .unwrap();

        let kinds: Vec<_> = result
            .events
            .events()
            .into_iter()
            .map(|e| serde_json::to_value(&e.kind).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            kinds,
            [
                "run_started",
                "step_scheduled",
                "step_scheduled",
                "step_started",
                "step_completed",
                "step_started",
                "step_failed",
                "run_failed"
            ]
        );
        let failure = result.failed_step.unwrap();
        assert_eq!(failure.exit_code, Some(2));
        assert_eq!(failure.tool, "verilator");
    }
}
