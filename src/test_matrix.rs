//! Per-module unit test matrix
//!
//! One `verilator_sim` job per RTL module: compile `<module>_tb.cpp` with
//! the common gtest runner against the full RTL set, then run the produced
//! executable without arguments. Jobs have distinct names (`<module>_test`),
//! so they can share one orchestrator and run concurrently.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::artifact::ArtifactKind;
use crate::error::{ArtifactNotFound, LemonError, Result, StepFailure, ValidationError};
use crate::event_log::EventLog;
use crate::flow_graph::FlowGraph;
use crate::flows;
use crate::job::JobSpec;
use crate::orchestrator::Orchestrator;
use crate::project::{Project, TestModule};
use crate::tool::launch;
use crate::tool_config::ToolConfig;

/// Step whose executable artifact is the test binary
const COMPILE_STEP: &str = "compile";

/// Name of the unit test job for `module`
pub fn test_job_name(module: &str) -> String {
    format!("{}_test", module)
}

/// Verdict for one module
#[derive(Debug, Clone)]
pub enum ModuleOutcome {
    Passed,
    /// A flow step failed; the test binary was never built
    BuildFailed(StepFailure),
    /// The flow passed but produced no executable
    MissingArtifact(ArtifactNotFound),
    /// The test binary exited non-zero (`None`: killed or not runnable)
    TestFailed { exit_code: Option<i32> },
}

impl ModuleOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, ModuleOutcome::Passed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModuleOutcome::Passed => "passed",
            ModuleOutcome::BuildFailed(_) => "build failed",
            ModuleOutcome::MissingArtifact(_) => "missing artifact",
            ModuleOutcome::TestFailed { .. } => "test failed",
        }
    }

    /// Details for a failing outcome
    pub fn detail(&self) -> Option<String> {
        match self {
            ModuleOutcome::Passed => None,
            ModuleOutcome::BuildFailed(failure) => Some(failure.to_string()),
            ModuleOutcome::MissingArtifact(missing) => Some(missing.to_string()),
            ModuleOutcome::TestFailed { exit_code: Some(code) } => Some(format!("exit code {}", code)),
            ModuleOutcome::TestFailed { exit_code: None } => {
                Some("terminated without exit code".to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleReport {
    pub module: String,
    pub outcome: ModuleOutcome,
    pub duration: Duration,
    pub events: EventLog,
}

/// Matrix results in module declaration order
#[derive(Debug, Clone, Default)]
pub struct MatrixReport {
    pub modules: Vec<ModuleReport>,
}

impl MatrixReport {
    pub fn all_passed(&self) -> bool {
        self.modules.iter().all(|m| m.outcome.is_pass())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules.iter().filter(|m| !m.outcome.is_pass())
    }

    pub fn passed_count(&self) -> usize {
        self.modules.iter().filter(|m| m.outcome.is_pass()).count()
    }
}

pub struct TestMatrix {
    orchestrator: Orchestrator,
    project: Arc<Project>,
    jobs: usize,
}

impl TestMatrix {
    pub fn new(orchestrator: Orchestrator, project: Project) -> Self {
        Self {
            orchestrator,
            project: Arc::new(project),
            jobs: 1,
        }
    }

    /// Maximum number of module jobs in flight (at least 1)
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// The job for one module
    pub fn job_for(&self, module: &TestModule) -> Result<JobSpec> {
        let project = &self.project;
        let testbench = project.sim_dir().join(format!("{}_tb.cpp", module.name));
        let c_sources: Vec<PathBuf> = std::iter::once(testbench)
            .chain(project.sim.common_sources.iter().map(|p| project.path(p)))
            .chain(module.extra_sources.iter().map(|p| project.path(p)))
            .collect();

        let mut builder = JobSpec::builder(flows::VERILATOR_SIM, &project.design)
            .name(test_job_name(&module.name))
            .entrypoint(&module.name)
            .trace(module.trace);
        for v in project.verilog_sources()? {
            builder = builder.verilog(v);
        }
        for c in c_sources {
            builder = builder.c_source(c);
        }
        for dir in project.include_dirs() {
            builder = builder.include_dir(dir);
        }
        Ok(builder.build()?)
    }

    /// Modules to run: all of them, or those named in `filter` (in
    /// declaration order)
    pub fn select(&self, filter: &[String]) -> Result<Vec<TestModule>> {
        if let Some(unknown) = filter.iter().find(|name| self.project.module(name).is_none()) {
            return Err(ValidationError::UnknownModule {
                module: unknown.clone(),
            }
            .into());
        }
        Ok(self
            .project
            .sim
            .modules
            .iter()
            .filter(|m| filter.is_empty() || filter.contains(&m.name))
            .cloned()
            .collect())
    }

    #[instrument(skip_all, fields(jobs = self.jobs))]
    pub async fn run(&self, filter: &[String]) -> Result<MatrixReport> {
        let modules = self.select(filter)?;
        let graph = flows::verilator_sim()?;
        let config = flows::verilator_sim_config(&self.project)?;

        // Validate every job up front so a bad module never leaves half a matrix running
        let jobs = modules
            .iter()
            .map(|m| self.job_for(m))
            .collect::<Result<Vec<_>>>()?;

        info!(modules = jobs.len(), "running test matrix");
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut join_set = JoinSet::new();

        for (idx, (module, job)) in modules.into_iter().zip(jobs).enumerate() {
            let orchestrator = self.orchestrator.clone();
            let graph = graph.clone();
            let config = config.clone();
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| LemonError::Execution(e.to_string()))?;
                let start = Instant::now();
                let (outcome, events) = run_module(&orchestrator, &job, &graph, &config).await?;
                Ok::<_, LemonError>((
                    idx,
                    ModuleReport {
                        module: module.name,
                        outcome,
                        duration: start.elapsed(),
                        events,
                    },
                ))
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (idx, report) = joined.map_err(|e| LemonError::Execution(format!("test job panicked: {}", e)))??;
            if report.outcome.is_pass() {
                info!(module = %report.module, "module passed");
            } else {
                warn!(module = %report.module, outcome = report.outcome.label(), "module failed");
            }
            reports.push((idx, report));
        }
        reports.sort_by_key(|(idx, _)| *idx);

        Ok(MatrixReport {
            modules: reports.into_iter().map(|(_, r)| r).collect(),
        })
    }
}

/// Build one module and run its test binary
async fn run_module(
    orchestrator: &Orchestrator,
    job: &JobSpec,
    graph: &FlowGraph,
    config: &ToolConfig,
) -> Result<(ModuleOutcome, EventLog)> {
    let result = orchestrator.run(job, graph, config).await?;
    if let Some(failure) = result.failed_step.clone() {
        return Ok((ModuleOutcome::BuildFailed(failure), result.events));
    }

    let exe = match result.find(COMPILE_STEP, &ArtifactKind::Executable) {
        Ok(path) => path.to_path_buf(),
        Err(missing) => return Ok((ModuleOutcome::MissingArtifact(missing), result.events)),
    };

    let outcome = match launch(&exe, &[]).await {
        Ok(status) if status.success() => ModuleOutcome::Passed,
        Ok(status) => ModuleOutcome::TestFailed {
            exit_code: status.code(),
        },
        Err(e) => {
            warn!(job = job.name(), error = %e, "test binary could not be started");
            ModuleOutcome::TestFailed { exit_code: None }
        }
    };
    Ok((outcome, result.events))
}
