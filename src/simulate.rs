//! Full-core simulation
//!
//! Builds the `<design>_sim` harness with tracing on and launches it with a
//! single argument. The argument is passed through untouched; use
//! [`firmware_plusarg`] to build the `+firmware+<path>` form the harness
//! expects.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tracing::{info, instrument};

use crate::artifact::ArtifactKind;
use crate::error::Result;
use crate::flows;
use crate::job::JobSpec;
use crate::orchestrator::{Orchestrator, RunResult};
use crate::project::Project;
use crate::tool::launch;

/// Job name used for every simulation build
pub const SIM_JOB: &str = "sim";

const COMPILE_STEP: &str = "compile";

/// Firmware image used when none is given
pub const DEFAULT_FIRMWARE: &str = "sw/hello.sim.bin";

/// `+firmware+<path>` plusarg read by the simulation harness
pub fn firmware_plusarg(path: &Path) -> String {
    format!("+firmware+{}", path.display())
}

/// What a simulation produced
#[derive(Debug)]
pub struct SimulationOutcome {
    pub run: RunResult,
    /// Simulator executable
    pub executable: PathBuf,
    pub status: ExitStatus,
}

pub struct SimulationRunner {
    orchestrator: Orchestrator,
    project: Project,
}

impl SimulationRunner {
    pub fn new(orchestrator: Orchestrator, project: Project) -> Self {
        Self { orchestrator, project }
    }

    /// The simulation job: entry source plus support sources, entry-point
    /// left at the design name
    pub fn job(&self) -> Result<JobSpec> {
        let project = &self.project;
        let settings = &project.sim.simulation;

        let mut builder = JobSpec::builder(flows::VERILATOR_SIM, &project.design)
            .name(SIM_JOB)
            .trace(settings.trace)
            .c_source(project.path(&settings.entry_source));
        for c in &settings.support_sources {
            builder = builder.c_source(project.path(c));
        }
        for v in project.verilog_sources()? {
            builder = builder.verilog(v);
        }
        for dir in project.include_dirs() {
            builder = builder.include_dir(dir);
        }
        Ok(builder.build()?)
    }

    /// Build the simulator only
    pub async fn build(&self) -> Result<RunResult> {
        let job = self.job()?;
        let graph = flows::verilator_sim()?;
        let config = flows::verilator_sim_config(&self.project)?;
        self.orchestrator.run(&job, &graph, &config).await
    }

    /// Build, then launch the simulator with `arg` as its only argument.
    /// A failed build is returned as [`crate::LemonError::Step`].
    #[instrument(skip(self))]
    pub async fn run(&self, arg: &str) -> Result<SimulationOutcome> {
        let run = self.build().await?;
        self.launch(run, arg).await
    }

    /// Launch the simulator produced by a build, `arg` as its only argument
    pub async fn launch(&self, run: RunResult, arg: &str) -> Result<SimulationOutcome> {
        let run = run.into_result()?;
        let executable = run.find(COMPILE_STEP, &ArtifactKind::Executable)?.to_path_buf();

        info!(executable = %executable.display(), "launching simulator");
        let status = launch(&executable, &[arg.to_string()]).await?;
        Ok(SimulationOutcome {
            run,
            executable,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::InputKind;
    use crate::tool::ToolRegistry;

    #[test]
    fn plusarg_format() {
        assert_eq!(
            firmware_plusarg(Path::new("sw/hello.sim.bin")),
            "+firmware+sw/hello.sim.bin"
        );
    }

    #[test]
    fn simulation_job_wiring() {
        let runner = SimulationRunner::new(
            Orchestrator::new(ToolRegistry::default(), "/tmp/unused"),
            Project::lemoncore(),
        );
        let job = runner.job().unwrap();
        assert_eq!(job.name(), SIM_JOB);
        assert_eq!(job.entrypoint(), "lemoncore");
        assert!(job.trace());
        let c: Vec<_> = job
            .inputs_of(InputKind::C)
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(c, ["lemoncore_sim.cpp", "lemoncore.cpp", "util.cpp"]);
    }
}
