//! Synthesis and physical design build (`asicflow`)

use tracing::instrument;

use crate::error::Result;
use crate::flows;
use crate::job::JobSpec;
use crate::orchestrator::{Orchestrator, RunResult};
use crate::project::{Project, SynthesisSettings};

pub const SYNTH_JOB: &str = "synth";

pub struct SynthesisBuild {
    orchestrator: Orchestrator,
    project: Project,
    settings: SynthesisSettings,
}

impl SynthesisBuild {
    /// Uses the project's synthesis settings unless overridden
    pub fn new(orchestrator: Orchestrator, project: Project) -> Self {
        let settings = project.synthesis.clone();
        Self {
            orchestrator,
            project,
            settings,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.settings.target = target.into();
        self
    }

    pub fn clock_period(mut self, ns: f64) -> Self {
        self.settings.clock_period_ns = ns;
        self
    }

    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    pub fn job(&self) -> Result<JobSpec> {
        self.settings.validate()?;
        let project = &self.project;
        let mut builder = JobSpec::builder(flows::ASICFLOW, &project.design)
            .name(SYNTH_JOB)
            .extra_flags(flows::asicflow_flags(
                &self.settings.target,
                self.settings.clock_period_ns,
                &self.settings.clock_pin,
            ));
        for v in project.verilog_sources()? {
            builder = builder.verilog(v);
        }
        for dir in project.include_dirs() {
            builder = builder.include_dir(dir);
        }
        Ok(builder.build()?)
    }

    /// Run the whole flow; a failing step shows up in the result, not as `Err`
    #[instrument(skip(self), fields(target = %self.settings.target, clock_ns = self.settings.clock_period_ns))]
    pub async fn run(&self) -> Result<RunResult> {
        let job = self.job()?;
        let graph = flows::asicflow()?;
        let config = flows::asicflow_config(&self.project)?;
        self.orchestrator.run(&job, &graph, &config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolRegistry;

    fn build() -> SynthesisBuild {
        SynthesisBuild::new(
            Orchestrator::new(ToolRegistry::default(), "/tmp/unused"),
            Project::lemoncore(),
        )
    }

    #[test]
    fn default_settings() {
        let job = build().job().unwrap();
        assert_eq!(job.name(), SYNTH_JOB);
        assert_eq!(job.flow(), flows::ASICFLOW);
        assert_eq!(job.entrypoint(), "lemoncore");
        assert!(job.extra_flags().contains(&"--target=skywater130_demo".to_string()));
        assert!(job.extra_flags().contains(&"--clock-period=10".to_string()));
    }

    #[test]
    fn overrides_reach_flags() {
        let job = build().target("gf180_demo").clock_period(12.5).job().unwrap();
        assert!(job.extra_flags().contains(&"--target=gf180_demo".to_string()));
        assert!(job.extra_flags().contains(&"--clock-period=12.5".to_string()));
    }

    #[test]
    fn overridden_clock_period_is_checked() {
        for ns in [0.0, -1.0, f64::NAN] {
            let err = build().clock_period(ns).job().unwrap_err();
            assert!(err.to_string().contains("clock period must be positive"));
        }
    }

    #[tokio::test]
    async fn bad_clock_period_fails_before_any_step() {
        let dir = tempfile::tempdir().unwrap();
        let build = SynthesisBuild::new(
            Orchestrator::new(ToolRegistry::default(), dir.path()),
            Project::lemoncore(),
        )
        .clock_period(-2.0);
        assert!(build.run().await.is_err());
        assert!(!dir.path().join("lemoncore").exists());
    }
}
