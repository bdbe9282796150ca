//! lemonflow - build and verification flows for the lemoncore RISC-V core
//!
//! A flow is a DAG of named steps, each bound to an external tool. A job
//! runs one flow over a set of sources; the orchestrator executes steps in
//! dependency order and records their artifacts per job.

pub mod artifact;
pub mod error;
pub mod event_log;
pub mod flow_graph;
pub mod flows;
pub mod job;
pub mod orchestrator;
pub mod project;
pub mod simulate;
pub mod synthesis;
pub mod test_matrix;
pub mod tool;
pub mod tool_config;

pub use artifact::{ArtifactKind, ArtifactStore, StepRecord, StepStatus};
pub use error::{
    ArtifactNotFound, FixSuggestion, GraphError, LemonError, NotFoundReason, Result, StepFailure,
    ValidationError,
};
pub use event_log::{Event, EventKind, EventLog};
pub use flow_graph::FlowGraph;
pub use job::{Input, InputKind, JobSpec, JobSpecBuilder};
pub use orchestrator::{Orchestrator, RunResult};
pub use project::Project;
pub use simulate::{firmware_plusarg, SimulationRunner};
pub use synthesis::SynthesisBuild;
pub use test_matrix::{MatrixReport, ModuleOutcome, TestMatrix};
pub use tool::{Tool, ToolRegistry};
pub use tool_config::ToolConfig;
