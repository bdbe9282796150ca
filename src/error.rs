//! Error types with fix suggestions
//!
//! Error code ranges:
//! - LEMON-01x: flow graph definition errors
//! - LEMON-02x: job / manifest validation errors
//! - LEMON-030: external step failure
//! - LEMON-040: artifact lookup miss
//! - LEMON-05x: runtime errors (io, manifest parsing, launching)

use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::ArtifactKind;

pub type Result<T> = std::result::Result<T, LemonError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Malformed flow definition. Raised while the graph is being built, never recovered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("[LEMON-010] Step '{step}' is not declared in flow '{flow}'")]
    UnknownStep { flow: String, step: String },

    #[error("[LEMON-011] Step '{step}' is already declared in flow '{flow}'")]
    DuplicateStep { flow: String, step: String },

    #[error("[LEMON-012] Edge {from} -> {to} would create a cycle in flow '{flow}'")]
    CycleDetected {
        flow: String,
        from: String,
        to: String,
    },

    #[error("[LEMON-013] Invalid {what} name '{name}'")]
    InvalidName { what: &'static str, name: String },
}

/// Malformed job, tool option or manifest entry. Raised at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("[LEMON-020] Job '{job}' has no inputs")]
    EmptyInputs { job: String },

    #[error("[LEMON-021] Job '{job}' has a blank entry-point")]
    BlankEntrypoint { job: String },

    #[error("[LEMON-022] Job name '{job}' is not path-safe")]
    UnsafeJobName { job: String },

    #[error("[LEMON-023] Invalid option key '{tool}/{key}'")]
    InvalidOptionKey { tool: String, key: String },

    #[error("[LEMON-024] Job '{job}' targets flow '{job_flow}' but was given flow '{flow}'")]
    FlowMismatch {
        job: String,
        job_flow: String,
        flow: String,
    },

    #[error("[LEMON-025] Unknown test module '{module}'")]
    UnknownModule { module: String },

    #[error("[LEMON-026] Invalid project manifest: {reason}")]
    InvalidProject { reason: String },
}

/// An external tool exited non-zero (or could not be started).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[LEMON-030] Step '{step}' ({tool}) failed: {}", describe_exit(.exit_code, .reason))]
pub struct StepFailure {
    pub step: String,
    pub tool: String,
    /// `None` when the process never produced an exit status (spawn error, signal)
    pub exit_code: Option<i32>,
    pub reason: String,
}

fn describe_exit(code: &Option<i32>, reason: &str) -> String {
    match (*code, reason.is_empty()) {
        (Some(code), true) => format!("exit code {}", code),
        (Some(code), false) => format!("exit code {} ({})", code, reason),
        (None, true) => "no exit code".to_string(),
        (None, false) => reason.to_string(),
    }
}

/// Why an artifact lookup came back empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// No record of the step for this job at all
    StepNeverRan,
    /// The step ran and failed
    StepFailed,
    /// The step completed but did not register this kind
    NoSuchArtifact,
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotFoundReason::StepNeverRan => "step never ran",
            NotFoundReason::StepFailed => "step failed",
            NotFoundReason::NoSuchArtifact => "step produced no artifact of this kind",
        };
        f.write_str(s)
    }
}

/// Lookup miss from the artifact store. A normal outcome, not a crash.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[LEMON-040] No '{kind}' artifact for {job}/{step}: {reason}")]
pub struct ArtifactNotFound {
    pub job: String,
    pub step: String,
    pub kind: ArtifactKind,
    pub reason: NotFoundReason,
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum LemonError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Step(#[from] StepFailure),

    #[error(transparent)]
    Artifact(#[from] ArtifactNotFound),

    #[error("[LEMON-050] Unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("[LEMON-051] Failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_yaml::Error),

    #[error("[LEMON-052] Configuration error: {reason}")]
    Config { reason: String },

    #[error("[LEMON-053] Failed to launch '{}': {source}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LEMON-054] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[LEMON-055] Execution error: {0}")]
    Execution(String),
}

impl LemonError {
    /// Get the error code (e.g., "LEMON-010")
    pub fn code(&self) -> &'static str {
        match self {
            Self::Graph(e) => match e {
                GraphError::UnknownStep { .. } => "LEMON-010",
                GraphError::DuplicateStep { .. } => "LEMON-011",
                GraphError::CycleDetected { .. } => "LEMON-012",
                GraphError::InvalidName { .. } => "LEMON-013",
            },
            Self::Validation(e) => match e {
                ValidationError::EmptyInputs { .. } => "LEMON-020",
                ValidationError::BlankEntrypoint { .. } => "LEMON-021",
                ValidationError::UnsafeJobName { .. } => "LEMON-022",
                ValidationError::InvalidOptionKey { .. } => "LEMON-023",
                ValidationError::FlowMismatch { .. } => "LEMON-024",
                ValidationError::UnknownModule { .. } => "LEMON-025",
                ValidationError::InvalidProject { .. } => "LEMON-026",
            },
            Self::Step(_) => "LEMON-030",
            Self::Artifact(_) => "LEMON-040",
            Self::UnknownTool { .. } => "LEMON-050",
            Self::ManifestParse(_) => "LEMON-051",
            Self::Config { .. } => "LEMON-052",
            Self::Launch { .. } => "LEMON-053",
            Self::Io(_) => "LEMON-054",
            Self::Execution(_) => "LEMON-055",
        }
    }
}

impl FixSuggestion for LemonError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            LemonError::Graph(GraphError::UnknownStep { .. }) => {
                Some("Declare the step with add_step before connecting it")
            }
            LemonError::Graph(GraphError::DuplicateStep { .. }) => {
                Some("Use unique step names within a flow")
            }
            LemonError::Graph(GraphError::CycleDetected { .. }) => {
                Some("Remove the edge - steps cannot depend on their own successors")
            }
            LemonError::Graph(GraphError::InvalidName { .. }) => {
                Some("Use alphanumeric names with '-' or '_' only")
            }
            LemonError::Validation(ValidationError::EmptyInputs { .. }) => {
                Some("Add at least one Verilog source to the job")
            }
            LemonError::Validation(ValidationError::BlankEntrypoint { .. }) => {
                Some("Set the entry-point to the testbench or top module name")
            }
            LemonError::Validation(ValidationError::UnsafeJobName { .. }) => {
                Some("Job names may only contain letters, digits, '.', '-' and '_'")
            }
            LemonError::Validation(ValidationError::InvalidOptionKey { .. }) => {
                Some("Option keys must be non-empty and free of whitespace and '/'")
            }
            LemonError::Validation(ValidationError::FlowMismatch { .. }) => {
                Some("Build the job, graph and tool config for the same flow")
            }
            LemonError::Validation(ValidationError::UnknownModule { .. }) => {
                Some("Check the module list in lemonflow.yaml")
            }
            LemonError::Validation(ValidationError::InvalidProject { .. }) => {
                Some("Check lemonflow.yaml against the documented fields")
            }
            LemonError::Step(_) => Some("Inspect the tool output above; rerun with --verbose"),
            LemonError::Artifact(_) => Some("Check that the producing step completed"),
            LemonError::UnknownTool { .. } => {
                Some("Use one of: surelog, verilator, yosys, openroad")
            }
            LemonError::ManifestParse(_) => Some("Check YAML syntax: indentation and quoting"),
            LemonError::Config { .. } => Some("Check environment overrides (LEMONFLOW_*)"),
            LemonError::Launch { .. } => Some("Check the executable exists and is runnable"),
            LemonError::Io(_) => Some("Check file path and permissions"),
            LemonError::Execution(_) => Some("Rerun with --verbose and report the log"),
        }
    }
}
