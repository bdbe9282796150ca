//! JobSpec - one fully configured run of a flow
//!
//! Built with [`JobSpec::builder`]; `build()` validates and the resulting
//! value is immutable.

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Job names become directory names: letters, digits, '.', '-', '_' only,
/// and never starting with '.'
static JOB_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,63}$").expect("valid job name regex"));

/// Kind of source file fed to the flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Verilog,
    /// C/C++ testbench or simulation source
    C,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::Verilog => f.write_str("verilog"),
            InputKind::C => f.write_str("c"),
        }
    }
}

/// A single input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub kind: InputKind,
    pub path: PathBuf,
}

/// Validated job description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    flow: String,
    design: String,
    name: String,
    inputs: Vec<Input>,
    entrypoint: String,
    trace: bool,
    include_dirs: Vec<PathBuf>,
    extra_flags: Vec<String>,
}

impl JobSpec {
    /// Start building a job for `design` on `flow`
    pub fn builder(flow: impl Into<String>, design: impl Into<String>) -> JobSpecBuilder {
        JobSpecBuilder::new(flow, design)
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    /// Design name; names the produced binaries
    pub fn design(&self) -> &str {
        &self.design
    }

    /// Job name; namespaces output directories and artifacts
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Input paths of one kind, in insertion order
    pub fn inputs_of(&self, kind: InputKind) -> impl Iterator<Item = &Path> {
        self.inputs
            .iter()
            .filter(move |i| i.kind == kind)
            .map(|i| i.path.as_path())
    }

    pub fn entrypoint(&self) -> &str {
        &self.entrypoint
    }

    pub fn trace(&self) -> bool {
        self.trace
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    pub fn extra_flags(&self) -> &[String] {
        &self.extra_flags
    }
}

/// Fluent builder for [`JobSpec`]
#[derive(Debug, Clone)]
pub struct JobSpecBuilder {
    flow: String,
    design: String,
    name: Option<String>,
    inputs: Vec<Input>,
    entrypoint: Option<String>,
    trace: bool,
    include_dirs: Vec<PathBuf>,
    extra_flags: Vec<String>,
}

impl JobSpecBuilder {
    pub fn new(flow: impl Into<String>, design: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            design: design.into(),
            name: None,
            inputs: Vec::new(),
            entrypoint: None,
            trace: false,
            include_dirs: Vec::new(),
            extra_flags: Vec::new(),
        }
    }

    /// Set the job name (defaults to `job0`)
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn input(mut self, kind: InputKind, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(Input {
            kind,
            path: path.into(),
        });
        self
    }

    pub fn verilog(self, path: impl Into<PathBuf>) -> Self {
        self.input(InputKind::Verilog, path)
    }

    pub fn c_source(self, path: impl Into<PathBuf>) -> Self {
        self.input(InputKind::C, path)
    }

    pub fn inputs(mut self, inputs: impl IntoIterator<Item = Input>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Select the testbench / top module (defaults to the design name)
    pub fn entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn extra_flag(mut self, flag: impl Into<String>) -> Self {
        self.extra_flags.push(flag.into());
        self
    }

    pub fn extra_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Validate and freeze
    pub fn build(self) -> Result<JobSpec, ValidationError> {
        let name = self.name.unwrap_or_else(|| "job0".to_string());
        if !is_path_safe(&name) {
            return Err(ValidationError::UnsafeJobName { job: name });
        }
        if self.inputs.is_empty() {
            return Err(ValidationError::EmptyInputs { job: name });
        }
        let entrypoint = self.entrypoint.unwrap_or_else(|| self.design.clone());
        if entrypoint.trim().is_empty() {
            return Err(ValidationError::BlankEntrypoint { job: name });
        }

        Ok(JobSpec {
            flow: self.flow,
            design: self.design,
            name,
            inputs: self.inputs,
            entrypoint: entrypoint.trim().to_string(),
            trace: self.trace,
            include_dirs: self.include_dirs,
            extra_flags: self.extra_flags,
        })
    }
}

/// Whether `name` can be used verbatim as a single path component
pub fn is_path_safe(name: &str) -> bool {
    JOB_NAME_PATTERN.is_match(name)
}
