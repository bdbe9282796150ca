//! Project manifest (`lemonflow.yaml`)
//!
//! Describes the RTL sources, simulation sources, test modules, tool
//! binaries and synthesis settings of a design. Relative paths are resolved
//! against the directory holding the manifest.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`LEMONFLOW_BUILD_DIR`, `LEMONFLOW_VERILATOR`, ...)
//! 2. Manifest file
//! 3. Built-in lemoncore defaults

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{LemonError, Result, ValidationError};
use crate::job::is_path_safe;
use crate::test_matrix::test_job_name;
use crate::tool::ToolBinaries;
use crate::tool_config::ToolOptions;

/// Default manifest file name
pub const MANIFEST_FILE: &str = "lemonflow.yaml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Project {
    pub design: String,
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    pub rtl: RtlSources,
    pub sim: SimSources,
    #[serde(default)]
    pub tools: ToolBinaries,
    /// Extra per-tool options merged into every flow's tool config
    #[serde(default)]
    pub options: ToolOptions,
    #[serde(default)]
    pub synthesis: SynthesisSettings,
    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RtlSources {
    /// Verilog files; glob patterns allowed
    pub sources: Vec<String>,
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SimSources {
    /// Directory holding `<module>_tb.cpp` testbenches and shared headers
    #[serde(default = "default_sim_dir")]
    pub dir: PathBuf,
    /// Sources linked into every testbench
    #[serde(default)]
    pub common_sources: Vec<PathBuf>,
    pub modules: Vec<TestModule>,
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TestModule {
    pub name: String,
    #[serde(default)]
    pub trace: bool,
    /// Sources beyond `<module>_tb.cpp`
    #[serde(default)]
    pub extra_sources: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SimulationSettings {
    pub entry_source: PathBuf,
    #[serde(default)]
    pub support_sources: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub trace: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisSettings {
    /// Target profile handed to the physical design tools
    pub target: String,
    pub clock_period_ns: f64,
    pub clock_pin: String,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            target: "skywater130_demo".to_string(),
            clock_period_ns: 10.0,
            clock_pin: "clk_i".to_string(),
        }
    }
}

impl SynthesisSettings {
    /// The clock period must be a finite, positive number of nanoseconds
    pub fn validate(&self) -> Result<()> {
        let ns = self.clock_period_ns;
        if ns.is_finite() && ns > 0.0 {
            Ok(())
        } else {
            Err(ValidationError::InvalidProject {
                reason: format!("clock period must be positive, got {}", ns),
            }
            .into())
        }
    }
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_sim_dir() -> PathBuf {
    PathBuf::from("sim")
}

fn default_true() -> bool {
    true
}

impl Project {
    /// The lemoncore repository layout
    pub fn lemoncore() -> Self {
        let rtl = ["alu", "decoder", "ext", "lemoncore", "regfile"];
        let core_support = vec![PathBuf::from("sim/lemoncore.cpp"), PathBuf::from("sim/util.cpp")];

        Self {
            design: "lemoncore".to_string(),
            build_dir: default_build_dir(),
            rtl: RtlSources {
                sources: rtl.iter().map(|m| format!("rtl/core/{}.v", m)).collect(),
                include_dirs: vec![PathBuf::from("rtl/core")],
            },
            sim: SimSources {
                dir: default_sim_dir(),
                common_sources: vec![
                    PathBuf::from("sim/riscv.cpp"),
                    PathBuf::from("sim/verilator-gtest-runner.cpp"),
                ],
                modules: rtl
                    .iter()
                    .map(|&name| TestModule {
                        name: name.to_string(),
                        trace: name == "lemoncore",
                        extra_sources: if name == "lemoncore" {
                            core_support.clone()
                        } else {
                            Vec::new()
                        },
                    })
                    .collect(),
                simulation: SimulationSettings {
                    entry_source: PathBuf::from("sim/lemoncore_sim.cpp"),
                    support_sources: core_support.clone(),
                    trace: true,
                },
            },
            tools: ToolBinaries::default(),
            options: ToolOptions::default(),
            synthesis: SynthesisSettings::default(),
            root: PathBuf::from("."),
        }
    }

    /// Parse a manifest from YAML text
    pub fn from_yaml(yaml: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let mut project: Project = serde_yaml::from_str(yaml)?;
        project.root = root.into();
        project.validate()?;
        Ok(project)
    }

    /// Load a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!(path = %path.display(), "loading project manifest");
        Self::from_yaml(&yaml, root)
    }

    /// Load `path` if given, else `./lemonflow.yaml` if present, else the
    /// built-in lemoncore project
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None if Path::new(MANIFEST_FILE).exists() => Self::load(Path::new(MANIFEST_FILE)),
            None => Ok(Self::lemoncore()),
        }
    }

    /// Apply `LEMONFLOW_*` environment overrides, then re-check the result
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let set = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = set("LEMONFLOW_BUILD_DIR") {
            self.build_dir = PathBuf::from(dir);
        }
        if let Some(p) = set("LEMONFLOW_SURELOG") {
            self.tools.surelog = p;
        }
        if let Some(p) = set("LEMONFLOW_VERILATOR") {
            self.tools.verilator = p;
        }
        if let Some(p) = set("LEMONFLOW_YOSYS") {
            self.tools.yosys = p;
        }
        if let Some(p) = set("LEMONFLOW_OPENROAD") {
            self.tools.openroad = p;
        }
        if let Some(period) = set("LEMONFLOW_CLOCK_PERIOD") {
            self.synthesis.clock_period_ns = period.parse().map_err(|_| LemonError::Config {
                reason: format!("LEMONFLOW_CLOCK_PERIOD is not a number: '{}'", period),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Structural checks on the manifest
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| -> LemonError { ValidationError::InvalidProject { reason }.into() };

        if !is_path_safe(&self.design) {
            return Err(invalid(format!("design name '{}' is not path-safe", self.design)));
        }
        if self.rtl.sources.is_empty() {
            return Err(invalid("rtl.sources is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for module in &self.sim.modules {
            if !is_path_safe(&module.name) {
                return Err(invalid(format!("module name '{}' is not path-safe", module.name)));
            }
            let job = test_job_name(&module.name);
            if !is_path_safe(&job) {
                return Err(invalid(format!("module name '{}' is too long for job '{}'", module.name, job)));
            }
            if !seen.insert(module.name.as_str()) {
                return Err(invalid(format!("module '{}' is listed twice", module.name)));
            }
        }
        self.synthesis.validate()
    }

    /// Resolve a manifest-relative path to an absolute one. Tools run with
    /// their step workdir as cwd, so relative paths would not survive.
    pub fn path(&self, p: &Path) -> PathBuf {
        let joined = if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        };
        if joined.is_absolute() {
            return joined;
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(&joined))
            .unwrap_or(joined)
    }

    /// Verilog sources with glob patterns expanded, in manifest order
    pub fn verilog_sources(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in &self.rtl.sources {
            let full = self.path(Path::new(entry));
            if !entry.contains(['*', '?', '[']) {
                out.push(full);
                continue;
            }
            let pattern = full.to_string_lossy().into_owned();
            let paths = glob::glob(&pattern).map_err(|e| LemonError::Config {
                reason: format!("bad source pattern '{}': {}", entry, e),
            })?;
            let mut matched: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
            matched.sort();
            out.extend(matched);
        }
        Ok(out)
    }

    pub fn include_dirs(&self) -> Vec<PathBuf> {
        self.rtl.include_dirs.iter().map(|d| self.path(d)).collect()
    }

    /// Simulation source directory (passed to the C++ compiler)
    pub fn sim_dir(&self) -> PathBuf {
        self.path(&self.sim.dir)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.path(&self.build_dir)
    }

    pub fn module(&self, name: &str) -> Option<&TestModule> {
        self.sim.modules.iter().find(|m| m.name == name)
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.sim.modules.iter().map(|m| m.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
design: lemoncore
rtl:
  sources: [rtl/core/alu.v, rtl/core/regfile.v]
  include_dirs: [rtl/core]
sim:
  common_sources: [sim/riscv.cpp]
  modules:
    - name: alu
    - name: lemoncore
      trace: true
      extra_sources: [sim/lemoncore.cpp]
  simulation:
    entry_source: sim/lemoncore_sim.cpp
tools:
  verilator: /opt/verilator/bin/verilator
options:
  verilator:
    option: ["-Wno-fatal"]
synthesis:
  clock_period_ns: 20
"#;

    #[test]
    fn parses_manifest_with_defaults() {
        let p = Project::from_yaml(MANIFEST, "/proj").unwrap();
        assert_eq!(p.design, "lemoncore");
        assert_eq!(p.build_dir(), PathBuf::from("/proj/build"));
        assert_eq!(p.tools.verilator, "/opt/verilator/bin/verilator");
        assert_eq!(p.tools.surelog, "surelog");
        assert_eq!(p.synthesis.clock_period_ns, 20.0);
        assert_eq!(p.synthesis.target, "skywater130_demo");
        assert!(p.sim.simulation.trace);
        assert_eq!(p.module_names(), ["alu", "lemoncore"]);
        assert!(p.module("lemoncore").unwrap().trace);
        assert_eq!(p.include_dirs(), [PathBuf::from("/proj/rtl/core")]);
    }

    #[test]
    fn builtin_project_matches_lemoncore_layout() {
        let p = Project::lemoncore();
        p.validate().unwrap();
        assert_eq!(p.module_names(), ["alu", "decoder", "ext", "lemoncore", "regfile"]);
        let core = p.module("lemoncore").unwrap();
        assert!(core.trace);
        assert_eq!(core.extra_sources.len(), 2);
        assert!(!p.module("alu").unwrap().trace);
        assert_eq!(p.verilog_sources().unwrap().len(), 5);
    }

    #[test]
    fn duplicate_modules_rejected() {
        let yaml = MANIFEST.replace("    - name: lemoncore\n", "    - name: alu\n");
        let err = Project::from_yaml(&yaml, ".").unwrap_err();
        assert!(matches!(
            err,
            LemonError::Validation(ValidationError::InvalidProject { .. })
        ));
    }

    #[test]
    fn unsafe_design_name_rejected() {
        let yaml = MANIFEST.replace("design: lemoncore", "design: ../evil");
        assert!(Project::from_yaml(&yaml, ".").is_err());
    }

    #[test]
    fn module_name_must_leave_room_for_job_suffix() {
        let fits = "m".repeat(59);
        let yaml = MANIFEST.replace("name: alu", &format!("name: {}", fits));
        assert!(Project::from_yaml(&yaml, ".").is_ok());

        let long = "m".repeat(60);
        let yaml = MANIFEST.replace("name: alu", &format!("name: {}", long));
        let err = Project::from_yaml(&yaml, ".").unwrap_err();
        assert!(matches!(
            err,
            LemonError::Validation(ValidationError::InvalidProject { .. })
        ));
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let err = Project::from_yaml("design: [", ".").unwrap_err();
        assert!(matches!(err, LemonError::ManifestParse(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let p = Project::lemoncore()
            .with_vars(|k| match k {
                "LEMONFLOW_BUILD_DIR" => Some("/tmp/out".to_string()),
                "LEMONFLOW_VERILATOR" => Some("verilator_bin".to_string()),
                "LEMONFLOW_SURELOG" => Some("  ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(p.build_dir(), PathBuf::from("/tmp/out"));
        assert_eq!(p.tools.verilator, "verilator_bin");
        assert_eq!(p.tools.surelog, "surelog");
    }

    #[test]
    fn bad_clock_period_env_is_config_error() {
        let err = Project::lemoncore()
            .with_vars(|k| (k == "LEMONFLOW_CLOCK_PERIOD").then(|| "fast".to_string()))
            .unwrap_err();
        assert!(matches!(err, LemonError::Config { .. }));
    }

    #[test]
    fn env_clock_period_is_revalidated() {
        for period in ["0", "-5", "NaN", "inf"] {
            let err = Project::lemoncore()
                .with_vars(|k| (k == "LEMONFLOW_CLOCK_PERIOD").then(|| period.to_string()))
                .unwrap_err();
            assert!(
                err.to_string().contains("clock period must be positive"),
                "{}: {}",
                period,
                err
            );
        }
    }

    #[test]
    fn glob_sources_expand_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("rtl")).unwrap();
        for f in ["b.v", "a.v", "notes.txt"] {
            std::fs::write(dir.path().join("rtl").join(f), "").unwrap();
        }
        let yaml = MANIFEST.replace(
            "sources: [rtl/core/alu.v, rtl/core/regfile.v]",
            "sources: [\"rtl/*.v\"]",
        );
        let p = Project::from_yaml(&yaml, dir.path()).unwrap();
        assert_eq!(
            p.verilog_sources().unwrap(),
            [dir.path().join("rtl/a.v"), dir.path().join("rtl/b.v")]
        );
    }
}
