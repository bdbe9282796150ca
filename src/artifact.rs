//! Artifact storage for a single orchestrator run
//!
//! Keyed by (job, step). Every executed step leaves a record, even when it
//! declared no outputs, so "ran but produced nothing" and "never ran" stay
//! distinguishable.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ArtifactNotFound, NotFoundReason};

/// Kind of file a step can produce
///
/// Kinds compare by their string form, so `Other("vexe")` is the same kind
/// as `Executable`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ArtifactKind {
    /// Simulator executable (`vexe`)
    Executable,
    /// Gate-level netlist (`vg`)
    Netlist,
    /// Placed/routed design database (`def`)
    Layout,
    /// Final mask layout (`gds`)
    Gds,
    /// Tool log (`log`)
    Log,
    /// Anything else a tool declares
    Other(String),
}

impl ArtifactKind {
    pub fn as_str(&self) -> &str {
        match self {
            ArtifactKind::Executable => "vexe",
            ArtifactKind::Netlist => "vg",
            ArtifactKind::Layout => "def",
            ArtifactKind::Gds => "gds",
            ArtifactKind::Log => "log",
            ArtifactKind::Other(s) => s,
        }
    }
}

impl PartialEq for ArtifactKind {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ArtifactKind {}

impl Hash for ArtifactKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim() {
            "" => return Err("artifact kind cannot be empty".to_string()),
            "vexe" => ArtifactKind::Executable,
            "vg" => ArtifactKind::Netlist,
            "def" => ArtifactKind::Layout,
            "gds" => ArtifactKind::Gds,
            "log" => ArtifactKind::Log,
            other => ArtifactKind::Other(other.to_string()),
        };
        Ok(kind)
    }
}

impl From<ArtifactKind> for String {
    fn from(kind: ArtifactKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TryFrom<String> for ArtifactKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Outcome of an executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// Everything known about one executed step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub tool: String,
    pub status: StepStatus,
    pub duration: Duration,
    /// Full command line as handed to the tool
    pub command: Vec<String>,
    artifacts: HashMap<ArtifactKind, PathBuf>,
}

impl StepRecord {
    pub fn completed(
        tool: impl Into<String>,
        command: Vec<String>,
        artifacts: impl IntoIterator<Item = (ArtifactKind, PathBuf)>,
        duration: Duration,
    ) -> Self {
        Self {
            tool: tool.into(),
            status: StepStatus::Completed,
            duration,
            command,
            artifacts: artifacts.into_iter().collect(),
        }
    }

    pub fn failed(tool: impl Into<String>, command: Vec<String>, duration: Duration) -> Self {
        Self {
            tool: tool.into(),
            status: StepStatus::Failed,
            duration,
            command,
            artifacts: HashMap::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub fn artifacts(&self) -> impl Iterator<Item = (&ArtifactKind, &Path)> {
        self.artifacts.iter().map(|(k, p)| (k, p.as_path()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StepKey {
    job: String,
    step: String,
}

/// Artifacts registered by one run, queried after it finishes
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    records: HashMap<StepKey, StepRecord>,
    /// Insertion order, for summaries
    order: Vec<StepKey>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step outcome. Only the orchestrator populates a store.
    pub(crate) fn record(&mut self, job: &str, step: &str, record: StepRecord) {
        let key = StepKey {
            job: job.to_string(),
            step: step.to_string(),
        };
        if !self.records.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.records.insert(key, record);
    }

    /// Look up the path registered for `(job, step, kind)`.
    ///
    /// Never infers: a kind the step did not declare is reported as missing
    /// even when the step produced other artifacts.
    pub fn find(&self, job: &str, step: &str, kind: &ArtifactKind) -> Result<&Path, ArtifactNotFound> {
        let not_found = |reason| ArtifactNotFound {
            job: job.to_string(),
            step: step.to_string(),
            kind: kind.clone(),
            reason,
        };

        let record = self
            .records
            .get(&StepKey {
                job: job.to_string(),
                step: step.to_string(),
            })
            .ok_or_else(|| not_found(NotFoundReason::StepNeverRan))?;

        if !record.is_completed() {
            return Err(not_found(NotFoundReason::StepFailed));
        }

        record
            .artifacts
            .get(kind)
            .map(PathBuf::as_path)
            .ok_or_else(|| not_found(NotFoundReason::NoSuchArtifact))
    }

    /// Get the record for a step, if it ran
    pub fn step(&self, job: &str, step: &str) -> Option<&StepRecord> {
        self.records.get(&StepKey {
            job: job.to_string(),
            step: step.to_string(),
        })
    }

    /// Check if a step ran (successfully or not)
    pub fn ran(&self, job: &str, step: &str) -> bool {
        self.step(job, step).is_some()
    }

    /// Iterate (job, step, record) in the order steps were recorded
    pub fn records(&self) -> impl Iterator<Item = (&str, &str, &StepRecord)> {
        self.order.iter().filter_map(|key| {
            self.records
                .get(key)
                .map(|r| (key.job.as_str(), key.step.as_str(), r))
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exe_record(path: &str) -> StepRecord {
        StepRecord::completed(
            "verilator",
            vec!["verilator".into()],
            [(ArtifactKind::Executable, PathBuf::from(path))],
            Duration::from_millis(10),
        )
    }

    #[test]
    fn find_registered_artifact() {
        let mut store = ArtifactStore::new();
        store.record("alu_test", "compile", exe_record("/build/alu_test/compile/lemoncore.vexe"));

        let path = store.find("alu_test", "compile", &ArtifactKind::Executable).unwrap();
        assert_eq!(path, Path::new("/build/alu_test/compile/lemoncore.vexe"));

        // Stable across repeated lookups
        let again = store.find("alu_test", "compile", &ArtifactKind::Executable).unwrap();
        assert_eq!(path, again);
    }

    #[test]
    fn never_ran_is_distinct_from_no_artifact() {
        let mut store = ArtifactStore::new();
        store.record(
            "alu_test",
            "import",
            StepRecord::completed("surelog", vec![], [], Duration::ZERO),
        );

        let ran_no_artifact = store
            .find("alu_test", "import", &ArtifactKind::Executable)
            .unwrap_err();
        assert_eq!(ran_no_artifact.reason, NotFoundReason::NoSuchArtifact);

        let never_ran = store
            .find("alu_test", "compile", &ArtifactKind::Executable)
            .unwrap_err();
        assert_eq!(never_ran.reason, NotFoundReason::StepNeverRan);
        assert!(store.ran("alu_test", "import"));
        assert!(!store.ran("alu_test", "compile"));
    }

    #[test]
    fn mismatched_kind_is_not_found() {
        let mut store = ArtifactStore::new();
        store.record("alu_test", "compile", exe_record("/tmp/x.vexe"));

        let err = store.find("alu_test", "compile", &ArtifactKind::Netlist).unwrap_err();
        assert_eq!(err.reason, NotFoundReason::NoSuchArtifact);
    }

    #[test]
    fn failed_step_reports_step_failed() {
        let mut store = ArtifactStore::new();
        store.record(
            "alu_test",
            "compile",
            StepRecord::failed("verilator", vec![], Duration::ZERO),
        );

        let err = store.find("alu_test", "compile", &ArtifactKind::Executable).unwrap_err();
        assert_eq!(err.reason, NotFoundReason::StepFailed);
    }

    #[test]
    fn jobs_are_isolated() {
        let mut store = ArtifactStore::new();
        store.record("alu_test", "compile", exe_record("/a.vexe"));
        store.record("regfile_test", "compile", exe_record("/b.vexe"));

        assert_eq!(
            store.find("alu_test", "compile", &ArtifactKind::Executable).unwrap(),
            Path::new("/a.vexe")
        );
        assert_eq!(
            store.find("regfile_test", "compile", &ArtifactKind::Executable).unwrap(),
            Path::new("/b.vexe")
        );
    }

    #[test]
    fn artifact_kind_parses_known_and_custom() {
        assert_eq!("vexe".parse::<ArtifactKind>().unwrap(), ArtifactKind::Executable);
        assert_eq!("gds".parse::<ArtifactKind>().unwrap(), ArtifactKind::Gds);
        assert_eq!(
            "sdc".parse::<ArtifactKind>().unwrap(),
            ArtifactKind::Other("sdc".into())
        );
        assert!("".parse::<ArtifactKind>().is_err());
    }

    #[test]
    fn custom_spelling_of_builtin_kind_is_the_same_kind() {
        let custom = ArtifactKind::Other("vexe".into());
        assert_eq!(custom, ArtifactKind::Executable);
        assert_ne!(ArtifactKind::Other("vg".into()), ArtifactKind::Executable);

        let kinds: std::collections::HashSet<_> = [custom.clone(), ArtifactKind::Executable].into_iter().collect();
        assert_eq!(kinds.len(), 1);

        let mut store = ArtifactStore::new();
        store.record("alu_test", "compile", exe_record("/tmp/alu.vexe"));
        assert_eq!(
            store.find("alu_test", "compile", &custom).unwrap(),
            Path::new("/tmp/alu.vexe")
        );
    }

    #[test]
    fn records_keep_insertion_order() {
        let mut store = ArtifactStore::new();
        store.record("j", "import", StepRecord::completed("surelog", vec![], [], Duration::ZERO));
        store.record("j", "compile", exe_record("/x.vexe"));

        let steps: Vec<_> = store.records().map(|(_, step, _)| step).collect();
        assert_eq!(steps, vec!["import", "compile"]);
        assert_eq!(store.len(), 2);
    }
}
