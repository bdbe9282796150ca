//! Event log for orchestrator runs
//!
//! Append-only audit trail of a run:
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run-level and step-level variants
//! - EventLog: thread-safe, cheap to clone (shared storage)

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        job: Arc<str>,
        flow: Arc<str>,
        step_count: usize,
    },
    RunCompleted {
        job: Arc<str>,
        total_duration_ms: u64,
    },
    RunFailed {
        job: Arc<str>,
        failed_step: Arc<str>,
        error: String,
    },

    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    StepScheduled {
        step: Arc<str>,
        dependencies: Vec<Arc<str>>,
    },
    StepStarted {
        step: Arc<str>,
        tool: Arc<str>,
        command: Vec<String>,
    },
    StepCompleted {
        step: Arc<str>,
        artifacts: Vec<(String, PathBuf)>,
        duration_ms: u64,
    },
    StepFailed {
        step: Arc<str>,
        tool: Arc<str>,
        exit_code: Option<i32>,
        duration_ms: u64,
    },
}

impl EventKind {
    /// Extract the step name if the event is step-related
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepScheduled { step, .. }
            | Self::StepStarted { step, .. }
            | Self::StepCompleted { step, .. }
            | Self::StepFailed { step, .. } => Some(step),
            Self::RunStarted { .. } | Self::RunCompleted { .. } | Self::RunFailed { .. } => None,
        }
    }

    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::RunStarted { .. } | Self::RunCompleted { .. } | Self::RunFailed { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Filter events by step name
    pub fn filter_step(&self, step: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.step() == Some(step))
            .collect()
    }

    /// Run-level events only
    pub fn run_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
