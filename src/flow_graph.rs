//! FlowGraph - named DAG of build steps
//!
//! Uses Arc<str> for zero-cost cloning of step names.
//!
//! DAG validation happens at insertion time: an edge that would close a
//! cycle is rejected and the graph is left untouched.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::GraphError;

/// Graph of step dependencies within one flow
#[derive(Debug, Clone)]
pub struct FlowGraph {
    name: Arc<str>,
    /// Steps in declaration order (tie-break order for scheduling)
    steps: Vec<Arc<str>>,
    /// step -> tool bound to it
    tools: FxHashMap<Arc<str>, Arc<str>>,
    /// step -> successors
    adjacency: FxHashMap<Arc<str>, Vec<Arc<str>>>,
    /// step -> predecessors (dependencies)
    predecessors: FxHashMap<Arc<str>, Vec<Arc<str>>>,
}

impl FlowGraph {
    /// Create an empty flow
    pub fn new(name: &str) -> Result<Self, GraphError> {
        validate_name("flow", name)?;
        Ok(Self {
            name: Arc::from(name),
            steps: Vec::new(),
            tools: FxHashMap::default(),
            adjacency: FxHashMap::default(),
            predecessors: FxHashMap::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a step and bind it to a tool
    pub fn add_step(&mut self, step: &str, tool: &str) -> Result<(), GraphError> {
        validate_name("step", step)?;
        validate_name("tool", tool)?;
        if self.contains(step) {
            return Err(GraphError::DuplicateStep {
                flow: self.name.to_string(),
                step: step.to_string(),
            });
        }

        let id: Arc<str> = Arc::from(step);
        self.steps.push(Arc::clone(&id));
        self.tools.insert(Arc::clone(&id), Arc::from(tool));
        self.adjacency.insert(Arc::clone(&id), Vec::new());
        self.predecessors.insert(id, Vec::new());
        Ok(())
    }

    /// Declare that `to` must run after `from`.
    ///
    /// Fails if either endpoint is undeclared or the edge would create a
    /// cycle. Re-adding an existing edge is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        let src = self.lookup(from)?;
        let tgt = self.lookup(to)?;

        // A path to -> from means from -> to closes a loop (covers from == to)
        if self.has_path(to, from) {
            return Err(GraphError::CycleDetected {
                flow: self.name.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let successors = self.adjacency.entry(Arc::clone(&src)).or_default();
        if successors.iter().any(|s| s.as_ref() == to) {
            return Ok(());
        }
        successors.push(Arc::clone(&tgt));
        self.predecessors.entry(tgt).or_default().push(src);
        Ok(())
    }

    /// Steps in execution order.
    ///
    /// Kahn's algorithm; among ready steps the earliest declared runs first,
    /// so identical declarations always yield identical orders.
    pub fn topological_order(&self) -> Vec<Arc<str>> {
        let index: FxHashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_ref(), i))
            .collect();

        let mut in_degree: Vec<usize> = self
            .steps
            .iter()
            .map(|s| self.get_dependencies(s).len())
            .collect();

        let mut order = Vec::with_capacity(self.steps.len());
        let mut done = vec![false; self.steps.len()];

        while order.len() < self.steps.len() {
            // Lowest declaration index with no pending dependencies
            let Some(next) = (0..self.steps.len()).find(|&i| !done[i] && in_degree[i] == 0) else {
                // Unreachable while add_edge rejects cycles
                break;
            };
            done[next] = true;
            let step = &self.steps[next];
            for succ in self.get_successors(step) {
                if let Some(&i) = index.get(succ.as_ref()) {
                    in_degree[i] -= 1;
                }
            }
            order.push(Arc::clone(step));
        }

        order
    }

    /// Steps with no dependencies
    pub fn roots(&self) -> Vec<Arc<str>> {
        self.steps
            .iter()
            .filter(|s| self.get_dependencies(s).is_empty())
            .cloned()
            .collect()
    }

    /// Steps with no successors (final steps)
    pub fn final_steps(&self) -> Vec<Arc<str>> {
        self.steps
            .iter()
            .filter(|s| self.get_successors(s).is_empty())
            .cloned()
            .collect()
    }

    /// Declared steps, in declaration order
    pub fn steps(&self) -> &[Arc<str>] {
        &self.steps
    }

    /// Tool bound to a step
    pub fn tool(&self, step: &str) -> Option<&str> {
        self.tools.get(step).map(|t| t.as_ref())
    }

    /// Get dependencies of a step
    #[inline]
    pub fn get_dependencies(&self, step: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors.get(step).map_or(EMPTY, Vec::as_slice)
    }

    /// Get successors of a step
    #[inline]
    pub fn get_successors(&self, step: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.adjacency.get(step).map_or(EMPTY, Vec::as_slice)
    }

    #[inline]
    pub fn contains(&self, step: &str) -> bool {
        self.tools.contains_key(step)
    }

    /// Check if there's a path from `from` to `to` (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            for neighbor in self.get_successors(current) {
                if neighbor.as_ref() == to {
                    return true;
                }
                if visited.insert(neighbor.as_ref()) {
                    queue.push_back(neighbor.as_ref());
                }
            }
        }

        false
    }

    fn lookup(&self, step: &str) -> Result<Arc<str>, GraphError> {
        self.steps
            .iter()
            .find(|s| s.as_ref() == step)
            .cloned()
            .ok_or_else(|| GraphError::UnknownStep {
                flow: self.name.to_string(),
                step: step.to_string(),
            })
    }
}

fn validate_name(what: &'static str, name: &str) -> Result<(), GraphError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(GraphError::InvalidName {
            what,
            name: name.to_string(),
        })
    }
}
