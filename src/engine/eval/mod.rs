//! IG-030: Dependency-driven evaluation.
//!
//! Every property, edge, expansion and resource rule is a vertex in a
//! dependency graph. Each round evaluates the vertices that wait for
//! nothing, most ready first, then re-derives the dependencies of
//! everything still pending. Evaluating a vertex may grow or rename the
//! solution, which enqueues more vertices; the loop ends when nothing is
//! pending or nothing can make progress.

pub mod capture;
pub mod dep_graph;
pub mod dot;
pub mod graph_ops;
pub mod vertex;
pub mod vertex_edge;
pub mod vertex_graph_state;
pub mod vertex_path_expand;
pub mod vertex_property;
pub mod vertex_resource_rule;

use crate::core::constraints::Constraints;
use crate::core::graph::SolutionGraph;
use crate::core::types::ResourceId;
use crate::engine::{Decision, EngineConfig, Error};
use crate::kb::KnowledgeBase;
use dep_graph::DepGraph;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vertex::{GraphChanges, Key, ReadyPriority, Vertex};

/// How one vertex went.
#[derive(Debug, Clone, Copy)]
pub struct VertexStats {
    pub ready: ReadyPriority,
    pub duration: Duration,
}

pub struct Evaluator {
    pub(crate) kb: Arc<KnowledgeBase>,
    pub(crate) solution: SolutionGraph,
    pub(crate) constraints: Constraints,
    pub(crate) decisions: Vec<Decision>,
    pub(crate) graph: DepGraph<Vertex>,
    pub(crate) unevaluated: DepGraph<()>,
    pub(crate) evaluated_order: Vec<Vec<Key>>,
    pub(crate) errored: BTreeSet<Key>,
    pub(crate) stats: BTreeMap<Key, VertexStats>,
    pub(crate) config: EngineConfig,
    pub(crate) renames: BTreeMap<ResourceId, ResourceId>,
}

impl Evaluator {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Evaluator {
            kb,
            solution: SolutionGraph::new(),
            constraints: Constraints::default(),
            decisions: Vec::new(),
            graph: DepGraph::new(),
            unevaluated: DepGraph::new(),
            evaluated_order: Vec::new(),
            errored: BTreeSet::new(),
            stats: BTreeMap::new(),
            config: EngineConfig::default(),
            renames: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn solution(&self) -> &SolutionGraph {
        &self.solution
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Groups of keys in the order they were evaluated.
    pub fn evaluated_order(&self) -> &[Vec<Key>] {
        &self.evaluated_order
    }

    pub fn into_parts(self) -> (SolutionGraph, Vec<Decision>) {
        (self.solution, self.decisions)
    }

    /// In the graph and no longer pending.
    pub fn is_evaluated(&self, key: &Key) -> bool {
        self.graph.contains(key) && !self.unevaluated.contains(key)
    }

    pub(crate) fn record(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }

    /// The id a resource has now, following renames.
    pub fn current_id(&self, id: &ResourceId) -> ResourceId {
        let mut current = id;
        for _ in 0..=self.renames.len() {
            match self.renames.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.clone()
    }

    fn current_key(&self, key: &Key) -> Key {
        let mut key = key.clone();
        for (old, new) in &self.renames {
            if let Some(renamed) = key.renamed(old, new) {
                key = renamed;
            }
        }
        key
    }

    /// Run until nothing is pending. Debug graphs are written afterwards
    /// when configured, whether or not evaluation succeeded.
    pub fn evaluate(&mut self) -> Result<(), Error> {
        let result = self.run();
        if let Some(dir) = self.config.debug_dir.clone() {
            if let Err(e) = dot::write_debug_files(self, &dir) {
                warn!("could not write debug graphs to {}: {}", dir.display(), e);
            }
        }
        result
    }

    fn run(&mut self) -> Result<(), Error> {
        loop {
            if self.unevaluated.is_empty() {
                return Ok(());
            }
            let group = self.evaluated_order.len();
            self.evaluated_order.push(Vec::new());

            let ready = self.poll_ready();
            if ready.is_empty() {
                return Err(Error::CircularDependency {
                    remaining: self.unevaluated.len(),
                });
            }
            debug!("Evaluating group {} ({} vertices)", group, ready.len());

            let mut errs = Vec::new();
            for (key, priority) in ready {
                // an earlier vertex in the group may have removed it
                if self.unevaluated.remove(&key).is_none() {
                    continue;
                }
                let Some(v) = self.graph.get(&key).cloned() else {
                    continue;
                };
                self.evaluated_order[group].push(key.clone());
                let start = Instant::now();
                let result = v.evaluate(self);
                let key = self.current_key(&key);
                self.stats.insert(
                    key.clone(),
                    VertexStats {
                        ready: priority,
                        duration: start.elapsed(),
                    },
                );
                if let Err(e) = result {
                    self.errored.insert(key.clone());
                    errs.push(Error::Vertex {
                        key: key.to_string(),
                        source: Box::new(e),
                    });
                }
            }
            if let Err(e) = Error::join(errs) {
                return Err(Error::Group {
                    group,
                    source: Box::new(e),
                });
            }
            self.recalculate_unevaluated()?;
        }
    }

    /// Pending vertices that wait for nothing, restricted to the most ready
    /// tier, in key order.
    fn poll_ready(&self) -> Vec<(Key, ReadyPriority)> {
        let mut tiers: BTreeMap<ReadyPriority, Vec<Key>> = BTreeMap::new();
        for key in self.unevaluated.keys() {
            if self.unevaluated.out_degree(key) > 0 {
                continue;
            }
            let Some(v) = self.graph.get(key) else {
                continue;
            };
            let priority = v.ready(self).unwrap_or(ReadyPriority::ReadyNow);
            tiers.entry(priority).or_default().push(key.clone());
        }
        tiers
            .into_iter()
            .next()
            .map(|(p, keys)| keys.into_iter().map(|k| (k, p)).collect())
            .unwrap_or_default()
    }

    /// Re-derive the dependencies of every pending vertex against the
    /// solution as it is now.
    fn recalculate_unevaluated(&mut self) -> Result<(), Error> {
        let order = self.unevaluated.topological_order();
        self.unevaluated.clear_edges();
        let mut errs = Vec::new();
        for key in order {
            let Some(v) = self.graph.get(&key).cloned() else {
                continue;
            };
            let mut changes = GraphChanges::new();
            if let Err(e) = changes.add_vertex_and_deps(self, v) {
                errs.push(e);
                continue;
            }
            if let Err(e) = self.enqueue(changes) {
                errs.push(e);
            }
        }
        Error::join(errs)
    }
}
