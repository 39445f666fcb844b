//! IG-032: Evaluation keys, vertices and change batches.

use super::capture::DependencyCapture;
use super::vertex_edge::EdgeVertex;
use super::vertex_graph_state::GraphStateVertex;
use super::vertex_path_expand::PathExpandVertex;
use super::vertex_property::PropertyVertex;
use super::vertex_resource_rule::ResourceRuleVertex;
use super::Evaluator;
use crate::core::types::{PropertyRef, ResourceId, SimpleEdge};
use crate::engine::Error;
use crate::kb::templates::EdgePathSatisfaction;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity of an evaluation unit. The derived order breaks ties within a
/// readiness tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Property(PropertyRef),
    Edge(SimpleEdge),
    PathExpand {
        edge: SimpleEdge,
        satisfaction: EdgePathSatisfaction,
    },
    ResourceRule {
        resource: ResourceId,
        rule_hash: String,
    },
    /// Synthetic key for a relational query such as `Downstream(p:t, res)`
    GraphState(String),
}

impl Key {
    /// Rewrite every id in the key. Returns `None` when nothing changed.
    pub fn renamed(&self, old: &ResourceId, new: &ResourceId) -> Option<Key> {
        let renamed = match self {
            Key::Property(r) if &r.resource == old => {
                Key::Property(PropertyRef::new(new.clone(), &r.property))
            }
            Key::Edge(e) => Key::Edge(e.rename(old, new)),
            Key::PathExpand { edge, satisfaction } => Key::PathExpand {
                edge: edge.rename(old, new),
                satisfaction: satisfaction.clone(),
            },
            Key::ResourceRule {
                resource,
                rule_hash,
            } if resource == old => Key::ResourceRule {
                resource: new.clone(),
                rule_hash: rule_hash.clone(),
            },
            _ => return None,
        };
        (&renamed != self).then_some(renamed)
    }

    /// Whether the key is about `id`, either as its resource or as an edge
    /// endpoint.
    pub fn references(&self, id: &ResourceId) -> bool {
        match self {
            Key::Property(r) => &r.resource == id,
            Key::Edge(e) | Key::PathExpand { edge: e, .. } => &e.source == id || &e.target == id,
            Key::ResourceRule { resource, .. } => resource == id,
            Key::GraphState(_) => false,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Property(r) => write!(f, "{}", r),
            Key::Edge(e) => write!(f, "{}", e),
            Key::PathExpand { edge, satisfaction } => {
                write!(f, "Expand({}", edge)?;
                if !satisfaction.classification.is_empty() {
                    write!(f, ", {}", satisfaction.classification)?;
                }
                write!(f, ")")
            }
            Key::ResourceRule {
                resource,
                rule_hash,
            } => write!(f, "{} rule {}", resource, rule_hash),
            Key::GraphState(repr) => write!(f, "{}", repr),
        }
    }
}

/// Readiness tiers, most ready first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadyPriority {
    ReadyNow,
    NotReadyLow,
    NotReadyMid,
    NotReadyHigh,
    NotReadyMax,
}

impl ReadyPriority {
    pub const ALL: [ReadyPriority; 5] = [
        ReadyPriority::ReadyNow,
        ReadyPriority::NotReadyLow,
        ReadyPriority::NotReadyMid,
        ReadyPriority::NotReadyHigh,
        ReadyPriority::NotReadyMax,
    ];
}

impl fmt::Display for ReadyPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadyPriority::ReadyNow => "ReadyNow",
            ReadyPriority::NotReadyLow => "NotReadyLow",
            ReadyPriority::NotReadyMid => "NotReadyMid",
            ReadyPriority::NotReadyHigh => "NotReadyHigh",
            ReadyPriority::NotReadyMax => "NotReadyMax",
        };
        write!(f, "{}", s)
    }
}

/// An evaluation unit.
#[derive(Debug, Clone)]
pub enum Vertex {
    Property(PropertyVertex),
    Edge(EdgeVertex),
    PathExpand(PathExpandVertex),
    ResourceRule(ResourceRuleVertex),
    GraphState(GraphStateVertex),
}

impl Vertex {
    pub fn key(&self) -> Key {
        match self {
            Vertex::Property(v) => v.key(),
            Vertex::Edge(v) => v.key(),
            Vertex::PathExpand(v) => v.key(),
            Vertex::ResourceRule(v) => v.key(),
            Vertex::GraphState(v) => v.key(),
        }
    }

    /// Replay the vertex's rules into `cap` to discover what it waits for.
    pub fn dependencies(&mut self, eval: &Evaluator, cap: &mut DependencyCapture) -> Result<(), Error> {
        match self {
            Vertex::Property(v) => v.dependencies(eval, cap),
            Vertex::Edge(v) => v.dependencies(eval, cap),
            Vertex::PathExpand(v) => v.dependencies(eval, cap),
            Vertex::ResourceRule(v) => v.dependencies(eval, cap),
            Vertex::GraphState(_) => Ok(()),
        }
    }

    pub fn evaluate(&self, eval: &mut Evaluator) -> Result<(), Error> {
        match self {
            Vertex::Property(v) => v.evaluate(eval),
            Vertex::Edge(v) => v.evaluate(eval),
            Vertex::PathExpand(v) => v.evaluate(eval),
            Vertex::ResourceRule(v) => v.evaluate(eval),
            Vertex::GraphState(_) => Ok(()),
        }
    }

    /// Merge a duplicate insertion of the same key.
    ///
    /// # Panics
    ///
    /// Panics when the two vertices do not share an identity.
    pub fn update_from(&mut self, other: Vertex) {
        match (self, other) {
            (Vertex::Property(a), Vertex::Property(b)) => a.update_from(b),
            (Vertex::Edge(a), Vertex::Edge(b)) => a.update_from(b),
            (Vertex::PathExpand(a), Vertex::PathExpand(b)) => a.update_from(b),
            (Vertex::ResourceRule(a), Vertex::ResourceRule(b)) => a.update_from(b),
            (Vertex::GraphState(a), Vertex::GraphState(b)) => a.update_from(b),
            (a, b) => panic!("cannot merge vertex {} with {}", a.key(), b.key()),
        }
    }

    /// Readiness tier once the vertex has no pending dependencies. `None`
    /// means ready now.
    pub fn ready(&self, eval: &Evaluator) -> Option<ReadyPriority> {
        match self {
            Vertex::Property(v) => Some(v.ready(eval)),
            Vertex::GraphState(v) => Some(v.ready(eval)),
            Vertex::ResourceRule(_) => Some(ReadyPriority::ReadyNow),
            Vertex::Edge(_) | Vertex::PathExpand(_) => None,
        }
    }

    /// Rewrite ids after a rename.
    pub fn rename(&mut self, old: &ResourceId, new: &ResourceId) {
        match self {
            Vertex::Property(v) => v.rename(old, new),
            Vertex::Edge(v) => v.edge = v.edge.rename(old, new),
            Vertex::PathExpand(v) => v.edge = v.edge.rename(old, new),
            Vertex::ResourceRule(v) => {
                if &v.resource == old {
                    v.resource = new.clone();
                }
            }
            Vertex::GraphState(_) => {}
        }
    }
}

/// A batch of vertices and dependency edges (`source` waits for each
/// target), merged into the evaluator by `enqueue`.
#[derive(Debug, Default)]
pub struct GraphChanges {
    pub nodes: BTreeMap<Key, Vertex>,
    pub edges: BTreeMap<Key, BTreeSet<Key>>,
}

impl GraphChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, v: Vertex) {
        match self.nodes.get_mut(&v.key()) {
            Some(existing) => existing.update_from(v),
            None => {
                self.nodes.insert(v.key(), v);
            }
        }
    }

    pub fn add_edge(&mut self, source: Key, target: Key) {
        self.edges.entry(source).or_default().insert(target);
    }

    pub fn add_edges(&mut self, source: &Key, targets: impl IntoIterator<Item = Key>) {
        self.edges.entry(source.clone()).or_default().extend(targets);
    }

    pub fn merge(&mut self, other: GraphChanges) {
        for (_, v) in other.nodes {
            self.add_node(v);
        }
        for (k, targets) in other.edges {
            self.edges.entry(k).or_default().extend(targets);
        }
    }

    /// Derive `v`'s dependencies and add it together with them.
    pub fn add_vertex_and_deps(&mut self, eval: &Evaluator, mut v: Vertex) -> Result<(), Error> {
        let mut cap = DependencyCapture::new(eval, v.key());
        v.dependencies(eval, &mut cap)?;
        self.merge(cap.into_changes());
        self.add_node(v);
        Ok(())
    }
}
