//! IG-003: Solution graph of concrete resources.
//!
//! Ordered maps everywhere so that iteration order (and therefore every
//! decision made while walking the graph) is deterministic.

use super::types::{Resource, ResourceId, SimpleEdge};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// How far a relational walk travels from its starting resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DependencyLayer {
    /// Non-functional neighbours that exist only for the starting resource
    Local,
    /// Immediate neighbours
    Direct,
    /// Through non-functional resources, stopping before functional ones
    Glue,
    /// Like glue, but including the first functional resource on each path
    FirstFunctional,
    /// Everything reachable
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upstream,
    #[default]
    Downstream,
}

impl Direction {
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Upstream => Direction::Downstream,
            Direction::Downstream => Direction::Upstream,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SolutionGraph {
    resources: BTreeMap<ResourceId, Resource>,
    out: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    inc: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl SolutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn vertex(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn vertex_mut(&mut self, id: &ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    pub fn add_vertex(&mut self, res: Resource) -> Result<(), String> {
        if self.resources.contains_key(&res.id) {
            return Err(format!("resource {} already exists", res.id));
        }
        self.out.entry(res.id.clone()).or_default();
        self.inc.entry(res.id.clone()).or_default();
        self.resources.insert(res.id.clone(), res);
        Ok(())
    }

    /// Remove a resource and every edge touching it.
    pub fn remove_vertex(&mut self, id: &ResourceId) -> Result<Resource, String> {
        let res = self
            .resources
            .remove(id)
            .ok_or_else(|| format!("resource {} not found", id))?;
        for tgt in self.out.remove(id).unwrap_or_default() {
            if let Some(preds) = self.inc.get_mut(&tgt) {
                preds.remove(id);
            }
        }
        for src in self.inc.remove(id).unwrap_or_default() {
            if let Some(succs) = self.out.get_mut(&src) {
                succs.remove(id);
            }
        }
        Ok(res)
    }

    /// Returns `Ok(false)` when the edge already exists.
    pub fn add_edge(&mut self, source: &ResourceId, target: &ResourceId) -> Result<bool, String> {
        if !self.contains(source) {
            return Err(format!("edge source {} not found", source));
        }
        if !self.contains(target) {
            return Err(format!("edge target {} not found", target));
        }
        let added = self
            .out
            .entry(source.clone())
            .or_default()
            .insert(target.clone());
        self.inc
            .entry(target.clone())
            .or_default()
            .insert(source.clone());
        Ok(added)
    }

    pub fn remove_edge(&mut self, source: &ResourceId, target: &ResourceId) -> Result<(), String> {
        let removed = self
            .out
            .get_mut(source)
            .map(|s| s.remove(target))
            .unwrap_or(false);
        if !removed {
            return Err(format!("edge {} -> {} not found", source, target));
        }
        if let Some(preds) = self.inc.get_mut(target) {
            preds.remove(source);
        }
        Ok(())
    }

    pub fn has_edge(&self, source: &ResourceId, target: &ResourceId) -> bool {
        self.out.get(source).is_some_and(|s| s.contains(target))
    }

    pub fn edges(&self) -> Vec<SimpleEdge> {
        self.out
            .iter()
            .flat_map(|(s, ts)| ts.iter().map(move |t| SimpleEdge::new(s.clone(), t.clone())))
            .collect()
    }

    pub fn successors(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.out.get(id).into_iter().flatten()
    }

    pub fn predecessors(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.inc.get(id).into_iter().flatten()
    }

    fn neighbours(&self, id: &ResourceId, dir: Direction) -> Vec<ResourceId> {
        match dir {
            Direction::Downstream => self.successors(id).cloned().collect(),
            Direction::Upstream => self.predecessors(id).cloned().collect(),
        }
    }

    /// Rename a resource, rewire its edges and rewrite string references to
    /// it in every other resource's properties.
    pub fn update_resource_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<(), String> {
        if old == new {
            return Ok(());
        }
        if self.contains(new) {
            return Err(format!("cannot rename {} to {}: already exists", old, new));
        }
        let succs: Vec<ResourceId> = self.successors(old).cloned().collect();
        let preds: Vec<ResourceId> = self.predecessors(old).cloned().collect();
        let mut res = self.remove_vertex(old)?;
        res.id = new.clone();
        self.add_vertex(res)?;
        for s in succs {
            let s = if &s == old { new.clone() } else { s };
            self.add_edge(new, &s)?;
        }
        for p in preds {
            let p = if &p == old { new.clone() } else { p };
            self.add_edge(&p, new)?;
        }
        for res in self.resources.values_mut() {
            res.replace_references(old, new);
        }
        Ok(())
    }

    /// Breadth-first walk from `id` honoring `layer`. The start resource is
    /// never included. `is_functional` classifies resources.
    pub fn walk(
        &self,
        id: &ResourceId,
        dir: Direction,
        layer: DependencyLayer,
        is_functional: &dyn Fn(&ResourceId) -> bool,
    ) -> Vec<ResourceId> {
        if layer == DependencyLayer::Direct {
            return self.neighbours(id, dir);
        }
        if layer == DependencyLayer::Local {
            let back = dir.reverse();
            return self
                .neighbours(id, dir)
                .into_iter()
                .filter(|n| !is_functional(n) && self.neighbours(n, back).iter().all(|b| b == id))
                .collect();
        }

        let mut seen = BTreeSet::from([id.clone()]);
        let mut queue = VecDeque::from([id.clone()]);
        let mut result = Vec::new();
        while let Some(cur) = queue.pop_front() {
            for next in self.neighbours(&cur, dir) {
                if !seen.insert(next.clone()) {
                    continue;
                }
                let functional = is_functional(&next);
                match layer {
                    DependencyLayer::Glue if functional => continue,
                    DependencyLayer::FirstFunctional if functional => {
                        result.push(next);
                        continue;
                    }
                    _ => {}
                }
                result.push(next.clone());
                queue.push_back(next);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn chain() -> SolutionGraph {
        // a -> b -> c -> d, c functional
        let mut g = SolutionGraph::new();
        for n in ["p:a:a", "p:b:b", "p:c:c", "p:d:d"] {
            g.add_vertex(Resource::new(id(n))).unwrap();
        }
        g.add_edge(&id("p:a:a"), &id("p:b:b")).unwrap();
        g.add_edge(&id("p:b:b"), &id("p:c:c")).unwrap();
        g.add_edge(&id("p:c:c"), &id("p:d:d")).unwrap();
        g
    }

    fn functional(r: &ResourceId) -> bool {
        r.type_name == "c"
    }

    #[test]
    fn test_ig003_add_and_remove() {
        let mut g = chain();
        assert_eq!(g.len(), 4);
        assert!(g.has_edge(&id("p:a:a"), &id("p:b:b")));
        g.remove_vertex(&id("p:b:b")).unwrap();
        assert!(!g.has_edge(&id("p:a:a"), &id("p:b:b")));
        assert_eq!(g.edges().len(), 1);
    }

    #[test]
    fn test_ig003_duplicate_vertex_rejected() {
        let mut g = chain();
        assert!(g.add_vertex(Resource::new(id("p:a:a"))).is_err());
        assert!(!g.add_edge(&id("p:a:a"), &id("p:b:b")).unwrap());
    }

    #[test]
    fn test_ig003_walk_layers() {
        let g = chain();
        let a = id("p:a:a");
        let direct = g.walk(&a, Direction::Downstream, DependencyLayer::Direct, &functional);
        assert_eq!(direct, vec![id("p:b:b")]);
        let glue = g.walk(&a, Direction::Downstream, DependencyLayer::Glue, &functional);
        assert_eq!(glue, vec![id("p:b:b")]);
        let first = g.walk(&a, Direction::Downstream, DependencyLayer::FirstFunctional, &functional);
        assert_eq!(first, vec![id("p:b:b"), id("p:c:c")]);
        let all = g.walk(&a, Direction::Downstream, DependencyLayer::All, &functional);
        assert_eq!(all.len(), 3);
        let up = g.walk(&id("p:d:d"), Direction::Upstream, DependencyLayer::All, &functional);
        assert_eq!(up, vec![id("p:c:c"), id("p:b:b"), id("p:a:a")]);
    }

    #[test]
    fn test_ig003_walk_local() {
        let mut g = chain();
        g.add_vertex(Resource::new(id("p:e:e"))).unwrap();
        g.add_edge(&id("p:e:e"), &id("p:b:b")).unwrap();
        g.add_vertex(Resource::new(id("p:f:f"))).unwrap();
        g.add_edge(&id("p:a:a"), &id("p:f:f")).unwrap();
        // b is shared with e, f is owned by a alone
        let local = g.walk(&id("p:a:a"), Direction::Downstream, DependencyLayer::Local, &functional);
        assert_eq!(local, vec![id("p:f:f")]);
    }

    #[test]
    fn test_ig003_update_resource_id() {
        let mut g = chain();
        g.vertex_mut(&id("p:a:a"))
            .unwrap()
            .set_property("Next", serde_json::json!("p:b:b"))
            .unwrap();
        g.update_resource_id(&id("p:b:b"), &id("p:b:renamed")).unwrap();
        assert!(!g.contains(&id("p:b:b")));
        assert!(g.has_edge(&id("p:a:a"), &id("p:b:renamed")));
        assert!(g.has_edge(&id("p:b:renamed"), &id("p:c:c")));
        assert_eq!(
            g.vertex(&id("p:a:a")).unwrap().get_property("Next"),
            Some(&serde_json::json!("p:b:renamed"))
        );
    }
}
