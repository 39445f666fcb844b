//! IG-040: Weighted scratch graph used while selecting a path.
//!
//! Nodes are resources (real or phantom) looked up by id through an
//! insertion-ordered index; the graph refuses edges that would close a cycle.

use crate::core::types::{Resource, ResourceId, SimpleEdge};
use indexmap::IndexMap;
use petgraph::algo::{all_simple_paths, dijkstra, has_path_connecting};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;

#[derive(Debug, Clone, Default)]
pub struct TempGraph {
    graph: StableDiGraph<Resource, i64>,
    index: IndexMap<ResourceId, NodeIndex>,
}

impl TempGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn vertex(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&n| &self.graph[n])
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.index.keys()
    }

    /// Returns `false` when a vertex with the same id already exists.
    pub fn add_vertex(&mut self, res: Resource) -> bool {
        if self.index.contains_key(&res.id) {
            return false;
        }
        let id = res.id.clone();
        let n = self.graph.add_node(res);
        self.index.insert(id, n);
        true
    }

    /// Add or reweight `source -> target`.
    pub fn add_edge(&mut self, source: &ResourceId, target: &ResourceId, weight: i64) -> Result<(), String> {
        let s = *self
            .index
            .get(source)
            .ok_or_else(|| format!("source {} not in path selection graph", source))?;
        let t = *self
            .index
            .get(target)
            .ok_or_else(|| format!("target {} not in path selection graph", target))?;
        if let Some(e) = self.graph.find_edge(s, t) {
            self.graph[e] = weight;
            return Ok(());
        }
        if s == t || has_path_connecting(&self.graph, t, s, None) {
            return Err(format!("edge {} -> {} would create a cycle", source, target));
        }
        self.graph.add_edge(s, t, weight);
        Ok(())
    }

    pub fn edge_weight(&self, source: &ResourceId, target: &ResourceId) -> Option<i64> {
        let s = *self.index.get(source)?;
        let t = *self.index.get(target)?;
        self.graph.find_edge(s, t).map(|e| self.graph[e])
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn edges(&self) -> Vec<SimpleEdge> {
        let mut edges: Vec<SimpleEdge> = self
            .graph
            .edge_references()
            .map(|e| {
                SimpleEdge::new(
                    self.graph[e.source()].id.clone(),
                    self.graph[e.target()].id.clone(),
                )
            })
            .collect();
        edges.sort();
        edges
    }

    /// Every simple path from `source` to `target`, shortest first then by
    /// ids.
    pub fn all_paths(&self, source: &ResourceId, target: &ResourceId) -> Vec<Vec<ResourceId>> {
        let (Some(&s), Some(&t)) = (self.index.get(source), self.index.get(target)) else {
            return Vec::new();
        };
        let mut paths: Vec<Vec<ResourceId>> =
            all_simple_paths::<Vec<NodeIndex>, _>(&self.graph, s, t, 0, None)
                .map(|p| p.into_iter().map(|n| self.graph[n].id.clone()).collect())
                .collect();
        paths.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        paths
    }

    /// Cheapest path, ties broken by id.
    pub fn shortest_path(&self, source: &ResourceId, target: &ResourceId) -> Option<Vec<ResourceId>> {
        let s = *self.index.get(source)?;
        let t = *self.index.get(target)?;
        let path = stable_shortest_path(&self.graph, s, t, |r| &r.id)?;
        Some(path.into_iter().map(|n| self.graph[n].id.clone()).collect())
    }

    /// Everything reachable from `id` in `dir`.
    pub fn reachable(&self, id: &ResourceId, dir: Direction) -> Vec<ResourceId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = vec![start];
        let mut stack = vec![start];
        while let Some(cur) = stack.pop() {
            for n in self.graph.neighbors_directed(cur, dir) {
                if !seen.contains(&n) {
                    seen.push(n);
                    stack.push(n);
                }
            }
        }
        let mut out: Vec<ResourceId> = seen[1..].iter().map(|&n| self.graph[n].id.clone()).collect();
        out.sort();
        out
    }

    /// Swap the resource stored under `old` for `res`, keeping edges. When
    /// `res.id` is already present the two vertices are merged.
    pub fn replace(&mut self, old: &ResourceId, res: Resource) -> Result<(), String> {
        let n = self
            .index
            .shift_remove(old)
            .ok_or_else(|| format!("{} not in path selection graph", old))?;
        let Some(&existing) = self.index.get(&res.id) else {
            self.index.insert(res.id.clone(), n);
            self.graph[n] = res;
            return Ok(());
        };
        if existing == n {
            self.graph[n] = res;
            return Ok(());
        }
        let outgoing: Vec<(NodeIndex, i64)> = self
            .graph
            .edges_directed(n, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        let incoming: Vec<(NodeIndex, i64)> = self
            .graph
            .edges_directed(n, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .collect();
        self.graph.remove_node(n);
        for (t, w) in outgoing {
            if t != existing && self.graph.find_edge(existing, t).is_none() {
                self.graph.add_edge(existing, t, w);
            }
        }
        for (s, w) in incoming {
            if s != existing && self.graph.find_edge(s, existing).is_none() {
                self.graph.add_edge(s, existing, w);
            }
        }
        Ok(())
    }
}

/// Dijkstra from `from`, then walk back from `to` choosing the smallest id
/// among predecessors that lie on a cheapest path.
pub(crate) fn stable_shortest_path<N>(
    g: &StableDiGraph<N, i64>,
    from: NodeIndex,
    to: NodeIndex,
    id: impl Fn(&N) -> &ResourceId,
) -> Option<Vec<NodeIndex>> {
    let dist = dijkstra(g, from, None, |e| *e.weight());
    dist.get(&to)?;
    let mut path = vec![to];
    let mut cur = to;
    while cur != from {
        let d = dist[&cur];
        let prev = g
            .edges_directed(cur, Direction::Incoming)
            .filter_map(|e| {
                let n = e.source();
                let dn = *dist.get(&n)?;
                (dn + *e.weight() == d && !path.contains(&n)).then_some(n)
            })
            .min_by(|a, b| id(&g[*a]).cmp(id(&g[*b])))?;
        path.push(prev);
        cur = prev;
    }
    path.reverse();
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn graph(nodes: &[&str]) -> TempGraph {
        let mut g = TempGraph::new();
        for n in nodes {
            g.add_vertex(Resource::new(id(n)));
        }
        g
    }

    #[test]
    fn test_ig040_refuses_cycles_and_reweights() {
        let mut g = graph(&["p:a:a", "p:b:b"]);
        g.add_edge(&id("p:a:a"), &id("p:b:b"), 5).unwrap();
        assert!(g.add_edge(&id("p:b:b"), &id("p:a:a"), 1).is_err());
        g.add_edge(&id("p:a:a"), &id("p:b:b"), 7).unwrap();
        assert_eq!(g.edge_weight(&id("p:a:a"), &id("p:b:b")), Some(7));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_ig040_shortest_path_tie_breaks_by_id() {
        let mut g = graph(&["p:a:a", "p:m:y", "p:m:x", "p:z:z"]);
        for mid in ["p:m:y", "p:m:x"] {
            g.add_edge(&id("p:a:a"), &id(mid), 10).unwrap();
            g.add_edge(&id(mid), &id("p:z:z"), 10).unwrap();
        }
        let path = g.shortest_path(&id("p:a:a"), &id("p:z:z")).unwrap();
        assert_eq!(path, vec![id("p:a:a"), id("p:m:x"), id("p:z:z")]);

        // a cheaper detour wins over the id order
        g.add_edge(&id("p:m:y"), &id("p:z:z"), 1).unwrap();
        let path = g.shortest_path(&id("p:a:a"), &id("p:z:z")).unwrap();
        assert_eq!(path[1], id("p:m:y"));
    }

    #[test]
    fn test_ig040_all_paths_sorted() {
        let mut g = graph(&["p:a:a", "p:b:b", "p:c:c"]);
        g.add_edge(&id("p:a:a"), &id("p:b:b"), 1).unwrap();
        g.add_edge(&id("p:b:b"), &id("p:c:c"), 1).unwrap();
        g.add_edge(&id("p:a:a"), &id("p:c:c"), 1).unwrap();
        let paths = g.all_paths(&id("p:a:a"), &id("p:c:c"));
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].len(), 2);
        assert_eq!(g.reachable(&id("p:a:a"), Direction::Outgoing).len(), 2);
    }

    #[test]
    fn test_ig040_replace_merges_into_existing() {
        let mut g = graph(&["p:a:a", "p:b:phantom$0", "p:b:real", "p:c:c"]);
        g.add_edge(&id("p:a:a"), &id("p:b:phantom$0"), 3).unwrap();
        g.add_edge(&id("p:b:phantom$0"), &id("p:c:c"), 3).unwrap();
        g.replace(&id("p:b:phantom$0"), Resource::new(id("p:b:real")))
            .unwrap();
        assert!(!g.contains(&id("p:b:phantom$0")));
        assert_eq!(g.edge_weight(&id("p:a:a"), &id("p:b:real")), Some(3));
        assert_eq!(g.edge_weight(&id("p:b:real"), &id("p:c:c")), Some(3));

        g.replace(&id("p:c:c"), Resource::new(id("p:c:renamed"))).unwrap();
        assert!(g.contains(&id("p:c:renamed")));
        assert_eq!(g.len(), 3);
    }
}
