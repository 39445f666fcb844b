//! IG-043: Scoring existing resources as stand-ins for phantom hops.
//!
//! Higher scores divide the hop weight further, so a well-placed existing
//! resource beats creating a new one.

use super::graph::stable_shortest_path;
use crate::core::graph::{DependencyLayer, Direction, SolutionGraph};
use crate::core::types::ResourceId;
use crate::kb::KnowledgeBase;
use crate::rules::DynamicContext;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use rustc_hash::FxHashMap;

const FUNCTIONAL_HOP: i64 = 1000;
const GLUE_HOP: i64 = 1;

/// The solution graph with every edge walkable both ways. Hops touching a
/// functional resource are far more expensive than glue-to-glue hops.
#[derive(Debug, Default)]
pub struct UndirectedGraph {
    graph: StableDiGraph<ResourceId, i64>,
    index: FxHashMap<ResourceId, NodeIndex>,
}

impl UndirectedGraph {
    pub fn build(sol: &SolutionGraph, kb: &KnowledgeBase) -> Self {
        let mut g = UndirectedGraph::default();
        for id in sol.ids() {
            let n = g.graph.add_node(id.clone());
            g.index.insert(id.clone(), n);
        }
        for e in sol.edges() {
            let (Some(&s), Some(&t)) = (g.index.get(&e.source), g.index.get(&e.target)) else {
                continue;
            };
            let w = if kb.is_functional(&e.source) || kb.is_functional(&e.target) {
                FUNCTIONAL_HOP
            } else {
                GLUE_HOP
            };
            g.graph.add_edge(s, t, w);
            g.graph.add_edge(t, s, w);
        }
        g
    }

    /// Cheapest path including both ends, ties broken by id.
    pub fn shortest_path(&self, from: &ResourceId, to: &ResourceId) -> Option<Vec<ResourceId>> {
        let s = *self.index.get(from)?;
        let t = *self.index.get(to)?;
        let path = stable_shortest_path(&self.graph, s, t, |id| id)?;
        Some(path.into_iter().map(|n| self.graph[n].clone()).collect())
    }
}

/// Score `id` as a stand-in on the path from `src` to `target`:
/// - +10 if it is directly downstream of `src`, else +5 if reachable through
///   glue; the same again for upstream of `target`
/// - +9 if the in-progress result already uses it
/// - up to +10 for proximity to both ends, never less than 2
pub fn determine_candidate_weight(
    sol: &SolutionGraph,
    kb: &KnowledgeBase,
    src: &ResourceId,
    target: &ResourceId,
    id: &ResourceId,
    result: &SolutionGraph,
    undirected: &UndirectedGraph,
) -> i64 {
    let ctx = DynamicContext::new(sol, kb);
    let mut weight = 0;
    let near = |anchor: &ResourceId, dir: Direction| {
        if ctx.layered(anchor, dir, DependencyLayer::Direct).contains(id) {
            10
        } else if ctx.layered(anchor, dir, DependencyLayer::Glue).contains(id) {
            5
        } else {
            0
        }
    };
    weight += near(src, Direction::Downstream);
    weight += near(target, Direction::Upstream);

    if result.contains(id) {
        weight += 9;
    }

    let mut available: i64 = 10;
    match undirected.shortest_path(id, src) {
        Some(path) => {
            for res in &path {
                available -= if kb.is_functional(res) { 2 } else { 1 };
            }
        }
        None => available = -5,
    }
    match undirected.shortest_path(id, target) {
        Some(path) => {
            available -= path.iter().filter(|r| kb.is_functional(r)).count() as i64;
        }
        None => available = -5,
    }
    if available < 0 {
        available = 2;
    }
    weight + available
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Resource;

    const KB: &str = r#"
resources:
  - qualified_type_name: p:fn
    classification:
      is: [compute]
  - qualified_type_name: p:sg
  - qualified_type_name: p:subnet
  - qualified_type_name: p:db
    classification:
      is: [storage]
"#;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn setup() -> (SolutionGraph, KnowledgeBase) {
        // fn -> sg -> subnet <- db, plus a lone subnet
        let mut sol = SolutionGraph::new();
        for n in ["p:fn:f", "p:sg:s", "p:subnet:near", "p:subnet:lone", "p:db:d"] {
            sol.add_vertex(Resource::new(id(n))).unwrap();
        }
        sol.add_edge(&id("p:fn:f"), &id("p:sg:s")).unwrap();
        sol.add_edge(&id("p:sg:s"), &id("p:subnet:near")).unwrap();
        sol.add_edge(&id("p:db:d"), &id("p:subnet:near")).unwrap();
        (sol, KnowledgeBase::from_yaml(KB).unwrap())
    }

    #[test]
    fn test_ig043_direct_and_reused_beats_unrelated() {
        let (sol, kb) = setup();
        let und = UndirectedGraph::build(&sol, &kb);
        let mut result = SolutionGraph::new();
        result.add_vertex(Resource::new(id("p:sg:s"))).unwrap();

        let src = id("p:fn:f");
        let tgt = id("p:db:d");
        let close = determine_candidate_weight(&sol, &kb, &src, &tgt, &id("p:sg:s"), &result, &und);
        let lone = determine_candidate_weight(&sol, &kb, &src, &tgt, &id("p:subnet:lone"), &result, &und);
        assert!(close > lone);
        // unreachable candidates still keep the minimum proximity score
        assert_eq!(lone, 2);
    }

    #[test]
    fn test_ig043_undirected_prefers_glue_hops() {
        let (sol, kb) = setup();
        let und = UndirectedGraph::build(&sol, &kb);
        let path = und.shortest_path(&id("p:subnet:near"), &id("p:fn:f")).unwrap();
        assert_eq!(path, vec![id("p:subnet:near"), id("p:sg:s"), id("p:fn:f")]);
        assert!(und.shortest_path(&id("p:subnet:lone"), &id("p:fn:f")).is_none());
    }
}
