//! IG-045: Expanding an abstract edge into concrete resources.
//!
//! Every candidate path in the scratch graph gets real resources from the
//! solution offered as alternatives to its phantom hops. The cheapest path
//! wins; its phantoms are named and handed back as new resources.

use super::candidate_validity::{check_candidates_validity, check_namespace_validity, matches_non_boundary};
use super::candidate_weight::{determine_candidate_weight, UndirectedGraph};
use super::{calculate_edge_weight, is_phantom, TempGraph};
use crate::core::graph::SolutionGraph;
use crate::core::types::{ResourceId, SimpleEdge};
use crate::engine::Error;
use crate::kb::KnowledgeBase;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Divisor that marks a candidate as failing its validity checks.
const INVALID_CANDIDATE: i64 = -1000;
const MAX_NAME_SUFFIX: usize = 1000;

#[derive(Debug, Clone)]
pub struct ExpansionInput {
    pub edge: SimpleEdge,
    pub classification: String,
    pub temp_graph: TempGraph,
}

#[derive(Debug, Default)]
pub struct ExpansionResult {
    /// The chosen path as resources and edges
    pub graph: SolutionGraph,
    /// Edges inside the chosen path that need their own expansion
    pub edges: Vec<SimpleEdge>,
    /// The chosen path, source first
    pub path: Vec<ResourceId>,
}

pub fn expand_edge(
    sol: &SolutionGraph,
    kb: &KnowledgeBase,
    input: &mut ExpansionInput,
) -> Result<ExpansionResult, Error> {
    let mut result = ExpansionResult::default();
    let undirected = UndirectedGraph::build(sol, kb);
    let dep = input.edge.clone();
    let fail = |message: String| Error::PathSelection {
        edge: dep.clone(),
        message,
    };

    let paths = input.temp_graph.all_paths(&dep.source, &dep.target);
    let mut errs = Vec::new();
    for path in &paths {
        if let Err(e) = expand_path(sol, kb, input, path, &result.graph, &undirected) {
            errs.push(fail(format!("error expanding path {}: {}", display_path(path), e)));
        }
    }
    Error::join(errs)?;

    let path = input
        .temp_graph
        .shortest_path(&dep.source, &dep.target)
        .ok_or_else(|| {
            fail(format!(
                "could not find shortest path between {} and {}",
                dep.source, dep.target
            ))
        })?;

    let chosen = rename_and_replace(sol, input, &mut result.graph, &path).map_err(fail)?;
    result.edges = find_sub_expansions(kb, &chosen).map_err(fail)?;
    result.path = chosen;
    Ok(result)
}

pub(crate) fn display_path(path: &[ResourceId]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Offer existing resources as alternatives for each interior hop of
/// `path` and wire them into the scratch graph with weights.
fn expand_path(
    sol: &SolutionGraph,
    kb: &KnowledgeBase,
    input: &mut ExpansionInput,
    path: &[ResourceId],
    result: &SolutionGraph,
    undirected: &UndirectedGraph,
) -> Result<(), String> {
    if path.len() == 2 {
        return Ok(());
    }
    debug!("Resolving path {}", display_path(path));
    let dep = input.edge.clone();
    let classification = input.classification.clone();
    let interior = &path[1..path.len() - 1];

    let mut candidates: Vec<BTreeMap<ResourceId, i64>> = Vec::with_capacity(interior.len());
    for (i, node) in interior.iter().enumerate() {
        if !input.temp_graph.contains(node) {
            return Err(format!("path[{}] {} missing from path selection graph", i, node));
        }
        let valid = check_candidates_validity(sol, kb, node, path, &classification);
        candidates.push(BTreeMap::from([(
            node.clone(),
            if valid { 0 } else { INVALID_CANDIDATE },
        )]));
    }

    // resources already chosen for this expansion first, then the rest of
    // the solution
    let mut seen = BTreeSet::new();
    let existing = result.resources().chain(sol.resources());
    for res in existing {
        if !seen.insert(res.id.clone()) {
            continue;
        }
        let Some(idx) = matches_non_boundary(&res.id, path) else {
            continue;
        };
        if !check_namespace_validity(kb, res, &dep.target)
            .map_err(|e| format!("error checking namespace validity of {}: {}", res.id, e))?
        {
            continue;
        }
        input.temp_graph.add_vertex(res.clone());
        let mut weight = determine_candidate_weight(
            sol,
            kb,
            &dep.source,
            &dep.target,
            &res.id,
            result,
            undirected,
        );
        if !check_candidates_validity(sol, kb, &res.id, path, &classification) {
            weight = INVALID_CANDIDATE;
        }
        *candidates[idx - 1].entry(res.id.clone()).or_insert(0) += weight;
    }

    let mut errs = Vec::new();
    let mut add_edge = |temp: &mut TempGraph, source: (&ResourceId, i64), target: (&ResourceId, i64)| {
        let weight = calculate_edge_weight(
            &dep,
            source.0,
            target.0,
            source.1,
            target.1,
            &classification,
            kb,
        );
        if kb.get_edge_template(source.0, target.0).is_none() {
            errs.push(format!("could not find edge template for {} -> {}", source.0, target.0));
            return;
        }
        if let Err(e) = temp.add_edge(source.0, target.0, weight) {
            // candidates that would close a loop are simply not offered
            debug!("Skipping candidate edge: {}", e);
        }
    };

    for i in 0..candidates.len() {
        for (id, &w) in &candidates[i] {
            if i == 0 {
                add_edge(&mut input.temp_graph, (&dep.source, 0), (id, w));
                continue;
            }
            for (prev, &pw) in &candidates[i - 1] {
                add_edge(&mut input.temp_graph, (prev, pw), (id, w));
            }
        }
    }
    if let Some(last) = candidates.last() {
        for (id, &w) in last {
            add_edge(&mut input.temp_graph, (id, w), (&dep.target, 0));
        }
    }
    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs.join("; "))
    }
}

/// Name the phantoms on the chosen path, copy it into `result`, and swap the
/// phantoms in the scratch graph for their final resources so that
/// sub-expansions reuse them.
fn rename_and_replace(
    sol: &SolutionGraph,
    input: &mut ExpansionInput,
    result: &mut SolutionGraph,
    path: &[ResourceId],
) -> Result<Vec<ResourceId>, String> {
    let base = format!("{}-{}", input.edge.source.name, input.edge.target.name);
    let mut chosen: Vec<ResourceId> = Vec::with_capacity(path.len());
    let mut errs = Vec::new();

    for (i, id) in path.iter().enumerate() {
        let Some(mut res) = input.temp_graph.vertex(id).cloned() else {
            errs.push(format!("{} missing from path selection graph", id));
            continue;
        };
        if is_phantom(id) {
            // namespaced resources are not known to be namespaced yet, so
            // names are compared across the whole type
            let selector = id.selector();
            let taken: BTreeSet<&str> = sol
                .ids()
                .chain(result.ids())
                .filter(|other| selector.matches(other))
                .map(|other| other.name.as_str())
                .collect();
            let mut new_id = id.clone();
            new_id.name = base.clone();
            let mut suffix = 0;
            while taken.contains(new_id.name.as_str()) && suffix < MAX_NAME_SUFFIX {
                new_id.name = format!("{}-{}", base, suffix);
                suffix += 1;
            }
            res.id = new_id;
        }
        let res_id = res.id.clone();
        if !result.contains(&res_id) {
            result.add_vertex(res)?;
        }
        if let Some(prev) = chosen.last() {
            if let Err(e) = result.add_edge(prev, &res_id) {
                errs.push(format!("error adding edge for path[{}]: {}", i, e));
            }
        }
        chosen.push(res_id);
    }

    for (old, new) in path.iter().zip(&chosen) {
        if let Some(res) = result.vertex(new) {
            if let Err(e) = input.temp_graph.replace(old, res.clone()) {
                errs.push(e);
            }
        }
    }
    if errs.is_empty() {
        Ok(chosen)
    } else {
        Err(errs.join("; "))
    }
}

/// Interior resources with their own path-satisfaction routes need paths to
/// the far resources that accept them (or the path's end).
fn find_sub_expansions(kb: &KnowledgeBase, chosen: &[ResourceId]) -> Result<Vec<SimpleEdge>, String> {
    let mut edges = Vec::new();
    let mut added = BTreeSet::new();
    let mut push = |s: &ResourceId, t: &ResourceId, edges: &mut Vec<SimpleEdge>| {
        if added.insert((s.clone(), t.clone())) {
            edges.push(SimpleEdge::new(s.clone(), t.clone()));
        }
    };
    let last = chosen.len().saturating_sub(1);
    for i in 1..last {
        let res = &chosen[i];
        let tmpl = kb.get_resource_template(res)?;
        if !tmpl.path_satisfaction.as_source.is_empty() {
            for (j, target) in chosen.iter().enumerate().skip(i + 2) {
                let t = kb.get_resource_template(target)?;
                if !t.path_satisfaction.as_target.is_empty() || j == last {
                    push(res, target, &mut edges);
                }
            }
        }
        if !tmpl.path_satisfaction.as_target.is_empty() && i >= 2 {
            for j in (0..=i - 2).rev() {
                let source = &chosen[j];
                let s = kb.get_resource_template(source)?;
                if !s.path_satisfaction.as_source.is_empty() || j == 0 {
                    push(source, res, &mut edges);
                }
            }
        }
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Resource;
    use crate::engine::path_selection::build_path_selection_graph;
    use crate::kb::tests::NETWORK_KB;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn input(kb: &KnowledgeBase, s: &str, t: &str) -> ExpansionInput {
        let edge = SimpleEdge::new(id(s), id(t));
        let temp_graph = build_path_selection_graph(&edge, kb, "network", false).unwrap();
        ExpansionInput {
            edge,
            classification: "network".into(),
            temp_graph,
        }
    }

    fn solution(ids: &[&str]) -> SolutionGraph {
        let mut sol = SolutionGraph::new();
        for n in ids {
            sol.add_vertex(Resource::new(id(n))).unwrap();
        }
        sol
    }

    #[test]
    fn test_ig045_phantom_named_after_endpoints() {
        let kb = KnowledgeBase::from_yaml(NETWORK_KB).unwrap();
        let sol = solution(&["p:a:src", "p:c:dst"]);
        let mut inp = input(&kb, "p:a:src", "p:c:dst");
        let res = expand_edge(&sol, &kb, &mut inp).unwrap();
        assert_eq!(res.graph.len(), 3);
        assert!(res.graph.has_edge(&id("p:a:src"), &id("p:b:src-dst")));
        assert!(res.graph.has_edge(&id("p:b:src-dst"), &id("p:c:dst")));
        // the scratch graph now holds the named resource
        assert!(inp.temp_graph.contains(&id("p:b:src-dst")));
        assert!(!inp.temp_graph.contains(&id("p:b:phantom$0")));
        assert!(res.edges.is_empty());
    }

    #[test]
    fn test_ig045_existing_resource_reused() {
        let kb = KnowledgeBase::from_yaml(NETWORK_KB).unwrap();
        let mut sol = solution(&["p:a:src", "p:b:shared", "p:c:dst"]);
        sol.add_edge(&id("p:a:src"), &id("p:b:shared")).unwrap();
        let mut inp = input(&kb, "p:a:src", "p:c:dst");
        let res = expand_edge(&sol, &kb, &mut inp).unwrap();
        assert!(res.graph.contains(&id("p:b:shared")));
        assert_eq!(res.graph.len(), 3);
    }

    #[test]
    fn test_ig045_sub_expansions_for_routed_interior() {
        let yaml = r#"
resources:
  - qualified_type_name: p:a
  - qualified_type_name: p:b
    path_satisfaction:
      as_source: [network]
  - qualified_type_name: p:c
  - qualified_type_name: p:d
"#;
        let kb = KnowledgeBase::from_yaml(yaml).unwrap();
        let chosen = [id("p:a:a"), id("p:b:b"), id("p:c:c"), id("p:d:d")];
        let edges = find_sub_expansions(&kb, &chosen).unwrap();
        assert_eq!(edges, vec![SimpleEdge::new(id("p:b:b"), id("p:d:d"))]);
    }
}
