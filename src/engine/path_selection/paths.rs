//! IG-042: Type-level path filtering and expansion inputs.

use crate::core::graph::SolutionGraph;
use crate::core::types::{ResourceId, SimpleEdge};
use crate::engine::Error;
use crate::kb::templates::EdgePathSatisfaction;
use crate::kb::KnowledgeBase;
use serde_json::Value;

/// Simple paths between two types that can carry `classification`. Paths
/// through an edge marked direct-edge-only are dropped unless that edge is
/// the whole path.
pub fn class_paths(
    kb: &KnowledgeBase,
    from: &ResourceId,
    to: &ResourceId,
    classification: &str,
) -> Result<Vec<Vec<ResourceId>>, String> {
    let mut out = Vec::new();
    for path in kb.all_paths(from, to)? {
        let ids = path
            .iter()
            .map(|t| t.id())
            .collect::<Result<Vec<ResourceId>, String>>()?;
        let direct_only_hop = ids.len() > 2
            && ids.windows(2).any(|w| {
                kb.get_edge_template(&w[0], &w[1])
                    .is_some_and(|et| et.direct_edge_only)
            });
        if direct_only_hop || !path_satisfies_classification(kb, &ids, classification) {
            continue;
        }
        out.push(ids);
    }
    Ok(out)
}

/// The classification must be provided by some resource template or edge
/// template on the path, and no resource on it may deny it.
pub fn path_satisfies_classification(
    kb: &KnowledgeBase,
    path: &[ResourceId],
    classification: &str,
) -> bool {
    if contains_unnecessary_hops(path, kb) {
        return false;
    }
    if classification.is_empty() {
        return true;
    }
    let mut met = false;
    for (i, res) in path.iter().enumerate() {
        let Ok(tmpl) = kb.get_resource_template(res) else {
            return false;
        };
        if tmpl
            .path_satisfaction
            .deny_classifications
            .iter()
            .any(|c| c == classification)
        {
            return false;
        }
        if tmpl.has_classification(classification) {
            met = true;
        }
        if i > 0 {
            if let Some(et) = kb.get_edge_template(&path[i - 1], res) {
                if et.classification.iter().any(|c| c == classification) {
                    met = true;
                }
            }
        }
    }
    met
}

/// An interior hop that is itself functional (or unknown to the knowledge
/// base) is never a valid detour.
pub fn contains_unnecessary_hops(path: &[ResourceId], kb: &KnowledgeBase) -> bool {
    if path.len() <= 2 {
        return false;
    }
    path[1..path.len() - 1].iter().any(|res| {
        kb.get_resource_template(res)
            .map_or(true, |t| t.is_functional())
    })
}

/// Follow a `#`-separated chain of resource-valued properties from `start`.
/// Fails when a link is missing.
pub fn resources_from_property_reference(
    sol: &SolutionGraph,
    start: &ResourceId,
    reference: &str,
) -> Result<Vec<ResourceId>, String> {
    let mut current = vec![start.clone()];
    for part in reference.split('#').filter(|p| !p.is_empty()) {
        let mut next = Vec::new();
        for id in &current {
            let res = sol
                .vertex(id)
                .ok_or_else(|| format!("resource {} not found", id))?;
            let value = res
                .get_property(part)
                .ok_or_else(|| format!("property {} is not set on {}", part, id))?;
            next.extend(ids_in(value)?);
        }
        current = next;
    }
    Ok(current)
}

fn ids_in(value: &Value) -> Result<Vec<ResourceId>, String> {
    match value {
        Value::String(s) => Ok(vec![ResourceId::parse(s)?]),
        Value::Array(items) => items.iter().flat_map(|v| v.as_str()).map(ResourceId::parse).collect(),
        other => Err(format!("{} is not a resource reference", other)),
    }
}

/// The concrete edges a satisfaction applies to. Routes with a property
/// reference move that endpoint to the resources the chain points at.
pub fn determine_path_satisfaction_inputs(
    sol: &SolutionGraph,
    satisfaction: &EdgePathSatisfaction,
    edge: &SimpleEdge,
) -> Result<Vec<SimpleEdge>, Error> {
    let mut errs = Vec::new();
    let mut endpoints = |id: &ResourceId, reference: &str, changes: bool| {
        if !changes {
            return vec![id.clone()];
        }
        match resources_from_property_reference(sol, id, reference) {
            Ok(ids) => ids,
            Err(e) => {
                errs.push(Error::PathSelection {
                    edge: edge.clone(),
                    message: format!("could not resolve {}#{}: {}", id, reference, e),
                });
                Vec::new()
            }
        }
    };
    let sources = endpoints(
        &edge.source,
        &satisfaction.source.property_reference,
        satisfaction.source.property_reference_changes_boundary(),
    );
    let targets = endpoints(
        &edge.target,
        &satisfaction.target.property_reference,
        satisfaction.target.property_reference_changes_boundary(),
    );

    let mut inputs = Vec::new();
    for s in &sources {
        for t in &targets {
            if s == t {
                continue;
            }
            for end in [s, t] {
                if !sol.contains(end) {
                    errs.push(Error::MissingResource(end.clone()));
                }
            }
            inputs.push(SimpleEdge::new(s.clone(), t.clone()));
        }
    }
    Error::join(errs)?;
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Resource;
    use crate::kb::templates::PathSatisfactionRoute;
    use crate::kb::tests::NETWORK_KB;
    use serde_json::json;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn test_ig042_class_paths_network() {
        let kb = KnowledgeBase::from_yaml(NETWORK_KB).unwrap();
        let paths = class_paths(&kb, &id("p:a"), &id("p:c"), "network").unwrap();
        assert_eq!(paths, vec![vec![id("p:a"), id("p:b"), id("p:c")]]);
        // no template provides "queue"
        assert!(class_paths(&kb, &id("p:a"), &id("p:c"), "queue").unwrap().is_empty());
    }

    #[test]
    fn test_ig042_unnecessary_hops() {
        let kb = KnowledgeBase::from_yaml(NETWORK_KB).unwrap();
        assert!(!contains_unnecessary_hops(&[id("p:a:x"), id("p:c:y")], &kb));
        // p:c is storage, a functional interior hop
        assert!(contains_unnecessary_hops(
            &[id("p:b:x"), id("p:c:y"), id("p:a:z")],
            &kb
        ));
        assert!(!contains_unnecessary_hops(
            &[id("p:a:x"), id("p:b:y"), id("p:c:z")],
            &kb
        ));
        // unknown interior types count as unnecessary
        assert!(contains_unnecessary_hops(
            &[id("p:a:x"), id("p:q:y"), id("p:c:z")],
            &kb
        ));
    }

    #[test]
    fn test_ig042_deny_classification() {
        let yaml = r#"
resources:
  - qualified_type_name: p:a
  - qualified_type_name: p:b
    path_satisfaction:
      deny_classifications: [network]
edges:
  - source: p:a
    target: p:b
    classification: [network]
"#;
        let kb = KnowledgeBase::from_yaml(yaml).unwrap();
        assert!(!path_satisfies_classification(&kb, &[id("p:a:x"), id("p:b:y")], "network"));
        assert!(path_satisfies_classification(&kb, &[id("p:a:x"), id("p:b:y")], ""));
    }

    #[test]
    fn test_ig042_inputs_follow_property_reference() {
        let mut sol = SolutionGraph::new();
        let mut src = Resource::new(id("p:fn:f"));
        src.properties = json!({"Subnets": ["p:subnet:a", "p:subnet:b"]});
        sol.add_vertex(src).unwrap();
        for n in ["p:subnet:a", "p:subnet:b", "p:db:d"] {
            sol.add_vertex(Resource::new(id(n))).unwrap();
        }
        let sat = EdgePathSatisfaction {
            classification: "network".into(),
            source: PathSatisfactionRoute::parse("network#Subnets"),
            target: PathSatisfactionRoute::parse("network"),
        };
        let edge = SimpleEdge::new(id("p:fn:f"), id("p:db:d"));
        let inputs = determine_path_satisfaction_inputs(&sol, &sat, &edge).unwrap();
        assert_eq!(
            inputs,
            vec![
                SimpleEdge::new(id("p:subnet:a"), id("p:db:d")),
                SimpleEdge::new(id("p:subnet:b"), id("p:db:d")),
            ]
        );

        let unset = SimpleEdge::new(id("p:subnet:a"), id("p:db:d"));
        let sat = EdgePathSatisfaction {
            source: PathSatisfactionRoute::parse("network#Vpc"),
            ..sat
        };
        assert!(determine_path_satisfaction_inputs(&sol, &sat, &unset).is_err());
    }
}
