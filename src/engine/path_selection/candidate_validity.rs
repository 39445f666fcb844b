//! IG-044: Validity checks for path candidates.
//!
//! Invalid candidates are not rejected outright; expansion turns a failed
//! check into a heavy weight penalty so a valid route wins when one exists.

use super::paths::resources_from_property_reference;
use crate::core::graph::{DependencyLayer, Direction, SolutionGraph};
use crate::core::types::{Resource, ResourceId};
use crate::kb::templates::PathSatisfactionRoute;
use crate::kb::KnowledgeBase;
use crate::rules::DynamicContext;
use tracing::debug;

/// Validity operation: the checked resource must reach the other end within
/// its first-functional downstream layer.
pub const DOWNSTREAM_OPERATION: &str = "downstream";

/// Index of the first interior hop of `path` whose type (and namespace, if
/// set) matches `id`.
pub fn matches_non_boundary(id: &ResourceId, path: &[ResourceId]) -> Option<usize> {
    if path.len() < 3 {
        return None;
    }
    path[1..path.len() - 1]
        .iter()
        .position(|node| {
            let mut typed = node.selector();
            typed.namespace = node.namespace.clone();
            typed.matches(id)
        })
        .map(|i| i + 1)
}

/// Check `resource` as a stand-in for its interior hop on `path`. Paths of
/// three or fewer nodes are always valid.
pub fn check_candidates_validity(
    sol: &SolutionGraph,
    kb: &KnowledgeBase,
    resource: &ResourceId,
    path: &[ResourceId],
    classification: &str,
) -> bool {
    if path.len() <= 3 {
        return true;
    }
    let Some(idx) = matches_non_boundary(resource, path) else {
        return false;
    };
    let Ok(tmpl) = kb.get_resource_template(resource) else {
        return true;
    };
    let routes = |rs: &[PathSatisfactionRoute]| -> Vec<PathSatisfactionRoute> {
        rs.iter()
            .filter(|r| r.classification == classification && !r.validity.is_empty())
            .cloned()
            .collect()
    };

    // as a target, the resources it refers to must be reachable from the
    // path's start
    for route in routes(&tmpl.path_satisfaction.as_target) {
        for res in route_resources(sol, resource, &route) {
            if !check_validity_operation(sol, kb, &path[0], &res, &route) {
                return false;
            }
        }
    }
    if idx <= path.len() - 2 {
        let end = &path[path.len() - 1];
        for route in routes(&tmpl.path_satisfaction.as_source) {
            for res in route_resources(sol, resource, &route) {
                if !check_validity_operation(sol, kb, &res, end, &route) {
                    return false;
                }
            }
        }
    }
    true
}

fn route_resources(
    sol: &SolutionGraph,
    resource: &ResourceId,
    route: &PathSatisfactionRoute,
) -> Vec<ResourceId> {
    if !route.property_reference_changes_boundary() {
        return vec![resource.clone()];
    }
    // an unset reference leaves nothing to contradict the path
    match resources_from_property_reference(sol, resource, &route.property_reference) {
        Ok(ids) => ids,
        Err(e) => {
            debug!("Skipping validity of {} through {}: {}", resource, route, e);
            Vec::new()
        }
    }
}

/// Unknown validity operations always pass.
pub fn check_validity_operation(
    sol: &SolutionGraph,
    kb: &KnowledgeBase,
    src: &ResourceId,
    target: &ResourceId,
    route: &PathSatisfactionRoute,
) -> bool {
    match route.validity.as_str() {
        DOWNSTREAM_OPERATION => DynamicContext::new(sol, kb)
            .layered(src, Direction::Downstream, DependencyLayer::FirstFunctional)
            .contains(target),
        _ => true,
    }
}

/// A candidate that could be namespaced into the target's type must already
/// live in the target (or not be namespaced yet).
pub fn check_namespace_validity(
    kb: &KnowledgeBase,
    resource: &Resource,
    target: &ResourceId,
) -> Result<bool, String> {
    for allowed in kb.get_allowed_namespaced_resource_ids(&resource.id)? {
        if !allowed.matches(target) {
            continue;
        }
        if let Some(ns) = kb.get_resources_namespace_resource(resource)? {
            if !ns.matches(target) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
