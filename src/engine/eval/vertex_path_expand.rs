//! IG-038: Path expansion vertices.
//!
//! Turn an abstract dependency into concrete resources: select a path,
//! add what it needs to the solution, and queue expansions for the hops
//! that still need one.

use super::capture::DependencyCapture;
use super::vertex::{GraphChanges, Key, Vertex};
use super::Evaluator;
use crate::core::graph::Direction;
use crate::core::types::{PropertyRef, ResourceId, SimpleEdge};
use crate::engine::operational_rule::referenced_ids;
use crate::engine::path_selection::expansion::display_path;
use crate::engine::path_selection::paths::determine_path_satisfaction_inputs;
use crate::engine::path_selection::{
    build_path_selection_graph, expand_edge, ExpansionInput, ExpansionResult, TempGraph,
};
use crate::engine::view::OperationalView;
use crate::engine::{Decision, Error};
use crate::kb::templates::EdgePathSatisfaction;
use crate::rules::template::{self, TemplateData};
use crate::rules::DynamicContext;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PathExpandVertex {
    pub edge: SimpleEdge,
    pub satisfaction: EdgePathSatisfaction,
    /// Scratch graph built when the vertex was created; reused when the
    /// expansion runs on the same edge.
    pub temp_graph: Option<TempGraph>,
}

impl PathExpandVertex {
    pub fn new(edge: SimpleEdge, satisfaction: EdgePathSatisfaction, temp_graph: Option<TempGraph>) -> Self {
        PathExpandVertex {
            edge,
            satisfaction,
            temp_graph,
        }
    }

    pub fn key(&self) -> Key {
        Key::PathExpand {
            edge: self.edge.clone(),
            satisfaction: self.satisfaction.clone(),
        }
    }

    pub fn update_from(&mut self, other: PathExpandVertex) {
        if self.key() != other.key() {
            panic!("cannot merge expansions {} and {}", self.key(), other.key());
        }
        if other.temp_graph.is_some() {
            self.temp_graph = other.temp_graph;
        }
    }

    pub fn dependencies(&mut self, eval: &Evaluator, cap: &mut DependencyCapture) -> Result<(), Error> {
        let routes = [
            (&self.edge.source, &self.satisfaction.source.property_reference),
            (&self.edge.target, &self.satisfaction.target.property_reference),
        ];
        for (res, reference) in routes {
            for key in property_ref_deps(eval, res, reference) {
                cap.add_dependency(key);
            }
        }

        let Some(temp) = &self.temp_graph else {
            return Ok(());
        };
        self.add_deps_from_props(eval, cap, &self.edge.source, temp.reachable(&self.edge.source, petgraph::Direction::Outgoing));
        self.add_deps_from_props(eval, cap, &self.edge.target, temp.reachable(&self.edge.target, petgraph::Direction::Incoming));
        for edge in temp.edges() {
            self.add_deps_from_edge(eval, cap, &edge);
        }
        Ok(())
    }

    /// Properties of `res` filled by operational steps may end up pointing
    /// at any resource on a candidate path, so the expansion waits for them.
    fn add_deps_from_props(
        &self,
        eval: &Evaluator,
        cap: &mut DependencyCapture,
        res: &ResourceId,
        candidates: Vec<ResourceId>,
    ) {
        let Ok(tmpl) = eval.kb.get_resource_template(res) else {
            return;
        };
        let data = TemplateData::for_resource(res);
        for prop in tmpl.properties.values() {
            let Some(rule) = &prop.operational_rule else {
                continue;
            };
            if prop.property_type.resource_selector().is_none() {
                continue;
            }
            let mut ctx = DynamicContext::new(&eval.solution, &eval.kb);
            if !template::execute_condition(&mut ctx, rule.if_cond.as_deref(), &data).unwrap_or(false) {
                continue;
            }
            for dep in &candidates {
                if dep == &self.edge.source || dep == &self.edge.target {
                    continue;
                }
                if prop
                    .property_type
                    .parse_value(&serde_json::Value::String(dep.to_string()))
                    .is_ok()
                {
                    cap.add_dependency(Key::Property(PropertyRef::new(res.clone(), &prop.path)));
                    break;
                }
            }
        }
    }

    /// A candidate edge's configuration rules may write properties on
    /// existing resources; those properties must wait for this expansion.
    fn add_deps_from_edge(&self, eval: &Evaluator, cap: &mut DependencyCapture, edge: &SimpleEdge) {
        let Some(tmpl) = eval.kb.get_edge_template(&edge.source, &edge.target) else {
            return;
        };
        let selectors = SimpleEdge::new(edge.source.selector(), edge.target.selector());
        let data = TemplateData::for_edge(&selectors);
        let mut ctx = DynamicContext::new(&eval.solution, &eval.kb);
        let me = self.key();
        for rule in &tmpl.operational_rules {
            for config in &rule.configuration_rules {
                let resource = match template::execute_decode_id(&mut ctx, &config.resource, &data) {
                    Ok(r) if !r.is_zero() => r,
                    _ => continue,
                };
                let Ok(field) = template::execute(&mut ctx, &config.configuration.field, &data)
                    .map(|v| template::render(&v))
                else {
                    continue;
                };
                for res in eval.solution.resources() {
                    if !resource.matches(&res.id) {
                        continue;
                    }
                    let has_field = eval
                        .kb
                        .get_resource_template(&res.id)
                        .is_ok_and(|t| t.get_property(&field).is_some());
                    if !has_field {
                        continue;
                    }
                    let key = Key::Property(PropertyRef::new(res.id.clone(), &field));
                    debug!(
                        "Adding speculative dependency {} -> {} (matches {} from {})",
                        key, me, resource, edge
                    );
                    cap.changes_mut().add_edge(key, me.clone());
                }
            }
        }
    }

    pub fn evaluate(&self, eval: &mut Evaluator) -> Result<(), Error> {
        let edge = SimpleEdge::new(
            eval.current_id(&self.edge.source),
            eval.current_id(&self.edge.target),
        );
        let imported = |id: &ResourceId| {
            eval.solution
                .vertex(id)
                .map(|r| r.imported)
                .ok_or_else(|| Error::MissingResource(id.clone()))
        };
        let source_imported = imported(&edge.source)?;
        let target_imported = imported(&edge.target)?;
        if source_imported && target_imported {
            eval.solution
                .add_edge(&edge.source, &edge.target)
                .map_err(Error::Graph)?;
            return Ok(());
        }

        let inputs = determine_path_satisfaction_inputs(&eval.solution, &self.satisfaction, &edge)?;
        let full_build = source_imported || target_imported;
        let mut errs = Vec::new();
        for input in inputs {
            if let Err(e) = self.expand(eval, &edge, &input, full_build) {
                errs.push(Error::Config(format!(
                    "could not run expansion {} -> {} <{}>: {}",
                    input.source, input.target, self.satisfaction.classification, e
                )));
            }
        }
        Error::join(errs)
    }

    fn expand(
        &self,
        eval: &mut Evaluator,
        edge: &SimpleEdge,
        input_edge: &SimpleEdge,
        full_build: bool,
    ) -> Result<(), Error> {
        let kb = Arc::clone(&eval.kb);
        let class = &self.satisfaction.classification;
        let temp_graph = match &self.temp_graph {
            Some(t) if !full_build && input_edge == edge => t.clone(),
            _ => build_path_selection_graph(input_edge, &kb, class, full_build)?,
        };
        let mut input = ExpansionInput {
            edge: input_edge.clone(),
            classification: class.clone(),
            temp_graph,
        };
        let result = expand_edge(&eval.solution, &kb, &mut input)?;
        if class.is_empty() {
            info!(
                "Satisfied {} -> {} through {}",
                input_edge.source,
                input_edge.target,
                display_path(&result.path)
            );
        } else {
            info!("Satisfied {} for {} through {}", class, input_edge, display_path(&result.path));
        }

        let mut errs = Vec::new();
        if let Err(e) = add_resources_and_edges(eval, &result, input_edge) {
            errs.push(e);
        }
        if let Err(e) = self.add_sub_expansions(eval, &result, &input) {
            errs.push(e);
        }
        let source = eval.current_id(&input_edge.source);
        let target = eval.current_id(&input_edge.target);
        if let Err(e) = eval.consume(&source, &target) {
            errs.push(e);
        }
        if let Err(e) = handle_result_properties(eval, &result) {
            errs.push(e);
        }
        Error::join(errs)
    }

    fn add_sub_expansions(
        &self,
        eval: &mut Evaluator,
        result: &ExpansionResult,
        input: &ExpansionInput,
    ) -> Result<(), Error> {
        let mut changes = GraphChanges::new();
        for edge in &result.edges {
            let v = PathExpandVertex::new(
                edge.clone(),
                EdgePathSatisfaction {
                    classification: input.classification.clone(),
                    ..Default::default()
                },
                Some(input.temp_graph.clone()),
            );
            changes.add_vertex_and_deps(eval, Vertex::PathExpand(v))?;
        }
        eval.enqueue(changes)
    }
}

/// Keys for every property followed by a route's property reference, as far
/// as the chain currently resolves.
fn property_ref_deps(eval: &Evaluator, res: &ResourceId, reference: &str) -> Vec<Key> {
    let mut keys = Vec::new();
    let mut current = vec![res.clone()];
    for part in reference.split('#').filter(|p| !p.is_empty()) {
        let mut next = Vec::new();
        for id in &current {
            keys.push(Key::Property(PropertyRef::new(id.clone(), part)));
            if let Some(v) = eval.solution.vertex(id).and_then(|r| r.get_property(part)) {
                next.extend(referenced_ids(v));
            }
        }
        current = next;
    }
    keys
}

fn add_resources_and_edges(
    eval: &mut Evaluator,
    result: &ExpansionResult,
    edge: &SimpleEdge,
) -> Result<(), Error> {
    if result.graph.len() > 2 && eval.solution.has_edge(&edge.source, &edge.target) {
        eval.remove_dependency(&edge.source, &edge.target)?;
    }

    let mut resources = Vec::new();
    for res in result.graph.resources() {
        if eval.solution.contains(&res.id) {
            continue;
        }
        eval.solution.add_vertex(res.clone()).map_err(Error::Graph)?;
        eval.record(Decision::AddResource {
            resource: res.id.clone(),
        });
        resources.push(res.id.clone());
    }
    let mut edges = Vec::new();
    for e in result.graph.edges() {
        if eval.solution.has_edge(&e.source, &e.target) {
            continue;
        }
        eval.solution
            .add_edge(&e.source, &e.target)
            .map_err(Error::Graph)?;
        eval.record(Decision::AddDependency { edge: e.clone() });
        edges.push(e);
    }
    eval.add_resources(&resources)?;
    eval.add_edges(&edges)
}

/// Fill step-driven properties of the path's resources with their
/// neighbours on the path.
fn handle_result_properties(eval: &mut Evaluator, result: &ExpansionResult) -> Result<(), Error> {
    let kb = Arc::clone(&eval.kb);
    let mut errs = Vec::new();
    for res in result.graph.resources() {
        let mut id = eval.current_id(&res.id);
        if eval.solution.vertex(&id).map_or(true, |r| r.imported) {
            continue;
        }
        let Ok(tmpl) = kb.get_resource_template(&id) else {
            continue;
        };
        for prop in tmpl.properties.values() {
            let Some(step) = prop.operational_rule.as_ref().and_then(|r| r.step.as_ref()) else {
                continue;
            };
            let neighbours: Vec<ResourceId> = match step.direction {
                Direction::Downstream => result.graph.successors(&res.id).cloned().collect(),
                Direction::Upstream => result.graph.predecessors(&res.id).cloned().collect(),
            };
            for n in neighbours {
                let n = eval.current_id(&n);
                let data = TemplateData::for_resource(&id);
                let mut usable = false;
                for sel in &step.resources {
                    match eval.can_use(sel, &data, &n) {
                        Ok(true) => {
                            usable = true;
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => debug!("cannot check {} for {}#{}: {}", n, id, prop.path, e),
                    }
                }
                if !usable {
                    continue;
                }
                match eval.set_field(&id, &prop.path, prop, &n, step.direction) {
                    Ok(new_id) => id = new_id,
                    Err(e) => errs.push(e),
                }
                if !prop.property_type.is_collection() {
                    break;
                }
            }
        }
    }
    Error::join(errs)
}
