//! IG-039: Growing, shrinking and renaming the evaluation graph.

use super::vertex::{GraphChanges, Key, Vertex};
use super::vertex_edge::EdgeVertex;
use super::vertex_path_expand::PathExpandVertex;
use super::vertex_property::PropertyVertex;
use super::vertex_resource_rule::ResourceRuleVertex;
use super::Evaluator;
use crate::core::types::{PropertyRef, ResourceId, SimpleEdge};
use crate::engine::path_selection::build_path_selection_graph;
use crate::engine::Error;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Evaluator {
    /// Merge a batch into the graph. New vertices start unevaluated; edges
    /// that would close a cycle or point at unknown vertices are skipped.
    pub(crate) fn enqueue(&mut self, changes: GraphChanges) -> Result<(), Error> {
        for (key, v) in changes.nodes {
            match self.graph.get_mut(&key) {
                Some(existing) => {
                    debug!("Updating {}", key);
                    existing.update_from(v);
                }
                None => {
                    self.graph.add(key.clone(), v).map_err(Error::Graph)?;
                    self.unevaluated.add(key.clone(), ()).map_err(Error::Graph)?;
                    debug!("Enqueued {}", key);
                }
            }
        }

        let mut errs = Vec::new();
        for (source, targets) in changes.edges {
            for target in targets {
                if source == target {
                    debug!("Skipping self dependency of {}", source);
                    continue;
                }
                if !self.graph.contains(&source) || !self.graph.contains(&target) {
                    debug!("Skipping dependency {} -> {}: vertex missing", source, target);
                    continue;
                }
                if let Err(e) = self.graph.add_edge(&source, &target) {
                    warn!("Skipping dependency {} -> {}: {}", source, target, e);
                    continue;
                }
                if self.unevaluated.contains(&source) && self.unevaluated.contains(&target) {
                    if let Err(e) = self.unevaluated.add_edge(&source, &target) {
                        errs.push(Error::Graph(e));
                    }
                }
            }
        }
        Error::join(errs)
    }

    /// Property and resource-rule vertices for each resource.
    pub(crate) fn add_resources(&mut self, ids: &[ResourceId]) -> Result<(), Error> {
        let kb = Arc::clone(&self.kb);
        let mut changes = GraphChanges::new();
        let mut errs = Vec::new();
        for id in ids {
            let Some(res) = self.solution.vertex(id) else {
                errs.push(Error::MissingResource(id.clone()));
                continue;
            };
            let tmpl = match kb.get_resource_template(id) {
                Ok(t) => t,
                Err(e) => {
                    errs.push(Error::KnowledgeBase(e));
                    continue;
                }
            };
            for path in tmpl.property_paths(res) {
                let v = PropertyVertex::new(
                    PropertyRef::new(id.clone(), &path),
                    tmpl.get_property(&path).cloned(),
                );
                if let Err(e) = changes.add_vertex_and_deps(self, Vertex::Property(v)) {
                    errs.push(e);
                }
            }
            for rule in &tmpl.additional_rules {
                let v = ResourceRuleVertex::new(id.clone(), rule.clone());
                if let Err(e) = changes.add_vertex_and_deps(self, Vertex::ResourceRule(v)) {
                    errs.push(e);
                }
            }
        }
        errs.extend(self.enqueue(changes).err());
        Error::join(errs)
    }

    /// An edge vertex for edges the knowledge base has a template for,
    /// otherwise one expansion per path satisfaction.
    pub(crate) fn add_edges(&mut self, edges: &[SimpleEdge]) -> Result<(), Error> {
        let kb = Arc::clone(&self.kb);
        let mut changes = GraphChanges::new();
        let mut errs = Vec::new();
        for edge in edges {
            if let Some(tmpl) = kb.get_edge_template(&edge.source, &edge.target) {
                let v = EdgeVertex::new(edge.clone(), tmpl.operational_rules.clone());
                if let Err(e) = changes.add_vertex_and_deps(self, Vertex::Edge(v)) {
                    errs.push(e);
                }
                continue;
            }
            let satisfactions = match kb.get_path_satisfactions_from_edge(&edge.source, &edge.target) {
                Ok(s) => s,
                Err(e) => {
                    errs.push(Error::KnowledgeBase(e));
                    continue;
                }
            };
            for sat in satisfactions {
                let temp = if sat.source.property_reference_changes_boundary()
                    || sat.target.property_reference_changes_boundary()
                {
                    None
                } else {
                    match build_path_selection_graph(edge, &kb, &sat.classification, false) {
                        Ok(g) => Some(g),
                        Err(e) => {
                            errs.push(e);
                            continue;
                        }
                    }
                };
                let v = PathExpandVertex::new(edge.clone(), sat, temp);
                if let Err(e) = changes.add_vertex_and_deps(self, Vertex::PathExpand(v)) {
                    errs.push(e);
                }
            }
        }
        errs.extend(self.enqueue(changes).err());
        Error::join(errs)
    }

    /// Drop a pending vertex. Evaluated vertices stay for the record.
    pub(crate) fn remove_key(&mut self, key: &Key) {
        if self.unevaluated.remove(key).is_some() {
            self.graph.remove(key);
            debug!("Removed {}", key);
        }
    }

    /// Graph-state vertices nothing waits for any more.
    fn remove_orphaned_graph_states(&mut self) {
        let orphans: Vec<Key> = self
            .graph
            .keys()
            .filter(|k| matches!(k, Key::GraphState(_)) && self.graph.in_degree(k) == 0)
            .cloned()
            .collect();
        for key in orphans {
            self.remove_key(&key);
        }
    }

    /// Remove everything pending that concerns a resource.
    pub(crate) fn remove_resource_vertices(&mut self, id: &ResourceId) {
        let keys: Vec<Key> = self.graph.keys().cloned().collect();
        for key in keys {
            match &key {
                Key::Property(r) if &r.resource == id => self.remove_key(&key),
                Key::Property(_) => {
                    if let Some(Vertex::Property(pv)) = self.graph.get_mut(&key) {
                        pv.edge_rules.retain(|e, _| &e.source != id && &e.target != id);
                        pv.transform_rules.retain(|e, _| &e.source != id && &e.target != id);
                    }
                }
                Key::GraphState(_) => {}
                _ if key.references(id) => self.remove_key(&key),
                _ => {}
            }
        }
        self.remove_orphaned_graph_states();
    }

    /// Remove everything pending that concerns a single edge.
    pub(crate) fn remove_edge_vertices(&mut self, edge: &SimpleEdge) {
        let keys: Vec<Key> = self.graph.keys().cloned().collect();
        for key in keys {
            match &key {
                Key::Edge(e) | Key::PathExpand { edge: e, .. } if e == edge => self.remove_key(&key),
                Key::Property(_) => {
                    if let Some(Vertex::Property(pv)) = self.graph.get_mut(&key) {
                        pv.edge_rules.remove(edge);
                        pv.transform_rules.remove(edge);
                    }
                }
                _ => {}
            }
        }
        self.remove_orphaned_graph_states();
    }

    /// Rename a resource in the solution and everywhere the graph mentions
    /// it. Renaming twice is harmless.
    pub(crate) fn update_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<(), Error> {
        if old == new {
            return Ok(());
        }
        if self.solution.contains(old) {
            self.solution
                .update_resource_id(old, new)
                .map_err(Error::Graph)?;
        } else if !self.solution.contains(new) {
            return Err(Error::MissingResource(old.clone()));
        }
        info!("Updating id {} to {}", old, new);
        self.constraints.rename(old, new);
        for target in self.renames.values_mut() {
            if target == old {
                *target = new.clone();
            }
        }
        self.renames.remove(new);
        self.renames.insert(old.clone(), new.clone());

        let keys: Vec<Key> = self.graph.keys().cloned().collect();
        let mut errs = Vec::new();
        for key in keys {
            if let Some(v) = self.graph.get_mut(&key) {
                v.rename(old, new);
            }
            let Some(renamed) = key.renamed(old, new) else {
                continue;
            };
            if let Err(e) = self.rekey(&key, renamed) {
                errs.push(e);
            }
        }
        Error::join(errs)
    }

    fn rekey(&mut self, old: &Key, new: Key) -> Result<(), Error> {
        if self.graph.contains(&new) {
            // both names already have a vertex; fold the old one in
            let pending = self.unevaluated.remove(old).is_some();
            if let Some(v) = self.graph.remove(old) {
                if let Some(existing) = self.graph.get_mut(&new) {
                    existing.update_from(v);
                }
            }
            if pending && !self.unevaluated.contains(&new) {
                debug!("Dropping pending {} in favour of evaluated {}", old, new);
            }
        } else {
            self.graph.rekey(old, new.clone()).map_err(Error::Graph)?;
            if self.unevaluated.contains(old) {
                self.unevaluated.rekey(old, new.clone()).map_err(Error::Graph)?;
            }
        }
        if let Some(s) = self.stats.remove(old) {
            self.stats.insert(new.clone(), s);
        }
        if self.errored.remove(old) {
            self.errored.insert(new.clone());
        }
        for group in &mut self.evaluated_order {
            for k in group.iter_mut().filter(|k| *k == old) {
                *k = new.clone();
            }
        }
        Ok(())
    }

    /// After a collection property changed, drop pending vertices for
    /// elements that no longer exist.
    pub(crate) fn cleanup_properties_sub_vertices(&mut self, reference: &PropertyRef) -> Result<(), Error> {
        let index_prefix = format!("{}[", reference.property);
        let field_prefix = format!("{}.", reference.property);
        let stale: Vec<Key> = self
            .unevaluated
            .keys()
            .filter(|k| match k {
                Key::Property(r) => {
                    r.resource == reference.resource
                        && (r.property.starts_with(&index_prefix)
                            || r.property.starts_with(&field_prefix))
                }
                _ => false,
            })
            .filter(|k| match self.graph.get(k) {
                Some(Vertex::Property(pv)) => !pv.path_is_live(self),
                _ => false,
            })
            .cloned()
            .collect();
        for key in stale {
            debug!("Removing stale sub-property {}", key);
            self.remove_key(&key);
        }
        Ok(())
    }
}
