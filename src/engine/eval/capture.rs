//! IG-033: Dependency capture.
//!
//! Replays the same templates evaluation will run, against the live graph,
//! recording every property read and relational query as a dependency of the
//! vertex being derived. Template failures are expected here (values that
//! are not set yet) and are only logged.

use super::vertex::{GraphChanges, Key, Vertex};
use super::vertex_graph_state::{GraphQuery, GraphStateVertex};
use super::Evaluator;
use crate::core::graph::Direction;
use crate::core::types::{PropertyRef, ResourceId};
use crate::kb::templates::{OperationalRule, PropertyRule};
use crate::rules::template::{self, TemplateData, TemplateFunctions};
use crate::rules::DynamicContext;
use serde_json::Value;
use tracing::debug;

pub struct DependencyCapture<'a> {
    eval: &'a Evaluator,
    src: Key,
    changes: GraphChanges,
}

impl<'a> DependencyCapture<'a> {
    pub fn new(eval: &'a Evaluator, src: Key) -> Self {
        DependencyCapture {
            eval,
            src,
            changes: GraphChanges::new(),
        }
    }

    pub fn into_changes(self) -> GraphChanges {
        self.changes
    }

    pub fn changes(&self) -> &GraphChanges {
        &self.changes
    }

    pub fn changes_mut(&mut self) -> &mut GraphChanges {
        &mut self.changes
    }

    /// Record that the current source waits for `target`.
    pub fn add_dependency(&mut self, target: Key) {
        self.changes.add_edge(self.src.clone(), target);
    }

    /// Record a property read. Reads inside a list stop at the list itself.
    pub fn add_ref(&mut self, resource: &ResourceId, field: &str) {
        let property = match field.find('[') {
            Some(i) => &field[..i],
            None => field,
        };
        self.add_dependency(Key::Property(PropertyRef::new(resource.clone(), property)));
    }

    fn add_graph_state(&mut self, query: GraphQuery) {
        let v = GraphStateVertex::new(query);
        let key = v.key();
        self.changes.add_node(Vertex::GraphState(v));
        self.add_dependency(key);
    }

    fn ctx(&self) -> DynamicContext<'a> {
        let eval = self.eval;
        DynamicContext::new(&eval.solution, &eval.kb)
    }

    /// Execute a template for its recorded reads.
    pub fn execute(&mut self, src: &str, data: &TemplateData) -> Option<Value> {
        match template::execute(self, src, data) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("ignoring template error during dependency capture of {}: {}", self.src, e);
                None
            }
        }
    }

    pub fn execute_value(&mut self, value: &Value, data: &TemplateData) {
        if let Err(e) = template::resolve_value(self, value, data) {
            debug!("ignoring value error during dependency capture of {}: {}", self.src, e);
        }
    }

    fn execute_condition(&mut self, cond: Option<&str>, data: &TemplateData) {
        if let Some(cond) = cond {
            self.execute(cond, data);
        }
    }

    /// Replay an operational rule. Configuration rules that target another
    /// property make that property wait for the rule's owner.
    pub fn execute_op_rule(&mut self, data: &TemplateData, rule: &OperationalRule) {
        let original = self.src.clone();
        for config in &rule.configuration_rules {
            if !config.resource.is_empty() {
                let field = self
                    .execute(&config.configuration.field, data)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let resource = match template::execute_decode_id(self, &config.resource, data) {
                    Ok(id) => id,
                    Err(e) => {
                        debug!("could not decode configuration resource for {}: {}", self.src, e);
                        continue;
                    }
                };
                if resource.is_zero() || field.is_empty() {
                    continue;
                }
                self.src = Key::Property(PropertyRef::new(resource, &field));
            }
            self.execute_condition(rule.if_cond.as_deref(), data);
            self.execute_value(&config.configuration.value, data);
            if self.src != original {
                self.changes.add_edge(self.src.clone(), original.clone());
                self.src = original.clone();
            }
        }
        if !rule.steps.is_empty() {
            self.execute_condition(rule.if_cond.as_deref(), data);
        }
        for step in &rule.steps {
            if !step.resource.is_empty() {
                self.execute(&step.resource, data);
            }
            for sel in &step.resources {
                self.execute(&sel.selector, data);
                for v in sel.properties.values() {
                    self.execute_value(v, data);
                }
            }
        }
    }

    pub fn execute_property_rule(&mut self, data: &TemplateData, rule: &PropertyRule) {
        self.execute_condition(rule.if_cond.as_deref(), data);
        if let Some(step) = &rule.step {
            for sel in &step.resources {
                self.execute(&sel.selector, data);
                for v in sel.properties.values() {
                    self.execute_value(v, data);
                }
            }
        }
        if let Some(value) = &rule.value {
            self.execute_value(value, data);
        }
    }

    fn zero_value(&self, resource: &ResourceId, field: &str) -> Result<Value, String> {
        let tmpl = self.eval.kb.get_resource_template(resource)?;
        let prop = tmpl.get_property(field).ok_or_else(|| {
            format!("could not find property {} on template {}", field, tmpl.qualified_type_name)
        })?;
        Ok(prop.property_type.zero_value())
    }
}

impl TemplateFunctions for DependencyCapture<'_> {
    fn field_value(&mut self, field: &str, resource: &ResourceId) -> Result<Value, String> {
        if resource.is_zero() {
            return Ok(Value::Null);
        }
        self.add_ref(resource, field);
        match self.ctx().field_value(field, resource) {
            Ok(v) if !v.is_null() => Ok(v),
            _ => self.zero_value(resource, field),
        }
    }

    fn has_field(&mut self, field: &str, resource: &ResourceId) -> Result<bool, String> {
        if resource.is_zero() {
            return Ok(false);
        }
        self.add_ref(resource, field);
        self.ctx().has_field(field, resource)
    }

    fn upstream(&mut self, selector: &ResourceId, resource: &ResourceId) -> Result<ResourceId, String> {
        let found = self.ctx().first_match(selector, resource, Direction::Upstream);
        if found.is_zero() {
            self.add_graph_state(GraphQuery::First {
                name: "Upstream",
                direction: Direction::Upstream,
                selector: selector.clone(),
                resource: resource.clone(),
            });
        }
        Ok(found)
    }

    fn downstream(&mut self, selector: &ResourceId, resource: &ResourceId) -> Result<ResourceId, String> {
        let found = self.ctx().first_match(selector, resource, Direction::Downstream);
        if found.is_zero() {
            self.add_graph_state(GraphQuery::First {
                name: "Downstream",
                direction: Direction::Downstream,
                selector: selector.clone(),
                resource: resource.clone(),
            });
        }
        Ok(found)
    }

    fn has_upstream(&mut self, selector: &ResourceId, resource: &ResourceId) -> Result<bool, String> {
        let found = self.ctx().has_upstream(selector, resource)?;
        if !found {
            self.add_graph_state(GraphQuery::First {
                name: "HasUpstream",
                direction: Direction::Upstream,
                selector: selector.clone(),
                resource: resource.clone(),
            });
        }
        Ok(found)
    }

    fn has_downstream(&mut self, selector: &ResourceId, resource: &ResourceId) -> Result<bool, String> {
        let found = self.ctx().has_downstream(selector, resource)?;
        if !found {
            self.add_graph_state(GraphQuery::First {
                name: "HasDownstream",
                direction: Direction::Downstream,
                selector: selector.clone(),
                resource: resource.clone(),
            });
        }
        Ok(found)
    }

    fn all_upstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<Vec<ResourceId>, String> {
        self.add_graph_state(GraphQuery::All {
            direction: Direction::Upstream,
            selector: selector.clone(),
            resource: resource.clone(),
        });
        self.ctx().all_upstream(selector, resource)
    }

    fn all_downstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<Vec<ResourceId>, String> {
        self.add_graph_state(GraphQuery::All {
            direction: Direction::Downstream,
            selector: selector.clone(),
            resource: resource.clone(),
        });
        self.ctx().all_downstream(selector, resource)
    }

    fn closest_downstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<ResourceId, String> {
        self.add_graph_state(GraphQuery::Closest {
            selector: selector.clone(),
            resource: resource.clone(),
        });
        Ok(self
            .ctx()
            .closest_downstream(selector, resource)
            .unwrap_or_default())
    }
}
