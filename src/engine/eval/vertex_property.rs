//! IG-035: Property vertices.
//!
//! One vertex per resource property. Evaluation applies constraints and
//! defaults, then the property's own operational rule, then whatever edge
//! rules were attached to it by edge vertices.

use super::capture::DependencyCapture;
use super::vertex::{Key, ReadyPriority};
use super::Evaluator;
use crate::core::constraints::ConstraintOperator;
use crate::core::path::PropertyPath;
use crate::core::types::{PropertyRef, ResourceId, SimpleEdge};
use crate::engine::operational_rule::ConfigAction;
use crate::engine::{Decision, Error};
use crate::kb::templates::{OperationalRule, PropertyTemplate};
use crate::rules::template::{self, TemplateData};
use crate::rules::DynamicContext;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct PropertyVertex {
    pub reference: PropertyRef,
    /// `None` until a resource template supplies it (edge rules can create
    /// the vertex first).
    pub template: Option<PropertyTemplate>,
    pub edge_rules: BTreeMap<SimpleEdge, Vec<OperationalRule>>,
    /// Edge rules that read the property they write. They run last and
    /// overwrite the value.
    pub transform_rules: BTreeMap<SimpleEdge, Vec<OperationalRule>>,
}

impl PropertyVertex {
    pub fn new(reference: PropertyRef, template: Option<PropertyTemplate>) -> Self {
        PropertyVertex {
            reference,
            template,
            edge_rules: BTreeMap::new(),
            transform_rules: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> Key {
        Key::Property(self.reference.clone())
    }

    pub fn update_from(&mut self, other: PropertyVertex) {
        if self.reference != other.reference {
            panic!(
                "cannot merge properties with different refs: {} != {}",
                self.reference, other.reference
            );
        }
        if self.template.is_none() {
            self.template = other.template;
        }
        for (edge, rules) in other.edge_rules {
            // rules already known for an edge are not duplicated
            if self.edge_rules.contains_key(&edge) || self.transform_rules.contains_key(&edge) {
                continue;
            }
            self.edge_rules.insert(edge, rules);
        }
    }

    pub fn rename(&mut self, old: &ResourceId, new: &ResourceId) {
        if &self.reference.resource == old {
            self.reference.resource = new.clone();
        }
        self.edge_rules = std::mem::take(&mut self.edge_rules)
            .into_iter()
            .map(|(e, r)| (e.rename(old, new), r))
            .collect();
        self.transform_rules = std::mem::take(&mut self.transform_rules)
            .into_iter()
            .map(|(e, r)| (e.rename(old, new), r))
            .collect();
    }

    /// Collections always take edge rules; scalars only when no equals
    /// constraint pins the value.
    fn should_eval_edges(&self, eval: &Evaluator) -> bool {
        if self
            .template
            .as_ref()
            .is_some_and(|t| t.property_type.is_collection())
        {
            return true;
        }
        !eval
            .constraints
            .has_equals(&self.reference.resource, &self.reference.property)
    }

    pub fn dependencies(&mut self, eval: &Evaluator, cap: &mut DependencyCapture) -> Result<(), Error> {
        let resource = &self.reference.resource;
        let data = TemplateData::for_resource(resource);
        if let Some(t) = &self.template {
            if let Some(default) = &t.default_value {
                cap.execute_value(default, &data);
            }
            if let Some(rule) = &t.operational_rule {
                cap.execute_property_rule(&data, rule);
            }
            if !t.namespace {
                if let Ok(rt) = eval.kb.get_resource_template(resource) {
                    if let Some(ns) = rt.namespace_property() {
                        cap.add_ref(resource, &ns.path);
                    }
                }
            }
        }

        let key = self.key();
        let mut became_transforms = Vec::new();
        if self.should_eval_edges(eval) {
            take_self_edge(cap, &key);
            for (edge, rules) in &self.edge_rules {
                let data = TemplateData::for_resource(resource).with_edge(edge);
                for rule in rules {
                    cap.execute_op_rule(&data, rule);
                }
                if take_self_edge(cap, &key) {
                    became_transforms.push(edge.clone());
                }
                let edge_key = Key::Edge(edge.clone());
                if eval.graph.contains(&edge_key) {
                    cap.add_dependency(edge_key);
                }
            }
        }
        for edge in became_transforms {
            if let Some(rules) = self.edge_rules.remove(&edge) {
                self.transform_rules.entry(edge).or_default().extend(rules);
            }
        }

        for (edge, rules) in &self.transform_rules {
            let data = TemplateData::for_resource(resource).with_edge(edge);
            for rule in rules {
                cap.execute_op_rule(&data, rule);
            }
        }
        take_self_edge(cap, &key);
        Ok(())
    }

    pub fn evaluate(&self, eval: &mut Evaluator) -> Result<(), Error> {
        let Some(template) = &self.template else {
            return Err(Error::Config(format!(
                "no property template for {}",
                self.reference
            )));
        };
        let property = &self.reference.property;
        let original = &self.reference.resource;

        self.evaluate_constraints(eval, template)?;

        if let Some(rule) = &template.operational_rule {
            let reference = PropertyRef::new(eval.current_id(original), property);
            eval.handle_property_rule(&reference, template, rule)
                .map_err(|e| wrap(&self.reference, "could not apply operational rule", e))?;
        }

        let mut errs = Vec::new();
        if self.should_eval_edges(eval) {
            for (edge, rules) in &self.edge_rules {
                for rule in rules {
                    // an earlier rule may have renamed the resource
                    let id = eval.current_id(original);
                    let edge = edge.rename(original, &id);
                    let data = TemplateData::for_resource(&id).with_edge(&edge);
                    if let Err(e) = eval.handle_operational_rule(&data, rule, ConfigAction::Add) {
                        errs.push(wrap(
                            &self.reference,
                            &format!("could not apply edge {} operational rule", edge),
                            e,
                        ));
                    }
                }
            }
        }
        for (edge, rules) in &self.transform_rules {
            for rule in rules {
                let id = eval.current_id(original);
                let edge = edge.rename(original, &id);
                let data = TemplateData::for_resource(&id).with_edge(&edge);
                if let Err(e) = eval.handle_operational_rule(&data, rule, ConfigAction::Set) {
                    errs.push(wrap(&self.reference, "could not apply transform rule", e));
                }
            }
        }
        Error::join(errs)?;

        let id = eval.current_id(original);
        if &id != original {
            eval.update_id(original, &id)?;
        }

        let ty = &template.property_type;
        if ty.is_collection() || ty.is_map() {
            let reference = PropertyRef::new(id.clone(), property);
            let has_value = eval
                .solution
                .vertex(&id)
                .is_some_and(|r| r.get_property(property).is_some());
            if has_value {
                eval.cleanup_properties_sub_vertices(&reference)?;
            }
            // nested fields of new elements need their own vertices
            eval.add_resources(std::slice::from_ref(&id))?;
        }

        let value = eval
            .solution
            .vertex(&id)
            .ok_or_else(|| Error::MissingResource(id.clone()))?
            .get_property(property)
            .cloned();
        let error = template.validate(value.as_ref()).err();
        eval.record(Decision::PropertyValidation {
            resource: id,
            property: property.clone(),
            value,
            error,
        });
        Ok(())
    }

    fn evaluate_constraints(&self, eval: &mut Evaluator, template: &PropertyTemplate) -> Result<(), Error> {
        let property = &self.reference.property;
        let id = eval.current_id(&self.reference.resource);
        let constraints: Vec<_> = eval.constraints.for_property(&id, property).cloned().collect();
        let equals = constraints
            .iter()
            .rev()
            .find(|c| c.operator == ConstraintOperator::Equals);

        let res = eval
            .solution
            .vertex(&id)
            .ok_or_else(|| Error::MissingResource(id.clone()))?;
        let unset = res.get_property(property).is_none();
        let imported = res.imported;
        let data = TemplateData::for_resource(&id);

        if let Some(c) = equals {
            eval.configure_resource(&id, property, &c.value, ConfigAction::Set, &data)
                .map_err(|e| wrap(&self.reference, "could not apply initial constraint", e))?;
        } else if unset && !imported {
            if let Some(default) = &template.default_value {
                let value = {
                    let mut ctx = DynamicContext::new(&eval.solution, &eval.kb);
                    template::resolve_value(&mut ctx, default, &data).map_err(|e| {
                        wrap(&self.reference, "could not get default value", Error::Template(e))
                    })?
                };
                if !value.is_null() {
                    eval.configure_resource(&id, property, &value, ConfigAction::Set, &data)
                        .map_err(|e| wrap(&self.reference, "could not set default value", e))?;
                }
            }
        }

        let mut errs = Vec::new();
        for c in constraints.iter().filter(|c| c.operator != ConstraintOperator::Equals) {
            let action = match c.operator {
                ConstraintOperator::Remove => ConfigAction::Remove,
                _ => ConfigAction::Add,
            };
            let id = eval.current_id(&self.reference.resource);
            let data = TemplateData::for_resource(&id);
            if let Err(e) = eval.configure_resource(&id, property, &c.value, action, &data) {
                errs.push(e);
            }
        }
        Error::join(errs).map_err(|e| wrap(&self.reference, "could not apply constraints", e))
    }

    pub fn ready(&self, eval: &Evaluator) -> ReadyPriority {
        let Some(t) = &self.template else {
            return ReadyPriority::NotReadyMax;
        };
        if t.operational_rule.is_some() {
            // operational rules create what they need, so run them early
            return ReadyPriority::ReadyNow;
        }
        if t.property_type.is_collection() {
            // more elements can show up until nothing else is left
            return ReadyPriority::NotReadyHigh;
        }
        if t.property_type.is_map() && t.properties.is_empty() {
            return ReadyPriority::NotReadyHigh;
        }
        if let Some(default) = &t.default_value {
            let mut ctx = DynamicContext::new(&eval.solution, &eval.kb);
            let data = TemplateData::for_resource(&self.reference.resource);
            return match template::resolve_value(&mut ctx, default, &data) {
                Ok(v) if !v.is_null() => ReadyPriority::ReadyNow,
                _ => ReadyPriority::NotReadyMid,
            };
        }
        if !self.edge_rules.is_empty() {
            return ReadyPriority::ReadyNow;
        }
        ReadyPriority::NotReadyMid
    }

    /// Whether the path still resolves on the resource, or at least its
    /// parent container does.
    pub(crate) fn path_is_live(&self, eval: &Evaluator) -> bool {
        let Some(res) = eval.solution.vertex(&self.reference.resource) else {
            return false;
        };
        let Ok(path) = PropertyPath::parse(&self.reference.property) else {
            return false;
        };
        if path.get(&res.properties).is_some() {
            return true;
        }
        path.parent()
            .is_some_and(|p| p.get(&res.properties).is_some())
    }
}

/// Remove a recorded `key -> key` dependency, reporting whether one existed.
fn take_self_edge(cap: &mut DependencyCapture, key: &Key) -> bool {
    cap.changes_mut()
        .edges
        .get_mut(key)
        .is_some_and(|targets| targets.remove(key))
}

fn wrap(reference: &PropertyRef, context: &str, e: Error) -> Error {
    Error::Vertex {
        key: reference.to_string(),
        source: Box::new(Error::Config(format!("{}: {}", context, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Resource;
    use crate::kb::KnowledgeBase;
    use serde_json::json;
    use std::sync::Arc;

    const KB: &str = r#"
resources:
  - qualified_type_name: p:fn
    properties:
      Memory:
        type: number
        default_value: 128
      Tags:
        type: list(string)
      Name:
        type: string
  - qualified_type_name: p:q
"#;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn eval() -> Evaluator {
        let kb = Arc::new(KnowledgeBase::from_yaml(KB).unwrap());
        let mut eval = Evaluator::new(kb);
        eval.solution.add_vertex(Resource::new(id("p:fn:f"))).unwrap();
        eval
    }

    fn vertex(eval: &Evaluator, prop: &str) -> PropertyVertex {
        let tmpl = eval.kb.get_resource_template(&id("p:fn")).unwrap();
        PropertyVertex::new(
            PropertyRef::new(id("p:fn:f"), prop),
            tmpl.get_property(prop).cloned(),
        )
    }

    #[test]
    fn test_ig035_ready_tiers() {
        let eval = eval();
        assert_eq!(vertex(&eval, "Memory").ready(&eval), ReadyPriority::ReadyNow);
        assert_eq!(vertex(&eval, "Tags").ready(&eval), ReadyPriority::NotReadyHigh);
        assert_eq!(vertex(&eval, "Name").ready(&eval), ReadyPriority::NotReadyMid);
        let bare = PropertyVertex::new(PropertyRef::new(id("p:fn:f"), "Name"), None);
        assert_eq!(bare.ready(&eval), ReadyPriority::NotReadyMax);
    }

    #[test]
    fn test_ig035_default_value_applied() {
        let mut eval = eval();
        vertex(&eval, "Memory").evaluate(&mut eval).unwrap();
        let res = eval.solution.vertex(&id("p:fn:f")).unwrap();
        assert_eq!(res.get_property("Memory"), Some(&json!(128)));
        assert!(matches!(
            eval.decisions.last(),
            Some(Decision::PropertyValidation { error: None, .. })
        ));
    }

    #[test]
    fn test_ig035_equals_constraint_beats_default() {
        let mut eval = eval();
        eval.constraints.push(
            serde_yaml_ng::from_str(
                "operator: equals\ntarget: p:fn:f\nproperty: Memory\nvalue: 512\n",
            )
            .unwrap(),
        );
        vertex(&eval, "Memory").evaluate(&mut eval).unwrap();
        let res = eval.solution.vertex(&id("p:fn:f")).unwrap();
        assert_eq!(res.get_property("Memory"), Some(&json!(512)));
    }

    #[test]
    fn test_ig035_equals_suppresses_edge_rules() {
        let mut eval = eval();
        let mut v = vertex(&eval, "Name");
        let edge = SimpleEdge::new(id("p:fn:f"), id("p:q:q"));
        v.edge_rules.insert(edge, vec![OperationalRule::default()]);
        assert!(v.should_eval_edges(&eval));
        eval.constraints.push(
            serde_yaml_ng::from_str("operator: equals\ntarget: p:fn:f\nproperty: Name\nvalue: x\n")
                .unwrap(),
        );
        assert!(!v.should_eval_edges(&eval));
        // collections keep their edge rules regardless
        let mut tags = vertex(&eval, "Tags");
        tags.edge_rules = v.edge_rules.clone();
        assert!(tags.should_eval_edges(&eval));
    }

    #[test]
    fn test_ig035_self_reading_edge_rule_becomes_transform() {
        let eval = eval();
        let mut v = vertex(&eval, "Name");
        let edge = SimpleEdge::new(id("p:fn:f"), id("p:q:q"));
        let rule: OperationalRule = serde_yaml_ng::from_str(
            r#"
configuration_rules:
  - resource: "{{ .Source }}"
    configuration:
      field: Name
      value: "{{ fieldValue \"Name\" .Source }}-x"
"#,
        )
        .unwrap();
        v.edge_rules.insert(edge.clone(), vec![rule]);
        let mut cap = DependencyCapture::new(&eval, v.key());
        v.dependencies(&eval, &mut cap).unwrap();
        assert!(v.edge_rules.is_empty());
        assert_eq!(v.transform_rules.get(&edge).map(Vec::len), Some(1));
        let changes = cap.into_changes();
        assert!(!changes
            .edges
            .get(&v.key())
            .is_some_and(|t| t.contains(&v.key())));
    }
}
