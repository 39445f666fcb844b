//! IG-050: Applying operational rules to the solution.
//!
//! Configuration rules write property values; steps make sure a resource
//! is connected to enough resources of the right kind, reusing existing
//! ones before creating new ones.

use crate::core::graph::{DependencyLayer, Direction};
use crate::core::types::{PropertyRef, Resource, ResourceId, SimpleEdge};
use crate::engine::eval::Evaluator;
use crate::engine::view::OperationalView;
use crate::engine::{Decision, Error};
use crate::kb::templates::{
    ConfigurationRule, OperationalRule, OperationalStep, PropertyRule, PropertyTemplate,
    ResourceSelector,
};
use crate::rules::template::{self, TemplateData};
use crate::rules::DynamicContext;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

const MAX_NAME_SUFFIX: usize = 1000;

/// How a configuration value is applied to its property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigAction {
    Set,
    Add,
    Remove,
}

/// The property a step fills, if any.
type StepProperty<'a> = Option<(&'a str, &'a PropertyTemplate)>;

/// Resource ids referenced by a property value. Strings that are not full
/// ids are skipped.
pub(crate) fn referenced_ids(v: &Value) -> Vec<ResourceId> {
    let parse = |s: &str| ResourceId::parse(s).ok().filter(|id| !id.name.is_empty());
    match v {
        Value::String(s) => parse(s).into_iter().collect(),
        Value::Array(items) => items.iter().filter_map(|i| i.as_str()).filter_map(parse).collect(),
        _ => Vec::new(),
    }
}

impl Evaluator {
    fn condition(&self, cond: Option<&str>, data: &TemplateData) -> Result<bool, Error> {
        let mut ctx = DynamicContext::new(&self.solution, &self.kb);
        template::execute_condition(&mut ctx, cond, data).map_err(Error::Template)
    }

    fn decode_id(&self, src: &str, data: &TemplateData) -> Result<ResourceId, Error> {
        let mut ctx = DynamicContext::new(&self.solution, &self.kb);
        template::execute_decode_id(&mut ctx, src, data).map_err(Error::Template)
    }

    pub(crate) fn handle_operational_rule(
        &mut self,
        data: &TemplateData,
        rule: &OperationalRule,
        action: ConfigAction,
    ) -> Result<(), Error> {
        if !self.condition(rule.if_cond.as_deref(), data)? {
            return Ok(());
        }
        let mut errs = Vec::new();
        for (i, step) in rule.steps.iter().enumerate() {
            if let Err(e) = self.handle_step(data, step, None) {
                errs.push(Error::Config(format!("could not apply step {}: {}", i, e)));
            }
        }
        for (i, config) in rule.configuration_rules.iter().enumerate() {
            if let Err(e) = self.handle_configuration_rule(data, config, action) {
                errs.push(Error::Config(format!(
                    "could not apply configuration rule {}: {}",
                    i, e
                )));
            }
        }
        Error::join(errs)
    }

    pub(crate) fn handle_property_rule(
        &mut self,
        reference: &PropertyRef,
        template: &PropertyTemplate,
        rule: &PropertyRule,
    ) -> Result<(), Error> {
        let data = TemplateData::for_resource(&reference.resource);
        if !self.condition(rule.if_cond.as_deref(), &data)? {
            return Ok(());
        }

        let mut errs = Vec::new();
        if let Some(step) = rule
            .step
            .as_ref()
            .filter(|s| !s.resources.is_empty() || !s.classifications.is_empty())
        {
            self.clean_property(&reference.resource, &reference.property, step, &data)?;
            if let Err(e) = self.handle_step(&data, step, Some((reference.property.as_str(), template))) {
                errs.push(Error::Config(format!("could not apply step: {}", e)));
            }
        }

        if let Some(value) = &rule.value {
            let id = self.current_id(&reference.resource);
            let data = TemplateData::for_resource(&id);
            let resolved = {
                let mut ctx = DynamicContext::new(&self.solution, &self.kb);
                template::resolve_value(&mut ctx, value, &data).map_err(Error::Template)?
            };
            match template.property_type.parse_value(&resolved) {
                Ok(parsed) => self.set_value(&id, &reference.property, parsed)?,
                Err(e) => errs.push(Error::Config(format!(
                    "could not parse value {} for {}: {}",
                    resolved, reference, e
                ))),
            }
        }
        Error::join(errs)
    }

    fn set_value(&mut self, id: &ResourceId, property: &str, value: Value) -> Result<(), Error> {
        let res = self
            .solution
            .vertex_mut(id)
            .ok_or_else(|| Error::MissingResource(id.clone()))?;
        res.set_property(property, value.clone()).map_err(Error::Config)?;
        self.record(Decision::SetProperty {
            resource: id.clone(),
            property: property.to_string(),
            value,
        });
        Ok(())
    }

    fn handle_configuration_rule(
        &mut self,
        data: &TemplateData,
        config: &ConfigurationRule,
        action: ConfigAction,
    ) -> Result<(), Error> {
        let resource = if config.resource.is_empty() {
            data.resource
                .clone()
                .ok_or_else(|| Error::Config("configuration rule has no resource".into()))?
        } else {
            self.decode_id(&config.resource, data)?
        };
        let field = {
            let mut ctx = DynamicContext::new(&self.solution, &self.kb);
            template::execute(&mut ctx, &config.configuration.field, data)
                .map(|v| template::render(&v))
                .map_err(Error::Template)?
        };
        let id = self.current_id(&resource);
        self.configure_resource(&id, &field, &config.configuration.value, action, data)
    }

    /// Resolve `value` and apply it to `id#field`. Resource references are
    /// wired into the solution, and setting a namespace property renames
    /// the resource.
    pub(crate) fn configure_resource(
        &mut self,
        id: &ResourceId,
        field: &str,
        value: &Value,
        action: ConfigAction,
        data: &TemplateData,
    ) -> Result<(), Error> {
        let kb = Arc::clone(&self.kb);
        let tmpl = kb.get_resource_template(id).map_err(Error::KnowledgeBase)?;
        let prop = tmpl.get_property(field).ok_or_else(|| {
            Error::Config(format!(
                "property {} not found on template {}",
                field, tmpl.qualified_type_name
            ))
        })?;
        let ty = &prop.property_type;

        let resolved = {
            let mut ctx = DynamicContext::new(&self.solution, &self.kb);
            template::resolve_value(&mut ctx, value, data).map_err(Error::Template)?
        };
        let element = ty.element().filter(|_| action != ConfigAction::Set && !resolved.is_array());
        let parsed = match (action, element) {
            (_, Some(el)) => el.parse_value(&resolved),
            (ConfigAction::Remove, None) if !ty.is_collection() => Ok(resolved.clone()),
            _ => ty.parse_value(&resolved),
        }
        .map_err(|e| Error::Config(format!("could not parse value for {}#{}: {}", id, field, e)))?;

        let refs = if ty.resource_selector().is_some() {
            referenced_ids(&parsed)
        } else {
            Vec::new()
        };
        for r in &refs {
            if !self.solution.contains(r) {
                return Err(Error::MissingResource(r.clone()));
            }
        }

        let res = self
            .solution
            .vertex_mut(id)
            .ok_or_else(|| Error::MissingResource(id.clone()))?;
        match action {
            ConfigAction::Set => res.set_property(field, parsed.clone()),
            ConfigAction::Add if ty.is_collection() => res.append_property(field, parsed.clone(), true),
            ConfigAction::Add if ty.is_map() => res.append_property(field, parsed.clone(), false),
            ConfigAction::Add => res.set_property(field, parsed.clone()),
            ConfigAction::Remove if ty.is_collection() || ty.is_map() => {
                res.remove_property(field, Some(&parsed))
            }
            ConfigAction::Remove => res.remove_property(field, None),
        }
        .map_err(Error::Config)?;
        debug!("Configured {}#{} ({:?}) with {}", id, field, action, parsed);
        if action != ConfigAction::Remove {
            self.record(Decision::SetProperty {
                resource: id.clone(),
                property: field.to_string(),
                value: parsed.clone(),
            });
        }
        if action == ConfigAction::Remove {
            return Ok(());
        }

        for r in &refs {
            if r == id {
                continue;
            }
            let edge = if kb.get_edge_template(id, r).is_some() {
                SimpleEdge::new(id.clone(), r.clone())
            } else if kb.get_edge_template(r, id).is_some() {
                SimpleEdge::new(r.clone(), id.clone())
            } else {
                continue;
            };
            if !self.solution.has_edge(&edge.source, &edge.target) {
                self.add_dependency(&edge.source, &edge.target)?;
            }
        }

        if prop.namespace {
            if let Some(ns) = refs.first() {
                let mut new_id = id.clone();
                new_id.namespace = ns.name.clone();
                self.update_id(id, &new_id)?;
            }
        }
        Ok(())
    }

    /// Drop resource values of a step-driven property that no longer match
    /// any of the step's selectors.
    fn clean_property(
        &mut self,
        id: &ResourceId,
        path: &str,
        step: &OperationalStep,
        data: &TemplateData,
    ) -> Result<(), Error> {
        let Some(value) = self.solution.vertex(id).and_then(|r| r.get_property(path)).cloned()
        else {
            return Ok(());
        };
        let mut stale = Vec::new();
        for r in referenced_ids(&value) {
            let mut matched = false;
            for sel in &step.resources {
                if self.can_use(sel, data, &r)? {
                    matched = true;
                    break;
                }
            }
            if !matched {
                stale.push(r);
            }
        }
        for r in stale {
            info!("Removing {} from {}#{}, does not match selectors", r, id, path);
            let res = self
                .solution
                .vertex_mut(id)
                .ok_or_else(|| Error::MissingResource(id.clone()))?;
            let target = Value::String(r.to_string());
            if value.is_array() {
                res.remove_property(path, Some(&target)).map_err(Error::Config)?;
            } else {
                res.remove_property(path, None).map_err(Error::Config)?;
            }
            for (s, t) in [(id, &r), (&r, id)] {
                if self.solution.has_edge(s, t) {
                    self.remove_dependency(s, t)?;
                }
            }
        }
        Ok(())
    }

    /// Whether `candidate` satisfies `selector`: its id matches and every
    /// property the selector asks for is unset or equal.
    pub(crate) fn can_use(
        &self,
        selector: &ResourceSelector,
        data: &TemplateData,
        candidate: &ResourceId,
    ) -> Result<bool, Error> {
        let sel = self.decode_id(&selector.selector, data)?;
        if !sel.matches(candidate) {
            return Ok(false);
        }
        let res = self
            .solution
            .vertex(candidate)
            .ok_or_else(|| Error::MissingResource(candidate.clone()))?;
        let mut ctx = DynamicContext::new(&self.solution, &self.kb);
        for (k, v) in &selector.properties {
            let want = template::resolve_value(&mut ctx, v, data).map_err(Error::Template)?;
            if res.get_property(k).is_some_and(|have| have != &want) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn handle_step(
        &mut self,
        data: &TemplateData,
        step: &OperationalStep,
        property: StepProperty<'_>,
    ) -> Result<(), Error> {
        let resource = match &data.resource {
            Some(r) => r.clone(),
            None if step.resource.is_empty() => {
                return Err(Error::Config("operational step has no resource".into()))
            }
            None => self.decode_id(&step.resource, data)?,
        };
        let mut resource = self.current_id(&resource);
        if !self.solution.contains(&resource) {
            return Err(Error::MissingResource(resource));
        }
        let needed = step.needed();

        let mut ids = Vec::new();
        match property {
            Some((path, _)) => {
                let value = self
                    .solution
                    .vertex(&resource)
                    .and_then(|r| r.get_property(path))
                    .cloned();
                ids = value.as_ref().map(referenced_ids).unwrap_or_default();
                for dep in ids.clone() {
                    if !self.solution.contains(&dep) {
                        return Err(Error::MissingResource(dep));
                    }
                    resource = self.add_dependency_for_direction(step, &resource, &dep, property)?;
                }
            }
            None => {
                let related = DynamicContext::new(&self.solution, &self.kb).layered(
                    &resource,
                    step.direction,
                    DependencyLayer::FirstFunctional,
                );
                for r in related {
                    let mut matched = false;
                    for sel in &step.resources {
                        if self.can_use(sel, data, &r)? {
                            matched = true;
                            break;
                        }
                    }
                    if matched {
                        ids.push(r);
                    }
                }
            }
        }
        if ids.len() >= needed {
            return Ok(());
        }
        if step.fail_if_missing {
            return Err(Error::Config(format!(
                "operational resource '{}' missing when required",
                resource
            )));
        }
        let mut remaining = needed - ids.len();

        // explicit ids first, then types
        let mut explicit = Vec::new();
        let mut types: Vec<(ResourceId, ResourceSelector)> = Vec::new();
        for sel in &step.resources {
            let id = self.decode_id(&sel.selector, data)?;
            if id.name.is_empty() {
                types.push((id, sel.clone()));
            } else {
                explicit.push((id, sel));
            }
        }
        for (id, sel) in explicit {
            if remaining == 0 {
                return Ok(());
            }
            if ids.contains(&id) {
                continue;
            }
            if !self.solution.contains(&id) {
                self.create_resource(id.clone(), sel, data)?;
            }
            resource = self.add_dependency_for_direction(step, &resource, &id, property)?;
            ids.push(id);
            remaining -= 1;
        }
        if remaining == 0 {
            return Ok(());
        }

        let kb = Arc::clone(&self.kb);
        if !step.classifications.is_empty() {
            for t in kb.list_resources() {
                if !t.has_classifications(&step.classifications) {
                    continue;
                }
                let Ok(tid) = t.id() else { continue };
                let has_path = match step.direction {
                    Direction::Downstream => kb.has_functional_path(&resource, &tid),
                    Direction::Upstream => kb.has_functional_path(&tid, &resource),
                };
                if has_path {
                    let selector = ResourceSelector {
                        selector: tid.qualified_type_name(),
                        properties: Default::default(),
                    };
                    types.push((tid, selector));
                }
            }
        }
        if types.is_empty() {
            return Err(Error::Config(format!(
                "no resources found that can satisfy the operational step on {}",
                resource
            )));
        }

        if step.unique {
            let (ty, sel) = &types[0];
            while remaining > 0 {
                let id = self.unique_name(ty, &resource)?;
                self.create_resource(id.clone(), sel, data)?;
                resource = self.add_dependency_for_direction(step, &resource, &id, property)?;
                remaining -= 1;
            }
            return Ok(());
        }

        for (ty, sel) in &types {
            if remaining == 0 {
                break;
            }
            for candidate in self.available_resources(&resource, ty, &ids)? {
                if remaining == 0 {
                    break;
                }
                if !self.can_use(sel, data, &candidate)? {
                    continue;
                }
                resource = self.add_dependency_for_direction(step, &resource, &candidate, property)?;
                ids.push(candidate);
                remaining -= 1;
            }
        }

        let (ty, sel) = &types[0];
        while remaining > 0 {
            let id = self.generated_name(ty)?;
            self.create_resource(id.clone(), sel, data)?;
            resource = self.add_dependency_for_direction(step, &resource, &id, property)?;
            remaining -= 1;
        }
        Ok(())
    }

    /// Existing resources of type `ty` a step on `resource` may reuse, in id
    /// order. Namespaced types must live in a namespace reachable from
    /// `resource`.
    fn available_resources(
        &self,
        resource: &ResourceId,
        ty: &ResourceId,
        exclude: &[ResourceId],
    ) -> Result<Vec<ResourceId>, Error> {
        let kb = &self.kb;
        let namespaced = kb
            .get_allowed_namespaced_resource_ids(ty)
            .map_err(Error::KnowledgeBase)?;
        let mut namespaces = BTreeSet::new();
        let ctx = DynamicContext::new(&self.solution, kb);
        for ns in &namespaced {
            if kb.has_functional_path(resource, ns) {
                namespaces.extend(ctx.layered(
                    resource,
                    Direction::Downstream,
                    DependencyLayer::FirstFunctional,
                ));
            }
        }

        let mut out = Vec::new();
        for res in self.solution.resources() {
            if &res.id == resource || exclude.contains(&res.id) {
                continue;
            }
            if res.id.qualified_type_name() != ty.qualified_type_name() {
                continue;
            }
            if !namespaced.is_empty() && !namespaces.is_empty() {
                let ns = kb
                    .get_resources_namespace_resource(res)
                    .map_err(Error::KnowledgeBase)?;
                if !ns.is_some_and(|ns| namespaces.contains(&ns)) {
                    continue;
                }
            }
            out.push(res.id.clone());
        }
        Ok(out)
    }

    fn create_resource(
        &mut self,
        id: ResourceId,
        sel: &ResourceSelector,
        data: &TemplateData,
    ) -> Result<(), Error> {
        let mut res = Resource::new(id);
        {
            let mut ctx = DynamicContext::new(&self.solution, &self.kb);
            for (k, v) in &sel.properties {
                let value = template::resolve_value(&mut ctx, v, data).map_err(Error::Template)?;
                res.set_property(k, value).map_err(Error::Config)?;
            }
        }
        info!("Creating {} for operational step", res.id);
        self.add_resource(res)
    }

    /// `{type}-{count}` with the count of resources of that type, bumped
    /// until free.
    fn generated_name(&self, ty: &ResourceId) -> Result<ResourceId, Error> {
        let base = ty.type_name.clone();
        self.free_name(ty, |n| format!("{}-{}", base, n))
    }

    /// `{type}-{owner}-{count}`, for resources owned by a single resource.
    fn unique_name(&self, ty: &ResourceId, owner: &ResourceId) -> Result<ResourceId, Error> {
        let base = format!("{}-{}", ty.type_name, owner.name);
        self.free_name(ty, |n| format!("{}-{}", base, n))
    }

    fn free_name(&self, ty: &ResourceId, name: impl Fn(usize) -> String) -> Result<ResourceId, Error> {
        let selector = ty.selector();
        let taken: BTreeSet<&str> = self
            .solution
            .ids()
            .filter(|id| selector.matches(id))
            .map(|id| id.name.as_str())
            .collect();
        let start = taken.len();
        for n in start..start + MAX_NAME_SUFFIX {
            let candidate = name(n);
            if !taken.contains(candidate.as_str()) {
                let mut id = ty.selector();
                id.name = candidate;
                return Ok(id);
            }
        }
        Err(Error::Config(format!("exhausted names for {}", ty)))
    }

    /// Connect `resource` and `dep` in the step's direction and fill the
    /// step's property. Returns the resource's id afterwards.
    fn add_dependency_for_direction(
        &mut self,
        step: &OperationalStep,
        resource: &ResourceId,
        dep: &ResourceId,
        property: StepProperty<'_>,
    ) -> Result<ResourceId, Error> {
        let edge = match step.direction {
            Direction::Upstream => SimpleEdge::new(dep.clone(), resource.clone()),
            Direction::Downstream => SimpleEdge::new(resource.clone(), dep.clone()),
        };
        if !self.solution.has_edge(&edge.source, &edge.target) {
            self.add_dependency(&edge.source, &edge.target)?;
        }
        match property {
            Some((path, prop)) => self.set_field(resource, path, prop, dep, step.direction),
            None => Ok(resource.clone()),
        }
    }

    /// Point `resource#path` at `field_res`. A scalar replaces (and
    /// disconnects) its previous value; a collection gains the id once.
    /// Returns the resource's id, which changes when the property is its
    /// namespace.
    pub(crate) fn set_field(
        &mut self,
        resource: &ResourceId,
        path: &str,
        prop: &PropertyTemplate,
        field_res: &ResourceId,
        direction: Direction,
    ) -> Result<ResourceId, Error> {
        let current = self
            .solution
            .vertex(resource)
            .ok_or_else(|| Error::MissingResource(resource.clone()))?
            .get_property(path)
            .cloned();
        let field_value = Value::String(field_res.to_string());

        if prop.property_type.is_collection() {
            if current
                .as_ref()
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(&field_value))
            {
                return Ok(resource.clone());
            }
            let res = self
                .solution
                .vertex_mut(resource)
                .ok_or_else(|| Error::MissingResource(resource.clone()))?;
            res.append_property(path, Value::Array(vec![field_value]), true)
                .map_err(Error::Config)?;
            info!("Appended field {}#{} with {}", resource, path, field_res);
            return Ok(resource.clone());
        }

        let old = current.as_ref().map(referenced_ids).unwrap_or_default();
        if let Some(old) = old.into_iter().find(|o| o != field_res) {
            let (s, t) = match direction {
                Direction::Upstream => (&old, resource),
                Direction::Downstream => (resource, &old),
            };
            if self.solution.has_edge(s, t) {
                self.remove_dependency(s, t)?;
            }
            info!("Removing old field value for '{}' ({}) for {}", path, old, field_res);
        }
        self.set_value(resource, path, field_value)?;
        info!("Set field {}#{} to {}", resource, path, field_res);

        if prop.namespace {
            let mut new_id = resource.clone();
            new_id.namespace = field_res.name.clone();
            if &new_id != resource {
                self.update_id(resource, &new_id)?;
                return Ok(new_id);
            }
        }
        Ok(resource.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::KnowledgeBase;
    use serde_json::json;

    const KB: &str = r#"
resources:
  - qualified_type_name: p:fn
    properties:
      Role:
        type: resource(p:role)
      Queues:
        type: list(resource(p:queue))
      Tags:
        type: set(string)
      Memory:
        type: number
  - qualified_type_name: p:role
  - qualified_type_name: p:queue
  - qualified_type_name: p:vpc
  - qualified_type_name: p:subnet
    properties:
      Vpc:
        type: resource(p:vpc)
        namespace: true
edges:
  - source: p:fn
    target: p:role
  - source: p:fn
    target: p:queue
  - source: p:subnet
    target: p:vpc
"#;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn eval(resources: &[&str]) -> Evaluator {
        let kb = Arc::new(KnowledgeBase::from_yaml(KB).unwrap());
        let mut eval = Evaluator::new(kb);
        for r in resources {
            eval.solution.add_vertex(Resource::new(id(r))).unwrap();
        }
        eval
    }

    fn prop(eval: &Evaluator, res: &str, path: &str) -> PropertyTemplate {
        eval.kb
            .get_resource_template(&id(res))
            .unwrap()
            .get_property(path)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_ig050_configure_set_add_remove() {
        let mut eval = eval(&["p:fn:f"]);
        let f = id("p:fn:f");
        let data = TemplateData::for_resource(&f);
        eval.configure_resource(&f, "Memory", &json!("256"), ConfigAction::Set, &data)
            .unwrap();
        eval.configure_resource(&f, "Tags", &json!("a"), ConfigAction::Add, &data)
            .unwrap();
        eval.configure_resource(&f, "Tags", &json!(["a", "b"]), ConfigAction::Add, &data)
            .unwrap();
        eval.configure_resource(&f, "Tags", &json!("a"), ConfigAction::Remove, &data)
            .unwrap();
        let res = eval.solution.vertex(&f).unwrap();
        assert_eq!(res.get_property("Memory"), Some(&json!(256)));
        assert_eq!(res.get_property("Tags"), Some(&json!(["b"])));
        assert!(eval
            .configure_resource(&f, "Nope", &json!(1), ConfigAction::Set, &data)
            .is_err());
    }

    #[test]
    fn test_ig050_configure_resource_value_adds_edge() {
        let mut eval = eval(&["p:fn:f", "p:role:r"]);
        let f = id("p:fn:f");
        let data = TemplateData::for_resource(&f);
        eval.configure_resource(&f, "Role", &json!("p:role:r"), ConfigAction::Set, &data)
            .unwrap();
        assert!(eval.solution.has_edge(&f, &id("p:role:r")));
        // references must exist
        assert!(eval
            .configure_resource(&f, "Role", &json!("p:role:missing"), ConfigAction::Set, &data)
            .is_err());
    }

    #[test]
    fn test_ig050_namespace_property_renames() {
        let mut eval = eval(&["p:subnet:s", "p:vpc:main"]);
        let s = id("p:subnet:s");
        let data = TemplateData::for_resource(&s);
        eval.configure_resource(&s, "Vpc", &json!("p:vpc:main"), ConfigAction::Set, &data)
            .unwrap();
        let renamed = id("p:subnet:main:s");
        assert!(eval.solution.contains(&renamed));
        assert!(!eval.solution.contains(&s));
        assert_eq!(eval.current_id(&s), renamed);
        assert!(eval.solution.has_edge(&renamed, &id("p:vpc:main")));
    }

    #[test]
    fn test_ig050_step_reuses_then_creates() {
        let mut eval = eval(&["p:fn:f", "p:queue:existing"]);
        let step: OperationalStep = serde_yaml_ng::from_str(
            "direction: downstream\nresources: [p:queue]\nnum_needed: 2\n",
        )
        .unwrap();
        let f = id("p:fn:f");
        let queues = prop(&eval, "p:fn", "Queues");
        eval.handle_step(&TemplateData::for_resource(&f), &step, Some(("Queues", &queues)))
            .unwrap();
        let res = eval.solution.vertex(&f).unwrap();
        assert_eq!(
            res.get_property("Queues"),
            Some(&json!(["p:queue:existing", "p:queue:queue-1"]))
        );
        assert!(eval.solution.has_edge(&f, &id("p:queue:queue-1")));
    }

    #[test]
    fn test_ig050_unique_step_names_after_owner() {
        let mut eval = eval(&["p:fn:f", "p:role:shared"]);
        let step: OperationalStep = serde_yaml_ng::from_str(
            "direction: downstream\nresources: [p:role]\nunique: true\n",
        )
        .unwrap();
        let f = id("p:fn:f");
        let role = prop(&eval, "p:fn", "Role");
        eval.handle_step(&TemplateData::for_resource(&f), &step, Some(("Role", &role)))
            .unwrap();
        let res = eval.solution.vertex(&f).unwrap();
        assert_eq!(res.get_property("Role"), Some(&json!("p:role:role-f-1")));
    }

    #[test]
    fn test_ig050_fail_if_missing() {
        let mut eval = eval(&["p:fn:f"]);
        let step: OperationalStep = serde_yaml_ng::from_str(
            "direction: downstream\nresources: [p:role]\nfail_if_missing: true\n",
        )
        .unwrap();
        let err = eval
            .handle_step(&TemplateData::for_resource(&id("p:fn:f")), &step, None)
            .unwrap_err();
        assert!(err.to_string().contains("missing when required"));
    }

    #[test]
    fn test_ig050_scalar_field_replaces_old_value() {
        let mut eval = eval(&["p:fn:f", "p:role:a", "p:role:b"]);
        let f = id("p:fn:f");
        let role = prop(&eval, "p:fn", "Role");
        eval.solution.add_edge(&f, &id("p:role:a")).unwrap();
        eval.solution
            .vertex_mut(&f)
            .unwrap()
            .set_property("Role", json!("p:role:a"))
            .unwrap();
        eval.set_field(&f, "Role", &role, &id("p:role:b"), Direction::Downstream)
            .unwrap();
        assert!(!eval.solution.has_edge(&f, &id("p:role:a")));
        assert_eq!(
            eval.solution.vertex(&f).unwrap().get_property("Role"),
            Some(&json!("p:role:b"))
        );
    }

    #[test]
    fn test_ig050_referenced_ids() {
        assert_eq!(referenced_ids(&json!("p:a:x")), vec![id("p:a:x")]);
        assert_eq!(referenced_ids(&json!(["p:a:x", "plain", 3])), vec![id("p:a:x")]);
        assert!(referenced_ids(&json!("p:a")).is_empty());
    }
}
