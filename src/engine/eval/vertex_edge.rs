//! IG-036: Edge vertices.
//!
//! Run the operational rules of an edge template. Steps run here; each
//! configuration rule is handed to the property vertex it configures so it
//! is applied when that property evaluates.

use super::capture::DependencyCapture;
use super::vertex::{Key, Vertex};
use super::Evaluator;
use crate::core::types::{PropertyRef, ResourceId, SimpleEdge};
use crate::engine::operational_rule::ConfigAction;
use crate::engine::Error;
use crate::kb::templates::{ConfigurationRule, OperationalRule};
use crate::rules::template::{self, TemplateData};
use crate::rules::DynamicContext;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EdgeVertex {
    pub edge: SimpleEdge,
    pub rules: Vec<OperationalRule>,
}

impl EdgeVertex {
    pub fn new(edge: SimpleEdge, rules: Vec<OperationalRule>) -> Self {
        EdgeVertex { edge, rules }
    }

    pub fn key(&self) -> Key {
        Key::Edge(self.edge.clone())
    }

    pub fn update_from(&mut self, other: EdgeVertex) {
        if self.edge != other.edge {
            panic!(
                "cannot merge edges with different refs: {} != {}",
                self.edge, other.edge
            );
        }
        for rule in other.rules {
            if !self.rules.contains(&rule) {
                self.rules.push(rule);
            }
        }
    }

    pub fn dependencies(&mut self, eval: &Evaluator, cap: &mut DependencyCapture) -> Result<(), Error> {
        let data = TemplateData::for_edge(&self.edge);
        for rule in &self.rules {
            cap.execute_op_rule(&data, rule);
        }

        // A redirected configuration makes an already evaluated property
        // wait for this edge. When nothing depends on that property it can
        // safely be configured out of band during evaluate, so the
        // dependency is dropped.
        let settled: Vec<Key> = cap
            .changes()
            .edges
            .keys()
            .filter(|src| {
                eval.is_evaluated(src) && eval.graph.dependents(src).next().is_none()
            })
            .cloned()
            .collect();
        for src in settled {
            cap.changes_mut().edges.remove(&src);
        }
        Ok(())
    }

    pub fn evaluate(&self, eval: &mut Evaluator) -> Result<(), Error> {
        let data = TemplateData::for_edge(&self.edge);
        let mut errs = Vec::new();
        for rule in &self.rules {
            if !rule.steps.is_empty() {
                let steps = OperationalRule {
                    if_cond: rule.if_cond.clone(),
                    steps: rule.steps.clone(),
                    configuration_rules: Vec::new(),
                };
                if let Err(e) = eval.handle_operational_rule(&data, &steps, ConfigAction::Add) {
                    errs.push(Error::Config(format!(
                        "could not apply edge {} operational rule: {}",
                        self.edge, e
                    )));
                    continue;
                }
            }
            if rule.configuration_rules.is_empty() {
                continue;
            }

            let out_of_band = match self.attach_configuration_rules(eval, rule, &data) {
                Ok(c) => c,
                Err(e) => {
                    errs.push(Error::Config(format!(
                        "could not apply edge {} configuration rule: {}",
                        self.edge, e
                    )));
                    continue;
                }
            };
            for (resource, configs) in out_of_band {
                let rule = OperationalRule {
                    if_cond: rule.if_cond.clone(),
                    steps: Vec::new(),
                    configuration_rules: configs,
                };
                let data = TemplateData::for_resource(&resource).with_edge(&self.edge);
                if let Err(e) = eval.handle_operational_rule(&data, &rule, ConfigAction::Add) {
                    errs.push(Error::Config(format!(
                        "could not apply edge {} (res: {}) operational rule: {}",
                        self.edge, resource, e
                    )));
                }
            }
        }
        Error::join(errs)?;

        let source = eval.current_id(&self.edge.source);
        let target = eval.current_id(&self.edge.target);
        eval.consume(&source, &target)
    }

    /// Attach each configuration rule to its property vertex. Rules whose
    /// property already evaluated are returned for immediate application,
    /// provided nothing evaluated depends on that property.
    fn attach_configuration_rules(
        &self,
        eval: &mut Evaluator,
        rule: &OperationalRule,
        data: &TemplateData,
    ) -> Result<BTreeMap<ResourceId, Vec<ConfigurationRule>>, Error> {
        let mut out_of_band: BTreeMap<ResourceId, Vec<ConfigurationRule>> = BTreeMap::new();
        let mut errs = Vec::new();
        for config in &rule.configuration_rules {
            let reference = match decode_reference(eval, config, data) {
                Ok(r) => r,
                Err(e) => {
                    errs.push(e);
                    continue;
                }
            };
            let key = Key::Property(reference.clone());
            if !eval.graph.contains(&key) {
                errs.push(Error::Graph(format!("no vertex for {}", key)));
                continue;
            }

            if eval.is_evaluated(&key) {
                let evaluated_dependents: Vec<String> = eval
                    .graph
                    .dependents(&key)
                    .filter(|d| eval.is_evaluated(d))
                    .map(|d| format!("\"{}\"", d))
                    .collect();
                if evaluated_dependents.is_empty() {
                    debug!("Allowing config on {} to be evaluated due to no dependents", key);
                    out_of_band
                        .entry(reference.resource)
                        .or_default()
                        .push(config.clone());
                } else {
                    errs.push(Error::EvaluatedNode(format!(
                        "{}: evaluated dependents: {}",
                        reference,
                        evaluated_dependents.join(", ")
                    )));
                }
                continue;
            }

            match eval.graph.get_mut(&key) {
                Some(Vertex::Property(pv)) => {
                    pv.edge_rules
                        .entry(self.edge.clone())
                        .or_default()
                        .push(OperationalRule {
                            if_cond: rule.if_cond.clone(),
                            steps: Vec::new(),
                            configuration_rules: vec![config.clone()],
                        });
                }
                _ => errs.push(Error::Graph(format!(
                    "existing vertex for {} is not a property vertex",
                    reference
                ))),
            }
        }
        Error::join(errs)?;
        Ok(out_of_band)
    }
}

fn decode_reference(
    eval: &Evaluator,
    config: &ConfigurationRule,
    data: &TemplateData,
) -> Result<PropertyRef, Error> {
    let mut ctx = DynamicContext::new(&eval.solution, &eval.kb);
    let resource = template::execute_decode_id(&mut ctx, &config.resource, data).map_err(|e| {
        Error::Template(format!("could not decode resource for {}: {}", config.resource, e))
    })?;
    let field = template::execute(&mut ctx, &config.configuration.field, data)
        .map(|v| template::render(&v))
        .map_err(|e| {
            Error::Template(format!(
                "could not decode property for {}: {}",
                config.configuration.field, e
            ))
        })?;
    Ok(PropertyRef::new(eval.current_id(&resource), &field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Resource;
    use crate::engine::eval::vertex_property::PropertyVertex;
    use crate::kb::KnowledgeBase;
    use serde_json::json;
    use std::sync::Arc;

    const KB: &str = r#"
resources:
  - qualified_type_name: p:fn
    properties:
      Vpc:
        type: resource(p:vpc)
  - qualified_type_name: p:vpc
edges:
  - source: p:fn
    target: p:vpc
    operational_rules:
      - configuration_rules:
          - resource: "{{ .Source }}"
            configuration:
              field: Vpc
              value: "{{ .Target }}"
"#;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn setup() -> (Evaluator, EdgeVertex) {
        let kb = Arc::new(KnowledgeBase::from_yaml(KB).unwrap());
        let mut eval = Evaluator::new(kb);
        eval.solution.add_vertex(Resource::new(id("p:fn:f"))).unwrap();
        eval.solution.add_vertex(Resource::new(id("p:vpc:v"))).unwrap();
        let edge = SimpleEdge::new(id("p:fn:f"), id("p:vpc:v"));
        let rules = eval
            .kb
            .get_edge_template(&edge.source, &edge.target)
            .unwrap()
            .operational_rules
            .clone();
        (eval, EdgeVertex::new(edge, rules))
    }

    #[test]
    fn test_ig036_config_rule_attaches_to_pending_property() {
        let (mut eval, ev) = setup();
        let key = Key::Property(PropertyRef::new(id("p:fn:f"), "Vpc"));
        let pv = PropertyVertex::new(PropertyRef::new(id("p:fn:f"), "Vpc"), None);
        eval.graph.add(key.clone(), Vertex::Property(pv)).unwrap();
        eval.unevaluated.add(key.clone(), ()).unwrap();

        ev.evaluate(&mut eval).unwrap();
        let Some(Vertex::Property(pv)) = eval.graph.get(&key) else {
            panic!("property vertex missing");
        };
        assert_eq!(pv.edge_rules.get(&ev.edge).map(Vec::len), Some(1));
        // not applied yet
        let res = eval.solution.vertex(&id("p:fn:f")).unwrap();
        assert!(res.get_property("Vpc").is_none());
    }

    #[test]
    fn test_ig036_config_rule_runs_out_of_band_when_settled() {
        let (mut eval, ev) = setup();
        let key = Key::Property(PropertyRef::new(id("p:fn:f"), "Vpc"));
        let pv = PropertyVertex::new(PropertyRef::new(id("p:fn:f"), "Vpc"), None);
        // evaluated: in the graph but not pending
        eval.graph.add(key, Vertex::Property(pv)).unwrap();

        ev.evaluate(&mut eval).unwrap();
        let res = eval.solution.vertex(&id("p:fn:f")).unwrap();
        assert_eq!(res.get_property("Vpc"), Some(&json!("p:vpc:v")));
    }

    #[test]
    fn test_ig036_missing_property_vertex_errors() {
        let (mut eval, ev) = setup();
        assert!(ev.evaluate(&mut eval).is_err());
    }

    #[test]
    fn test_ig036_update_from_appends_new_rules() {
        let (_, mut ev) = setup();
        let other = ev.clone();
        ev.update_from(other);
        assert_eq!(ev.rules.len(), 1);
        let mut extra = ev.clone();
        extra.rules = vec![OperationalRule {
            if_cond: Some("{{ true }}".into()),
            ..Default::default()
        }];
        ev.update_from(extra);
        assert_eq!(ev.rules.len(), 2);
    }
}
