//! Solving an input graph against a knowledge base.
//!
//! [`solve`] seeds an [`eval::Evaluator`] with the input resources, edges and
//! constraints, runs it to a fixpoint and hands back the grown graph together
//! with every decision taken on the way.

pub mod consumption;
pub mod error;
pub mod eval;
pub mod operational_rule;
pub mod path_selection;
pub mod view;

pub use error::Error;

use crate::core::graph::SolutionGraph;
use crate::core::parser::{validate_input, InputGraph};
use crate::core::types::{Resource, ResourceId, SimpleEdge};
use crate::kb::KnowledgeBase;
use eval::Evaluator;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use view::OperationalView;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Where `property_deps.dot` and `exec_order.txt` are written
    pub debug_dir: Option<PathBuf>,
}

/// One change made to the solution, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    AddResource {
        resource: ResourceId,
    },
    RemoveResource {
        resource: ResourceId,
    },
    AddDependency {
        edge: SimpleEdge,
    },
    RemoveDependency {
        edge: SimpleEdge,
    },
    SetProperty {
        resource: ResourceId,
        property: String,
        value: Value,
    },
    /// Non-fatal: an invalid value is reported here, not as an error.
    PropertyValidation {
        resource: ResourceId,
        property: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug)]
pub struct Solution {
    pub graph: SolutionGraph,
    pub decisions: Vec<Decision>,
}

#[derive(Serialize)]
struct SolutionDocument<'a> {
    resources: Vec<&'a Resource>,
    edges: Vec<SimpleEdge>,
    decisions: &'a [Decision],
}

impl Solution {
    /// Validation decisions that carry an error.
    pub fn validation_errors(&self) -> impl Iterator<Item = &Decision> {
        self.decisions
            .iter()
            .filter(|d| matches!(d, Decision::PropertyValidation { error: Some(_), .. }))
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        let doc = SolutionDocument {
            resources: self.graph.resources().collect(),
            edges: self.graph.edges(),
            decisions: &self.decisions,
        };
        serde_yaml_ng::to_string(&doc).map_err(|e| Error::Config(format!("YAML render error: {}", e)))
    }
}

/// Grow `input` until every property, edge and expansion is resolved.
pub fn solve(kb: Arc<KnowledgeBase>, input: InputGraph, config: EngineConfig) -> Result<Solution, Error> {
    let problems = validate_input(&input);
    if !problems.is_empty() {
        let errs = problems
            .into_iter()
            .map(|p| Error::Config(p.to_string()))
            .collect();
        return Err(Error::Multiple(errs));
    }

    let mut eval = Evaluator::new(kb)
        .with_config(config)
        .with_constraints(input.constraints);
    for res in input.resources {
        eval.add_resource(res)?;
    }
    for edge in &input.edges {
        eval.add_dependency(&edge.source, &edge.target)?;
    }
    eval.evaluate()?;

    let (graph, decisions) = eval.into_parts();
    info!(
        "Solved {} resources and {} edges with {} decisions",
        graph.len(),
        graph.edges().len(),
        decisions.len()
    );
    Ok(Solution { graph, decisions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_input;
    use crate::kb::tests::NETWORK_KB;
    use serde_json::json;

    const KB: &str = r#"
resources:
  - qualified_type_name: p:fn
    properties:
      Memory:
        type: number
        default_value: 128
  - qualified_type_name: p:db
    properties:
      Port:
        type: number
        default_value: 5432
edges:
  - source: p:fn
    target: p:db
"#;

    fn kb(yaml: &str) -> Arc<KnowledgeBase> {
        Arc::new(KnowledgeBase::from_yaml(yaml).unwrap())
    }

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn test_ig030_solve_applies_defaults_and_edges() {
        let input = parse_input(
            r#"
resources:
  - id: p:fn:api
  - id: p:db:main
edges:
  - p:fn:api -> p:db:main
"#,
        )
        .unwrap();
        let solution = solve(kb(KB), input, EngineConfig::default()).unwrap();
        assert!(solution.graph.has_edge(&id("p:fn:api"), &id("p:db:main")));
        let f = solution.graph.vertex(&id("p:fn:api")).unwrap();
        assert_eq!(f.get_property("Memory"), Some(&json!(128)));
        assert_eq!(solution.validation_errors().count(), 0);
    }

    #[test]
    fn test_ig030_solve_honours_constraints() {
        let input = parse_input(
            r#"
resources:
  - id: p:fn:api
constraints:
  resources:
    - operator: equals
      target: p:fn:api
      property: Memory
      value: 512
"#,
        )
        .unwrap();
        let solution = solve(kb(KB), input, EngineConfig::default()).unwrap();
        let f = solution.graph.vertex(&id("p:fn:api")).unwrap();
        assert_eq!(f.get_property("Memory"), Some(&json!(512)));
    }

    #[test]
    fn test_ig030_solve_rejects_invalid_input() {
        let input = parse_input(
            r#"
resources:
  - id: p:fn:api
edges:
  - p:fn:api -> p:db:missing
"#,
        )
        .unwrap();
        let err = solve(kb(KB), input, EngineConfig::default()).unwrap_err();
        assert!(err.to_string().contains("unknown resource 'p:db:missing'"));
    }

    #[test]
    fn test_ig038_solve_expands_untemplated_edge() {
        let input = parse_input(
            r#"
resources:
  - id: p:a:src
  - id: p:c:dst
edges:
  - p:a:src -> p:c:dst
"#,
        )
        .unwrap();
        let solution = solve(kb(NETWORK_KB), input, EngineConfig::default()).unwrap();
        assert!(!solution.graph.has_edge(&id("p:a:src"), &id("p:c:dst")));
        assert!(solution.graph.len() > 2);
    }

    #[test]
    fn test_ig030_solution_yaml_lists_decisions() {
        let input = parse_input("resources:\n  - id: p:db:main\n").unwrap();
        let solution = solve(kb(KB), input, EngineConfig::default()).unwrap();
        let yaml = solution.to_yaml().unwrap();
        assert!(yaml.contains("decision: add_resource"));
        assert!(yaml.contains("resource: p:db:main"));
        assert!(yaml.contains("Port: 5432"));
    }
}
