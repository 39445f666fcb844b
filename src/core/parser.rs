//! IG-005: YAML parsing and validation of input graphs.
//!
//! An input graph lists resources, edges between them and property
//! constraints. Structural checks:
//! - resource ids must be unique and fully named
//! - edge endpoints must be declared resources
//! - constraint targets must be declared resources

use super::constraints::Constraints;
use super::types::{Resource, SimpleEdge};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// User-authored graph handed to the resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputGraph {
    /// Resources to start from
    #[serde(default)]
    pub resources: Vec<Resource>,

    /// Edges in `source -> target` form
    #[serde(default)]
    pub edges: Vec<SimpleEdge>,

    /// Property constraints
    #[serde(default)]
    pub constraints: Constraints,
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse an input graph file from disk.
pub fn parse_input_file(path: &Path) -> Result<InputGraph, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_input(&content)
}

/// Parse an input graph from a string.
pub fn parse_input(yaml: &str) -> Result<InputGraph, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed input graph. Returns a list of errors (empty = valid).
pub fn validate_input(input: &InputGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();

    for res in &input.resources {
        if res.id.name.is_empty() {
            errors.push(ValidationError {
                message: format!("resource '{}' has no name", res.id),
            });
        }
        if !seen.insert(&res.id) {
            errors.push(ValidationError {
                message: format!("resource '{}' declared more than once", res.id),
            });
        }
        if !res.properties.is_object() {
            errors.push(ValidationError {
                message: format!("resource '{}' properties must be a map", res.id),
            });
        }
    }

    for edge in &input.edges {
        for end in [&edge.source, &edge.target] {
            if !seen.contains(end) {
                errors.push(ValidationError {
                    message: format!("edge '{}' references unknown resource '{}'", edge, end),
                });
            }
        }
        if edge.source == edge.target {
            errors.push(ValidationError {
                message: format!("edge '{}' is a self loop", edge),
            });
        }
    }

    for c in &input.constraints.resources {
        if !seen.contains(&c.target) {
            errors.push(ValidationError {
                message: format!(
                    "constraint on '{}#{}' targets unknown resource",
                    c.target, c.property
                ),
            });
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
resources:
  - id: p:a:api
    properties:
      Name: api
  - id: p:c:db
    imported: true
edges:
  - p:a:api -> p:c:db
constraints:
  resources:
    - operator: equals
      target: p:a:api
      property: Name
      value: api2
"#;

    #[test]
    fn test_ig005_parse_valid() {
        let input = parse_input(VALID).unwrap();
        assert_eq!(input.resources.len(), 2);
        assert_eq!(input.edges.len(), 1);
        assert!(input.resources[1].imported);
        assert!(validate_input(&input).is_empty());
    }

    #[test]
    fn test_ig005_unknown_edge_endpoint() {
        let yaml = r#"
resources:
  - id: p:a:api
edges:
  - p:a:api -> p:c:missing
"#;
        let input = parse_input(yaml).unwrap();
        let errors = validate_input(&input);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unknown resource"));
    }

    #[test]
    fn test_ig005_duplicate_and_unnamed() {
        let yaml = r#"
resources:
  - id: p:a:x
  - id: p:a:x
  - id: p:a
"#;
        let input = parse_input(yaml).unwrap();
        let errors = validate_input(&input);
        assert!(errors.iter().any(|e| e.message.contains("more than once")));
        assert!(errors.iter().any(|e| e.message.contains("has no name")));
    }

    #[test]
    fn test_ig005_bad_edge_syntax() {
        let yaml = "edges:\n  - p:a:x p:b:y\n";
        assert!(parse_input(yaml).is_err());
    }

    #[test]
    fn test_ig005_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.yaml");
        std::fs::write(&path, VALID).unwrap();
        let input = parse_input_file(&path).unwrap();
        assert_eq!(input.resources[0].id.to_string(), "p:a:api");
        assert!(parse_input_file(&dir.path().join("missing.yaml")).is_err());
    }
}
