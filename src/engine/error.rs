//! IG-030: Engine errors.
//!
//! Every variant carries a stable `code()` so callers can branch on the
//! failure kind without matching message text.

use crate::core::types::{ResourceId, SimpleEdge};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("possible circular dependency detected in properties graph: {remaining} remaining")]
    CircularDependency { remaining: usize },

    #[error("failed to evaluate group {group}: {source}")]
    Group {
        group: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("could not evaluate {key}: {source}")]
    Vertex {
        key: String,
        #[source]
        source: Box<Error>,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error("resource {0} not found")]
    MissingResource(ResourceId),

    #[error("knowledge base: {0}")]
    KnowledgeBase(String),

    #[error("graph: {0}")]
    Graph(String),

    #[error("could not expand {edge}: {message}")]
    PathSelection { edge: SimpleEdge, message: String },

    #[error("cannot add rules to evaluated node {0}")]
    EvaluatedNode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),

    #[error("debug output: {0}")]
    Io(#[from] std::io::Error),
}

fn join_messages(errs: &[Error]) -> String {
    errs.iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Stable identifier for the failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::CircularDependency { .. } => "circular_dependency",
            Error::Group { .. } => "group_failed",
            Error::Vertex { .. } => "vertex_failed",
            Error::Template(_) => "template",
            Error::MissingResource(_) => "missing_resource",
            Error::KnowledgeBase(_) => "knowledge_base",
            Error::Graph(_) => "graph",
            Error::PathSelection { .. } => "path_selection",
            Error::EvaluatedNode(_) => "evaluated_node",
            Error::Config(_) => "config",
            Error::Multiple(_) => "multiple",
            Error::Io(_) => "io",
        }
    }

    /// Collapse collected errors: none is `Ok`, one is itself, more become
    /// `Multiple`.
    pub fn join(mut errs: Vec<Error>) -> Result<(), Error> {
        match errs.len() {
            0 => Ok(()),
            1 => Err(errs.remove(0)),
            _ => Err(Error::Multiple(errs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ig030_codes_and_messages() {
        let e = Error::CircularDependency { remaining: 3 };
        assert_eq!(e.code(), "circular_dependency");
        assert_eq!(
            e.to_string(),
            "possible circular dependency detected in properties graph: 3 remaining"
        );
    }

    #[test]
    fn test_ig030_join() {
        assert!(Error::join(Vec::new()).is_ok());
        let one = Error::join(vec![Error::Template("x".into())]).unwrap_err();
        assert_eq!(one.code(), "template");
        let many = Error::join(vec![Error::Template("a".into()), Error::Graph("b".into())])
            .unwrap_err();
        assert_eq!(many.code(), "multiple");
        assert_eq!(many.to_string(), "template error: a\ngraph: b");
    }

    #[test]
    fn test_ig030_group_wraps() {
        let e = Error::Group {
            group: 2,
            source: Box::new(Error::EvaluatedNode("p:a:x#P".into())),
        };
        assert_eq!(
            e.to_string(),
            "failed to evaluate group 2: cannot add rules to evaluated node p:a:x#P"
        );
    }
}
