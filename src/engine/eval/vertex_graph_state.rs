//! IG-034: Graph-state vertices for relational template queries.

use super::vertex::{Key, ReadyPriority};
use super::Evaluator;
use crate::core::graph::Direction;
use crate::core::types::ResourceId;
use crate::rules::DynamicContext;

/// The relation a template asked about.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphQuery {
    /// `upstream`, `downstream`, `hasUpstream`, `hasDownstream`
    First {
        name: &'static str,
        direction: Direction,
        selector: ResourceId,
        resource: ResourceId,
    },
    /// `allUpstream`, `allDownstream`
    All {
        direction: Direction,
        selector: ResourceId,
        resource: ResourceId,
    },
    Closest {
        selector: ResourceId,
        resource: ResourceId,
    },
}

impl GraphQuery {
    fn repr(&self) -> String {
        match self {
            GraphQuery::First {
                name,
                selector,
                resource,
                ..
            } => format!("{}({}, {})", name, selector, resource),
            GraphQuery::All {
                direction,
                selector,
                resource,
            } => {
                let name = match direction {
                    Direction::Upstream => "AllUpstream",
                    Direction::Downstream => "AllDownstream",
                };
                format!("{}({}, {})", name, selector, resource)
            }
            GraphQuery::Closest { selector, resource } => {
                format!("ClosestDownstream({}, {})", selector, resource)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphStateVertex {
    pub repr: String,
    pub query: GraphQuery,
}

impl GraphStateVertex {
    pub fn new(query: GraphQuery) -> Self {
        GraphStateVertex {
            repr: query.repr(),
            query,
        }
    }

    pub fn key(&self) -> Key {
        Key::GraphState(self.repr.clone())
    }

    pub fn update_from(&mut self, other: GraphStateVertex) {
        if self.repr != other.repr {
            panic!("cannot merge graph states with different reprs: {} != {}", self.repr, other.repr);
        }
    }

    /// A first-match query is ready once something matches. Set queries
    /// can always grow, so they wait until nothing else is left.
    pub fn ready(&self, eval: &Evaluator) -> ReadyPriority {
        match &self.query {
            GraphQuery::First {
                direction,
                selector,
                resource,
                ..
            } => {
                let ctx = DynamicContext::new(&eval.solution, &eval.kb);
                if ctx.first_match(selector, resource, *direction).is_zero() {
                    ReadyPriority::NotReadyMid
                } else {
                    ReadyPriority::ReadyNow
                }
            }
            GraphQuery::All { .. } => ReadyPriority::NotReadyHigh,
            GraphQuery::Closest { .. } => ReadyPriority::NotReadyMid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Resource;
    use crate::kb::KnowledgeBase;
    use std::sync::Arc;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn test_ig034_first_match_becomes_ready() {
        let kb = KnowledgeBase::from_yaml(
            "resources:\n  - qualified_type_name: p:fn\n  - qualified_type_name: p:vpc\n",
        )
        .unwrap();
        let mut eval = Evaluator::new(Arc::new(kb));
        eval.solution.add_vertex(Resource::new(id("p:fn:f"))).unwrap();
        let v = GraphStateVertex::new(GraphQuery::First {
            name: "Downstream",
            direction: Direction::Downstream,
            selector: id("p:vpc"),
            resource: id("p:fn:f"),
        });
        assert_eq!(v.key(), Key::GraphState("Downstream(p:vpc, p:fn:f)".into()));
        assert_eq!(v.ready(&eval), ReadyPriority::NotReadyMid);

        eval.solution.add_vertex(Resource::new(id("p:vpc:v"))).unwrap();
        eval.solution.add_edge(&id("p:fn:f"), &id("p:vpc:v")).unwrap();
        assert_eq!(v.ready(&eval), ReadyPriority::ReadyNow);
    }

    #[test]
    fn test_ig034_set_queries_wait() {
        let eval = Evaluator::new(Arc::new(KnowledgeBase::new()));
        let all = GraphStateVertex::new(GraphQuery::All {
            direction: Direction::Upstream,
            selector: id("p:fn"),
            resource: id("p:vpc:v"),
        });
        assert_eq!(all.repr, "AllUpstream(p:fn, p:vpc:v)");
        assert_eq!(all.ready(&eval), ReadyPriority::NotReadyHigh);
        let closest = GraphStateVertex::new(GraphQuery::Closest {
            selector: id("p:fn"),
            resource: id("p:vpc:v"),
        });
        assert_eq!(closest.ready(&eval), ReadyPriority::NotReadyMid);
    }
}
