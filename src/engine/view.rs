//! IG-047: Operational view of the solution.
//!
//! Every structural change made while solving goes through this trait so
//! the evaluation graph grows and shrinks with the solution and each change
//! lands in the decision log.

use crate::core::types::{Resource, ResourceId, SimpleEdge};
use crate::engine::eval::Evaluator;
use crate::engine::{Decision, Error};
use tracing::debug;

pub trait OperationalView {
    /// Add a resource and schedule its properties and rules.
    fn add_resource(&mut self, res: Resource) -> Result<(), Error>;

    /// Add `source -> target`. Edges without a template are expanded into
    /// a path instead of being added directly.
    fn add_dependency(&mut self, source: &ResourceId, target: &ResourceId) -> Result<(), Error>;

    fn remove_resource(&mut self, id: &ResourceId) -> Result<(), Error>;

    fn remove_dependency(&mut self, source: &ResourceId, target: &ResourceId) -> Result<(), Error>;

    fn update_resource_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<(), Error>;

    fn make_resources_operational(&mut self, ids: &[ResourceId]) -> Result<(), Error>;

    fn make_edges_operational(&mut self, edges: &[SimpleEdge]) -> Result<(), Error>;
}

impl OperationalView for Evaluator {
    fn add_resource(&mut self, res: Resource) -> Result<(), Error> {
        let id = res.id.clone();
        self.solution.add_vertex(res).map_err(Error::Graph)?;
        self.record(Decision::AddResource {
            resource: id.clone(),
        });
        self.make_resources_operational(&[id])
    }

    fn add_dependency(&mut self, source: &ResourceId, target: &ResourceId) -> Result<(), Error> {
        let (src_imported, tgt_imported) = match (
            self.solution.vertex(source),
            self.solution.vertex(target),
        ) {
            (Some(s), Some(t)) => (s.imported, t.imported),
            (None, _) => return Err(Error::MissingResource(source.clone())),
            (_, None) => return Err(Error::MissingResource(target.clone())),
        };
        let edge = SimpleEdge::new(source.clone(), target.clone());

        if self.kb.get_edge_template(source, target).is_some()
            && self.solution.add_edge(source, target).map_err(Error::Graph)?
        {
            self.record(Decision::AddDependency { edge: edge.clone() });
        }
        if src_imported && tgt_imported {
            debug!("Both ends of {} are imported", edge);
            return Ok(());
        }
        self.make_edges_operational(&[edge])
    }

    fn remove_resource(&mut self, id: &ResourceId) -> Result<(), Error> {
        self.remove_resource_vertices(id);
        self.solution.remove_vertex(id).map_err(Error::Graph)?;
        self.record(Decision::RemoveResource {
            resource: id.clone(),
        });
        Ok(())
    }

    fn remove_dependency(&mut self, source: &ResourceId, target: &ResourceId) -> Result<(), Error> {
        let edge = SimpleEdge::new(source.clone(), target.clone());
        if self.solution.has_edge(source, target) {
            self.solution
                .remove_edge(source, target)
                .map_err(Error::Graph)?;
            self.record(Decision::RemoveDependency { edge: edge.clone() });
        }
        self.remove_edge_vertices(&edge);
        Ok(())
    }

    fn update_resource_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<(), Error> {
        self.update_id(old, new)
    }

    fn make_resources_operational(&mut self, ids: &[ResourceId]) -> Result<(), Error> {
        self.add_resources(ids)
    }

    fn make_edges_operational(&mut self, edges: &[SimpleEdge]) -> Result<(), Error> {
        self.add_edges(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PropertyRef;
    use crate::engine::eval::vertex::Key;
    use crate::kb::KnowledgeBase;
    use std::sync::Arc;

    const KB: &str = r#"
resources:
  - qualified_type_name: p:fn
    properties:
      Name:
        type: string
  - qualified_type_name: p:db
    properties:
      Name:
        type: string
edges:
  - source: p:fn
    target: p:db
"#;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn eval() -> Evaluator {
        Evaluator::new(Arc::new(KnowledgeBase::from_yaml(KB).unwrap()))
    }

    #[test]
    fn test_ig047_add_resource_records_and_schedules() {
        let mut eval = eval();
        eval.add_resource(Resource::new(id("p:fn:f"))).unwrap();
        assert!(eval.solution.contains(&id("p:fn:f")));
        assert!(matches!(
            eval.decisions.as_slice(),
            [Decision::AddResource { resource }] if resource == &id("p:fn:f")
        ));
        let name = Key::Property(PropertyRef::parse("p:fn:f#Name").unwrap());
        assert!(eval.graph.contains(&name));
        assert!(eval.add_resource(Resource::new(id("p:fn:f"))).is_err());
    }

    #[test]
    fn test_ig047_dependency_requires_both_ends() {
        let mut eval = eval();
        eval.add_resource(Resource::new(id("p:fn:f"))).unwrap();
        let err = eval
            .add_dependency(&id("p:fn:f"), &id("p:db:d"))
            .unwrap_err();
        assert_eq!(err.to_string(), "resource p:db:d not found");
    }

    #[test]
    fn test_ig047_templated_dependency_added_directly() {
        let mut eval = eval();
        eval.add_resource(Resource::new(id("p:fn:f"))).unwrap();
        eval.add_resource(Resource::new(id("p:db:d"))).unwrap();
        eval.add_dependency(&id("p:fn:f"), &id("p:db:d")).unwrap();
        assert!(eval.solution.has_edge(&id("p:fn:f"), &id("p:db:d")));
        assert!(eval
            .decisions
            .iter()
            .any(|d| matches!(d, Decision::AddDependency { .. })));
    }

    #[test]
    fn test_ig047_untemplated_dependency_left_for_expansion() {
        let mut eval = eval();
        eval.add_resource(Resource::new(id("p:fn:f"))).unwrap();
        eval.add_resource(Resource::new(id("p:db:d"))).unwrap();
        eval.add_dependency(&id("p:db:d"), &id("p:fn:f")).unwrap();
        assert!(!eval.solution.has_edge(&id("p:db:d"), &id("p:fn:f")));
    }

    #[test]
    fn test_ig047_remove_dependency_and_resource() {
        let mut eval = eval();
        eval.add_resource(Resource::new(id("p:fn:f"))).unwrap();
        eval.add_resource(Resource::new(id("p:db:d"))).unwrap();
        eval.add_dependency(&id("p:fn:f"), &id("p:db:d")).unwrap();
        eval.remove_dependency(&id("p:fn:f"), &id("p:db:d")).unwrap();
        assert!(!eval.solution.has_edge(&id("p:fn:f"), &id("p:db:d")));
        eval.remove_resource(&id("p:db:d")).unwrap();
        assert!(!eval.solution.contains(&id("p:db:d")));
        assert!(eval
            .graph
            .keys()
            .all(|k| !k.to_string().starts_with("p:db:d")));
        assert!(eval.remove_resource(&id("p:db:d")).is_err());
    }

    #[test]
    fn test_ig047_update_moves_property_vertex() {
        let mut eval = eval();
        eval.add_resource(Resource::new(id("p:fn:old"))).unwrap();
        eval.update_resource_id(&id("p:fn:old"), &id("p:fn:new")).unwrap();
        let old = Key::Property(PropertyRef::parse("p:fn:old#Name").unwrap());
        let new = Key::Property(PropertyRef::parse("p:fn:new#Name").unwrap());
        assert!(!eval.graph.contains(&old));
        assert!(eval.graph.contains(&new));
    }
}
