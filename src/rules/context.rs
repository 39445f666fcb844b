//! IG-021: Template functions backed by the live solution graph.

use super::template::TemplateFunctions;
use crate::core::graph::{DependencyLayer, Direction, SolutionGraph};
use crate::core::path::PropertyPath;
use crate::core::types::ResourceId;
use crate::kb::KnowledgeBase;
use serde_json::Value;

/// Read-only view of the solution for rule execution.
pub struct DynamicContext<'a> {
    pub graph: &'a SolutionGraph,
    pub kb: &'a KnowledgeBase,
}

impl<'a> DynamicContext<'a> {
    pub fn new(graph: &'a SolutionGraph, kb: &'a KnowledgeBase) -> Self {
        DynamicContext { graph, kb }
    }

    /// Resources related to `resource` in `dir` at `layer`, breadth-first.
    pub fn layered(
        &self,
        resource: &ResourceId,
        dir: Direction,
        layer: DependencyLayer,
    ) -> Vec<ResourceId> {
        let kb = self.kb;
        self.graph
            .walk(resource, dir, layer, &|id| kb.is_functional(id))
    }

    /// First match of `selector` in `dir` within the first-functional
    /// layer, or a zero id.
    pub fn first_match(
        &self,
        selector: &ResourceId,
        resource: &ResourceId,
        dir: Direction,
    ) -> ResourceId {
        self.layered(resource, dir, DependencyLayer::FirstFunctional)
            .into_iter()
            .find(|id| selector.matches(id))
            .unwrap_or_default()
    }

    fn all_matches(&self, selector: &ResourceId, resource: &ResourceId, dir: Direction) -> Vec<ResourceId> {
        self.layered(resource, dir, DependencyLayer::All)
            .into_iter()
            .filter(|id| selector.matches(id))
            .collect()
    }
}

impl TemplateFunctions for DynamicContext<'_> {
    fn field_value(&mut self, field: &str, resource: &ResourceId) -> Result<Value, String> {
        let res = self
            .graph
            .vertex(resource)
            .ok_or_else(|| format!("resource '{}' not found", resource))?;
        let path = PropertyPath::parse(field)?;
        path.get(&res.properties)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| format!("field '{}' not found on resource '{}'", field, resource))
    }

    fn has_field(&mut self, field: &str, resource: &ResourceId) -> Result<bool, String> {
        let res = self
            .graph
            .vertex(resource)
            .ok_or_else(|| format!("resource '{}' not found", resource))?;
        Ok(res.get_property(field).is_some())
    }

    fn upstream(&mut self, selector: &ResourceId, resource: &ResourceId) -> Result<ResourceId, String> {
        let up = self.first_match(selector, resource, Direction::Upstream);
        if up.is_zero() {
            return Err(format!(
                "no upstream resource of '{}' found matching selector '{}'",
                resource, selector
            ));
        }
        Ok(up)
    }

    fn downstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<ResourceId, String> {
        let down = self.first_match(selector, resource, Direction::Downstream);
        if down.is_zero() {
            return Err(format!(
                "no downstream resource of '{}' found matching selector '{}'",
                resource, selector
            ));
        }
        Ok(down)
    }

    fn has_upstream(&mut self, selector: &ResourceId, resource: &ResourceId) -> Result<bool, String> {
        Ok(!self.first_match(selector, resource, Direction::Upstream).is_zero())
    }

    fn has_downstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<bool, String> {
        Ok(!self.first_match(selector, resource, Direction::Downstream).is_zero())
    }

    fn all_upstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<Vec<ResourceId>, String> {
        Ok(self.all_matches(selector, resource, Direction::Upstream))
    }

    fn all_downstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<Vec<ResourceId>, String> {
        Ok(self.all_matches(selector, resource, Direction::Downstream))
    }

    fn closest_downstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<ResourceId, String> {
        self.all_matches(selector, resource, Direction::Downstream)
            .into_iter()
            .next()
            .ok_or_else(|| {
                format!(
                    "no downstream resource of '{}' found matching selector '{}'",
                    resource, selector
                )
            })
    }
}
