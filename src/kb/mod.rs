//! IG-012: Knowledge base of resource and edge templates.
//!
//! Read-only after load. Lookups are by qualified type name; the type graph
//! (one node per resource template, one edge per edge template) backs path
//! enumeration.

pub mod properties;
pub mod templates;

use crate::core::types::{Resource, ResourceId};
use petgraph::algo::all_simple_paths;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use templates::{
    EdgePathSatisfaction, EdgeTemplate, Functionality, PathSatisfactionRoute, ResourceTemplate,
};

#[derive(Debug, Default, Deserialize)]
struct KnowledgeBaseFile {
    #[serde(default)]
    resources: Vec<ResourceTemplate>,
    #[serde(default)]
    edges: Vec<EdgeTemplate>,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    resources: BTreeMap<String, ResourceTemplate>,
    edges: BTreeMap<(String, String), EdgeTemplate>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a knowledge base file from disk.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::from_yaml(&content)
    }

    /// Parse a knowledge base from YAML (`resources:` and `edges:` lists).
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        let file: KnowledgeBaseFile =
            serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))?;
        let mut kb = KnowledgeBase::new();
        for t in file.resources {
            kb.add_resource_template(t)?;
        }
        for e in file.edges {
            kb.add_edge_template(e)?;
        }
        Ok(kb)
    }

    pub fn add_resource_template(&mut self, mut t: ResourceTemplate) -> Result<(), String> {
        let id = t.id()?;
        if !id.name.is_empty() {
            return Err(format!(
                "template type '{}' must be provider:type",
                t.qualified_type_name
            ));
        }
        t.finalize();
        self.resources.insert(id.qualified_type_name(), t);
        Ok(())
    }

    pub fn add_edge_template(&mut self, e: EdgeTemplate) -> Result<(), String> {
        let key = (e.source.qualified_type_name(), e.target.qualified_type_name());
        for end in [&key.0, &key.1] {
            if !self.resources.contains_key(end) {
                return Err(format!(
                    "edge template {} -> {} references unknown type {}",
                    key.0, key.1, end
                ));
            }
        }
        self.edges.insert(key, e);
        Ok(())
    }

    pub fn list_resources(&self) -> impl Iterator<Item = &ResourceTemplate> {
        self.resources.values()
    }

    pub fn list_edges(&self) -> impl Iterator<Item = &EdgeTemplate> {
        self.edges.values()
    }

    pub fn get_resource_template(&self, id: &ResourceId) -> Result<&ResourceTemplate, String> {
        self.resources
            .get(&id.qualified_type_name())
            .ok_or_else(|| format!("no resource template for {}", id.qualified_type_name()))
    }

    pub fn get_edge_template(
        &self,
        source: &ResourceId,
        target: &ResourceId,
    ) -> Option<&EdgeTemplate> {
        self.edges
            .get(&(source.qualified_type_name(), target.qualified_type_name()))
    }

    /// Functionality of a resource; unknown types count as glue.
    pub fn get_functionality(&self, id: &ResourceId) -> Functionality {
        self.get_resource_template(id)
            .map(|t| t.get_functionality())
            .unwrap_or(Functionality::Unknown)
    }

    pub fn is_functional(&self, id: &ResourceId) -> bool {
        self.get_functionality(id) != Functionality::Unknown
    }

    /// Pair the source's `as_source` routes with the target's `as_target`
    /// routes by classification. A route without a partner is paired with a
    /// plain route of the same classification. With no routes at all, a
    /// single unclassified satisfaction is returned.
    pub fn get_path_satisfactions_from_edge(
        &self,
        source: &ResourceId,
        target: &ResourceId,
    ) -> Result<Vec<EdgePathSatisfaction>, String> {
        let src = self.get_resource_template(source)?;
        let tgt = self.get_resource_template(target)?;
        let plain = |c: &str| PathSatisfactionRoute {
            classification: c.to_string(),
            ..Default::default()
        };

        let mut result = Vec::new();
        for s in &src.path_satisfaction.as_source {
            let partners: Vec<&PathSatisfactionRoute> = tgt
                .path_satisfaction
                .as_target
                .iter()
                .filter(|t| t.classification == s.classification)
                .collect();
            if partners.is_empty() {
                result.push(EdgePathSatisfaction {
                    classification: s.classification.clone(),
                    source: s.clone(),
                    target: plain(&s.classification),
                });
            }
            for t in partners {
                result.push(EdgePathSatisfaction {
                    classification: s.classification.clone(),
                    source: s.clone(),
                    target: t.clone(),
                });
            }
        }
        for t in &tgt.path_satisfaction.as_target {
            let paired = src
                .path_satisfaction
                .as_source
                .iter()
                .any(|s| s.classification == t.classification);
            if !paired {
                result.push(EdgePathSatisfaction {
                    classification: t.classification.clone(),
                    source: plain(&t.classification),
                    target: t.clone(),
                });
            }
        }
        if result.is_empty() {
            result.push(EdgePathSatisfaction::default());
        }
        result.sort();
        result.dedup();
        Ok(result)
    }

    /// Every simple path between two types in the type graph, shortest
    /// first then by type names.
    pub fn all_paths(
        &self,
        from: &ResourceId,
        to: &ResourceId,
    ) -> Result<Vec<Vec<&ResourceTemplate>>, String> {
        let from_name = from.qualified_type_name();
        let to_name = to.qualified_type_name();
        self.get_resource_template(from)?;
        self.get_resource_template(to)?;
        if from_name == to_name {
            return Ok(Vec::new());
        }

        let mut g: DiGraph<&str, ()> = DiGraph::new();
        let mut index: BTreeMap<&str, NodeIndex> = BTreeMap::new();
        for name in self.resources.keys() {
            index.insert(name, g.add_node(name));
        }
        for (s, t) in self.edges.keys() {
            if let (Some(&a), Some(&b)) = (index.get(s.as_str()), index.get(t.as_str())) {
                g.add_edge(a, b, ());
            }
        }
        let (Some(&a), Some(&b)) = (index.get(from_name.as_str()), index.get(to_name.as_str()))
        else {
            return Ok(Vec::new());
        };

        let mut paths: Vec<Vec<&str>> = all_simple_paths::<Vec<NodeIndex>, _>(&g, a, b, 0, None)
            .map(|p| p.into_iter().map(|n| g[n]).collect())
            .collect();
        paths.sort_by(|x, y| x.len().cmp(&y.len()).then_with(|| x.cmp(y)));

        Ok(paths
            .into_iter()
            .map(|p| {
                p.into_iter()
                    .filter_map(|name| self.resources.get(name))
                    .collect()
            })
            .collect())
    }

    /// Whether `to`'s type is reachable from `from`'s type in the type graph
    /// without passing through another functional type. A type always
    /// reaches itself.
    pub fn has_functional_path(&self, from: &ResourceId, to: &ResourceId) -> bool {
        let from_name = from.qualified_type_name();
        let to_name = to.qualified_type_name();
        if from_name == to_name {
            return true;
        }
        let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (s, t) in self.edges.keys() {
            adjacency.entry(s.as_str()).or_default().push(t.as_str());
        }

        // breadth-first with sorted neighbours gives the stable shortest path
        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue = VecDeque::from([from_name.as_str()]);
        let mut found = false;
        while let Some(cur) = queue.pop_front() {
            if cur == to_name {
                found = true;
                break;
            }
            for &next in adjacency.get(cur).into_iter().flatten() {
                if next != from_name && !parent.contains_key(next) {
                    parent.insert(next, cur);
                    queue.push_back(next);
                }
            }
        }
        if !found {
            return false;
        }
        let mut cur = parent.get(to_name.as_str()).copied();
        while let Some(node) = cur {
            if node == from_name {
                break;
            }
            if self.resources.get(node).is_some_and(|t| t.is_functional()) {
                return false;
            }
            cur = parent.get(node).copied();
        }
        true
    }

    /// Types that may serve as the namespace of `id`'s type: the selectors
    /// of the namespace property's type and of its operational step.
    pub fn get_allowed_namespaced_resource_ids(
        &self,
        id: &ResourceId,
    ) -> Result<Vec<ResourceId>, String> {
        let tmpl = self.get_resource_template(id)?;
        let Some(prop) = tmpl.namespace_property() else {
            return Ok(Vec::new());
        };
        let mut result = Vec::new();
        if let Some(Some(sel)) = prop.property_type.resource_selector() {
            result.push(sel.clone());
        }
        let step = prop.operational_rule.as_ref().and_then(|r| r.step.as_ref());
        for sel in step.map(|s| s.resources.as_slice()).unwrap_or_default() {
            // templated selectors depend on the resource and cannot be
            // resolved statically
            if let Ok(parsed) = ResourceId::parse(&sel.selector) {
                if !result.contains(&parsed) {
                    result.push(parsed);
                }
            }
        }
        Ok(result)
    }

    /// The namespace resource a resource currently lives in, if set.
    pub fn get_resources_namespace_resource(
        &self,
        res: &Resource,
    ) -> Result<Option<ResourceId>, String> {
        let tmpl = self.get_resource_template(&res.id)?;
        let Some(prop) = tmpl.namespace_property() else {
            return Ok(None);
        };
        match res.get_property(&prop.path) {
            Some(v) => {
                let s = v
                    .as_str()
                    .ok_or_else(|| format!("namespace property {} is not an id", prop.path))?;
                Ok(Some(ResourceId::parse(s)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const NETWORK_KB: &str = r#"
resources:
  - qualified_type_name: p:a
    classification:
      is: [compute]
  - qualified_type_name: p:b
    classification:
      is: [network]
  - qualified_type_name: p:c
    classification:
      is: [storage]
edges:
  - source: p:a
    target: p:b
    classification: [network]
  - source: p:b
    target: p:c
  - source: p:c
    target: p:a
"#;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn test_ig012_load_and_lookup() {
        let kb = KnowledgeBase::from_yaml(NETWORK_KB).unwrap();
        assert!(kb.get_resource_template(&id("p:a:x")).is_ok());
        assert!(kb.get_resource_template(&id("p:z:x")).is_err());
        assert!(kb.get_edge_template(&id("p:a:x"), &id("p:b:y")).is_some());
        assert!(kb.get_edge_template(&id("p:a:x"), &id("p:c:y")).is_none());
        assert!(kb.is_functional(&id("p:a:x")));
        assert!(!kb.is_functional(&id("p:b:x")));
    }

    #[test]
    fn test_ig012_edge_to_unknown_type_rejected() {
        let yaml = "resources:\n  - qualified_type_name: p:a\nedges:\n  - source: p:a\n    target: p:q\n";
        assert!(KnowledgeBase::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_ig012_bad_property_type_rejected() {
        let yaml = "resources:\n  - qualified_type_name: p:a\n    properties:\n      X:\n        type: lisst\n";
        assert!(KnowledgeBase::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_ig012_all_paths_cyclic_kb() {
        let kb = KnowledgeBase::from_yaml(NETWORK_KB).unwrap();
        let paths = kb.all_paths(&id("p:a"), &id("p:c")).unwrap();
        assert_eq!(paths.len(), 1);
        let names: Vec<&str> = paths[0]
            .iter()
            .map(|t| t.qualified_type_name.as_str())
            .collect();
        assert_eq!(names, vec!["p:a", "p:b", "p:c"]);
    }

    #[test]
    fn test_ig012_path_satisfactions_pairing() {
        let yaml = r#"
resources:
  - qualified_type_name: p:src
    path_satisfaction:
      as_source: [network, permissions]
  - qualified_type_name: p:tgt
    path_satisfaction:
      as_target: ["network#Vpc", storage]
"#;
        let kb = KnowledgeBase::from_yaml(yaml).unwrap();
        let sats = kb
            .get_path_satisfactions_from_edge(&id("p:src:s"), &id("p:tgt:t"))
            .unwrap();
        let classes: Vec<&str> = sats.iter().map(|s| s.classification.as_str()).collect();
        assert_eq!(classes, vec!["network", "permissions", "storage"]);
        assert_eq!(sats[0].target.property_reference, "Vpc");
        assert!(sats[1].target.property_reference.is_empty());
    }

    #[test]
    fn test_ig012_path_satisfactions_fallback() {
        let kb = KnowledgeBase::from_yaml(NETWORK_KB).unwrap();
        let sats = kb
            .get_path_satisfactions_from_edge(&id("p:a:x"), &id("p:c:y"))
            .unwrap();
        assert_eq!(sats, vec![EdgePathSatisfaction::default()]);
    }

    #[test]
    fn test_ig012_functional_path() {
        let kb = KnowledgeBase::from_yaml(NETWORK_KB).unwrap();
        // a -> b (glue) -> c
        assert!(kb.has_functional_path(&id("p:a:x"), &id("p:c:y")));
        // c -> a -> b passes through compute
        assert!(!kb.has_functional_path(&id("p:c:x"), &id("p:b:y")));
        assert!(kb.has_functional_path(&id("p:b:x"), &id("p:b:y")));
        assert!(!kb.has_functional_path(&id("p:a:x"), &id("p:q:y")));
    }

    #[test]
    fn test_ig012_namespaces() {
        let yaml = r#"
resources:
  - qualified_type_name: p:vpc
  - qualified_type_name: p:subnet
    properties:
      Vpc:
        type: resource(p:vpc)
        namespace: true
"#;
        let kb = KnowledgeBase::from_yaml(yaml).unwrap();
        let allowed = kb.get_allowed_namespaced_resource_ids(&id("p:subnet:s")).unwrap();
        assert_eq!(allowed, vec![id("p:vpc")]);
        let mut res = Resource::new(id("p:subnet:s"));
        assert_eq!(kb.get_resources_namespace_resource(&res).unwrap(), None);
        res.set_property("Vpc", serde_json::json!("p:vpc:main")).unwrap();
        assert_eq!(
            kb.get_resources_namespace_resource(&res).unwrap(),
            Some(id("p:vpc:main"))
        );
    }
}
