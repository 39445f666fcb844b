//! IG-001: Identifier and resource types shared by every layer.
//!
//! Resource ids, property references and simple edges all have a text form
//! that is used both in YAML input and in log output, so each type carries a
//! `Display` impl plus a string-based serde representation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use super::path::PropertyPath;

static SEGMENT: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9_\-]+$").expect("static regex"));

// ============================================================================
// Resource identifiers
// ============================================================================

/// Identity of a resource: `provider:type[:namespace]:name`.
///
/// An id with an empty name is a selector and is used to match resources by
/// type (see [`ResourceId::matches`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub provider: String,
    pub type_name: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(provider: &str, type_name: &str, name: &str) -> Self {
        ResourceId {
            provider: provider.to_string(),
            type_name: type_name.to_string(),
            namespace: String::new(),
            name: name.to_string(),
        }
    }

    /// Parse the text form. Two segments give a selector, three a plain id,
    /// four a namespaced id.
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(format!("invalid resource id '{}'", s));
        }
        for seg in &parts[..2] {
            if !SEGMENT.is_match(seg) {
                return Err(format!("invalid resource id '{}': bad segment '{}'", s, seg));
            }
        }
        let mut id = ResourceId::new(parts[0], parts[1], "");
        match parts.len() {
            3 => id.name = parts[2].to_string(),
            4 => {
                id.namespace = parts[2].to_string();
                id.name = parts[3].to_string();
            }
            _ => {}
        }
        Ok(id)
    }

    /// `provider:type`, the key used for template lookup.
    pub fn qualified_type_name(&self) -> String {
        format!("{}:{}", self.provider, self.type_name)
    }

    pub fn is_zero(&self) -> bool {
        self.provider.is_empty()
            && self.type_name.is_empty()
            && self.namespace.is_empty()
            && self.name.is_empty()
    }

    /// Selector semantics: every non-empty field of `self` must equal the
    /// corresponding field of `other`.
    pub fn matches(&self, other: &ResourceId) -> bool {
        (self.provider.is_empty() || self.provider == other.provider)
            && (self.type_name.is_empty() || self.type_name == other.type_name)
            && (self.namespace.is_empty() || self.namespace == other.namespace)
            && (self.name.is_empty() || self.name == other.name)
    }

    /// Type-only selector for this id.
    pub fn selector(&self) -> ResourceId {
        ResourceId::new(&self.provider, &self.type_name, "")
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.type_name)?;
        if !self.namespace.is_empty() {
            write!(f, ":{}", self.namespace)?;
            return write!(f, ":{}", self.name);
        }
        if !self.name.is_empty() {
            write!(f, ":{}", self.name)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceId::parse(s)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        ResourceId::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Property references and edges
// ============================================================================

/// A property on a specific resource, `resource#path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyRef {
    pub resource: ResourceId,
    pub property: String,
}

impl PropertyRef {
    pub fn new(resource: ResourceId, property: &str) -> Self {
        PropertyRef {
            resource,
            property: property.to_string(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        let (res, prop) = s
            .split_once('#')
            .ok_or_else(|| format!("invalid property reference '{}'", s))?;
        Ok(PropertyRef::new(ResourceId::parse(res)?, prop))
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.property)
    }
}

/// Directed edge between two resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimpleEdge {
    pub source: ResourceId,
    pub target: ResourceId,
}

impl SimpleEdge {
    pub fn new(source: ResourceId, target: ResourceId) -> Self {
        SimpleEdge { source, target }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        let (src, tgt) = s
            .split_once("->")
            .ok_or_else(|| format!("invalid edge '{}', expected 'source -> target'", s))?;
        Ok(SimpleEdge::new(
            ResourceId::parse(src)?,
            ResourceId::parse(tgt)?,
        ))
    }

    /// Replace whichever endpoint equals `old`.
    pub fn rename(&self, old: &ResourceId, new: &ResourceId) -> SimpleEdge {
        let mut e = self.clone();
        if &e.source == old {
            e.source = new.clone();
        }
        if &e.target == old {
            e.target = new.clone();
        }
        e
    }
}

impl fmt::Display for SimpleEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

impl Serialize for SimpleEdge {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SimpleEdge {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        SimpleEdge::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Resources
// ============================================================================

/// A concrete resource in the solution graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource identity
    pub id: ResourceId,

    /// Property values (always a JSON object)
    #[serde(default = "empty_object")]
    pub properties: Value,

    /// Imported resources are not under the resolver's control
    #[serde(default)]
    pub imported: bool,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Resource {
            id,
            properties: empty_object(),
            imported: false,
        }
    }

    pub fn get_property(&self, path: &str) -> Option<&Value> {
        let path = PropertyPath::parse(path).ok()?;
        path.get(&self.properties).filter(|v| !v.is_null())
    }

    pub fn set_property(&mut self, path: &str, value: Value) -> Result<(), String> {
        PropertyPath::parse(path)?.set(&mut self.properties, value)
    }

    pub fn append_property(&mut self, path: &str, value: Value, dedupe: bool) -> Result<(), String> {
        PropertyPath::parse(path)?.append(&mut self.properties, value, dedupe)
    }

    pub fn remove_property(&mut self, path: &str, value: Option<&Value>) -> Result<(), String> {
        PropertyPath::parse(path)?.remove(&mut self.properties, value)
    }

    /// Rewrite every string value equal to `old` (recursively) to `new`.
    /// Returns whether anything changed.
    pub fn replace_references(&mut self, old: &ResourceId, new: &ResourceId) -> bool {
        replace_in_value(&mut self.properties, &old.to_string(), &new.to_string())
    }
}

fn replace_in_value(v: &mut Value, old: &str, new: &str) -> bool {
    match v {
        Value::String(s) if s == old => {
            *s = new.to_string();
            true
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |acc, i| replace_in_value(i, old, new) || acc),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |acc, i| replace_in_value(i, old, new) || acc),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ig001_parse_plain() {
        let id = ResourceId::parse("aws:lambda_function:api").unwrap();
        assert_eq!(id.provider, "aws");
        assert_eq!(id.type_name, "lambda_function");
        assert_eq!(id.name, "api");
        assert!(id.namespace.is_empty());
        assert_eq!(id.to_string(), "aws:lambda_function:api");
    }

    #[test]
    fn test_ig001_parse_namespaced() {
        let id = ResourceId::parse("aws:subnet:vpc-0:private").unwrap();
        assert_eq!(id.namespace, "vpc-0");
        assert_eq!(id.name, "private");
        assert_eq!(id.to_string(), "aws:subnet:vpc-0:private");
    }

    #[test]
    fn test_ig001_parse_selector() {
        let sel = ResourceId::parse("mock:resource4").unwrap();
        assert!(sel.name.is_empty());
        assert!(sel.matches(&ResourceId::new("mock", "resource4", "x")));
        assert!(!sel.matches(&ResourceId::new("mock", "resource3", "x")));
        assert_eq!(sel.to_string(), "mock:resource4");
    }

    #[test]
    fn test_ig001_parse_invalid() {
        assert!(ResourceId::parse("nope").is_err());
        assert!(ResourceId::parse("a:b:c:d:e").is_err());
        assert!(ResourceId::parse(":b:c").is_err());
    }

    #[test]
    fn test_ig001_phantom_names_allowed() {
        let id = ResourceId::parse("p:b:phantom$0").unwrap();
        assert_eq!(id.name, "phantom$0");
    }

    #[test]
    fn test_ig001_property_ref_display() {
        let r = PropertyRef::parse("a:a:a#prop1").unwrap();
        assert_eq!(r.property, "prop1");
        assert_eq!(r.to_string(), "a:a:a#prop1");
    }

    #[test]
    fn test_ig001_edge_parse_and_rename() {
        let e = SimpleEdge::parse("p:a:x -> p:b:y").unwrap();
        assert_eq!(e.to_string(), "p:a:x -> p:b:y");
        let renamed = e.rename(&e.source, &ResourceId::new("p", "a", "z"));
        assert_eq!(renamed.to_string(), "p:a:z -> p:b:y");
    }

    #[test]
    fn test_ig001_replace_references() {
        let mut r = Resource::new(ResourceId::new("p", "a", "x"));
        r.properties = serde_json::json!({"Vpc": "p:vpc:old", "Subnets": ["p:vpc:old", "p:s:1"]});
        let changed = r.replace_references(
            &ResourceId::new("p", "vpc", "old"),
            &ResourceId::new("p", "vpc", "new"),
        );
        assert!(changed);
        assert_eq!(r.properties["Vpc"], "p:vpc:new");
        assert_eq!(r.properties["Subnets"][0], "p:vpc:new");
    }

    #[test]
    fn test_ig001_serde_as_string() {
        let r: Resource = serde_yaml_ng::from_str("id: p:a:x\nproperties:\n  Name: hello\n").unwrap();
        assert_eq!(r.id, ResourceId::new("p", "a", "x"));
        assert_eq!(r.get_property("Name"), Some(&Value::from("hello")));
        assert!(!r.imported);
    }
}
