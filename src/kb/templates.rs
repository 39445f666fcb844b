//! IG-011: Knowledge-base template shapes.
//!
//! Resource and edge templates are plain serde structs loaded from YAML.
//! Rule bodies stay as template strings; they are executed by `crate::rules`.

use super::properties::PropertyType;
use crate::core::graph::Direction;
use crate::core::path::{PathSegment, PropertyPath};
use crate::core::types::{Resource, ResourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Resource templates
// ============================================================================

/// Template describing one resource type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// `provider:type`
    pub qualified_type_name: String,

    /// Property templates keyed by top-level name
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyTemplate>,

    #[serde(default)]
    pub classification: Classification,

    #[serde(default)]
    pub path_satisfaction: PathSatisfaction,

    /// Resource-level rules run once per resource
    #[serde(default)]
    pub additional_rules: Vec<OperationalRule>,

    #[serde(default)]
    pub consumption: Consumption,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    /// Classifications this resource type provides
    #[serde(default)]
    pub is: Vec<String>,
}

/// What a resource type fundamentally does; glue resources have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Functionality {
    Compute,
    Cluster,
    Storage,
    Api,
    Messaging,
    Unknown,
}

impl ResourceTemplate {
    pub fn id(&self) -> Result<ResourceId, String> {
        ResourceId::parse(&self.qualified_type_name)
    }

    pub fn get_functionality(&self) -> Functionality {
        let mut found = Functionality::Unknown;
        for c in &self.classification.is {
            let f = match c.as_str() {
                "compute" => Functionality::Compute,
                "cluster" => Functionality::Cluster,
                "storage" => Functionality::Storage,
                "api" => Functionality::Api,
                "messaging" => Functionality::Messaging,
                _ => continue,
            };
            if found != Functionality::Unknown {
                return Functionality::Unknown;
            }
            found = f;
        }
        found
    }

    pub fn is_functional(&self) -> bool {
        self.get_functionality() != Functionality::Unknown
    }

    pub fn has_classification(&self, c: &str) -> bool {
        self.classification.is.iter().any(|x| x == c)
    }

    pub fn has_classifications(&self, cs: &[String]) -> bool {
        cs.iter().all(|c| self.has_classification(c))
    }

    /// Property template for a full path. List indices are skipped so that
    /// `Rules[2].Port` resolves through `Rules`' sub-properties.
    pub fn get_property(&self, path: &str) -> Option<&PropertyTemplate> {
        let path = PropertyPath::parse(path).ok()?;
        let mut props = &self.properties;
        let mut found: Option<&PropertyTemplate> = None;
        for seg in &path.segments {
            match seg {
                PathSegment::Field(f) => {
                    let p = props.get(f)?;
                    props = &p.properties;
                    found = Some(p);
                }
                PathSegment::Index(_) => {}
            }
        }
        found
    }

    /// The property that places this resource in a namespace, if any.
    pub fn namespace_property(&self) -> Option<&PropertyTemplate> {
        self.properties.values().find(|p| p.namespace)
    }

    /// Every property path that gets an evaluation vertex for `res`. Nested
    /// object properties are expanded; list-of-object sub-properties are
    /// expanded once per existing element.
    pub fn property_paths(&self, res: &Resource) -> Vec<String> {
        let mut out = Vec::new();
        collect_paths(&self.properties, "", &res.properties, &mut out);
        out
    }

    /// Fill `name`/`path` on every nested property template.
    pub(crate) fn finalize(&mut self) {
        fill_paths(&mut self.properties, "");
    }
}

fn fill_paths(props: &mut BTreeMap<String, PropertyTemplate>, prefix: &str) {
    for (name, p) in props.iter_mut() {
        p.name = name.clone();
        p.path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        let child_prefix = p.path.clone();
        fill_paths(&mut p.properties, &child_prefix);
    }
}

fn collect_paths(
    props: &BTreeMap<String, PropertyTemplate>,
    prefix: &str,
    values: &Value,
    out: &mut Vec<String>,
) {
    for (name, p) in props {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        out.push(path.clone());
        if p.properties.is_empty() {
            continue;
        }
        let value = values.get(name).unwrap_or(&Value::Null);
        if p.property_type.is_collection() {
            if let Value::Array(items) = value {
                for (i, item) in items.iter().enumerate() {
                    collect_paths(&p.properties, &format!("{}[{}]", path, i), item, out);
                }
            }
        } else if !p.property_type.is_map() {
            collect_paths(&p.properties, &path, value, out);
        } else if let Value::Object(_) = value {
            collect_paths(&p.properties, &path, value, out);
        }
    }
}

// ============================================================================
// Property templates
// ============================================================================

/// Template for one property of a resource type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyTemplate {
    /// Leaf name (filled on load)
    #[serde(skip)]
    pub name: String,

    /// Full dotted path (filled on load)
    #[serde(skip)]
    pub path: String,

    #[serde(rename = "type", default)]
    pub property_type: PropertyType,

    #[serde(default)]
    pub default_value: Option<Value>,

    /// Rule that makes this property operational
    #[serde(default)]
    pub operational_rule: Option<PropertyRule>,

    /// Sub-properties of object-like values
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyTemplate>,

    #[serde(default)]
    pub required: bool,

    /// Setting this property moves the resource into the referenced namespace
    #[serde(default)]
    pub namespace: bool,

    /// Allowed values (empty = unrestricted)
    #[serde(default)]
    pub allowed_values: Vec<Value>,
}

impl PropertyTemplate {
    /// Validate a value against type, required flag and allowed values.
    pub fn validate(&self, value: Option<&Value>) -> Result<(), String> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            if self.required {
                return Err(format!("required property {} is not set", self.path));
            }
            return Ok(());
        };
        self.property_type
            .parse_value(value)
            .map_err(|e| format!("property {}: {}", self.path, e))?;
        if !self.allowed_values.is_empty() && !self.allowed_values.contains(value) {
            return Err(format!(
                "property {}: value {} is not one of {:?}",
                self.path, value, self.allowed_values
            ));
        }
        Ok(())
    }
}

/// Operational rule attached to a single property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyRule {
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_cond: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<OperationalStep>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

// ============================================================================
// Operational rules
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalRule {
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_cond: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<OperationalStep>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configuration_rules: Vec<ConfigurationRule>,
}

impl OperationalRule {
    /// Content hash used to key resource-rule vertices.
    pub fn hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        format!("blake3:{}", blake3::hash(canonical.as_bytes()).to_hex())
    }
}

/// One step: make sure `num_needed` resources matching `resources` are
/// connected to the step's resource in `direction`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalStep {
    /// Template for the resource the step operates on (defaults to `.Self`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default)]
    pub resources: Vec<ResourceSelector>,

    /// Types providing every listed classification also satisfy the step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<String>,

    #[serde(default)]
    pub num_needed: usize,

    #[serde(default)]
    pub unique: bool,

    #[serde(default)]
    pub fail_if_missing: bool,
}

impl OperationalStep {
    pub fn needed(&self) -> usize {
        self.num_needed.max(1)
    }
}

/// Resource selector template, optionally with property requirements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SelectorRepr")]
pub struct ResourceSelector {
    pub selector: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Plain(String),
    Full {
        selector: String,
        #[serde(default)]
        properties: BTreeMap<String, Value>,
    },
}

impl From<SelectorRepr> for ResourceSelector {
    fn from(r: SelectorRepr) -> Self {
        match r {
            SelectorRepr::Plain(selector) => ResourceSelector {
                selector,
                properties: BTreeMap::new(),
            },
            SelectorRepr::Full {
                selector,
                properties,
            } => ResourceSelector {
                selector,
                properties,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRule {
    /// Template for the resource to configure
    pub resource: String,
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

// ============================================================================
// Path satisfaction
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathSatisfaction {
    #[serde(default)]
    pub as_source: Vec<PathSatisfactionRoute>,
    #[serde(default)]
    pub as_target: Vec<PathSatisfactionRoute>,
    /// Classifications that make any path through this type invalid
    #[serde(default)]
    pub deny_classifications: Vec<String>,
}

/// `classification#Prop#Prop`: the classification to satisfy, and the chain
/// of properties to follow to find the real endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RouteRepr")]
pub struct PathSatisfactionRoute {
    pub classification: String,
    #[serde(default)]
    pub property_reference: String,
    #[serde(default)]
    pub validity: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RouteRepr {
    Plain(String),
    Full {
        classification: String,
        #[serde(default)]
        property_reference: String,
        #[serde(default)]
        validity: String,
    },
}

impl From<RouteRepr> for PathSatisfactionRoute {
    fn from(r: RouteRepr) -> Self {
        match r {
            RouteRepr::Plain(s) => PathSatisfactionRoute::parse(&s),
            RouteRepr::Full {
                classification,
                property_reference,
                validity,
            } => PathSatisfactionRoute {
                classification,
                property_reference,
                validity,
            },
        }
    }
}

impl PathSatisfactionRoute {
    pub fn parse(s: &str) -> Self {
        match s.split_once('#') {
            Some((c, r)) => PathSatisfactionRoute {
                classification: c.to_string(),
                property_reference: r.to_string(),
                validity: String::new(),
            },
            None => PathSatisfactionRoute {
                classification: s.to_string(),
                ..Default::default()
            },
        }
    }

    /// A property reference means the real endpoint is some other resource.
    pub fn property_reference_changes_boundary(&self) -> bool {
        !self.property_reference.is_empty()
    }

    pub fn property_chain(&self) -> Vec<&str> {
        if self.property_reference.is_empty() {
            return Vec::new();
        }
        self.property_reference.split('#').collect()
    }
}

impl fmt::Display for PathSatisfactionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.classification)?;
        if !self.property_reference.is_empty() {
            write!(f, "#{}", self.property_reference)?;
        }
        Ok(())
    }
}

/// A source route paired with a target route for one classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgePathSatisfaction {
    pub classification: String,
    pub source: PathSatisfactionRoute,
    pub target: PathSatisfactionRoute,
}

// ============================================================================
// Consumption
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Consumption {
    #[serde(default)]
    pub emitted: Vec<ConsumptionObject>,
    #[serde(default)]
    pub consumed: Vec<ConsumptionObject>,
}

/// A value a resource emits, or a property a resource fills from emitted
/// values of the same model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionObject {
    pub model: String,
    /// Property on the consumer that receives the value
    #[serde(default)]
    pub property_path: String,
    /// Emitted value (may be templated)
    #[serde(default)]
    pub value: Value,
    /// Template for the resource that consumes, when not the edge endpoint
    #[serde(default)]
    pub resource: Option<String>,
}

// ============================================================================
// Edge templates
// ============================================================================

/// Template describing a direct edge between two resource types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeTemplate {
    pub source: ResourceId,
    pub target: ResourceId,

    #[serde(default)]
    pub classification: Vec<String>,

    #[serde(default)]
    pub operational_rules: Vec<OperationalRule>,

    /// Only valid as a direct edge, never as a hop inside an expansion
    #[serde(default)]
    pub direct_edge_only: bool,

    /// Scales path-selection weight (0 = unset)
    #[serde(default)]
    pub edge_weight_multiplier: f32,
}
