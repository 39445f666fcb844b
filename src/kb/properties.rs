//! IG-010: Property type system for resource templates.
//!
//! Type names are parsed once when the knowledge base loads, so malformed
//! type strings fail there and never reach evaluation.

use crate::core::types::ResourceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PropertyType {
    String,
    Number,
    Bool,
    #[default]
    Any,
    /// Reference to another resource, optionally restricted by selector
    Resource(Option<ResourceId>),
    List(Box<PropertyType>),
    Set(Box<PropertyType>),
    Map(Option<(Box<PropertyType>, Box<PropertyType>)>),
}

impl PropertyType {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let (name, args) = match s.find('(') {
            Some(i) => {
                let inner = s[i + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| format!("unbalanced parentheses in type '{}'", s))?;
                (&s[..i], Some(inner))
            }
            None => (s, None),
        };
        let inner = |a: Option<&str>| -> Result<Box<PropertyType>, String> {
            Ok(Box::new(match a {
                Some(a) => PropertyType::parse(a)?,
                None => PropertyType::Any,
            }))
        };
        match name {
            "string" => Ok(PropertyType::String),
            "number" | "int" | "float" => Ok(PropertyType::Number),
            "bool" => Ok(PropertyType::Bool),
            "any" => Ok(PropertyType::Any),
            "resource" => match args {
                Some(sel) => Ok(PropertyType::Resource(Some(ResourceId::parse(sel)?))),
                None => Ok(PropertyType::Resource(None)),
            },
            "list" => Ok(PropertyType::List(inner(args)?)),
            "set" => Ok(PropertyType::Set(inner(args)?)),
            "map" => match args {
                Some(a) => {
                    let (k, v) = split_top_level(a)
                        .ok_or_else(|| format!("map type '{}' needs key and value types", s))?;
                    Ok(PropertyType::Map(Some((
                        Box::new(PropertyType::parse(k)?),
                        Box::new(PropertyType::parse(v)?),
                    ))))
                }
                None => Ok(PropertyType::Map(None)),
            },
            other => Err(format!("unknown property type '{}'", other)),
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, PropertyType::List(_) | PropertyType::Set(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, PropertyType::Map(_))
    }

    /// Element type of a list or set.
    pub fn element(&self) -> Option<&PropertyType> {
        match self {
            PropertyType::List(inner) | PropertyType::Set(inner) => Some(inner),
            _ => None,
        }
    }

    /// Selector of the referenced resource type, looking through collections.
    pub fn resource_selector(&self) -> Option<Option<&ResourceId>> {
        match self {
            PropertyType::Resource(sel) => Some(sel.as_ref()),
            PropertyType::List(inner) | PropertyType::Set(inner) => inner.resource_selector(),
            _ => None,
        }
    }

    pub fn zero_value(&self) -> Value {
        match self {
            PropertyType::String => Value::String(String::new()),
            PropertyType::Number => Value::from(0),
            PropertyType::Bool => Value::Bool(false),
            PropertyType::List(_) | PropertyType::Set(_) => Value::Array(Vec::new()),
            PropertyType::Map(_) => Value::Object(serde_json::Map::new()),
            PropertyType::Any | PropertyType::Resource(_) => Value::Null,
        }
    }

    /// Convert a raw (possibly templated-to-string) value into this type.
    pub fn parse_value(&self, v: &Value) -> Result<Value, String> {
        if v.is_null() {
            return Ok(Value::Null);
        }
        match self {
            PropertyType::Any => Ok(v.clone()),
            PropertyType::String => match v {
                Value::String(_) => Ok(v.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(format!("expected string, got {}", v)),
            },
            PropertyType::Number => match v {
                Value::Number(_) => Ok(v.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<serde_json::Number>()
                    .map(Value::Number)
                    .map_err(|_| format!("expected number, got '{}'", s)),
                _ => Err(format!("expected number, got {}", v)),
            },
            PropertyType::Bool => match v {
                Value::Bool(_) => Ok(v.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<bool>()
                    .map(Value::Bool)
                    .map_err(|_| format!("expected bool, got '{}'", s)),
                _ => Err(format!("expected bool, got {}", v)),
            },
            PropertyType::Resource(sel) => {
                let s = v
                    .as_str()
                    .ok_or_else(|| format!("expected resource id, got {}", v))?;
                let id = ResourceId::parse(s)?;
                if let Some(sel) = sel {
                    if !sel.matches(&id) {
                        return Err(format!("resource {} does not match type {}", id, sel));
                    }
                }
                Ok(Value::String(id.to_string()))
            }
            PropertyType::List(inner) | PropertyType::Set(inner) => {
                let items = match v {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                let mut out: Vec<Value> = Vec::with_capacity(items.len());
                for item in &items {
                    let parsed = inner.parse_value(item)?;
                    if matches!(self, PropertyType::Set(_)) && out.contains(&parsed) {
                        continue;
                    }
                    out.push(parsed);
                }
                Ok(Value::Array(out))
            }
            PropertyType::Map(kv) => {
                let obj = v
                    .as_object()
                    .ok_or_else(|| format!("expected map, got {}", v))?;
                let Some((_, val_type)) = kv else {
                    return Ok(v.clone());
                };
                let mut out = serde_json::Map::new();
                for (k, item) in obj {
                    out.insert(k.clone(), val_type.parse_value(item)?);
                }
                Ok(Value::Object(out))
            }
        }
    }
}

fn split_top_level(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => return Some((&s[..i], &s[i + 1..])),
            _ => {}
        }
    }
    None
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyType::String => write!(f, "string"),
            PropertyType::Number => write!(f, "number"),
            PropertyType::Bool => write!(f, "bool"),
            PropertyType::Any => write!(f, "any"),
            PropertyType::Resource(None) => write!(f, "resource"),
            PropertyType::Resource(Some(sel)) => write!(f, "resource({})", sel),
            PropertyType::List(inner) => write!(f, "list({})", inner),
            PropertyType::Set(inner) => write!(f, "set({})", inner),
            PropertyType::Map(None) => write!(f, "map"),
            PropertyType::Map(Some((k, v))) => write!(f, "map({},{})", k, v),
        }
    }
}

impl TryFrom<String> for PropertyType {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        PropertyType::parse(&s)
    }
}

impl From<PropertyType> for String {
    fn from(t: PropertyType) -> String {
        t.to_string()
    }
}
