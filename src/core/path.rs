//! IG-002: Property paths (`a.b[0].c`) over JSON property trees.

use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Parsed property path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyPath {
    pub segments: Vec<PathSegment>,
}

impl PropertyPath {
    pub fn parse(s: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        for part in s.split('.') {
            if part.is_empty() {
                return Err(format!("empty segment in property path '{}'", s));
            }
            let (field, mut rest) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if !field.is_empty() {
                segments.push(PathSegment::Field(field.to_string()));
            }
            while let Some(stripped) = rest.strip_prefix('[') {
                let end = stripped
                    .find(']')
                    .ok_or_else(|| format!("unclosed index in property path '{}'", s))?;
                let idx = stripped[..end]
                    .parse::<usize>()
                    .map_err(|e| format!("bad index in property path '{}': {}", s, e))?;
                segments.push(PathSegment::Index(idx));
                rest = &stripped[end + 1..];
            }
            if !rest.is_empty() {
                return Err(format!("trailing characters in property path '{}'", s));
            }
        }
        Ok(PropertyPath { segments })
    }

    /// The top-level property name.
    pub fn root(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Field(f)) => Some(f),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<PropertyPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(PropertyPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut cur = root;
        for seg in &self.segments {
            cur = match seg {
                PathSegment::Field(f) => cur.as_object()?.get(f)?,
                PathSegment::Index(i) => cur.as_array()?.get(*i)?,
            };
        }
        Some(cur)
    }

    /// Walk to the slot for this path, creating intermediate objects.
    fn slot<'a>(&self, root: &'a mut Value) -> Result<&'a mut Value, String> {
        let mut cur = root;
        for seg in &self.segments {
            cur = match seg {
                PathSegment::Field(f) => {
                    if cur.is_null() {
                        *cur = Value::Object(Map::new());
                    }
                    let obj = cur
                        .as_object_mut()
                        .ok_or_else(|| format!("cannot set field '{}' on non-object in '{}'", f, self))?;
                    obj.entry(f.clone()).or_insert(Value::Null)
                }
                PathSegment::Index(i) => {
                    if cur.is_null() {
                        *cur = Value::Array(Vec::new());
                    }
                    let arr = cur
                        .as_array_mut()
                        .ok_or_else(|| format!("cannot index non-list in '{}'", self))?;
                    if *i == arr.len() {
                        arr.push(Value::Null);
                    }
                    arr.get_mut(*i)
                        .ok_or_else(|| format!("index {} out of range in '{}'", i, self))?
                }
            };
        }
        Ok(cur)
    }

    pub fn set(&self, root: &mut Value, value: Value) -> Result<(), String> {
        *self.slot(root)? = value;
        Ok(())
    }

    /// Append to a list (or merge into a map). A list `value` is appended
    /// element-wise. With `dedupe`, existing elements are not repeated.
    pub fn append(&self, root: &mut Value, value: Value, dedupe: bool) -> Result<(), String> {
        let slot = self.slot(root)?;
        if let (Value::Object(dst), Value::Object(src)) = (&mut *slot, &value) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
            return Ok(());
        }
        if slot.is_null() {
            *slot = Value::Array(Vec::new());
        }
        let arr = slot
            .as_array_mut()
            .ok_or_else(|| format!("cannot append to non-list property '{}'", self))?;
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        for item in items {
            if dedupe && arr.contains(&item) {
                continue;
            }
            arr.push(item);
        }
        Ok(())
    }

    /// Remove `value` from a collection, or the whole property when `value`
    /// is `None`.
    pub fn remove(&self, root: &mut Value, value: Option<&Value>) -> Result<(), String> {
        let Some(value) = value else {
            return self.remove_slot(root);
        };
        let Some(slot) = self.get_mut(root) else {
            return Ok(());
        };
        match slot {
            Value::Array(arr) => {
                let remove: Vec<Value> = match value {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                arr.retain(|v| !remove.contains(v));
            }
            Value::Object(map) => match value {
                Value::String(k) => {
                    map.remove(k);
                }
                Value::Object(keys) => {
                    for k in keys.keys() {
                        map.remove(k);
                    }
                }
                _ => return Err(format!("cannot remove {} from map property '{}'", value, self)),
            },
            other => *other = Value::Null,
        }
        Ok(())
    }

    fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        let mut cur = root;
        for seg in &self.segments {
            cur = match seg {
                PathSegment::Field(f) => cur.as_object_mut()?.get_mut(f)?,
                PathSegment::Index(i) => cur.as_array_mut()?.get_mut(*i)?,
            };
        }
        Some(cur)
    }

    fn remove_slot(&self, root: &mut Value) -> Result<(), String> {
        let Some((last, parent)) = self.segments.split_last() else {
            return Err("cannot remove empty property path".to_string());
        };
        let parent_path = PropertyPath {
            segments: parent.to_vec(),
        };
        let Some(container) = parent_path.get_mut(root) else {
            return Ok(());
        };
        match (last, container) {
            (PathSegment::Field(f), Value::Object(map)) => {
                map.remove(f);
            }
            (PathSegment::Index(i), Value::Array(arr)) if *i < arr.len() => {
                arr.remove(*i);
            }
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSegment::Field(name) if i == 0 => write!(f, "{}", name)?,
                PathSegment::Field(name) => write!(f, ".{}", name)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}
