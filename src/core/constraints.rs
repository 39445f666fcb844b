//! IG-004: User constraints on resource properties.

use super::types::ResourceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOperator {
    Equals,
    Add,
    Remove,
}

/// A constraint pinning (or adjusting) one property of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConstraint {
    pub operator: ConstraintOperator,

    /// Resource the constraint applies to
    pub target: ResourceId,

    /// Property path on the target
    pub property: String,

    /// Value to set, add or remove
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub resources: Vec<ResourceConstraint>,
}

impl Constraints {
    /// Constraints for one property, in declaration order.
    pub fn for_property<'a>(
        &'a self,
        resource: &'a ResourceId,
        property: &'a str,
    ) -> impl Iterator<Item = &'a ResourceConstraint> + 'a {
        self.resources
            .iter()
            .filter(move |c| &c.target == resource && c.property == property)
    }

    pub fn has_equals(&self, resource: &ResourceId, property: &str) -> bool {
        self.for_property(resource, property)
            .any(|c| c.operator == ConstraintOperator::Equals)
    }

    pub fn push(&mut self, c: ResourceConstraint) {
        self.resources.push(c);
    }

    /// Retarget constraints after a resource rename.
    pub fn rename(&mut self, old: &ResourceId, new: &ResourceId) {
        for c in self.resources.iter_mut().filter(|c| &c.target == old) {
            c.target = new.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ig004_parse_and_filter() {
        let yaml = r#"
resources:
  - operator: equals
    target: p:a:x
    property: Size
    value: 3
  - operator: add
    target: p:a:x
    property: Tags
    value: [t1]
  - operator: remove
    target: p:a:y
    property: Tags
    value: t2
"#;
        let c: Constraints = serde_yaml_ng::from_str(yaml).unwrap();
        let x = ResourceId::parse("p:a:x").unwrap();
        assert!(c.has_equals(&x, "Size"));
        assert!(!c.has_equals(&x, "Tags"));
        assert_eq!(c.for_property(&x, "Tags").count(), 1);
    }

    #[test]
    fn test_ig004_rename() {
        let mut c = Constraints::default();
        let old = ResourceId::parse("p:a:x").unwrap();
        let new = ResourceId::parse("p:a:ns:x").unwrap();
        c.push(ResourceConstraint {
            operator: ConstraintOperator::Equals,
            target: old.clone(),
            property: "Size".into(),
            value: Value::from(1),
        });
        c.rename(&old, &new);
        assert!(c.has_equals(&new, "Size"));
        assert!(!c.has_equals(&old, "Size"));
    }
}
