//! IG-037: Resource rule vertices, one per `additional_rules` entry.

use super::capture::DependencyCapture;
use super::vertex::Key;
use super::Evaluator;
use crate::core::types::ResourceId;
use crate::engine::operational_rule::ConfigAction;
use crate::engine::Error;
use crate::kb::templates::OperationalRule;
use crate::rules::template::TemplateData;

#[derive(Debug, Clone)]
pub struct ResourceRuleVertex {
    pub resource: ResourceId,
    pub rule: OperationalRule,
    hash: String,
}

impl ResourceRuleVertex {
    pub fn new(resource: ResourceId, rule: OperationalRule) -> Self {
        let hash = rule.hash();
        ResourceRuleVertex {
            resource,
            rule,
            hash,
        }
    }

    pub fn key(&self) -> Key {
        Key::ResourceRule {
            resource: self.resource.clone(),
            rule_hash: self.hash.clone(),
        }
    }

    pub fn update_from(&mut self, other: ResourceRuleVertex) {
        if self.key() != other.key() {
            panic!(
                "cannot merge resource rules with different keys: {} != {}",
                self.key(),
                other.key()
            );
        }
    }

    pub fn dependencies(&mut self, _eval: &Evaluator, cap: &mut DependencyCapture) -> Result<(), Error> {
        cap.execute_op_rule(&TemplateData::for_resource(&self.resource), &self.rule);
        Ok(())
    }

    pub fn evaluate(&self, eval: &mut Evaluator) -> Result<(), Error> {
        let id = eval.current_id(&self.resource);
        eval.handle_operational_rule(&TemplateData::for_resource(&id), &self.rule, ConfigAction::Add)
            .map_err(|e| Error::Vertex {
                key: self.key().to_string(),
                source: Box::new(e),
            })
    }
}
