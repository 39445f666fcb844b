//! IG-048: Emitted values flowing into consumers along an edge.
//!
//! The edge's source consumes, its target emits. A value for a property
//! that is still unset is queued as an `add` constraint so the property
//! vertex picks it up when it evaluates.

use crate::core::constraints::{ConstraintOperator, ResourceConstraint};
use crate::core::types::ResourceId;
use crate::engine::eval::Evaluator;
use crate::engine::{Decision, Error};
use crate::rules::template::{self, TemplateData};
use crate::rules::DynamicContext;
use std::sync::Arc;
use tracing::debug;

impl Evaluator {
    pub(crate) fn consume(&mut self, consumer: &ResourceId, emitter: &ResourceId) -> Result<(), Error> {
        let kb = Arc::clone(&self.kb);
        let consumer_tmpl = kb.get_resource_template(consumer).map_err(Error::KnowledgeBase)?;
        let emitter_tmpl = kb.get_resource_template(emitter).map_err(Error::KnowledgeBase)?;

        let mut errs = Vec::new();
        for consume in &consumer_tmpl.consumption.consumed {
            for emit in emitter_tmpl
                .consumption
                .emitted
                .iter()
                .filter(|e| e.model == consume.model)
            {
                let (value, target) = {
                    let mut ctx = DynamicContext::new(&self.solution, &self.kb);
                    let value = match template::resolve_value(
                        &mut ctx,
                        &emit.value,
                        &TemplateData::for_resource(emitter),
                    ) {
                        Ok(v) => v,
                        Err(e) => {
                            errs.push(Error::Template(e));
                            continue;
                        }
                    };
                    let target = match &consume.resource {
                        Some(src) if !src.is_empty() => match template::execute_decode_id(
                            &mut ctx,
                            src,
                            &TemplateData::for_resource(consumer),
                        ) {
                            Ok(id) => id,
                            Err(e) => {
                                errs.push(Error::Template(e));
                                continue;
                            }
                        },
                        _ => consumer.clone(),
                    };
                    (value, self.current_id(&target))
                };

                let Some(res) = self.solution.vertex_mut(&target) else {
                    errs.push(Error::MissingResource(target));
                    continue;
                };
                if res.get_property(&consume.property_path).is_none() {
                    debug!(
                        "Delaying {} from {} into {}#{}",
                        consume.model, emitter, target, consume.property_path
                    );
                    self.constraints.push(ResourceConstraint {
                        operator: ConstraintOperator::Add,
                        target,
                        property: consume.property_path.clone(),
                        value,
                    });
                    continue;
                }
                if let Err(e) = res.set_property(&consume.property_path, value.clone()) {
                    errs.push(Error::Config(e));
                    continue;
                }
                self.record(Decision::SetProperty {
                    resource: target,
                    property: consume.property_path.clone(),
                    value,
                });
            }
        }
        Error::join(errs)
    }
}
