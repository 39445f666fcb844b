//! Rule templates: the interpreter and the live-graph function table.

pub mod context;
pub mod template;

pub use context::DynamicContext;
pub use template::{TemplateData, TemplateFunctions};
