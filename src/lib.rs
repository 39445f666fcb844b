//! Infragraph: knowledge-base driven infrastructure graph resolution.
//!
//! A partial graph of resources and edges is grown into a complete one by
//! evaluating property rules in dependency order and expanding abstract
//! edges into concrete paths.

pub mod cli;
pub mod core;
pub mod engine;
pub mod kb;
pub mod rules;
