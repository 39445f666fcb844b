//! Core data model: identifiers, resources, graphs, constraints, input parsing.

pub mod constraints;
pub mod graph;
pub mod parser;
pub mod path;
pub mod types;
