//! IG-060: CLI subcommands: solve, paths, validate.

use crate::core::parser;
use crate::core::types::ResourceId;
use crate::engine::path_selection::class_paths;
use crate::engine::{self, EngineConfig};
use crate::kb::KnowledgeBase;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve an input graph and print the solution as YAML
    Solve {
        /// Knowledge base file
        #[arg(long, default_value = "kb.yaml")]
        kb: PathBuf,

        /// Input graph file
        #[arg(short, long, default_value = "graph.yaml")]
        input: PathBuf,

        /// Write property_deps.dot and exec_order.txt here
        #[arg(long)]
        debug_dir: Option<PathBuf>,
    },

    /// List the type paths between two resource types
    Paths {
        /// Knowledge base file
        #[arg(long, default_value = "kb.yaml")]
        kb: PathBuf,

        /// Source type, `provider:type`
        from: String,

        /// Target type, `provider:type`
        to: String,

        /// Only paths satisfying this classification
        #[arg(short, long, default_value = "")]
        classification: String,
    },

    /// Parse a knowledge base and, optionally, an input graph
    Validate {
        /// Knowledge base file
        #[arg(long, default_value = "kb.yaml")]
        kb: PathBuf,

        /// Input graph file
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Solve {
            kb,
            input,
            debug_dir,
        } => cmd_solve(&kb, &input, debug_dir).map(|yaml| print!("{}", yaml)),
        Commands::Paths {
            kb,
            from,
            to,
            classification,
        } => cmd_paths(&kb, &from, &to, &classification).map(|paths| {
            for p in paths {
                println!("{}", p);
            }
        }),
        Commands::Validate { kb, input } => cmd_validate(&kb, input.as_deref()),
    }
}

fn cmd_solve(kb: &Path, input: &Path, debug_dir: Option<PathBuf>) -> Result<String, String> {
    let kb = Arc::new(KnowledgeBase::from_file(kb)?);
    let graph = parser::parse_input_file(input)?;
    let solution = engine::solve(kb, graph, EngineConfig { debug_dir }).map_err(|e| e.to_string())?;
    for d in solution.validation_errors() {
        eprintln!("  WARNING: {:?}", d);
    }
    solution.to_yaml().map_err(|e| e.to_string())
}

fn cmd_paths(kb: &Path, from: &str, to: &str, classification: &str) -> Result<Vec<String>, String> {
    let kb = KnowledgeBase::from_file(kb)?;
    let from = ResourceId::parse(from)?;
    let to = ResourceId::parse(to)?;
    let paths = class_paths(&kb, &from, &to, classification)?;
    Ok(paths
        .iter()
        .map(|p| {
            p.iter()
                .map(ResourceId::qualified_type_name)
                .collect::<Vec<_>>()
                .join(" -> ")
        })
        .collect())
}

fn cmd_validate(kb: &Path, input: Option<&Path>) -> Result<(), String> {
    let parsed = KnowledgeBase::from_file(kb)?;
    println!(
        "OK: {} ({} resource templates, {} edge templates)",
        kb.display(),
        parsed.list_resources().count(),
        parsed.list_edges().count()
    );
    let Some(input) = input else {
        return Ok(());
    };
    let graph = parser::parse_input_file(input)?;
    let errors = parser::validate_input(&graph);
    if errors.is_empty() {
        println!(
            "OK: {} ({} resources, {} edges)",
            input.display(),
            graph.resources.len(),
            graph.edges.len()
        );
        return Ok(());
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}
