//! IG-049: Debug rendering of the evaluation graph.
//!
//! `property_deps.dot` clusters vertices by the group they were evaluated
//! in; `exec_order.txt` lists the same order as plain text.

use super::vertex::Key;
use super::Evaluator;
use crate::engine::Error;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const ERROR_COLOR: &str = "#e87b7b";

pub fn write_debug_files(eval: &Evaluator, dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join("property_deps.dot"), render_dot(eval))?;
    fs::write(dir.join("exec_order.txt"), render_exec_order(eval))?;
    Ok(())
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}

fn attributes(eval: &Evaluator, key: &Key) -> Vec<(String, String)> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut style = Vec::new();
    match key {
        Key::Property(r) => {
            attrs.push(("shape".into(), "box".into()));
            attrs.push(("label".into(), format!("{}\\n{}", r.resource, r.property)));
        }
        Key::GraphState(repr) => {
            attrs.push(("shape".into(), "box".into()));
            attrs.push(("label".into(), repr.clone()));
            style.push("dashed");
        }
        Key::PathExpand { edge, satisfaction } => {
            attrs.push(("shape".into(), "parallelogram".into()));
            let mut label = format!("{}\\n{}", edge.source, edge.target);
            if !satisfaction.classification.is_empty() {
                label.push_str(&format!("\\n<{}>", satisfaction.classification));
            }
            attrs.push(("label".into(), label));
            style.push("dashed");
        }
        Key::Edge(edge) => {
            attrs.push(("shape".into(), "parallelogram".into()));
            attrs.push(("label".into(), format!("{}\\n{}", edge.source, edge.target)));
        }
        Key::ResourceRule { resource, rule_hash } => {
            attrs.push(("shape".into(), "octagon".into()));
            attrs.push(("label".into(), format!("{}\\nrule {}", resource, rule_hash)));
        }
    }
    if eval.errored.contains(key) {
        style.push("filled");
        attrs.push(("fillcolor".into(), ERROR_COLOR.into()));
    }
    if !style.is_empty() {
        attrs.push(("style".into(), style.join(",")));
    }
    if let Some(stats) = eval.stats.get(key) {
        attrs.push((
            "tooltip".into(),
            format!("{} in {:?}", stats.ready, stats.duration),
        ));
    }
    attrs
}

fn write_node(out: &mut String, eval: &Evaluator, key: &Key, indent: &str) {
    let attrs = attributes(eval, key)
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, quote(&v)))
        .collect::<Vec<_>>()
        .join(", ");
    // writing to a String cannot fail
    let _ = writeln!(out, "{}{} [{}]", indent, quote(&key.to_string()), attrs);
}

pub fn render_dot(eval: &Evaluator) -> String {
    let mut out = String::from("digraph {\n  rankdir = BT\n  ranksep = 4\n  newrank = true\n");
    let mut placed = BTreeSet::new();
    for (i, group) in eval.evaluated_order.iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(out, "  subgraph cluster_{} {{\n    label = \"Evaluation Group {}\"", i, i);
        for key in group {
            if eval.graph.contains(key) && placed.insert(key.clone()) {
                write_node(&mut out, eval, key, "    ");
            }
        }
        out.push_str("  }\n");
    }

    let pending: Vec<&Key> = eval
        .graph
        .keys()
        .filter(|k| !placed.contains(*k))
        .collect();
    if !pending.is_empty() {
        out.push_str("  subgraph cluster_unevaluated {\n    label = \"Unevaluated\"\n");
        for key in pending {
            write_node(&mut out, eval, key, "    ");
        }
        out.push_str("  }\n");
    }

    for (source, target) in eval.graph.edges() {
        let _ = writeln!(
            out,
            "  {} -> {} [constraint=false]",
            quote(&source.to_string()),
            quote(&target.to_string())
        );
    }
    out.push_str("}\n");
    out
}

pub fn render_exec_order(eval: &Evaluator) -> String {
    let mut out = String::new();
    for (i, group) in eval.evaluated_order.iter().enumerate() {
        for key in group {
            let marker = if eval.errored.contains(key) { " (error)" } else { "" };
            let _ = writeln!(out, "{}: {}{}", i, key, marker);
        }
    }
    out
}
