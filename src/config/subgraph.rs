//! Subgraph expansion.
//!
//! A node whose calculator names a registered subgraph is replaced by the
//! subgraph's nodes. The subgraph's graph-level streams and side packets are
//! bound to the outer node's ports with the same tag and index; every other
//! name inside the subgraph gets a per-instance prefix so two instances of
//! one subgraph never share internal streams.

use crate::config::{GraphConfig, NodeConfig};
use crate::error::{Error, Result};
use crate::pipeline::port::parse_tag_index_name;
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup from calculator name to a registered subgraph.
pub type SubgraphLookup<'a> = dyn Fn(&str) -> Option<Arc<GraphConfig>> + 'a;

const MAX_SUBGRAPH_DEPTH: usize = 32;

/// Expand every subgraph node of `config`, recursively.
pub fn expand_subgraphs(config: &GraphConfig, lookup: &SubgraphLookup<'_>) -> Result<GraphConfig> {
    let mut stack = Vec::new();
    expand_nodes(config, lookup, &mut stack)
}

fn expand_nodes(
    config: &GraphConfig,
    lookup: &SubgraphLookup<'_>,
    stack: &mut Vec<String>,
) -> Result<GraphConfig> {
    let mut expanded = config.clone();
    expanded.nodes = Vec::with_capacity(config.nodes.len());

    for (position, node) in config.nodes.iter().enumerate() {
        let Some(subgraph) = lookup(&node.calculator) else {
            expanded.nodes.push(node.clone());
            continue;
        };

        if stack.contains(&node.calculator) || stack.len() >= MAX_SUBGRAPH_DEPTH {
            return Err(Error::Config(format!(
                "subgraph \"{}\" includes itself (via {})",
                node.calculator,
                stack.join(" -> ")
            )));
        }

        stack.push(node.calculator.clone());
        let inner = expand_nodes(&subgraph, lookup, stack)?;
        stack.pop();

        let prefix = instance_prefix(node, position);
        tracing::debug!(
            "Expanding subgraph {} as {} ({} nodes)",
            node.calculator,
            prefix,
            inner.nodes.len()
        );
        expanded
            .nodes
            .extend(instantiate(node, &inner, &prefix)?);
    }

    Ok(expanded)
}

/// Lowercased, identifier-safe prefix unique to this node position.
fn instance_prefix(node: &NodeConfig, position: usize) -> String {
    let mut prefix: String = node
        .display_name()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if prefix.starts_with(|c: char| c.is_ascii_digit()) {
        prefix.insert(0, '_');
    }
    format!("{}_{}", prefix, position)
}

/// Map `(tag, index)` of each subgraph boundary port to the outer name.
fn bind_boundary(
    kind: &str,
    subgraph_specs: &[String],
    outer_specs: &[String],
    calculator: &str,
    bindings: &mut HashMap<String, String>,
) -> Result<()> {
    let index_specs = |specs: &[String]| -> Result<HashMap<(String, usize), String>> {
        let mut next_index: HashMap<String, usize> = HashMap::new();
        let mut out = HashMap::new();
        for spec in specs {
            let parsed = parse_tag_index_name(spec)?;
            let counter = next_index.entry(parsed.tag.clone()).or_insert(0);
            let index = parsed.index.unwrap_or(*counter);
            *counter = (*counter).max(index + 1);
            out.insert((parsed.tag, index), parsed.name);
        }
        Ok(out)
    };

    let inner = index_specs(subgraph_specs)?;
    let outer = index_specs(outer_specs)?;

    for ((tag, index), outer_name) in &outer {
        let inner_name = inner.get(&(tag.clone(), *index)).ok_or_else(|| {
            Error::Config(format!(
                "subgraph \"{}\" has no {} {}:{}",
                calculator, kind, tag, index
            ))
        })?;
        bindings.insert(inner_name.clone(), outer_name.clone());
    }
    Ok(())
}

fn rename_spec(spec: &str, bindings: &HashMap<String, String>, prefix: &str) -> Result<String> {
    let parsed = parse_tag_index_name(spec)?;
    let name = bindings
        .get(&parsed.name)
        .cloned()
        .unwrap_or_else(|| format!("{}__{}", prefix, parsed.name));
    Ok(match (parsed.tag.is_empty(), parsed.index) {
        (true, _) => name,
        (false, None) => format!("{}:{}", parsed.tag, name),
        (false, Some(index)) => format!("{}:{}:{}", parsed.tag, index, name),
    })
}

fn rename_all(
    specs: &[String],
    bindings: &HashMap<String, String>,
    prefix: &str,
) -> Result<Vec<String>> {
    specs
        .iter()
        .map(|spec| rename_spec(spec, bindings, prefix))
        .collect()
}

fn instantiate(outer: &NodeConfig, subgraph: &GraphConfig, prefix: &str) -> Result<Vec<NodeConfig>> {
    let mut streams = HashMap::new();
    bind_boundary(
        "input stream",
        &subgraph.input_stream,
        &outer.input_stream,
        &outer.calculator,
        &mut streams,
    )?;
    bind_boundary(
        "output stream",
        &subgraph.output_stream,
        &outer.output_stream,
        &outer.calculator,
        &mut streams,
    )?;

    let mut side_packets = HashMap::new();
    bind_boundary(
        "input side packet",
        &subgraph.input_side_packet,
        &outer.input_side_packet,
        &outer.calculator,
        &mut side_packets,
    )?;
    bind_boundary(
        "output side packet",
        &subgraph.output_side_packet,
        &outer.output_side_packet,
        &outer.calculator,
        &mut side_packets,
    )?;

    subgraph
        .nodes
        .iter()
        .map(|node| {
            let mut node = node.clone();
            node.name = Some(format!("{}__{}", prefix, node.display_name()));
            node.input_stream = rename_all(&node.input_stream, &streams, prefix)?;
            node.output_stream = rename_all(&node.output_stream, &streams, prefix)?;
            node.input_side_packet = rename_all(&node.input_side_packet, &side_packets, prefix)?;
            node.output_side_packet = rename_all(&node.output_side_packet, &side_packets, prefix)?;
            if node.executor.is_none() {
                node.executor = outer.executor.clone();
            }
            Ok(node)
        })
        .collect()
}
