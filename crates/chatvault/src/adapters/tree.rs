//! Depth-first traversal of parent/child message mappings.
//!
//! Branching exports keep every edit and regeneration as a sibling node. The
//! walker linearises the mapping in pre-order, following children in the
//! order they are listed. With [`BranchPolicy::AllChildren`] every reachable
//! node is visited; [`BranchPolicy::ActivePath`] narrows each fork to the
//! branch leading to the export's selected node when one is known.

use std::collections::HashSet;

use serde_json::{Map, Value};

/// Synthetic parent id some exports use instead of a null parent.
pub const CLIENT_CREATED_ROOT: &str = "client-created-root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchPolicy {
    #[default]
    AllChildren,
    ActivePath,
}

/// Visits every reachable node of `mapping` in depth-first pre-order.
///
/// Each node is visited at most once, so cycles and nodes reachable from two
/// roots cannot duplicate content. Returns the number of nodes visited.
pub fn walk<F>(
    mapping: &Map<String, Value>,
    selected_node: Option<&str>,
    policy: BranchPolicy,
    mut visit: F,
) -> usize
where
    F: FnMut(&str, &Map<String, Value>),
{
    let active_path = match policy {
        BranchPolicy::AllChildren => HashSet::new(),
        BranchPolicy::ActivePath => active_path(mapping, selected_node),
    };

    let roots = narrow_to_active(root_ids(mapping), &active_path);
    let mut stack: Vec<&str> = roots.into_iter().rev().collect();
    let mut visited = HashSet::new();

    while let Some(node_id) = stack.pop() {
        if !visited.insert(node_id) {
            continue;
        }
        let Some(node) = mapping.get(node_id).and_then(Value::as_object) else {
            continue;
        };

        visit(node_id, node);

        let children = narrow_to_active(child_ids(node, mapping), &active_path);
        stack.extend(children.into_iter().rev());
    }

    visited.len()
}

/// Root nodes in mapping order: null-parent nodes, then children of the
/// synthetic client root when that root is not itself part of the mapping.
#[must_use]
pub fn root_ids(mapping: &Map<String, Value>) -> Vec<&str> {
    let synthetic_root_present = mapping.contains_key(CLIENT_CREATED_ROOT);
    let mut null_parent = Vec::new();
    let mut synthetic_children = Vec::new();

    for (node_id, node) in mapping {
        match node.get("parent") {
            None | Some(Value::Null) => null_parent.push(node_id.as_str()),
            Some(Value::String(parent))
                if parent == CLIENT_CREATED_ROOT && !synthetic_root_present =>
            {
                synthetic_children.push(node_id.as_str());
            }
            Some(_) => {}
        }
    }

    null_parent.extend(synthetic_children);
    null_parent
}

fn child_ids<'a>(node: &'a Map<String, Value>, mapping: &Map<String, Value>) -> Vec<&'a str> {
    node.get("children")
        .and_then(Value::as_array)
        .map(|children| {
            children
                .iter()
                .filter_map(Value::as_str)
                .filter(|child_id| mapping.contains_key(*child_id))
                .collect()
        })
        .unwrap_or_default()
}

fn active_path<'a>(
    mapping: &'a Map<String, Value>,
    selected_node: Option<&str>,
) -> HashSet<&'a str> {
    let mut path = HashSet::new();
    let Some((mut current, _)) = selected_node.and_then(|id| mapping.get_key_value(id)) else {
        return path;
    };

    loop {
        if !path.insert(current.as_str()) {
            break;
        }
        let parent = mapping
            .get(current)
            .and_then(|node| node.get("parent"))
            .and_then(Value::as_str)
            .and_then(|parent| mapping.get_key_value(parent));
        match parent {
            Some((parent_id, _)) => current = parent_id,
            None => break,
        }
    }

    path
}

fn narrow_to_active<'a>(candidates: Vec<&'a str>, active_path: &HashSet<&'a str>) -> Vec<&'a str> {
    if active_path.is_empty() || candidates.len() < 2 {
        return candidates;
    }
    let on_path: Vec<&str> = candidates
        .iter()
        .copied()
        .filter(|candidate| active_path.contains(candidate))
        .collect();
    if on_path.is_empty() {
        candidates
    } else {
        on_path
    }
}
