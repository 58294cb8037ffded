//! Structural validation of workflow graphs
//!
//! Runs before a workflow is activated and before every execution. Checks are
//! applied in a fixed order and the first violation is returned:
//! 1. at least one trigger node (and unique node ids)
//! 2. every edge references existing nodes
//! 3. condition branches are labeled "true"/"false", at most once each
//! 4. no cycle among non-trigger nodes reachable from a trigger

use crate::error::ValidationError;
use crate::workflow::types::{GraphDefinition, NodeType};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{HashMap, HashSet};

/// Branch labels a condition node may use on its outgoing edges
pub const BRANCH_TRUE: &str = "true";
pub const BRANCH_FALSE: &str = "false";

/// Validate a graph definition for execution.
pub fn validate(definition: &GraphDefinition) -> Result<(), ValidationError> {
    if definition.trigger_nodes().next().is_none() {
        return Err(ValidationError::MissingTrigger);
    }

    let mut node_ids: HashSet<&str> = HashSet::with_capacity(definition.nodes.len());
    for node in &definition.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    for edge in &definition.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(ValidationError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    for node in definition.nodes.iter().filter(|n| n.node_type == NodeType::Condition) {
        check_condition_branches(definition, &node.id)?;
    }

    check_reachable_cycles(definition)
}

/// Validate a graph for promotion to `active`: everything `validate` checks,
/// plus at least one trigger must lead somewhere.
pub fn validate_for_activation(definition: &GraphDefinition) -> Result<(), ValidationError> {
    validate(definition)?;

    let leads_somewhere = definition.trigger_nodes().any(|trigger| {
        definition.outgoing(&trigger.id).any(|edge| {
            definition
                .node(&edge.target)
                .is_some_and(|target| target.node_type != NodeType::Trigger)
        })
    });

    if leads_somewhere {
        Ok(())
    } else {
        Err(ValidationError::NoReachableTerminal)
    }
}

fn check_condition_branches(definition: &GraphDefinition, node_id: &str) -> Result<(), ValidationError> {
    let mut seen: HashSet<&str> = HashSet::new();

    for edge in definition.outgoing(node_id) {
        let label = edge.source_handle.as_deref().ok_or_else(|| ValidationError::UnlabeledConditionBranch {
            node_id: node_id.to_string(),
            edge_id: edge.id.clone(),
        })?;
        if label != BRANCH_TRUE && label != BRANCH_FALSE {
            return Err(ValidationError::UnknownBranchLabel {
                node_id: node_id.to_string(),
                label: label.to_string(),
            });
        }
        if !seen.insert(label) {
            return Err(ValidationError::DuplicateBranch {
                node_id: node_id.to_string(),
                label: label.to_string(),
            });
        }
    }

    if seen.is_empty() {
        return Err(ValidationError::ConditionWithoutBranches(node_id.to_string()));
    }
    Ok(())
}

/// Cycles among non-trigger nodes would make traversal unbounded; cycles that
/// no trigger can reach are never executed and are tolerated.
fn check_reachable_cycles(definition: &GraphDefinition) -> Result<(), ValidationError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &definition.nodes {
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    for edge in &definition.edges {
        graph.add_edge(index[edge.source.as_str()], index[edge.target.as_str()], ());
    }

    let mut reachable: HashSet<NodeIndex> = HashSet::new();
    for trigger in definition.trigger_nodes() {
        let mut bfs = Bfs::new(&graph, index[trigger.id.as_str()]);
        while let Some(visited) = bfs.next(&graph) {
            reachable.insert(visited);
        }
    }

    let trigger_ids: HashSet<&str> = definition.trigger_nodes().map(|n| n.id.as_str()).collect();
    let restricted = graph.filter_map(
        |idx, id| (reachable.contains(&idx) && !trigger_ids.contains(id)).then_some(*id),
        |_, _| Some(()),
    );

    toposort(&restricted, None)
        .map(|_| ())
        .map_err(|cycle| ValidationError::CycleDetected(restricted[cycle.node_id()].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Edge, Node, Position};
    use serde_json::json;

    fn node(id: &str, node_type: NodeType) -> Node {
        Node {
            id: id.to_string(),
            node_type,
            subtype: "test".to_string(),
            position: Position::default(),
            data: json!({}),
        }
    }

    fn edge(id: &str, source: &str, target: &str, handle: Option<&str>) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: handle.map(str::to_string),
            target_handle: None,
        }
    }

    fn graph(nodes: Vec<Node>, edges: Vec<Edge>) -> GraphDefinition {
        GraphDefinition { nodes, edges }
    }

    #[test]
    fn valid_branching_graph_passes() {
        let definition = graph(
            vec![
                node("t", NodeType::Trigger),
                node("c", NodeType::Condition),
                node("yes", NodeType::Action),
                node("no", NodeType::Action),
                node("d", NodeType::Data),
            ],
            vec![
                edge("e1", "t", "c", None),
                edge("e2", "c", "yes", Some("true")),
                edge("e3", "c", "no", Some("false")),
                edge("e4", "yes", "d", None),
                edge("e5", "no", "d", None),
            ],
        );
        assert_eq!(validate(&definition), Ok(()));
        assert_eq!(validate_for_activation(&definition), Ok(()));
    }

    #[test]
    fn missing_trigger_is_reported_first() {
        // Also dangling, but the trigger check runs first.
        let definition = graph(vec![node("a", NodeType::Action)], vec![edge("e1", "a", "ghost", None)]);
        assert_eq!(validate(&definition), Err(ValidationError::MissingTrigger));
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let definition = graph(vec![node("t", NodeType::Trigger), node("t", NodeType::Action)], vec![]);
        assert_eq!(validate(&definition), Err(ValidationError::DuplicateNodeId("t".into())));
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let definition = graph(
            vec![node("t", NodeType::Trigger), node("a", NodeType::Action)],
            vec![edge("e1", "t", "a", None), edge("e2", "a", "ghost", None)],
        );
        assert_eq!(
            validate(&definition),
            Err(ValidationError::DanglingEdge { edge_id: "e2".into(), node_id: "ghost".into() })
        );
    }

    #[test]
    fn condition_branch_rules() {
        let base = || vec![node("t", NodeType::Trigger), node("c", NodeType::Condition), node("a", NodeType::Action), node("b", NodeType::Action)];

        let duplicate = graph(
            base(),
            vec![edge("e1", "t", "c", None), edge("e2", "c", "a", Some("true")), edge("e3", "c", "b", Some("true"))],
        );
        assert_eq!(
            validate(&duplicate),
            Err(ValidationError::DuplicateBranch { node_id: "c".into(), label: "true".into() })
        );

        let unlabeled = graph(base(), vec![edge("e1", "t", "c", None), edge("e2", "c", "a", None)]);
        assert_eq!(
            validate(&unlabeled),
            Err(ValidationError::UnlabeledConditionBranch { node_id: "c".into(), edge_id: "e2".into() })
        );

        let unknown = graph(base(), vec![edge("e1", "t", "c", None), edge("e2", "c", "a", Some("maybe"))]);
        assert_eq!(
            validate(&unknown),
            Err(ValidationError::UnknownBranchLabel { node_id: "c".into(), label: "maybe".into() })
        );

        let none = graph(base(), vec![edge("e1", "t", "c", None)]);
        assert_eq!(validate(&none), Err(ValidationError::ConditionWithoutBranches("c".into())));

        let single = graph(base(), vec![edge("e1", "t", "c", None), edge("e2", "c", "a", Some("false"))]);
        assert_eq!(validate(&single), Ok(()));
    }

    #[test]
    fn reachable_cycle_is_rejected() {
        let definition = graph(
            vec![node("t", NodeType::Trigger), node("a", NodeType::Action), node("b", NodeType::Action)],
            vec![edge("e1", "t", "a", None), edge("e2", "a", "b", None), edge("e3", "b", "a", None)],
        );
        assert!(matches!(validate(&definition), Err(ValidationError::CycleDetected(_))));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let definition = graph(
            vec![node("t", NodeType::Trigger), node("a", NodeType::Action)],
            vec![edge("e1", "t", "a", None), edge("e2", "a", "a", None)],
        );
        assert_eq!(validate(&definition), Err(ValidationError::CycleDetected("a".into())));
    }

    #[test]
    fn unreachable_cycle_and_edges_back_into_triggers_are_tolerated() {
        let definition = graph(
            vec![
                node("t", NodeType::Trigger),
                node("a", NodeType::Action),
                node("x", NodeType::Action),
                node("y", NodeType::Action),
            ],
            vec![
                edge("e1", "t", "a", None),
                edge("e2", "a", "t", None),
                edge("e3", "x", "y", None),
                edge("e4", "y", "x", None),
            ],
        );
        assert_eq!(validate(&definition), Ok(()));
    }

    #[test]
    fn lone_trigger_cannot_be_activated() {
        let definition = graph(vec![node("t", NodeType::Trigger)], vec![]);
        assert_eq!(validate(&definition), Ok(()));
        assert_eq!(validate_for_activation(&definition), Err(ValidationError::NoReachableTerminal));
    }
}
