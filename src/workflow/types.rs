//! Core workflow type definitions
//!
//! Defines workflows and their graph definitions (nodes + edges). These types are
//! serialized to JSON for persistence and for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A named automation owned by an artist
///
/// Workflows are created in `draft`, promoted to `active` explicitly and may be
/// `paused`. Only the definition is executed; the metadata is for owners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier
    pub id: String,
    /// Owning artist
    pub artist_id: String,
    /// Human-readable workflow name
    pub name: String,
    pub description: Option<String>,
    pub category: WorkflowCategory,
    pub status: WorkflowStatus,
    /// Node/edge graph executed by the runtime
    pub definition: GraphDefinition,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when authoring a workflow (manually, from a template or by
/// a generator). Status always starts as `draft`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkflow {
    pub artist_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: WorkflowCategory,
    pub definition: GraphDefinition,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewWorkflow {
    pub fn into_workflow(self) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: uuid::Uuid::new_v4().to_string(),
            artist_id: self.artist_id,
            name: self.name,
            description: self.description,
            category: self.category,
            status: WorkflowStatus::Draft,
            definition: self.definition,
            tags: self.tags,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    FanEngagement,
    ReleaseAutomation,
    RevenueTracking,
    Marketing,
    Collaboration,
    #[default]
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
}

/// The executable graph of a workflow
///
/// Deserialization accepts both the node/edge shape and the legacy linear shape
/// (`triggerType` + `actions[]`), which is migrated on read. Only the graph shape
/// is ever written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredDefinition")]
pub struct GraphDefinition {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// A single node in the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the graph (e.g., "n1", "tip-trigger")
    pub id: String,
    /// Node category which determines how the engine treats it
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Concrete behaviour key (e.g., "tip_received", "send_email", "if_else")
    pub subtype: String,
    /// Editor layout only
    #[serde(default)]
    pub position: Position,
    /// Subtype-specific configuration
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Describes what starts the workflow; carries the trigger payload onward
    Trigger,
    /// Invokes a registered action handler
    Action,
    /// Evaluates a boolean expression and follows one labeled branch
    Condition,
    /// Derives values merged into the payload seen downstream
    Data,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Directed connection between two nodes
///
/// `source_handle` labels condition branches ("true" / "false").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl GraphDefinition {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Trigger nodes in declaration order
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| node.node_type == NodeType::Trigger)
    }

    /// Outgoing edges of a node, in edge insertion order
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |edge| edge.source == node_id)
    }
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Trigger => "trigger",
            NodeType::Action => "action",
            NodeType::Condition => "condition",
            NodeType::Data => "data",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkflowStatus::Draft),
            "active" => Ok(WorkflowStatus::Active),
            "paused" => Ok(WorkflowStatus::Paused),
            other => Err(anyhow::anyhow!("Unknown workflow status: {}", other)),
        }
    }
}

impl WorkflowCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowCategory::FanEngagement => "fan_engagement",
            WorkflowCategory::ReleaseAutomation => "release_automation",
            WorkflowCategory::RevenueTracking => "revenue_tracking",
            WorkflowCategory::Marketing => "marketing",
            WorkflowCategory::Collaboration => "collaboration",
            WorkflowCategory::Custom => "custom",
        }
    }
}

impl FromStr for WorkflowCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fan_engagement" => Ok(WorkflowCategory::FanEngagement),
            "release_automation" => Ok(WorkflowCategory::ReleaseAutomation),
            "revenue_tracking" => Ok(WorkflowCategory::RevenueTracking),
            "marketing" => Ok(WorkflowCategory::Marketing),
            "collaboration" => Ok(WorkflowCategory::Collaboration),
            "custom" => Ok(WorkflowCategory::Custom),
            other => Err(anyhow::anyhow!("Unknown workflow category: {}", other)),
        }
    }
}

/// On-disk / on-wire definition shapes
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDefinition {
    Graph {
        nodes: Vec<Node>,
        #[serde(default)]
        edges: Vec<Edge>,
    },
    Linear(LinearDefinition),
}

/// Legacy definition: one trigger and a flat list of actions
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinearDefinition {
    trigger_type: String,
    #[serde(default)]
    trigger_config: Value,
    #[serde(default)]
    actions: Vec<LinearAction>,
}

#[derive(Deserialize)]
struct LinearAction {
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    config: Value,
}

impl From<StoredDefinition> for GraphDefinition {
    fn from(stored: StoredDefinition) -> Self {
        match stored {
            StoredDefinition::Graph { nodes, edges } => GraphDefinition { nodes, edges },
            StoredDefinition::Linear(linear) => linear.into_graph(),
        }
    }
}

impl LinearDefinition {
    /// The trigger fans out to every action so each one still runs
    /// independently of the others.
    fn into_graph(self) -> GraphDefinition {
        let trigger_id = "trigger".to_string();
        let mut nodes = vec![Node {
            id: trigger_id.clone(),
            node_type: NodeType::Trigger,
            subtype: self.trigger_type,
            position: Position::default(),
            data: self.trigger_config,
        }];
        let mut edges = Vec::with_capacity(self.actions.len());

        for (index, action) in self.actions.into_iter().enumerate() {
            let node_id = format!("action-{}", index + 1);
            edges.push(Edge {
                id: format!("e-{}-{}", trigger_id, node_id),
                source: trigger_id.clone(),
                target: node_id.clone(),
                source_handle: None,
                target_handle: None,
            });
            nodes.push(Node {
                id: node_id,
                node_type: NodeType::Action,
                subtype: action.action_type,
                position: Position { x: 250.0, y: 120.0 * (index as f64 + 1.0) },
                data: action.config,
            });
        }

        GraphDefinition { nodes, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graph_shape_round_trips_through_json() {
        let raw = json!({
            "nodes": [
                { "id": "t", "type": "trigger", "subtype": "tip_received", "position": { "x": 0.0, "y": 0.0 }, "data": {} },
                { "id": "c", "type": "condition", "subtype": "if_else", "data": { "expression": "amount > 100" } }
            ],
            "edges": [
                { "id": "e1", "source": "t", "target": "c" },
                { "id": "e2", "source": "c", "target": "t", "sourceHandle": "true" }
            ]
        });

        let graph: GraphDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[1].node_type, NodeType::Condition);
        assert_eq!(graph.edges[1].source_handle.as_deref(), Some("true"));

        let encoded = serde_json::to_value(&graph).unwrap();
        assert_eq!(encoded["edges"][1]["sourceHandle"], "true");
        assert!(encoded["edges"][0].get("sourceHandle").is_none());
        assert_eq!(encoded["nodes"][0]["type"], "trigger");
    }

    #[test]
    fn linear_definition_is_migrated_to_a_fan_out_graph() {
        let raw = json!({
            "triggerType": "sale_completed",
            "triggerConfig": { "eventType": "sale_completed" },
            "actions": [
                { "type": "send_email", "config": { "to": "{{email}}" } },
                { "type": "post_social", "config": {} }
            ]
        });

        let graph: GraphDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.trigger_nodes().count(), 1);
        assert_eq!(graph.nodes[0].subtype, "sale_completed");
        assert_eq!(graph.nodes[1].subtype, "send_email");
        assert_eq!(graph.nodes[2].node_type, NodeType::Action);

        let targets: Vec<&str> = graph.outgoing("trigger").map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["action-1", "action-2"]);
    }

    #[test]
    fn outgoing_preserves_edge_insertion_order() {
        let graph: GraphDefinition = serde_json::from_value(json!({
            "nodes": [
                { "id": "t", "type": "trigger", "subtype": "manual" },
                { "id": "b", "type": "action", "subtype": "x" },
                { "id": "a", "type": "action", "subtype": "y" }
            ],
            "edges": [
                { "id": "e1", "source": "t", "target": "b" },
                { "id": "e2", "source": "t", "target": "a" }
            ]
        }))
        .unwrap();

        let targets: Vec<&str> = graph.outgoing("t").map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["b", "a"]);
    }

    #[test]
    fn status_parses_from_storage_strings() {
        assert_eq!("paused".parse::<WorkflowStatus>().unwrap(), WorkflowStatus::Paused);
        assert!("archived".parse::<WorkflowStatus>().is_err());
        assert_eq!(
            "revenue_tracking".parse::<WorkflowCategory>().unwrap(),
            WorkflowCategory::RevenueTracking
        );
    }
}
