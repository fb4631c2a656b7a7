//! Multi-turn journeys
//!
//! A journey is a graph of nodes (each carrying an action) and edges (each
//! carrying an optional transition condition) encoding a multi-step process
//! such as a booking flow. The engine never walks the graph directly during
//! matching; instead each `(edge, node)` pair is projected onto a synthetic
//! *journey-node guideline* so journeys and plain guidelines go through one
//! uniform matching pipeline. Graphs may contain cycles; projection keeps a
//! visited set of `(edge_id, node_id)` pairs.

use crate::guideline::{Guideline, GuidelineContent, GuidelineMetadata, JourneyNodeRef};
use crate::types::{EdgeId, GuidelineId, JourneyId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A step in a journey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyNode {
    pub id: NodeId,
    /// What the agent should do when the journey reaches this node
    pub action: String,
}

impl JourneyNode {
    /// Create a node
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            action: action.into(),
        }
    }
}

/// A transition between journey nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    /// Condition gating the transition, in natural language
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl JourneyEdge {
    /// Create an unconditional edge
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self {
            id: EdgeId::new(),
            source,
            target,
            condition: None,
        }
    }

    /// Set the transition condition
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// A graph of nodes and edges encoding a multi-step process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub id: JourneyId,
    pub title: String,
    /// When the journey as a whole becomes relevant, in natural language
    pub conditions: Vec<String>,
    /// Entry node
    pub root: NodeId,
    pub nodes: HashMap<NodeId, JourneyNode>,
    pub edges: Vec<JourneyEdge>,
    pub created_at: DateTime<Utc>,
}

impl Journey {
    /// Create a journey from a root node
    pub fn new(title: impl Into<String>, conditions: Vec<String>, root: JourneyNode) -> Self {
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            id: JourneyId::new(),
            title: title.into(),
            conditions,
            root: root_id,
            nodes,
            edges: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Add a node
    pub fn add_node(&mut self, node: JourneyNode) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Add an edge
    pub fn add_edge(&mut self, edge: JourneyEdge) -> EdgeId {
        let id = edge.id;
        self.edges.push(edge);
        id
    }

    /// Outgoing edges of a node
    pub fn edges_from(&self, node_id: NodeId) -> Vec<&JourneyEdge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    /// Nodes reachable in one transition from `node_id`
    pub fn successors(&self, node_id: NodeId) -> HashSet<NodeId> {
        self.edges_from(node_id).iter().map(|e| e.target).collect()
    }

    /// Project the graph onto synthetic journey-node guidelines.
    ///
    /// The root projects as `journey_node:<root>` conditioned on the journey
    /// conditions; every reachable `(edge, node)` pair projects as
    /// `journey_node:<node>:<edge>` conditioned on the source step having
    /// completed plus the edge condition. Cyclic graphs terminate because
    /// each `(edge, node)` pair is visited at most once.
    pub fn project_guidelines(&self) -> Vec<Guideline> {
        let mut projected = Vec::new();
        let mut visited: HashSet<(Option<EdgeId>, NodeId)> = HashSet::new();
        let mut queue: VecDeque<(Option<EdgeId>, NodeId)> = VecDeque::new();

        queue.push_back((None, self.root));

        while let Some((edge_id, node_id)) = queue.pop_front() {
            if !visited.insert((edge_id, node_id)) {
                continue;
            }

            let node = match self.nodes.get(&node_id) {
                Some(node) => node,
                None => continue,
            };

            let edge = edge_id.and_then(|id| self.edges.iter().find(|e| e.id == id));
            projected.push(self.node_guideline(node, edge));

            for next in self.edges_from(node_id) {
                queue.push_back((Some(next.id), next.target));
            }
        }

        projected
    }

    fn node_guideline(&self, node: &JourneyNode, edge: Option<&JourneyEdge>) -> Guideline {
        let condition = match edge {
            None => format!(
                "the '{}' journey begins: {}",
                self.title,
                self.conditions.join("; or ")
            ),
            Some(edge) => {
                let source_action = self
                    .nodes
                    .get(&edge.source)
                    .map(|n| n.action.as_str())
                    .unwrap_or("the previous step");
                match &edge.condition {
                    Some(cond) => format!(
                        "within the '{}' journey, '{}' is done and {}",
                        self.title, source_action, cond
                    ),
                    None => format!(
                        "within the '{}' journey, '{}' is done",
                        self.title, source_action
                    ),
                }
            }
        };

        let mut metadata = GuidelineMetadata::default();
        metadata.journey_node = Some(JourneyNodeRef {
            journey_id: self.id,
            node_id: node.id,
            edge_id: edge.map(|e| e.id),
        });

        Guideline {
            id: GuidelineId::journey_node(node.id, edge.map(|e| e.id)),
            content: GuidelineContent::new(condition, node.action.clone()),
            enabled: true,
            tags: Vec::new(),
            metadata,
            created_at: self.created_at,
        }
    }
}
