use serde::Serialize;

use crate::registry::StepId;

/// Registered workflow topology as a node/edge graph.
///
/// Built on demand from the step registry; an edge from `a` to `b` on topic
/// `t` means step `a` declares `t` in its emitted topics and one of `b`'s
/// subscription patterns matches `t`. Purely descriptive: routing never
/// consults this graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WorkflowDescription {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDescription {
    /// Looks up a node by step id.
    #[must_use]
    pub fn node(&self, id: &StepId) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// Whether an edge from `from` to `to` exists on `topic`.
    #[must_use]
    pub fn has_edge(&self, from: &StepId, to: &StepId, topic: &str) -> bool {
        self.edges
            .iter()
            .any(|edge| &edge.from == from && &edge.to == to && edge.topic == topic)
    }
}

/// One registered step, as presented to visualization tooling.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: StepId,
    pub name: String,
    /// `"local"` for in-process steps, otherwise the worker endpoint name.
    pub kind: String,
    pub subscribes: Vec<String>,
    pub emits: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

/// A declared topic flowing from one step to another.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    pub from: StepId,
    pub to: StepId,
    pub topic: String,
}
