//! The flow document
//!
//! Loading and structural validation of an authored flow graph. A graph
//! that loads is safe to run: every referenced target exists, nodes that
//! need a follow-on target declare one, and everything is reachable from
//! the start node.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::node::{Node, NodeKind};
use crate::FlowError;

/// A validated flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowGraph {
    /// Entry node id
    pub start: String,
    /// Nodes keyed by id
    pub nodes: HashMap<String, Node>,
}

impl FlowGraph {
    /// Parse and validate a JSON flow document.
    pub fn from_json(document: &str) -> Result<Self, FlowError> {
        let graph: FlowGraph = serde_json::from_str(document)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Result<&Node, FlowError> {
        self.nodes
            .get(id)
            .ok_or_else(|| FlowError::UnknownNode(id.to_string()))
    }

    /// Structural validation.
    pub fn validate(&self) -> Result<(), FlowError> {
        if !self.nodes.contains_key(&self.start) {
            return Err(FlowError::NoStartNode(self.start.clone()));
        }

        for (id, node) in &self.nodes {
            for target in Self::targets_of(node) {
                if !self.nodes.contains_key(target) {
                    return Err(FlowError::UnknownNode(target.to_string()));
                }
            }

            let needs_next = matches!(
                node.kind,
                NodeKind::CollectInput { .. }
                    | NodeKind::ExtractVariable { .. }
                    | NodeKind::FunctionCall { .. }
                    | NodeKind::SendMessage { .. }
            );
            if needs_next && node.next.is_none() {
                return Err(FlowError::MissingNext(id.clone()));
            }
        }

        // Every node must be reachable from the start.
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(&self.start);
        queue.push_back(&self.start);

        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[id];
            for target in Self::targets_of(node) {
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        for id in self.nodes.keys() {
            if !seen.contains(id.as_str()) {
                return Err(FlowError::UnreachableNode(id.clone()));
            }
        }

        Ok(())
    }

    /// All target ids a node can route to.
    fn targets_of(node: &Node) -> Vec<&str> {
        let mut targets: Vec<&str> = node
            .transitions
            .iter()
            .map(|t| t.target.as_str())
            .collect();

        if let Some(next) = &node.next {
            targets.push(next);
        }

        match &node.kind {
            NodeKind::LogicSplit {
                branches,
                otherwise,
            } => {
                targets.extend(branches.iter().map(|b| b.target.as_str()));
                if let Some(otherwise) = otherwise {
                    targets.push(otherwise);
                }
            }
            NodeKind::PressDigit { mappings, .. } => {
                targets.extend(mappings.values().map(String::as_str));
            }
            NodeKind::FunctionCall { on_error, .. } => {
                if let Some(on_error) = on_error {
                    targets.push(on_error);
                }
            }
            _ => {}
        }

        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_doc() -> &'static str {
        r#"{
            "start": "greet",
            "nodes": {
                "greet": {
                    "kind": "conversation",
                    "goal": "greet the caller",
                    "script": "Hi, this is Maya from Acme Finance.",
                    "transitions": [{"condition": "caller is ready", "target": "bye"}]
                },
                "bye": {"kind": "end", "farewell": "Thanks for calling."}
            }
        }"#
    }

    #[test]
    fn test_loads_valid_document() {
        let graph = FlowGraph::from_json(two_node_doc()).unwrap();
        assert_eq!(graph.start, "greet");
        assert!(graph.node("bye").unwrap().kind.is_terminal());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let doc = r#"{
            "start": "greet",
            "nodes": {
                "greet": {
                    "kind": "conversation",
                    "goal": "greet",
                    "transitions": [{"condition": "x", "target": "nowhere"}]
                }
            }
        }"#;
        assert!(matches!(
            FlowGraph::from_json(doc),
            Err(FlowError::UnknownNode(id)) if id == "nowhere"
        ));
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let doc = r#"{
            "start": "greet",
            "nodes": {
                "greet": {"kind": "end"},
                "island": {"kind": "end"}
            }
        }"#;
        assert!(matches!(
            FlowGraph::from_json(doc),
            Err(FlowError::UnreachableNode(id)) if id == "island"
        ));
    }

    #[test]
    fn test_missing_next_rejected() {
        let doc = r#"{
            "start": "ask_phone",
            "nodes": {
                "ask_phone": {
                    "kind": "collect_input",
                    "variable": "phone",
                    "input_type": "phone",
                    "prompt": "What's your number?"
                }
            }
        }"#;
        assert!(matches!(
            FlowGraph::from_json(doc),
            Err(FlowError::MissingNext(id)) if id == "ask_phone"
        ));
    }

    #[test]
    fn test_missing_start_rejected() {
        let doc = r#"{"start": "ghost", "nodes": {}}"#;
        assert!(matches!(
            FlowGraph::from_json(doc),
            Err(FlowError::NoStartNode(_))
        ));
    }
}
