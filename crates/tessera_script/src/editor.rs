// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editing facade pairing graph mutations with logged actions.
//!
//! UI and network layers mutate graphs only through this service
//! object; every successful mutation records the action needed to
//! invert it. Rejected edits return `false` and record nothing.

use crate::actions::GraphAction;
use crate::history::{ActionLog, HistoryError};
use std::sync::Arc;
use tessera_graph::{
    Graph, Node, NodeDefinition, NodeIndex, NodeValue, NodeValueType, PortIndex,
};

/// A graph together with its reversible action log
#[derive(Debug, Default)]
pub struct GraphEditor {
    graph: Graph,
    log: ActionLog,
}

impl GraphEditor {
    /// Wrap a graph with a fresh action log
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            log: ActionLog::new(),
        }
    }

    /// Wrap a graph with a custom history depth
    pub fn with_history_depth(graph: Graph, depth: usize) -> Self {
        Self {
            graph,
            log: ActionLog::with_max_depth(depth),
        }
    }

    /// The edited graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The action log
    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Unwrap the graph, discarding the log
    pub fn into_graph(self) -> Graph {
        self.graph
    }

    // ---- logged mutations ------------------------------------------------

    /// Instantiate a definition and add the node to the graph
    pub fn add_node_to_graph(&mut self, definition: &Arc<NodeDefinition>) -> NodeIndex {
        let index = self.graph.add_node(Node::new(definition));
        if let Some(memory) = self.graph.memory_of(index) {
            self.log.record(GraphAction::AddNode { memory });
        }
        index
    }

    /// Remove a node, capturing its snapshot and incident edges so undo
    /// can rebuild all of it
    pub fn remove_node_from_graph(&mut self, index: NodeIndex) -> bool {
        let Some(memory) = self.graph.memory_of(index) else {
            tracing::debug!("remove_node_from_graph: stale index {:?}", index);
            return false;
        };
        let edges = self.graph.incident_edges(index);
        self.graph.remove_node(index);
        self.log.record(GraphAction::RemoveNode { memory, edges });
        true
    }

    /// Wire an output port into an input port
    pub fn add_data_edge_to_graph(
        &mut self,
        from_node: NodeIndex,
        from_port: u32,
        to_node: NodeIndex,
        to_port: u32,
    ) -> bool {
        let from = PortIndex::new(from_node, from_port);
        let to = PortIndex::new(to_node, to_port);
        match self.graph.add_data_edge(from, to) {
            Ok(replaced) => {
                self.log.record(GraphAction::AddDataEdge {
                    input: to,
                    output: from,
                    replaced,
                });
                true
            }
            Err(err) => {
                tracing::debug!("Rejected data edge {:?} -> {:?}: {}", from, to, err);
                false
            }
        }
    }

    /// Remove the data edge into an input port
    pub fn remove_data_edge_from_graph(&mut self, to_node: NodeIndex, to_port: u32) -> bool {
        let input = PortIndex::new(to_node, to_port);
        match self.graph.remove_data_edge(input) {
            Some(output) => {
                self.log.record(GraphAction::RemoveDataEdge { input, output });
                true
            }
            None => {
                tracing::debug!("No data edge into {:?} to remove", input);
                false
            }
        }
    }

    /// Wire an execution output to a target node
    pub fn add_exec_edge_to_graph(
        &mut self,
        from_node: NodeIndex,
        from_port: u32,
        to_node: NodeIndex,
    ) -> bool {
        let from = PortIndex::new(from_node, from_port);
        match self.graph.add_exec_edge(from, to_node) {
            Ok(()) => {
                self.log.record(GraphAction::AddExecEdge { from, to: to_node });
                true
            }
            Err(err) => {
                tracing::debug!("Rejected execution edge {:?} -> {:?}: {}", from, to_node, err);
                false
            }
        }
    }

    /// Remove one execution edge
    pub fn remove_exec_edge_from_graph(
        &mut self,
        from_node: NodeIndex,
        from_port: u32,
        to_node: NodeIndex,
    ) -> bool {
        let from = PortIndex::new(from_node, from_port);
        if self.graph.remove_exec_edge(from, to_node) {
            self.log.record(GraphAction::RemoveExecEdge { from, to: to_node });
            true
        } else {
            tracing::debug!("No execution edge {:?} -> {:?} to remove", from, to_node);
            false
        }
    }

    /// Move a node in the editor
    pub fn set_node_position(&mut self, node: NodeIndex, position: [f32; 2]) -> bool {
        match self.graph.set_position(node, position) {
            Some(old) => {
                self.log.record(GraphAction::SetPosition {
                    node,
                    old,
                    new: position,
                });
                true
            }
            None => {
                tracing::debug!("set_node_position: stale index {:?}", node);
                false
            }
        }
    }

    /// Edit a node field value
    pub fn set_node_field_value(&mut self, node: NodeIndex, field: u32, value: NodeValue) -> bool {
        match self.graph.set_field(node, field, value.clone()) {
            Ok(old) => {
                self.log.record(GraphAction::SetField {
                    node,
                    field,
                    old,
                    new: value,
                });
                true
            }
            Err(err) => {
                tracing::debug!("Rejected field edit on {:?}: {}", node, err);
                false
            }
        }
    }

    /// Edit an input port's inline constant
    pub fn set_node_input_constant_value(
        &mut self,
        node: NodeIndex,
        port: u32,
        value: Option<NodeValue>,
    ) -> bool {
        match self.graph.set_input_constant(node, port, value.clone()) {
            Ok(old) => {
                self.log.record(GraphAction::SetInputConstant {
                    node,
                    port,
                    old,
                    new: value,
                });
                true
            }
            Err(err) => {
                tracing::debug!("Rejected constant edit on {:?}: {}", node, err);
                false
            }
        }
    }

    /// Declare a new variable. Retyping an existing variable is not a
    /// logged "add"; it is rejected here.
    pub fn add_variable_to_graph(&mut self, name: &str, ty: NodeValueType) -> bool {
        if self.graph.variable(name).is_some() {
            tracing::debug!("Variable '{}' already exists", name);
            return false;
        }
        self.graph.add_variable(name, ty.clone());
        self.log.record(GraphAction::AddVariable {
            name: name.to_string(),
            ty,
        });
        true
    }

    /// Remove a variable, capturing the edges its removal pruned
    pub fn remove_variable_from_graph(&mut self, name: &str) -> bool {
        match self.graph.remove_variable(name) {
            Some((ty, pruned)) => {
                self.log.record(GraphAction::RemoveVariable {
                    name: name.to_string(),
                    ty,
                    pruned,
                });
                true
            }
            None => {
                tracing::debug!("No variable '{}' to remove", name);
                false
            }
        }
    }

    // ---- history ---------------------------------------------------------

    /// Start collecting subsequent edits into one undoable unit (drag
    /// gestures)
    pub fn begin_compound(&mut self, description: impl Into<String>) -> Result<(), HistoryError> {
        self.log.begin_compound(description)
    }

    /// Close the open compound
    pub fn end_compound(&mut self) -> Result<(), HistoryError> {
        self.log.end_compound()
    }

    /// Undo the most recent action group
    pub fn undo(&mut self) -> Result<(), HistoryError> {
        self.log.undo(&mut self.graph)
    }

    /// Redo the most recently undone group
    pub fn redo(&mut self) -> Result<(), HistoryError> {
        self.log.redo(&mut self.graph)
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        self.log.can_undo()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        self.log.can_redo()
    }
}
