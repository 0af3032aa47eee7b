// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reversible graph actions.
//!
//! Each variant records the arguments needed to compute its exact
//! inverse at capture time; the graph has no generic structural diff,
//! so inverses are written per action kind. `apply` replays an action
//! (redo), `revert` undoes it.

use serde::{Deserialize, Serialize};
use tessera_graph::{
    EditError, Graph, IncidentEdges, NodeIndex, NodeMemory, NodeValue, NodeValueType, PortIndex,
};

/// Error applying or reverting an action
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    /// The target node no longer exists
    #[error("node missing: {0:?}")]
    NodeMissing(NodeIndex),

    /// The target edge no longer exists
    #[error("edge missing")]
    EdgeMissing,

    /// The node's arena slot was reused and the snapshot cannot go back
    #[error("restore failed for node {0:?}")]
    RestoreFailed(NodeIndex),

    /// The target variable no longer exists
    #[error("variable missing: {0}")]
    VariableMissing(String),

    /// The underlying edit was rejected
    #[error(transparent)]
    Edit(#[from] EditError),
}

/// One logged graph mutation with enough captured state to invert it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphAction {
    /// A node was added; the snapshot allows redo to reinsert it at the
    /// same index
    AddNode {
        /// Snapshot taken right after creation
        memory: NodeMemory,
    },

    /// A node was removed along with its incident edges
    RemoveNode {
        /// Snapshot taken right before removal
        memory: NodeMemory,
        /// Every edge and boundary binding the removal severed
        edges: IncidentEdges,
    },

    /// A data edge was added, possibly replacing the input's previous
    /// source
    AddDataEdge {
        /// The written input port
        input: PortIndex,
        /// The new source output
        output: PortIndex,
        /// The source the input carried before, if any
        replaced: Option<PortIndex>,
    },

    /// A data edge was removed
    RemoveDataEdge {
        /// The input port the edge targeted
        input: PortIndex,
        /// The source output it carried
        output: PortIndex,
    },

    /// An execution edge was added
    AddExecEdge {
        /// The source execution output
        from: PortIndex,
        /// The target node
        to: NodeIndex,
    },

    /// An execution edge was removed
    RemoveExecEdge {
        /// The source execution output
        from: PortIndex,
        /// The target node
        to: NodeIndex,
    },

    /// A node was moved in the editor
    SetPosition {
        /// The moved node
        node: NodeIndex,
        /// Position before the move
        old: [f32; 2],
        /// Position after the move
        new: [f32; 2],
    },

    /// A field value was edited
    SetField {
        /// The edited node
        node: NodeIndex,
        /// Field ordinal
        field: u32,
        /// Value before the edit
        old: NodeValue,
        /// Value after the edit
        new: NodeValue,
    },

    /// An input port's inline constant was edited
    SetInputConstant {
        /// The edited node
        node: NodeIndex,
        /// Input port ordinal
        port: u32,
        /// Constant before the edit
        old: Option<NodeValue>,
        /// Constant after the edit
        new: Option<NodeValue>,
    },

    /// A variable was added to the graph
    AddVariable {
        /// Variable name
        name: String,
        /// Declared type
        ty: NodeValueType,
    },

    /// A variable was removed, pruning edges that depended on it
    RemoveVariable {
        /// Variable name
        name: String,
        /// The type it had
        ty: NodeValueType,
        /// Data edges the removal pruned, as `(input, output)` pairs
        pruned: Vec<(PortIndex, PortIndex)>,
    },
}

impl GraphAction {
    /// Human-readable label for history displays
    pub fn describe(&self) -> &'static str {
        match self {
            Self::AddNode { .. } => "Add Node",
            Self::RemoveNode { .. } => "Remove Node",
            Self::AddDataEdge { .. } => "Add Data Edge",
            Self::RemoveDataEdge { .. } => "Remove Data Edge",
            Self::AddExecEdge { .. } => "Add Execution Edge",
            Self::RemoveExecEdge { .. } => "Remove Execution Edge",
            Self::SetPosition { .. } => "Move Node",
            Self::SetField { .. } => "Edit Field",
            Self::SetInputConstant { .. } => "Edit Input Constant",
            Self::AddVariable { .. } => "Add Variable",
            Self::RemoveVariable { .. } => "Remove Variable",
        }
    }

    /// Replay the action against the graph (redo)
    pub fn apply(&self, graph: &mut Graph) -> Result<(), ActionError> {
        match self {
            Self::AddNode { memory } => {
                if graph.restore(memory.clone()) {
                    Ok(())
                } else {
                    Err(ActionError::RestoreFailed(memory.index))
                }
            }
            Self::RemoveNode { memory, .. } => graph
                .remove_node(memory.index)
                .map(|_| ())
                .ok_or(ActionError::NodeMissing(memory.index)),
            Self::AddDataEdge { input, output, .. } => {
                graph.add_data_edge(*output, *input)?;
                Ok(())
            }
            Self::RemoveDataEdge { input, .. } => graph
                .remove_data_edge(*input)
                .map(|_| ())
                .ok_or(ActionError::EdgeMissing),
            Self::AddExecEdge { from, to } => {
                graph.add_exec_edge(*from, *to)?;
                Ok(())
            }
            Self::RemoveExecEdge { from, to } => {
                if graph.remove_exec_edge(*from, *to) {
                    Ok(())
                } else {
                    Err(ActionError::EdgeMissing)
                }
            }
            Self::SetPosition { node, new, .. } => graph
                .set_position(*node, *new)
                .map(|_| ())
                .ok_or(ActionError::NodeMissing(*node)),
            Self::SetField { node, field, new, .. } => {
                graph.set_field(*node, *field, new.clone())?;
                Ok(())
            }
            Self::SetInputConstant { node, port, new, .. } => {
                graph.set_input_constant(*node, *port, new.clone())?;
                Ok(())
            }
            Self::AddVariable { name, ty } => {
                graph.add_variable(name.clone(), ty.clone());
                Ok(())
            }
            Self::RemoveVariable { name, .. } => graph
                .remove_variable(name)
                .map(|_| ())
                .ok_or_else(|| ActionError::VariableMissing(name.clone())),
        }
    }

    /// Undo the action against the graph
    pub fn revert(&self, graph: &mut Graph) -> Result<(), ActionError> {
        match self {
            Self::AddNode { memory } => graph
                .remove_node(memory.index)
                .map(|_| ())
                .ok_or(ActionError::NodeMissing(memory.index)),
            Self::RemoveNode { memory, edges } => {
                if !graph.restore(memory.clone()) {
                    return Err(ActionError::RestoreFailed(memory.index));
                }
                for (input, output) in &edges.data {
                    if let Err(err) = graph.add_data_edge(*output, *input) {
                        tracing::warn!(
                            "Could not restore data edge {:?} -> {:?}: {}",
                            output,
                            input,
                            err
                        );
                    }
                }
                for (from, to) in &edges.exec {
                    if let Err(err) = graph.add_exec_edge(*from, *to) {
                        tracing::warn!(
                            "Could not restore execution edge {:?} -> {:?}: {}",
                            from,
                            to,
                            err
                        );
                    }
                }
                for entry in &edges.entry_targets {
                    if let Err(err) = graph.add_entry_target(entry, memory.index) {
                        tracing::warn!("Could not restore entry target '{}': {}", entry, err);
                    }
                }
                for (name, source) in &edges.output_sources {
                    if let Err(err) = graph.bind_graph_output(name, *source) {
                        tracing::warn!("Could not rebind graph output '{}': {}", name, err);
                    }
                }
                Ok(())
            }
            Self::AddDataEdge {
                input, replaced, ..
            } => {
                if graph.remove_data_edge(*input).is_none() {
                    return Err(ActionError::EdgeMissing);
                }
                if let Some(previous) = replaced {
                    if let Err(err) = graph.add_data_edge(*previous, *input) {
                        tracing::warn!(
                            "Could not restore replaced data edge {:?} -> {:?}: {}",
                            previous,
                            input,
                            err
                        );
                    }
                }
                Ok(())
            }
            Self::RemoveDataEdge { input, output } => {
                graph.add_data_edge(*output, *input)?;
                Ok(())
            }
            Self::AddExecEdge { from, to } => {
                if graph.remove_exec_edge(*from, *to) {
                    Ok(())
                } else {
                    Err(ActionError::EdgeMissing)
                }
            }
            Self::RemoveExecEdge { from, to } => {
                graph.add_exec_edge(*from, *to)?;
                Ok(())
            }
            Self::SetPosition { node, old, .. } => graph
                .set_position(*node, *old)
                .map(|_| ())
                .ok_or(ActionError::NodeMissing(*node)),
            Self::SetField { node, field, old, .. } => {
                graph.set_field(*node, *field, old.clone())?;
                Ok(())
            }
            Self::SetInputConstant { node, port, old, .. } => {
                graph.set_input_constant(*node, *port, old.clone())?;
                Ok(())
            }
            Self::AddVariable { name, .. } => graph
                .remove_variable(name)
                .map(|_| ())
                .ok_or_else(|| ActionError::VariableMissing(name.clone())),
            Self::RemoveVariable { name, ty, pruned } => {
                graph.add_variable(name.clone(), ty.clone());
                for (input, output) in pruned {
                    if let Err(err) = graph.add_data_edge(*output, *input) {
                        tracing::warn!(
                            "Could not restore pruned data edge {:?} -> {:?}: {}",
                            output,
                            input,
                            err
                        );
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_graph::{InputDef, NodeDefinition, NodeRegistry, OutputDef};

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(NodeDefinition {
            id: "int".to_string(),
            name: "Integer".to_string(),
            fields: vec![tessera_graph::FieldDef::new("value", NodeValue::Int(0))],
            inputs: vec![],
            outputs: vec![OutputDef::new("out", NodeValueType::Int)],
            variadic_inputs: false,
            exec_input: false,
            exec_outputs: vec![],
        });
        registry.register(NodeDefinition {
            id: "sink".to_string(),
            name: "Sink".to_string(),
            fields: vec![],
            inputs: vec![InputDef::new("in", NodeValueType::Float)],
            outputs: vec![],
            variadic_inputs: false,
            exec_input: true,
            exec_outputs: vec![],
        });
        registry
    }

    #[test]
    fn test_add_node_roundtrip() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let index = graph.add_node(registry.create_node("int").unwrap());
        let action = GraphAction::AddNode {
            memory: graph.memory_of(index).unwrap(),
        };
        let snapshot = graph.clone();
        action.revert(&mut graph).unwrap();
        assert_eq!(graph.node_count(), 0);
        action.apply(&mut graph).unwrap();
        assert_eq!(graph, snapshot);
    }

    #[test]
    fn test_set_field_roundtrip() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let index = graph.add_node(registry.create_node("int").unwrap());
        let old = graph.set_field(index, 0, NodeValue::Int(10)).unwrap();
        assert_eq!(old, NodeValue::Int(0));
        let action = GraphAction::SetField {
            node: index,
            field: 0,
            old,
            new: NodeValue::Int(10),
        };
        action.revert(&mut graph).unwrap();
        assert_eq!(graph.node(index).unwrap().field(0), Some(&NodeValue::Int(0)));
        action.apply(&mut graph).unwrap();
        assert_eq!(graph.node(index).unwrap().field(0), Some(&NodeValue::Int(10)));
    }

    #[test]
    fn test_data_edge_replacement_revert_restores_previous() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let s1 = graph.add_node(registry.create_node("int").unwrap());
        let s2 = graph.add_node(registry.create_node("int").unwrap());
        let sink = graph.add_node(registry.create_node("sink").unwrap());
        let input = PortIndex::new(sink, 0);
        graph.add_data_edge(PortIndex::new(s1, 0), input).unwrap();
        let replaced = graph.add_data_edge(PortIndex::new(s2, 0), input).unwrap();
        let action = GraphAction::AddDataEdge {
            input,
            output: PortIndex::new(s2, 0),
            replaced,
        };
        action.revert(&mut graph).unwrap();
        assert_eq!(graph.data_edge(input), Some(PortIndex::new(s1, 0)));
    }

    #[test]
    fn test_remove_node_revert_restores_edges() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let source = graph.add_node(registry.create_node("int").unwrap());
        let sink = graph.add_node(registry.create_node("sink").unwrap());
        graph
            .add_data_edge(PortIndex::new(source, 0), PortIndex::new(sink, 0))
            .unwrap();
        let snapshot = graph.clone();

        let action = GraphAction::RemoveNode {
            memory: graph.memory_of(sink).unwrap(),
            edges: graph.incident_edges(sink),
        };
        action.apply(&mut graph).unwrap();
        assert_eq!(graph.data_edge_count(), 0);
        action.revert(&mut graph).unwrap();
        assert_eq!(graph, snapshot);
    }

    #[test]
    fn test_remove_variable_revert_restores_pruned_edges() {
        let mut registry = registry();
        registry.register(NodeDefinition {
            id: "var_sink".to_string(),
            name: "Variable Sink".to_string(),
            inputs: vec![InputDef::new(
                "in",
                NodeValueType::Variable("speed".to_string()),
            )],
            fields: vec![],
            outputs: vec![],
            variadic_inputs: false,
            exec_input: true,
            exec_outputs: vec![],
        });
        let mut graph = Graph::new("test");
        graph.add_variable("speed", NodeValueType::Int);
        let source = graph.add_node(registry.create_node("int").unwrap());
        let sink = graph.add_node(registry.create_node("var_sink").unwrap());
        graph
            .add_data_edge(PortIndex::new(source, 0), PortIndex::new(sink, 0))
            .unwrap();

        let (ty, pruned) = graph.remove_variable("speed").unwrap();
        let action = GraphAction::RemoveVariable {
            name: "speed".to_string(),
            ty,
            pruned,
        };
        action.revert(&mut graph).unwrap();
        assert_eq!(graph.variable("speed"), Some(&NodeValueType::Int));
        assert_eq!(graph.data_edge_count(), 1);
        action.apply(&mut graph).unwrap();
        assert_eq!(graph.data_edge_count(), 0);
    }
}
