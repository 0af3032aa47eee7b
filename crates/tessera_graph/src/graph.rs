// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph store: node arena, edge tables, variables and edit validation.
//!
//! Data edges are stored reversed (`input -> source output`) so every
//! input has at most one writer by construction. Execution edges are
//! stored forward (`output -> targets`) because control flow fans out.
//! The edit API validates range, types, cycles and duplicates before
//! mutating; rejected edits leave the graph untouched.

use crate::arena::{NodeArena, NodeIndex, PortIndex};
use crate::node::{Node, NodeRegistry};
use crate::value::{assignable, NodeValue, NodeValueType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Unique identifier for a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Create a new random graph ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

/// A graph-level execution entry port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphInput {
    /// Entry name (host events and subgraph callers address this)
    pub name: String,
    /// Value type made available to `graph_input` readers
    pub ty: NodeValueType,
    /// Nodes scheduled when the entry fires
    pub targets: Vec<NodeIndex>,
}

/// A graph-level output port, fed from an internal source port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphOutput {
    /// Output name
    pub name: String,
    /// Value type
    pub ty: NodeValueType,
    /// Internal port whose cached value the output copies
    pub source: Option<PortIndex>,
}

/// Snapshot of a node taken before removal, sufficient to reinsert it
/// at the exact index later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMemory {
    /// The graph the snapshot was taken from
    pub graph: GraphId,
    /// The handle the node held
    pub index: NodeIndex,
    /// The node contents
    pub node: Node,
}

/// Every edge and boundary binding incident to one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentEdges {
    /// Data edges touching the node, as `(input, source output)` pairs
    pub data: Vec<(PortIndex, PortIndex)>,
    /// Execution edges touching the node, as `(output, target)` pairs
    pub exec: Vec<(PortIndex, NodeIndex)>,
    /// Graph entry ports listing the node as a target
    pub entry_targets: Vec<String>,
    /// Graph outputs sourced from one of the node's ports
    pub output_sources: Vec<(String, PortIndex)>,
}

/// Edit-time structural error; the graph is unchanged when one is
/// returned
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditError {
    /// Node not found (stale or foreign index)
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeIndex),

    /// Port ordinal out of range for the node's definition
    #[error("port {port} out of range on node {node:?}")]
    PortOutOfRange {
        /// Node the port was addressed on
        node: NodeIndex,
        /// The offending ordinal
        port: u32,
    },

    /// Field ordinal out of range for the node's definition
    #[error("field {field} out of range on node {node:?}")]
    FieldOutOfRange {
        /// Node the field was addressed on
        node: NodeIndex,
        /// The offending ordinal
        field: u32,
    },

    /// Both ports are on the same node
    #[error("ports are on the same node")]
    SelfLoop,

    /// The source type is not assignable to the target type
    #[error("type {from:?} is not assignable to {to:?}")]
    TypeMismatch {
        /// Resolved source type
        from: NodeValueType,
        /// Resolved target type
        to: NodeValueType,
    },

    /// A `Variable` type did not resolve through the variable table
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// The target node does not accept execution input
    #[error("node {0:?} does not accept execution input")]
    NoExecInput(NodeIndex),

    /// The edge would create a directed cycle
    #[error("edge would create a cycle")]
    WouldCycle,

    /// The exact edge already exists
    #[error("edge already exists")]
    DuplicateEdge,

    /// The node's definition has no variadic inputs
    #[error("node {0:?} has no variadic inputs")]
    NotVariadic(NodeIndex),

    /// No boundary port with the given name
    #[error("unknown boundary port: {0}")]
    UnknownBoundary(String),
}

/// Error loading a serialized graph
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Malformed JSON
    #[error("failed to parse graph: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serialize edge tables as sequences of pairs; JSON objects cannot be
/// keyed by port indices.
mod edge_table {
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::hash::Hash;

    pub fn serialize<K, V, S>(map: &IndexMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<IndexMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Hash + Eq,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// A visual scripting graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    id: GraphId,
    /// Graph name
    pub name: String,
    arena: NodeArena,
    #[serde(with = "edge_table")]
    data_edges: IndexMap<PortIndex, PortIndex>,
    #[serde(with = "edge_table")]
    exec_edges: IndexMap<PortIndex, Vec<NodeIndex>>,
    inputs: Vec<GraphInput>,
    outputs: Vec<GraphOutput>,
    variables: IndexMap<String, NodeValueType>,
    #[serde(skip)]
    change_ticks: u64,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GraphId::new(),
            name: name.into(),
            arena: NodeArena::new(),
            data_edges: IndexMap::new(),
            exec_edges: IndexMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            variables: IndexMap::new(),
            change_ticks: 0,
        }
    }

    /// The graph's identity
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Monotonic counter bumped on every mutation; a cheap staleness
    /// signal for external caches
    pub fn change_ticks(&self) -> u64 {
        self.change_ticks
    }

    fn bump(&mut self) {
        self.change_ticks += 1;
    }

    // ---- nodes ----------------------------------------------------------

    /// Add a node to the graph
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        let index = self.arena.insert(node);
        self.bump();
        index
    }

    /// Get a node by handle
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.arena.get(index)
    }

    /// Iterate live nodes
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.arena.iter()
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Handles of all nodes stamped from the given definition
    pub fn nodes_of_type(&self, definition_id: &str) -> Vec<NodeIndex> {
        self.arena
            .iter()
            .filter(|(_, node)| node.definition().id == definition_id)
            .map(|(index, _)| index)
            .collect()
    }

    /// Snapshot a node for later [`Graph::restore`]. Taken before
    /// removal so undo can reinsert the exact node at the exact index.
    pub fn memory_of(&self, index: NodeIndex) -> Option<NodeMemory> {
        self.arena.get(index).map(|node| NodeMemory {
            graph: self.id,
            index,
            node: node.clone(),
        })
    }

    /// Collect every edge and boundary binding incident to a node
    pub fn incident_edges(&self, index: NodeIndex) -> IncidentEdges {
        let mut edges = IncidentEdges::default();
        for (input, output) in &self.data_edges {
            if input.node == index || output.node == index {
                edges.data.push((*input, *output));
            }
        }
        for (from, targets) in &self.exec_edges {
            for target in targets {
                if from.node == index || *target == index {
                    edges.exec.push((*from, *target));
                }
            }
        }
        for input in &self.inputs {
            if input.targets.contains(&index) {
                edges.entry_targets.push(input.name.clone());
            }
        }
        for output in &self.outputs {
            if let Some(source) = output.source {
                if source.node == index {
                    edges.output_sources.push((output.name.clone(), source));
                }
            }
        }
        edges
    }

    /// Remove a node and every edge incident to it. A stale index is a
    /// caller error: no-op plus a diagnostic.
    pub fn remove_node(&mut self, index: NodeIndex) -> Option<Node> {
        let node = self.arena.remove(index);
        if node.is_none() {
            tracing::warn!("remove_node: stale node index {:?}", index);
            return None;
        }
        self.data_edges
            .retain(|input, output| input.node != index && output.node != index);
        self.exec_edges.retain(|from, targets| {
            if from.node == index {
                return false;
            }
            targets.retain(|t| *t != index);
            !targets.is_empty()
        });
        for input in &mut self.inputs {
            input.targets.retain(|t| *t != index);
        }
        for output in &mut self.outputs {
            if output.source.is_some_and(|s| s.node == index) {
                output.source = None;
            }
        }
        self.bump();
        node
    }

    /// Reinsert a previously removed node at its exact index. Fails if
    /// the memory came from another graph or the slot has been reused.
    pub fn restore(&mut self, memory: NodeMemory) -> bool {
        if memory.graph != self.id {
            tracing::warn!(
                "Refusing to restore node from foreign graph {:?}",
                memory.graph
            );
            return false;
        }
        if self.arena.restore(memory.index, memory.node) {
            self.bump();
            true
        } else {
            tracing::warn!("Could not restore node {:?}: slot reused", memory.index);
            false
        }
    }

    /// Update a node's editor position, returning the old position
    pub fn set_position(&mut self, index: NodeIndex, position: [f32; 2]) -> Option<[f32; 2]> {
        let old = self.arena.get_mut(index)?.set_position(position);
        self.bump();
        Some(old)
    }

    /// Update a field value, returning the old value. The new value must
    /// be assignable to the field's declared type.
    pub fn set_field(
        &mut self,
        index: NodeIndex,
        field: u32,
        value: NodeValue,
    ) -> Result<NodeValue, EditError> {
        let node = self
            .arena
            .get(index)
            .ok_or(EditError::NodeNotFound(index))?;
        let expected = node
            .field(field)
            .map(NodeValue::value_type)
            .ok_or(EditError::FieldOutOfRange { node: index, field })?;
        let found = value.value_type();
        if !assignable(&found, &expected) {
            return Err(EditError::TypeMismatch {
                from: found,
                to: expected,
            });
        }
        let old = self
            .arena
            .get_mut(index)
            .and_then(|n| n.set_field(field, value))
            .ok_or(EditError::NodeNotFound(index))?;
        self.bump();
        Ok(old)
    }

    /// Update an input port's inline constant, returning the old
    /// constant. `None` clears it.
    pub fn set_input_constant(
        &mut self,
        index: NodeIndex,
        port: u32,
        value: Option<NodeValue>,
    ) -> Result<Option<NodeValue>, EditError> {
        let to = self.resolved_input_type(PortIndex::new(index, port))?;
        if let Some(value) = &value {
            let from = value.value_type();
            if !assignable(&from, &to) {
                return Err(EditError::TypeMismatch { from, to });
            }
        }
        let old = self
            .arena
            .get_mut(index)
            .and_then(|n| n.set_input_constant(port, value))
            .ok_or(EditError::NodeNotFound(index))?;
        self.bump();
        Ok(old)
    }

    /// Append a variadic input slot, returning the new port ordinal
    pub fn add_variadic_slot(&mut self, index: NodeIndex) -> Result<u32, EditError> {
        let node = self
            .arena
            .get_mut(index)
            .ok_or(EditError::NodeNotFound(index))?;
        if !node.definition().variadic_inputs {
            return Err(EditError::NotVariadic(index));
        }
        let port = node.push_variadic_slot();
        self.bump();
        Ok(port)
    }

    /// Drop the trailing variadic input slot along with any edge into it
    pub fn remove_variadic_slot(&mut self, index: NodeIndex) -> Result<(), EditError> {
        let node = self
            .arena
            .get_mut(index)
            .ok_or(EditError::NodeNotFound(index))?;
        let last = node.input_count().saturating_sub(1);
        if !node.pop_variadic_slot() {
            return Err(EditError::NotVariadic(index));
        }
        self.data_edges.shift_remove(&PortIndex::new(index, last));
        self.bump();
        Ok(())
    }

    // ---- type resolution -------------------------------------------------

    /// Resolve `Variable` placeholders through the variable table
    pub fn resolve_type(&self, ty: &NodeValueType) -> Result<NodeValueType, EditError> {
        match ty {
            NodeValueType::Variable(name) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| EditError::UnknownVariable(name.clone())),
            other => Ok(other.clone()),
        }
    }

    fn resolved_input_type(&self, port: PortIndex) -> Result<NodeValueType, EditError> {
        let node = self
            .arena
            .get(port.node)
            .ok_or(EditError::NodeNotFound(port.node))?;
        let ty = node.input_type(port.port).ok_or(EditError::PortOutOfRange {
            node: port.node,
            port: port.port,
        })?;
        self.resolve_type(ty)
    }

    fn resolved_output_type(&self, port: PortIndex) -> Result<NodeValueType, EditError> {
        let node = self
            .arena
            .get(port.node)
            .ok_or(EditError::NodeNotFound(port.node))?;
        let ty = node
            .output_type(port.port)
            .ok_or(EditError::PortOutOfRange {
                node: port.node,
                port: port.port,
            })?;
        self.resolve_type(ty)
    }

    // ---- data edges ------------------------------------------------------

    /// Source port wired into an input, if any
    pub fn data_edge(&self, input: PortIndex) -> Option<PortIndex> {
        self.data_edges.get(&input).copied()
    }

    /// Iterate data edges as `(input, source output)` pairs
    pub fn data_edges(&self) -> impl Iterator<Item = (PortIndex, PortIndex)> + '_ {
        self.data_edges.iter().map(|(i, o)| (*i, *o))
    }

    /// Number of data edges
    pub fn data_edge_count(&self) -> usize {
        self.data_edges.len()
    }

    /// Wire an output port into an input port. On success any previous
    /// edge into the input is replaced and returned; single-writer is
    /// maintained by replacement, not rejection.
    pub fn add_data_edge(
        &mut self,
        from: PortIndex,
        to: PortIndex,
    ) -> Result<Option<PortIndex>, EditError> {
        if from.node == to.node {
            return Err(EditError::SelfLoop);
        }
        let from_ty = self.resolved_output_type(from)?;
        let to_ty = self.resolved_input_type(to)?;
        if !assignable(&from_ty, &to_ty) {
            return Err(EditError::TypeMismatch {
                from: from_ty,
                to: to_ty,
            });
        }
        if self.data_path_exists(to.node, from.node) {
            return Err(EditError::WouldCycle);
        }
        if self.data_edges.get(&to) == Some(&from) {
            return Err(EditError::DuplicateEdge);
        }
        let replaced = self.data_edges.insert(to, from);
        self.bump();
        Ok(replaced)
    }

    /// Boolean-contract variant of [`Graph::add_data_edge`]; rejections
    /// are logged at debug level
    pub fn try_add_data_edge(
        &mut self,
        from_node: NodeIndex,
        from_port: u32,
        to_node: NodeIndex,
        to_port: u32,
    ) -> bool {
        let from = PortIndex::new(from_node, from_port);
        let to = PortIndex::new(to_node, to_port);
        match self.add_data_edge(from, to) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("Rejected data edge {:?} -> {:?}: {}", from, to, err);
                false
            }
        }
    }

    /// Remove the edge into an input, returning the source it carried
    pub fn remove_data_edge(&mut self, input: PortIndex) -> Option<PortIndex> {
        let removed = self.data_edges.shift_remove(&input);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// True if a directed data-flow path `from -> ... -> to` exists.
    ///
    /// Data edges are stored input -> source, so walking with the flow
    /// means scanning for edges whose source sits on the current node.
    fn data_path_exists(&self, from: NodeIndex, to: NodeIndex) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for (input, output) in &self.data_edges {
                if output.node == current {
                    stack.push(input.node);
                }
            }
        }
        false
    }

    // ---- execution edges -------------------------------------------------

    /// Targets scheduled by an execution output
    pub fn exec_targets(&self, from: PortIndex) -> &[NodeIndex] {
        self.exec_edges.get(&from).map_or(&[], Vec::as_slice)
    }

    /// Iterate execution edges as `(output, targets)` pairs
    pub fn exec_edges(&self) -> impl Iterator<Item = (PortIndex, &[NodeIndex])> {
        self.exec_edges.iter().map(|(f, t)| (*f, t.as_slice()))
    }

    /// Number of execution edges
    pub fn exec_edge_count(&self) -> usize {
        self.exec_edges.values().map(Vec::len).sum()
    }

    /// Wire an execution output to a target node. Fan-out is legal; the
    /// target is added to the output's set, never replacing anything.
    pub fn add_exec_edge(&mut self, from: PortIndex, to: NodeIndex) -> Result<(), EditError> {
        if from.node == to {
            return Err(EditError::SelfLoop);
        }
        let source = self
            .arena
            .get(from.node)
            .ok_or(EditError::NodeNotFound(from.node))?;
        if from.port as usize >= source.definition().exec_outputs.len() {
            return Err(EditError::PortOutOfRange {
                node: from.node,
                port: from.port,
            });
        }
        let target = self.arena.get(to).ok_or(EditError::NodeNotFound(to))?;
        if !target.definition().exec_input {
            return Err(EditError::NoExecInput(to));
        }
        if self.exec_path_exists(to, from.node) {
            return Err(EditError::WouldCycle);
        }
        if self.exec_targets(from).contains(&to) {
            return Err(EditError::DuplicateEdge);
        }
        self.exec_edges.entry(from).or_default().push(to);
        self.bump();
        Ok(())
    }

    /// Boolean-contract variant of [`Graph::add_exec_edge`]
    pub fn try_add_exec_edge(&mut self, from_node: NodeIndex, from_port: u32, to_node: NodeIndex) -> bool {
        let from = PortIndex::new(from_node, from_port);
        match self.add_exec_edge(from, to_node) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!("Rejected execution edge {:?} -> {:?}: {}", from, to_node, err);
                false
            }
        }
    }

    /// Remove one execution edge
    pub fn remove_exec_edge(&mut self, from: PortIndex, to: NodeIndex) -> bool {
        let Some(targets) = self.exec_edges.get_mut(&from) else {
            return false;
        };
        let before = targets.len();
        targets.retain(|t| *t != to);
        let removed = targets.len() < before;
        if targets.is_empty() {
            self.exec_edges.shift_remove(&from);
        }
        if removed {
            self.bump();
        }
        removed
    }

    /// True if a directed execution path `from -> ... -> to` exists
    fn exec_path_exists(&self, from: NodeIndex, to: NodeIndex) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for (output, targets) in &self.exec_edges {
                if output.node == current {
                    stack.extend(targets.iter().copied());
                }
            }
        }
        false
    }

    // ---- variables -------------------------------------------------------

    /// Declared type of a variable
    pub fn variable(&self, name: &str) -> Option<&NodeValueType> {
        self.variables.get(name)
    }

    /// Iterate the variable table
    pub fn variables(&self) -> impl Iterator<Item = (&str, &NodeValueType)> {
        self.variables.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Insert or retype a variable. Changing the type re-validates every
    /// data edge whose declared endpoint type names the variable; edges
    /// that no longer type-check are pruned and returned.
    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        ty: NodeValueType,
    ) -> Vec<(PortIndex, PortIndex)> {
        let name = name.into();
        let previous = self.variables.insert(name.clone(), ty.clone());
        self.bump();
        match previous {
            Some(old) if old != ty => self.revalidate_variable(&name),
            _ => Vec::new(),
        }
    }

    /// Remove a variable, pruning every data edge that depended on it.
    /// Returns the removed type and the pruned edges.
    pub fn remove_variable(
        &mut self,
        name: &str,
    ) -> Option<(NodeValueType, Vec<(PortIndex, PortIndex)>)> {
        let ty = self.variables.shift_remove(name)?;
        let pruned = self.revalidate_variable(name);
        self.bump();
        Some((ty, pruned))
    }

    fn revalidate_variable(&mut self, name: &str) -> Vec<(PortIndex, PortIndex)> {
        let candidates: Vec<(PortIndex, PortIndex)> = self
            .data_edges
            .iter()
            .filter(|(input, output)| {
                let in_ty = self.arena.get(input.node).and_then(|n| n.input_type(input.port));
                let out_ty = self
                    .arena
                    .get(output.node)
                    .and_then(|n| n.output_type(output.port));
                matches!(in_ty, Some(NodeValueType::Variable(v)) if v.as_str() == name)
                    || matches!(out_ty, Some(NodeValueType::Variable(v)) if v.as_str() == name)
            })
            .map(|(input, output)| (*input, *output))
            .collect();

        let mut pruned = Vec::new();
        for (input, output) in candidates {
            let still_valid = match (
                self.resolved_output_type(output),
                self.resolved_input_type(input),
            ) {
                (Ok(from), Ok(to)) => assignable(&from, &to),
                _ => false,
            };
            if !still_valid {
                self.data_edges.shift_remove(&input);
                pruned.push((input, output));
            }
        }
        if !pruned.is_empty() {
            tracing::warn!(
                "Pruned {} data edge(s) invalidated by variable '{}'",
                pruned.len(),
                name
            );
        }
        pruned
    }

    // ---- boundary ports --------------------------------------------------

    /// Declare a graph-level execution entry, returning its position
    pub fn add_graph_input(&mut self, name: impl Into<String>, ty: NodeValueType) -> usize {
        self.inputs.push(GraphInput {
            name: name.into(),
            ty,
            targets: Vec::new(),
        });
        self.bump();
        self.inputs.len() - 1
    }

    /// Declare a graph-level output, returning its position
    pub fn add_graph_output(&mut self, name: impl Into<String>, ty: NodeValueType) -> usize {
        self.outputs.push(GraphOutput {
            name: name.into(),
            ty,
            source: None,
        });
        self.bump();
        self.outputs.len() - 1
    }

    /// Declared entry ports
    pub fn graph_inputs(&self) -> &[GraphInput] {
        &self.inputs
    }

    /// Declared output ports
    pub fn graph_outputs(&self) -> &[GraphOutput] {
        &self.outputs
    }

    /// Look up an entry port by name
    pub fn graph_input(&self, name: &str) -> Option<&GraphInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Wire an entry port to a node scheduled when it fires
    pub fn add_entry_target(&mut self, entry: &str, node: NodeIndex) -> Result<(), EditError> {
        let target = self.arena.get(node).ok_or(EditError::NodeNotFound(node))?;
        if !target.definition().exec_input {
            return Err(EditError::NoExecInput(node));
        }
        let Some(pos) = self.inputs.iter().position(|i| i.name == entry) else {
            return Err(EditError::UnknownBoundary(entry.to_string()));
        };
        if self.inputs[pos].targets.contains(&node) {
            return Err(EditError::DuplicateEdge);
        }
        self.inputs[pos].targets.push(node);
        self.bump();
        Ok(())
    }

    /// Unwire an entry port from a target node
    pub fn remove_entry_target(&mut self, entry: &str, node: NodeIndex) -> bool {
        let Some(input) = self.inputs.iter_mut().find(|i| i.name == entry) else {
            return false;
        };
        let before = input.targets.len();
        input.targets.retain(|t| *t != node);
        let removed = input.targets.len() < before;
        if removed {
            self.bump();
        }
        removed
    }

    /// Bind a graph output to an internal source port, returning the
    /// previous binding
    pub fn bind_graph_output(
        &mut self,
        name: &str,
        source: PortIndex,
    ) -> Result<Option<PortIndex>, EditError> {
        let from = self.resolved_output_type(source)?;
        let Some(pos) = self.outputs.iter().position(|o| o.name == name) else {
            return Err(EditError::UnknownBoundary(name.to_string()));
        };
        let declared = self.outputs[pos].ty.clone();
        let to = self.resolve_type(&declared)?;
        if !assignable(&from, &to) {
            return Err(EditError::TypeMismatch { from, to });
        }
        let old = self.outputs[pos].source.replace(source);
        self.bump();
        Ok(old)
    }

    // ---- persistence -----------------------------------------------------

    /// Serialize to the structured persistence encoding
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load a graph from its JSON encoding. Nodes referencing
    /// definitions missing from the registry, and edges or boundary
    /// bindings referencing missing nodes, are pruned rather than
    /// failing the load.
    pub fn load_json(json: &str, registry: &NodeRegistry) -> Result<Self, LoadError> {
        let mut graph: Graph = serde_json::from_str(json)?;
        graph.prune(registry);
        Ok(graph)
    }

    fn prune(&mut self, registry: &NodeRegistry) {
        let unknown: Vec<NodeIndex> = self
            .arena
            .iter()
            .filter(|(_, node)| registry.get(&node.definition().id).is_none())
            .map(|(index, _)| index)
            .collect();
        let dropped_nodes = unknown.len();
        for index in unknown {
            self.arena.remove(index);
        }
        // Share the registry's definition instances and repair shape
        // drift from older files.
        for (_, node) in self.arena.iter_mut() {
            let id = node.definition().id.clone();
            if let Some(def) = registry.get(&id) {
                node.conform_to(def);
            }
        }

        let arena = &self.arena;
        let before_data = self.data_edges.len();
        self.data_edges.retain(|input, output| {
            let input_ok = arena
                .get(input.node)
                .is_some_and(|n| input.port < n.input_count());
            let output_ok = arena
                .get(output.node)
                .is_some_and(|n| n.output_type(output.port).is_some());
            input_ok && output_ok
        });
        let dropped_data = before_data - self.data_edges.len();

        let before_exec = self.exec_edge_count();
        self.exec_edges.retain(|from, targets| {
            let from_ok = arena
                .get(from.node)
                .is_some_and(|n| (from.port as usize) < n.definition().exec_outputs.len());
            if !from_ok {
                return false;
            }
            targets.retain(|t| arena.get(*t).is_some_and(|n| n.definition().exec_input));
            !targets.is_empty()
        });
        let dropped_exec = before_exec - self.exec_edge_count();

        for input in &mut self.inputs {
            input
                .targets
                .retain(|t| arena.get(*t).is_some_and(|n| n.definition().exec_input));
        }
        for output in &mut self.outputs {
            let valid = output.source.is_some_and(|s| {
                arena.get(s.node).is_some_and(|n| n.output_type(s.port).is_some())
            });
            if output.source.is_some() && !valid {
                output.source = None;
            }
        }

        if dropped_nodes + dropped_data + dropped_exec > 0 {
            tracing::warn!(
                "Pruned {} node(s), {} data edge(s), {} execution edge(s) on load",
                dropped_nodes,
                dropped_data,
                dropped_exec
            );
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

impl PartialEq for Graph {
    /// Structural equality; `change_ticks` is a cache signal and is
    /// ignored.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.arena == other.arena
            && self.data_edges == other.data_edges
            && self.exec_edges == other.exec_edges
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.variables == other.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{InputDef, NodeDefinition, OutputDef};

    fn def(
        id: &str,
        inputs: Vec<InputDef>,
        outputs: Vec<OutputDef>,
        exec_input: bool,
        exec_outputs: Vec<&str>,
    ) -> NodeDefinition {
        NodeDefinition {
            id: id.to_string(),
            name: id.to_string(),
            fields: vec![],
            inputs,
            outputs,
            variadic_inputs: false,
            exec_input,
            exec_outputs: exec_outputs.into_iter().map(str::to_string).collect(),
        }
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(def(
            "int",
            vec![],
            vec![OutputDef::new("out", NodeValueType::Int)],
            false,
            vec![],
        ));
        registry.register(def(
            "string",
            vec![],
            vec![OutputDef::new("out", NodeValueType::String)],
            false,
            vec![],
        ));
        registry.register(def(
            "passthrough",
            vec![InputDef::new("in", NodeValueType::Float)],
            vec![OutputDef::new("out", NodeValueType::Float)],
            false,
            vec![],
        ));
        registry.register(def("start", vec![], vec![], false, vec!["next"]));
        registry.register(def(
            "worker",
            vec![InputDef::new("value", NodeValueType::Float)],
            vec![OutputDef::new("result", NodeValueType::Float)],
            true,
            vec!["next"],
        ));
        registry.register(def(
            "var_sink",
            vec![InputDef::new("in", NodeValueType::Variable("speed".to_string()))],
            vec![],
            false,
            vec![],
        ));
        registry
    }

    fn spawn(graph: &mut Graph, registry: &NodeRegistry, id: &str) -> NodeIndex {
        graph.add_node(registry.create_node(id).unwrap())
    }

    #[test]
    fn test_add_and_remove_node() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let ticks = graph.change_ticks();
        let n = spawn(&mut graph, &registry, "int");
        assert_eq!(graph.node_count(), 1);
        assert!(graph.change_ticks() > ticks);
        assert!(graph.remove_node(n).is_some());
        assert_eq!(graph.node_count(), 0);
        assert!(graph.remove_node(n).is_none());
    }

    #[test]
    fn test_data_edge_accepts_widening() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let int = spawn(&mut graph, &registry, "int");
        let sink = spawn(&mut graph, &registry, "passthrough");
        assert!(graph.try_add_data_edge(int, 0, sink, 0));
        assert_eq!(graph.data_edge_count(), 1);
    }

    #[test]
    fn test_data_edge_rejects_type_mismatch() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let string = spawn(&mut graph, &registry, "string");
        let sink = spawn(&mut graph, &registry, "passthrough");
        let err = graph
            .add_data_edge(PortIndex::new(string, 0), PortIndex::new(sink, 0))
            .unwrap_err();
        assert!(matches!(err, EditError::TypeMismatch { .. }));
        assert_eq!(graph.data_edge_count(), 0);
    }

    #[test]
    fn test_data_edge_rejects_self_loop() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let a = spawn(&mut graph, &registry, "passthrough");
        assert!(!graph.try_add_data_edge(a, 0, a, 0));
    }

    #[test]
    fn test_data_edge_rejects_reverse_cycle() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let a = spawn(&mut graph, &registry, "passthrough");
        let b = spawn(&mut graph, &registry, "passthrough");
        assert!(graph.try_add_data_edge(a, 0, b, 0));
        // The closing edge of the two-node loop must be rejected.
        assert!(!graph.try_add_data_edge(b, 0, a, 0));
        assert_eq!(graph.data_edge_count(), 1);
    }

    #[test]
    fn test_data_edge_rejects_long_cycle() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let a = spawn(&mut graph, &registry, "passthrough");
        let b = spawn(&mut graph, &registry, "passthrough");
        let c = spawn(&mut graph, &registry, "passthrough");
        assert!(graph.try_add_data_edge(a, 0, b, 0));
        assert!(graph.try_add_data_edge(b, 0, c, 0));
        assert!(!graph.try_add_data_edge(c, 0, a, 0));
    }

    #[test]
    fn test_data_edge_replaces_existing_source() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let s1 = spawn(&mut graph, &registry, "int");
        let s2 = spawn(&mut graph, &registry, "int");
        let sink = spawn(&mut graph, &registry, "passthrough");
        let input = PortIndex::new(sink, 0);
        assert_eq!(graph.add_data_edge(PortIndex::new(s1, 0), input), Ok(None));
        let replaced = graph
            .add_data_edge(PortIndex::new(s2, 0), input)
            .unwrap();
        assert_eq!(replaced, Some(PortIndex::new(s1, 0)));
        // Single writer: still exactly one edge into the input.
        assert_eq!(graph.data_edge_count(), 1);
        assert_eq!(graph.data_edge(input), Some(PortIndex::new(s2, 0)));
    }

    #[test]
    fn test_data_edge_rejects_duplicate() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let s = spawn(&mut graph, &registry, "int");
        let sink = spawn(&mut graph, &registry, "passthrough");
        assert!(graph.try_add_data_edge(s, 0, sink, 0));
        assert!(!graph.try_add_data_edge(s, 0, sink, 0));
    }

    #[test]
    fn test_data_edge_rejects_bad_port() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let s = spawn(&mut graph, &registry, "int");
        let sink = spawn(&mut graph, &registry, "passthrough");
        assert!(!graph.try_add_data_edge(s, 1, sink, 0));
        assert!(!graph.try_add_data_edge(s, 0, sink, 5));
    }

    #[test]
    fn test_exec_edge_fan_out_and_duplicates() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let start = spawn(&mut graph, &registry, "start");
        let w1 = spawn(&mut graph, &registry, "worker");
        let w2 = spawn(&mut graph, &registry, "worker");
        assert!(graph.try_add_exec_edge(start, 0, w1));
        assert!(graph.try_add_exec_edge(start, 0, w2));
        assert_eq!(graph.exec_targets(PortIndex::new(start, 0)), &[w1, w2]);
        assert!(!graph.try_add_exec_edge(start, 0, w1));
    }

    #[test]
    fn test_exec_edge_rejects_cycle_and_bad_target() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let w1 = spawn(&mut graph, &registry, "worker");
        let w2 = spawn(&mut graph, &registry, "worker");
        let pure = spawn(&mut graph, &registry, "int");
        assert!(graph.try_add_exec_edge(w1, 0, w2));
        assert!(!graph.try_add_exec_edge(w2, 0, w1));
        assert_eq!(
            graph.add_exec_edge(PortIndex::new(w1, 0), pure),
            Err(EditError::NoExecInput(pure))
        );
    }

    #[test]
    fn test_remove_node_cleans_incident_edges() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let start = spawn(&mut graph, &registry, "start");
        let worker = spawn(&mut graph, &registry, "worker");
        let int = spawn(&mut graph, &registry, "int");
        let sink = spawn(&mut graph, &registry, "passthrough");
        assert!(graph.try_add_data_edge(int, 0, worker, 0));
        assert!(graph.try_add_data_edge(worker, 0, sink, 0));
        assert!(graph.try_add_exec_edge(start, 0, worker));
        graph.add_graph_input("on_run", NodeValueType::Any);
        graph.add_entry_target("on_run", worker).unwrap();

        graph.remove_node(worker);
        assert_eq!(graph.data_edge_count(), 0);
        assert_eq!(graph.exec_edge_count(), 0);
        assert!(graph.graph_input("on_run").unwrap().targets.is_empty());
    }

    #[test]
    fn test_memory_restore_with_edges() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let start = spawn(&mut graph, &registry, "start");
        let worker = spawn(&mut graph, &registry, "worker");
        let int = spawn(&mut graph, &registry, "int");
        let sink = spawn(&mut graph, &registry, "passthrough");
        assert!(graph.try_add_data_edge(int, 0, worker, 0));
        assert!(graph.try_add_data_edge(worker, 0, sink, 0));
        assert!(graph.try_add_exec_edge(start, 0, worker));

        let snapshot = graph.clone();
        let memory = graph.memory_of(worker).unwrap();
        let edges = graph.incident_edges(worker);
        assert_eq!(edges.data.len(), 2);
        assert_eq!(edges.exec.len(), 1);

        graph.remove_node(worker);
        assert!(graph.restore(memory));
        for (input, output) in &edges.data {
            assert!(graph.add_data_edge(*output, *input).is_ok());
        }
        for (from, to) in &edges.exec {
            assert!(graph.add_exec_edge(*from, *to).is_ok());
        }
        assert_eq!(graph, snapshot);
    }

    #[test]
    fn test_foreign_graph_memory_rejected() {
        let registry = registry();
        let mut a = Graph::new("a");
        let mut b = Graph::new("b");
        let n = spawn(&mut a, &registry, "int");
        let memory = a.memory_of(n).unwrap();
        a.remove_node(n);
        assert!(!b.restore(memory));
        assert_eq!(b.node_count(), 0);
    }

    #[test]
    fn test_variable_retype_prunes_edges() {
        let registry = registry();
        let mut graph = Graph::new("test");
        graph.add_variable("speed", NodeValueType::Float);
        let int = spawn(&mut graph, &registry, "int");
        let sink = spawn(&mut graph, &registry, "var_sink");
        assert!(graph.try_add_data_edge(int, 0, sink, 0));

        let pruned = graph.add_variable("speed", NodeValueType::String);
        assert_eq!(
            pruned,
            vec![(PortIndex::new(sink, 0), PortIndex::new(int, 0))]
        );
        assert_eq!(graph.data_edge_count(), 0);
    }

    #[test]
    fn test_variable_removal_prunes_edges() {
        let registry = registry();
        let mut graph = Graph::new("test");
        graph.add_variable("speed", NodeValueType::Int);
        let int = spawn(&mut graph, &registry, "int");
        let sink = spawn(&mut graph, &registry, "var_sink");
        assert!(graph.try_add_data_edge(int, 0, sink, 0));

        let (ty, pruned) = graph.remove_variable("speed").unwrap();
        assert_eq!(ty, NodeValueType::Int);
        assert_eq!(pruned.len(), 1);
        assert_eq!(graph.data_edge_count(), 0);
        // Unresolvable input type now rejects new edges outright.
        assert!(!graph.try_add_data_edge(int, 0, sink, 0));
    }

    #[test]
    fn test_set_field_and_constant_type_checks() {
        let mut registry = registry();
        registry.register(NodeDefinition {
            id: "counter".to_string(),
            name: "Counter".to_string(),
            fields: vec![crate::node::FieldDef::new("step", NodeValue::Int(1))],
            inputs: vec![InputDef::new("limit", NodeValueType::Float)],
            outputs: vec![],
            variadic_inputs: false,
            exec_input: false,
            exec_outputs: vec![],
        });
        let mut graph = Graph::new("test");
        let n = spawn(&mut graph, &registry, "counter");
        assert_eq!(graph.set_field(n, 0, NodeValue::Int(5)), Ok(NodeValue::Int(1)));
        assert!(matches!(
            graph.set_field(n, 0, NodeValue::Bool(true)),
            Err(EditError::TypeMismatch { .. })
        ));
        assert!(matches!(
            graph.set_field(n, 3, NodeValue::Int(0)),
            Err(EditError::FieldOutOfRange { .. })
        ));
        let old = graph
            .set_input_constant(n, 0, Some(NodeValue::Int(9)))
            .unwrap();
        assert_eq!(old, Some(NodeValue::Float(0.0)));
    }

    #[test]
    fn test_boundary_output_binding() {
        let registry = registry();
        let mut graph = Graph::new("test");
        let int = spawn(&mut graph, &registry, "int");
        graph.add_graph_output("result", NodeValueType::Float);
        let old = graph
            .bind_graph_output("result", PortIndex::new(int, 0))
            .unwrap();
        assert_eq!(old, None);
        assert!(matches!(
            graph.bind_graph_output("missing", PortIndex::new(int, 0)),
            Err(EditError::UnknownBoundary(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let registry = registry();
        let mut graph = Graph::new("round-trip");
        let start = spawn(&mut graph, &registry, "start");
        let worker = spawn(&mut graph, &registry, "worker");
        let int = spawn(&mut graph, &registry, "int");
        assert!(graph.try_add_data_edge(int, 0, worker, 0));
        assert!(graph.try_add_exec_edge(start, 0, worker));
        graph.add_variable("speed", NodeValueType::Float);
        graph.add_graph_input("on_run", NodeValueType::Any);
        graph.add_entry_target("on_run", worker).unwrap();
        graph.add_graph_output("result", NodeValueType::Float);
        graph
            .bind_graph_output("result", PortIndex::new(worker, 0))
            .unwrap();

        let json = graph.to_json().unwrap();
        let loaded = Graph::load_json(&json, &registry).unwrap();
        assert_eq!(loaded, graph);
    }

    #[test]
    fn test_load_prunes_unknown_definition() {
        let mut build_registry = registry();
        build_registry.register(def(
            "ghost",
            vec![InputDef::new("in", NodeValueType::Float)],
            vec![],
            false,
            vec![],
        ));
        let mut graph = Graph::new("test");
        let int = spawn(&mut graph, &build_registry, "int");
        let ghost = spawn(&mut graph, &build_registry, "ghost");
        assert!(graph.try_add_data_edge(int, 0, ghost, 0));

        let json = graph.to_json().unwrap();
        let loaded = Graph::load_json(&json, &registry()).unwrap();
        assert_eq!(loaded.node_count(), 1);
        assert_eq!(loaded.data_edge_count(), 0);
    }
}
