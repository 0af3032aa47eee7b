// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions and instances.

use crate::value::{NodeValue, NodeValueType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A constant field baked into each node instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Default value; also fixes the field's type
    pub default: NodeValue,
}

impl FieldDef {
    /// Create a new field definition
    pub fn new(name: impl Into<String>, default: NodeValue) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

/// An input port definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDef {
    /// Port name
    pub name: String,
    /// Data type
    pub ty: NodeValueType,
    /// Whether the port may be left unconnected without a constant
    pub optional: bool,
    /// Inline constant seeded into new instances; falls back to the
    /// type's default when absent
    pub default: Option<NodeValue>,
}

impl InputDef {
    /// Create a new input port definition
    pub fn new(name: impl Into<String>, ty: NodeValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            default: None,
        }
    }

    /// Mark the port as optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set the seeded inline constant
    pub fn with_default(mut self, value: NodeValue) -> Self {
        self.default = Some(value);
        self
    }
}

/// An output port definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDef {
    /// Port name
    pub name: String,
    /// Data type
    pub ty: NodeValueType,
}

impl OutputDef {
    /// Create a new output port definition
    pub fn new(name: impl Into<String>, ty: NodeValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Immutable template a node instance is stamped from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique definition identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Constant fields
    pub fields: Vec<FieldDef>,
    /// Input data ports
    pub inputs: Vec<InputDef>,
    /// Output data ports
    pub outputs: Vec<OutputDef>,
    /// Whether the trailing input may repeat (variadic slots)
    pub variadic_inputs: bool,
    /// Whether the node accepts an execution input
    pub exec_input: bool,
    /// Named execution output ports
    pub exec_outputs: Vec<String>,
}

impl NodeDefinition {
    /// A root node has no execution input and at least one execution
    /// output; it is a valid evaluation entry point.
    pub fn is_root(&self) -> bool {
        !self.exec_input && !self.exec_outputs.is_empty()
    }

    /// A pure node has no execution ports at all; it is computed on
    /// demand via pull evaluation.
    pub fn is_pure(&self) -> bool {
        !self.exec_input && self.exec_outputs.is_empty()
    }

    /// Look up an execution output ordinal by name
    pub fn exec_output_index(&self, name: &str) -> Option<u32> {
        self.exec_outputs
            .iter()
            .position(|n| n == name)
            .map(|i| i as u32)
    }
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    definition: Arc<NodeDefinition>,
    fields: Vec<NodeValue>,
    /// Inline constants per input port, used when the port is unconnected
    inputs: Vec<Option<NodeValue>>,
    variadic_count: u32,
    position: [f32; 2],
}

impl Node {
    /// Create a new instance with default field and constant values
    pub fn new(definition: &Arc<NodeDefinition>) -> Self {
        let fields = definition.fields.iter().map(|f| f.default.clone()).collect();
        let inputs = definition
            .inputs
            .iter()
            .map(|i| i.default.clone().or_else(|| i.ty.default_value()))
            .collect();
        Self {
            definition: definition.clone(),
            fields,
            inputs,
            variadic_count: 0,
            position: [0.0, 0.0],
        }
    }

    /// The definition this node was stamped from
    pub fn definition(&self) -> &Arc<NodeDefinition> {
        &self.definition
    }

    /// Position in the graph editor (metadata, not load-bearing)
    pub fn position(&self) -> [f32; 2] {
        self.position
    }

    /// All field values
    pub fn fields(&self) -> &[NodeValue] {
        &self.fields
    }

    /// Get a field value by index
    pub fn field(&self, index: u32) -> Option<&NodeValue> {
        self.fields.get(index as usize)
    }

    /// Total input port count, including variadic slots
    pub fn input_count(&self) -> u32 {
        self.definition.inputs.len() as u32 + self.variadic_count
    }

    /// Number of variadic slots beyond the defined inputs
    pub fn variadic_count(&self) -> u32 {
        self.variadic_count
    }

    /// Inline constant for an input port, if set
    pub fn input_constant(&self, port: u32) -> Option<&NodeValue> {
        self.inputs.get(port as usize).and_then(Option::as_ref)
    }

    /// Declared type of an input port. Variadic slots repeat the type of
    /// the trailing defined input.
    pub fn input_type(&self, port: u32) -> Option<&NodeValueType> {
        let base = self.definition.inputs.len() as u32;
        if port < base {
            Some(&self.definition.inputs[port as usize].ty)
        } else if self.definition.variadic_inputs && port < base + self.variadic_count {
            self.definition.inputs.last().map(|i| &i.ty)
        } else {
            None
        }
    }

    /// Declared type of an output port
    pub fn output_type(&self, port: u32) -> Option<&NodeValueType> {
        self.definition.outputs.get(port as usize).map(|o| &o.ty)
    }

    pub(crate) fn set_position(&mut self, position: [f32; 2]) -> [f32; 2] {
        std::mem::replace(&mut self.position, position)
    }

    pub(crate) fn set_field(&mut self, index: u32, value: NodeValue) -> Option<NodeValue> {
        let slot = self.fields.get_mut(index as usize)?;
        Some(std::mem::replace(slot, value))
    }

    pub(crate) fn set_input_constant(
        &mut self,
        port: u32,
        value: Option<NodeValue>,
    ) -> Option<Option<NodeValue>> {
        let slot = self.inputs.get_mut(port as usize)?;
        Some(std::mem::replace(slot, value))
    }

    pub(crate) fn push_variadic_slot(&mut self) -> u32 {
        let default = self
            .definition
            .inputs
            .last()
            .and_then(|i| i.default.clone().or_else(|| i.ty.default_value()));
        self.inputs.push(default);
        self.variadic_count += 1;
        self.input_count() - 1
    }

    pub(crate) fn pop_variadic_slot(&mut self) -> bool {
        if self.variadic_count == 0 {
            return false;
        }
        self.inputs.pop();
        self.variadic_count -= 1;
        true
    }

    /// Re-shape the instance to match a (possibly newer) definition,
    /// padding missing fields and constants with defaults.
    pub(crate) fn conform_to(&mut self, definition: &Arc<NodeDefinition>) {
        self.definition = definition.clone();
        self.fields
            .truncate(definition.fields.len());
        for def in definition.fields.iter().skip(self.fields.len()) {
            self.fields.push(def.default.clone());
        }
        if !definition.variadic_inputs {
            self.variadic_count = 0;
        }
        let total = definition.inputs.len() + self.variadic_count as usize;
        self.inputs.truncate(total);
        while self.inputs.len() < total {
            let port = self.inputs.len();
            let default = definition
                .inputs
                .get(port.min(definition.inputs.len().saturating_sub(1)))
                .and_then(|i| i.default.clone().or_else(|| i.ty.default_value()));
            self.inputs.push(default);
        }
    }
}

/// Registry of available node definitions
#[derive(Debug, Default)]
pub struct NodeRegistry {
    definitions: indexmap::IndexMap<String, Arc<NodeDefinition>>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition
    pub fn register(&mut self, definition: NodeDefinition) {
        self.definitions
            .insert(definition.id.clone(), Arc::new(definition));
    }

    /// Get a definition by ID
    pub fn get(&self, id: &str) -> Option<&Arc<NodeDefinition>> {
        self.definitions.get(id)
    }

    /// All registered definitions
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<NodeDefinition>> {
        self.definitions.values()
    }

    /// Create a node instance from a definition ID
    pub fn create_node(&self, id: &str) -> Option<Node> {
        self.get(id).map(Node::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pure_def() -> NodeDefinition {
        NodeDefinition {
            id: "add".to_string(),
            name: "Add".to_string(),
            fields: vec![],
            inputs: vec![
                InputDef::new("a", NodeValueType::Float),
                InputDef::new("b", NodeValueType::Float),
            ],
            outputs: vec![OutputDef::new("sum", NodeValueType::Float)],
            variadic_inputs: false,
            exec_input: false,
            exec_outputs: vec![],
        }
    }

    fn root_def() -> NodeDefinition {
        NodeDefinition {
            id: "event_start".to_string(),
            name: "On Start".to_string(),
            fields: vec![],
            inputs: vec![],
            outputs: vec![],
            variadic_inputs: false,
            exec_input: false,
            exec_outputs: vec!["next".to_string()],
        }
    }

    #[test]
    fn test_derived_predicates() {
        assert!(pure_def().is_pure());
        assert!(!pure_def().is_root());
        assert!(root_def().is_root());
        assert!(!root_def().is_pure());

        let impure = NodeDefinition {
            exec_input: true,
            ..root_def()
        };
        assert!(!impure.is_root());
        assert!(!impure.is_pure());
    }

    #[test]
    fn test_instance_defaults() {
        let def = Arc::new(pure_def());
        let node = Node::new(&def);
        assert_eq!(node.input_count(), 2);
        assert_eq!(node.input_constant(0), Some(&NodeValue::Float(0.0)));
        assert_eq!(node.input_type(1), Some(&NodeValueType::Float));
        assert_eq!(node.input_type(2), None);
    }

    #[test]
    fn test_variadic_slots() {
        let def = Arc::new(NodeDefinition {
            id: "concat".to_string(),
            name: "Concat".to_string(),
            fields: vec![],
            inputs: vec![InputDef::new("value", NodeValueType::String)],
            outputs: vec![OutputDef::new("out", NodeValueType::String)],
            variadic_inputs: true,
            exec_input: false,
            exec_outputs: vec![],
        });
        let mut node = Node::new(&def);
        assert_eq!(node.push_variadic_slot(), 1);
        assert_eq!(node.push_variadic_slot(), 2);
        assert_eq!(node.input_count(), 3);
        assert_eq!(node.input_type(2), Some(&NodeValueType::String));
        assert!(node.pop_variadic_slot());
        assert_eq!(node.input_count(), 2);
    }

    #[test]
    fn test_registry_create() {
        let mut registry = NodeRegistry::new();
        registry.register(pure_def());
        assert!(registry.get("add").is_some());
        let node = registry.create_node("add").unwrap();
        assert_eq!(node.definition().id, "add");
        assert!(registry.create_node("missing").is_none());
    }
}
