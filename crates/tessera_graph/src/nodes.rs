// SPDX-License-Identifier: MIT OR Apache-2.0
//! Builtin node library: paired definitions and evaluators.
//!
//! Hosts extend both registries with their own nodes; this set covers
//! events, flow control, constants, arithmetic and subgraph invocation.

use crate::evaluation::{EvalContext, EvaluatorRegistry};
use crate::node::{FieldDef, InputDef, NodeDefinition, NodeRegistry, OutputDef};
use crate::value::{NodeValue, NodeValueType};
use indexmap::IndexMap;
use std::sync::Arc;

/// Build registries containing every builtin node
pub fn builtin_registries() -> (NodeRegistry, EvaluatorRegistry) {
    let mut definitions = NodeRegistry::new();
    let mut evaluators = EvaluatorRegistry::new();
    register_builtins(&mut definitions, &mut evaluators);
    (definitions, evaluators)
}

/// Register the builtin nodes into existing registries
pub fn register_builtins(definitions: &mut NodeRegistry, evaluators: &mut EvaluatorRegistry) {
    register_events(definitions, evaluators);
    register_flow(definitions, evaluators);
    register_constants(definitions, evaluators);
    register_math(definitions, evaluators);
    register_strings(definitions, evaluators);
    register_graphs(definitions, evaluators);
}

fn register_events(definitions: &mut NodeRegistry, evaluators: &mut EvaluatorRegistry) {
    definitions.register(NodeDefinition {
        id: "event_start".to_string(),
        name: "On Start".to_string(),
        fields: vec![],
        inputs: vec![],
        outputs: vec![],
        variadic_inputs: false,
        exec_input: false,
        exec_outputs: vec!["next".to_string()],
    });
    evaluators.register("event_start", |ctx: &mut EvalContext<'_>| ctx.trigger(0));

    definitions.register(NodeDefinition {
        id: "event_touch".to_string(),
        name: "On Touch".to_string(),
        fields: vec![],
        inputs: vec![],
        outputs: vec![],
        variadic_inputs: false,
        exec_input: false,
        exec_outputs: vec!["next".to_string()],
    });
    evaluators.register("event_touch", |ctx: &mut EvalContext<'_>| ctx.trigger(0));
}

fn register_flow(definitions: &mut NodeRegistry, evaluators: &mut EvaluatorRegistry) {
    definitions.register(NodeDefinition {
        id: "branch".to_string(),
        name: "Branch".to_string(),
        fields: vec![],
        inputs: vec![InputDef::new("condition", NodeValueType::Bool)],
        outputs: vec![],
        variadic_inputs: false,
        exec_input: true,
        exec_outputs: vec!["true".to_string(), "false".to_string()],
    });
    evaluators.register("branch", |ctx: &mut EvalContext<'_>| {
        let condition: bool = ctx.get_input(0)?;
        ctx.trigger_named(if condition { "true" } else { "false" })
    });

    definitions.register(NodeDefinition {
        id: "sequence".to_string(),
        name: "Sequence".to_string(),
        fields: vec![],
        inputs: vec![],
        outputs: vec![],
        variadic_inputs: false,
        exec_input: true,
        exec_outputs: vec!["then_0".to_string(), "then_1".to_string()],
    });
    evaluators.register("sequence", |ctx: &mut EvalContext<'_>| {
        ctx.trigger(0)?;
        ctx.trigger(1)
    });

    definitions.register(NodeDefinition {
        id: "print".to_string(),
        name: "Print".to_string(),
        fields: vec![],
        inputs: vec![InputDef::new("value", NodeValueType::Any)
            .with_default(NodeValue::String("Hello".to_string()))],
        outputs: vec![],
        variadic_inputs: false,
        exec_input: true,
        exec_outputs: vec!["next".to_string()],
    });
    evaluators.register("print", |ctx: &mut EvalContext<'_>| {
        let value: NodeValue = ctx.get_input(0)?;
        tracing::info!("[print] {}", value);
        ctx.trigger(0)
    });
}

fn constant(id: &str, name: &str, default: NodeValue, ty: NodeValueType) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        name: name.to_string(),
        fields: vec![FieldDef::new("value", default)],
        inputs: vec![],
        outputs: vec![OutputDef::new("out", ty)],
        variadic_inputs: false,
        exec_input: false,
        exec_outputs: vec![],
    }
}

fn emit_field(ctx: &mut EvalContext<'_>) -> Result<(), crate::evaluation::EvalError> {
    let value: NodeValue = ctx.get_field(0)?;
    ctx.set_output(0, value)
}

fn register_constants(definitions: &mut NodeRegistry, evaluators: &mut EvaluatorRegistry) {
    definitions.register(constant(
        "const_bool",
        "Boolean",
        NodeValue::Bool(false),
        NodeValueType::Bool,
    ));
    definitions.register(constant(
        "const_int",
        "Integer",
        NodeValue::Int(0),
        NodeValueType::Int,
    ));
    definitions.register(constant(
        "const_float",
        "Float",
        NodeValue::Float(0.0),
        NodeValueType::Float,
    ));
    definitions.register(constant(
        "const_string",
        "String",
        NodeValue::String(String::new()),
        NodeValueType::String,
    ));
    definitions.register(constant(
        "const_vector3",
        "Vector3",
        NodeValue::Vector3([0.0, 0.0, 0.0]),
        NodeValueType::Vector3,
    ));
    for id in [
        "const_bool",
        "const_int",
        "const_float",
        "const_string",
        "const_vector3",
    ] {
        evaluators.register(id, emit_field);
    }
}

fn binary_float(id: &str, name: &str, output: OutputDef) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        name: name.to_string(),
        fields: vec![],
        inputs: vec![
            InputDef::new("a", NodeValueType::Float),
            InputDef::new("b", NodeValueType::Float),
        ],
        outputs: vec![output],
        variadic_inputs: false,
        exec_input: false,
        exec_outputs: vec![],
    }
}

fn register_math(definitions: &mut NodeRegistry, evaluators: &mut EvaluatorRegistry) {
    definitions.register(binary_float(
        "add",
        "Add",
        OutputDef::new("sum", NodeValueType::Float),
    ));
    evaluators.register("add", |ctx: &mut EvalContext<'_>| {
        let a: f32 = ctx.get_input(0)?;
        let b: f32 = ctx.get_input(1)?;
        ctx.set_output(0, NodeValue::Float(a + b))
    });

    definitions.register(binary_float(
        "multiply",
        "Multiply",
        OutputDef::new("product", NodeValueType::Float),
    ));
    evaluators.register("multiply", |ctx: &mut EvalContext<'_>| {
        let a: f32 = ctx.get_input(0)?;
        let b: f32 = ctx.get_input(1)?;
        ctx.set_output(0, NodeValue::Float(a * b))
    });

    definitions.register(binary_float(
        "greater",
        "Greater",
        OutputDef::new("result", NodeValueType::Bool),
    ));
    evaluators.register("greater", |ctx: &mut EvalContext<'_>| {
        let a: f32 = ctx.get_input(0)?;
        let b: f32 = ctx.get_input(1)?;
        ctx.set_output(0, NodeValue::Bool(a > b))
    });
}

fn register_strings(definitions: &mut NodeRegistry, evaluators: &mut EvaluatorRegistry) {
    definitions.register(NodeDefinition {
        id: "concat".to_string(),
        name: "Concat".to_string(),
        fields: vec![],
        inputs: vec![InputDef::new("value", NodeValueType::String)],
        outputs: vec![OutputDef::new("out", NodeValueType::String)],
        variadic_inputs: true,
        exec_input: false,
        exec_outputs: vec![],
    });
    evaluators.register("concat", |ctx: &mut EvalContext<'_>| {
        let mut out = String::new();
        for port in 0..ctx.input_count()? {
            if let Some(part) = ctx.get_input_opt::<String>(port)? {
                out.push_str(&part);
            }
        }
        ctx.set_output(0, NodeValue::String(out))
    });
}

fn register_graphs(definitions: &mut NodeRegistry, evaluators: &mut EvaluatorRegistry) {
    definitions.register(NodeDefinition {
        id: "graph_input".to_string(),
        name: "Graph Input".to_string(),
        fields: vec![FieldDef::new("name", NodeValue::String(String::new()))],
        inputs: vec![],
        outputs: vec![OutputDef::new("out", NodeValueType::Any)],
        variadic_inputs: false,
        exec_input: false,
        exec_outputs: vec![],
    });
    evaluators.register("graph_input", |ctx: &mut EvalContext<'_>| {
        let name: String = ctx.get_field(0)?;
        let value = ctx.graph_input(&name)?;
        ctx.set_output(0, value)
    });

    definitions.register(NodeDefinition {
        id: "run_graph".to_string(),
        name: "Run Graph".to_string(),
        fields: vec![FieldDef::new("entry", NodeValue::String("run".to_string()))],
        inputs: vec![InputDef::new("graph", NodeValueType::Graph)],
        outputs: vec![OutputDef::new("result", NodeValueType::Any)],
        variadic_inputs: false,
        exec_input: true,
        exec_outputs: vec!["next".to_string()],
    });
    evaluators.register("run_graph", |ctx: &mut EvalContext<'_>| {
        let graph: Arc<crate::graph::Graph> = ctx.get_input(0)?;
        let entry: String = ctx.get_field(0)?;
        let outputs = ctx.evaluate_subgraph(graph, &entry, IndexMap::new())?;
        if let Some(result) = outputs.graph_outputs.get("result") {
            ctx.set_output(0, result.clone())?;
        }
        ctx.trigger(0)
    });
}
