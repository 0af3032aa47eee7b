// SPDX-License-Identifier: MIT OR Apache-2.0
//! Visual scripting core for the Tessera editor.
//!
//! Graphs of typed nodes execute in response to runtime events: pure
//! nodes compute values on demand (pull), impure nodes run when control
//! flow reaches them (push).
//!
//! ## Architecture
//!
//! The crate is built on:
//! - A closed set of typed values with one implicit widening
//! - Generational node handles over an arena
//! - Edge tables validated for range, types, cycles and duplicates
//! - A hybrid pull/push evaluator with per-node fault isolation
//! - JSON persistence with a prune pass for damaged files

pub mod arena;
pub mod evaluation;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod value;

pub use arena::{NodeArena, NodeIndex, PortIndex};
pub use evaluation::{EvalContext, EvalError, EvalOutputs, Evaluable, EvaluatorRegistry};
pub use graph::{EditError, Graph, GraphId, IncidentEdges, LoadError, NodeMemory};
pub use node::{FieldDef, InputDef, Node, NodeDefinition, NodeRegistry, OutputDef};
pub use value::{assignable, EntityId, FromValue, NodeValue, NodeValueType, TypeMismatch};
