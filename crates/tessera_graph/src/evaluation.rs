// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hybrid pull/push graph evaluation.
//!
//! Impure nodes are pushed through the work queue by execution edges;
//! pure data dependencies are pulled on demand by scheduling them ahead
//! of the dependent node. A faulting node is skipped and the rest of
//! the queue keeps running; only an exhausted step budget aborts a
//! pass.

use crate::arena::{NodeIndex, PortIndex};
use crate::graph::Graph;
use crate::node::Node;
use crate::value::{FromValue, NodeValue, TypeMismatch};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Default bound on nodes processed per evaluation pass. Validated
/// graphs are acyclic and never approach it; corrupted deserialized
/// data could otherwise loop forever.
const DEFAULT_STEP_LIMIT: u64 = 100_000;

/// Error during evaluation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// A value was read at a type it does not hold
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    /// An input depends on an impure node that was never scheduled;
    /// the graph bypassed edit-time validation
    #[error("invalid data flow into {input:?} on node {node:?}")]
    InvalidDataFlow {
        /// The node that could not be evaluated
        node: NodeIndex,
        /// The input whose dependency is unavailable
        input: PortIndex,
    },

    /// Multiple writers target one input. Structural invariants make
    /// this unreachable in normal operation.
    #[error("multiple writers target input {0:?}")]
    TooManyInputs(PortIndex),

    /// A required input had neither an edge value nor a constant
    #[error("missing required input {0:?}")]
    MissingInput(PortIndex),

    /// Node not found (stale or foreign index)
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeIndex),

    /// The node is not a valid evaluation entry point
    #[error("node {0:?} is not a root")]
    NotARoot(NodeIndex),

    /// No entry or graph input with the given name
    #[error("unknown entry: {0}")]
    UnknownEntry(String),

    /// Port ordinal out of range on the executing node
    #[error("unknown port {0:?} on the executing node")]
    UnknownPort(PortIndex),

    /// No execution output with the given name on the executing node
    #[error("unknown execution output '{0}' on the executing node")]
    UnknownExecOutput(String),

    /// Field ordinal out of range on the executing node
    #[error("field {field} out of range on node {node:?}")]
    UnknownField {
        /// The executing node
        node: NodeIndex,
        /// The offending ordinal
        field: u32,
    },

    /// The pass exceeded its step budget
    #[error("evaluation exceeded the step budget of {limit}")]
    StepLimitExceeded {
        /// The configured budget
        limit: u64,
    },

    /// A context method was called with no node executing
    #[error("no node is currently executing")]
    NoActiveNode,
}

/// A compiled node body invoked when the node is scheduled.
///
/// The provider of these callables is external; the core only requires
/// the signature. Closures of the matching shape implement the trait.
pub trait Evaluable {
    /// Run the node body against the evaluation context
    fn evaluate(&self, ctx: &mut EvalContext<'_>) -> Result<(), EvalError>;
}

impl<F> Evaluable for F
where
    F: Fn(&mut EvalContext<'_>) -> Result<(), EvalError>,
{
    fn evaluate(&self, ctx: &mut EvalContext<'_>) -> Result<(), EvalError> {
        self(ctx)
    }
}

/// Registry mapping definition identifiers to evaluation callables
#[derive(Default)]
pub struct EvaluatorRegistry {
    evaluators: IndexMap<String, Arc<dyn Evaluable>>,
}

impl EvaluatorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable for a definition identifier
    pub fn register<E: Evaluable + 'static>(&mut self, id: impl Into<String>, evaluator: E) {
        self.evaluators.insert(id.into(), Arc::new(evaluator));
    }

    /// Look up a callable
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Evaluable>> {
        self.evaluators.get(id)
    }

    /// Whether a callable is registered for the identifier
    pub fn contains(&self, id: &str) -> bool {
        self.evaluators.contains_key(id)
    }
}

/// Everything one evaluation pass produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalOutputs {
    /// Cached output values keyed by port
    pub ports: IndexMap<PortIndex, NodeValue>,
    /// Resolved graph-level boundary outputs keyed by name
    pub graph_outputs: IndexMap<String, NodeValue>,
}

enum GraphSource<'a> {
    Borrowed(&'a Graph),
    Shared(Arc<Graph>),
}

impl GraphSource<'_> {
    fn get(&self) -> &Graph {
        match self {
            Self::Borrowed(graph) => graph,
            Self::Shared(graph) => graph,
        }
    }
}

struct Frame<'a> {
    graph: GraphSource<'a>,
    queue: VecDeque<NodeIndex>,
    cache: IndexMap<PortIndex, NodeValue>,
    inputs: IndexMap<String, NodeValue>,
    faulted: HashSet<NodeIndex>,
}

impl<'a> Frame<'a> {
    fn new(graph: GraphSource<'a>) -> Self {
        Self {
            graph,
            queue: VecDeque::new(),
            cache: IndexMap::new(),
            inputs: IndexMap::new(),
            faulted: HashSet::new(),
        }
    }
}

enum Readiness {
    Ready,
    Pending(Vec<NodeIndex>),
    Fault(EvalError),
}

/// Evaluation context: graph frame stack, work queue, node call stack
/// and output caches
pub struct EvalContext<'a> {
    evaluators: &'a EvaluatorRegistry,
    frames: Vec<Frame<'a>>,
    call_stack: Vec<NodeIndex>,
    step_limit: u64,
    steps: u64,
}

impl<'a> EvalContext<'a> {
    /// Create a new context over an evaluator registry
    pub fn new(evaluators: &'a EvaluatorRegistry) -> Self {
        Self {
            evaluators,
            frames: Vec::new(),
            call_stack: Vec::new(),
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
        }
    }

    /// Override the per-pass step budget
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    // ---- entry points ----------------------------------------------------

    /// Evaluate starting from a root node
    pub fn evaluate_from_root(
        &mut self,
        graph: &'a Graph,
        root: NodeIndex,
    ) -> Result<EvalOutputs, EvalError> {
        let node = graph.node(root).ok_or(EvalError::NodeNotFound(root))?;
        if !node.definition().is_root() {
            return Err(EvalError::NotARoot(root));
        }
        self.begin_pass();
        let mut frame = Frame::new(GraphSource::Borrowed(graph));
        frame.queue.push_back(root);
        self.frames.push(frame);
        let result = self.run();
        let outputs = self.finish_frame();
        result.map(|()| outputs)
    }

    /// Evaluate a named graph entry, scheduling every node wired to it
    pub fn evaluate_entry(
        &mut self,
        graph: &'a Graph,
        entry: &str,
    ) -> Result<EvalOutputs, EvalError> {
        let targets = graph
            .graph_input(entry)
            .map(|input| input.targets.clone())
            .ok_or_else(|| EvalError::UnknownEntry(entry.to_string()))?;
        self.begin_pass();
        let mut frame = Frame::new(GraphSource::Borrowed(graph));
        frame.queue.extend(targets);
        self.frames.push(frame);
        let result = self.run();
        let outputs = self.finish_frame();
        result.map(|()| outputs)
    }

    /// Host event dispatch: evaluate every root node stamped from the
    /// named definition
    pub fn fire_event(
        &mut self,
        graph: &'a Graph,
        definition_id: &str,
    ) -> Result<EvalOutputs, EvalError> {
        let roots: Vec<NodeIndex> = graph
            .nodes_of_type(definition_id)
            .into_iter()
            .filter(|index| graph.node(*index).is_some_and(|n| n.definition().is_root()))
            .collect();
        self.begin_pass();
        let mut frame = Frame::new(GraphSource::Borrowed(graph));
        frame.queue.extend(roots);
        self.frames.push(frame);
        let result = self.run();
        let outputs = self.finish_frame();
        result.map(|()| outputs)
    }

    /// Evaluate a nested graph in its own frame. Callables use this for
    /// subgraph-running nodes (loop bodies); the step budget is shared
    /// with the enclosing pass.
    pub fn evaluate_subgraph(
        &mut self,
        graph: Arc<Graph>,
        entry: &str,
        inputs: IndexMap<String, NodeValue>,
    ) -> Result<EvalOutputs, EvalError> {
        let targets = graph
            .graph_input(entry)
            .map(|input| input.targets.clone())
            .ok_or_else(|| EvalError::UnknownEntry(entry.to_string()))?;
        self.begin_pass();
        let mut frame = Frame::new(GraphSource::Shared(graph));
        frame.inputs = inputs;
        frame.queue.extend(targets);
        self.frames.push(frame);
        let result = self.run();
        let outputs = self.finish_frame();
        result.map(|()| outputs)
    }

    fn begin_pass(&mut self) {
        if self.frames.is_empty() {
            self.steps = 0;
        }
    }

    // ---- scheduling loop -------------------------------------------------

    fn run(&mut self) -> Result<(), EvalError> {
        loop {
            let Some(node) = self.frames.last_mut().and_then(|f| f.queue.pop_front()) else {
                return Ok(());
            };
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(EvalError::StepLimitExceeded {
                    limit: self.step_limit,
                });
            }
            if self
                .frames
                .last()
                .is_some_and(|f| f.faulted.contains(&node))
            {
                continue;
            }
            match self.readiness(node) {
                Readiness::Ready => self.invoke(node)?,
                Readiness::Pending(deps) => self.defer(node, deps),
                Readiness::Fault(error) => {
                    tracing::warn!("Skipping node {:?}: {}", node, error);
                    if let Some(frame) = self.frames.last_mut() {
                        frame.faulted.insert(node);
                    }
                }
            }
        }
    }

    /// Check whether every wired input of `node` has a cached value,
    /// collecting pure upstream nodes that still need to run first.
    fn readiness(&self, node: NodeIndex) -> Readiness {
        let Some(frame) = self.frames.last() else {
            return Readiness::Fault(EvalError::NoActiveNode);
        };
        let graph = frame.graph.get();
        let Some(current) = graph.node(node) else {
            return Readiness::Fault(EvalError::NodeNotFound(node));
        };
        let mut pending = Vec::new();
        for port in 0..current.input_count() {
            let input = PortIndex::new(node, port);
            let Some(source) = graph.data_edge(input) else {
                continue;
            };
            if frame.cache.contains_key(&source) {
                continue;
            }
            if frame.faulted.contains(&source.node) {
                return Readiness::Fault(EvalError::InvalidDataFlow { node, input });
            }
            let Some(upstream) = graph.node(source.node) else {
                return Readiness::Fault(EvalError::InvalidDataFlow { node, input });
            };
            if upstream.definition().is_pure() {
                pending.push(source.node);
            } else {
                return Readiness::Fault(EvalError::InvalidDataFlow { node, input });
            }
        }
        if pending.is_empty() {
            Readiness::Ready
        } else {
            Readiness::Pending(pending)
        }
    }

    fn defer(&mut self, node: NodeIndex, deps: Vec<NodeIndex>) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        for dep in deps {
            if !frame.queue.contains(&dep) {
                frame.queue.push_back(dep);
            }
        }
        frame.queue.push_back(node);
    }

    fn invoke(&mut self, node: NodeIndex) -> Result<(), EvalError> {
        let definition_id = match self.frames.last().and_then(|f| f.graph.get().node(node)) {
            Some(n) => n.definition().id.clone(),
            None => {
                tracing::warn!("Scheduled node {:?} no longer exists", node);
                return Ok(());
            }
        };
        let Some(evaluator) = self.evaluators.get(&definition_id).cloned() else {
            tracing::warn!(
                "No evaluator registered for '{}'; skipping node {:?}",
                definition_id,
                node
            );
            if let Some(frame) = self.frames.last_mut() {
                frame.faulted.insert(node);
            }
            return Ok(());
        };
        self.call_stack.push(node);
        let result = evaluator.evaluate(self);
        self.call_stack.pop();
        match result {
            Ok(()) => Ok(()),
            Err(error @ EvalError::StepLimitExceeded { .. }) => Err(error),
            Err(error) => {
                tracing::warn!("Node {:?} ('{}') faulted: {}", node, definition_id, error);
                if let Some(frame) = self.frames.last_mut() {
                    frame.faulted.insert(node);
                }
                Ok(())
            }
        }
    }

    fn finish_frame(&mut self) -> EvalOutputs {
        let Some(frame) = self.frames.pop() else {
            return EvalOutputs::default();
        };
        let mut graph_outputs = IndexMap::new();
        {
            let graph = frame.graph.get();
            for output in graph.graph_outputs() {
                let Some(source) = output.source else {
                    continue;
                };
                if let Some(value) = frame.cache.get(&source) {
                    graph_outputs.insert(output.name.clone(), value.clone());
                } else {
                    tracing::debug!("Graph output '{}' resolved to no cached value", output.name);
                }
            }
        }
        EvalOutputs {
            ports: frame.cache,
            graph_outputs,
        }
    }

    // ---- callable-facing API ---------------------------------------------

    /// The node currently executing
    pub fn current_node(&self) -> Result<NodeIndex, EvalError> {
        self.call_stack.last().copied().ok_or(EvalError::NoActiveNode)
    }

    fn frame(&self) -> Result<&Frame<'a>, EvalError> {
        self.frames.last().ok_or(EvalError::NoActiveNode)
    }

    fn frame_mut(&mut self) -> Result<&mut Frame<'a>, EvalError> {
        self.frames.last_mut().ok_or(EvalError::NoActiveNode)
    }

    fn input_value(&self, port: u32) -> Result<Option<&NodeValue>, EvalError> {
        let node = self.current_node()?;
        let frame = self.frame()?;
        let graph = frame.graph.get();
        let input = PortIndex::new(node, port);
        if let Some(source) = graph.data_edge(input) {
            return Ok(frame.cache.get(&source));
        }
        Ok(graph.node(node).and_then(|n| n.input_constant(port)))
    }

    /// Read an input of the executing node: the wired upstream value,
    /// or the inline constant when unconnected. The `f32` reader widens
    /// Int values.
    pub fn get_input<T: FromValue>(&self, port: u32) -> Result<T, EvalError> {
        match self.input_value(port)? {
            Some(value) => Ok(T::from_value(value)?),
            None => {
                let node = self.current_node()?;
                Err(EvalError::MissingInput(PortIndex::new(node, port)))
            }
        }
    }

    /// Like [`EvalContext::get_input`] but absent values yield `None`
    /// instead of an error (optional ports)
    pub fn get_input_opt<T: FromValue>(&self, port: u32) -> Result<Option<T>, EvalError> {
        match self.input_value(port)? {
            Some(value) => Ok(Some(T::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Input port count of the executing node, including variadic slots
    pub fn input_count(&self) -> Result<u32, EvalError> {
        let node = self.current_node()?;
        let frame = self.frame()?;
        frame
            .graph
            .get()
            .node(node)
            .map(Node::input_count)
            .ok_or(EvalError::NodeNotFound(node))
    }

    /// Read a baked constant field of the executing node
    pub fn get_field<T: FromValue>(&self, field: u32) -> Result<T, EvalError> {
        let node = self.current_node()?;
        let frame = self.frame()?;
        let value = frame
            .graph
            .get()
            .node(node)
            .and_then(|n| n.field(field))
            .ok_or(EvalError::UnknownField { node, field })?;
        Ok(T::from_value(value)?)
    }

    /// Write an output of the executing node into the frame cache
    pub fn set_output(&mut self, port: u32, value: NodeValue) -> Result<(), EvalError> {
        let node = self.current_node()?;
        let target = PortIndex::new(node, port);
        {
            let frame = self.frame()?;
            let valid = frame
                .graph
                .get()
                .node(node)
                .is_some_and(|n| n.output_type(port).is_some());
            if !valid {
                return Err(EvalError::UnknownPort(target));
            }
        }
        self.frame_mut()?.cache.insert(target, value);
        Ok(())
    }

    /// Schedule every node wired to an execution output of the
    /// executing node. Control branches and continuations are expressed
    /// through this.
    pub fn trigger(&mut self, port: u32) -> Result<(), EvalError> {
        let node = self.current_node()?;
        let from = PortIndex::new(node, port);
        let targets = {
            let frame = self.frame()?;
            let graph = frame.graph.get();
            let valid = graph
                .node(node)
                .is_some_and(|n| (port as usize) < n.definition().exec_outputs.len());
            if !valid {
                return Err(EvalError::UnknownPort(from));
            }
            graph.exec_targets(from).to_vec()
        };
        let frame = self.frame_mut()?;
        for target in targets {
            frame.queue.push_back(target);
        }
        Ok(())
    }

    /// [`EvalContext::trigger`] addressed by execution output name
    pub fn trigger_named(&mut self, name: &str) -> Result<(), EvalError> {
        let node = self.current_node()?;
        let port = {
            let frame = self.frame()?;
            frame
                .graph
                .get()
                .node(node)
                .and_then(|n| n.definition().exec_output_index(name))
                .ok_or_else(|| EvalError::UnknownExecOutput(name.to_string()))?
        };
        self.trigger(port)
    }

    /// Read a graph-level input value supplied by the frame's caller
    pub fn graph_input(&self, name: &str) -> Result<NodeValue, EvalError> {
        let frame = self.frame()?;
        frame
            .inputs
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownEntry(name.to_string()))
    }
}
