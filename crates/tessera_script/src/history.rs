// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undo/redo stacks over logged graph actions.
//!
//! Undo and redo are best-effort: a failed inverse is reported to the
//! diagnostic sink and the stack pointer still advances, so one damaged
//! entry cannot wedge the whole history.

use crate::actions::GraphAction;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tessera_graph::Graph;
use thiserror::Error;

/// Maximum undo history depth
const MAX_HISTORY: usize = 100;

/// History errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HistoryError {
    /// Nothing to undo
    #[error("Nothing to undo")]
    NothingToUndo,

    /// Nothing to redo
    #[error("Nothing to redo")]
    NothingToRedo,

    /// A compound is already being recorded
    #[error("A compound action is already open")]
    CompoundOpen,

    /// No compound is being recorded
    #[error("No compound action is open")]
    NoOpenCompound,
}

/// Group of actions undone/redone as a single unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGroup {
    /// Human-readable description
    pub description: String,
    /// Actions in recording order
    pub actions: Vec<GraphAction>,
}

/// The reversible action log: undo/redo stacks plus compound capture
#[derive(Debug)]
pub struct ActionLog {
    undo_stack: VecDeque<ActionGroup>,
    redo_stack: VecDeque<ActionGroup>,
    compound: Option<ActionGroup>,
    replaying: bool,
    max_depth: usize,
}

impl ActionLog {
    /// Create a new log with the default history depth
    pub fn new() -> Self {
        Self::with_max_depth(MAX_HISTORY)
    }

    /// Create a new log with a custom history depth
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            compound: None,
            replaying: false,
            max_depth,
        }
    }

    /// Record an action that has already been applied to the graph.
    /// While a compound is open the action joins it; during undo/redo
    /// replay nothing is recorded, so inverses cannot corrupt the
    /// stacks.
    pub fn record(&mut self, action: GraphAction) {
        if self.replaying {
            return;
        }
        if let Some(group) = self.compound.as_mut() {
            group.actions.push(action);
            return;
        }
        let group = ActionGroup {
            description: action.describe().to_string(),
            actions: vec![action],
        };
        self.push_group(group);
    }

    fn push_group(&mut self, group: ActionGroup) {
        if group.actions.is_empty() {
            return;
        }
        self.redo_stack.clear();
        self.undo_stack.push_back(group);
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
    }

    /// Start collecting subsequent actions into one undoable unit
    pub fn begin_compound(&mut self, description: impl Into<String>) -> Result<(), HistoryError> {
        if self.compound.is_some() {
            return Err(HistoryError::CompoundOpen);
        }
        self.compound = Some(ActionGroup {
            description: description.into(),
            actions: Vec::new(),
        });
        Ok(())
    }

    /// Close the open compound and push it as a single unit
    pub fn end_compound(&mut self) -> Result<(), HistoryError> {
        let group = self.compound.take().ok_or(HistoryError::NoOpenCompound)?;
        self.push_group(group);
        Ok(())
    }

    /// Whether a compound is currently being recorded
    pub fn compound_open(&self) -> bool {
        self.compound.is_some()
    }

    /// Whether the log is currently replaying inverses
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    /// Undo the most recent group, reverting its actions in reverse
    /// order
    pub fn undo(&mut self, graph: &mut Graph) -> Result<(), HistoryError> {
        let group = self
            .undo_stack
            .pop_back()
            .ok_or(HistoryError::NothingToUndo)?;
        self.replaying = true;
        for action in group.actions.iter().rev() {
            if let Err(err) = action.revert(graph) {
                tracing::warn!("Undo of '{}' failed: {}", group.description, err);
            }
        }
        self.replaying = false;
        self.redo_stack.push_back(group);
        Ok(())
    }

    /// Redo the most recently undone group, replaying its actions in
    /// recording order
    pub fn redo(&mut self, graph: &mut Graph) -> Result<(), HistoryError> {
        let group = self
            .redo_stack
            .pop_back()
            .ok_or(HistoryError::NothingToRedo)?;
        self.replaying = true;
        for action in &group.actions {
            if let Err(err) = action.apply(graph) {
                tracing::warn!("Redo of '{}' failed: {}", group.description, err);
            }
        }
        self.replaying = false;
        self.undo_stack.push_back(group);
        Ok(())
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Get undo stack depth
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Get redo stack depth
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Get description of the next undo group
    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(|g| g.description.as_str())
    }

    /// Get description of the next redo group
    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.back().map(|g| g.description.as_str())
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.compound = None;
    }
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new()
    }
}
