// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reversible editing layer for Tessera graphs.
//!
//! Wraps every graph mutation in a command object whose inverse is
//! captured at record time, grouped into an undo/redo log with compound
//! support, and exposes the mutation facade consumed by UI and network
//! layers.

pub mod actions;
pub mod editor;
pub mod history;

pub use actions::{ActionError, GraphAction};
pub use editor::GraphEditor;
pub use history::{ActionGroup, ActionLog, HistoryError};
