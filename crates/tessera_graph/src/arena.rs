// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generational node arena and port addressing.
//!
//! Node handles are (slot, generation) pairs so a stale index left over
//! from a removed node can never alias a new node that reuses the slot.

use crate::node::Node;
use serde::{Deserialize, Serialize};

/// Stable handle to a node in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIndex {
    slot: u32,
    generation: u32,
}

impl NodeIndex {
    /// The arena slot this handle points at
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// The generation the slot held when this handle was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Stable handle to a port: a node plus a port ordinal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortIndex {
    /// The owning node
    pub node: NodeIndex,
    /// Port ordinal within the node
    pub port: u32,
}

impl PortIndex {
    /// Create a new port handle
    pub fn new(node: NodeIndex, port: u32) -> Self {
        Self { node, port }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Slot {
    Occupied { generation: u32, node: Node },
    Free { next_generation: u32 },
}

/// The node arena backing a graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl NodeArena {
    /// Create a new empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena holds no live nodes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a node, returning its handle
    pub fn insert(&mut self, node: Node) -> NodeIndex {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            let generation = match self.slots[slot as usize] {
                Slot::Free { next_generation } => next_generation,
                Slot::Occupied { .. } => unreachable!("free list points at occupied slot"),
            };
            self.slots[slot as usize] = Slot::Occupied { generation, node };
            NodeIndex { slot, generation }
        } else {
            let slot = self.slots.len() as u32;
            self.slots.push(Slot::Occupied {
                generation: 0,
                node,
            });
            NodeIndex {
                slot,
                generation: 0,
            }
        }
    }

    /// Remove a node, invalidating its handle
    pub fn remove(&mut self, index: NodeIndex) -> Option<Node> {
        let slot = self.slots.get_mut(index.slot as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == index.generation => {
                let next_generation = index.generation + 1;
                let old = std::mem::replace(slot, Slot::Free { next_generation });
                self.free.push(index.slot);
                self.len -= 1;
                match old {
                    Slot::Occupied { node, .. } => Some(node),
                    Slot::Free { .. } => None,
                }
            }
            _ => None,
        }
    }

    /// Reinsert a node at the exact slot and generation of a previously
    /// removed handle. Fails if the slot has been reused since.
    pub fn restore(&mut self, index: NodeIndex, node: Node) -> bool {
        let slot = index.slot as usize;
        while self.slots.len() <= slot {
            self.free.push(self.slots.len() as u32);
            self.slots.push(Slot::Free { next_generation: 0 });
        }
        match self.slots[slot] {
            Slot::Free { next_generation } if next_generation <= index.generation + 1 => {
                self.slots[slot] = Slot::Occupied {
                    generation: index.generation,
                    node,
                };
                self.free.retain(|&s| s != index.slot);
                self.len += 1;
                true
            }
            _ => false,
        }
    }

    /// Get a node by handle
    pub fn get(&self, index: NodeIndex) -> Option<&Node> {
        match self.slots.get(index.slot as usize)? {
            Slot::Occupied { generation, node } if *generation == index.generation => Some(node),
            _ => None,
        }
    }

    /// Get a mutable node by handle
    pub fn get_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        match self.slots.get_mut(index.slot as usize)? {
            Slot::Occupied { generation, node } if *generation == index.generation => Some(node),
            _ => None,
        }
    }

    /// Whether the handle refers to a live node
    pub fn contains(&self, index: NodeIndex) -> bool {
        self.get(index).is_some()
    }

    /// Iterate live nodes in slot order
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.slots.iter().enumerate().filter_map(|(slot, s)| match s {
            Slot::Occupied { generation, node } => Some((
                NodeIndex {
                    slot: slot as u32,
                    generation: *generation,
                },
                node,
            )),
            Slot::Free { .. } => None,
        })
    }

    /// Iterate live nodes mutably in slot order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeIndex, &mut Node)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, s)| match s {
                Slot::Occupied { generation, node } => Some((
                    NodeIndex {
                        slot: slot as u32,
                        generation: *generation,
                    },
                    node,
                )),
                Slot::Free { .. } => None,
            })
    }

    /// Handles of all live nodes in slot order
    pub fn indices(&self) -> Vec<NodeIndex> {
        self.iter().map(|(index, _)| index).collect()
    }
}

impl PartialEq for NodeArena {
    /// Structural equality over live nodes; free-slot bookkeeping is
    /// ignored.
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}
