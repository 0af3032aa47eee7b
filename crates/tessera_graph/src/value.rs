// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed values flowing through graph ports.

use crate::graph::Graph;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a world entity referenced from a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Create a new random entity ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Data type that can flow through ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeValueType {
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// 2D vector
    Vector2,
    /// 3D vector
    Vector3,
    /// Rotation quaternion (x, y, z, w)
    Quaternion,
    /// String value
    String,
    /// Entity reference
    Entity,
    /// Nested graph (loop bodies, reusable snippets)
    Graph,
    /// Any type (for generic nodes)
    Any,
    /// Placeholder resolved through the owning graph's variable table
    Variable(String),
}

impl NodeValueType {
    /// Default value used to seed inline input constants.
    ///
    /// `Any`, `Variable`, `Entity` and `Graph` ports have no meaningful
    /// default and start unset.
    pub fn default_value(&self) -> Option<NodeValue> {
        match self {
            Self::Bool => Some(NodeValue::Bool(false)),
            Self::Int => Some(NodeValue::Int(0)),
            Self::Float => Some(NodeValue::Float(0.0)),
            Self::Vector2 => Some(NodeValue::Vector2([0.0, 0.0])),
            Self::Vector3 => Some(NodeValue::Vector3([0.0, 0.0, 0.0])),
            Self::Quaternion => Some(NodeValue::Quaternion([0.0, 0.0, 0.0, 1.0])),
            Self::String => Some(NodeValue::String(String::new())),
            Self::Entity | Self::Graph | Self::Any | Self::Variable(_) => None,
        }
    }
}

/// Check whether a value of type `from` may be wired into a port of type `to`.
///
/// The only implicit coercion is the Int to Float widening; everything else
/// must match exactly or target `Any`. `Variable` types must be resolved
/// against the owning graph's variable table before calling this.
pub fn assignable(from: &NodeValueType, to: &NodeValueType) -> bool {
    *to == NodeValueType::Any
        || from == to
        || (*from == NodeValueType::Int && *to == NodeValueType::Float)
}

/// An immutable tagged value carried by a port or field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i32),
    /// Float
    Float(f32),
    /// 2D vector
    Vector2([f32; 2]),
    /// 3D vector
    Vector3([f32; 3]),
    /// Quaternion (x, y, z, w)
    Quaternion([f32; 4]),
    /// String
    String(String),
    /// Entity reference
    Entity(EntityId),
    /// Nested graph
    Graph(Arc<Graph>),
}

impl NodeValue {
    /// Get the type tag for this value
    pub fn value_type(&self) -> NodeValueType {
        match self {
            Self::Bool(_) => NodeValueType::Bool,
            Self::Int(_) => NodeValueType::Int,
            Self::Float(_) => NodeValueType::Float,
            Self::Vector2(_) => NodeValueType::Vector2,
            Self::Vector3(_) => NodeValueType::Vector3,
            Self::Quaternion(_) => NodeValueType::Quaternion,
            Self::String(_) => NodeValueType::String,
            Self::Entity(_) => NodeValueType::Entity,
            Self::Graph(_) => NodeValueType::Graph,
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Vector2([x, y]) => write!(f, "({x}, {y})"),
            Self::Vector3([x, y, z]) => write!(f, "({x}, {y}, {z})"),
            Self::Quaternion([x, y, z, w]) => write!(f, "({x}, {y}, {z}, {w})"),
            Self::String(v) => write!(f, "{v}"),
            Self::Entity(id) => write!(f, "entity:{}", id.0),
            Self::Graph(g) => write!(f, "graph:{}", g.name),
        }
    }
}

impl From<bool> for NodeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for NodeValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for NodeValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<String> for NodeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for NodeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// A value was read at a type it does not hold
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("type mismatch: expected {expected:?}, found {found:?}")]
pub struct TypeMismatch {
    /// The type the reader asked for
    pub expected: NodeValueType,
    /// The type the value actually holds
    pub found: NodeValueType,
}

/// Typed extraction from a [`NodeValue`].
///
/// The `f32` impl performs the one legal Int to Float widening; all other
/// mismatches fail.
pub trait FromValue: Sized {
    /// Extract a typed payload from the value
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch>;
}

fn mismatch(expected: NodeValueType, value: &NodeValue) -> TypeMismatch {
    TypeMismatch {
        expected,
        found: value.value_type(),
    }
}

impl FromValue for bool {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        match value {
            NodeValue::Bool(v) => Ok(*v),
            _ => Err(mismatch(NodeValueType::Bool, value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        match value {
            NodeValue::Int(v) => Ok(*v),
            _ => Err(mismatch(NodeValueType::Int, value)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        match value {
            NodeValue::Float(v) => Ok(*v),
            NodeValue::Int(v) => Ok(*v as f32),
            _ => Err(mismatch(NodeValueType::Float, value)),
        }
    }
}

impl FromValue for [f32; 2] {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        match value {
            NodeValue::Vector2(v) => Ok(*v),
            _ => Err(mismatch(NodeValueType::Vector2, value)),
        }
    }
}

impl FromValue for [f32; 3] {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        match value {
            NodeValue::Vector3(v) => Ok(*v),
            _ => Err(mismatch(NodeValueType::Vector3, value)),
        }
    }
}

impl FromValue for [f32; 4] {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        match value {
            NodeValue::Quaternion(v) => Ok(*v),
            _ => Err(mismatch(NodeValueType::Quaternion, value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        match value {
            NodeValue::String(v) => Ok(v.clone()),
            _ => Err(mismatch(NodeValueType::String, value)),
        }
    }
}

impl FromValue for EntityId {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        match value {
            NodeValue::Entity(v) => Ok(*v),
            _ => Err(mismatch(NodeValueType::Entity, value)),
        }
    }
}

impl FromValue for Arc<Graph> {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        match value {
            NodeValue::Graph(v) => Ok(v.clone()),
            _ => Err(mismatch(NodeValueType::Graph, value)),
        }
    }
}

impl FromValue for NodeValue {
    fn from_value(value: &NodeValue) -> Result<Self, TypeMismatch> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignable_exact_and_any() {
        assert!(assignable(&NodeValueType::Bool, &NodeValueType::Bool));
        assert!(assignable(&NodeValueType::Vector3, &NodeValueType::Any));
        assert!(assignable(&NodeValueType::Graph, &NodeValueType::Any));
        assert!(!assignable(&NodeValueType::Bool, &NodeValueType::Int));
        assert!(!assignable(&NodeValueType::Any, &NodeValueType::Int));
    }

    #[test]
    fn test_assignable_int_widens_to_float() {
        assert!(assignable(&NodeValueType::Int, &NodeValueType::Float));
        assert!(!assignable(&NodeValueType::Float, &NodeValueType::Int));
    }

    #[test]
    fn test_from_value_widening() {
        let value = NodeValue::Int(7);
        assert_eq!(f32::from_value(&value), Ok(7.0));
        assert_eq!(i32::from_value(&value), Ok(7));
    }

    #[test]
    fn test_from_value_mismatch() {
        let value = NodeValue::String("hello".to_string());
        let err = f32::from_value(&value).unwrap_err();
        assert_eq!(err.expected, NodeValueType::Float);
        assert_eq!(err.found, NodeValueType::String);
    }

    #[test]
    fn test_value_type_matches_payload() {
        assert_eq!(NodeValue::Bool(true).value_type(), NodeValueType::Bool);
        assert_eq!(
            NodeValue::Quaternion([0.0, 0.0, 0.0, 1.0]).value_type(),
            NodeValueType::Quaternion
        );
        assert_eq!(
            NodeValue::Entity(EntityId::new()).value_type(),
            NodeValueType::Entity
        );
    }

    #[test]
    fn test_default_values() {
        assert_eq!(
            NodeValueType::Int.default_value(),
            Some(NodeValue::Int(0))
        );
        assert_eq!(NodeValueType::Any.default_value(), None);
        assert_eq!(
            NodeValueType::Variable("speed".to_string()).default_value(),
            None
        );
    }
}
