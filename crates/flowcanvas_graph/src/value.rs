// SPDX-License-Identifier: MIT OR Apache-2.0
//! Values carried by branches.

use crate::types::{builtin, TypeId, TypeRegistry};
use serde::{Deserialize, Serialize};

/// Reference to a host object (a component, an entity, an asset).
///
/// The engine never dereferences the handle; it only carries the handle and
/// the runtime type of the referenced object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Runtime type of the referenced object
    pub type_id: TypeId,
    /// Opaque host handle
    pub handle: u64,
}

/// Value that can flow through a branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// 2D vector
    Vector2([f64; 2]),
    /// 3D vector
    Vector3([f64; 3]),
    /// String
    String(String),
    /// Host object reference
    Object(ObjectRef),
}

impl DynValue {
    /// Get the runtime type of this value
    pub fn type_id(&self) -> TypeId {
        match self {
            Self::Bool(_) => TypeId::new(builtin::BOOL),
            Self::Int(_) => TypeId::new(builtin::INT),
            Self::Float(_) => TypeId::new(builtin::FLOAT),
            Self::Vector2(_) => TypeId::new(builtin::VECTOR2),
            Self::Vector3(_) => TypeId::new(builtin::VECTOR3),
            Self::String(_) => TypeId::new(builtin::STRING),
            Self::Object(object) => object.type_id.clone(),
        }
    }

    /// Convert this value so it can be consumed as `target`.
    ///
    /// Returns `None` when the registry does not consider the runtime type
    /// assignable to `target`, or when no concrete conversion exists.
    pub fn cast(&self, target: &TypeId, types: &TypeRegistry) -> Option<DynValue> {
        let source = self.type_id();
        if &source == target || target.is_object() {
            return Some(self.clone());
        }
        if !types.is_assignable(&source, target) {
            return None;
        }

        match (self, target.name()) {
            (Self::Int(v), builtin::FLOAT) => Some(Self::Float(*v as f64)),
            (Self::Float(v), builtin::INT) => Some(Self::Int(v.trunc() as i64)),
            (Self::Vector2([x, y]), builtin::VECTOR3) => Some(Self::Vector3([*x, *y, 0.0])),
            (Self::Vector3([x, y, _]), builtin::VECTOR2) => Some(Self::Vector2([*x, *y])),
            // Upcasts keep the object and its runtime type
            (Self::Object(_), _) => Some(self.clone()),
            _ => None,
        }
    }

    /// Parse a value from its textual form.
    ///
    /// `true`/`false` become booleans, integers and floats are detected from
    /// their literal, `(x, y)` and `(x, y, z)` become vectors and anything
    /// else is kept as a string.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Ok(b) = text.parse::<bool>() {
            return Self::Bool(b);
        }
        if let Ok(i) = text.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return Self::Float(f);
        }
        if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            let parts: Option<Vec<f64>> = inner.split(',').map(|p| p.trim().parse().ok()).collect();
            match parts.as_deref() {
                Some([x, y]) => return Self::Vector2([*x, *y]),
                Some([x, y, z]) => return Self::Vector3([*x, *y, *z]),
                _ => {}
            }
        }
        Self::String(text.to_string())
    }
}

impl std::fmt::Display for DynValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Vector2([x, y]) => write!(f, "({x}, {y})"),
            Self::Vector3([x, y, z]) => write!(f, "({x}, {y}, {z})"),
            Self::String(v) => write!(f, "{v}"),
            Self::Object(o) => write!(f, "<{} {}>", o.type_id, o.handle),
        }
    }
}

/// Typed extraction from a [`DynValue`].
pub trait FromValue: Sized {
    /// Type the value is cast to before extraction
    const TYPE_NAME: &'static str;

    /// Extract the value, `None` on a variant mismatch
    fn from_value(value: &DynValue) -> Option<Self>;
}

impl FromValue for bool {
    const TYPE_NAME: &'static str = builtin::BOOL;

    fn from_value(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const TYPE_NAME: &'static str = builtin::INT;

    fn from_value(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = builtin::FLOAT;

    fn from_value(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for [f64; 2] {
    const TYPE_NAME: &'static str = builtin::VECTOR2;

    fn from_value(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Vector2(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for [f64; 3] {
    const TYPE_NAME: &'static str = builtin::VECTOR3;

    fn from_value(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Vector3(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = builtin::STRING;

    fn from_value(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}
