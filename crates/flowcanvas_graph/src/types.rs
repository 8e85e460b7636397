// SPDX-License-Identifier: MIT OR Apache-2.0
//! Type descriptors and the connection constraint engine.
//!
//! The host describes its types once, in a [`TypeRegistry`]: base classes,
//! implemented interfaces and the implicit conversions it supports. Slots
//! refer to types by [`TypeId`] only, so a saved graph keeps working as long
//! as the type names survive.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Names of the types every registry knows about
pub mod builtin {
    /// Root type, everything is assignable to it
    pub const OBJECT: &str = "object";
    /// Boolean
    pub const BOOL: &str = "bool";
    /// Integer
    pub const INT: &str = "int";
    /// Float
    pub const FLOAT: &str = "float";
    /// 2D vector
    pub const VECTOR2: &str = "vector2";
    /// 3D vector
    pub const VECTOR3: &str = "vector3";
    /// String
    pub const STRING: &str = "string";
}

/// Durable name of a host type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(String);

impl TypeId {
    /// Create a type id from its name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The root type
    pub fn object() -> Self {
        Self::new(builtin::OBJECT)
    }

    /// Get the type name
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether this is the root type
    pub fn is_object(&self) -> bool {
        self.0 == builtin::OBJECT
    }
}

impl From<&str> for TypeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Description of one host type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    /// Type name
    pub id: TypeId,
    /// Base class, if any
    pub base: Option<TypeId>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeId>,
    /// Whether this type is itself an interface
    pub is_interface: bool,
}

/// Registry of host types, built once and shared by reference.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: IndexMap<TypeId, TypeInfo>,
    conversions: IndexSet<(TypeId, TypeId)>,
}

impl TypeRegistry {
    /// Create a registry that only knows the root type
    pub fn new() -> Self {
        let mut registry = Self {
            types: IndexMap::new(),
            conversions: IndexSet::new(),
        };
        registry.register_class(builtin::OBJECT, None);
        registry
    }

    /// Create a registry with the primitive value types and their implicit
    /// conversions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for name in [
            builtin::BOOL,
            builtin::INT,
            builtin::FLOAT,
            builtin::VECTOR2,
            builtin::VECTOR3,
            builtin::STRING,
        ] {
            registry.register_class(name, None);
        }

        registry.add_conversion(builtin::INT, builtin::FLOAT);
        registry.add_conversion(builtin::FLOAT, builtin::INT);
        registry.add_conversion(builtin::VECTOR2, builtin::VECTOR3);
        registry.add_conversion(builtin::VECTOR3, builtin::VECTOR2);
        registry
    }

    /// Register a type description, replacing any previous one
    pub fn register(&mut self, info: TypeInfo) {
        self.types.insert(info.id.clone(), info);
    }

    /// Register a class with an optional base class
    pub fn register_class(&mut self, name: &str, base: Option<&str>) -> TypeId {
        let id = TypeId::new(name);
        self.register(TypeInfo {
            id: id.clone(),
            base: base.map(TypeId::new),
            interfaces: Vec::new(),
            is_interface: false,
        });
        id
    }

    /// Register an interface
    pub fn register_interface(&mut self, name: &str) -> TypeId {
        let id = TypeId::new(name);
        self.register(TypeInfo {
            id: id.clone(),
            base: None,
            interfaces: Vec::new(),
            is_interface: true,
        });
        id
    }

    /// Declare that `ty` implements `interface`.
    ///
    /// Returns `false` if `ty` is not registered.
    pub fn implement(&mut self, ty: &str, interface: &str) -> bool {
        match self.types.get_mut(&TypeId::new(ty)) {
            Some(info) => {
                let interface = TypeId::new(interface);
                if !info.interfaces.contains(&interface) {
                    info.interfaces.push(interface);
                }
                true
            }
            None => false,
        }
    }

    /// Allow values of `from` to be consumed as `to`
    pub fn add_conversion(&mut self, from: &str, to: &str) {
        self.conversions.insert((TypeId::new(from), TypeId::new(to)));
    }

    /// Check whether a type is registered
    pub fn contains(&self, id: &TypeId) -> bool {
        self.types.contains_key(id)
    }

    /// Get a type description
    pub fn get(&self, id: &TypeId) -> Option<&TypeInfo> {
        self.types.get(id)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &TypeInfo> {
        self.types.values()
    }

    /// Check whether `ty` is `ancestor` or reaches it through its base chain
    /// or its interfaces.
    ///
    /// Malformed registries (a base chain that loops) terminate because every
    /// type is visited at most once.
    pub fn derives_from(&self, ty: &TypeId, ancestor: &TypeId) -> bool {
        if ty == ancestor {
            return true;
        }

        let mut visited = HashSet::new();
        let mut pending = vec![ty];
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(info) = self.types.get(current) else {
                continue;
            };
            for parent in info.base.iter().chain(info.interfaces.iter()) {
                if parent == ancestor {
                    return true;
                }
                pending.push(parent);
            }
        }
        false
    }

    /// Check for a registered implicit conversion
    pub fn has_conversion(&self, from: &TypeId, to: &TypeId) -> bool {
        self.conversions.contains(&(from.clone(), to.clone()))
    }

    /// Check if a value of type `from` may be consumed where `to` is required
    pub fn is_assignable(&self, from: &TypeId, to: &TypeId) -> bool {
        from == to || to.is_object() || self.derives_from(from, to) || self.has_conversion(from, to)
    }

    /// Decide whether a producer of type `produced` satisfies a consumer
    /// requiring `required` under an optional `constraint`.
    ///
    /// An untyped consumer accepts anything. An untyped producer is treated
    /// as the root type.
    pub fn satisfies(
        &self,
        produced: Option<&TypeId>,
        required: Option<&TypeId>,
        constraint: Option<&Constraint>,
    ) -> bool {
        let Some(required) = required else {
            return true;
        };

        let produced = produced.cloned().unwrap_or_else(TypeId::object);
        if !self.is_assignable(&produced, required) {
            return false;
        }

        constraint.map_or(true, |c| c.accepts(&produced, self))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Predicate restricting which produced types may satisfy a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Type must be, derive from, or implement the given type
    DerivesFrom(TypeId),
    /// Type must be exactly one of the listed types
    OneOf(Vec<TypeId>),
    /// Negation
    Not(Box<Constraint>),
    /// Every constraint must accept
    All(Vec<Constraint>),
    /// At least one constraint must accept
    AnyOf(Vec<Constraint>),
}

impl Constraint {
    /// Check a produced type against this constraint
    pub fn accepts(&self, ty: &TypeId, types: &TypeRegistry) -> bool {
        match self {
            Self::DerivesFrom(ancestor) => types.derives_from(ty, ancestor),
            Self::OneOf(allowed) => allowed.contains(ty),
            Self::Not(inner) => !inner.accepts(ty, types),
            Self::All(all) => all.iter().all(|c| c.accepts(ty, types)),
            Self::AnyOf(any) => any.iter().any(|c| c.accepts(ty, types)),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DerivesFrom(ty) => write!(f, "derives from {ty}"),
            Self::OneOf(types) => {
                let names: Vec<&str> = types.iter().map(TypeId::name).collect();
                write!(f, "one of [{}]", names.join(", "))
            }
            Self::Not(inner) => write!(f, "not ({inner})"),
            Self::All(all) => {
                let parts: Vec<String> = all.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" and "))
            }
            Self::AnyOf(any) => {
                let parts: Vec<String> = any.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" or "))
            }
        }
    }
}
