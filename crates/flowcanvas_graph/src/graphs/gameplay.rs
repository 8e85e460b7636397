// SPDX-License-Identifier: MIT OR Apache-2.0
//! Gameplay graph for behavior trees and visual scripting.
//!
//! Host nodes (actions, conditions, variables) are driven by the game; math
//! and logic nodes are calculators evaluated on demand.

use crate::migration::{FieldMap, MigrationError};
use crate::node::{NodeCategory, NodeRegistry, NodeTypeDef, Parameter};
use crate::slot::SlotDescriptor;
use crate::types::{builtin, Constraint, TypeId, TypeRegistry};
use crate::value::DynValue;

/// Scene types known to gameplay graphs
pub mod scene {
    /// Base of every component
    pub const COMPONENT: &str = "Component";
    /// Position, rotation and scale of an object
    pub const TRANSFORM: &str = "Transform";
    /// Physics body
    pub const RIGIDBODY: &str = "Rigidbody";
    /// Hit points of an object
    pub const HEALTH: &str = "Health";
    /// Scene object owning components
    pub const GAME_OBJECT: &str = "GameObject";
    /// Anything that can take damage
    pub const DAMAGEABLE: &str = "IDamageable";
}

/// Create the type registry for gameplay graphs
pub fn create_type_registry() -> TypeRegistry {
    let mut types = TypeRegistry::with_builtins();
    types.register_class(scene::COMPONENT, None);
    types.register_class(scene::TRANSFORM, Some(scene::COMPONENT));
    types.register_class(scene::RIGIDBODY, Some(scene::COMPONENT));
    types.register_class(scene::HEALTH, Some(scene::COMPONENT));
    types.register_class(scene::GAME_OBJECT, None);
    types.register_interface(scene::DAMAGEABLE);
    types.implement(scene::HEALTH, scene::DAMAGEABLE);
    types.implement(scene::GAME_OBJECT, scene::DAMAGEABLE);
    types
}

/// Create the gameplay graph node registry
pub fn create_gameplay_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    // Variables
    for (id, name, ty) in [
        ("bool_variable", "Bool Variable", builtin::BOOL),
        ("int_variable", "Int Variable", builtin::INT),
        ("float_variable", "Float Variable", builtin::FLOAT),
        ("vector3_variable", "Vector3 Variable", builtin::VECTOR3),
        ("string_variable", "String Variable", builtin::STRING),
        ("game_object_variable", "GameObject Variable", scene::GAME_OBJECT),
        ("transform_variable", "Transform Variable", scene::TRANSFORM),
        ("health_variable", "Health Variable", scene::HEALTH),
    ] {
        registry.register(
            NodeTypeDef::host(id, name)
                .with_category(NodeCategory::Variable)
                .with_description("Blackboard value exposed to the graph")
                .with_output(SlotDescriptor::typed("Value", ty)),
        );
    }

    // Composites
    registry.register(
        NodeTypeDef::host("sequence", "Sequence")
            .with_category(NodeCategory::Logic)
            .with_description("Run children in order until one fails"),
    );
    registry.register(
        NodeTypeDef::host("selector", "Selector")
            .with_category(NodeCategory::Logic)
            .with_description("Run children in order until one succeeds"),
    );

    // Actions
    registry.register(
        NodeTypeDef::host("set_health", "Set Health")
            .with_category(NodeCategory::Action)
            .with_description("Set the hit points of the owner")
            .with_input(SlotDescriptor::typed("Amount", builtin::INT)),
    );
    registry.register(
        NodeTypeDef::host("look_at", "Look At")
            .with_category(NodeCategory::Action)
            .with_description("Rotate the owner towards a transform")
            .with_input(
                SlotDescriptor::typed("Target", scene::TRANSFORM)
                    .with_constraint(Constraint::DerivesFrom(TypeId::new(scene::COMPONENT))),
            ),
    );
    registry.register(
        NodeTypeDef::host("apply_damage", "Apply Damage")
            .with_category(NodeCategory::Action)
            .with_description("Deal damage to a target")
            .with_input(
                SlotDescriptor::typed("Target", builtin::OBJECT)
                    .with_constraint(Constraint::DerivesFrom(TypeId::new(scene::DAMAGEABLE))),
            )
            .with_input(SlotDescriptor::typed("Amount", builtin::FLOAT).with_default(DynValue::Float(1.0))),
    );
    registry.register(
        NodeTypeDef::host("move_towards", "Move Towards")
            .with_category(NodeCategory::Action)
            .with_description("Move the owner towards a position")
            .with_input(SlotDescriptor::typed("Target", builtin::VECTOR3))
            .with_parameter("Speed", Parameter::Constant(DynValue::Float(1.0)))
            .with_migration(speed_to_parameter),
    );
    registry.register(
        NodeTypeDef::host("log_value", "Log Value")
            .with_category(NodeCategory::Utility)
            .with_description("Print a value to the console")
            .with_input(SlotDescriptor::any("Value")),
    );
    registry.register(
        NodeTypeDef::host("int_relay", "Int Relay")
            .with_category(NodeCategory::Utility)
            .with_description("Forward an int once per tick")
            .with_input(SlotDescriptor::typed("In", builtin::INT))
            .with_output(SlotDescriptor::typed("Out", builtin::INT)),
    );

    // Conditions
    registry.register(
        NodeTypeDef::host("is_alive", "Is Alive")
            .with_category(NodeCategory::Condition)
            .with_description("Succeed while hit points are above zero")
            .with_input(SlotDescriptor::typed("Health", builtin::INT)),
    );

    // Math
    registry.register(
        NodeTypeDef::calculator("double", "Double", double)
            .with_category(NodeCategory::Math)
            .with_input(SlotDescriptor::typed("Value", builtin::INT))
            .with_output(SlotDescriptor::typed("Result", builtin::INT)),
    );
    registry.register(
        NodeTypeDef::calculator("add", "Add", add)
            .with_category(NodeCategory::Math)
            .with_input(SlotDescriptor::typed("A", builtin::FLOAT).with_default(DynValue::Float(0.0)))
            .with_input(SlotDescriptor::typed("B", builtin::FLOAT).with_default(DynValue::Float(0.0)))
            .with_output(SlotDescriptor::typed("Sum", builtin::FLOAT)),
    );
    registry.register(
        NodeTypeDef::calculator("multiply", "Multiply", multiply)
            .with_category(NodeCategory::Math)
            .with_input(SlotDescriptor::typed("A", builtin::FLOAT).with_default(DynValue::Float(1.0)))
            .with_input(SlotDescriptor::typed("B", builtin::FLOAT).with_default(DynValue::Float(1.0)))
            .with_output(SlotDescriptor::typed("Product", builtin::FLOAT)),
    );
    registry.register(
        NodeTypeDef::calculator("compose_vector3", "Compose Vector3", compose_vector3)
            .with_category(NodeCategory::Math)
            .with_input(SlotDescriptor::typed("X", builtin::FLOAT).with_default(DynValue::Float(0.0)))
            .with_input(SlotDescriptor::typed("Y", builtin::FLOAT).with_default(DynValue::Float(0.0)))
            .with_input(SlotDescriptor::typed("Z", builtin::FLOAT).with_default(DynValue::Float(0.0)))
            .with_output(SlotDescriptor::typed("Vector", builtin::VECTOR3)),
    );
    registry.register(
        NodeTypeDef::calculator("distance", "Distance", distance)
            .with_category(NodeCategory::Math)
            .with_input(SlotDescriptor::typed("A", builtin::VECTOR3))
            .with_input(SlotDescriptor::typed("B", builtin::VECTOR3))
            .with_output(SlotDescriptor::typed("Distance", builtin::FLOAT)),
    );

    // Logic
    registry.register(
        NodeTypeDef::calculator("greater_than", "Greater Than", greater_than)
            .with_category(NodeCategory::Logic)
            .with_input(SlotDescriptor::typed("A", builtin::FLOAT))
            .with_input(SlotDescriptor::typed("B", builtin::FLOAT))
            .with_output(SlotDescriptor::typed("Result", builtin::BOOL)),
    );
    registry.register(
        NodeTypeDef::calculator("not", "Not", not)
            .with_category(NodeCategory::Logic)
            .with_input(SlotDescriptor::typed("Value", builtin::BOOL))
            .with_output(SlotDescriptor::typed("Result", builtin::BOOL)),
    );
    registry.register(
        NodeTypeDef::calculator("select", "Select", select)
            .with_category(NodeCategory::Logic)
            .with_description("Pick A when the condition holds, B otherwise")
            .with_input(SlotDescriptor::typed("Condition", builtin::BOOL))
            .with_input(SlotDescriptor::any("A"))
            .with_input(SlotDescriptor::any("B"))
            .with_output(SlotDescriptor::any("Result")),
    );

    registry
}

/// Version 0 stored a bare `OldSpeed` number; version 1 stores a `Speed`
/// parameter that may also be bound to a variable.
fn speed_to_parameter(fields: &mut FieldMap) -> Result<(), MigrationError> {
    let Some(old) = fields.remove("OldSpeed") else {
        return Ok(());
    };
    let speed = old
        .as_f64()
        .ok_or_else(|| MigrationError::invalid_field("OldSpeed", format!("expected a number, found {old}")))?;
    fields.insert(
        "Speed".to_string(),
        serde_json::to_value(Parameter::Constant(DynValue::Float(speed)))?,
    );
    Ok(())
}

fn float_at(inputs: &[Option<DynValue>], index: usize) -> Option<f64> {
    match inputs.get(index)? {
        Some(DynValue::Float(v)) => Some(*v),
        Some(DynValue::Int(v)) => Some(*v as f64),
        _ => None,
    }
}

fn vector3_at(inputs: &[Option<DynValue>], index: usize) -> Option<[f64; 3]> {
    match inputs.get(index)? {
        Some(DynValue::Vector3(v)) => Some(*v),
        _ => None,
    }
}

fn double(inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>> {
    let result = match inputs.first() {
        Some(Some(DynValue::Int(v))) => v.checked_mul(2).map(DynValue::Int),
        Some(Some(DynValue::Float(v))) => Some(DynValue::Float(v * 2.0)),
        _ => None,
    };
    vec![result]
}

fn add(inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>> {
    let sum = float_at(inputs, 0).zip(float_at(inputs, 1)).map(|(a, b)| a + b);
    vec![sum.map(DynValue::Float)]
}

fn multiply(inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>> {
    let product = float_at(inputs, 0).zip(float_at(inputs, 1)).map(|(a, b)| a * b);
    vec![product.map(DynValue::Float)]
}

fn compose_vector3(inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>> {
    let vector = match (float_at(inputs, 0), float_at(inputs, 1), float_at(inputs, 2)) {
        (Some(x), Some(y), Some(z)) => Some(DynValue::Vector3([x, y, z])),
        _ => None,
    };
    vec![vector]
}

fn distance(inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>> {
    let distance = vector3_at(inputs, 0).zip(vector3_at(inputs, 1)).map(|(a, b)| {
        let squared: f64 = a.iter().zip(b.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
        squared.sqrt()
    });
    vec![distance.map(DynValue::Float)]
}

fn greater_than(inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>> {
    let result = float_at(inputs, 0).zip(float_at(inputs, 1)).map(|(a, b)| a > b);
    vec![result.map(DynValue::Bool)]
}

fn not(inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>> {
    let result = match inputs.first() {
        Some(Some(DynValue::Bool(v))) => Some(DynValue::Bool(!v)),
        _ => None,
    };
    vec![result]
}

fn select(inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>> {
    let picked = match inputs.first() {
        Some(Some(DynValue::Bool(true))) => inputs.get(1),
        Some(Some(DynValue::Bool(false))) => inputs.get(2),
        _ => None,
    };
    vec![picked.cloned().flatten()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::migrate_fields;
    use serde_json::json;

    #[test]
    fn test_registry_has_every_category() {
        let registry = create_gameplay_registry();
        for category in [
            NodeCategory::Action,
            NodeCategory::Condition,
            NodeCategory::Variable,
            NodeCategory::Math,
            NodeCategory::Logic,
            NodeCategory::Utility,
        ] {
            assert!(registry.types_in_category(category).next().is_some(), "{category:?}");
        }
        assert!(registry.get("double").unwrap().is_calculator());
        assert!(!registry.get("set_health").unwrap().is_calculator());
    }

    #[test]
    fn test_scene_types() {
        let types = create_type_registry();
        assert!(types.derives_from(&scene::TRANSFORM.into(), &scene::COMPONENT.into()));
        assert!(types.derives_from(&scene::GAME_OBJECT.into(), &scene::DAMAGEABLE.into()));
        assert!(!types.is_assignable(&scene::GAME_OBJECT.into(), &scene::TRANSFORM.into()));
    }

    #[test]
    fn test_speed_migration() {
        let registry = create_gameplay_registry();
        let def = registry.get("move_towards").unwrap();
        assert_eq!(def.current_version(), 1);

        let mut fields = FieldMap::new();
        fields.insert("OldSpeed".into(), json!(3.5));
        assert_eq!(migrate_fields(def, 0, &mut fields).unwrap(), 1);

        let speed: Parameter = serde_json::from_value(fields["Speed"].clone()).unwrap();
        assert_eq!(speed, Parameter::Constant(DynValue::Float(3.5)));
        assert!(!fields.contains_key("OldSpeed"));
    }

    #[test]
    fn test_speed_migration_rejects_non_numbers() {
        let mut fields = FieldMap::new();
        fields.insert("OldSpeed".into(), json!("fast"));
        let err = speed_to_parameter(&mut fields).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidField { ref field, .. } if field == "OldSpeed"));
    }

    #[test]
    fn test_calculations() {
        assert_eq!(double(&[Some(DynValue::Int(5))]), vec![Some(DynValue::Int(10))]);
        assert_eq!(double(&[Some(DynValue::Int(i64::MAX))]), vec![None]);
        assert_eq!(
            add(&[Some(DynValue::Float(1.0)), Some(DynValue::Int(2))]),
            vec![Some(DynValue::Float(3.0))]
        );
        assert_eq!(
            distance(&[
                Some(DynValue::Vector3([0.0, 0.0, 0.0])),
                Some(DynValue::Vector3([3.0, 4.0, 0.0]))
            ]),
            vec![Some(DynValue::Float(5.0))]
        );
        assert_eq!(
            select(&[Some(DynValue::Bool(false)), Some(DynValue::Int(1)), Some(DynValue::Int(2))]),
            vec![Some(DynValue::Int(2))]
        );
        assert_eq!(not(&[None]), vec![None]);
    }
}
