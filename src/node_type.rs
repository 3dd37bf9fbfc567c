//! The node-type registry seam (spec §1 puts CND parsing itself out of
//! scope; [`NodeProcessor`](crate::processor::NodeProcessor) only needs to
//! ask "what are this node's declared types, transitively, with their
//! child/property definitions" — this module defines that seam and a
//! simple in-memory implementation for tests, the same way the Transport
//! itself is specified only as a trait and given a test fake).

use rustc_hash::FxHashMap;

use crate::model::{PropertyType, Value};

/// A declared property definition on a node type (spec §4.8 step 2).
#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    /// Property name.
    pub name: String,
    /// Declared type.
    pub property_type: PropertyType,
    /// Whether this property holds a value list.
    pub multi_valued: bool,
    /// Fails processing with `ConstraintViolation` if absent and not
    /// autocreated.
    pub mandatory: bool,
    /// Materialised by [`crate::processor::NodeProcessor`] if absent.
    pub auto_created: bool,
    /// Used by autocreation when the property name is not one of the
    /// well-known special-cased names.
    pub default_values: Vec<Value>,
}

/// A declared child-node definition on a node type (spec §4.8 step 1).
#[derive(Debug, Clone)]
pub struct ChildNodeDefinition {
    /// Child name.
    pub name: String,
    /// Primary types the child is allowed to declare.
    pub required_primary_types: Vec<String>,
    /// Primary type assigned to an autocreated child; falls back to the
    /// first of `required_primary_types` if unset (spec §4.8 step 1).
    pub default_primary_type: Option<String>,
    /// Fails processing with `ConstraintViolation` if absent and not
    /// autocreated.
    pub mandatory: bool,
    /// Materialised by [`crate::processor::NodeProcessor`] if absent.
    pub auto_created: bool,
}

/// A node type's own (non-transitive) declarations.
#[derive(Debug, Clone, Default)]
pub struct NodeTypeDef {
    /// This type's name.
    pub name: String,
    /// Declared supertype names, walked transitively by the processor.
    pub supertypes: Vec<String>,
    /// This type's own declared property definitions.
    pub property_definitions: Vec<PropertyDefinition>,
    /// This type's own declared child-node definitions.
    pub child_node_definitions: Vec<ChildNodeDefinition>,
}

/// The seam the out-of-scope CND parser implements: resolve a type name to
/// its declaration.
pub trait NodeTypeRegistry {
    /// Looks up a node type's own declarations by name.
    fn get(&self, name: &str) -> Option<&NodeTypeDef>;
}

/// A minimal in-memory registry, sufficient for tests.
#[derive(Debug, Default)]
pub struct InMemoryNodeTypeRegistry {
    types: FxHashMap<String, NodeTypeDef>,
}

impl InMemoryNodeTypeRegistry {
    /// Builds an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a node type definition.
    pub fn define(&mut self, def: NodeTypeDef) -> &mut Self {
        self.types.insert(def.name.clone(), def);
        self
    }
}

impl NodeTypeRegistry for InMemoryNodeTypeRegistry {
    fn get(&self, name: &str) -> Option<&NodeTypeDef> {
        self.types.get(name)
    }
}
