//! [`NodeProcessor`]: given a node and its declared types, validates
//! properties and emits autocreation operations (spec §4.8).

use std::collections::{HashSet, VecDeque};

use regex::Regex;
use std::sync::OnceLock;

use crate::config::SessionConfig;
use crate::error::{Result, SomError};
use crate::model::{ItemState, Node, Property, Value};
use crate::node_type::{NodeTypeDef, NodeTypeRegistry};
use crate::path;

fn uri_pattern() -> &'static Regex {
    static URI_RE: OnceLock<Regex> = OnceLock::new();
    URI_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^[a-z][a-z0-9*\-.]*://([^@/]+@)?(\[[0-9A-Fa-f:]+\]|[^/:@]+)(:[0-9]+)?(/[^?#]*)?(\?[^#]*)?(#.*)?$",
        )
        .expect("static URI pattern is valid")
    })
}

/// `true` iff every code point in `s` is in the XML 1.0 allow-class (spec
/// §6): U+0009, U+000A, U+000D, U+0020–U+D7FF, U+E000–U+FFFD, U+10000–U+10FFFF.
fn is_xml_allowed(s: &str) -> bool {
    s.chars().all(|c| {
        let cp = c as u32;
        matches!(cp, 0x9 | 0xA | 0xD)
            || (0x20..=0xD7FF).contains(&cp)
            || (0xE000..=0xFFFD).contains(&cp)
            || (0x10000..=0x10FFFF).contains(&cp)
    })
}

/// The additional work a single node-processing pass produces: freshly
/// autocreated child nodes, keyed by their full path, each itself still
/// needing its own processing pass (spec §4.8 step 1 says nothing about
/// recursion explicitly, but an autocreated child is a node like any
/// other, so the caller recurses `process` over each one it appends).
pub struct ProcessOutcome {
    /// Autocreated children, in declaration order, as (path, node) pairs.
    pub added_children: Vec<(String, Node)>,
}

/// Validates and autocreates properties/children on `node` per its
/// declared types (spec §4.8).
pub struct NodeProcessor<'a> {
    registry: &'a dyn NodeTypeRegistry,
}

impl<'a> NodeProcessor<'a> {
    /// Builds a processor backed by `registry`.
    pub fn new(registry: &'a dyn NodeTypeRegistry) -> Self {
        Self { registry }
    }

    /// Collects every applicable [`NodeTypeDef`]: primary type first, then
    /// mixins, then each type's declared supertypes transitively (spec
    /// §4.8 preamble). Unknown type names are silently skipped — the CND
    /// registry itself is out of scope and is trusted to reject unknown
    /// types at assignment time.
    fn applicable_types(&self, node: &Node) -> Vec<&'a NodeTypeDef> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<String> = node
            .declared_type_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut result = Vec::new();
        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(def) = self.registry.get(&name) {
                for st in &def.supertypes {
                    queue.push_back(st.clone());
                }
                result.push(def);
            }
        }
        result
    }

    /// Runs the full processing pass on `node`: child/property
    /// autocreation and validation (spec §4.8 steps 1-3). Returns the
    /// freshly autocreated children the caller must turn into `AddNode`
    /// operations (and itself recursively process).
    pub fn process(&self, node: &mut Node, config: &SessionConfig) -> Result<ProcessOutcome> {
        let types = self.applicable_types(node);
        let added_children = self.process_children(node, &types)?;
        self.process_properties(node, &types, config)?;
        self.validate_properties(node, config)?;
        Ok(ProcessOutcome { added_children })
    }

    fn process_children(
        &self,
        node: &mut Node,
        types: &[&'a NodeTypeDef],
    ) -> Result<Vec<(String, Node)>> {
        let mut seen = HashSet::new();
        let mut added = Vec::new();
        for def in types {
            for cdef in &def.child_node_definitions {
                if !seen.insert(cdef.name.clone()) {
                    continue;
                }
                if node.children.iter().any(|c| c == &cdef.name) {
                    continue;
                }
                if cdef.mandatory && !cdef.auto_created {
                    return Err(SomError::ConstraintViolation(format!(
                        "mandatory child node missing: {}",
                        cdef.name
                    )));
                }
                if cdef.auto_created {
                    let primary_type = cdef
                        .default_primary_type
                        .clone()
                        .or_else(|| cdef.required_primary_types.first().cloned())
                        .ok_or_else(|| {
                            SomError::ConstraintViolation(format!(
                                "autocreated child node {} has no default primary type",
                                cdef.name
                            ))
                        })?;
                    let child_path = path::child_path(&node.path, &cdef.name);
                    let child = Node::new_added(child_path.clone(), primary_type);
                    node.add_child_name(cdef.name.clone());
                    added.push((child_path, child));
                }
            }
        }
        Ok(added)
    }

    fn process_properties(
        &self,
        node: &mut Node,
        types: &[&'a NodeTypeDef],
        config: &SessionConfig,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for def in types {
            for pdef in &def.property_definitions {
                if !seen.insert(pdef.name.clone()) {
                    continue;
                }
                match node.properties.get(&pdef.name) {
                    Some(existing) => {
                        if pdef.auto_created
                            && config.auto_last_modified
                            && matches!(existing.state, ItemState::Clean)
                            && matches!(pdef.name.as_str(), "jcr:lastModified" | "jcr:lastModifiedBy")
                        {
                            let value = Self::well_known_value(&pdef.name, config)
                                .expect("jcr:lastModified(By) is well-known");
                            node.set_property(Property::new_single(pdef.name.clone(), value));
                        }
                    }
                    None => {
                        if pdef.mandatory && !pdef.auto_created {
                            return Err(SomError::ConstraintViolation(format!(
                                "mandatory property missing: {}",
                                pdef.name
                            )));
                        }
                        if pdef.auto_created {
                            let property = self.autocreate_property(pdef, config)?;
                            node.properties.insert(pdef.name.clone(), property);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn well_known_value(name: &str, config: &SessionConfig) -> Option<Value> {
        match name {
            "jcr:uuid" => Some(Value::String(uuid::Uuid::new_v4().to_string())),
            "jcr:createdBy" | "jcr:lastModifiedBy" => Some(Value::String(config.user_id.clone())),
            "jcr:created" | "jcr:lastModified" => Some(Value::Date(now_rfc3339())),
            "jcr:etag" => Some(Value::String("W/\"0\"".to_string())),
            _ => None,
        }
    }

    fn autocreate_property(
        &self,
        pdef: &crate::node_type::PropertyDefinition,
        config: &SessionConfig,
    ) -> Result<Property> {
        if let Some(value) = Self::well_known_value(&pdef.name, config) {
            return Ok(Property::new_single(pdef.name.clone(), value));
        }
        if pdef.default_values.is_empty() {
            return Err(SomError::ConstraintViolation(format!(
                "autocreated property {} has no default value",
                pdef.name
            )));
        }
        if pdef.multi_valued {
            Ok(Property::new_multi(
                pdef.name.clone(),
                pdef.property_type,
                pdef.default_values.clone(),
            ))
        } else {
            Ok(Property::new_single(
                pdef.name.clone(),
                pdef.default_values[0].clone(),
            ))
        }
    }

    fn validate_properties(&self, node: &Node, config: &SessionConfig) -> Result<()> {
        for property in node.properties.values() {
            for value in &property.values {
                Self::validate_value(&property.name, value, config)?;
            }
        }
        Ok(())
    }

    /// Validates a single value against its own declared type's syntax
    /// (spec §4.8 step 3). Exposed to [`crate::session::SessionObjectManager::set_property`]
    /// so an explicit `setProperty` call is checked the same way a value
    /// introduced by autocreation is.
    pub(crate) fn validate_value(name: &str, value: &Value, config: &SessionConfig) -> Result<()> {
        match value {
            Value::Name(n) => config.check_namespace(n),
            Value::Path(p) => {
                if path::is_absolute(p) {
                    path::validate_absolute(p)
                } else {
                    path::resolve("/", p).map(|_| ())
                }
            }
            Value::Uri(u) => {
                if uri_pattern().is_match(u) {
                    Ok(())
                } else {
                    Err(SomError::ValueFormat(format!(
                        "property {name}: not a valid URI: {u}"
                    )))
                }
            }
            Value::String(s) | Value::Decimal(s) => {
                if is_xml_allowed(s) {
                    Ok(())
                } else {
                    Err(SomError::ValueFormat(format!(
                        "property {name}: contains characters outside the XML 1.0 allow-class"
                    )))
                }
            }
            _ => Ok(()),
        }
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyType;
    use crate::node_type::{ChildNodeDefinition, InMemoryNodeTypeRegistry, PropertyDefinition};

    fn registry_with_referenceable() -> InMemoryNodeTypeRegistry {
        let mut reg = InMemoryNodeTypeRegistry::new();
        reg.define(NodeTypeDef {
            name: "mix:referenceable".to_string(),
            supertypes: vec![],
            property_definitions: vec![PropertyDefinition {
                name: "jcr:uuid".to_string(),
                property_type: PropertyType::String,
                multi_valued: false,
                mandatory: true,
                auto_created: true,
                default_values: vec![],
            }],
            child_node_definitions: vec![],
        });
        reg
    }

    #[test]
    fn autocreates_uuid_matching_v4_pattern() {
        let registry = registry_with_referenceable();
        let mut node = Node::new_added("/a", "nt:unstructured");
        node.mixin_types.push("mix:referenceable".to_string());
        let processor = NodeProcessor::new(&registry);
        let config = SessionConfig::default();
        processor.process(&mut node, &config).unwrap();

        let uuid = match node.properties.get("jcr:uuid").unwrap().value().unwrap() {
            Value::String(s) => s.clone(),
            _ => panic!("expected string"),
        };
        let re = Regex::new(
            "^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
        )
        .unwrap();
        assert!(re.is_match(&uuid), "{uuid} does not match uuid v4 pattern");
    }

    #[test]
    fn missing_mandatory_non_autocreated_property_fails() {
        let mut reg = InMemoryNodeTypeRegistry::new();
        reg.define(NodeTypeDef {
            name: "test:required".to_string(),
            supertypes: vec![],
            property_definitions: vec![PropertyDefinition {
                name: "test:value".to_string(),
                property_type: PropertyType::String,
                multi_valued: false,
                mandatory: true,
                auto_created: false,
                default_values: vec![],
            }],
            child_node_definitions: vec![],
        });
        let mut node = Node::new_added("/a", "test:required");
        let processor = NodeProcessor::new(&reg);
        let err = processor.process(&mut node, &SessionConfig::default()).unwrap_err();
        assert!(matches!(err, SomError::ConstraintViolation(_)));
    }

    #[test]
    fn autocreates_mandatory_child_with_default_primary_type() {
        let mut reg = InMemoryNodeTypeRegistry::new();
        reg.define(NodeTypeDef {
            name: "test:withChild".to_string(),
            supertypes: vec![],
            property_definitions: vec![],
            child_node_definitions: vec![ChildNodeDefinition {
                name: "jcr:content".to_string(),
                required_primary_types: vec!["nt:unstructured".to_string()],
                default_primary_type: None,
                mandatory: true,
                auto_created: true,
            }],
        });
        let mut node = Node::new_added("/a", "test:withChild");
        let processor = NodeProcessor::new(&reg);
        let outcome = processor.process(&mut node, &SessionConfig::default()).unwrap();
        assert_eq!(outcome.added_children.len(), 1);
        assert_eq!(outcome.added_children[0].0, "/a/jcr:content");
        assert!(node.children.contains(&"jcr:content".to_string()));
    }

    #[test]
    fn uri_pattern_rejects_missing_scheme_separator() {
        assert!(uri_pattern().is_match("https://example.com/a/b?x=1"));
        assert!(!uri_pattern().is_match("not a uri"));
    }

    #[test]
    fn xml_allow_class_rejects_control_characters() {
        assert!(is_xml_allowed("hello world"));
        assert!(!is_xml_allowed("bad\u{0001}char"));
    }
}
