//! Decodes a transport [`Payload`] into a [`Node`] plus the list of inlined
//! child payloads that carry full data and must be recursively registered
//! (spec §4.7 step 4, §6 "Payload shape").

use crate::error::{Result, SomError};
use crate::model::{BinaryRef, ItemState, Node, Property, PropertyType, Value};
use crate::transport::{Payload, PayloadValue, NODE_ITERATOR_SIZE_KEY};

/// A reserved single-key shape denoting "this child exists but was not
/// fetched with its data, only its identifier" — not full data, and so not
/// eagerly registered by [`decode`].
const IDENTIFIER_STUB_KEY: &str = ":identifier";

fn type_tag_from_str(tag: &str) -> Option<PropertyType> {
    Some(match tag {
        "String" => PropertyType::String,
        "Name" => PropertyType::Name,
        "Path" => PropertyType::Path,
        "Uri" => PropertyType::Uri,
        "Reference" => PropertyType::Reference,
        "WeakReference" => PropertyType::WeakReference,
        "Binary" => PropertyType::Binary,
        "Date" => PropertyType::Date,
        "Long" => PropertyType::Long,
        "Double" => PropertyType::Double,
        "Decimal" => PropertyType::Decimal,
        "Boolean" => PropertyType::Boolean,
        _ => return None,
    })
}

fn infer_type(json: &serde_json::Value) -> PropertyType {
    match json {
        serde_json::Value::Bool(_) => PropertyType::Boolean,
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => PropertyType::Long,
        serde_json::Value::Number(_) => PropertyType::Double,
        _ => PropertyType::String,
    }
}

fn scalar_to_value(pt: PropertyType, json: &serde_json::Value, prop_name: &str) -> Result<Value> {
    let fmt_err = || {
        SomError::ValueFormat(format!(
            "property {prop_name}: value does not match declared type"
        ))
    };
    Ok(match pt {
        PropertyType::String => Value::String(json.as_str().ok_or_else(fmt_err)?.to_string()),
        PropertyType::Name => Value::Name(json.as_str().ok_or_else(fmt_err)?.to_string()),
        PropertyType::Path => Value::Path(json.as_str().ok_or_else(fmt_err)?.to_string()),
        PropertyType::Uri => Value::Uri(json.as_str().ok_or_else(fmt_err)?.to_string()),
        PropertyType::Reference => Value::Reference(json.as_str().ok_or_else(fmt_err)?.to_string()),
        PropertyType::WeakReference => {
            Value::WeakReference(json.as_str().ok_or_else(fmt_err)?.to_string())
        }
        PropertyType::Binary => Value::Binary(BinaryRef {
            size: json.as_u64(),
        }),
        PropertyType::Date => Value::Date(json.as_str().ok_or_else(fmt_err)?.to_string()),
        PropertyType::Long => Value::Long(json.as_i64().ok_or_else(fmt_err)?),
        PropertyType::Double => Value::Double(json.as_f64().ok_or_else(fmt_err)?),
        PropertyType::Decimal => Value::Decimal(json.as_str().ok_or_else(fmt_err)?.to_string()),
        PropertyType::Boolean => Value::Boolean(json.as_bool().ok_or_else(fmt_err)?),
    })
}

fn build_property(name: &str, pt: PropertyType, json: &serde_json::Value) -> Result<Property> {
    let mut property = if let Some(arr) = json.as_array() {
        let mut values = Vec::with_capacity(arr.len());
        for item in arr {
            values.push(scalar_to_value(pt, item, name)?);
        }
        Property::new_multi(name, pt, values)
    } else {
        Property::new_single(name, scalar_to_value(pt, json, name)?)
    };
    property.state = ItemState::Clean;
    Ok(property)
}

/// `true` if `child_payload` is the identifier-only stub shape, i.e. not
/// full data within the meaning of spec §4.7 step 4.
fn is_identifier_stub(child_payload: &Payload) -> bool {
    child_payload.len() == 1 && child_payload.contains_key(IDENTIFIER_STUB_KEY)
}

/// Decodes `payload` (the transport's representation of the node at
/// `path`) into a `Clean` [`Node`], plus the `(name, payload)` pairs of any
/// inlined children that carry full data and so must themselves be
/// recursively registered by the caller (spec §4.7 step 4).
pub fn decode(path: &str, payload: &Payload) -> Result<(Node, Vec<(String, Payload)>)> {
    let mut node = Node::new_clean(path, "nt:unstructured");
    let mut type_tags = rustc_hash::FxHashMap::default();
    for (key, value) in payload {
        if let Some(prop_name) = key.strip_prefix(':') {
            if let PayloadValue::Scalar(serde_json::Value::String(tag)) = value {
                if let Some(pt) = type_tag_from_str(tag) {
                    type_tags.insert(prop_name.to_string(), pt);
                }
            }
        }
    }

    let mut pending_children = Vec::new();
    for (key, value) in payload {
        if key == NODE_ITERATOR_SIZE_KEY || key.starts_with(':') {
            continue;
        }
        match value {
            PayloadValue::Child(child_payload) => {
                node.add_child_name(key.clone());
                if !is_identifier_stub(child_payload) {
                    pending_children.push((key.clone(), (**child_payload).clone()));
                }
            }
            PayloadValue::Scalar(json) => match key.as_str() {
                "jcr:primaryType" => {
                    if let Some(s) = json.as_str() {
                        node.primary_type = s.to_string();
                    }
                }
                "jcr:mixinTypes" => {
                    if let Some(arr) = json.as_array() {
                        node.mixin_types =
                            arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
                    }
                }
                _ => {
                    let pt = type_tags
                        .get(key)
                        .copied()
                        .unwrap_or_else(|| infer_type(json));
                    let property = build_property(key, pt, json)?;
                    if key == "jcr:uuid" {
                        if let Some(Value::String(id)) = property.value() {
                            node.identifier = Some(id.clone());
                        }
                    }
                    node.properties.insert(key.clone(), property);
                }
            },
        }
    }
    Ok((node, pending_children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scalar(v: serde_json::Value) -> PayloadValue {
        PayloadValue::Scalar(v)
    }

    #[test]
    fn decodes_primary_type_and_typed_properties() {
        let mut payload: Payload = Payload::new();
        payload.insert("jcr:primaryType".into(), scalar(json!("nt:unstructured")));
        payload.insert("count".into(), scalar(json!(3)));
        payload.insert(":count".into(), scalar(json!("Long")));
        payload.insert("::NodeIteratorSize".into(), scalar(json!(1)));

        let (node, children) = decode("/a", &payload).unwrap();
        assert_eq!(node.primary_type, "nt:unstructured");
        assert!(children.is_empty());
        assert_eq!(node.properties.get("count").unwrap().value(), Some(&Value::Long(3)));
    }

    #[test]
    fn full_data_child_is_queued_identifier_stub_is_not() {
        let mut full_child: Payload = Payload::new();
        full_child.insert("jcr:primaryType".into(), scalar(json!("nt:unstructured")));
        full_child.insert("x".into(), scalar(json!("y")));

        let mut stub_child: Payload = Payload::new();
        stub_child.insert(IDENTIFIER_STUB_KEY.into(), scalar(json!("id-1")));

        let mut payload: Payload = Payload::new();
        payload.insert("jcr:primaryType".into(), scalar(json!("nt:unstructured")));
        payload.insert("full".into(), PayloadValue::Child(Box::new(full_child)));
        payload.insert("stub".into(), PayloadValue::Child(Box::new(stub_child)));

        let (node, children) = decode("/a", &payload).unwrap();
        assert!(node.children.contains(&"full".to_string()));
        assert!(node.children.contains(&"stub".to_string()));
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, "full");
    }
}
