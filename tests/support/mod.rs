//! A minimal in-memory [`Transport`] fake, in the teacher's own
//! integration-test style: a plain struct implementing the trait, no
//! mocking framework, the same way the teacher's own integration tests spin
//! up a real `GraphDB` over a temp file rather than mocking the pager.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use som::{
    BinaryStream, Node, Operation, OperationData, Payload, PayloadValue, Property, ReorderOp,
    Result, SomError, Transport, Value, Writing,
};

/// One dispatched write batch, as recorded for P5 (batching) assertions.
pub type BatchLog = Rc<RefCell<Vec<(&'static str, usize)>>>;

/// An in-memory fake backend. Node payloads are stored flat, keyed by
/// absolute path; no workspace or version-history concepts are modeled,
/// since nothing under test exercises them.
pub struct FakeTransport {
    nodes: BTreeMap<String, Payload>,
    pub batch_log: BatchLog,
    fail_on: Option<&'static str>,
    pub rollback_called: Rc<RefCell<bool>>,
}

impl FakeTransport {
    pub fn new(batch_log: BatchLog) -> Self {
        Self {
            nodes: BTreeMap::new(),
            batch_log,
            fail_on: None,
            rollback_called: Rc::new(RefCell::new(false)),
        }
    }

    /// Seeds a node payload directly, as if the backend already held it.
    pub fn seed(&mut self, path: &str, payload: Payload) {
        self.nodes.insert(path.to_string(), payload);
    }

    /// Makes the next call to the named `Writing` method (e.g.
    /// `"store_nodes"`) fail once, so tests can exercise `save()`'s
    /// rollback-on-error path without a real backend.
    pub fn fail_on_next_write(&mut self, call: &'static str) {
        self.fail_on = Some(call);
    }

    fn maybe_fail(&mut self, call: &'static str) -> Result<()> {
        if self.fail_on == Some(call) {
            self.fail_on = None;
            return Err(SomError::ItemNotFound(format!("{call}: injected failure")));
        }
        Ok(())
    }
}

/// Builds a minimal payload for a node of the given primary type, suitable
/// for [`FakeTransport::seed`].
pub fn seed_payload(primary_type: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert(
        "jcr:primaryType".to_string(),
        PayloadValue::Scalar(serde_json::json!(primary_type)),
    );
    payload
}

fn node_to_payload(node: &Node) -> Payload {
    let mut payload = Payload::new();
    payload.insert(
        "jcr:primaryType".to_string(),
        PayloadValue::Scalar(serde_json::json!(node.primary_type)),
    );
    if !node.mixin_types.is_empty() {
        payload.insert(
            "jcr:mixinTypes".to_string(),
            PayloadValue::Scalar(serde_json::json!(node.mixin_types)),
        );
    }
    for (name, property) in &node.properties {
        payload.insert(name.clone(), PayloadValue::Scalar(property_to_json(property)));
    }
    payload
}

fn property_to_json(property: &Property) -> serde_json::Value {
    let scalar = |value: &Value| match value {
        Value::String(s) | Value::Name(s) | Value::Path(s) | Value::Uri(s) | Value::Reference(s)
        | Value::WeakReference(s) | Value::Date(s) | Value::Decimal(s) => serde_json::json!(s),
        Value::Long(n) => serde_json::json!(n),
        Value::Double(n) => serde_json::json!(n),
        Value::Boolean(b) => serde_json::json!(b),
        Value::Binary(b) => serde_json::json!(b.size),
    };
    if property.multi_valued {
        serde_json::Value::Array(property.values.iter().map(scalar).collect())
    } else {
        property.values.first().map(scalar).unwrap_or(serde_json::Value::Null)
    }
}

impl Transport for FakeTransport {
    fn get_node(&self, path: &str) -> Result<Payload> {
        self.nodes
            .get(path)
            .cloned()
            .ok_or_else(|| SomError::ItemNotFound(path.to_string()))
    }

    fn get_nodes(&self, paths: &[String]) -> Result<BTreeMap<String, Payload>> {
        Ok(paths
            .iter()
            .filter_map(|p| self.nodes.get(p).map(|payload| (p.clone(), payload.clone())))
            .collect())
    }

    fn get_node_by_identifier(&self, id: &str) -> Result<Payload> {
        for (path, payload) in &self.nodes {
            if let Some(PayloadValue::Scalar(serde_json::Value::String(existing))) =
                payload.get("jcr:uuid")
            {
                if existing == id {
                    let mut out = payload.clone();
                    out.insert(
                        ":path".to_string(),
                        PayloadValue::Scalar(serde_json::json!(path)),
                    );
                    return Ok(out);
                }
            }
        }
        Err(SomError::ItemNotFound(id.to_string()))
    }

    fn get_nodes_by_identifier(&self, ids: &[String]) -> Result<BTreeMap<String, Payload>> {
        let mut out = BTreeMap::new();
        for id in ids {
            if let Ok(payload) = self.get_node_by_identifier(id) {
                out.insert(id.clone(), payload);
            }
        }
        Ok(out)
    }

    fn get_binary_stream(&self, _path: &str) -> Result<Box<dyn BinaryStream>> {
        Err(SomError::UnsupportedOperation("get_binary_stream"))
    }

    fn get_references(&self, _path: &str, _name: Option<&str>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn get_weak_references(&self, _path: &str, _name: Option<&str>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn get_properties_by_path(&self, paths: &[String]) -> Result<Vec<(String, Payload)>> {
        Ok(paths
            .iter()
            .filter_map(|p| self.nodes.get(p).map(|payload| (p.clone(), payload.clone())))
            .collect())
    }

    fn supports_writing(&self) -> bool {
        true
    }

    fn as_writing(&mut self) -> Option<&mut dyn Writing> {
        Some(self)
    }
}

impl Writing for FakeTransport {
    fn store_nodes(&mut self, ops: &[&Operation]) -> Result<()> {
        self.maybe_fail("store_nodes")?;
        self.batch_log.borrow_mut().push(("store_nodes", ops.len()));
        for op in ops {
            if let OperationData::AddNode { path, node } = &op.data {
                self.nodes.insert(path.clone(), node_to_payload(node));
            }
        }
        Ok(())
    }

    fn move_nodes(&mut self, ops: &[&Operation]) -> Result<()> {
        self.maybe_fail("move_nodes")?;
        self.batch_log.borrow_mut().push(("move_nodes", ops.len()));
        for op in ops {
            if let OperationData::MoveNode { src_path, dst_path } = &op.data {
                if let Some(payload) = self.nodes.remove(src_path) {
                    self.nodes.insert(dst_path.clone(), payload);
                }
            }
        }
        Ok(())
    }

    fn delete_nodes(&mut self, ops: &[&Operation]) -> Result<()> {
        self.maybe_fail("delete_nodes")?;
        self.batch_log.borrow_mut().push(("delete_nodes", ops.len()));
        for op in ops {
            if let OperationData::RemoveNode { path, .. } = &op.data {
                self.nodes.remove(path);
            }
        }
        Ok(())
    }

    fn delete_properties(&mut self, ops: &[&Operation]) -> Result<()> {
        self.maybe_fail("delete_properties")?;
        self.batch_log
            .borrow_mut()
            .push(("delete_properties", ops.len()));
        Ok(())
    }

    fn update_properties(&mut self, node: &Node) -> Result<()> {
        self.maybe_fail("update_properties")?;
        self.nodes.insert(node.path.clone(), node_to_payload(node));
        Ok(())
    }

    fn reorder_children(&mut self, _node: &Node, _diff: &[ReorderOp]) -> Result<()> {
        self.maybe_fail("reorder_children")?;
        Ok(())
    }

    fn copy_node(&mut self, _src: &str, _dst: &str, _src_workspace: Option<&str>) -> Result<()> {
        Err(SomError::UnsupportedOperation("copy_node"))
    }

    fn clone_from(
        &mut self,
        _src_workspace: &str,
        _src: &str,
        _dst: &str,
        _remove_existing: bool,
    ) -> Result<()> {
        Err(SomError::UnsupportedOperation("clone_from"))
    }

    fn move_node_immediately(&mut self, _src: &str, _dst: &str) -> Result<()> {
        Err(SomError::UnsupportedOperation("move_node_immediately"))
    }

    fn delete_node_immediately(&mut self, _path: &str) -> Result<()> {
        Err(SomError::UnsupportedOperation("delete_node_immediately"))
    }

    fn delete_property_immediately(&mut self, _path: &str) -> Result<()> {
        Err(SomError::UnsupportedOperation("delete_property_immediately"))
    }

    fn prepare_save(&mut self) -> Result<()> {
        self.maybe_fail("prepare_save")
    }

    fn finish_save(&mut self) -> Result<()> {
        self.maybe_fail("finish_save")
    }

    fn rollback_save(&mut self) -> Result<()> {
        *self.rollback_called.borrow_mut() = true;
        Ok(())
    }

    fn assert_valid_name(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

