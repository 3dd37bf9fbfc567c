//! [`SessionObjectManager`]: the facade tying the identity index, operation
//! log and node processor together behind the read/write/save/refresh
//! protocol (spec §4 in full).

use std::collections::BTreeMap;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::config::SessionConfig;
use crate::error::{Result, SomError};
use crate::identity::{IdentityIndex, ItemClass};
use crate::model::{ItemState, Node, Property};
use crate::node_type::NodeTypeRegistry;
use crate::operation::{Operation, OperationData, OperationKind};
use crate::oplog::OperationLog;
use crate::path;
use crate::payload;
use crate::processor::NodeProcessor;
use crate::transport::{Payload, Transport};

/// A snapshot of which optional Transport capabilities are available,
/// probed once at construction so public methods do a cheap local check
/// instead of re-probing the transport on every call (SPEC_FULL.md §11
/// "Capability-probe ergonomics").
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub writing: bool,
    pub versioning: bool,
    pub transactions: bool,
    pub permission: bool,
    pub node_type_management: bool,
    pub node_type_cnd_management: bool,
    pub node_type_filter: bool,
    pub observation: bool,
    pub workspace_management: bool,
}

impl Capabilities {
    fn probe(transport: &dyn Transport) -> Self {
        Self {
            writing: transport.supports_writing(),
            versioning: transport.supports_versioning(),
            transactions: transport.supports_transactions(),
            permission: transport.supports_permission(),
            node_type_management: transport.supports_node_type_management(),
            node_type_cnd_management: transport.supports_node_type_cnd_management(),
            node_type_filter: transport.supports_node_type_filter(),
            observation: transport.supports_observation(),
            workspace_management: transport.supports_workspace_management(),
        }
    }
}

/// Client-side unit-of-work and caching layer sitting between a
/// repository's public API and its [`Transport`] (spec §1, §3).
pub struct SessionObjectManager {
    transport: Box<dyn Transport>,
    config: SessionConfig,
    registry: Box<dyn NodeTypeRegistry>,
    identity: IdentityIndex,
    oplog: OperationLog,
    capabilities: Capabilities,
}

impl SessionObjectManager {
    /// Builds a session over `transport`, probing its capability set once.
    pub fn new(
        transport: Box<dyn Transport>,
        config: SessionConfig,
        registry: Box<dyn NodeTypeRegistry>,
    ) -> Self {
        let capabilities = Capabilities::probe(transport.as_ref());
        Self {
            transport,
            config,
            registry,
            identity: IdentityIndex::new(),
            oplog: OperationLog::new(),
            capabilities,
        }
    }

    /// The capability set probed from this session's transport.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// This session's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ---- §4.7 Node read protocol ----------------------------------------

    /// `getNodeByPath` (spec §4.7).
    pub fn get_node_by_path(&mut self, path: &str, class: ItemClass) -> Result<Node> {
        path::validate_absolute(path)?;
        if let Some(node) = self.identity.get(class, path) {
            return Ok(node.clone());
        }
        let fetch_path = self.oplog.get_fetch_path(path)?;
        let payload = self.transport.get_node(&fetch_path)?;
        self.register_payload(path, class, &payload)
    }

    /// `getNodesByPath` (spec §4.7): splits into cached/to-fetch, applies a
    /// server-side type filter when the transport supports one, and
    /// preserves the caller's requested insertion order.
    pub fn get_nodes_by_path(
        &mut self,
        paths: &[String],
        class: ItemClass,
        type_filter: Option<&[String]>,
    ) -> Result<IndexMap<String, Node>> {
        let mut result: IndexMap<String, Node> = IndexMap::new();
        let mut to_fetch = Vec::new();
        for p in paths {
            match self.identity.get(class, p) {
                Some(node) if Self::matches_type_filter(node, type_filter) => {
                    result.insert(p.clone(), node.clone());
                }
                Some(_) => {}
                None => to_fetch.push(p.clone()),
            }
        }
        if !to_fetch.is_empty() {
            let mut fetch_to_original: FxHashMap<String, String> = FxHashMap::default();
            let mut fetch_paths = Vec::with_capacity(to_fetch.len());
            for p in &to_fetch {
                let fetch_path = self.oplog.get_fetch_path(p)?;
                fetch_to_original.insert(fetch_path.clone(), p.clone());
                fetch_paths.push(fetch_path);
            }

            let payloads: BTreeMap<String, Payload> =
                if self.capabilities.node_type_filter && type_filter.is_some() {
                    let names = type_filter.expect("checked Some above").to_vec();
                    match self.transport.as_node_type_filter() {
                        Some(filter) => filter.get_nodes_filtered(&fetch_paths, &names)?,
                        None => self.transport.get_nodes(&fetch_paths)?,
                    }
                } else {
                    self.transport.get_nodes(&fetch_paths)?
                };

            for (fetch_path, payload) in payloads {
                let Some(original) = fetch_to_original.get(&fetch_path) else {
                    continue;
                };
                let original = original.clone();
                let node = self.register_payload(&original, class, &payload)?;
                if Self::matches_type_filter(&node, type_filter) {
                    result.insert(original, node);
                }
            }
        }
        Ok(Self::reorder(result, paths))
    }

    /// `getNodeByIdentifier` (spec §4.7).
    pub fn get_node_by_identifier(&mut self, id: &str, class: ItemClass) -> Result<Node> {
        let bound = self
            .identity
            .lookup_identifier(id)
            .map(|(c, p)| (c, p.to_string()));
        if let Some((bound_class, path)) = bound {
            if bound_class == class {
                return self.get_node_by_path(&path, class);
            }
        }
        let payload = self.transport.get_node_by_identifier(id)?;
        let path = Self::path_from_payload(&payload)?;
        let node = self.register_payload(&path, class, &payload)?;
        self.identity.register_identifier(id, class, &path)?;
        Ok(node)
    }

    fn matches_type_filter(node: &Node, type_filter: Option<&[String]>) -> bool {
        match type_filter {
            None => true,
            Some(names) => names
                .iter()
                .any(|n| node.declared_type_names().contains(&n.as_str())),
        }
    }

    fn reorder(map: IndexMap<String, Node>, order: &[String]) -> IndexMap<String, Node> {
        let mut out = IndexMap::new();
        for p in order {
            if let Some(node) = map.get(p) {
                out.insert(p.clone(), node.clone());
            }
        }
        out
    }

    /// Reserved payload key carrying a node's own absolute path, used only
    /// by identifier-keyed transport reads, which otherwise have no way to
    /// tell the session what path to cache the result under (a gap spec.md
    /// leaves implicit; see DESIGN.md).
    fn path_from_payload(payload: &Payload) -> Result<String> {
        match payload.get(":path") {
            Some(crate::transport::PayloadValue::Scalar(serde_json::Value::String(p))) => {
                Ok(p.clone())
            }
            _ => Err(SomError::Repository(
                "transport payload for identifier lookup is missing :path".to_string(),
            )),
        }
    }

    /// Decodes `payload` into a [`Node`] at `path`, recursively registering
    /// any inlined children carrying full data, eliding any that were
    /// locally moved or deleted, and indexing the result (spec §4.7 steps
    /// 4-5).
    fn register_payload(&mut self, path: &str, class: ItemClass, payload: &Payload) -> Result<Node> {
        let (node, pending_children) = payload::decode(path, payload)?;
        for (child_name, child_payload) in pending_children {
            let child_path = crate::path::child_path(path, &child_name);
            if self.oplog.get_fetch_path(&child_path).is_ok() {
                self.register_payload(&child_path, class, &child_payload)?;
            }
        }
        self.identity.put(class, path.to_string(), node.clone());
        Ok(node)
    }

    // ---- §4.8 via NodeProcessor, §4.4 add/move/remove --------------------

    /// `addNode` (spec §4.8 drives autocreation/validation; spec §3
    /// Lifecycles (b) for the New-node allocation itself).
    pub fn add_node(&mut self, parent_path: &str, name: &str, primary_type: &str) -> Result<Node> {
        self.add_node_with_mixins(parent_path, name, primary_type, &[])
    }

    /// As [`SessionObjectManager::add_node`], additionally declaring mixin
    /// types on the new node before it is run through the
    /// [`NodeProcessor`] — needed to exercise mixin-driven autocreation
    /// such as `mix:referenceable` (spec §8 scenario 3).
    pub fn add_node_with_mixins(
        &mut self,
        parent_path: &str,
        name: &str,
        primary_type: &str,
        mixin_types: &[String],
    ) -> Result<Node> {
        path::validate_name(name)?;
        self.config.check_namespace(name)?;
        let child_path = path::child_path(parent_path, name);
        path::validate_absolute(&child_path)?;
        if self.identity.contains_live(ItemClass::Regular, &child_path) {
            return Err(SomError::ItemExists(child_path));
        }
        let parent = self.get_node_by_path(parent_path, ItemClass::Regular)?;
        if matches!(parent.state, ItemState::Deleted) {
            return Err(SomError::InvalidItemState(parent_path.to_string()));
        }

        let mut node = Node::new_added(child_path.clone(), primary_type);
        node.mixin_types = mixin_types.to_vec();
        let registered = self.register_new_node(node)?;

        if let Some(parent) = self.identity.get_mut(ItemClass::Regular, parent_path) {
            parent.add_child_name(name.to_string());
        }
        Ok(registered)
    }

    /// Runs a freshly allocated `New` node through the [`NodeProcessor`],
    /// binds a `jcr:uuid`-carrying node's identifier, appends its `AddNode`
    /// operation, indexes it, and recurses over any autocreated children
    /// (spec §4.8: "the caller recurses `process` over each one it
    /// appends").
    fn register_new_node(&mut self, mut node: Node) -> Result<Node> {
        let processor = NodeProcessor::new(self.registry.as_ref());
        let outcome = processor.process(&mut node, &self.config)?;
        if let Some(crate::model::Value::String(id)) = node
            .properties
            .get("jcr:uuid")
            .and_then(Property::value)
        {
            node.identifier = Some(id.clone());
        }

        let path = node.path.clone();
        self.oplog.append_add(path.clone(), node.clone())?;
        self.identity.put(ItemClass::Regular, path, node.clone());

        for (_, child) in outcome.added_children {
            self.register_new_node(child)?;
        }
        Ok(node)
    }

    /// `moveNode(src, dst)` (spec §4.4).
    pub fn move_node(&mut self, src: &str, dst: &str) -> Result<()> {
        path::validate_absolute(src)?;
        path::validate_absolute(dst)?;
        if src != dst && self.identity.contains_live(ItemClass::Regular, dst) {
            return Err(SomError::ItemExists(dst.to_string()));
        }
        self.get_node_by_path(src, ItemClass::Regular)?;
        if matches!(
            self.identity.get(ItemClass::Regular, src).map(|n| n.state),
            Some(ItemState::Deleted)
        ) {
            return Err(SomError::InvalidItemState(src.to_string()));
        }

        let descendants = self.identity.paths_below(ItemClass::Regular, src);
        for old_path in std::iter::once(src.to_string()).chain(descendants) {
            if let Some(mut node) = self.identity.remove(ItemClass::Regular, &old_path) {
                let new_path = path::substitute_prefix(&old_path, src, dst);
                node.path = new_path.clone();
                if !matches!(node.state, ItemState::New) {
                    node.state = ItemState::Moved;
                }
                self.identity.put(ItemClass::Regular, new_path, node);
            }
        }

        if let Some(src_parent) = path::parent(src) {
            if let Some(parent) = self.identity.get_mut(ItemClass::Regular, &src_parent) {
                if let Some(name) = path::name(src) {
                    parent.remove_child_name(name);
                }
            }
        }
        if let Some(dst_parent) = path::parent(dst) {
            if let Some(parent) = self.identity.get_mut(ItemClass::Regular, &dst_parent) {
                if let Some(name) = path::name(dst) {
                    parent.add_child_name(name.to_string());
                }
            }
        }

        self.oplog.append_move(src.to_string(), dst.to_string());
        Ok(())
    }

    /// `removeItem(path, propertyOrNull)` (spec §4.4).
    pub fn remove_item(&mut self, path: &str, property_name: Option<&str>) -> Result<()> {
        match property_name {
            Some(prop_name) => self.remove_property(path, prop_name),
            None => self.remove_node_cascade(path),
        }
    }

    /// `removeVersion` (spec §4.4: "additionally purges mirror entries from
    /// the Version-class partition of the cache"). The transport-level
    /// version removal itself goes through the optional [`Versioning`]
    /// capability and the public façade this crate sits behind (out of
    /// scope, spec §1); this method only keeps the session cache honest
    /// once that removal has happened, the same way `removeItem` only
    /// stages the Regular-class side and never calls the transport
    /// directly.
    ///
    /// [`Versioning`]: crate::transport::Versioning
    pub fn remove_version(&mut self, path: &str) -> Result<()> {
        self.remove_node_cascade(path)?;
        self.identity.remove(ItemClass::Version, path);
        for desc in self.identity.paths_below(ItemClass::Version, path) {
            self.identity.remove(ItemClass::Version, &desc);
        }
        Ok(())
    }

    fn remove_property(&mut self, node_path: &str, prop_name: &str) -> Result<()> {
        let node = self.live_node_mut(node_path)?;
        let needs_op = node.remove_property(prop_name)?;
        if needs_op {
            let property = node
                .deleted_properties
                .get(prop_name)
                .cloned()
                .expect("remove_property just retained this entry");
            let prop_path = path::child_path(node_path, prop_name);
            self.oplog.append_remove_property(prop_path, property);
        }
        Ok(())
    }

    /// Removes `path` and cascades to every cached descendant (spec §4.4:
    /// "iterate every cached path strictly below and invoke the same
    /// removal ... mark each descendant Deleted"). A node (or descendant)
    /// still in the `New` state was never sent to the transport, so its
    /// `AddNode` is skipped outright and it is purged rather than retained
    /// as a `Deleted` tombstone (spec §8 scenario 2).
    fn remove_node_cascade(&mut self, path: &str) -> Result<()> {
        let node = self
            .identity
            .get(ItemClass::Regular, path)
            .ok_or_else(|| SomError::ItemNotFound(path.to_string()))?
            .clone();
        if matches!(node.state, ItemState::Deleted) {
            return Err(SomError::InvalidItemState(path.to_string()));
        }
        let descendants = self.identity.paths_below(ItemClass::Regular, path);

        self.purge_or_tombstone(path, &node);
        for desc_path in descendants {
            if let Some(desc) = self.identity.get(ItemClass::Regular, &desc_path).cloned() {
                self.purge_or_tombstone(&desc_path, &desc);
            }
        }

        if let Some(parent_path) = path::parent(path) {
            if let Some(parent) = self.identity.get_mut(ItemClass::Regular, &parent_path) {
                if let Some(name) = path::name(path) {
                    parent.remove_child_name(name);
                }
            }
        }
        Ok(())
    }

    fn purge_or_tombstone(&mut self, path: &str, node: &Node) {
        if matches!(node.state, ItemState::New) {
            self.identity.remove(ItemClass::Regular, path);
            self.oplog.skip_add(path);
        } else {
            self.identity.delete_in_place(ItemClass::Regular, path);
            self.oplog
                .append_remove_node(path.to_string(), node.clone());
        }
    }

    /// `orderBefore` (spec §4.3).
    pub fn order_before(&mut self, parent_path: &str, src: &str, dest: Option<&str>) -> Result<()> {
        let node = self.live_node_mut(parent_path)?;
        node.order_before(src, dest)
    }

    /// `setProperty` (spec §3 "Property mirrors Node's lifecycle"; exercised
    /// by P4's undo property together with `addNode`/`moveNode`/`removeItem`).
    /// Validates `value` against its own declared type's syntax (spec §4.8
    /// step 3) the same way autocreated values are validated, then stages it
    /// as a single-valued property on the cached node.
    pub fn set_property(&mut self, node_path: &str, name: &str, value: crate::model::Value) -> Result<()> {
        self.config.check_namespace(name)?;
        NodeProcessor::validate_value(name, &value, &self.config)?;
        let node = self.live_node_mut(node_path)?;
        node.set_property(Property::new_single(name, value));
        Ok(())
    }

    /// As [`SessionObjectManager::set_property`] but for a multi-valued
    /// property.
    pub fn set_property_multi(
        &mut self,
        node_path: &str,
        name: &str,
        property_type: crate::model::PropertyType,
        values: Vec<crate::model::Value>,
    ) -> Result<()> {
        self.config.check_namespace(name)?;
        for value in &values {
            NodeProcessor::validate_value(name, value, &self.config)?;
        }
        let node = self.live_node_mut(node_path)?;
        node.set_property(Property::new_multi(name, property_type, values));
        Ok(())
    }

    /// Looks up a cached node that must be mutated, failing with
    /// [`SomError::ItemNotFound`] if it is not cached at all and with
    /// [`SomError::InvalidItemState`] if it is cached but already `Deleted`
    /// (spec §7: "InvalidItemState — operation attempted on a Deleted node").
    fn live_node_mut(&mut self, path: &str) -> Result<&mut Node> {
        let node = self
            .identity
            .get_mut(ItemClass::Regular, path)
            .ok_or_else(|| SomError::ItemNotFound(path.to_string()))?;
        if matches!(node.state, ItemState::Deleted) {
            return Err(SomError::InvalidItemState(path.to_string()));
        }
        Ok(node)
    }

    // ---- §4.6 reference lookup -------------------------------------------

    /// `getReferences` (spec §4.6).
    pub fn get_references(&mut self, path: &str, name: Option<&str>) -> Result<Vec<Property>> {
        self.lookup_references(path, name, false)
    }

    /// `getWeakReferences` (spec §4.6).
    pub fn get_weak_references(&mut self, path: &str, name: Option<&str>) -> Result<Vec<Property>> {
        self.lookup_references(path, name, true)
    }

    fn lookup_references(&mut self, path: &str, name: Option<&str>, weak: bool) -> Result<Vec<Property>> {
        let fetch_path = self.oplog.get_fetch_path(path)?;
        let property_paths = if weak {
            self.transport.get_weak_references(&fetch_path, name)?
        } else {
            self.transport.get_references(&fetch_path, name)?
        };
        let pairs = self.transport.get_properties_by_path(&property_paths)?;
        let mut result = Vec::with_capacity(pairs.len());
        for (prop_path, payload) in pairs {
            let (pseudo_node, _) = payload::decode(&prop_path, &payload)?;
            if let Some(property) = pseudo_node.properties.values().next() {
                result.push(property.clone());
            }
        }
        Ok(result)
    }

    // ---- §6 Transaction capability pass-through -------------------------

    /// Begins a transport-level transaction (spec §6 "Transaction"). Raises
    /// [`SomError::UnsupportedOperation`] if the transport lacks the
    /// capability.
    pub fn begin_transaction(&mut self) -> Result<()> {
        if !self.capabilities.transactions {
            return Err(SomError::UnsupportedOperation("begin_transaction"));
        }
        self.transport
            .as_transactions()
            .expect("transactions capability probed true")
            .begin_transaction()
    }

    /// Commits a transport-level transaction. A failed commit is surfaced as
    /// [`SomError::Rollback`] (spec §7 "Rollback — a transactional commit
    /// failed and was rolled back"), matching the transport's own rollback.
    pub fn commit_transaction(&mut self) -> Result<()> {
        if !self.capabilities.transactions {
            return Err(SomError::UnsupportedOperation("commit_transaction"));
        }
        let txn = self
            .transport
            .as_transactions()
            .expect("transactions capability probed true");
        if let Err(err) = txn.commit_transaction() {
            let _ = txn.rollback_transaction();
            return Err(SomError::Rollback(err.to_string()));
        }
        Ok(())
    }

    /// Rolls back a transport-level transaction.
    pub fn rollback_transaction(&mut self) -> Result<()> {
        if !self.capabilities.transactions {
            return Err(SomError::UnsupportedOperation("rollback_transaction"));
        }
        self.transport
            .as_transactions()
            .expect("transactions capability probed true")
            .rollback_transaction()
    }

    // ---- §4.2 save ---------------------------------------------------------

    /// `save()` (spec §4.2): dispatches the log in kind-contiguous batches,
    /// then flushes Modified properties and reorder diffs, then confirms.
    pub fn save(&mut self) -> Result<()> {
        if self.oplog.is_empty() && !self.has_unflushed_node_state() {
            return Ok(());
        }
        tracing::info!(pending = self.oplog.entries().len(), "session save starting");
        if !self.capabilities.writing {
            return Err(SomError::UnsupportedOperation("save"));
        }
        match self.try_save() {
            Ok(()) => {
                tracing::info!("session save succeeded");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "session save failed, rolling back transport batch");
                if let Some(writing) = self.transport.as_writing() {
                    let _ = writing.rollback_save();
                }
                Err(err)
            }
        }
    }

    fn has_unflushed_node_state(&self) -> bool {
        self.identity
            .iter()
            .any(|(_, _, n)| matches!(n.state, ItemState::Modified) || n.original_child_order.is_some())
    }

    /// Classifies an error raised by a `Writing` call during `save` (spec
    /// §7: re-raised "wrapped into *Repository* if it was foreign"). A
    /// [`SomError::Repository`] already names a transport-originated
    /// failure and is passed through unchanged; every other variant
    /// surfacing from a `Writing` call is, from this layer's perspective,
    /// foreign to the save protocol (the `Writing` contract does not call
    /// for an `ItemNotFound`/`ConstraintViolation`/etc. at this point) and
    /// gets normalized through [`SomError::wrap_foreign`].
    fn classify_transport_error(err: SomError) -> SomError {
        match err {
            SomError::Repository(_) => err,
            other => SomError::wrap_foreign(other),
        }
    }

    fn try_save(&mut self) -> Result<()> {
        let batches: Vec<(OperationKind, Vec<Operation>)> = self
            .oplog
            .batches()
            .into_iter()
            .map(|(kind, ops)| (kind, ops.into_iter().cloned().collect()))
            .collect();

        let modified_paths: Vec<String> = self
            .identity
            .iter()
            .filter(|(_, _, n)| matches!(n.state, ItemState::Modified))
            .map(|(_, p, _)| p.to_string())
            .collect();
        let reorder_paths: Vec<String> = self
            .identity
            .iter()
            .filter(|(_, _, n)| n.original_child_order.is_some())
            .map(|(_, p, _)| p.to_string())
            .collect();

        let writing = self
            .transport
            .as_writing()
            .ok_or(SomError::UnsupportedOperation("save"))?;
        writing.prepare_save().map_err(Self::classify_transport_error)?;

        for (kind, ops) in &batches {
            let refs: Vec<&Operation> = ops.iter().collect();
            match kind {
                OperationKind::AddNode => writing.store_nodes(&refs),
                OperationKind::MoveNode => writing.move_nodes(&refs),
                OperationKind::RemoveNode => writing.delete_nodes(&refs),
                OperationKind::RemoveProperty => writing.delete_properties(&refs),
            }
            .map_err(Self::classify_transport_error)?;
        }

        for p in &modified_paths {
            if let Some(node) = self.identity.get(ItemClass::Regular, p) {
                writing
                    .update_properties(node)
                    .map_err(Self::classify_transport_error)?;
            }
        }
        for p in &reorder_paths {
            let diff = self
                .identity
                .get_mut(ItemClass::Regular, p)
                .and_then(|n| n.take_reorder_diff());
            if let Some(diff) = diff {
                if let Some(node) = self.identity.get(ItemClass::Regular, p) {
                    writing
                        .reorder_children(node, &diff)
                        .map_err(Self::classify_transport_error)?;
                }
            }
        }

        writing.finish_save().map_err(Self::classify_transport_error)?;
        self.confirm_all_saved();
        Ok(())
    }

    fn confirm_all_saved(&mut self) {
        let deleted: Vec<(ItemClass, String)> = self
            .identity
            .iter()
            .filter(|(_, _, n)| matches!(n.state, ItemState::Deleted))
            .map(|(c, p, _)| (c, p.to_string()))
            .collect();
        for (class, path) in deleted {
            self.identity.remove(class, &path);
        }

        let live: Vec<(ItemClass, String)> = self
            .identity
            .iter()
            .map(|(c, p, _)| (c, p.to_string()))
            .collect();
        for (class, path) in live {
            if let Some(node) = self.identity.get_mut(class, &path) {
                node.confirm_saved();
            }
        }

        self.oplog.clear();
    }

    // ---- §4.5 refresh --------------------------------------------------------

    /// `refresh(keepChanges)` (spec §4.5).
    pub fn refresh(&mut self, keep_changes: bool) -> Result<()> {
        tracing::info!(keep_changes, "session refresh");
        if keep_changes {
            self.refresh_keep_changes()
        } else {
            self.refresh_discard()
        }
    }

    fn refresh_discard(&mut self) -> Result<()> {
        for op in self.oplog.entries().to_vec().iter().rev() {
            if op.skip {
                continue;
            }
            match &op.data {
                OperationData::AddNode { path, .. } => {
                    self.identity.remove(ItemClass::Regular, path);
                }
                OperationData::RemoveProperty { path, .. } => {
                    if let Some(parent_path) = path::parent(path) {
                        if let Some(prop_name) = path::name(path) {
                            if let Some(node) = self.identity.get_mut(ItemClass::Regular, &parent_path) {
                                node.restore_property(prop_name);
                            }
                        }
                    }
                }
                OperationData::RemoveNode { path, node } => {
                    self.identity.put(ItemClass::Regular, path.clone(), node.clone());
                    if let Some(parent_path) = path::parent(path) {
                        if let Some(parent) = self.identity.get_mut(ItemClass::Regular, &parent_path) {
                            if let Some(name) = path::name(path) {
                                parent.add_child_name(name.to_string());
                            }
                        }
                    }
                }
                OperationData::MoveNode { src_path, dst_path } => {
                    if let Some(mut node) = self.identity.remove(ItemClass::Regular, dst_path) {
                        node.path = src_path.clone();
                        node.state = ItemState::Clean;
                        self.identity.put(ItemClass::Regular, src_path.clone(), node);
                    }
                    if let Some(dst_parent) = path::parent(dst_path) {
                        if let Some(parent) = self.identity.get_mut(ItemClass::Regular, &dst_parent) {
                            if let Some(name) = path::name(dst_path) {
                                parent.remove_child_name(name);
                            }
                        }
                    }
                    if let Some(src_parent) = path::parent(src_path) {
                        if let Some(parent) = self.identity.get_mut(ItemClass::Regular, &src_parent) {
                            if let Some(name) = path::name(src_path) {
                                parent.add_child_name(name.to_string());
                            }
                        }
                    }
                }
            }
        }
        self.oplog.clear();
        self.identity.reindex_identifiers();
        Ok(())
    }

    fn refresh_keep_changes(&mut self) -> Result<()> {
        let clean_paths: Vec<(ItemClass, String)> = self
            .identity
            .iter()
            .filter(|(_, _, n)| matches!(n.state, ItemState::Clean))
            .map(|(c, p, _)| (c, p.to_string()))
            .collect();
        for (class, path) in clean_paths {
            let fetch_path = match self.oplog.get_fetch_path(&path) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let payload = match self.transport.get_node(&fetch_path) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let (fresh, _) = payload::decode(&path, &payload)?;
            self.identity.put(class, path, fresh);
        }
        Ok(())
    }
}
