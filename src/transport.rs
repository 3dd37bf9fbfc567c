//! The Transport interface (spec §6): the wire/storage driver, modeled
//! only as a trait family since it is out of this crate's scope (spec §1).
//!
//! A real Transport is an HTTP/JSON client, a SQL-backed driver, or
//! anything else that can answer these calls; `tests/support` provides a
//! minimal in-memory fake used by this crate's own tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Node;
use crate::operation::Operation;

/// A single keyed entry in a node [`Payload`] (spec §6 "Payload shape").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PayloadValue {
    /// A scalar or array value (property value(s), or `:`-prefixed type
    /// metadata).
    Scalar(serde_json::Value),
    /// An inlined child node payload, used for prefetch (spec §4.7 step 4:
    /// "For each child entry in the payload that appears to carry its own
    /// full data... recursively register the child").
    Child(Box<Payload>),
}

/// A node payload as the transport returns it: a keyed record, insertion
/// order irrelevant. Keys beginning with `:` carry type metadata for the
/// same-named non-colon property; `::NodeIteratorSize` is a reserved hint
/// and is ignored by this crate.
pub type Payload = BTreeMap<String, PayloadValue>;

/// The reserved payload key carrying a child-count hint, ignored per spec
/// §6.
pub const NODE_ITERATOR_SIZE_KEY: &str = "::NodeIteratorSize";

/// A handle to an out-of-band binary stream (spec §1 "binary stream
/// wrappers" are out of scope; this crate only ever sees a handle).
pub trait BinaryStream: std::fmt::Debug {}

/// Optional write capability (spec §6 "Writing"). Transports that cannot
/// mutate content simply do not implement this trait; the SOM raises
/// [`crate::error::SomError::UnsupportedOperation`] when it is absent.
pub trait Writing {
    /// Dispatches a batch of `AddNode` operations.
    fn store_nodes(&mut self, ops: &[&Operation]) -> Result<()>;
    /// Dispatches a batch of `MoveNode` operations.
    fn move_nodes(&mut self, ops: &[&Operation]) -> Result<()>;
    /// Dispatches a batch of `RemoveNode` operations.
    fn delete_nodes(&mut self, ops: &[&Operation]) -> Result<()>;
    /// Dispatches a batch of `RemoveProperty` operations.
    fn delete_properties(&mut self, ops: &[&Operation]) -> Result<()>;
    /// Persists every property of a Modified node.
    fn update_properties(&mut self, node: &Node) -> Result<()>;
    /// Persists a node's reorder diff.
    fn reorder_children(&mut self, node: &Node, diff: &[crate::model::ReorderOp]) -> Result<()>;
    /// Copies a subtree, optionally from another workspace.
    fn copy_node(&mut self, src: &str, dst: &str, src_workspace: Option<&str>) -> Result<()>;
    /// Clones a subtree from another workspace.
    fn clone_from(
        &mut self,
        src_workspace: &str,
        src: &str,
        dst: &str,
        remove_existing: bool,
    ) -> Result<()>;
    /// Moves a node immediately, bypassing the session's pending-operation
    /// staging (used by workspace-level operations, not the session cache).
    fn move_node_immediately(&mut self, src: &str, dst: &str) -> Result<()>;
    /// Deletes a node immediately, bypassing staging.
    fn delete_node_immediately(&mut self, path: &str) -> Result<()>;
    /// Deletes a property immediately, bypassing staging.
    fn delete_property_immediately(&mut self, path: &str) -> Result<()>;
    /// Prepares the transport for a save batch (e.g. begins an internal
    /// transaction).
    fn prepare_save(&mut self) -> Result<()>;
    /// Finalises a save batch.
    fn finish_save(&mut self) -> Result<()>;
    /// Rolls back a save batch after a failure partway through.
    fn rollback_save(&mut self) -> Result<()>;
    /// Validates that `name` is a legal node/property name for this
    /// transport's backend (beyond this crate's own syntax checks).
    fn assert_valid_name(&self, name: &str) -> Result<()>;
}

/// Optional versioning capability.
pub trait Versioning {
    /// Checks a node into version history.
    fn checkin(&mut self, path: &str) -> Result<()>;
    /// Checks a node out of version history.
    fn checkout(&mut self, path: &str) -> Result<()>;
    /// Removes a version from a node's version history.
    fn remove_version(&mut self, path: &str, version_label: &str) -> Result<()>;
}

/// Optional transaction capability (spec §6 "Transaction").
pub trait TransactionCapability {
    /// Begins a transport-level transaction.
    fn begin_transaction(&mut self) -> Result<()>;
    /// Commits a transport-level transaction.
    fn commit_transaction(&mut self) -> Result<()>;
    /// Rolls back a transport-level transaction.
    fn rollback_transaction(&mut self) -> Result<()>;
}

/// Optional permission-management capability.
pub trait Permission {
    /// Returns whether the current session may perform `actions` on `path`.
    fn has_permission(&self, path: &str, actions: &[&str]) -> Result<bool>;
}

/// Optional node-type management capability.
pub trait NodeTypeManagement {
    /// Registers or updates node type definitions.
    fn register_node_types(&mut self, definitions: &[u8], allow_update: bool) -> Result<()>;
}

/// Optional CND-based node-type management capability.
pub trait NodeTypeCndManagement {
    /// Registers node types described in CND source text.
    fn register_node_types_cnd(&mut self, cnd: &str, allow_update: bool) -> Result<()>;
}

/// Optional server-side node-type filtering capability for bulk reads
/// (spec §4.7 "If the transport implements a server-side type filter, use
/// it").
pub trait NodeTypeFilter {
    /// Fetches payloads for `paths`, restricted server-side to nodes whose
    /// primary or mixin type is in `type_names`.
    fn get_nodes_filtered(
        &self,
        paths: &[String],
        type_names: &[String],
    ) -> Result<BTreeMap<String, Payload>>;
}

/// Optional change-observation capability.
pub trait Observation {
    /// Registers an observation listener, returning a subscription handle.
    fn add_event_listener(&mut self, path: &str) -> Result<u64>;
    /// Removes a previously registered listener.
    fn remove_event_listener(&mut self, handle: u64) -> Result<()>;
}

/// Optional workspace-management capability.
pub trait WorkspaceManagement {
    /// Creates a new workspace.
    fn create_workspace(&mut self, name: &str, src_workspace: Option<&str>) -> Result<()>;
    /// Deletes a workspace.
    fn delete_workspace(&mut self, name: &str) -> Result<()>;
}

/// The base, always-required Transport surface (spec §6): reads, reference
/// lookups, and capability probes. Writing and the other capabilities are
/// separate traits a concrete transport may additionally implement.
pub trait Transport {
    /// Fetches a single node payload.
    fn get_node(&self, path: &str) -> Result<Payload>;
    /// Fetches payloads for a set of paths, keyed by the requested path.
    fn get_nodes(&self, paths: &[String]) -> Result<BTreeMap<String, Payload>>;
    /// Fetches a single node payload by identifier.
    fn get_node_by_identifier(&self, id: &str) -> Result<Payload>;
    /// Fetches payloads for a set of identifiers.
    fn get_nodes_by_identifier(&self, ids: &[String]) -> Result<BTreeMap<String, Payload>>;
    /// Opens a binary stream for a binary property.
    fn get_binary_stream(&self, path: &str) -> Result<Box<dyn BinaryStream>>;

    /// Lists the paths of properties referencing `path` (optionally
    /// restricted to a given property name) via a strong `REFERENCE`.
    fn get_references(&self, path: &str, name: Option<&str>) -> Result<Vec<String>>;
    /// As [`Transport::get_references`] but for `WEAKREFERENCE`.
    fn get_weak_references(&self, path: &str, name: Option<&str>) -> Result<Vec<String>>;
    /// Fetches the properties named by a set of property paths, as used by
    /// [`crate::session::SessionObjectManager::get_references`] to turn a
    /// path list into `Property` objects.
    fn get_properties_by_path(&self, paths: &[String]) -> Result<Vec<(String, Payload)>>;

    /// Returns `true` if this transport implements [`Writing`].
    fn supports_writing(&self) -> bool {
        false
    }
    /// Returns `true` if this transport implements [`Versioning`].
    fn supports_versioning(&self) -> bool {
        false
    }
    /// Returns `true` if this transport implements [`TransactionCapability`].
    fn supports_transactions(&self) -> bool {
        false
    }
    /// Returns `true` if this transport implements [`Permission`].
    fn supports_permission(&self) -> bool {
        false
    }
    /// Returns `true` if this transport implements [`NodeTypeManagement`].
    fn supports_node_type_management(&self) -> bool {
        false
    }
    /// Returns `true` if this transport implements [`NodeTypeCndManagement`].
    fn supports_node_type_cnd_management(&self) -> bool {
        false
    }
    /// Returns `true` if this transport implements [`NodeTypeFilter`].
    fn supports_node_type_filter(&self) -> bool {
        false
    }
    /// Returns `true` if this transport implements [`Observation`].
    fn supports_observation(&self) -> bool {
        false
    }
    /// Returns `true` if this transport implements [`WorkspaceManagement`].
    fn supports_workspace_management(&self) -> bool {
        false
    }

    /// Downcasts to the optional [`Writing`] capability.
    fn as_writing(&mut self) -> Option<&mut dyn Writing> {
        None
    }
    /// Downcasts to the optional [`Versioning`] capability.
    fn as_versioning(&mut self) -> Option<&mut dyn Versioning> {
        None
    }
    /// Downcasts to the optional [`TransactionCapability`].
    fn as_transactions(&mut self) -> Option<&mut dyn TransactionCapability> {
        None
    }
    /// Downcasts to the optional [`Permission`] capability.
    fn as_permission(&self) -> Option<&dyn Permission> {
        None
    }
    /// Downcasts to the optional [`NodeTypeManagement`] capability.
    fn as_node_type_management(&mut self) -> Option<&mut dyn NodeTypeManagement> {
        None
    }
    /// Downcasts to the optional [`NodeTypeCndManagement`] capability.
    fn as_node_type_cnd_management(&mut self) -> Option<&mut dyn NodeTypeCndManagement> {
        None
    }
    /// Downcasts to the optional [`NodeTypeFilter`] capability.
    fn as_node_type_filter(&self) -> Option<&dyn NodeTypeFilter> {
        None
    }
    /// Downcasts to the optional [`Observation`] capability.
    fn as_observation(&mut self) -> Option<&mut dyn Observation> {
        None
    }
    /// Downcasts to the optional [`WorkspaceManagement`] capability.
    fn as_workspace_management(&mut self) -> Option<&mut dyn WorkspaceManagement> {
        None
    }
}
