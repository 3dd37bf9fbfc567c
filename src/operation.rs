//! The pending-mutation record: [`Operation`], its `skip` flag, and the
//! [`OperationKind`] discriminator used to batch like with like (spec §3
//! "Operation", §9 "Polymorphic operations").

use crate::model::{Node, Property};

/// Discriminator used to group consecutive [`Operation`]s of the same kind
/// into one transport batch at save time (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// See [`Operation::AddNode`].
    AddNode,
    /// See [`Operation::MoveNode`].
    MoveNode,
    /// See [`Operation::RemoveNode`].
    RemoveNode,
    /// See [`Operation::RemoveProperty`].
    RemoveProperty,
}

/// An immutable record of one pending mutation (spec §3 "Operation").
///
/// Nothing about a variant's payload is mutated after the operation is
/// appended to the log; the only field that changes post-append is `skip`
/// (spec §9 "The `skip` flag is a mutable bool inside the variant; nothing
/// else is mutated after append").
#[derive(Debug, Clone)]
pub enum OperationData {
    /// A node was added at `path`. `node` is a snapshot sufficient to
    /// reconstruct the payload sent to `storeNodes`.
    AddNode { path: String, node: Node },
    /// A node was moved from `src_path` to `dst_path`.
    MoveNode { src_path: String, dst_path: String },
    /// A node at `path` was removed; `node` is the pre-removal snapshot
    /// (used to restore it on `refresh(false)`).
    RemoveNode { path: String, node: Node },
    /// A property at `path` (the owning node's path) was removed;
    /// `property` is the pre-removal snapshot.
    RemoveProperty { path: String, property: Property },
}

impl OperationData {
    /// This operation's [`OperationKind`].
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationData::AddNode { .. } => OperationKind::AddNode,
            OperationData::MoveNode { .. } => OperationKind::MoveNode,
            OperationData::RemoveNode { .. } => OperationKind::RemoveNode,
            OperationData::RemoveProperty { .. } => OperationKind::RemoveProperty,
        }
    }
}

/// One entry in the [`crate::oplog::OperationLog`]: the immutable
/// [`OperationData`] plus the mutable `skip` flag.
#[derive(Debug, Clone)]
pub struct Operation {
    /// The mutation this entry records.
    pub data: OperationData,
    /// When set, this entry is omitted from the save batch and from the
    /// rewrite walk (spec invariant I5: "adds may be shadowed by a
    /// subsequent remove... the former marked `skip` only if explicitly
    /// refreshed").
    pub skip: bool,
}

impl Operation {
    /// Wraps `data` as a fresh, non-skipped log entry.
    pub fn new(data: OperationData) -> Self {
        Self { data, skip: false }
    }

    /// This operation's [`OperationKind`].
    pub fn kind(&self) -> OperationKind {
        self.data.kind()
    }
}
