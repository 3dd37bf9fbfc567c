//! The dual identity index: path → [`Node`] (partitioned by [`ItemClass`])
//! and identifier → path, kept consistent across pending moves, deletes and
//! re-additions (spec §4.1).

use rustc_hash::FxHashMap;

use crate::error::{Result, SomError};
use crate::model::Node;

/// Partitions the path→Node map so the same path can simultaneously hold a
/// regular Node and a Version Node (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemClass {
    /// An ordinary workspace node.
    Regular,
    /// A node from the version storage (`nt:version`, `nt:frozenNode`, ...).
    Version,
}

/// The session-local dual identity index (spec §4.1).
///
/// Invariant I1 (every identifier maps to a path present in the path map)
/// and I4 (a Deleted node is unreachable via the identifier index) are
/// maintained by routing every mutation through [`IdentityIndex::put`] and
/// [`IdentityIndex::remove`].
#[derive(Debug, Default)]
pub struct IdentityIndex {
    paths: FxHashMap<ItemClass, FxHashMap<String, Node>>,
    identifiers: FxHashMap<String, (ItemClass, String)>,
}

impl IdentityIndex {
    /// Builds an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a cached node by class and path.
    pub fn get(&self, class: ItemClass, path: &str) -> Option<&Node> {
        self.paths.get(&class)?.get(path)
    }

    /// Looks up a cached node mutably by class and path.
    pub fn get_mut(&mut self, class: ItemClass, path: &str) -> Option<&mut Node> {
        self.paths.get_mut(&class)?.get_mut(path)
    }

    /// Returns `true` if a node is cached at (class, path).
    pub fn contains(&self, class: ItemClass, path: &str) -> bool {
        self.get(class, path).is_some()
    }

    /// Inserts or replaces a cached node. If `node.identifier` is set, binds
    /// that identifier to this (class, path) — the identifier→path half of
    /// invariant I1.
    pub fn put(&mut self, class: ItemClass, path: String, node: Node) {
        if let Some(id) = node.identifier.clone() {
            self.identifiers.insert(id, (class, path.clone()));
        }
        self.paths.entry(class).or_default().insert(path, node);
    }

    /// Removes the cached node at (class, path), purging its identifier
    /// binding if it had one (invariant I4: a deleted node is not reachable
    /// via the identifier index). Returns the removed node, if any.
    pub fn remove(&mut self, class: ItemClass, path: &str) -> Option<Node> {
        let node = self.paths.get_mut(&class)?.remove(path)?;
        if let Some(id) = &node.identifier {
            self.identifiers.remove(id);
        }
        Some(node)
    }

    /// Marks the node at (class, path) `Deleted` in place, purging its
    /// identifier binding but leaving the node itself in the path map
    /// (invariant I4 only requires the identifier index to forget it; spec
    /// P6 requires cached descendants to remain inspectably `Deleted`
    /// after a cascade). Returns the node, if any.
    pub fn delete_in_place(&mut self, class: ItemClass, path: &str) -> Option<&mut Node> {
        if let Some(id) = self.paths.get(&class)?.get(path)?.identifier.clone() {
            self.identifiers.remove(&id);
        }
        let node = self.paths.get_mut(&class)?.get_mut(path)?;
        node.mark_deleted();
        Some(node)
    }

    /// Like [`IdentityIndex::get`] but returns `None` for a node marked
    /// `Deleted` — the view occupancy checks (`addNode`, `moveNode`
    /// destination checks) should use, since a Deleted path does not block
    /// a new node from taking its place.
    pub fn get_live(&self, class: ItemClass, path: &str) -> Option<&Node> {
        self.get(class, path)
            .filter(|n| !matches!(n.state, crate::model::ItemState::Deleted))
    }

    /// `true` iff a live (non-Deleted) node is cached at (class, path).
    pub fn contains_live(&self, class: ItemClass, path: &str) -> bool {
        self.get_live(class, path).is_some()
    }

    /// Binds `id` to (class, path), used when an identifier is first
    /// assigned to a new node (spec §4.1 `registerIdentifier`). Fails with
    /// [`SomError::DuplicateIdentifier`] if `id` is already bound to a
    /// different path.
    pub fn register_identifier(&mut self, id: &str, class: ItemClass, path: &str) -> Result<()> {
        if let Some((existing_class, existing_path)) = self.identifiers.get(id) {
            if *existing_class != class || existing_path != path {
                return Err(SomError::DuplicateIdentifier(id.to_string()));
            }
            return Ok(());
        }
        self.identifiers
            .insert(id.to_string(), (class, path.to_string()));
        Ok(())
    }

    /// Resolves an identifier to its (class, path) binding, if any.
    pub fn lookup_identifier(&self, id: &str) -> Option<(ItemClass, &str)> {
        self.identifiers
            .get(id)
            .map(|(class, path)| (*class, path.as_str()))
    }

    /// Iterates every cached (class, path, node) triple. Used by cascade
    /// removal and move rewriting, which must visit every cached descendant
    /// without materialising uncached ones (spec §4.4).
    pub fn iter(&self) -> impl Iterator<Item = (ItemClass, &str, &Node)> {
        self.paths.iter().flat_map(|(class, map)| {
            map.iter().map(move |(path, node)| (*class, path.as_str(), node))
        })
    }

    /// Collects every cached path (any class) that is strictly below
    /// `prefix`, for cascade / move-rewrite iteration.
    pub fn paths_below(&self, class: ItemClass, prefix: &str) -> Vec<String> {
        self.paths
            .get(&class)
            .map(|map| {
                map.keys()
                    .filter(|p| crate::path::is_strict_ancestor(prefix, p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops every cached entry and every identifier binding, as `refresh`
    /// does before re-indexing from the surviving cached nodes (spec §4.5).
    pub fn clear(&mut self) {
        self.paths.clear();
        self.identifiers.clear();
    }

    /// Rebuilds the identifier→path map from scratch by scanning every
    /// surviving (non-`Deleted`) cached node's own `identifier` field, as
    /// `refresh(false)` does after undoing the pending log (spec §4.5:
    /// "clear the identifier map, and re-index from the surviving cached
    /// nodes").
    pub fn reindex_identifiers(&mut self) {
        self.identifiers.clear();
        for (class, map) in self.paths.iter() {
            for (path, node) in map.iter() {
                if matches!(node.state, crate::model::ItemState::Deleted) {
                    continue;
                }
                if let Some(id) = &node.identifier {
                    self.identifiers.insert(id.clone(), (*class, path.clone()));
                }
            }
        }
    }
}
