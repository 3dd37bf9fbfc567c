//! The ordered, append-only pending-mutation journal and its path-rewrite
//! algorithm (spec §4.2) — the core algorithm of the Session Object
//! Manager: "it preserves the illusion that reads reflect pending writes".

use rustc_hash::FxHashMap;

use crate::error::{Result, SomError};
use crate::model::{Node, Property};
use crate::operation::{Operation, OperationData, OperationKind};
use crate::path;

/// Ordered journal of pending [`Operation`]s plus the per-kind side indexes
/// that own save-ordering and batch-coalescing policy (spec §2 table,
/// §4.2).
#[derive(Debug, Default)]
pub struct OperationLog {
    entries: Vec<Operation>,
    adds_by_path: FxHashMap<String, usize>,
    removes_by_path: FxHashMap<String, Vec<usize>>,
}

impl OperationLog {
    /// Builds an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if no pending operations are queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, including skipped ones, in append order.
    pub fn entries(&self) -> &[Operation] {
        &self.entries
    }

    /// Appends an `AddNode` entry. Fails with [`SomError::ItemExists`] if a
    /// non-skipped `AddNode` already targets `path` (invariant I2).
    pub fn append_add(&mut self, path: String, node: Node) -> Result<usize> {
        if let Some(&idx) = self.adds_by_path.get(&path) {
            if !self.entries[idx].skip {
                return Err(SomError::ItemExists(path));
            }
        }
        let idx = self.entries.len();
        self.entries
            .push(Operation::new(OperationData::AddNode { path: path.clone(), node }));
        self.adds_by_path.insert(path, idx);
        Ok(idx)
    }

    /// Appends a `MoveNode` entry.
    pub fn append_move(&mut self, src: String, dst: String) -> usize {
        let idx = self.entries.len();
        self.entries.push(Operation::new(OperationData::MoveNode {
            src_path: src,
            dst_path: dst,
        }));
        idx
    }

    /// Appends a `RemoveNode` entry.
    pub fn append_remove_node(&mut self, path: String, node: Node) -> usize {
        let idx = self.entries.len();
        self.removes_by_path.entry(path.clone()).or_default().push(idx);
        self.entries
            .push(Operation::new(OperationData::RemoveNode { path, node }));
        idx
    }

    /// Appends a `RemoveProperty` entry. `path` is the property's own
    /// absolute path (owning node path + `/` + property name).
    pub fn append_remove_property(&mut self, path: String, property: Property) -> usize {
        let idx = self.entries.len();
        self.removes_by_path.entry(path.clone()).or_default().push(idx);
        self.entries
            .push(Operation::new(OperationData::RemoveProperty { path, property }));
        idx
    }

    /// Marks the (only) non-skipped `AddNode` at `path` as skipped, as the
    /// session does when collapsing the add of a node whose `New` state
    /// means it was never sent to the transport (spec §8 scenario 2).
    pub fn skip_add(&mut self, path: &str) {
        if let Some(&idx) = self.adds_by_path.get(path) {
            self.entries[idx].skip = true;
        }
    }

    /// Rewrites `wanted` into the path the transport should be asked for,
    /// by walking the log from newest to oldest and undoing every pending
    /// move, failing on every pending remove/move-away (spec §4.2).
    pub fn get_fetch_path(&self, wanted: &str) -> Result<String> {
        let mut current = wanted.to_string();
        for op in self.entries.iter().rev() {
            if op.skip {
                continue;
            }
            match &op.data {
                OperationData::MoveNode { src_path, dst_path } => {
                    if path::is_at_or_below(src_path, &current) {
                        return Err(SomError::ItemNotFound(format!(
                            "{wanted}: moved in current session"
                        )));
                    }
                    if path::is_at_or_below(dst_path, &current) {
                        current = path::substitute_prefix(&current, dst_path, src_path);
                    }
                }
                OperationData::RemoveNode { path: removed, .. }
                | OperationData::RemoveProperty { path: removed, .. } => {
                    if path::is_at_or_below(removed, &current) {
                        return Err(SomError::ItemNotFound(format!(
                            "{wanted}: deleted in current session"
                        )));
                    }
                }
                OperationData::AddNode { path: added, .. } => {
                    if current == *added {
                        return Ok(current);
                    }
                }
            }
        }
        Ok(current)
    }

    /// Groups the non-skipped entries into contiguous same-kind batches, in
    /// log order — the sequence `save()` dispatches to the transport (spec
    /// §4.2 "Save-time ordering and batching", tested by P5). No reordering
    /// across kinds is ever performed (the tie-break rule).
    pub fn batches(&self) -> Vec<(OperationKind, Vec<&Operation>)> {
        let mut batches: Vec<(OperationKind, Vec<&Operation>)> = Vec::new();
        for op in self.entries.iter().filter(|op| !op.skip) {
            let kind = op.kind();
            match batches.last_mut() {
                Some((last_kind, group)) if *last_kind == kind => group.push(op),
                _ => batches.push((kind, vec![op])),
            }
        }
        batches
    }

    /// Clears the log and every side index, as `save()` does once the log
    /// has been fully drained and confirmed (spec §4.2 "Post-success
    /// cleanup").
    pub fn clear(&mut self) {
        self.entries.clear();
        self.adds_by_path.clear();
        self.removes_by_path.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;
    use proptest::prelude::*;

    fn node(path: &str) -> Node {
        Node::new_clean(path, "nt:unstructured")
    }

    #[test]
    fn fetch_path_undoes_pending_move() {
        let mut log = OperationLog::new();
        log.append_move("/a".into(), "/c".into());
        assert_eq!(log.get_fetch_path("/c/b").unwrap(), "/a/b");
        assert_eq!(log.get_fetch_path("/c").unwrap(), "/a");
    }

    #[test]
    fn fetch_path_fails_on_moved_away_source() {
        let mut log = OperationLog::new();
        log.append_move("/a".into(), "/c".into());
        assert!(log.get_fetch_path("/a/b").is_err());
        assert!(log.get_fetch_path("/a").is_err());
    }

    #[test]
    fn fetch_path_fails_on_removed_path_and_descendants() {
        let mut log = OperationLog::new();
        log.append_remove_node("/a".into(), node("/a"));
        assert!(log.get_fetch_path("/a").is_err());
        assert!(log.get_fetch_path("/a/b").is_err());
        assert!(log.get_fetch_path("/other").is_ok());
    }

    #[test]
    fn fetch_path_short_circuits_on_local_add() {
        let mut log = OperationLog::new();
        log.append_add("/a".into(), node("/a")).unwrap();
        assert_eq!(log.get_fetch_path("/a").unwrap(), "/a");
    }

    #[test]
    fn skip_add_excludes_it_from_rewrite_and_batches() {
        let mut log = OperationLog::new();
        log.append_add("/a".into(), node("/a")).unwrap();
        log.skip_add("/a");
        // With the add skipped, the log has nothing left to say about /a.
        assert_eq!(log.get_fetch_path("/a").unwrap(), "/a");
        assert!(log.batches().is_empty());
    }

    #[test]
    fn batches_group_consecutive_same_kind_only() {
        let mut log = OperationLog::new();
        log.append_add("/a".into(), node("/a")).unwrap();
        log.append_add("/b".into(), node("/b")).unwrap();
        log.append_move("/c".into(), "/d".into());
        log.append_add("/e".into(), node("/e")).unwrap();

        let batches = log.batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].0, OperationKind::AddNode);
        assert_eq!(batches[0].1.len(), 2);
        assert_eq!(batches[1].0, OperationKind::MoveNode);
        assert_eq!(batches[2].0, OperationKind::AddNode);
        assert_eq!(batches[2].1.len(), 1);
    }

    #[test]
    fn duplicate_nonskipped_add_is_rejected() {
        let mut log = OperationLog::new();
        log.append_add("/a".into(), node("/a")).unwrap();
        assert!(log.append_add("/a".into(), node("/a")).is_err());
    }

    proptest! {
        #[test]
        fn prop_fetch_path_round_trips_through_forward_moves(
            steps in prop::collection::vec((0usize..3, any::<bool>()), 0..20)
        ) {
            // A ground-truth model built up alongside the real log: for each
            // of 3 pool paths, `current_of[i]` is where it currently lives
            // and `removed[i]` is whether it has been deleted. Once an index
            // is removed, later steps addressing it are no-ops, matching how
            // a real session stops emitting ops for an already-gone node.
            let pool = ["/a", "/b", "/c"];
            let mut log = OperationLog::new();
            let mut current_of: Vec<String> = pool.iter().map(|p| p.to_string()).collect();
            let mut removed = [false, false, false];

            for (step_idx, (name_idx, is_move)) in steps.iter().enumerate() {
                let name_idx = *name_idx;
                if removed[name_idx] {
                    continue;
                }
                if *is_move {
                    let dst = format!("/moved_{step_idx}");
                    log.append_move(current_of[name_idx].clone(), dst.clone());
                    current_of[name_idx] = dst;
                } else {
                    log.append_remove_node(current_of[name_idx].clone(), node(&current_of[name_idx]));
                    removed[name_idx] = true;
                }
            }

            // P1: getFetchPath(L, p) either returns q such that forward-
            // applying L's moves maps q to p, or fails exactly when p is a
            // removed/moved-away path. Querying each pool path's *current*
            // location should resolve back to its own original literal name
            // unless it was removed, in which case the query must fail.
            for (idx, original) in pool.iter().enumerate() {
                if removed[idx] {
                    prop_assert!(log.get_fetch_path(&current_of[idx]).is_err());
                } else {
                    prop_assert_eq!(
                        log.get_fetch_path(&current_of[idx]).unwrap(),
                        original.to_string()
                    );
                }
            }
        }
    }
}
