//! In-memory entities: [`Node`], [`Property`], their lifecycle state, and
//! the child-reorder diff algorithm (spec §3, §4.3).
//!
//! # Key Types
//!
//! - [`Node`] - a cached vertex in the content tree, with lifecycle state
//! - [`Property`] - a typed value (or value list) attached to a node
//! - [`ItemState`] - the small lifecycle enum shared by nodes and properties
//! - [`Value`] / [`PropertyType`] - the typed value model (§3, §6)

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SomError};

/// Lifecycle state of a cached [`Node`] or [`Property`] (spec §3 "Lifecycles",
/// §9 "represent as a small state enum per item, not bit-flags").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Created locally via `addNode`/`setProperty`; no backing transport
    /// record exists yet.
    New,
    /// Matches the last-known transport state; no pending local change.
    Clean,
    /// Has local changes not yet flushed to the transport.
    Modified,
    /// The node's path was rewritten by a pending `moveNode`.
    Moved,
    /// Removed explicitly or by cascade; unreachable via the identity index.
    Deleted,
    /// Must be re-read before next access (used by `refresh(keepChanges)`
    /// reconciliation, spec §4.5).
    Dirty,
}

/// The declared type tag of a [`Property`] value (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// Unconstrained text, validated against the XML 1.0 allow-class.
    String,
    /// A name, optionally `prefix:local`; the prefix must be registered.
    Name,
    /// A relative or absolute path.
    Path,
    /// A URI matching the RFC 3986 pattern.
    Uri,
    /// A strong reference to another node's identifier.
    Reference,
    /// A weak reference to another node's identifier.
    WeakReference,
    /// Binary data; only size metadata is held in memory (spec §6).
    Binary,
    /// A timestamp.
    Date,
    /// A 64-bit signed integer.
    Long,
    /// A 64-bit floating point number.
    Double,
    /// An arbitrary-precision decimal, validated against the same
    /// allow-class as STRING.
    Decimal,
    /// A boolean.
    Boolean,
}

/// A handle to binary data that lives out-of-band (streamed on demand by
/// the out-of-scope binary stream wrapper, spec §6). Only the size is kept
/// in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryRef {
    /// Size of the binary value in bytes, if known.
    pub size: Option<u64>,
}

/// A single typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// See [`PropertyType::String`].
    String(String),
    /// See [`PropertyType::Name`].
    Name(String),
    /// See [`PropertyType::Path`].
    Path(String),
    /// See [`PropertyType::Uri`].
    Uri(String),
    /// See [`PropertyType::Reference`].
    Reference(String),
    /// See [`PropertyType::WeakReference`].
    WeakReference(String),
    /// See [`PropertyType::Binary`].
    Binary(BinaryRef),
    /// See [`PropertyType::Date`]; held as an RFC 3339 string to avoid
    /// pulling a second time-handling dependency beyond `time`.
    Date(String),
    /// See [`PropertyType::Long`].
    Long(i64),
    /// See [`PropertyType::Double`].
    Double(f64),
    /// See [`PropertyType::Decimal`]; held as its canonical string form.
    Decimal(String),
    /// See [`PropertyType::Boolean`].
    Boolean(bool),
}

impl Value {
    /// The [`PropertyType`] this value was constructed as.
    pub fn property_type(&self) -> PropertyType {
        match self {
            Value::String(_) => PropertyType::String,
            Value::Name(_) => PropertyType::Name,
            Value::Path(_) => PropertyType::Path,
            Value::Uri(_) => PropertyType::Uri,
            Value::Reference(_) => PropertyType::Reference,
            Value::WeakReference(_) => PropertyType::WeakReference,
            Value::Binary(_) => PropertyType::Binary,
            Value::Date(_) => PropertyType::Date,
            Value::Long(_) => PropertyType::Long,
            Value::Double(_) => PropertyType::Double,
            Value::Decimal(_) => PropertyType::Decimal,
            Value::Boolean(_) => PropertyType::Boolean,
        }
    }
}

/// A typed, possibly multi-valued property attached to a [`Node`].
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Property name (may carry a `prefix:` namespace portion).
    pub name: String,
    /// Declared type of every value in `values`.
    pub property_type: PropertyType,
    /// Whether this property holds a list of values rather than one.
    pub multi_valued: bool,
    /// The value(s). A single-valued property always holds exactly one
    /// entry.
    pub values: Vec<Value>,
    /// Lifecycle state of this property.
    pub state: ItemState,
}

impl Property {
    /// Builds a new single-valued property in the `New` state.
    pub fn new_single(name: impl Into<String>, value: Value) -> Self {
        let property_type = value.property_type();
        Self {
            name: name.into(),
            property_type,
            multi_valued: false,
            values: vec![value],
            state: ItemState::New,
        }
    }

    /// Builds a new multi-valued property in the `New` state.
    pub fn new_multi(name: impl Into<String>, property_type: PropertyType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            property_type,
            multi_valued: true,
            values,
            state: ItemState::New,
        }
    }

    /// Returns the single value of a single-valued property.
    pub fn value(&self) -> Option<&Value> {
        self.values.first()
    }
}

/// One step of a reorder diff: move `name` to immediately before `before`,
/// or to the end of the list if `before` is `None` (spec §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderOp {
    /// The child name being relocated.
    pub name: String,
    /// The name it should end up immediately before, or `None` for "last".
    pub before: Option<String>,
}

/// Computes a sequence of [`ReorderOp`] that transforms `original` into
/// `current` when applied in order (spec §4.3, tested by P7).
///
/// The algorithm is not guaranteed to produce the shortest possible
/// sequence, only a correct one: it walks `current` left to right,
/// relocating whichever element is out of place into its final slot and
/// recording that relocation.
pub fn compute_reorder_diff(original: &[String], current: &[String]) -> Vec<ReorderOp> {
    let mut working: Vec<String> = original.to_vec();
    let mut ops = Vec::new();

    for i in 0..current.len() {
        if working.get(i) == current.get(i) {
            continue;
        }
        let name = current[i].clone();
        let src_idx = working
            .iter()
            .position(|n| n == &name)
            .expect("reorder diff: name missing from original child list");
        working.remove(src_idx);
        working.insert(i, name.clone());
        let before = current.get(i + 1).cloned();
        ops.push(ReorderOp { name, before });
    }

    ops
}

/// A cached vertex in the content tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Absolute path; mutated in place on a pending move.
    pub path: String,
    /// Stable identifier, set once, present iff referenceable or assigned.
    pub identifier: Option<String>,
    /// Primary node type name.
    pub primary_type: String,
    /// Mixin type names, in declaration order.
    pub mixin_types: Vec<String>,
    /// Ordered child names.
    pub children: Vec<String>,
    /// Properties keyed by name.
    pub properties: BTreeMap<String, Property>,
    /// Removed properties retained until save succeeds, so `refresh` can
    /// restore them (spec §3 "Lifecycles").
    pub deleted_properties: HashMap<String, Property>,
    /// Child order observed at load time (or synthesised at first reorder);
    /// `None` iff the node has not been reordered since load (invariant I6).
    pub original_child_order: Option<Vec<String>>,
    /// Same-name-sibling index; always 1 (spec §9 "do not attempt" indexed
    /// resolution).
    pub index: u32,
    /// Lifecycle state.
    pub state: ItemState,
}

impl Node {
    /// Builds a brand-new node in the `New` state, as `addNode` would
    /// (spec §3 "Lifecycles" (a)/(b)).
    pub fn new_added(path: impl Into<String>, primary_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            identifier: None,
            primary_type: primary_type.into(),
            mixin_types: Vec::new(),
            children: Vec::new(),
            properties: BTreeMap::new(),
            deleted_properties: HashMap::new(),
            original_child_order: None,
            index: 1,
            state: ItemState::New,
        }
    }

    /// Builds a node registered from a transport read, in the `Clean`
    /// state.
    pub fn new_clean(path: impl Into<String>, primary_type: impl Into<String>) -> Self {
        let mut node = Self::new_added(path, primary_type);
        node.state = ItemState::Clean;
        node
    }

    /// Every declared type name, primary first then mixins, for use by
    /// [`crate::processor::NodeProcessor`] (spec §4.8).
    pub fn declared_type_names(&self) -> Vec<&str> {
        let mut names = vec![self.primary_type.as_str()];
        names.extend(self.mixin_types.iter().map(String::as_str));
        names
    }

    /// Marks a clean node as modified; a no-op on nodes already New/Modified
    /// (moving out of Clean only happens once per pending change, matching
    /// `Dirty`-vs-`Modified` distinction in spec §9).
    pub fn mark_modified(&mut self) {
        if matches!(self.state, ItemState::Clean) {
            self.state = ItemState::Modified;
        }
    }

    /// Marks the node deleted; idempotent.
    pub fn mark_deleted(&mut self) {
        self.state = ItemState::Deleted;
    }

    /// Returns the node to `Clean` after a successful save (spec §3
    /// "`confirmSaved`").
    pub fn confirm_saved(&mut self) {
        if !matches!(self.state, ItemState::Deleted) {
            self.state = ItemState::Clean;
        }
        for prop in self.properties.values_mut() {
            prop.state = ItemState::Clean;
        }
        self.deleted_properties.clear();
    }

    /// Appends `name` to the child list. If a reorder is already pending,
    /// `name` is appended to `original_child_order` too: the add is its own
    /// operation and carries no ordering information for the reorder diff to
    /// express, so the baseline must grow in step with `children` or a later
    /// `compute_reorder_diff` has no source slot to relocate it from.
    pub fn add_child_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if let Some(order) = self.original_child_order.as_mut() {
            order.push(name.clone());
        }
        self.children.push(name);
    }

    /// Removes `name` from the child list, if present, and from the pending
    /// reorder baseline (if any) for the same reason `add_child_name` keeps
    /// them in step.
    pub fn remove_child_name(&mut self, name: &str) {
        self.children.retain(|c| c != name);
        if let Some(order) = self.original_child_order.as_mut() {
            order.retain(|c| c != name);
        }
    }

    /// Sets (or replaces) a property value, marking it Modified (or New
    /// if it has no prior state to preserve).
    pub fn set_property(&mut self, property: Property) {
        self.mark_modified();
        let name = property.name.clone();
        let mut property = property;
        if !matches!(property.state, ItemState::New) {
            property.state = ItemState::Modified;
        }
        self.properties.insert(name, property);
    }

    /// Removes a property: if it was `New` it is simply dropped in memory
    /// (no RemoveProperty operation is needed for a never-persisted
    /// property, spec §4.4), otherwise it is moved into
    /// `deleted_properties` so `refresh` can restore it on undo.
    ///
    /// Returns `true` if a `RemoveProperty` operation must be recorded by
    /// the caller.
    pub fn remove_property(&mut self, name: &str) -> Result<bool> {
        let property = self
            .properties
            .remove(name)
            .ok_or_else(|| SomError::PathNotFound(format!("no such property: {name}")))?;
        if matches!(property.state, ItemState::New) {
            return Ok(false);
        }
        self.mark_modified();
        self.deleted_properties.insert(name.to_string(), property);
        Ok(true)
    }

    /// Restores a property previously removed, as `refresh(false)` does
    /// when undoing a `RemoveProperty` operation (spec §4.5).
    pub fn restore_property(&mut self, name: &str) {
        if let Some(mut property) = self.deleted_properties.remove(name) {
            property.state = ItemState::Clean;
            self.properties.insert(name.to_string(), property);
        }
    }

    /// Mutates the child list as `orderBefore` does (spec §4.3): relocates
    /// `src` to immediately before `dest`, or to the end if `dest` is
    /// `None`. Snapshots `original_child_order` on first call.
    pub fn order_before(&mut self, src: &str, dest: Option<&str>) -> Result<()> {
        if self.original_child_order.is_none() {
            self.original_child_order = Some(self.children.clone());
        }
        let src_idx = self
            .children
            .iter()
            .position(|c| c == src)
            .ok_or_else(|| SomError::PathNotFound(format!("no such child: {src}")))?;
        let name = self.children.remove(src_idx);
        match dest {
            Some(d) => {
                let dest_idx = self
                    .children
                    .iter()
                    .position(|c| c == d)
                    .ok_or_else(|| SomError::PathNotFound(format!("no such child: {d}")))?;
                self.children.insert(dest_idx, name);
            }
            None => self.children.push(name),
        }
        self.mark_modified();
        Ok(())
    }

    /// Computes this node's reorder diff and clears the snapshot, as save
    /// does after dispatching `reorderChildren` (spec §4.3). Returns `None`
    /// if the node has not been reordered since load.
    pub fn take_reorder_diff(&mut self) -> Option<Vec<ReorderOp>> {
        let original = self.original_child_order.take()?;
        Some(compute_reorder_diff(&original, &self.children))
    }
}
