//! Error types for the Session Object Manager.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SomError>;

/// All error conditions the Session Object Manager can raise.
///
/// Variants correspond one-to-one with the error kinds a JCR-style session
/// layer is expected to surface: most are raised synchronously by the path
/// rewriter or the [`crate::processor::NodeProcessor`] and are never caught
/// internally, they propagate straight to the caller.
#[derive(Debug, Error)]
pub enum SomError {
    /// No backing node exists at the requested path, or the path was
    /// rewritten away because it names something moved or deleted in the
    /// current session.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// Attempted to add a node at a path that is already occupied, pending
    /// or persisted.
    #[error("item already exists: {0}")]
    ItemExists(String),

    /// A node-type rule rejected a value, a mandatory child or property is
    /// missing and has no default, or autocreation could not proceed.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A property value does not match its declared type's syntax.
    #[error("value format error: {0}")]
    ValueFormat(String),

    /// A name used a namespace prefix that is not registered for this
    /// session.
    #[error("namespace error: {0}")]
    Namespace(String),

    /// The transport lacks the capability required for the requested
    /// operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// A relative path could not be resolved, a deleted property was
    /// referenced, or a parent is missing at mutation time.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The transport reported an authorization failure.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Catch-all for transport faults; wraps the underlying cause.
    #[error("repository error: {0}")]
    Repository(String),

    /// The operation was attempted on a node already marked `Deleted`.
    #[error("invalid item state: {0}")]
    InvalidItemState(String),

    /// A transactional commit failed and was rolled back.
    #[error("rollback: {0}")]
    Rollback(String),

    /// `registerIdentifier` was called with an identifier that is already
    /// bound to another path.
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),
}

impl SomError {
    /// Wraps a foreign error the way `save` wraps transport failures that
    /// are not themselves repository errors (spec §7: any raised error
    /// during `save` is "re-raised (wrapped into *Repository* if it was
    /// foreign)"). Called from `SessionObjectManager::try_save`'s error
    /// classification for every `Writing` result that is not already a
    /// `Repository` variant.
    pub fn wrap_foreign<E: std::fmt::Display>(err: E) -> Self {
        SomError::Repository(format!("transport failure: {err}"))
    }
}
