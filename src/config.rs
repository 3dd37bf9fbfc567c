//! Session-local configuration: the session's effective user, the
//! registered namespace prefix table, and the auto-last-modified toggle
//! (SPEC_FULL.md §2 "Ambient stack — Configuration").
//!
//! Mirrors the teacher's `db::config::Config` shape: a plain struct of
//! knobs with a `Default` impl and named preset constructors.

use rustc_hash::FxHashSet;

/// Session-local configuration consulted by [`crate::processor::NodeProcessor`]
/// and [`crate::path`] validation.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The user identifier this session authenticated as, used for
    /// `jcr:createdBy` / `jcr:lastModifiedBy` autocreation (spec §4.8).
    pub user_id: String,
    /// Whether autocreated `jcr:lastModified` / `jcr:lastModifiedBy`
    /// properties are refreshed on every save of an already-clean
    /// autocreated property (spec §4.8 step 2).
    pub auto_last_modified: bool,
    /// Namespace prefixes registered for this session; a NAME or PATH
    /// segment using any other prefix fails with
    /// [`crate::error::SomError::Namespace`].
    registered_prefixes: FxHashSet<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut registered_prefixes = FxHashSet::default();
        for p in ["jcr", "nt", "mix", "rep"] {
            registered_prefixes.insert(p.to_string());
        }
        Self {
            user_id: "anonymous".to_string(),
            auto_last_modified: true,
            registered_prefixes,
        }
    }
}

impl SessionConfig {
    /// Builds a config for `user_id` with the default built-in namespace
    /// prefixes registered.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Registers an additional namespace prefix for this session.
    pub fn register_prefix(&mut self, prefix: impl Into<String>) {
        self.registered_prefixes.insert(prefix.into());
    }

    /// `true` if `prefix` is registered for this session.
    pub fn is_registered_prefix(&self, prefix: &str) -> bool {
        self.registered_prefixes.contains(prefix)
    }

    /// Validates that every `prefix:` portion in `name` is registered,
    /// failing with [`crate::error::SomError::Namespace`] otherwise (spec
    /// §4.8 step 3 "NAME: any `prefix:` segment must be a registered
    /// namespace prefix").
    pub fn check_namespace(&self, name: &str) -> crate::error::Result<()> {
        if let Some((prefix, _)) = name.split_once(':') {
            if !self.is_registered_prefix(prefix) {
                return Err(crate::error::SomError::Namespace(format!(
                    "unregistered namespace prefix: {prefix}"
                )));
            }
        }
        Ok(())
    }
}
