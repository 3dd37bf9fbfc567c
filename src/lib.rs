//! # som - Session Object Manager
//!
//! `som` is the client-side unit-of-work and caching layer that sits between
//! a hierarchical content repository's public session API and its backend
//! [`Transport`](transport::Transport). It is modeled on the Apache
//! Jackrabbit/JCR session contract: reads are served from a local cache and
//! reflect pending local writes before they are ever sent anywhere; writes
//! are staged into an ordered [`OperationLog`](oplog::OperationLog) and only
//! reach the backend on an explicit [`SessionObjectManager::save`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use som::{Capabilities, ItemClass, SessionConfig, SessionObjectManager};
//! use som::node_type::InMemoryNodeTypeRegistry;
//!
//! # fn build_transport() -> Box<dyn som::transport::Transport> { unimplemented!() }
//! let transport = build_transport();
//! let mut session = SessionObjectManager::new(
//!     transport,
//!     SessionConfig::for_user("alice"),
//!     Box::new(InMemoryNodeTypeRegistry::new()),
//! );
//!
//! let node = session.add_node("/", "greeting", "nt:unstructured")?;
//! session.save()?;
//! # Ok::<(), som::SomError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Identity index** (`identity`): the dual path↔Node, identifier↔path
//!   cache, partitioned by item class so a regular node and a version node
//!   can share a path.
//! - **Operation log** (`oplog`): the append-only pending-mutation journal
//!   and its `getFetchPath` rewrite algorithm, the core trick that lets
//!   cached reads reflect unsaved writes.
//! - **Node processor** (`processor`): node-type-driven autocreation and
//!   value validation, run whenever a node is added.
//! - **Session facade** (`session`): ties the above together behind the
//!   read/write/save/refresh protocol.
//! - **Transport** (`transport`): the sole external collaborator, specified
//!   only as a trait family so any backend can be plugged in.

pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod node_type;
pub mod operation;
pub mod oplog;
pub mod path;
pub mod payload;
pub mod processor;
pub mod session;
pub mod transport;

pub use crate::config::SessionConfig;
pub use crate::error::{Result, SomError};
pub use crate::identity::{IdentityIndex, ItemClass};
pub use crate::model::{
    BinaryRef, ItemState, Node, Property, PropertyType, ReorderOp, Value, compute_reorder_diff,
};
pub use crate::node_type::{ChildNodeDefinition, NodeTypeDef, NodeTypeRegistry, PropertyDefinition};
pub use crate::operation::{Operation, OperationData, OperationKind};
pub use crate::oplog::OperationLog;
pub use crate::session::{Capabilities, SessionObjectManager};
pub use crate::transport::{BinaryStream, NodeTypeFilter, Payload, PayloadValue, Transport, Writing};
