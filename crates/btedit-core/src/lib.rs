#![forbid(unsafe_code)]

//! btedit core
//!
//! Toolkit-independent model of behavior trees as edited and monitored by
//! the btedit session runtime.
//!
//! # Key Components
//!
//! - [`AbsBehaviorTree`] - rooted tree with stable string ids and ordered children
//! - [`NodeModelRegistry`] - catalog of [`NodeTypeTemplate`]s that nodes instantiate
//! - [`XmlCodec`] - canonical, byte-stable XML encode/decode of [`BehaviorTreeSet`]s
//! - [`NodeStatus`] - transient execution status reported by running executors
//! - [`Error`] - the shared error taxonomy
//!
//! # How it fits in the system
//! `btedit-runtime` wraps trees into per-tab documents, records undo
//! snapshots, rewrites subtree references and merges status feeds. This
//! crate holds everything those layers agree on.

pub mod error;
pub mod registry;
pub mod status;
pub mod tree;
pub mod xml;

pub use error::{Error, Result};
pub use registry::{
    NodeKind, NodeModelRegistry, NodeTypeTemplate, ParameterSpec, PortDirection, PortSpec,
};
pub use status::NodeStatus;
pub use tree::{AbsBehaviorTree, DepthFirst, TreeNode};
pub use xml::{BehaviorTreeSet, RESERVED_ATTRIBUTES, XmlCodec};
