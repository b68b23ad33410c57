#![forbid(unsafe_code)]

//! btedit runtime
//!
//! Session state for a dual-pane behavior tree editor and monitor, built on
//! the tree model, registry and XML codec of `btedit-core`.
//!
//! # Key Components
//!
//! - [`Session`] - owns documents, registry, undo history and editor mode
//! - [`SharedSession`] - the session behind its single lock
//! - [`TreeDocument`] - one tab: a named tree, its view and its expansions
//! - [`SnapshotHistory`] - undo/redo stacks with push dedup
//! - [`SubtreeRewriter`] - expand, collapse, change and refresh SubTree references
//! - [`StatusMerger`] / [`status_channel`] - execution status ingestion
//! - [`SessionConfig`] - TOML/JSON configuration
//!
//! # How it fits in the system
//! A UI shell forwards user intents to [`Session`] methods and renders the
//! documents it exposes. Executors report status through a
//! [`StatusSender`]; the shell drains the matching [`StatusInbox`] with
//! [`SharedSession::pump_status`] between frames.

pub mod config;
pub mod document;
pub mod session;
pub mod status;
pub mod subtree;
pub mod undo;

pub use btedit_core::{Error, Result};
pub use config::{ConfigError, SessionConfig};
pub use document::{TreeDocument, ViewArea, ViewTransform};
pub use session::{EditorMode, Pane, Session, SharedSession};
pub use status::{StatusBatch, StatusInbox, StatusMerger, StatusSender, status_channel};
pub use subtree::{ExpansionRecord, SubtreeAction, SubtreeLibrary, SubtreeRewriter};
pub use undo::{SessionSnapshot, SnapshotHistory};
