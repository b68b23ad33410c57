#![forbid(unsafe_code)]

//! Undo/redo over whole-session snapshots.
//!
//! Every structural edit made through a [`Session`](crate::Session)
//! captures a [`SessionSnapshot`] and pushes it onto a
//! [`SnapshotHistory`]. Undo and redo hand back a snapshot which the
//! session restores wholesale.
//!
//! # Architecture
//!
//! ```text
//!   edit ──► Session ──capture──► SessionSnapshot ──push──► SnapshotHistory
//!               ▲                                               │
//!               └──────────── restore ◄──── undo()/redo() ◄─────┘
//! ```
//!
//! # Module Structure
//!
//! - [`snapshot_store`]: the generic two-stack history with push dedup
//! - [`session_snapshot`]: the serialized value a session is reduced to
//!
//! # Design Notes
//!
//! Snapshots hold serialized document bytes rather than live documents, so
//! no edit can reach into history, and equality of two snapshots is plain
//! byte comparison. Node status is not part of the bytes: status changes
//! never produce snapshots and never suppress dedup.

pub mod session_snapshot;
pub mod snapshot_store;

pub use session_snapshot::SessionSnapshot;
pub use snapshot_store::SnapshotHistory;
