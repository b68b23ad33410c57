#![forbid(unsafe_code)]

//! Error taxonomy shared by every btedit layer.
//!
//! All variants are recoverable. Operations that return one of these leave
//! the state they were called on unchanged.

use thiserror::Error;

/// Errors produced by the codec, tree mutations, subtree rewriting, history
/// navigation and session management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Input text is not well-formed markup.
    #[error("malformed XML: {0}")]
    Parse(String),
    /// Input is well-formed but does not describe a valid tree.
    #[error("invalid tree: {0}")]
    Schema(String),
    /// A referenced node (or model) does not exist.
    #[error("`{0}` not found")]
    NotFound(String),
    /// A new or renamed node id collides with an existing one.
    #[error("node id `{0}` is already in use")]
    DuplicateId(String),
    /// A move would place a node below itself.
    #[error("moving `{node}` under `{parent}` would create a cycle")]
    Cycle { node: String, parent: String },
    /// No subtree definition is registered under this name.
    #[error("no subtree named `{0}`")]
    UnknownSubtree(String),
    /// Collapse or refresh was requested on a node that was never expanded.
    #[error("node `{0}` is not an expanded subtree")]
    NotExpanded(String),
    /// The undo stack holds only the initial state.
    #[error("nothing to undo")]
    NothingToUndo,
    /// The redo stack is empty.
    #[error("nothing to redo")]
    NothingToRedo,
    /// A node model cannot be removed while a document still uses it.
    #[error("node model `{model}` is used by document `{document}`")]
    InUse { model: String, document: String },
    /// No open document carries this name.
    #[error("no open document named `{0}`")]
    UnknownDocument(String),
    /// Another open document already carries this name.
    #[error("a document named `{0}` is already open")]
    DuplicateDocument(String),
    /// Structural edits are disabled in the current editor mode.
    #[error("editing is locked in {0} mode")]
    EditingLocked(&'static str),
    /// A session snapshot could not be encoded or decoded.
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl Error {
    /// Whether this is one of the ordinary history-boundary signals.
    ///
    /// Callers use this to disable an undo/redo control rather than report
    /// a failure.
    #[must_use]
    pub fn is_history_boundary(&self) -> bool {
        matches!(self, Self::NothingToUndo | Self::NothingToRedo)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
