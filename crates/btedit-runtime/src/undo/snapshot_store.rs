#![forbid(unsafe_code)]

//! Whole-state undo/redo history.
//!
//! [`SnapshotHistory`] keeps value snapshots behind [`Arc`]s: the live state
//! keeps mutating after a push, so the history must own copies, while
//! handing a snapshot back for restoration only clones the `Arc`.
//!
//! # Architecture
//!
//! ```text
//! push(s3)
//! ┌──────────────────────────────────────────────────┐
//! │ Undo Stack:  [Arc(s0), Arc(s1), Arc(s2), Arc(s3)]│
//! │ Redo Stack:  []                                   │
//! │ Current:     Arc(s3)                              │
//! └──────────────────────────────────────────────────┘
//!
//! undo() x2
//! ┌──────────────────────────────────────────────────┐
//! │ Undo Stack:  [Arc(s0), Arc(s1)]                  │
//! │ Redo Stack:  [Arc(s3), Arc(s2)]                  │
//! │ Current:     Arc(s1)                              │
//! └──────────────────────────────────────────────────┘
//!
//! push(s4): new branch, clears redo
//! ┌──────────────────────────────────────────────────┐
//! │ Undo Stack:  [Arc(s0), Arc(s1), Arc(s4)]         │
//! │ Redo Stack:  []                                   │
//! │ Current:     Arc(s4)                              │
//! └──────────────────────────────────────────────────┘
//!
//! push(s4) again: equal to the top, ignored
//! ```
//!
//! # Current-state convention
//!
//! The live state is the top of the undo stack. Undo therefore needs at
//! least two entries, and the first pushed state can never be popped.
//! Both stacks are unbounded.

use std::fmt;
use std::sync::Arc;

use btedit_core::{Error, Result};

/// Snapshot-based undo/redo stacks.
///
/// # Invariants
///
/// 1. `undo_stack` is never empty after the first `push`.
/// 2. No two adjacent undo entries compare equal.
/// 3. The redo stack is cleared by every push that is not deduplicated.
/// 4. `current()` is the most recently pushed or restored snapshot.
pub struct SnapshotHistory<T> {
    /// Snapshots available for undo (current state is at the back).
    undo_stack: Vec<Arc<T>>,
    /// Snapshots available for redo (most recently undone at back).
    redo_stack: Vec<Arc<T>>,
}

impl<T> fmt::Debug for SnapshotHistory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotHistory")
            .field("undo_depth", &self.undo_stack.len())
            .field("redo_depth", &self.redo_stack.len())
            .finish()
    }
}

impl<T> Default for SnapshotHistory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SnapshotHistory<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    // ====================================================================
    // Core Operations
    // ====================================================================

    /// Step back: move the current snapshot to the redo stack and return
    /// the snapshot to restore.
    pub fn undo(&mut self) -> Result<Arc<T>> {
        if self.undo_stack.len() < 2 {
            return Err(Error::NothingToUndo);
        }
        let current = self.undo_stack.pop().ok_or(Error::NothingToUndo)?;
        self.redo_stack.push(current);
        self.undo_stack.last().cloned().ok_or(Error::NothingToUndo)
    }

    /// Step forward: move the most recently undone snapshot back onto the
    /// undo stack and return it.
    pub fn redo(&mut self) -> Result<Arc<T>> {
        let snapshot = self.redo_stack.pop().ok_or(Error::NothingToRedo)?;
        self.undo_stack.push(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// The current snapshot (top of the undo stack).
    #[must_use]
    pub fn current(&self) -> Option<&Arc<T>> {
        self.undo_stack.last()
    }

    // ====================================================================
    // Query
    // ====================================================================

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.undo_stack.len() >= 2
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Number of snapshots on the undo stack (including current).
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    #[must_use]
    pub fn total_snapshots(&self) -> usize {
        self.undo_stack.len() + self.redo_stack.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.undo_stack.is_empty()
    }

    /// Every retained snapshot, oldest undo entry first, then the redo
    /// stack from the most recently undone.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.undo_stack.iter().chain(self.redo_stack.iter().rev())
    }

    // ====================================================================
    // Maintenance
    // ====================================================================

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl<T: PartialEq> SnapshotHistory<T> {
    /// Record a new state. Returns `false` (and changes nothing) when
    /// `state` equals the current snapshot; otherwise pushes it and clears
    /// the redo stack.
    pub fn push(&mut self, state: T) -> bool {
        self.push_arc(Arc::new(state))
    }

    /// [`push`](Self::push) for an already shared snapshot.
    pub fn push_arc(&mut self, state: Arc<T>) -> bool {
        if self.current().is_some_and(|top| **top == *state) {
            return false;
        }
        self.redo_stack.clear();
        self.undo_stack.push(state);
        true
    }

    /// Drop all history and start over from `initial`.
    pub fn reset(&mut self, initial: T) {
        self.clear();
        self.undo_stack.push(Arc::new(initial));
    }
}

// ============================================================================
// Tests
// ============================================================================
