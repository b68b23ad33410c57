#![forbid(unsafe_code)]

//! Execution status ingestion.
//!
//! Executors report status from their own threads. They never touch a
//! document: each [`StatusSender`] pushes [`StatusBatch`]es into a channel
//! and the session owner drains the [`StatusInbox`] while holding the
//! session lock. Batches from one sender arrive in the order sent; there is
//! no ordering across senders.
//!
//! Status is transient. Applying it never changes structure and never
//! produces an undo snapshot.

use std::sync::mpsc;

use btedit_core::NodeStatus;
use serde::{Deserialize, Serialize};

use crate::document::TreeDocument;

/// Status updates addressed to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBatch {
    pub document: String,
    pub updates: Vec<(String, NodeStatus)>,
}

impl StatusBatch {
    #[must_use]
    pub fn new(document: impl Into<String>, updates: Vec<(String, NodeStatus)>) -> Self {
        Self {
            document: document.into(),
            updates,
        }
    }
}

/// Applies status updates to documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMerger;

impl StatusMerger {
    /// Set the status of every listed node that exists in `doc`. Unknown
    /// ids are skipped. Returns how many updates were applied.
    pub fn apply(doc: &mut TreeDocument, updates: &[(String, NodeStatus)]) -> usize {
        let mut applied = 0usize;
        for (id, status) in updates {
            if doc.set_status(id, *status) {
                applied += 1;
            }
        }
        tracing::trace!(
            target: "btedit.status",
            document = %doc.name(),
            applied,
            skipped = updates.len() - applied,
            "merged status batch"
        );
        applied
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Create a connected sender/inbox pair.
#[must_use]
pub fn status_channel() -> (StatusSender, StatusInbox) {
    let (sender, receiver) = mpsc::channel();
    (StatusSender { sender }, StatusInbox { receiver })
}

/// Producer half; cheap to clone, one per status source.
#[derive(Debug, Clone)]
pub struct StatusSender {
    sender: mpsc::Sender<StatusBatch>,
}

impl StatusSender {
    /// Queue a batch. Returns `false` once the inbox has been dropped.
    pub fn send(&self, batch: StatusBatch) -> bool {
        self.sender.send(batch).is_ok()
    }

    pub fn report(&self, document: impl Into<String>, updates: Vec<(String, NodeStatus)>) -> bool {
        self.send(StatusBatch::new(document, updates))
    }
}

/// Consumer half, owned by whoever owns the session.
#[derive(Debug)]
pub struct StatusInbox {
    receiver: mpsc::Receiver<StatusBatch>,
}

impl StatusInbox {
    /// Everything queued so far, without blocking.
    pub fn drain(&self) -> Vec<StatusBatch> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btedit_core::{NodeKind, NodeModelRegistry, NodeTypeTemplate};

    fn doc() -> TreeDocument {
        let mut registry = NodeModelRegistry::with_builtins();
        registry
            .register(NodeTypeTemplate::new("MoveTo", NodeKind::Action))
            .unwrap();
        let mut doc = TreeDocument::new("A");
        doc.insert_node(&registry, None, 0, "1", "Sequence", []).unwrap();
        doc.insert_node(&registry, Some("1"), 0, "2", "MoveTo", []).unwrap();
        doc
    }

    #[test]
    fn apply_sets_known_ids_and_skips_unknown() {
        let mut doc = doc();
        let before = doc.clone();
        let applied = StatusMerger::apply(
            &mut doc,
            &[
                ("2".to_string(), NodeStatus::Running),
                ("99".to_string(), NodeStatus::Failure),
            ],
        );
        assert_eq!(applied, 1);
        assert_eq!(doc.tree().get("2").unwrap().status, NodeStatus::Running);
        assert_eq!(doc.tree().get("1").unwrap().status, NodeStatus::Idle);
        assert!(doc.tree().same_structure(before.tree()));
    }

    #[test]
    fn later_update_for_same_id_wins() {
        let mut doc = doc();
        StatusMerger::apply(
            &mut doc,
            &[
                ("2".to_string(), NodeStatus::Running),
                ("2".to_string(), NodeStatus::Success),
            ],
        );
        assert_eq!(doc.tree().get("2").unwrap().status, NodeStatus::Success);
    }

    #[test]
    fn inbox_preserves_per_sender_order() {
        let (sender, inbox) = status_channel();
        assert!(sender.report("A", vec![("1".into(), NodeStatus::Running)]));
        assert!(sender.report("A", vec![("1".into(), NodeStatus::Success)]));
        let drained = inbox.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].updates[0].1, NodeStatus::Running);
        assert_eq!(drained[1].updates[0].1, NodeStatus::Success);
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn send_fails_after_inbox_dropped() {
        let (sender, inbox) = status_channel();
        drop(inbox);
        assert!(!sender.report("A", Vec::new()));
    }
}
