#![forbid(unsafe_code)]

//! The editing session.
//!
//! A [`Session`] exclusively owns the node registry, the open documents
//! (one per tab), the undo history and the editor mode. It is the single
//! consumer of everything else: loaders hand it XML text, executors hand it
//! status batches through a [`StatusInbox`], and the UI calls its edit
//! methods.
//!
//! # Transactions
//!
//! Each structural edit runs against the live state with a backup taken
//! first. On success a [`SessionSnapshot`] is captured and pushed (equal
//! snapshots are deduplicated); on any error the backup is put back, so a
//! failed edit leaves no trace in either the documents or the history.
//!
//! # Sharing
//!
//! [`SharedSession`] wraps a session in the one session-wide mutex. Status
//! sources never take it; the owner drains their queue under the lock with
//! [`SharedSession::pump_status`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use btedit_core::{
    AbsBehaviorTree, BehaviorTreeSet, Error, NodeKind, NodeModelRegistry, NodeTypeTemplate, Result,
    XmlCodec,
};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::document::{TreeDocument, ViewArea, ViewTransform};
use crate::status::{StatusBatch, StatusInbox, StatusMerger};
use crate::subtree::{SubtreeAction, SubtreeRewriter};
use crate::undo::{SessionSnapshot, SnapshotHistory};

// ============================================================================
// Modes and panes
// ============================================================================

/// What the editor is currently used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorMode {
    /// Structural editing and undo/redo are allowed.
    #[default]
    Editor,
    /// Watching a live executor; the trees are locked.
    Monitor,
    /// Stepping through a recorded run; the trees are locked.
    Replay,
}

impl EditorMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Editor => "editor",
            Self::Monitor => "monitor",
            Self::Replay => "replay",
        }
    }

    #[must_use]
    pub const fn allows_editing(self) -> bool {
        matches!(self, Self::Editor)
    }
}

impl fmt::Display for EditorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of the dual-pane layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pane {
    Left,
    Right,
}

impl Pane {
    /// Document name this pane loads into.
    #[must_use]
    pub fn tab_name(self, config: &SessionConfig) -> &str {
        match self {
            Self::Left => &config.left_tab_name,
            Self::Right => &config.right_tab_name,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

struct Backup {
    registry: NodeModelRegistry,
    documents: BTreeMap<String, TreeDocument>,
    main_tree: Option<String>,
    active: Option<String>,
}

pub struct Session {
    config: SessionConfig,
    registry: NodeModelRegistry,
    documents: BTreeMap<String, TreeDocument>,
    main_tree: Option<String>,
    active: Option<String>,
    history: SnapshotHistory<SessionSnapshot>,
    mode: EditorMode,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("documents", &self.documents.keys().collect::<Vec<_>>())
            .field("main_tree", &self.main_tree)
            .field("active", &self.active)
            .field("mode", &self.mode)
            .field("history", &self.history)
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// An empty session whose history starts at the empty state.
    #[must_use]
    pub fn with_config(config: SessionConfig) -> Self {
        let mode = config.initial_mode;
        let mut history = SnapshotHistory::new();
        history.reset(SessionSnapshot::default());
        Self {
            config,
            registry: NodeModelRegistry::with_builtins(),
            documents: BTreeMap::new(),
            main_tree: None,
            active: None,
            history,
            mode,
        }
    }

    // ====================================================================
    // Query
    // ====================================================================

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &NodeModelRegistry {
        &self.registry
    }

    #[must_use]
    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    #[must_use]
    pub fn document(&self, name: &str) -> Option<&TreeDocument> {
        self.documents.get(name)
    }

    /// Open documents in name order.
    pub fn documents(&self) -> impl Iterator<Item = &TreeDocument> {
        self.documents.values()
    }

    pub fn document_names(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    #[must_use]
    pub fn main_tree(&self) -> Option<&str> {
        self.main_tree.as_deref()
    }

    #[must_use]
    pub fn active_document(&self) -> Option<&str> {
        self.active.as_deref()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.mode.allows_editing() && self.history.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.mode.allows_editing() && self.history.can_redo()
    }

    #[must_use]
    pub fn history(&self) -> &SnapshotHistory<SessionSnapshot> {
        &self.history
    }

    // ====================================================================
    // Loading and saving
    // ====================================================================

    /// Replace the whole session with the trees of `xml`. The loaded state
    /// becomes the new undo baseline.
    pub fn load_from_xml(&mut self, xml: &str) -> Result<()> {
        let (registry, set) = self.decode_payload(xml)?;
        let main_tree = set.main_tree.clone();
        let documents: BTreeMap<String, TreeDocument> = set
            .trees
            .into_iter()
            .map(|(name, tree)| (name.clone(), TreeDocument::from_tree(name, tree)))
            .collect();
        let baseline = SessionSnapshot::capture(Some(&main_tree), Some(&main_tree), &documents)?;

        self.registry = registry;
        self.documents = documents;
        self.main_tree = Some(main_tree.clone());
        self.active = Some(main_tree.clone());
        self.sync_subtree_templates();
        self.history.reset(baseline);
        tracing::info!(
            target: "btedit.session",
            main_tree = %main_tree,
            documents = self.documents.len(),
            "loaded session from XML"
        );
        Ok(())
    }

    /// Load one payload per pane. Each payload's main tree becomes the
    /// document named after its pane; other trees open under their own
    /// names. Resets the undo baseline.
    pub fn load_two_trees(&mut self, left_xml: &str, right_xml: &str) -> Result<()> {
        let (registry, left) = self.decode_payload(left_xml)?;
        let (mut registry, right) = Self::decode_payload_into(registry, right_xml)?;

        let mut documents = BTreeMap::new();
        for (pane, set) in [(Pane::Left, left), (Pane::Right, right)] {
            let tab = pane.tab_name(&self.config).to_string();
            add_pane_documents(&mut documents, &tab, set)?;
        }
        for name in documents.keys() {
            registry.register_subtree(name)?;
        }
        let left_tab = self.config.left_tab_name.clone();
        let baseline = SessionSnapshot::capture(Some(&left_tab), Some(&left_tab), &documents)?;

        self.registry = registry;
        self.documents = documents;
        self.main_tree = Some(left_tab.clone());
        self.active = Some(left_tab);
        self.sync_subtree_templates();
        self.history.reset(baseline);
        tracing::info!(
            target: "btedit.session",
            documents = self.documents.len(),
            "loaded dual-pane session"
        );
        Ok(())
    }

    /// Replace the document of one pane with the main tree of `xml`.
    /// Unlike the full loads this is an undoable edit, and it is allowed in
    /// every mode.
    pub fn load_pane(&mut self, pane: Pane, xml: &str) -> Result<()> {
        let tab = pane.tab_name(&self.config).to_string();
        self.transact_in_any_mode("load_pane", |session| {
            let (mut registry, set) = session.decode_payload(xml)?;
            let (_, tree) = set.into_main()?;
            registry.register_subtree(&tab)?;
            let mut doc = TreeDocument::from_tree(tab.clone(), tree);
            if let Some(previous) = session.documents.get(&tab) {
                doc.set_view(previous.view_transform, previous.view_area);
            }
            session.registry = registry;
            session.documents.insert(tab.clone(), doc);
            if session.main_tree.is_none() {
                session.main_tree = Some(tab.clone());
            }
            if session.active.is_none() {
                session.active = Some(tab.clone());
            }
            session.sync_subtree_templates();
            Ok(())
        })?;
        tracing::info!(target: "btedit.session", pane = ?pane, document = %tab, "loaded pane");
        Ok(())
    }

    /// Canonical XML of every open document, expansions collapsed.
    pub fn save_to_xml(&self) -> Result<String> {
        let Some(first) = self.documents.keys().next() else {
            return Err(Error::Schema("no open document to save".into()));
        };
        let main_tree = self.main_tree.clone().unwrap_or_else(|| first.clone());
        let trees = self.subtree_definitions()?;
        let models = self
            .registry
            .custom_models()
            .map(|model| (model.name.clone(), model.clone()))
            .collect();
        let set = BehaviorTreeSet {
            main_tree,
            trees,
            models,
        };
        let xml = XmlCodec::new(&self.registry)
            .with_indent(self.config.xml_indent)
            .encode(&set);
        tracing::info!(
            target: "btedit.session",
            main_tree = %set.main_tree,
            documents = set.trees.len(),
            bytes = xml.len(),
            "saved session to XML"
        );
        Ok(xml)
    }

    // ====================================================================
    // Tabs
    // ====================================================================

    /// Open a blank document. Without a name, the configured default name
    /// is used, numbered if already taken. Returns the document name.
    pub fn open_document(&mut self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) if name.trim().is_empty() => {
                return Err(Error::Schema("document name must not be empty".into()));
            }
            Some(name) if self.documents.contains_key(name) => {
                return Err(Error::DuplicateDocument(name.to_string()));
            }
            Some(name) => name.to_string(),
            None => self.unused_document_name(),
        };
        self.transact("open_document", |session| {
            session.registry.register_subtree(&name)?;
            session
                .documents
                .insert(name.clone(), TreeDocument::new(name.clone()));
            session.main_tree.get_or_insert_with(|| name.clone());
            session.active = Some(name.clone());
            Ok(())
        })?;
        Ok(name)
    }

    pub fn close_document(&mut self, name: &str) -> Result<()> {
        self.transact("close_document", |session| {
            session
                .documents
                .remove(name)
                .ok_or_else(|| Error::UnknownDocument(name.to_string()))?;
            let first = session.documents.keys().next().cloned();
            if session.main_tree.as_deref() == Some(name) {
                session.main_tree = first.clone();
            }
            if session.active.as_deref() == Some(name) {
                session.active = first;
            }
            session.sync_subtree_templates();
            Ok(())
        })
    }

    /// Rename a document. SubTree references in every document follow.
    pub fn rename_document(&mut self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return self.require_document(old).map(|_| ());
        }
        if new.trim().is_empty() {
            return Err(Error::Schema("document name must not be empty".into()));
        }
        self.transact("rename_document", |session| {
            let mut doc = session
                .documents
                .remove(old)
                .ok_or_else(|| Error::UnknownDocument(old.to_string()))?;
            if session.documents.contains_key(new) {
                return Err(Error::DuplicateDocument(new.to_string()));
            }
            session.registry.register_subtree(new)?;
            doc.set_name(new);
            session.documents.insert(new.to_string(), doc);
            for doc in session.documents.values_mut() {
                doc.retarget_references(old, new)?;
            }
            for designated in [&mut session.main_tree, &mut session.active] {
                if designated.as_deref() == Some(old) {
                    *designated = Some(new.to_string());
                }
            }
            session.sync_subtree_templates();
            Ok(())
        })
    }

    pub fn set_main_tree(&mut self, name: &str) -> Result<()> {
        self.transact("set_main_tree", |session| {
            session.require_document(name)?;
            session.main_tree = Some(name.to_string());
            Ok(())
        })
    }

    /// Switch tabs. Not an edit on its own; the next snapshot records it.
    pub fn set_active(&mut self, name: &str) -> Result<()> {
        self.require_document(name)?;
        self.active = Some(name.to_string());
        Ok(())
    }

    /// Record the canvas view of a document. Not an edit on its own.
    pub fn set_view(&mut self, name: &str, transform: ViewTransform, area: ViewArea) -> Result<()> {
        self.require_document_mut(name)?.set_view(transform, area);
        Ok(())
    }

    /// Close every document, optionally opening a fresh blank one.
    pub fn clear(&mut self, create_new: bool) -> Result<()> {
        self.transact("clear", |session| {
            session.documents.clear();
            session.main_tree = None;
            session.active = None;
            session.sync_subtree_templates();
            if create_new {
                let name = session.unused_document_name();
                session.registry.register_subtree(&name)?;
                session
                    .documents
                    .insert(name.clone(), TreeDocument::new(name.clone()));
                session.main_tree = Some(name.clone());
                session.active = Some(name);
            }
            Ok(())
        })
    }

    // ====================================================================
    // Node edits
    // ====================================================================

    /// Run `f` on a copy of `document` as one undoable edit.
    pub fn edit<R>(
        &mut self,
        document: &str,
        f: impl FnOnce(&mut TreeDocument, &NodeModelRegistry) -> Result<R>,
    ) -> Result<R> {
        self.transact("edit", |session| {
            let doc = session
                .documents
                .get_mut(document)
                .ok_or_else(|| Error::UnknownDocument(document.to_string()))?;
            f(doc, &session.registry)
        })
    }

    /// Insert a node; without an explicit id a fresh one is chosen.
    /// Returns the id used.
    pub fn insert_node(
        &mut self,
        document: &str,
        parent: Option<&str>,
        position: usize,
        id: Option<&str>,
        type_name: &str,
        parameters: impl IntoIterator<Item = (String, String)>,
    ) -> Result<String> {
        self.edit(document, |doc, registry| {
            let id = id.map_or_else(|| doc.fresh_id(), str::to_owned);
            doc.insert_node(registry, parent, position, &id, type_name, parameters)?;
            Ok(id)
        })
    }

    pub fn remove_node(&mut self, document: &str, id: &str) -> Result<()> {
        self.edit(document, |doc, _| doc.remove_node(id).map(|_| ()))
    }

    pub fn move_node(
        &mut self,
        document: &str,
        id: &str,
        new_parent: Option<&str>,
        position: usize,
    ) -> Result<()> {
        self.edit(document, |doc, registry| {
            doc.move_node(registry, id, new_parent, position)
        })
    }

    pub fn edit_parameters(
        &mut self,
        document: &str,
        id: &str,
        updates: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        self.edit(document, |doc, _| doc.edit_parameters(id, updates))
    }

    pub fn rename_node(&mut self, document: &str, old: &str, new: &str) -> Result<()> {
        self.edit(document, |doc, _| doc.rename_node(old, new))
    }

    // ====================================================================
    // Subtrees
    // ====================================================================

    /// Apply a subtree action to node `id` of `document`. Definitions are
    /// the exported trees of the open documents.
    pub fn subtree(&mut self, document: &str, id: &str, action: SubtreeAction) -> Result<()> {
        self.transact("subtree", |session| {
            let library = session.subtree_definitions()?;
            let doc = session
                .documents
                .get_mut(document)
                .ok_or_else(|| Error::UnknownDocument(document.to_string()))?;
            SubtreeRewriter::new(&session.registry, &library).apply(doc, id, &action)
        })
    }

    pub fn expand_subtree(&mut self, document: &str, id: &str) -> Result<()> {
        self.subtree(document, id, SubtreeAction::Expand)
    }

    pub fn collapse_subtree(&mut self, document: &str, id: &str) -> Result<()> {
        self.subtree(document, id, SubtreeAction::Collapse)
    }

    pub fn change_subtree(&mut self, document: &str, id: &str, target: &str) -> Result<()> {
        self.subtree(document, id, SubtreeAction::Change(target.to_string()))
    }

    pub fn refresh_subtree(&mut self, document: &str, id: &str) -> Result<()> {
        self.subtree(document, id, SubtreeAction::Refresh)
    }

    /// Refresh every expanded reference in every document as one edit.
    /// Returns `(document, placeholder)` for references that had to be
    /// collapsed because their definition is gone.
    pub fn refresh_expanded_subtrees(&mut self) -> Result<Vec<(String, String)>> {
        self.transact("refresh_expanded_subtrees", |session| {
            let library = session.subtree_definitions()?;
            let rewriter = SubtreeRewriter::new(&session.registry, &library);
            let mut collapsed = Vec::new();
            for (name, doc) in &mut session.documents {
                for placeholder in rewriter.refresh_all(doc)? {
                    collapsed.push((name.clone(), placeholder));
                }
            }
            Ok(collapsed)
        })
    }

    // ====================================================================
    // History
    // ====================================================================

    pub fn undo(&mut self) -> Result<()> {
        self.ensure_editable()?;
        let snapshot = self.history.undo()?;
        if let Err(err) = self.restore(&snapshot) {
            if let Err(step_back) = self.history.redo() {
                tracing::error!(
                    target: "btedit.undo",
                    error = %step_back,
                    "could not return to the state before a failed undo"
                );
            }
            tracing::warn!(target: "btedit.undo", error = %err, "undo rejected");
            return Err(err);
        }
        tracing::debug!(
            target: "btedit.undo",
            undo_depth = self.history.undo_depth(),
            redo_depth = self.history.redo_depth(),
            "undo"
        );
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        self.ensure_editable()?;
        let snapshot = self.history.redo()?;
        if let Err(err) = self.restore(&snapshot) {
            if let Err(step_back) = self.history.undo() {
                tracing::error!(
                    target: "btedit.undo",
                    error = %step_back,
                    "could not return to the state before a failed redo"
                );
            }
            tracing::warn!(target: "btedit.undo", error = %err, "redo rejected");
            return Err(err);
        }
        tracing::debug!(
            target: "btedit.undo",
            undo_depth = self.history.undo_depth(),
            redo_depth = self.history.redo_depth(),
            "redo"
        );
        Ok(())
    }

    /// Current state as a snapshot value.
    pub fn snapshot(&self) -> Result<SessionSnapshot> {
        SessionSnapshot::capture(
            self.main_tree.as_deref(),
            self.active.as_deref(),
            &self.documents,
        )
    }

    /// Replace documents, main tree and active tab with `snapshot`. Live
    /// statuses carry over to nodes that still exist under the same
    /// document name and id. History is not touched.
    ///
    /// Fails with [`Error::Schema`], leaving the session unchanged, when a
    /// node type in the snapshot no longer resolves.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        let mut documents = snapshot.documents()?;
        for doc in documents.values() {
            if let Some(missing) = doc
                .referenced_types()
                .into_iter()
                .find(|t| !self.registry.contains(t) && !documents.contains_key(*t))
            {
                return Err(Error::Schema(format!(
                    "document `{}` uses node type `{missing}`, which is no longer registered",
                    doc.name()
                )));
            }
        }
        for (name, doc) in &mut documents {
            let Some(live) = self.documents.get(name) else {
                continue;
            };
            for (id, status) in live.tree().statuses() {
                doc.set_status(&id, status);
            }
        }
        self.documents = documents;
        self.main_tree = snapshot.main_tree_name.clone();
        self.active = snapshot.active_document_name.clone();
        self.sync_subtree_templates();
        Ok(())
    }

    // ====================================================================
    // Registry feed
    // ====================================================================

    /// Insert or replace a node model. Returns the model it replaced.
    pub fn add_model(&mut self, template: NodeTypeTemplate) -> Result<Option<NodeTypeTemplate>> {
        if template.kind != NodeKind::SubTree && self.documents.contains_key(&template.name) {
            return Err(Error::Schema(format!(
                "`{}` names an open tree; only a SubTree model may use it",
                template.name
            )));
        }
        let (name, kind) = (template.name.clone(), template.kind);
        let replaced = self.registry.register(template)?;
        tracing::debug!(
            target: "btedit.session",
            model = %name,
            kind = %kind,
            replaced = replaced.is_some(),
            "model added"
        );
        Ok(replaced)
    }

    /// Remove a node model that no open document uses and that no undo or
    /// redo step can bring back.
    pub fn remove_model(&mut self, name: &str) -> Result<NodeTypeTemplate> {
        if !self.registry.contains(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        if self.documents.contains_key(name) {
            return Err(Error::InUse {
                model: name.to_string(),
                document: name.to_string(),
            });
        }
        if let Some(doc) = self
            .documents
            .values()
            .find(|doc| doc.referenced_types().contains(name))
        {
            return Err(Error::InUse {
                model: name.to_string(),
                document: doc.name().to_string(),
            });
        }
        if let Some(document) = self.history_user_of(name) {
            return Err(Error::InUse {
                model: name.to_string(),
                document: document.to_string(),
            });
        }
        tracing::debug!(target: "btedit.session", model = name, "model removed");
        self.registry
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    // ====================================================================
    // Status
    // ====================================================================

    /// Merge one status batch. Works in every mode and never touches the
    /// history. Returns the number of node statuses applied.
    pub fn apply_status(&mut self, batch: &StatusBatch) -> usize {
        match self.documents.get_mut(&batch.document) {
            Some(doc) => StatusMerger::apply(doc, &batch.updates),
            None => {
                tracing::warn!(
                    target: "btedit.status",
                    document = %batch.document,
                    updates = batch.updates.len(),
                    "dropping status batch for unknown document"
                );
                0
            }
        }
    }

    /// Apply everything queued in `inbox`. Returns the number of batches.
    pub fn drain_status(&mut self, inbox: &StatusInbox) -> usize {
        let batches = inbox.drain();
        for batch in &batches {
            self.apply_status(batch);
        }
        if !batches.is_empty() {
            tracing::debug!(target: "btedit.status", batches = batches.len(), "drained status queue");
        }
        batches.len()
    }

    /// Set every node of every document back to idle.
    pub fn reset_statuses(&mut self) {
        for doc in self.documents.values_mut() {
            doc.tree_mut().reset_statuses();
        }
    }

    // ====================================================================
    // Mode
    // ====================================================================

    pub fn set_mode(&mut self, mode: EditorMode) {
        if self.mode != mode {
            tracing::info!(
                target: "btedit.session",
                from = %self.mode,
                to = %mode,
                "editor mode changed"
            );
            self.mode = mode;
        }
    }

    // ====================================================================
    // Internal
    // ====================================================================

    fn ensure_editable(&self) -> Result<()> {
        if self.mode.allows_editing() {
            Ok(())
        } else {
            Err(Error::EditingLocked(self.mode.as_str()))
        }
    }

    fn transact<R>(&mut self, op: &'static str, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.ensure_editable()?;
        self.transact_in_any_mode(op, f)
    }

    fn transact_in_any_mode<R>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let backup = Backup {
            registry: self.registry.clone(),
            documents: self.documents.clone(),
            main_tree: self.main_tree.clone(),
            active: self.active.clone(),
        };
        let outcome = f(self).and_then(|value| self.snapshot().map(|snapshot| (value, snapshot)));
        match outcome {
            Ok((value, snapshot)) => {
                let pushed = self.history.push(snapshot);
                tracing::debug!(
                    target: "btedit.undo",
                    op,
                    pushed,
                    undo_depth = self.history.undo_depth(),
                    "edit committed"
                );
                Ok(value)
            }
            Err(err) => {
                self.registry = backup.registry;
                self.documents = backup.documents;
                self.main_tree = backup.main_tree;
                self.active = backup.active;
                tracing::debug!(target: "btedit.session", op, error = %err, "edit rejected");
                Err(err)
            }
        }
    }

    fn decode_payload(&self, xml: &str) -> Result<(NodeModelRegistry, BehaviorTreeSet)> {
        Self::decode_payload_into(self.registry.clone(), xml)
    }

    /// Decode `xml` against `registry` and fold the payload's models and
    /// tree names into it.
    fn decode_payload_into(
        mut registry: NodeModelRegistry,
        xml: &str,
    ) -> Result<(NodeModelRegistry, BehaviorTreeSet)> {
        let set = XmlCodec::new(&registry).decode(xml)?;
        for model in set.models.values() {
            registry.register(model.clone())?;
        }
        for name in set.trees.keys() {
            registry.register_subtree(name)?;
        }
        Ok((registry, set))
    }

    /// A document in some undo or redo snapshot that uses `type_name`.
    fn history_user_of(&self, type_name: &str) -> Option<&str> {
        self.history
            .iter()
            .find_map(|snapshot| snapshot.user_of(type_name))
    }

    fn subtree_definitions(&self) -> Result<BTreeMap<String, AbsBehaviorTree>> {
        self.documents
            .iter()
            .map(|(name, doc)| Ok((name.clone(), doc.exported_tree()?)))
            .collect()
    }

    /// Keep a SubTree template for every open document and for every tree
    /// still referenced, now or by a snapshot in the history; drop the rest.
    fn sync_subtree_templates(&mut self) {
        let stale: Vec<String> = self
            .registry
            .iter()
            .filter(|t| t.kind == NodeKind::SubTree)
            .map(|t| t.name.clone())
            .filter(|name| {
                !self.documents.contains_key(name)
                    && !self
                        .documents
                        .values()
                        .any(|doc| doc.referenced_types().contains(name.as_str()))
                    && self.history_user_of(name).is_none()
            })
            .collect();
        for name in stale {
            self.registry.remove(&name);
        }
        let names: Vec<String> = self.documents.keys().cloned().collect();
        for name in names {
            if let Err(err) = self.registry.register_subtree(&name) {
                tracing::warn!(target: "btedit.session", document = %name, error = %err, "tree name shadows a model");
            }
        }
    }

    fn unused_document_name(&self) -> String {
        let base = &self.config.default_tree_name;
        if self.name_available(base) {
            return base.clone();
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{base}{n}");
            if self.name_available(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Not open, and not taken by a model other than a SubTree reference.
    fn name_available(&self, name: &str) -> bool {
        !self.documents.contains_key(name)
            && self
                .registry
                .get(name)
                .is_none_or(|template| template.kind == NodeKind::SubTree)
    }

    fn require_document(&self, name: &str) -> Result<&TreeDocument> {
        self.documents
            .get(name)
            .ok_or_else(|| Error::UnknownDocument(name.to_string()))
    }

    fn require_document_mut(&mut self, name: &str) -> Result<&mut TreeDocument> {
        self.documents
            .get_mut(name)
            .ok_or_else(|| Error::UnknownDocument(name.to_string()))
    }
}

fn add_pane_documents(
    documents: &mut BTreeMap<String, TreeDocument>,
    tab: &str,
    set: BehaviorTreeSet,
) -> Result<()> {
    let BehaviorTreeSet {
        main_tree, trees, ..
    } = set;
    for (name, tree) in trees {
        let name = if name == main_tree { tab.to_string() } else { name };
        if documents.contains_key(&name) {
            return Err(Error::DuplicateDocument(name));
        }
        documents.insert(name.clone(), TreeDocument::from_tree(name, tree));
    }
    Ok(())
}

// ============================================================================
// Shared access
// ============================================================================

/// A session behind the single session-wide lock.
#[derive(Debug, Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<Session>>,
}

impl SharedSession {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Take the lock. A poisoned lock is recovered: every session
    /// operation is all-or-nothing, so the state behind it is consistent.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.lock())
    }

    /// Drain `inbox` into the session under the lock.
    pub fn pump_status(&self, inbox: &StatusInbox) -> usize {
        self.lock().drain_status(inbox)
    }
}
