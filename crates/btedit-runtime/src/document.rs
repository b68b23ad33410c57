#![forbid(unsafe_code)]

//! Per-tab documents.
//!
//! A [`TreeDocument`] is what one editor tab shows: a named tree, the view
//! metadata the canvas last reported, and the expansion table of the
//! subtree rewriter. The mutation methods enforce tree invariants and are
//! atomic; deciding when to take an undo snapshot is the session's job.

use std::collections::{BTreeMap, BTreeSet};

use btedit_core::{AbsBehaviorTree, Error, NodeKind, NodeModelRegistry, NodeStatus, RESERVED_ATTRIBUTES, Result};
use serde::{Deserialize, Serialize};

use crate::subtree::{ExpansionRecord, collapse_in};

/// Zoom and pan of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub scale: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            translate_x: 0.0,
            translate_y: 0.0,
        }
    }
}

/// Visible scene rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewArea {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One named, independently editable tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDocument {
    name: String,
    tree: AbsBehaviorTree,
    pub view_transform: ViewTransform,
    pub view_area: ViewArea,
    expansions: BTreeMap<String, ExpansionRecord>,
}

impl TreeDocument {
    /// A blank document.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_tree(name, AbsBehaviorTree::new())
    }

    #[must_use]
    pub fn from_tree(name: impl Into<String>, tree: AbsBehaviorTree) -> Self {
        Self {
            name: name.into(),
            tree,
            view_transform: ViewTransform::default(),
            view_area: ViewArea::default(),
            expansions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn tree(&self) -> &AbsBehaviorTree {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut AbsBehaviorTree {
        &mut self.tree
    }

    /// Expansion records keyed by placeholder id.
    #[must_use]
    pub fn expansions(&self) -> &BTreeMap<String, ExpansionRecord> {
        &self.expansions
    }

    pub(crate) fn expansions_mut(&mut self) -> &mut BTreeMap<String, ExpansionRecord> {
        &mut self.expansions
    }

    #[must_use]
    pub fn expansion(&self, placeholder: &str) -> Option<&ExpansionRecord> {
        self.expansions.get(placeholder)
    }

    #[must_use]
    pub fn is_expanded(&self, placeholder: &str) -> bool {
        self.expansions.contains_key(placeholder)
    }

    /// Whether `id` is taken, either by a live node or by the placeholder
    /// of an expanded subtree.
    #[must_use]
    pub fn is_reserved(&self, id: &str) -> bool {
        self.tree.contains(id) || self.expansions.contains_key(id)
    }

    /// A numeric id that is not reserved.
    #[must_use]
    pub fn fresh_id(&self) -> String {
        self.tree.fresh_id_with(|id| self.expansions.contains_key(id))
    }

    /// Node types referenced by this document, including the placeholders
    /// of expanded subtrees.
    #[must_use]
    pub fn referenced_types(&self) -> BTreeSet<&str> {
        self.tree
            .nodes()
            .map(|node| node.type_name.as_str())
            .chain(self.expansions.values().map(|r| r.placeholder.type_name.as_str()))
            .collect()
    }

    // ====================================================================
    // Mutation
    // ====================================================================

    /// Instantiate `type_name` as `id` under `parent` (root when `None`).
    pub fn insert_node(
        &mut self,
        registry: &NodeModelRegistry,
        parent: Option<&str>,
        position: usize,
        id: &str,
        type_name: &str,
        parameters: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        let template = registry.resolve(type_name)?;
        if id.is_empty() {
            return Err(Error::Schema("node id must not be empty".into()));
        }
        if self.is_reserved(id) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        let parameters = checked_parameters(parameters)?;
        if let Some(parent) = parent {
            self.check_container(registry, parent)?;
        }
        self.tree
            .insert(parent, position, template.instantiate(id, parameters))
    }

    /// Remove `id` with its subtree. Expansion records whose region went
    /// with it are dropped.
    pub fn remove_node(&mut self, id: &str) -> Result<AbsBehaviorTree> {
        let removed = self.tree.remove(id)?;
        self.expansions
            .retain(|_, record| !removed.contains(&record.root_id));
        Ok(removed)
    }

    pub fn move_node(
        &mut self,
        registry: &NodeModelRegistry,
        id: &str,
        new_parent: Option<&str>,
        position: usize,
    ) -> Result<()> {
        if let Some(parent) = new_parent {
            if !self.tree.contains(id) {
                return Err(Error::NotFound(id.to_string()));
            }
            self.check_container(registry, parent)?;
        }
        self.tree.move_node(id, new_parent, position)
    }

    /// Merge `updates` into the parameters of `id`.
    pub fn edit_parameters(
        &mut self,
        id: &str,
        updates: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        let updates = checked_parameters(updates)?;
        self.tree.update_parameters(id, updates)
    }

    pub fn rename_node(&mut self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return if self.tree.contains(old) {
                Ok(())
            } else {
                Err(Error::NotFound(old.to_string()))
            };
        }
        if new.is_empty() {
            return Err(Error::Schema("node id must not be empty".into()));
        }
        if self.expansions.contains_key(new) {
            return Err(Error::DuplicateId(new.to_string()));
        }
        self.tree.rename(old, new)?;
        for record in self.expansions.values_mut() {
            if record.root_id == old {
                record.root_id = new.to_string();
            }
            for host_id in record.id_map.values_mut() {
                if host_id == old {
                    *host_id = new.to_string();
                }
            }
        }
        Ok(())
    }

    pub fn set_status(&mut self, id: &str, status: NodeStatus) -> bool {
        self.tree.set_status(id, status)
    }

    pub fn set_view(&mut self, transform: ViewTransform, area: ViewArea) {
        self.view_transform = transform;
        self.view_area = area;
    }

    /// Rename every node of type `old` (SubTree references) to `new`,
    /// including collapsed placeholders.
    pub(crate) fn retarget_references(&mut self, old: &str, new: &str) -> Result<()> {
        let ids: Vec<String> = self
            .tree
            .nodes()
            .filter(|node| node.type_name == old)
            .map(|node| node.id.clone())
            .collect();
        for id in ids {
            self.tree.retype(&id, new)?;
        }
        for record in self.expansions.values_mut() {
            if record.placeholder.type_name == old {
                record.placeholder.type_name = new.to_string();
            }
            if record.subtree == old {
                record.subtree = new.to_string();
            }
        }
        Ok(())
    }

    // ====================================================================
    // Export
    // ====================================================================

    /// The tree with every expansion collapsed back to its reference.
    pub fn exported_tree(&self) -> Result<AbsBehaviorTree> {
        if self.expansions.is_empty() {
            return Ok(self.tree.clone());
        }
        let mut draft = self.clone();
        while let Some(placeholder) = draft.expansions.keys().next().cloned() {
            collapse_in(&mut draft, &placeholder)?;
        }
        Ok(draft.tree)
    }

    /// Snapshot bytes. Node status is not part of them.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Snapshot(e.to_string()))
    }

    /// Inverse of [`to_bytes`](Self::to_bytes); the decoded document is
    /// checked before it is returned.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc: Self = serde_json::from_slice(bytes).map_err(|e| Error::Snapshot(e.to_string()))?;
        doc.validate().map_err(|e| Error::Snapshot(e.to_string()))?;
        Ok(doc)
    }

    fn validate(&self) -> Result<()> {
        self.tree.validate()?;
        for (placeholder, record) in &self.expansions {
            if record.placeholder.id != *placeholder {
                return Err(Error::Schema(format!(
                    "expansion `{placeholder}` records placeholder `{}`",
                    record.placeholder.id
                )));
            }
            if self.tree.contains(placeholder) {
                return Err(Error::DuplicateId(placeholder.clone()));
            }
            if !self.tree.contains(&record.root_id) {
                return Err(Error::NotFound(record.root_id.clone()));
            }
        }
        Ok(())
    }

    fn check_container(&self, registry: &NodeModelRegistry, parent: &str) -> Result<()> {
        let node = self
            .tree
            .get(parent)
            .ok_or_else(|| Error::NotFound(parent.to_string()))?;
        match registry.get(&node.type_name) {
            Some(template) if template.kind.is_leaf() => Err(Error::Schema(format!(
                "{} node `{parent}` cannot have children",
                template.kind
            ))),
            _ => Ok(()),
        }
    }
}

fn checked_parameters(
    parameters: impl IntoIterator<Item = (String, String)>,
) -> Result<Vec<(String, String)>> {
    let parameters: Vec<(String, String)> = parameters.into_iter().collect();
    if let Some((name, _)) = parameters
        .iter()
        .find(|(name, _)| name.is_empty() || RESERVED_ATTRIBUTES.contains(&name.as_str()))
    {
        return Err(Error::Schema(format!("`{name}` is not a valid parameter name")));
    }
    Ok(parameters)
}
