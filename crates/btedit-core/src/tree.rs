#![forbid(unsafe_code)]

//! Abstract, toolkit-independent behavior tree.
//!
//! [`AbsBehaviorTree`] stores nodes by id together with explicit parent and
//! ordered child links. Child order is execution order.
//!
//! # Invariants
//!
//! 1. A non-empty tree has exactly one root; an empty tree has none.
//! 2. Every child id resolves to exactly one node and every non-root node
//!    has exactly one parent, whose child list contains it once.
//! 3. Every node is reachable from the root, so there are no cycles.
//!
//! Every mutating method either succeeds with the invariants intact or
//! returns an error with the tree unchanged.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::status::NodeStatus;

/// A node of an [`AbsBehaviorTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub type_name: String,
    pub parameters: BTreeMap<String, String>,
    /// Transient; excluded from serialized forms.
    #[serde(skip)]
    pub status: NodeStatus,
    children: Vec<String>,
    parent: Option<String>,
}

impl TreeNode {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            parameters,
            status: NodeStatus::Idle,
            children: Vec::new(),
            parent: None,
        }
    }

    #[must_use]
    pub fn children(&self) -> &[String] {
        &self.children
    }

    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Same id, type and parameters; status and links are ignored.
    #[must_use]
    pub fn same_content(&self, other: &TreeNode) -> bool {
        self.id == other.id && self.type_name == other.type_name && self.parameters == other.parameters
    }

    /// A copy of this node detached from any tree.
    #[must_use]
    pub fn detached(&self) -> TreeNode {
        TreeNode {
            children: Vec::new(),
            parent: None,
            ..self.clone()
        }
    }
}

/// A single rooted behavior tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsBehaviorTree {
    root: Option<String>,
    nodes: BTreeMap<String, TreeNode>,
}

impl AbsBehaviorTree {
    /// An empty tree (the state of a freshly opened blank tab).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree consisting of `root` alone.
    #[must_use]
    pub fn with_root(root: TreeNode) -> Self {
        let root = root.detached();
        let mut nodes = BTreeMap::new();
        let id = root.id.clone();
        nodes.insert(id.clone(), root);
        Self {
            root: Some(id),
            nodes,
        }
    }

    // ====================================================================
    // Query
    // ====================================================================

    #[must_use]
    pub fn root_id(&self) -> Option<&str> {
        self.root.as_deref()
    }

    #[must_use]
    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_deref().and_then(|id| self.nodes.get(id))
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ordered child ids of `id`; empty when `id` is unknown.
    #[must_use]
    pub fn children(&self, id: &str) -> &[String] {
        match self.nodes.get(id) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    #[must_use]
    pub fn parent(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).and_then(|node| node.parent.as_deref())
    }

    /// Parent id (`None` for the root) and index among siblings.
    #[must_use]
    pub fn position_of(&self, id: &str) -> Option<(Option<&str>, usize)> {
        let node = self.nodes.get(id)?;
        match node.parent.as_deref() {
            None => Some((None, 0)),
            Some(parent) => {
                let index = self.children(parent).iter().position(|c| c == id)?;
                Some((Some(parent), index))
            }
        }
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Canonical traversal: pre-order, children in stored order.
    #[must_use]
    pub fn depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            tree: self,
            stack: self.root.as_deref().into_iter().collect(),
        }
    }

    /// `id` and all of its descendants, in canonical order.
    #[must_use]
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        if !self.contains(id) {
            return out;
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current.to_string());
            stack.extend(self.children(current).iter().rev().map(String::as_str));
        }
        out
    }

    /// Whether `ancestor` lies on the path from `id` up to the root
    /// (a node is its own ancestor).
    #[must_use]
    pub fn is_within(&self, id: &str, ancestor: &str) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Current status of every node.
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<String, NodeStatus> {
        self.nodes
            .values()
            .map(|node| (node.id.clone(), node.status))
            .collect()
    }

    /// First numeric id not used by this tree and not rejected by
    /// `is_reserved`.
    #[must_use]
    pub fn fresh_id_with(&self, is_reserved: impl Fn(&str) -> bool) -> String {
        let mut n = self.nodes.len() + 1;
        loop {
            let candidate = n.to_string();
            if !self.contains(&candidate) && !is_reserved(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    #[must_use]
    pub fn fresh_id(&self) -> String {
        self.fresh_id_with(|_| false)
    }

    /// Equality that ignores node status.
    #[must_use]
    pub fn same_structure(&self, other: &AbsBehaviorTree) -> bool {
        self.root == other.root
            && self.nodes.len() == other.nodes.len()
            && self.nodes.iter().zip(other.nodes.iter()).all(|((ka, a), (kb, b))| {
                ka == kb && a.same_content(b) && a.children == b.children && a.parent == b.parent
            })
    }

    // ====================================================================
    // Status (never structural)
    // ====================================================================

    /// Set the status of `id`. Returns `false` when the id is unknown.
    pub fn set_status(&mut self, id: &str, status: NodeStatus) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.status = status;
                true
            }
            None => false,
        }
    }

    pub fn reset_statuses(&mut self) {
        for node in self.nodes.values_mut() {
            node.status = NodeStatus::Idle;
        }
    }

    // ====================================================================
    // Structural mutation
    // ====================================================================

    /// Insert a detached node under `parent` (or as root when `None`) at
    /// `position` among its siblings, clamped to the sibling count.
    pub fn insert(&mut self, parent: Option<&str>, position: usize, node: TreeNode) -> Result<()> {
        self.check_attach_point(parent)?;
        if self.contains(&node.id) {
            return Err(Error::DuplicateId(node.id));
        }
        let mut node = node.detached();
        node.parent = parent.map(str::to_owned);
        self.link(parent, position, &node.id);
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Attach every node of `subtree` under `parent` at `position`.
    /// Grafting an empty tree is a no-op.
    pub fn graft(&mut self, parent: Option<&str>, position: usize, subtree: AbsBehaviorTree) -> Result<()> {
        let Some(sub_root) = subtree.root.clone() else {
            return Ok(());
        };
        self.check_attach_point(parent)?;
        if let Some(clash) = subtree.ids().find(|id| self.contains(id)) {
            return Err(Error::DuplicateId(clash.to_string()));
        }
        self.link(parent, position, &sub_root);
        for (id, mut node) in subtree.nodes {
            if id == sub_root {
                node.parent = parent.map(str::to_owned);
            }
            self.nodes.insert(id, node);
        }
        Ok(())
    }

    /// Remove `id` and its whole subtree, returning it as a tree of its own.
    pub fn remove(&mut self, id: &str) -> Result<AbsBehaviorTree> {
        if !self.contains(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        self.unlink(id);
        let mut removed = BTreeMap::new();
        for member in self.descendants(id) {
            if let Some(node) = self.nodes.remove(&member) {
                removed.insert(member, node);
            }
        }
        if let Some(root) = removed.get_mut(id) {
            root.parent = None;
        }
        Ok(AbsBehaviorTree {
            root: Some(id.to_string()),
            nodes: removed,
        })
    }

    /// Re-parent `id` under `new_parent` at `position` (index after the
    /// node has been taken out of its old sibling list).
    pub fn move_node(&mut self, id: &str, new_parent: Option<&str>, position: usize) -> Result<()> {
        if !self.contains(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        let Some(parent) = new_parent else {
            return if self.root.as_deref() == Some(id) {
                Ok(())
            } else {
                self.check_attach_point(None)
            };
        };
        if !self.contains(parent) {
            return Err(Error::NotFound(parent.to_string()));
        }
        if self.is_within(parent, id) {
            return Err(Error::Cycle {
                node: id.to_string(),
                parent: parent.to_string(),
            });
        }
        self.unlink(id);
        self.link(Some(parent), position, id);
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = Some(parent.to_string());
        }
        Ok(())
    }

    /// Merge `updates` into the parameters of `id`.
    pub fn update_parameters(
        &mut self,
        id: &str,
        updates: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        node.parameters.extend(updates);
        Ok(())
    }

    /// Change the id of a node, keeping its position and links.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if !self.contains(old) {
            return Err(Error::NotFound(old.to_string()));
        }
        if old == new {
            return Ok(());
        }
        if self.contains(new) {
            return Err(Error::DuplicateId(new.to_string()));
        }
        let Some(mut node) = self.nodes.remove(old) else {
            return Err(Error::NotFound(old.to_string()));
        };
        node.id = new.to_string();
        match node.parent.as_deref() {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(parent) {
                    for child in &mut parent.children {
                        if child == old {
                            *child = new.to_string();
                        }
                    }
                }
            }
            None => self.root = Some(new.to_string()),
        }
        for child in &node.children {
            if let Some(child) = self.nodes.get_mut(child) {
                child.parent = Some(new.to_string());
            }
        }
        self.nodes.insert(new.to_string(), node);
        Ok(())
    }

    /// Point `id` at a different node type.
    pub fn retype(&mut self, id: &str, type_name: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        node.type_name = type_name.to_string();
        Ok(())
    }

    // ====================================================================
    // Validation
    // ====================================================================

    /// Check every structural invariant. Used on trees that did not come
    /// out of this module's mutators (deserialized snapshots).
    pub fn validate(&self) -> Result<()> {
        for (key, node) in &self.nodes {
            if *key != node.id {
                return Err(Error::Schema(format!("node keyed `{key}` carries id `{}`", node.id)));
            }
        }
        let Some(root) = self.root.as_deref() else {
            return if self.nodes.is_empty() {
                Ok(())
            } else {
                Err(Error::Schema("tree has nodes but no root".into()))
            };
        };
        match self.nodes.get(root) {
            Some(node) if node.parent.is_none() => {}
            Some(_) => return Err(Error::Schema(format!("root `{root}` has a parent"))),
            None => return Err(Error::Schema(format!("root `{root}` does not exist"))),
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                return Err(Error::Schema(format!("node `{current}` is reachable twice")));
            }
            for child in self.children(current) {
                match self.nodes.get(child) {
                    Some(node) if node.parent.as_deref() == Some(current) => stack.push(child),
                    Some(_) => {
                        return Err(Error::Schema(format!(
                            "node `{child}` does not point back at parent `{current}`"
                        )));
                    }
                    None => {
                        return Err(Error::Schema(format!(
                            "node `{current}` references missing child `{child}`"
                        )));
                    }
                }
            }
        }
        if seen.len() != self.nodes.len() {
            return Err(Error::Schema(format!(
                "{} node(s) are unreachable from root `{root}`",
                self.nodes.len() - seen.len()
            )));
        }
        Ok(())
    }

    // ====================================================================
    // Internal
    // ====================================================================

    fn check_attach_point(&self, parent: Option<&str>) -> Result<()> {
        match parent {
            Some(parent) if !self.contains(parent) => Err(Error::NotFound(parent.to_string())),
            Some(_) => Ok(()),
            None => match self.root.as_deref() {
                Some(root) => Err(Error::Schema(format!("tree already has root `{root}`"))),
                None => Ok(()),
            },
        }
    }

    fn link(&mut self, parent: Option<&str>, position: usize, id: &str) {
        match parent {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(parent) {
                    let index = position.min(parent.children.len());
                    parent.children.insert(index, id.to_string());
                }
            }
            None => self.root = Some(id.to_string()),
        }
    }

    fn unlink(&mut self, id: &str) {
        match self.parent(id).map(str::to_owned) {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.children.retain(|child| child != id);
                }
            }
            None => self.root = None,
        }
    }
}

/// Pre-order iterator returned by [`AbsBehaviorTree::depth_first`].
#[derive(Debug)]
pub struct DepthFirst<'a> {
    tree: &'a AbsBehaviorTree,
    stack: Vec<&'a str>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.nodes.get(id)?;
        self.stack
            .extend(node.children.iter().rev().map(String::as_str));
        Some(node)
    }
}
