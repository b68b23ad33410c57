#![forbid(unsafe_code)]

//! Subtree expand / collapse / change / refresh.
//!
//! A SubTree reference is a leaf whose type names another tree. Expanding
//! it replaces the leaf in place with a copy of that tree's definition.
//! Copied nodes get host ids of the form `<placeholder>/<definition id>`
//! (suffixed `#2`, `#3`, ... on collision), and the document keeps an
//! [`ExpansionRecord`] under the placeholder id so that collapse can put
//! the original leaf back exactly where it was.
//!
//! ```text
//!   Sequence 1                    Sequence 1
//!   ├── Action 2      expand 3    ├── Action 2
//!   └── SubTree 3   ─────────►    └── Fallback 3/a
//!                                     ├── Action 3/b
//!                                     └── Action 3/c
//! ```
//!
//! While expanded, the placeholder id is not in the tree but stays
//! reserved: no other node may take it.
//!
//! Every operation works on a copy of the document and commits only on
//! success.

use std::collections::{BTreeMap, BTreeSet};

use btedit_core::{AbsBehaviorTree, Error, NodeKind, NodeModelRegistry, NodeStatus, Result, TreeNode};
use serde::{Deserialize, Serialize};

use crate::document::TreeDocument;

// ============================================================================
// Definitions
// ============================================================================

/// Source of subtree definitions, keyed by tree name.
pub trait SubtreeLibrary {
    fn definition(&self, name: &str) -> Option<&AbsBehaviorTree>;
}

impl SubtreeLibrary for BTreeMap<String, AbsBehaviorTree> {
    fn definition(&self, name: &str) -> Option<&AbsBehaviorTree> {
        self.get(name)
    }
}

/// Bookkeeping for one expanded reference, keyed by placeholder id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionRecord {
    /// The collapsed reference node, detached.
    pub placeholder: TreeNode,
    /// Name of the tree the copy was taken from.
    pub subtree: String,
    /// Host id of the copy's root.
    pub root_id: String,
    /// Definition id -> host id.
    pub id_map: BTreeMap<String, String>,
}

/// What to do with a SubTree reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtreeAction {
    Expand,
    Collapse,
    /// Re-point the reference at the named tree.
    Change(String),
    Refresh,
}

// ============================================================================
// Rewriter
// ============================================================================

/// Applies [`SubtreeAction`]s to a [`TreeDocument`].
pub struct SubtreeRewriter<'a, L: SubtreeLibrary + ?Sized> {
    registry: &'a NodeModelRegistry,
    library: &'a L,
}

impl<'a, L: SubtreeLibrary + ?Sized> SubtreeRewriter<'a, L> {
    #[must_use]
    pub fn new(registry: &'a NodeModelRegistry, library: &'a L) -> Self {
        Self { registry, library }
    }

    pub fn apply(&self, doc: &mut TreeDocument, id: &str, action: &SubtreeAction) -> Result<()> {
        match action {
            SubtreeAction::Expand => self.expand(doc, id),
            SubtreeAction::Collapse => self.collapse(doc, id),
            SubtreeAction::Change(target) => self.change(doc, id, target),
            SubtreeAction::Refresh => self.refresh(doc, id),
        }
    }

    /// Replace reference `id` with a copy of the tree it names.
    pub fn expand(&self, doc: &mut TreeDocument, id: &str) -> Result<()> {
        let mut draft = doc.clone();
        let record = self.expand_in(&mut draft, id)?;
        tracing::debug!(
            target: "btedit.subtree",
            document = %doc.name(),
            placeholder = id,
            subtree = %record.subtree,
            nodes = record.id_map.len(),
            "expanded subtree"
        );
        *doc = draft;
        Ok(())
    }

    /// Put the placeholder of expansion `id` back in place of its copy.
    pub fn collapse(&self, doc: &mut TreeDocument, id: &str) -> Result<()> {
        let mut draft = doc.clone();
        collapse_in(&mut draft, id)?;
        tracing::debug!(
            target: "btedit.subtree",
            document = %doc.name(),
            placeholder = id,
            "collapsed subtree"
        );
        *doc = draft;
        Ok(())
    }

    /// Point reference `id` at `target`. An expanded reference is
    /// collapsed first and expanded again against the new tree; a
    /// collapsed one stays collapsed.
    pub fn change(&self, doc: &mut TreeDocument, id: &str, target: &str) -> Result<()> {
        let mut draft = doc.clone();
        let was_expanded = draft.is_expanded(id);
        if was_expanded {
            collapse_in(&mut draft, id)?;
        }
        self.reference_template(&draft, id)?;
        let definition = self
            .library
            .definition(target)
            .ok_or_else(|| Error::UnknownSubtree(target.to_string()))?;
        match self.registry.get(target) {
            Some(template) if template.kind == NodeKind::SubTree => {}
            Some(template) => {
                return Err(Error::Schema(format!(
                    "`{target}` is a {} model, not a subtree",
                    template.kind
                )));
            }
            None => return Err(Error::UnknownSubtree(target.to_string())),
        }
        if definition.is_empty() {
            return Err(Error::Schema(format!("subtree `{target}` is empty")));
        }
        draft.tree_mut().retype(id, target)?;
        if was_expanded {
            self.expand_in(&mut draft, id)?;
        }
        tracing::debug!(
            target: "btedit.subtree",
            document = %doc.name(),
            placeholder = id,
            subtree = target,
            expanded = was_expanded,
            "changed subtree reference"
        );
        *doc = draft;
        Ok(())
    }

    /// Re-expand `id` against the current definition. Nodes whose host id
    /// survives keep their status; new nodes start out idle.
    pub fn refresh(&self, doc: &mut TreeDocument, id: &str) -> Result<()> {
        let mut draft = doc.clone();
        let statuses = region_statuses(&draft, id)?;
        collapse_in(&mut draft, id)?;
        let record = self.expand_in(&mut draft, id)?;
        let mut carried = 0usize;
        for host_id in record.id_map.values() {
            if let Some(status) = statuses.get(host_id) {
                draft.tree_mut().set_status(host_id, *status);
                carried += 1;
            }
        }
        tracing::debug!(
            target: "btedit.subtree",
            document = %doc.name(),
            placeholder = id,
            subtree = %record.subtree,
            carried,
            "refreshed subtree"
        );
        *doc = draft;
        Ok(())
    }

    /// Refresh every top-level expansion of `doc`. References whose
    /// definition has disappeared are collapsed and reported back.
    pub fn refresh_all(&self, doc: &mut TreeDocument) -> Result<Vec<String>> {
        let mut draft = doc.clone();
        let mut collapsed = Vec::new();
        for placeholder in top_level_expansions(&draft) {
            let subtree = match draft.expansion(&placeholder) {
                Some(record) => record.subtree.clone(),
                None => continue,
            };
            if self.library.definition(&subtree).is_some_and(|d| !d.is_empty()) {
                self.refresh(&mut draft, &placeholder)?;
            } else {
                tracing::warn!(
                    target: "btedit.subtree",
                    document = %doc.name(),
                    placeholder = %placeholder,
                    subtree = %subtree,
                    "definition gone; collapsing instead of refreshing"
                );
                collapse_in(&mut draft, &placeholder)?;
                collapsed.push(placeholder);
            }
        }
        *doc = draft;
        Ok(collapsed)
    }

    // ====================================================================
    // Internal
    // ====================================================================

    fn reference_template(&self, doc: &TreeDocument, id: &str) -> Result<String> {
        let node = doc
            .tree()
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        match self.registry.get(&node.type_name) {
            Some(template) if template.kind == NodeKind::SubTree => Ok(template.name.clone()),
            _ => Err(Error::Schema(format!(
                "node `{id}` of type `{}` is not a SubTree reference",
                node.type_name
            ))),
        }
    }

    fn expand_in(&self, doc: &mut TreeDocument, id: &str) -> Result<ExpansionRecord> {
        if doc.is_expanded(id) {
            return Err(Error::Schema(format!("subtree `{id}` is already expanded")));
        }
        let subtree = self.reference_template(doc, id)?;
        let definition = self
            .library
            .definition(&subtree)
            .ok_or_else(|| Error::UnknownSubtree(subtree.clone()))?;
        let Some(definition_root) = definition.root_id() else {
            return Err(Error::Schema(format!("subtree `{subtree}` is empty")));
        };

        let mut id_map = BTreeMap::new();
        let mut taken = BTreeSet::new();
        for node in definition.depth_first() {
            let host_id = unique_host_id(doc, &taken, id, &node.id);
            taken.insert(host_id.clone());
            id_map.insert(node.id.clone(), host_id);
        }

        let mut copy = AbsBehaviorTree::new();
        for node in definition.depth_first() {
            let host_parent = node.parent().and_then(|p| id_map.get(p)).map(String::as_str);
            let host_id = id_map.get(&node.id).cloned().unwrap_or_default();
            copy.insert(
                host_parent,
                usize::MAX,
                TreeNode::new(host_id, node.type_name.clone(), node.parameters.clone()),
            )?;
        }
        let root_id = id_map
            .get(definition_root)
            .cloned()
            .ok_or_else(|| Error::Schema(format!("subtree `{subtree}` has no root")))?;

        let (parent, index) = match doc.tree().position_of(id) {
            Some((parent, index)) => (parent.map(str::to_owned), index),
            None => return Err(Error::NotFound(id.to_string())),
        };
        let removed = doc.tree_mut().remove(id)?;
        if removed.len() != 1 {
            return Err(Error::Schema(format!(
                "SubTree reference `{id}` cannot have children"
            )));
        }
        let placeholder = removed
            .get(id)
            .map(TreeNode::detached)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        doc.tree_mut().graft(parent.as_deref(), index, copy)?;

        let record = ExpansionRecord {
            placeholder,
            subtree,
            root_id,
            id_map,
        };
        doc.expansions_mut().insert(id.to_string(), record.clone());
        Ok(record)
    }
}

/// Collapse expansion `placeholder` in place. Records of expansions nested
/// inside the region are dropped along with it.
pub(crate) fn collapse_in(doc: &mut TreeDocument, placeholder: &str) -> Result<()> {
    let Some(record) = doc.expansion(placeholder).cloned() else {
        return Err(if doc.tree().contains(placeholder) {
            Error::NotExpanded(placeholder.to_string())
        } else {
            Error::NotFound(placeholder.to_string())
        });
    };
    let (parent, index) = match doc.tree().position_of(&record.root_id) {
        Some((parent, index)) => (parent.map(str::to_owned), index),
        None => return Err(Error::NotFound(record.root_id)),
    };
    let region = doc.tree_mut().remove(&record.root_id)?;
    doc.expansions_mut()
        .retain(|key, r| key != placeholder && !region.contains(&r.root_id));
    doc.tree_mut()
        .insert(parent.as_deref(), index, record.placeholder)?;
    Ok(())
}

fn region_statuses(doc: &TreeDocument, placeholder: &str) -> Result<BTreeMap<String, NodeStatus>> {
    let record = doc.expansion(placeholder).ok_or_else(|| {
        if doc.tree().contains(placeholder) {
            Error::NotExpanded(placeholder.to_string())
        } else {
            Error::NotFound(placeholder.to_string())
        }
    })?;
    Ok(doc
        .tree()
        .descendants(&record.root_id)
        .into_iter()
        .filter_map(|id| doc.tree().get(&id).map(|node| (id, node.status)))
        .collect())
}

/// Placeholders whose region is not inside another expansion's region.
fn top_level_expansions(doc: &TreeDocument) -> Vec<String> {
    let roots: Vec<&str> = doc.expansions().values().map(|r| r.root_id.as_str()).collect();
    doc.expansions()
        .iter()
        .filter(|(_, record)| {
            let outer_parent = doc.tree().parent(&record.root_id);
            !roots.iter().any(|other| {
                *other != record.root_id
                    && outer_parent.is_some_and(|p| doc.tree().is_within(p, other))
            })
        })
        .map(|(key, _)| key.clone())
        .collect()
}

fn unique_host_id(doc: &TreeDocument, taken: &BTreeSet<String>, placeholder: &str, definition_id: &str) -> String {
    let base = format!("{placeholder}/{definition_id}");
    let free = |candidate: &str| {
        candidate != placeholder && !doc.is_reserved(candidate) && !taken.contains(candidate)
    };
    if free(&base) {
        return base;
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{base}#{n}");
        if free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btedit_core::NodeTypeTemplate;

    fn registry() -> NodeModelRegistry {
        let mut registry = NodeModelRegistry::with_builtins();
        registry
            .register(NodeTypeTemplate::new("Say", NodeKind::Action).with_parameter("message", ""))
            .unwrap();
        registry.register_subtree("Greet").unwrap();
        registry.register_subtree("Wave").unwrap();
        registry.register_subtree("Missing").unwrap();
        registry
    }

    fn library(registry: &NodeModelRegistry) -> BTreeMap<String, AbsBehaviorTree> {
        let say = registry.get("Say").unwrap();
        let mut greet = AbsBehaviorTree::with_root(registry.get("Sequence").unwrap().instantiate("a", []));
        greet
            .insert(Some("a"), 0, say.instantiate("b", [("message".to_string(), "hi".to_string())]))
            .unwrap();
        greet
            .insert(Some("a"), 1, say.instantiate("c", [("message".to_string(), "bye".to_string())]))
            .unwrap();
        let wave = AbsBehaviorTree::with_root(say.instantiate("w", [("message".to_string(), "o/".to_string())]));

        let mut lib = BTreeMap::new();
        lib.insert("Greet".to_string(), greet);
        lib.insert("Wave".to_string(), wave);
        lib.insert("Empty".to_string(), AbsBehaviorTree::new());
        lib
    }

    /// 1 Sequence
    /// ├── 2 Say
    /// └── 3 SubTree(Greet)
    fn host(registry: &NodeModelRegistry) -> TreeDocument {
        let mut doc = TreeDocument::new("Main");
        doc.insert_node(registry, None, 0, "1", "Sequence", []).unwrap();
        doc.insert_node(registry, Some("1"), 0, "2", "Say", []).unwrap();
        doc.insert_node(registry, Some("1"), 1, "3", "Greet", []).unwrap();
        doc
    }

    fn order(doc: &TreeDocument) -> Vec<String> {
        doc.tree().depth_first().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn expand_replaces_reference_with_renamed_copy() {
        let registry = registry();
        let lib = library(&registry);
        let rewriter = SubtreeRewriter::new(&registry, &lib);
        let mut doc = host(&registry);

        rewriter.expand(&mut doc, "3").unwrap();
        assert_eq!(order(&doc), ["1", "2", "3/a", "3/b", "3/c"]);
        assert_eq!(doc.tree().get("3/b").unwrap().parameters["message"], "hi");
        assert!(doc.is_expanded("3"));
        assert!(doc.is_reserved("3"));
        assert!(!doc.tree().contains("3"));
        let record = doc.expansion("3").unwrap();
        assert_eq!(record.subtree, "Greet");
        assert_eq!(record.root_id, "3/a");
        assert_eq!(record.id_map["c"], "3/c");
        assert!(doc.tree().validate().is_ok());
    }

    #[test]
    fn collapse_restores_placeholder_exactly() {
        let registry = registry();
        let lib = library(&registry);
        let rewriter = SubtreeRewriter::new(&registry, &lib);
        let mut doc = host(&registry);
        doc.tree_mut().set_status("3", NodeStatus::Success);
        let before = doc.clone();

        rewriter.expand(&mut doc, "3").unwrap();
        rewriter.collapse(&mut doc, "3").unwrap();
        assert_eq!(doc, before);
        assert_eq!(doc.tree().get("3").unwrap().status, NodeStatus::Success);
    }

    #[test]
    fn expansion_ids_avoid_collisions() {
        let registry = registry();
        let lib = library(&registry);
        let rewriter = SubtreeRewriter::new(&registry, &lib);
        let mut doc = host(&registry);
        doc.insert_node(&registry, Some("1"), 0, "3/b", "Say", []).unwrap();

        rewriter.expand(&mut doc, "3").unwrap();
        assert_eq!(doc.expansion("3").unwrap().id_map["b"], "3/b#2");
        assert!(doc.tree().contains("3/b"));
        assert!(doc.tree().contains("3/b#2"));
    }

    #[test]
    fn errors_leave_document_untouched() {
        let registry = registry();
        let lib = library(&registry);
        let rewriter = SubtreeRewriter::new(&registry, &lib);
        let mut doc = host(&registry);
        doc.insert_node(&registry, Some("1"), 2, "4", "Missing", []).unwrap();
        let before = doc.clone();

        assert_eq!(rewriter.expand(&mut doc, "9"), Err(Error::NotFound("9".into())));
        assert!(matches!(rewriter.expand(&mut doc, "2"), Err(Error::Schema(_))));
        assert_eq!(
            rewriter.expand(&mut doc, "4"),
            Err(Error::UnknownSubtree("Missing".into()))
        );
        assert_eq!(rewriter.collapse(&mut doc, "3"), Err(Error::NotExpanded("3".into())));
        assert_eq!(rewriter.refresh(&mut doc, "3"), Err(Error::NotExpanded("3".into())));
        assert_eq!(
            rewriter.change(&mut doc, "3", "Nowhere"),
            Err(Error::UnknownSubtree("Nowhere".into()))
        );
        assert_eq!(doc, before);
    }

    #[test]
    fn change_reexpands_against_new_target() {
        let registry = registry();
        let lib = library(&registry);
        let rewriter = SubtreeRewriter::new(&registry, &lib);
        let mut doc = host(&registry);

        rewriter.expand(&mut doc, "3").unwrap();
        rewriter.apply(&mut doc, "3", &SubtreeAction::Change("Wave".into())).unwrap();
        assert_eq!(order(&doc), ["1", "2", "3/w"]);
        assert_eq!(doc.expansion("3").unwrap().subtree, "Wave");

        rewriter.collapse(&mut doc, "3").unwrap();
        assert_eq!(doc.tree().get("3").unwrap().type_name, "Wave");
    }

    #[test]
    fn change_on_collapsed_reference_only_retypes() {
        let registry = registry();
        let lib = library(&registry);
        let rewriter = SubtreeRewriter::new(&registry, &lib);
        let mut doc = host(&registry);

        rewriter.change(&mut doc, "3", "Wave").unwrap();
        assert_eq!(doc.tree().get("3").unwrap().type_name, "Wave");
        assert!(!doc.is_expanded("3"));
    }

    #[test]
    fn refresh_keeps_status_of_surviving_ids() {
        let registry = registry();
        let mut lib = library(&registry);
        let rewriter_lib = lib.clone();
        let rewriter = SubtreeRewriter::new(&registry, &rewriter_lib);
        let mut doc = host(&registry);
        rewriter.expand(&mut doc, "3").unwrap();
        doc.tree_mut().set_status("3/b", NodeStatus::Running);
        doc.tree_mut().set_status("3/c", NodeStatus::Failure);

        let greet = lib.get_mut("Greet").unwrap();
        greet.remove("c").unwrap();
        greet
            .insert(Some("a"), 1, registry.get("Say").unwrap().instantiate("d", []))
            .unwrap();
        let rewriter = SubtreeRewriter::new(&registry, &lib);
        rewriter.refresh(&mut doc, "3").unwrap();

        assert_eq!(order(&doc), ["1", "2", "3/a", "3/b", "3/d"]);
        assert_eq!(doc.tree().get("3/b").unwrap().status, NodeStatus::Running);
        assert_eq!(doc.tree().get("3/d").unwrap().status, NodeStatus::Idle);
    }

    #[test]
    fn collapsing_outer_discards_nested_records() {
        let mut registry = registry();
        registry.register_subtree("Outer").unwrap();
        let mut lib = library(&registry);
        let mut outer = AbsBehaviorTree::with_root(registry.get("Sequence").unwrap().instantiate("o", []));
        outer
            .insert(Some("o"), 0, registry.get("Greet").unwrap().instantiate("g", []))
            .unwrap();
        lib.insert("Outer".to_string(), outer);
        let rewriter = SubtreeRewriter::new(&registry, &lib);

        let mut doc = host(&registry);
        doc.insert_node(&registry, Some("1"), 2, "4", "Outer", []).unwrap();
        let before = doc.clone();
        rewriter.expand(&mut doc, "4").unwrap();
        rewriter.expand(&mut doc, "4/g").unwrap();
        assert!(doc.tree().contains("4/g/b"));
        assert_eq!(top_level_expansions(&doc), ["4"]);

        rewriter.collapse(&mut doc, "4").unwrap();
        assert!(!doc.is_expanded("4/g"));
        assert_eq!(doc, before);
    }

    #[test]
    fn refresh_all_collapses_orphaned_expansions() {
        let registry = registry();
        let mut lib = library(&registry);
        let rewriter_lib = lib.clone();
        let mut doc = host(&registry);
        SubtreeRewriter::new(&registry, &rewriter_lib).expand(&mut doc, "3").unwrap();

        lib.remove("Greet");
        let collapsed = SubtreeRewriter::new(&registry, &lib).refresh_all(&mut doc).unwrap();
        assert_eq!(collapsed, ["3"]);
        assert!(doc.tree().contains("3"));
        assert!(doc.expansions().is_empty());
    }
}
