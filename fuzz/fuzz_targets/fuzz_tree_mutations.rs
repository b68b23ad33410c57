#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use btedit_core::{AbsBehaviorTree, NodeStatus, TreeNode};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Insert { parent: u8, position: u8 },
    Remove { node: u8 },
    Move { node: u8, parent: u8, position: u8 },
    Rename { node: u8, to: u8 },
    Status { node: u8, running: bool },
}

/// Map a fuzzer byte onto an existing id, if any.
fn pick(tree: &AbsBehaviorTree, n: u8) -> Option<String> {
    let ids: Vec<&str> = tree.ids().collect();
    if ids.is_empty() {
        return None;
    }
    Some(ids[n as usize % ids.len()].to_string())
}

fuzz_target!(|ops: Vec<Op>| {
    let mut tree = AbsBehaviorTree::new();
    for op in ops.into_iter().take(256) {
        // Errors are expected; a rejected op must leave a valid tree.
        let _ = match op {
            Op::Insert { parent, position } => {
                let id = tree.fresh_id();
                let parent = pick(&tree, parent);
                let node = TreeNode::new(id, "Sequence", BTreeMap::new());
                tree.insert(parent.as_deref(), position as usize, node)
            }
            Op::Remove { node } => match pick(&tree, node) {
                Some(id) => tree.remove(&id).map(|_| ()),
                None => Ok(()),
            },
            Op::Move { node, parent, position } => match (pick(&tree, node), pick(&tree, parent)) {
                (Some(id), Some(parent)) => tree.move_node(&id, Some(&parent), position as usize),
                _ => Ok(()),
            },
            Op::Rename { node, to } => match pick(&tree, node) {
                Some(id) => tree.rename(&id, &format!("n{to}")),
                None => Ok(()),
            },
            Op::Status { node, running } => {
                if let Some(id) = pick(&tree, node) {
                    let status = if running { NodeStatus::Running } else { NodeStatus::Idle };
                    tree.set_status(&id, status);
                }
                Ok(())
            }
        };
        tree.validate().expect("tree invariants broken");
        assert_eq!(tree.depth_first().count(), tree.len(), "unreachable nodes");
    }
});
