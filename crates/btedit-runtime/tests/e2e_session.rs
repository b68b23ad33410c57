#![forbid(unsafe_code)]

//! End-to-end session scenarios: load, edit, expand, merge status, undo,
//! save.
//!
//! Run:
//!   cargo test -p btedit-runtime --test e2e_session

use btedit_core::{Error, NodeKind, NodeStatus, NodeTypeTemplate, PortDirection};
use btedit_runtime::{EditorMode, Session, StatusBatch, SubtreeAction, ViewArea, ViewTransform};
use proptest::prelude::*;

// ============================================================================
// Fixtures
// ============================================================================

const EXAMPLE: &str =
    r#"<root main_tree="A"><A><Sequence id="1"><Action id="2" type="MoveTo"/></Sequence></A></root>"#;

const WITH_SUBTREE: &str = r#"<?xml version="1.0"?>
<root main_tree_to_execute="Main">
  <BehaviorTree ID="Main">
    <Sequence id="1">
      <Action id="2" type="MoveTo" goal="dock"/>
      <SubTree id="3" type="Patrol"/>
    </Sequence>
  </BehaviorTree>
  <BehaviorTree ID="Patrol">
    <Fallback id="a">
      <Condition id="b" type="IsClear"/>
      <Action id="c" type="MoveTo"/>
    </Fallback>
  </BehaviorTree>
  <TreeNodesModel>
    <Condition ID="IsClear"/>
  </TreeNodesModel>
</root>"#;

fn session() -> Session {
    let mut session = Session::new();
    session
        .add_model(
            NodeTypeTemplate::new("MoveTo", NodeKind::Action)
                .with_port("goal", PortDirection::Input)
                .with_parameter("goal", "home"),
        )
        .unwrap();
    session
}

fn ids(session: &Session, document: &str) -> Vec<String> {
    session
        .document(document)
        .unwrap()
        .tree()
        .depth_first()
        .map(|node| node.id.clone())
        .collect()
}

fn status(session: &Session, document: &str, id: &str) -> NodeStatus {
    session.document(document).unwrap().tree().get(id).unwrap().status
}

// ============================================================================
// Example scenario
// ============================================================================

#[test]
fn example_scenario() {
    let mut session = session();
    session.load_from_xml(EXAMPLE).unwrap();

    let tree = session.document("A").unwrap().tree();
    assert_eq!(tree.root_id(), Some("1"));
    assert_eq!(tree.root().unwrap().type_name, "Sequence");
    assert_eq!(tree.children("1"), ["2"]);
    assert_eq!(tree.get("2").unwrap().type_name, "MoveTo");

    let applied = session.apply_status(&StatusBatch::new("A", vec![("2".into(), NodeStatus::Running)]));
    assert_eq!(applied, 1);
    assert_eq!(status(&session, "A", "2"), NodeStatus::Running);
    assert_eq!(status(&session, "A", "1"), NodeStatus::Idle);

    assert_eq!(session.undo(), Err(Error::NothingToUndo));
    assert!(session.undo().unwrap_err().is_history_boundary());
}

// ============================================================================
// Subtrees through the session
// ============================================================================

#[test]
fn expand_collapse_is_inverse_and_undoable() {
    let mut session = session();
    session.load_from_xml(WITH_SUBTREE).unwrap();
    let baseline = session.snapshot().unwrap();

    session.expand_subtree("Main", "3").unwrap();
    assert_eq!(ids(&session, "Main"), ["1", "2", "3/a", "3/b", "3/c"]);
    assert_eq!(
        session.document("Main").unwrap().tree().get("3/c").unwrap().parameters["goal"],
        "home"
    );

    session.collapse_subtree("Main", "3").unwrap();
    assert_eq!(session.snapshot().unwrap(), baseline);

    session.undo().unwrap();
    assert!(session.document("Main").unwrap().is_expanded("3"));
    session.undo().unwrap();
    assert_eq!(session.snapshot().unwrap(), baseline);
}

#[test]
fn refresh_tracks_definition_edits_and_keeps_status() {
    let mut session = session();
    session.load_from_xml(WITH_SUBTREE).unwrap();
    session.expand_subtree("Main", "3").unwrap();
    session.apply_status(&StatusBatch::new(
        "Main",
        vec![
            ("3/b".into(), NodeStatus::Success),
            ("3/c".into(), NodeStatus::Running),
        ],
    ));

    session.remove_node("Patrol", "c").unwrap();
    session
        .insert_node("Patrol", Some("a"), 1, Some("d"), "AlwaysSuccess", [])
        .unwrap();
    let collapsed = session.refresh_expanded_subtrees().unwrap();
    assert!(collapsed.is_empty());

    assert_eq!(ids(&session, "Main"), ["1", "2", "3/a", "3/b", "3/d"]);
    assert_eq!(status(&session, "Main", "3/b"), NodeStatus::Success);
    assert_eq!(status(&session, "Main", "3/d"), NodeStatus::Idle);
}

#[test]
fn subtree_errors_leave_history_alone() {
    let mut session = session();
    session.load_from_xml(WITH_SUBTREE).unwrap();
    let depth = session.history().undo_depth();

    assert_eq!(
        session.collapse_subtree("Main", "3"),
        Err(Error::NotExpanded("3".into()))
    );
    assert_eq!(
        session.subtree("Main", "3", SubtreeAction::Change("Nowhere".into())),
        Err(Error::UnknownSubtree("Nowhere".into()))
    );
    assert!(matches!(
        session.expand_subtree("Main", "2"),
        Err(Error::Schema(_))
    ));
    assert_eq!(session.history().undo_depth(), depth);
}

#[test]
fn saved_xml_never_contains_expanded_copies() {
    let mut session = session();
    session.load_from_xml(WITH_SUBTREE).unwrap();
    let collapsed_xml = session.save_to_xml().unwrap();

    session.expand_subtree("Main", "3").unwrap();
    let xml = session.save_to_xml().unwrap();
    assert_eq!(xml, collapsed_xml);
    assert!(xml.contains(r#"<SubTree id="3" type="Patrol"/>"#));
    assert!(!xml.contains("3/a"));
}

#[test]
fn inserting_over_reserved_placeholder_id_fails() {
    let mut session = session();
    session.load_from_xml(WITH_SUBTREE).unwrap();
    session.expand_subtree("Main", "3").unwrap();
    assert_eq!(
        session.insert_node("Main", Some("1"), 0, Some("3"), "AlwaysSuccess", []),
        Err(Error::DuplicateId("3".into()))
    );
    let fresh = session
        .insert_node("Main", Some("1"), 0, None, "AlwaysSuccess", [])
        .unwrap();
    assert_ne!(fresh, "3");
}

// ============================================================================
// Status and history interplay
// ============================================================================

#[test]
fn status_survives_undo_for_surviving_ids() {
    let mut session = session();
    session.load_from_xml(EXAMPLE).unwrap();
    session
        .insert_node("A", Some("1"), 1, Some("3"), "MoveTo", [])
        .unwrap();
    session.apply_status(&StatusBatch::new(
        "A",
        vec![
            ("2".into(), NodeStatus::Failure),
            ("3".into(), NodeStatus::Running),
        ],
    ));
    let depth = session.history().undo_depth();
    assert_eq!(depth, 2);

    session.undo().unwrap();
    assert_eq!(status(&session, "A", "2"), NodeStatus::Failure);
    assert!(!session.document("A").unwrap().tree().contains("3"));
}

#[test]
fn view_changes_ride_along_with_the_next_edit() {
    let mut session = session();
    session.load_from_xml(EXAMPLE).unwrap();
    let zoomed = ViewTransform {
        scale: 1.5,
        ..ViewTransform::default()
    };
    session.set_view("A", zoomed, ViewArea::default()).unwrap();
    assert!(!session.can_undo());

    session.edit_parameters("A", "2", [("goal".to_string(), "dock".to_string())]).unwrap();
    session.undo().unwrap();
    assert_eq!(session.document("A").unwrap().view_transform.scale, 1.0);
    session.redo().unwrap();
    assert_eq!(session.document("A").unwrap().view_transform.scale, 1.5);
}

#[test]
fn replay_mode_locks_structure() {
    let mut session = session();
    session.load_from_xml(WITH_SUBTREE).unwrap();
    session.set_mode(EditorMode::Replay);
    assert_eq!(
        session.expand_subtree("Main", "3"),
        Err(Error::EditingLocked("replay"))
    );
    assert_eq!(session.clear(true), Err(Error::EditingLocked("replay")));
    session.set_mode(EditorMode::Editor);
    session.expand_subtree("Main", "3").unwrap();
}

// ============================================================================
// Status merge never changes structure
// ============================================================================

fn status_strategy() -> impl Strategy<Value = NodeStatus> {
    prop::sample::select(NodeStatus::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn status_merge_preserves_structure_and_history(
        updates in prop::collection::vec(("[123abc]|3/a|zz", status_strategy()), 0..20)
    ) {
        let mut session = session();
        session.load_from_xml(WITH_SUBTREE).unwrap();
        let before = session.snapshot().unwrap();
        let depth = session.history().undo_depth();

        session.apply_status(&StatusBatch::new("Main", updates.clone()));
        session.apply_status(&StatusBatch::new("Patrol", updates));

        prop_assert_eq!(session.snapshot().unwrap(), before);
        prop_assert_eq!(session.history().undo_depth(), depth);
    }
}
