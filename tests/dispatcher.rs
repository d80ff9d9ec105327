//! Handler registration through the node API.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{config, Note};
use netmesh::protocol::message::{Ack, Hello, Probe, ProbeReply};
use netmesh::{MeshNode, ProtocolError};
use std::sync::mpsc;

#[test]
fn test_link_control_types_are_reserved() {
    let node = MeshNode::new(config(1)).unwrap();
    assert!(matches!(
        node.register::<Hello, _>(|_, _| Ok(())),
        Err(ProtocolError::ReservedType(tag)) if tag == "HELO"
    ));
    assert!(matches!(
        node.register::<Ack, _>(|_, _| Ok(())),
        Err(ProtocolError::ReservedType(tag)) if tag == "ACK"
    ));
    assert!(node.register::<Probe, _>(|_, _| Ok(())).is_err());
    assert!(node.register::<ProbeReply, _>(|_, _| Ok(())).is_err());
}

#[test]
fn test_duplicate_registration_and_reregistration() {
    let node = MeshNode::new(config(1)).unwrap();
    node.register::<Note, _>(|_, _| Ok(())).unwrap();
    assert!(matches!(
        node.register::<Note, _>(|_, _| Ok(())),
        Err(ProtocolError::DuplicateType(tag)) if tag == "NOTE"
    ));

    node.unregister("NOTE").unwrap();
    node.unregister("NOTE").unwrap();
    node.register::<Note, _>(|_, _| Ok(())).unwrap();
    node.unregister_type::<Note>().unwrap();
}

#[tokio::test]
async fn test_handler_sees_latest_registration() {
    let node = MeshNode::new(config(1)).unwrap();
    let (tx, rx) = mpsc::channel();

    let first = tx.clone();
    node.register::<Note, _>(move |_, note| {
        first.send(format!("first {}", note.text)).unwrap();
        Ok(())
    })
    .unwrap();
    assert!(node.send(1, &Note { text: "a".into() }).await);

    node.unregister("NOTE").unwrap();
    node.register::<Note, _>(move |_, note| {
        tx.send(format!("second {}", note.text)).unwrap();
        Ok(())
    })
    .unwrap();
    assert!(node.send(1, &Note { text: "b".into() }).await);

    let seen: Vec<String> = rx.try_iter().collect();
    assert_eq!(seen, vec!["first a".to_string(), "second b".to_string()]);
}

#[tokio::test]
async fn test_failing_local_handler_reports_failure() {
    let node = MeshNode::new(config(1)).unwrap();
    node.register::<Note, _>(|_, _| Err(ProtocolError::Custom("nope".into())))
        .unwrap();
    assert!(!node.send(1, &Note::default()).await);
    // no handler at all is not a failure
    node.unregister("NOTE").unwrap();
    assert!(node.send(1, &Note::default()).await);
}
