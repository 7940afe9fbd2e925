//! Link attach/detach multiplexing and handle allocation.

use super::support::{attached_sender, mapped_session, peer_attach, test_options};
use crate::{
    error::ErrorCondition,
    link::{IncomingLink, LinkOptions, LinkState},
    performative::{Detach, Performative, Role},
    session::{SessionOptions, SessionState},
};

#[tokio::test]
async fn first_link_is_assigned_handle_one() {
    let (conn, session) = mapped_session(test_options(), 100).await;
    let link = session
        .create_sender_link("queue-a", LinkOptions::default())
        .expect("create sender link");
    assert_eq!(link.handle(), Some(1));

    link.attach().expect("attach");
    let sent = conn.take_sent();
    let [(_, Performative::Attach(attach))] = sent.as_slice() else {
        panic!("expected exactly one Attach frame, got {sent:?}");
    };
    assert_eq!(attach.handle, 1);
    assert_eq!(attach.role, Role::Sender);
    assert_eq!(attach.target.as_deref(), Some("queue-a"));
    assert_eq!(attach.initial_delivery_count, Some(0));
    assert_eq!(link.state(), LinkState::AttachSent);
}

#[tokio::test]
async fn peer_attach_confirms_local_link() {
    let (conn, session) = mapped_session(test_options(), 100).await;
    let link = attached_sender(&session, &conn);
    assert_eq!(link.state(), LinkState::Attached);
    assert_eq!(link.handle(), Some(1));
}

#[tokio::test]
async fn peer_initiated_attach_constructs_opposite_role_link() {
    let (conn, session) = mapped_session(test_options(), 100).await;

    session.on_attach(&peer_attach("inbound", 3, Role::Sender));

    let sent = conn.take_sent();
    let [(_, Performative::Attach(attach))] = sent.as_slice() else {
        panic!("expected a reciprocal Attach frame, got {sent:?}");
    };
    assert_eq!(attach.name, "inbound");
    assert_eq!(attach.role, Role::Receiver);
    assert_eq!(attach.handle, 1);

    let Some(IncomingLink::Receiver(link)) = session.accept_incoming_link() else {
        panic!("expected a pending receiver link");
    };
    assert_eq!(link.name(), "inbound");
    assert_eq!(link.state(), LinkState::Attached);
    assert!(session.accept_incoming_link().is_none());
}

#[tokio::test]
async fn handle_exhaustion_detaches_the_new_link() {
    let options = SessionOptions {
        handle_max: 2,
        ..test_options()
    };
    let (conn, session) = mapped_session(options, 100).await;
    let first = attached_sender(&session, &conn);

    session.on_attach(&peer_attach("one-too-many", 12, Role::Sender));

    let sent = conn.take_sent();
    let [(_, Performative::Detach(detach))] = sent.as_slice() else {
        panic!("expected a forced Detach frame, got {sent:?}");
    };
    assert_eq!(detach.handle, 12);
    assert!(detach.closed);
    let error = detach.error.as_ref().expect("detach must carry an error");
    assert_eq!(error.condition, ErrorCondition::LinkDetachForced);

    // The failed attach must not disturb the registered link.
    assert_eq!(first.handle(), Some(1));
    assert!(session.accept_incoming_link().is_none());
    assert_eq!(session.state(), SessionState::Mapped);
}

#[tokio::test]
async fn invalid_peer_attach_detaches_only_that_link() {
    let (conn, session) = mapped_session(test_options(), 100).await;
    let link = session
        .create_sender_link(
            "queue-a",
            LinkOptions {
                name: Some("L1".to_owned()),
                ..LinkOptions::default()
            },
        )
        .expect("create sender link");
    link.attach().expect("attach");
    let _ = conn.take_sent();

    let mut bad = peer_attach("L1", 9, Role::Receiver);
    bad.source = None;
    bad.target = None;
    session.on_attach(&bad);

    assert_eq!(link.state(), LinkState::Detached);
    assert_eq!(link.handle(), None, "the rejected link leaves the registry");
    assert_eq!(session.state(), SessionState::Mapped);
}

#[tokio::test]
async fn detach_completes_on_peer_detach() {
    let (conn, session) = mapped_session(test_options(), 100).await;
    let link = attached_sender(&session, &conn);

    link.detach(true, None).expect("detach");
    assert_eq!(link.state(), LinkState::DetachSent);
    let sent = conn.take_sent();
    assert!(
        matches!(sent.as_slice(), [(_, Performative::Detach(_))]),
        "expected one Detach frame, got {sent:?}"
    );

    session.on_detach(&Detach {
        handle: 9,
        closed: true,
        error: None,
    });
    assert_eq!(link.state(), LinkState::Detached);
    assert_eq!(link.handle(), None, "closed links leave the registry");
}

#[tokio::test]
async fn peer_initiated_detach_is_reciprocated() {
    let (conn, session) = mapped_session(test_options(), 100).await;
    let link = attached_sender(&session, &conn);

    session.on_detach(&Detach {
        handle: 9,
        closed: true,
        error: None,
    });

    let sent = conn.take_sent();
    let [(_, Performative::Detach(detach))] = sent.as_slice() else {
        panic!("expected a reciprocal Detach frame, got {sent:?}");
    };
    assert_eq!(detach.handle, 1);
    assert!(detach.closed);
    assert_eq!(link.state(), LinkState::Detached);
}

#[tokio::test]
async fn detach_on_unknown_handle_closes_the_connection() {
    let (conn, session) = mapped_session(test_options(), 100).await;

    session.on_detach(&Detach {
        handle: 99,
        closed: true,
        error: None,
    });

    assert_eq!(session.state(), SessionState::Discarding);
    let reason = conn
        .close_reason()
        .expect("connection must be asked to close")
        .expect("close must cite an error");
    assert_eq!(reason.condition, ErrorCondition::SessionUnattachedHandle);
}

#[tokio::test]
async fn peer_end_detaches_links_and_replies() {
    let (conn, session) = mapped_session(test_options(), 100).await;
    let link = attached_sender(&session, &conn);

    session.on_end(&crate::performative::End::default());

    assert_eq!(session.state(), SessionState::Unmapped);
    assert_eq!(link.state(), LinkState::Detached);
    let sent = conn.take_sent();
    let kinds: Vec<&'static str> = sent.iter().map(|(_, frame)| frame.name()).collect();
    assert_eq!(kinds, ["Detach", "End"]);
}
