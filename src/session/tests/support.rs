//! Shared fixtures for session unit tests.

use std::sync::Arc;

use crate::{
    connection::Connection,
    link::{LinkOptions, SenderLink},
    performative::{
        Attach,
        Begin,
        Channel,
        Performative,
        ReceiverSettleMode,
        Role,
        SenderSettleMode,
        Transfer,
    },
    session::{Session, SessionOptions, Wait},
    testing::MockConnection,
};

pub(super) fn connection() -> Arc<MockConnection> {
    Arc::new(MockConnection::default())
}

pub(super) fn session_with(conn: &Arc<MockConnection>, options: SessionOptions) -> Session {
    Session::new(
        Arc::clone(conn) as Arc<dyn Connection>,
        0,
        options,
    )
}

pub(super) fn test_options() -> SessionOptions {
    SessionOptions {
        incoming_window: 10,
        outgoing_window: 10,
        handle_max: 255,
        ..SessionOptions::default()
    }
}

pub(super) fn peer_begin(next_outgoing_id: u32, incoming_window: u32) -> Begin {
    Begin {
        remote_channel: Some(0),
        next_outgoing_id,
        incoming_window,
        outgoing_window: 100,
        handle_max: 255,
        offered_capabilities: None,
        desired_capabilities: None,
        properties: None,
    }
}

pub(super) fn peer_attach(name: &str, handle: u32, role: Role) -> Attach {
    Attach {
        name: name.to_owned(),
        handle,
        role,
        snd_settle_mode: SenderSettleMode::default(),
        rcv_settle_mode: ReceiverSettleMode::default(),
        source: Some("peer-source".to_owned()),
        target: Some("peer-target".to_owned()),
        initial_delivery_count: Some(0),
        max_message_size: None,
        offered_capabilities: None,
        desired_capabilities: None,
        properties: None,
    }
}

/// A session that has completed its Begin handshake.
pub(super) async fn mapped_session(
    options: SessionOptions,
    peer_incoming_window: u32,
) -> (Arc<MockConnection>, Session) {
    let conn = connection();
    let session = session_with(&conn, options);
    session.begin(Wait::No).await.expect("begin");
    session.on_begin(&peer_begin(0, peer_incoming_window));
    let _ = conn.take_sent();
    (conn, session)
}

/// Create and fully attach a sender link named `L1`; the peer side uses
/// handle 9.
pub(super) fn attached_sender(session: &Session, conn: &Arc<MockConnection>) -> SenderLink {
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
    session.on_attach(&peer_attach("L1", 9, Role::Receiver));
    let _ = conn.take_sent();
    link
}

pub(super) fn sent_transfers(frames: &[(Channel, Performative)]) -> Vec<Transfer> {
    frames
        .iter()
        .filter_map(|(_, frame)| match frame {
            Performative::Transfer(transfer) => Some(transfer.clone()),
            _ => None,
        })
        .collect()
}
