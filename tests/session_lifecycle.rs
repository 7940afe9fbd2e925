//! Session handshake lifecycles driven through the public API.

mod common;

use std::sync::Arc;

use amqplink::{
    AmqpError,
    Begin,
    Connection,
    ErrorCondition,
    LinkOptions,
    Performative,
    Role,
    Session,
    SessionOptions,
    SessionState,
    TransferState,
    Wait,
    testing::{MockConnection, max_frame_size_for},
};
use bytes::Bytes;
use common::mapped_pair;

fn peer_begin(next_outgoing_id: u32, incoming_window: u32) -> Begin {
    Begin {
        remote_channel: Some(0),
        next_outgoing_id,
        incoming_window,
        outgoing_window: 100,
        handle_max: 10,
        offered_capabilities: None,
        desired_capabilities: None,
        properties: None,
    }
}

#[tokio::test]
async fn simple_round_trip() {
    let sample = amqplink::Transfer {
        handle: 1,
        delivery_id: Some(0),
        delivery_tag: Some(amqplink::DeliveryTag::from_counter(0)),
        message_format: Some(0),
        settled: Some(false),
        more: false,
        rcv_settle_mode: None,
        state: None,
        resume: false,
        aborted: false,
        batchable: false,
        payload: Bytes::new(),
    };
    let conn = Arc::new(MockConnection::with_max_frame_size(max_frame_size_for(
        1000, &sample,
    )));
    let session = Session::new(
        Arc::clone(&conn) as Arc<dyn Connection>,
        0,
        SessionOptions {
            handle_max: 10,
            ..SessionOptions::default()
        },
    );

    session.begin(Wait::No).await.expect("begin");
    session.on_begin(&peer_begin(5, 100));
    assert_eq!(session.state(), SessionState::Mapped);
    assert_eq!(session.next_incoming_id(), Some(5));

    let link = session
        .create_sender_link(
            "queue-a",
            LinkOptions {
                name: Some("L1".to_owned()),
                ..LinkOptions::default()
            },
        )
        .expect("create link");
    assert_eq!(link.handle(), Some(1));
    link.attach().expect("attach");
    session.on_attach(&amqplink::Attach {
        name: "L1".to_owned(),
        handle: 2,
        role: Role::Receiver,
        snd_settle_mode: amqplink::SenderSettleMode::default(),
        rcv_settle_mode: amqplink::ReceiverSettleMode::default(),
        source: Some("queue-a".to_owned()),
        target: Some("queue-a".to_owned()),
        initial_delivery_count: None,
        max_message_size: None,
        offered_capabilities: None,
        desired_capabilities: None,
        properties: None,
    });
    let _ = conn.take_sent();

    let delivery = link.send(Bytes::from_static(b"0123456789")).expect("send");
    assert_eq!(delivery.state(), TransferState::Okay);

    let transfers: Vec<_> = conn
        .take_sent()
        .into_iter()
        .filter_map(|(_, frame)| match frame {
            Performative::Transfer(transfer) => Some(transfer),
            _ => None,
        })
        .collect();
    let [frame] = transfers.as_slice() else {
        panic!("expected exactly one Transfer frame, got {transfers:?}");
    };
    assert!(!frame.more);
    assert_eq!(session.next_outgoing_id(), 1);
    assert_eq!(session.remote_incoming_window(), 99);
}

#[tokio::test]
async fn paired_sessions_map_and_unmap() {
    let pair = mapped_pair(SessionOptions::default(), 65_536).await;

    pair.initiator.end(None, Wait::No).await.expect("end");
    pair.settle();

    assert_eq!(pair.initiator.state(), SessionState::Unmapped);
    assert_eq!(pair.responder.state(), SessionState::Unmapped);
}

#[tokio::test]
async fn peer_error_end_is_reciprocated() {
    let pair = mapped_pair(SessionOptions::default(), 65_536).await;

    let error = AmqpError::new(ErrorCondition::InternalError).with_description("node failure");
    pair.responder
        .end(Some(error), Wait::No)
        .await
        .expect("end with error");
    pair.settle();

    assert_eq!(pair.initiator.state(), SessionState::Unmapped);
    assert_eq!(pair.responder.state(), SessionState::Unmapped);
}

#[tokio::test]
async fn links_attach_across_a_pair() {
    let pair = mapped_pair(SessionOptions::default(), 65_536).await;

    let sender = pair
        .initiator
        .create_sender_link(
            "orders",
            LinkOptions {
                name: Some("orders-link".to_owned()),
                ..LinkOptions::default()
            },
        )
        .expect("create sender");
    sender.attach().expect("attach");
    pair.settle();

    let Some(amqplink::IncomingLink::Receiver(receiver)) = pair.responder.accept_incoming_link()
    else {
        panic!("responder should surface the peer-initiated link");
    };
    assert_eq!(receiver.name(), "orders-link");
    assert_eq!(sender.state(), amqplink::LinkState::Attached);
    assert_eq!(receiver.state(), amqplink::LinkState::Attached);
}
