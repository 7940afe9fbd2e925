//! Outgoing transfer outcomes, fragmentation, and incoming accounting.

use std::sync::Arc;

use bytes::Bytes;

use super::support::{
    attached_sender,
    connection,
    mapped_session,
    peer_attach,
    peer_begin,
    sent_transfers,
    session_with,
    test_options,
};
use crate::{
    delivery::{DeliveryTag, TransferState},
    error::ErrorCondition,
    link::LinkOptions,
    performative::{Performative, Role, Transfer},
    session::{Session, SessionState, Wait},
    testing::{MockConnection, max_frame_size_for},
};

/// The Transfer shape `send` produces for the first delivery on a fresh
/// sender link with handle 1, before the session assigns a delivery id.
fn first_delivery_shape() -> Transfer {
    Transfer {
        handle: 1,
        delivery_id: Some(0),
        delivery_tag: Some(DeliveryTag::from_counter(0)),
        message_format: Some(0),
        settled: Some(false),
        more: false,
        rcv_settle_mode: None,
        state: None,
        resume: false,
        aborted: false,
        batchable: false,
        payload: Bytes::new(),
    }
}

async fn mapped_session_with_frame_budget(
    available_frame_size: usize,
) -> (Arc<MockConnection>, Session) {
    let max_frame = max_frame_size_for(available_frame_size, &first_delivery_shape());
    let conn = Arc::new(MockConnection::with_max_frame_size(max_frame));
    let session = session_with(&conn, test_options());
    session.begin(Wait::No).await.expect("begin");
    session.on_begin(&peer_begin(0, 100));
    let _ = conn.take_sent();
    (conn, session)
}

#[tokio::test]
async fn small_payload_fits_one_frame() {
    let (conn, session) = mapped_session_with_frame_budget(1000).await;
    let link = attached_sender(&session, &conn);

    let delivery = link.send(Bytes::from_static(b"0123456789")).expect("send");

    assert_eq!(delivery.state(), TransferState::Okay);
    assert_eq!(delivery.delivery_id(), Some(0));
    let frames = sent_transfers(&conn.take_sent());
    let [frame] = frames.as_slice() else {
        panic!("expected exactly one Transfer frame, got {frames:?}");
    };
    assert!(!frame.more);
    assert_eq!(frame.payload.as_ref(), b"0123456789");
    assert_eq!(session.next_outgoing_id(), 1);
    assert_eq!(session.remote_incoming_window(), 99);
}

#[tokio::test]
async fn oversized_payload_fragments_with_shared_delivery_id() {
    let (conn, session) = mapped_session_with_frame_budget(100).await;
    let link = attached_sender(&session, &conn);

    let payload = Bytes::from(vec![0x5a_u8; 250]);
    let delivery = link.send(payload.clone()).expect("send");
    assert_eq!(delivery.state(), TransferState::Okay);

    let frames = sent_transfers(&conn.take_sent());
    assert_eq!(frames.len(), 3);
    let sizes: Vec<usize> = frames.iter().map(|frame| frame.payload.len()).collect();
    assert_eq!(sizes, [100, 100, 50]);
    let more_flags: Vec<bool> = frames.iter().map(|frame| frame.more).collect();
    assert_eq!(more_flags, [true, true, false]);
    for frame in &frames {
        assert_eq!(frame.delivery_id, Some(0));
    }

    let reassembled: Vec<u8> = frames
        .iter()
        .flat_map(|frame| frame.payload.iter().copied())
        .collect();
    assert_eq!(reassembled, payload.as_ref());

    // One delivery: windows and the id counter move by one, not three.
    assert_eq!(session.next_outgoing_id(), 1);
    assert_eq!(session.remote_incoming_window(), 99);
}

#[tokio::test]
async fn backpressure_reports_busy_without_sending() {
    let (conn, session) = mapped_session(test_options(), 0).await;
    let link = attached_sender(&session, &conn);

    let delivery = link.send(Bytes::from_static(b"payload")).expect("send");

    assert_eq!(delivery.state(), TransferState::Busy);
    assert!(conn.sent().is_empty(), "busy deliveries transmit nothing");
    assert_eq!(session.next_outgoing_id(), 0);
}

#[tokio::test]
async fn send_before_mapped_reports_error_outcome() {
    let conn = connection();
    let session = session_with(&conn, test_options());
    session.begin(Wait::No).await.expect("begin");
    // Pipelined open: attach completes while the session is still BeginSent.
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

    let delivery = link.send(Bytes::from_static(b"early")).expect("send");

    assert_eq!(delivery.state(), TransferState::Error);
    assert!(conn.sent().is_empty());
    assert_eq!(session.next_outgoing_id(), 0);
}

#[tokio::test]
async fn transfer_on_unattached_handle_is_fatal() {
    let (conn, session) = mapped_session(test_options(), 100).await;

    let frame = Transfer {
        handle: 99,
        delivery_id: Some(0),
        delivery_tag: Some(DeliveryTag::from_counter(0)),
        message_format: Some(0),
        settled: Some(true),
        more: false,
        rcv_settle_mode: None,
        state: None,
        resume: false,
        aborted: false,
        batchable: false,
        payload: Bytes::from_static(b"stray"),
    };
    session.on_transfer(&frame);

    assert_eq!(session.state(), SessionState::Discarding);
    let sent = conn.take_sent();
    let [(_, Performative::End(end))] = sent.as_slice() else {
        panic!("expected an End frame citing the handle, got {sent:?}");
    };
    let error = end.error.as_ref().expect("end must carry an error");
    assert_eq!(error.condition, ErrorCondition::SessionUnattachedHandle);
}

#[tokio::test]
async fn windows_advance_once_per_delivery_regardless_of_fragments() {
    let (conn, session) = mapped_session_with_frame_budget(10).await;
    let link = attached_sender(&session, &conn);

    for index in 0..5_u32 {
        let delivery = link
            .send(Bytes::from(vec![0x11_u8; 25]))
            .expect("send");
        assert_eq!(delivery.state(), TransferState::Okay);
        assert_eq!(delivery.delivery_id(), Some(index));
    }

    let frames = sent_transfers(&conn.take_sent());
    assert_eq!(frames.len(), 15, "each 25-byte delivery splits into 3 frames");
    assert_eq!(session.next_outgoing_id(), 5);
    assert_eq!(session.remote_incoming_window(), 95);
    assert_eq!(session.outgoing_window(), 5);
}

#[rstest::rstest]
#[case::empty(0, 1)]
#[case::exact_fit(10, 1)]
#[case::one_over(11, 2)]
#[case::ten_frames(100, 10)]
#[case::ten_frames_and_one(101, 11)]
#[tokio::test]
async fn fragment_count_is_payload_over_frame_budget(
    #[case] payload_len: usize,
    #[case] expected_frames: usize,
) {
    let (conn, session) = mapped_session_with_frame_budget(10).await;
    let link = attached_sender(&session, &conn);

    let delivery = link
        .send(Bytes::from(vec![0x22_u8; payload_len]))
        .expect("send");
    assert_eq!(delivery.state(), TransferState::Okay);

    let frames = sent_transfers(&conn.take_sent());
    assert_eq!(frames.len(), expected_frames);
    let total: usize = frames.iter().map(|frame| frame.payload.len()).sum();
    assert_eq!(total, payload_len);
}

#[tokio::test]
async fn settled_dispositions_surface_per_delivery_outcomes() {
    let (conn, session) = mapped_session(test_options(), 100).await;
    let mut link = attached_sender(&session, &conn);

    link.send(Bytes::from_static(b"one")).expect("send");
    link.send(Bytes::from_static(b"two")).expect("send");

    session.on_disposition(&crate::performative::Disposition {
        role: Role::Receiver,
        first: 0,
        last: Some(1),
        settled: true,
        state: Some(crate::performative::DeliveryState::Accepted),
        batchable: false,
    });

    let first = link.try_next_outcome().expect("outcome for delivery 0");
    assert_eq!(first.delivery_id, 0);
    assert!(first.settled);
    let second = link.try_next_outcome().expect("outcome for delivery 1");
    assert_eq!(second.delivery_id, 1);
    assert!(link.try_next_outcome().is_none());
}
