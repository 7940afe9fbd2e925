//! Management request/response correlation over a session pair.

mod common;

use amqplink::{
    IncomingLink,
    LinkOptions,
    ReceiverLink,
    SenderLink,
    SessionOptions,
    management::{ManagementLink, ManagementRequest, ManagementResponse, decode_request, encode_response},
};
use bytes::Bytes;
use common::{SessionPair, mapped_pair};

async fn open_management_pair(pair: &SessionPair) -> (ManagementLink, ReceiverLink, SenderLink) {
    let mgmt = pair
        .initiator
        .create_request_response_link_pair("$management", LinkOptions::default())
        .expect("create management link pair");
    mgmt.open().await.expect("open");
    pair.settle();

    let mut node_rx = None;
    let mut node_tx = None;
    while let Some(incoming) = pair.responder.accept_incoming_link() {
        match incoming {
            IncomingLink::Receiver(link) => node_rx = Some(link),
            IncomingLink::Sender(link) => node_tx = Some(link),
        }
    }
    (
        mgmt,
        node_rx.expect("node-side receiver for requests"),
        node_tx.expect("node-side sender for responses"),
    )
}

#[tokio::test]
async fn open_attaches_both_halves_on_one_endpoint() {
    let pair = mapped_pair(SessionOptions::default(), 65_536).await;
    let (mgmt, node_rx, node_tx) = open_management_pair(&pair).await;

    assert_eq!(node_rx.name(), "$management-mgmt-sender");
    assert_eq!(node_tx.name(), "$management-mgmt-receiver");
    assert_eq!(mgmt.pending_requests(), 0);
}

#[tokio::test]
async fn requests_resolve_with_their_correlated_response() {
    let pair = mapped_pair(
        SessionOptions {
            incoming_window: 10,
            ..SessionOptions::default()
        },
        65_536,
    )
    .await;
    let (mgmt, mut node_rx, node_tx) = open_management_pair(&pair).await;

    let reply = ManagementResponse {
        status_code: 200,
        status_description: Some("OK".to_owned()),
        body: Bytes::from_static(b"queue depth: 17"),
    };
    let expected = reply.clone();

    tokio::select! {
        outcome = async {
            let request = mgmt.request(ManagementRequest {
                operation: "READ".to_owned(),
                entity_type: Some("queue".to_owned()),
                locales: None,
                body: Bytes::from_static(b"orders"),
            });
            let node = async {
                pair.settle();
                let message = node_rx.try_recv().expect("request delivery");
                let (correlation_id, request) =
                    decode_request(&message.payload).expect("decodable request");
                assert_eq!(request.operation, "READ");
                let payload = encode_response(correlation_id, &reply).expect("encode response");
                node_tx.send(payload).expect("send response");
                pair.settle();
            };
            tokio::join!(request, node).0
        } => {
            let response = outcome.expect("request should resolve");
            assert_eq!(response, expected);
            assert_eq!(mgmt.pending_requests(), 0);
        }
        () = mgmt.run() => unreachable!("the pump only stops when links close"),
    }
}

#[tokio::test]
async fn refused_requests_clear_their_pending_slot() {
    // Window of zero deliveries: the session reports Busy immediately.
    let pair = mapped_pair(SessionOptions::default(), 65_536).await;
    let (mgmt, _node_rx, _node_tx) = open_management_pair(&pair).await;

    // Exhaust the single-delivery remote window with a throwaway request
    // kept pending, then watch the next one get refused.
    let sender = pair
        .initiator
        .create_sender_link("filler", LinkOptions::default())
        .expect("create filler link");
    sender.attach().expect("attach");
    pair.settle();
    let Some(IncomingLink::Receiver(_filler_rx)) = pair.responder.accept_incoming_link() else {
        panic!("responder should surface the filler link");
    };
    sender.send(Bytes::from_static(b"filler")).expect("send");

    let result = mgmt
        .request(ManagementRequest {
            operation: "READ".to_owned(),
            entity_type: None,
            locales: None,
            body: Bytes::new(),
        })
        .await;

    assert!(matches!(
        result,
        Err(amqplink::management::ManagementError::SendRefused(
            amqplink::TransferState::Busy
        ))
    ));
    assert_eq!(mgmt.pending_requests(), 0);
}
