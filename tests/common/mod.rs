//! Shared fixtures for integration tests: two in-memory sessions wired
//! back to back through recording connection doubles.

use std::sync::Arc;

use amqplink::{
    Connection,
    Session,
    SessionOptions,
    SessionState,
    Wait,
    testing::MockConnection,
};

/// A pair of sessions joined by their mock connections.
pub struct SessionPair {
    pub initiator_conn: Arc<MockConnection>,
    pub initiator: Session,
    pub responder_conn: Arc<MockConnection>,
    pub responder: Session,
}

impl SessionPair {
    /// Deliver all queued frames in both directions until quiescent.
    pub fn settle(&self) {
        loop {
            let forward = self.initiator_conn.take_sent();
            for (_, frame) in &forward {
                self.responder.on_frame(frame);
            }
            let backward = self.responder_conn.take_sent();
            for (_, frame) in &backward {
                self.initiator.on_frame(frame);
            }
            if forward.is_empty() && backward.is_empty() {
                break;
            }
        }
    }
}

/// Open a mapped session pair with the given options on the initiator.
///
/// Both mock connections advertise `max_frame_size`.
pub async fn mapped_pair(options: SessionOptions, max_frame_size: u32) -> SessionPair {
    let initiator_conn = Arc::new(MockConnection::with_max_frame_size(max_frame_size));
    let responder_conn = Arc::new(MockConnection::with_max_frame_size(max_frame_size));
    let initiator = Session::new(
        Arc::clone(&initiator_conn) as Arc<dyn Connection>,
        0,
        options,
    );
    let responder = Session::from_incoming_frame(
        Arc::clone(&responder_conn) as Arc<dyn Connection>,
        0,
        0,
    );

    initiator.begin(Wait::No).await.expect("begin");
    let pair = SessionPair {
        initiator_conn,
        initiator,
        responder_conn,
        responder,
    };
    pair.settle();
    assert_eq!(pair.initiator.state(), SessionState::Mapped);
    assert_eq!(pair.responder.state(), SessionState::Mapped);
    pair
}
