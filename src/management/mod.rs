//! Request/response link pair for management-node endpoints.
//!
//! A [`ManagementLink`] pairs one sender and one receiver link on the
//! same endpoint address. Requests carry a correlation identifier;
//! responses resolve the matching waiter, so any number of requests can
//! be in flight over the single pair.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    delivery::TransferState,
    link::{LinkOptions, ReceiverLink, SenderLink},
    session::{Session, SessionError},
};

/// One operation submitted to a management node.
#[derive(Clone, Debug)]
pub struct ManagementRequest {
    /// Operation name, e.g. `READ` or a node-specific verb.
    pub operation: String,
    /// Type of the entity the operation addresses.
    pub entity_type: Option<String>,
    /// Locales acceptable for the response text.
    pub locales: Option<String>,
    /// Operation-specific request body.
    pub body: Bytes,
}

/// Reply from a management node.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagementResponse {
    /// HTTP-style status code.
    pub status_code: u16,
    /// Human-readable elaboration of the status code.
    pub status_description: Option<String>,
    /// Operation-specific response body.
    pub body: Bytes,
}

impl ManagementResponse {
    /// Whether the status code signals success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Wire form of management traffic on the link pair.
#[derive(Debug, Serialize, Deserialize)]
enum ManagementMessage {
    Request {
        correlation_id: u64,
        operation: String,
        entity_type: Option<String>,
        locales: Option<String>,
        body: Bytes,
    },
    Response {
        correlation_id: u64,
        status_code: u16,
        status_description: Option<String>,
        body: Bytes,
    },
}

/// Errors produced by management request handling.
#[derive(Debug, Error)]
pub enum ManagementError {
    /// The underlying session or link rejected the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The session refused to transmit the request delivery.
    #[error("management request could not be transmitted: delivery state {0:?}")]
    SendRefused(TransferState),
    /// The link pair went away before a reply arrived.
    #[error("management response channel closed before a reply arrived")]
    ResponseDropped,
    /// Encoding the request message failed.
    #[error("failed to encode management message: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

/// Request/response link pair bound to one management endpoint.
///
/// The receiver half lives behind an async mutex so a long-running
/// [`run`](Self::run) pump can share the link with concurrent
/// [`request`](Self::request) callers.
pub struct ManagementLink {
    sender: SenderLink,
    receiver: tokio::sync::Mutex<ReceiverLink>,
    pending: Arc<DashMap<u64, oneshot::Sender<ManagementResponse>>>,
    next_correlation: AtomicU64,
}

impl ManagementLink {
    /// Create the pair on `session`, both links addressing `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a session error when either link cannot be registered.
    pub fn create(
        session: &Session,
        endpoint: &str,
        options: LinkOptions,
    ) -> Result<Self, SessionError> {
        let base = options
            .name
            .clone()
            .unwrap_or_else(|| format!("{endpoint}-mgmt"));
        let mut sender_options = options.clone();
        sender_options.name = Some(format!("{base}-sender"));
        let mut receiver_options = options;
        receiver_options.name = Some(format!("{base}-receiver"));
        let sender = session.create_sender_link(endpoint, sender_options)?;
        let receiver = session.create_receiver_link(endpoint, receiver_options)?;
        Ok(Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            pending: Arc::new(DashMap::new()),
            next_correlation: AtomicU64::new(0),
        })
    }

    /// Attach both halves of the pair.
    ///
    /// # Errors
    ///
    /// Returns a session error when either attach cannot start.
    pub async fn open(&self) -> Result<(), SessionError> {
        self.sender.attach()?;
        self.receiver.lock().await.attach()?;
        Ok(())
    }

    /// Detach both halves of the pair.
    ///
    /// # Errors
    ///
    /// Returns a session error when either link is no longer tracked.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.sender.detach(true, None)?;
        self.receiver.lock().await.detach(true, None)?;
        Ok(())
    }

    /// Extend response credit to the management node.
    ///
    /// # Errors
    ///
    /// Returns a session error when the receiver link is not attached.
    pub async fn flow(&self, credit: u32) -> Result<(), SessionError> {
        self.receiver.lock().await.flow(credit, false)
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Submit `request` and await the correlated response.
    ///
    /// # Errors
    ///
    /// Returns [`ManagementError::SendRefused`] when the session reports
    /// backpressure or is not mapped, and
    /// [`ManagementError::ResponseDropped`] when the link pair closes
    /// before the reply arrives.
    pub async fn request(
        &self,
        request: ManagementRequest,
    ) -> Result<ManagementResponse, ManagementError> {
        let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let message = ManagementMessage::Request {
            correlation_id,
            operation: request.operation,
            entity_type: request.entity_type,
            locales: request.locales,
            body: request.body,
        };
        let payload = bincode::serde::encode_to_vec(&message, bincode::config::standard())?;

        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.pending.insert(correlation_id, waiter_tx);
        let delivery = match self.sender.send(Bytes::from(payload)) {
            Ok(delivery) => delivery,
            Err(session_error) => {
                self.pending.remove(&correlation_id);
                return Err(session_error.into());
            }
        };
        if delivery.state() != TransferState::Okay {
            self.pending.remove(&correlation_id);
            return Err(ManagementError::SendRefused(delivery.state()));
        }
        waiter_rx.await.map_err(|_| ManagementError::ResponseDropped)
    }

    /// Route one received payload to the waiter its correlation id names.
    pub fn handle_response(&self, payload: &[u8]) {
        let decoded: Result<(ManagementMessage, usize), _> =
            bincode::serde::decode_from_slice(payload, bincode::config::standard());
        match decoded {
            Ok((
                ManagementMessage::Response {
                    correlation_id,
                    status_code,
                    status_description,
                    body,
                },
                _,
            )) => {
                if let Some((_, waiter)) = self.pending.remove(&correlation_id) {
                    let _ = waiter.send(ManagementResponse {
                        status_code,
                        status_description,
                        body,
                    });
                } else {
                    debug!("management response with unknown correlation id {correlation_id}, dropping");
                }
            }
            Ok((ManagementMessage::Request { correlation_id, .. }, _)) => {
                warn!("management link received a request frame (correlation id {correlation_id}), dropping");
            }
            Err(decode_error) => {
                warn!("undecodable management response: {decode_error}");
            }
        }
    }

    /// Drain responses until the receiver link closes.
    ///
    /// Holds the receiver half for its whole lifetime; attach the pair
    /// with [`open`](Self::open) before starting the pump.
    pub async fn run(&self) {
        let mut receiver = self.receiver.lock().await;
        while let Some(message) = receiver.recv().await {
            self.handle_response(&message.payload);
        }
    }
}

/// Decode a request payload as a management node would, returning the
/// correlation id to echo in the response.
#[must_use]
pub fn decode_request(payload: &[u8]) -> Option<(u64, ManagementRequest)> {
    match bincode::serde::decode_from_slice(payload, bincode::config::standard()) {
        Ok((
            ManagementMessage::Request {
                correlation_id,
                operation,
                entity_type,
                locales,
                body,
            },
            _,
        )) => Some((
            correlation_id,
            ManagementRequest {
                operation,
                entity_type,
                locales,
                body,
            },
        )),
        _ => None,
    }
}

/// Encode a response payload as a management node would.
///
/// # Errors
///
/// Returns an error when the message cannot be serialized.
pub fn encode_response(
    correlation_id: u64,
    response: &ManagementResponse,
) -> Result<Bytes, bincode::error::EncodeError> {
    let message = ManagementMessage::Response {
        correlation_id,
        status_code: response.status_code,
        status_description: response.status_description.clone(),
        body: response.body.clone(),
    };
    Ok(Bytes::from(bincode::serde::encode_to_vec(
        &message,
        bincode::config::standard(),
    )?))
}
