//! Link endpoints: the unit of message transfer within a session.
//!
//! A link is a named, unidirectional attachment multiplexed over a session
//! by handle number. The session owns every [`Link`] and drives its state
//! machine from incoming frames; applications hold [`SenderLink`] and
//! [`ReceiverLink`] handles that reference, never own, the underlying
//! endpoint.

pub mod error;
pub mod receiver;
pub mod sender;
pub mod state;


use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use error::LinkError;
pub use receiver::ReceiverLink;
pub use sender::{SendOptions, SenderLink};
pub use state::LinkState;

use crate::{
    connection::FrameWriter,
    delivery::DeliveryTag,
    error::AmqpError,
    performative::{
        Attach,
        DeliveryState,
        Detach,
        Disposition,
        Fields,
        Flow,
        Handle,
        Performative,
        ReceiverSettleMode,
        Role,
        SenderSettleMode,
        Transfer,
        TransferNumber,
    },
    session::SessionState,
};

/// Options applied when creating a link endpoint.
#[derive(Clone, Debug, Default)]
pub struct LinkOptions {
    /// Link name; generated from the session name when absent.
    pub name: Option<String>,
    /// Settlement policy advertised for the sending endpoint.
    pub snd_settle_mode: SenderSettleMode,
    /// Settlement policy advertised for the receiving endpoint.
    pub rcv_settle_mode: ReceiverSettleMode,
    /// Largest message this endpoint accepts, in bytes.
    pub max_message_size: Option<u64>,
    /// Peer-defined link properties.
    pub properties: Option<Fields>,
}

/// One reassembled delivery surfaced to the application by a receiver link.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedMessage {
    /// Session-assigned delivery number from the first fragment.
    pub delivery_id: Option<TransferNumber>,
    /// Sender-assigned delivery tag.
    pub delivery_tag: Option<DeliveryTag>,
    /// Format code describing the payload encoding.
    pub message_format: Option<u32>,
    /// Whether the sender settled the delivery at transmission.
    pub settled: bool,
    /// The full logical payload, all fragments concatenated in order.
    pub payload: Bytes,
}

/// A settlement update for one previously sent delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct DispositionEvent {
    /// Delivery number the update applies to.
    pub delivery_id: TransferNumber,
    /// Tag the sending link assigned to the delivery.
    pub delivery_tag: DeliveryTag,
    /// Whether the peer settled the delivery.
    pub settled: bool,
    /// Outcome reported by the peer.
    pub state: Option<DeliveryState>,
}

/// A link the peer initiated, surfaced for the application to adopt.
pub enum IncomingLink {
    /// The peer attached as receiver, so this side sends.
    Sender(SenderLink),
    /// The peer attached as sender, so this side receives.
    Receiver(ReceiverLink),
}

impl IncomingLink {
    /// Name of the newly attached link.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Sender(link) => link.name(),
            Self::Receiver(link) => link.name(),
        }
    }
}

/// Event-channel receiver held back for a peer-initiated link until the
/// application adopts it.
pub(crate) enum PendingLinkChannel {
    Outcomes(mpsc::UnboundedReceiver<DispositionEvent>),
    Messages(mpsc::UnboundedReceiver<ReceivedMessage>),
}

/// Handle, addressing, and flow-control state shared by both link roles.
#[derive(Debug)]
pub(crate) struct LinkCore {
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) handle: Handle,
    pub(crate) remote_handle: Option<Handle>,
    pub(crate) state: LinkState,
    pub(crate) source: Option<String>,
    pub(crate) target: Option<String>,
    pub(crate) snd_settle_mode: SenderSettleMode,
    pub(crate) rcv_settle_mode: ReceiverSettleMode,
    pub(crate) max_message_size: Option<u64>,
    pub(crate) remote_max_message_size: Option<u64>,
    pub(crate) properties: Option<Fields>,
    pub(crate) remote_properties: Option<Fields>,
    pub(crate) delivery_count: u32,
    pub(crate) link_credit: u32,
    pub(crate) available: u32,
    pub(crate) drain: bool,
    pub(crate) closed: bool,
}

impl LinkCore {
    fn new(
        name: String,
        role: Role,
        handle: Handle,
        source: Option<String>,
        target: Option<String>,
        options: &LinkOptions,
    ) -> Self {
        Self {
            name,
            role,
            handle,
            remote_handle: None,
            state: LinkState::Detached,
            source,
            target,
            snd_settle_mode: options.snd_settle_mode,
            rcv_settle_mode: options.rcv_settle_mode,
            max_message_size: options.max_message_size,
            remote_max_message_size: None,
            properties: options.properties.clone(),
            remote_properties: None,
            delivery_count: 0,
            link_credit: 0,
            available: 0,
            drain: false,
            closed: false,
        }
    }

    /// Mirror the addressing and modes a peer advertised in its Attach.
    fn from_attach(role: Role, handle: Handle, frame: &Attach) -> Self {
        Self {
            name: frame.name.clone(),
            role,
            handle,
            remote_handle: Some(frame.handle),
            state: LinkState::Detached,
            source: frame.source.clone(),
            target: frame.target.clone(),
            snd_settle_mode: frame.snd_settle_mode,
            rcv_settle_mode: frame.rcv_settle_mode,
            max_message_size: None,
            remote_max_message_size: frame.max_message_size,
            properties: None,
            remote_properties: frame.properties.clone(),
            delivery_count: 0,
            link_credit: 0,
            available: 0,
            drain: false,
            closed: false,
        }
    }
}

/// Sender-side endpoint state.
#[derive(Debug)]
pub(crate) struct SenderEndpoint {
    next_tag: u64,
    unsettled: std::collections::BTreeMap<TransferNumber, DeliveryTag>,
    outcomes: mpsc::UnboundedSender<DispositionEvent>,
}

impl SenderEndpoint {
    fn new(outcomes: mpsc::UnboundedSender<DispositionEvent>) -> Self {
        Self {
            next_tag: 0,
            unsettled: std::collections::BTreeMap::new(),
            outcomes,
        }
    }
}

/// One delivery part-way through multi-frame reassembly.
#[derive(Debug)]
struct PartialDelivery {
    delivery_id: Option<TransferNumber>,
    delivery_tag: Option<DeliveryTag>,
    message_format: Option<u32>,
    settled: bool,
    buffer: BytesMut,
}

impl PartialDelivery {
    fn start(frame: &Transfer) -> Self {
        Self {
            delivery_id: frame.delivery_id,
            delivery_tag: frame.delivery_tag.clone(),
            message_format: frame.message_format,
            settled: frame.settled.unwrap_or(false),
            buffer: BytesMut::new(),
        }
    }

    fn absorb(&mut self, frame: &Transfer) {
        self.buffer.extend_from_slice(&frame.payload);
        if frame.settled == Some(true) {
            self.settled = true;
        }
    }

    fn finish(self) -> ReceivedMessage {
        ReceivedMessage {
            delivery_id: self.delivery_id,
            delivery_tag: self.delivery_tag,
            message_format: self.message_format,
            settled: self.settled,
            payload: self.buffer.freeze(),
        }
    }
}

/// Receiver-side endpoint state.
#[derive(Debug)]
pub(crate) struct ReceiverEndpoint {
    in_progress: Option<PartialDelivery>,
    messages: mpsc::UnboundedSender<ReceivedMessage>,
}

impl ReceiverEndpoint {
    fn new(messages: mpsc::UnboundedSender<ReceivedMessage>) -> Self {
        Self {
            in_progress: None,
            messages,
        }
    }
}

/// Role-specific endpoint state.
#[derive(Debug)]
pub(crate) enum LinkEndpoint {
    Sender(SenderEndpoint),
    Receiver(ReceiverEndpoint),
}

/// A link endpoint owned by its session.
#[derive(Debug)]
pub(crate) struct Link {
    pub(crate) core: LinkCore,
    pub(crate) endpoint: LinkEndpoint,
}

impl Link {
    pub(crate) fn sender(
        name: String,
        handle: Handle,
        target_address: &str,
        options: &LinkOptions,
        outcomes: mpsc::UnboundedSender<DispositionEvent>,
    ) -> Self {
        let source = Some(name.clone());
        Self {
            core: LinkCore::new(
                name,
                Role::Sender,
                handle,
                source,
                Some(target_address.to_owned()),
                options,
            ),
            endpoint: LinkEndpoint::Sender(SenderEndpoint::new(outcomes)),
        }
    }

    pub(crate) fn receiver(
        name: String,
        handle: Handle,
        source_address: &str,
        options: &LinkOptions,
        messages: mpsc::UnboundedSender<ReceivedMessage>,
    ) -> Self {
        let target = Some(name.clone());
        Self {
            core: LinkCore::new(
                name,
                Role::Receiver,
                handle,
                Some(source_address.to_owned()),
                target,
                options,
            ),
            endpoint: LinkEndpoint::Receiver(ReceiverEndpoint::new(messages)),
        }
    }

    /// Construct the opposite-role endpoint for a peer-initiated Attach.
    pub(crate) fn from_incoming_attach(handle: Handle, frame: &Attach) -> (Self, PendingLinkChannel) {
        match frame.role {
            Role::Sender => {
                let (tx, rx) = mpsc::unbounded_channel();
                let link = Self {
                    core: LinkCore::from_attach(Role::Receiver, handle, frame),
                    endpoint: LinkEndpoint::Receiver(ReceiverEndpoint::new(tx)),
                };
                (link, PendingLinkChannel::Messages(rx))
            }
            Role::Receiver => {
                let (tx, rx) = mpsc::unbounded_channel();
                let link = Self {
                    core: LinkCore::from_attach(Role::Sender, handle, frame),
                    endpoint: LinkEndpoint::Sender(SenderEndpoint::new(tx)),
                };
                (link, PendingLinkChannel::Outcomes(rx))
            }
        }
    }

    pub(crate) const fn is_closed(&self) -> bool {
        self.core.closed
    }

    /// Begin the attach handshake from this side.
    pub(crate) fn attach(&mut self, out: &FrameWriter) -> Result<(), LinkError> {
        if self.core.closed || self.core.state != LinkState::Detached {
            return Err(LinkError::AttachNotPermitted(self.core.state));
        }
        self.outgoing_attach(out);
        self.core.state = LinkState::AttachSent;
        Ok(())
    }

    fn outgoing_attach(&self, out: &FrameWriter) {
        out.send(Performative::Attach(Attach {
            name: self.core.name.clone(),
            handle: self.core.handle,
            role: self.core.role,
            snd_settle_mode: self.core.snd_settle_mode,
            rcv_settle_mode: self.core.rcv_settle_mode,
            source: self.core.source.clone(),
            target: self.core.target.clone(),
            initial_delivery_count: match self.core.role {
                Role::Sender => Some(self.core.delivery_count),
                Role::Receiver => None,
            },
            max_message_size: self.core.max_message_size,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: self.core.properties.clone(),
        }));
    }

    /// Absorb the peer's Attach, replying when the peer moved first.
    pub(crate) fn on_attach(
        &mut self,
        frame: &Attach,
        out: &FrameWriter,
    ) -> Result<(), LinkError> {
        if frame.source.is_none() && frame.target.is_none() {
            return Err(LinkError::MissingAddress);
        }
        match self.core.state {
            LinkState::AttachSent => {
                self.absorb_peer_attach(frame);
                self.core.state = LinkState::Attached;
                Ok(())
            }
            LinkState::Detached => {
                self.absorb_peer_attach(frame);
                self.core.state = LinkState::AttachRcvd;
                self.outgoing_attach(out);
                self.core.state = LinkState::Attached;
                Ok(())
            }
            state => Err(LinkError::AttachNotPermitted(state)),
        }
    }

    fn absorb_peer_attach(&mut self, frame: &Attach) {
        self.core.remote_handle = Some(frame.handle);
        self.core.remote_max_message_size = frame.max_message_size;
        self.core.remote_properties = frame.properties.clone();
        if self.core.role == Role::Receiver {
            self.core.delivery_count = frame.initial_delivery_count.unwrap_or_default();
        }
    }

    /// Detach this endpoint. Detaching an already detached link is a no-op.
    pub(crate) fn detach(&mut self, closed: bool, error: Option<AmqpError>, out: &FrameWriter) {
        match self.core.state {
            LinkState::Detached
            | LinkState::DetachSent
            | LinkState::DetachRcvd
            | LinkState::Error => {}
            LinkState::AttachSent | LinkState::AttachRcvd => {
                self.core.state = LinkState::Detached;
                self.core.closed = true;
            }
            LinkState::Attached => {
                self.outgoing_detach(closed, error, out);
                self.core.state = LinkState::DetachSent;
            }
        }
    }

    fn outgoing_detach(&self, closed: bool, error: Option<AmqpError>, out: &FrameWriter) {
        out.send(Performative::Detach(Detach {
            handle: self.core.handle,
            closed,
            error,
        }));
    }

    /// Absorb a peer Detach, reciprocating when the peer moved first.
    pub(crate) fn on_detach(&mut self, frame: &Detach, out: &FrameWriter) {
        if let Some(error) = &frame.error {
            warn!("link {:?} detached by peer: {error}", self.core.name);
        }
        match self.core.state {
            LinkState::DetachSent => {
                self.core.state = LinkState::Detached;
                self.core.closed = true;
            }
            LinkState::Attached => {
                self.core.state = LinkState::DetachRcvd;
                self.outgoing_detach(frame.closed, None, out);
                self.core.state = LinkState::Detached;
                self.core.closed = true;
            }
            LinkState::AttachSent | LinkState::AttachRcvd => {
                // The peer refused the attach.
                self.core.state = LinkState::Detached;
                self.core.closed = true;
            }
            LinkState::Detached | LinkState::DetachRcvd | LinkState::Error => {}
        }
    }

    /// Apply a link-scoped or session-wide flow update.
    pub(crate) fn on_flow(&mut self, frame: &Flow) {
        match &self.endpoint {
            LinkEndpoint::Sender(_) => {
                if let (Some(peer_delivery_count), Some(peer_credit)) =
                    (frame.delivery_count, frame.link_credit)
                {
                    self.core.link_credit = peer_delivery_count
                        .wrapping_add(peer_credit)
                        .wrapping_sub(self.core.delivery_count);
                }
                self.core.drain = frame.drain;
            }
            LinkEndpoint::Receiver(_) => {
                if let Some(available) = frame.available {
                    self.core.available = available;
                }
                if let Some(delivery_count) = frame.delivery_count {
                    self.core.delivery_count = delivery_count;
                }
            }
        }
    }

    /// Absorb one Transfer fragment, surfacing the delivery when complete.
    pub(crate) fn on_transfer(&mut self, frame: &Transfer) {
        let LinkEndpoint::Receiver(receiver) = &mut self.endpoint else {
            warn!(
                "link {:?}: transfer received on a sender endpoint",
                self.core.name
            );
            return;
        };
        if frame.aborted {
            receiver.in_progress = None;
            return;
        }
        let partial = receiver
            .in_progress
            .get_or_insert_with(|| PartialDelivery::start(frame));
        partial.absorb(frame);
        if frame.more {
            return;
        }
        if let Some(partial) = receiver.in_progress.take() {
            let message = partial.finish();
            self.core.delivery_count = self.core.delivery_count.wrapping_add(1);
            self.core.link_credit = self.core.link_credit.saturating_sub(1);
            if receiver.messages.send(message).is_err() {
                debug!(
                    "link {:?}: delivery dropped, application receiver closed",
                    self.core.name
                );
            }
        }
    }

    /// Settle any of this link's outstanding deliveries the range covers.
    pub(crate) fn on_disposition(&mut self, frame: &Disposition) {
        let LinkEndpoint::Sender(sender) = &mut self.endpoint else {
            return;
        };
        if frame.role != Role::Receiver {
            return;
        }
        let last = frame.last.unwrap_or(frame.first);
        if last < frame.first {
            warn!(
                "link {:?}: disposition range {}..={last} is inverted, ignoring",
                self.core.name, frame.first
            );
            return;
        }
        let covered: Vec<TransferNumber> = sender
            .unsettled
            .range(frame.first..=last)
            .map(|(id, _)| *id)
            .collect();
        for delivery_id in covered {
            let delivery_tag = if frame.settled {
                sender.unsettled.remove(&delivery_id)
            } else {
                sender.unsettled.get(&delivery_id).cloned()
            };
            let Some(delivery_tag) = delivery_tag else {
                continue;
            };
            let _ = sender.outcomes.send(DispositionEvent {
                delivery_id,
                delivery_tag,
                settled: frame.settled,
                state: frame.state.clone(),
            });
        }
    }

    /// Force-detach when the session leaves its mapped state.
    pub(crate) fn on_session_state_change(&mut self, state: SessionState) {
        if matches!(state, SessionState::Discarding | SessionState::Unmapped)
            && !self.core.state.is_terminal()
        {
            self.core.state = LinkState::Detached;
            self.core.closed = true;
        }
    }

    /// Produce the next delivery tag for this sending endpoint.
    pub(crate) fn next_delivery_tag(&mut self) -> Result<DeliveryTag, LinkError> {
        let LinkEndpoint::Sender(sender) = &mut self.endpoint else {
            return Err(LinkError::WrongRole {
                expected: Role::Sender,
                actual: self.core.role,
            });
        };
        let tag = DeliveryTag::from_counter(sender.next_tag);
        sender.next_tag += 1;
        Ok(tag)
    }

    /// Record a transmitted delivery against credit and unsettled state.
    pub(crate) fn record_outgoing_delivery(
        &mut self,
        delivery_id: TransferNumber,
        tag: DeliveryTag,
        settled: bool,
    ) {
        self.core.delivery_count = self.core.delivery_count.wrapping_add(1);
        self.core.link_credit = self.core.link_credit.saturating_sub(1);
        if !settled {
            if let LinkEndpoint::Sender(sender) = &mut self.endpoint {
                sender.unsettled.insert(delivery_id, tag);
            }
        }
    }
}
