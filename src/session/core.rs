//! Session state machine: handshake, link multiplexing, and flow control.
//!
//! `SessionCore` holds every mutable field of a session and is only ever
//! touched under its owning mutex, taken once per operation. That makes
//! the two steps the protocol requires to be atomic — handle allocation,
//! and window decrement plus delivery-id assignment — atomic by
//! construction: both complete within a single lock hold.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{error, info, warn};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{
    error::SessionError,
    options::SessionOptions,
    state::SessionState,
};
use crate::{
    connection::{Connection, FrameWriter},
    error::{AmqpError, ErrorCondition},
    link::{
        DispositionEvent,
        Link,
        LinkError,
        LinkOptions,
        PendingLinkChannel,
        ReceivedMessage,
    },
    performative::{
        Attach,
        Begin,
        DeliveryState,
        Detach,
        Disposition,
        End,
        Fields,
        Flow,
        Handle,
        Performative,
        Role,
        TransferNumber,
    },
};

/// Lock a session core, recovering the guard if a holder panicked.
pub(crate) fn lock_core(core: &Mutex<SessionCore>) -> MutexGuard<'_, SessionCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A peer-initiated link waiting for the application to adopt it.
pub(crate) struct PendingIncoming {
    pub(crate) name: String,
    pub(crate) channel: PendingLinkChannel,
}

/// Link-scoped fields merged into an outgoing Flow frame.
pub(crate) struct LinkFlowUpdate {
    pub(crate) handle: Handle,
    pub(crate) delivery_count: Option<u32>,
    pub(crate) link_credit: Option<u32>,
    pub(crate) available: Option<u32>,
    pub(crate) drain: bool,
    pub(crate) echo: bool,
}

/// All mutable state of one session, guarded by the session mutex.
pub(crate) struct SessionCore {
    pub(crate) name: Arc<str>,
    pub(crate) channel: u16,
    pub(crate) remote_channel: Option<u16>,
    pub(crate) state: SessionState,
    pub(crate) handle_max: Handle,
    pub(crate) next_outgoing_id: TransferNumber,
    pub(crate) next_incoming_id: Option<TransferNumber>,
    pub(crate) incoming_window: u32,
    pub(crate) outgoing_window: u32,
    pub(crate) target_incoming_window: u32,
    pub(crate) remote_incoming_window: u32,
    pub(crate) remote_outgoing_window: u32,
    pub(crate) allow_pipelined_open: bool,
    pub(crate) network_trace: bool,
    offered_capabilities: Option<Vec<String>>,
    desired_capabilities: Option<Vec<String>>,
    properties: Option<Fields>,
    remote_properties: Option<Fields>,
    pub(super) links: HashMap<String, Link>,
    output_handles: HashMap<Handle, String>,
    pub(super) input_handles: HashMap<Handle, String>,
    pending_incoming: VecDeque<PendingIncoming>,
    link_name_seq: u64,
    pub(super) connection: Arc<dyn Connection>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionCore {
    pub(crate) fn new(
        connection: Arc<dyn Connection>,
        channel: u16,
        remote_channel: Option<u16>,
        options: SessionOptions,
    ) -> (Self, watch::Receiver<SessionState>) {
        let name: Arc<str> = options
            .name
            .unwrap_or_else(|| format!("session-{channel}"))
            .into();
        let (state_tx, state_rx) = watch::channel(SessionState::Unmapped);
        let core = Self {
            name,
            channel,
            remote_channel,
            state: SessionState::Unmapped,
            handle_max: options.handle_max,
            next_outgoing_id: options.next_outgoing_id,
            next_incoming_id: None,
            incoming_window: options.incoming_window,
            outgoing_window: options.outgoing_window,
            target_incoming_window: options.incoming_window,
            remote_incoming_window: 0,
            remote_outgoing_window: 0,
            allow_pipelined_open: options.allow_pipelined_open,
            network_trace: options.network_trace,
            offered_capabilities: options.offered_capabilities,
            desired_capabilities: options.desired_capabilities,
            properties: options.properties,
            remote_properties: None,
            links: HashMap::new(),
            output_handles: HashMap::new(),
            input_handles: HashMap::new(),
            pending_incoming: VecDeque::new(),
            link_name_seq: 0,
            connection,
            state_tx,
        };
        (core, state_rx)
    }

    pub(crate) fn writer(&self) -> FrameWriter {
        FrameWriter::new(
            Arc::clone(&self.connection),
            self.channel,
            self.network_trace,
            Arc::clone(&self.name),
        )
    }

    /// Transition the session, notify links, and clear state on unmap.
    pub(crate) fn set_state(&mut self, new_state: SessionState) {
        let previous = self.state;
        self.state = new_state;
        info!(
            "[{}] session state changed: {previous:?} -> {new_state:?}",
            self.name
        );
        for link in self.links.values_mut() {
            link.on_session_state_change(new_state);
        }
        if new_state == SessionState::Unmapped {
            self.links.clear();
            self.output_handles.clear();
            self.input_handles.clear();
        }
        self.state_tx.send_replace(new_state);
    }

    pub(crate) fn remote_properties(&self) -> Option<&Fields> {
        self.remote_properties.as_ref()
    }

    // ---- Begin / End handshake -------------------------------------------

    pub(crate) fn outgoing_begin(&self) {
        let responding = self.state == SessionState::BeginRcvd;
        let frame = Begin {
            remote_channel: if responding { self.remote_channel } else { None },
            next_outgoing_id: self.next_outgoing_id,
            incoming_window: self.incoming_window,
            outgoing_window: self.outgoing_window,
            handle_max: self.handle_max,
            offered_capabilities: if responding {
                self.offered_capabilities.clone()
            } else {
                None
            },
            desired_capabilities: if self.state == SessionState::Unmapped {
                self.desired_capabilities.clone()
            } else {
                None
            },
            properties: self.properties.clone(),
        };
        self.writer().send(Performative::Begin(frame));
    }

    pub(crate) fn incoming_begin(&mut self, frame: &Begin) {
        self.handle_max = frame.handle_max;
        self.next_incoming_id = Some(frame.next_outgoing_id);
        self.remote_incoming_window = frame.incoming_window;
        self.remote_outgoing_window = frame.outgoing_window;
        self.remote_properties = frame.properties.clone();
        match self.state {
            SessionState::BeginSent => {
                self.remote_channel = frame.remote_channel;
                self.set_state(SessionState::Mapped);
            }
            SessionState::Unmapped => {
                self.set_state(SessionState::BeginRcvd);
                self.outgoing_begin();
                self.set_state(SessionState::Mapped);
            }
            _ => {}
        }
    }

    pub(crate) fn outgoing_end(&self, error: Option<AmqpError>) {
        self.writer().send(Performative::End(End { error }));
    }

    /// Locally initiated teardown. Always drives the session out of its
    /// mapped state, ending in `Discarding` when an error is being
    /// reported and `EndSent` otherwise.
    pub(crate) fn teardown(&mut self, error: Option<AmqpError>) {
        if matches!(
            self.state,
            SessionState::Unmapped | SessionState::Discarding
        ) {
            return;
        }
        let discarding = error.is_some();
        self.outgoing_end(error);
        self.detach_all_links();
        self.set_state(if discarding {
            SessionState::Discarding
        } else {
            SessionState::EndSent
        });
    }

    pub(crate) fn incoming_end(&mut self, frame: &End) {
        if let Some(error) = &frame.error {
            warn!("[{}] session ended by peer: {error}", self.name);
        }
        if !self.state.is_ending() {
            self.set_state(SessionState::EndRcvd);
            self.detach_all_links();
            self.outgoing_end(None);
        }
        self.set_state(SessionState::Unmapped);
    }

    pub(super) fn detach_all_links(&mut self) {
        let out = self.writer();
        for link in self.links.values_mut() {
            link.detach(true, None, &out);
        }
    }

    // ---- Link registry ---------------------------------------------------

    pub(crate) fn link(&self, name: &str) -> Option<&Link> {
        self.links.get(name)
    }

    pub(crate) fn next_link_name(&mut self, role: &str) -> String {
        let seq = self.link_name_seq;
        self.link_name_seq += 1;
        format!("{}-{role}-{seq}", self.name)
    }

    /// First free handle in `[1, handle_max)`; zero stays reserved.
    fn next_output_handle(&self) -> Result<Handle, SessionError> {
        let assigned = u64::try_from(self.output_handles.len()).unwrap_or(u64::MAX);
        if assigned >= u64::from(self.handle_max) {
            return Err(SessionError::HandleExhausted {
                max: self.handle_max,
            });
        }
        (1..self.handle_max)
            .find(|handle| !self.output_handles.contains_key(handle))
            .ok_or(SessionError::HandleExhausted {
                max: self.handle_max,
            })
    }

    pub(crate) fn register_sender_link(
        &mut self,
        name: String,
        target_address: &str,
        options: &LinkOptions,
        outcomes: mpsc::UnboundedSender<DispositionEvent>,
    ) -> Result<Handle, SessionError> {
        if self.links.contains_key(&name) {
            return Err(SessionError::LinkNameInUse(name));
        }
        let handle = self.next_output_handle()?;
        let link = Link::sender(name.clone(), handle, target_address, options, outcomes);
        self.output_handles.insert(handle, name.clone());
        self.links.insert(name, link);
        Ok(handle)
    }

    pub(crate) fn register_receiver_link(
        &mut self,
        name: String,
        source_address: &str,
        options: &LinkOptions,
        messages: mpsc::UnboundedSender<ReceivedMessage>,
    ) -> Result<Handle, SessionError> {
        if self.links.contains_key(&name) {
            return Err(SessionError::LinkNameInUse(name));
        }
        let handle = self.next_output_handle()?;
        let link = Link::receiver(name.clone(), handle, source_address, options, messages);
        self.output_handles.insert(handle, name.clone());
        self.links.insert(name, link);
        Ok(handle)
    }

    fn remove_link(&mut self, name: &str) {
        self.links.remove(name);
        self.output_handles
            .retain(|_, link_name| link_name.as_str() != name);
        self.input_handles
            .retain(|_, link_name| link_name.as_str() != name);
    }

    pub(crate) fn attach_link(&mut self, name: &str) -> Result<(), SessionError> {
        let out = self.writer();
        let link = self
            .links
            .get_mut(name)
            .ok_or_else(|| SessionError::LinkNotFound(name.to_owned()))?;
        link.attach(&out)?;
        Ok(())
    }

    pub(crate) fn detach_link(
        &mut self,
        name: &str,
        closed: bool,
        error: Option<AmqpError>,
    ) -> Result<(), SessionError> {
        let out = self.writer();
        let fully_closed;
        {
            let link = self
                .links
                .get_mut(name)
                .ok_or_else(|| SessionError::LinkNotFound(name.to_owned()))?;
            link.detach(closed, error, &out);
            fully_closed = link.is_closed();
        }
        if fully_closed {
            self.remove_link(name);
        }
        Ok(())
    }

    pub(crate) fn pop_pending_incoming(&mut self) -> Option<PendingIncoming> {
        self.pending_incoming.pop_front()
    }

    /// Route an incoming Attach: confirm a locally initiated link, or
    /// construct the opposite-role endpoint for a peer-initiated one.
    pub(crate) fn incoming_attach(&mut self, frame: &Attach) {
        let out = self.writer();
        if self.links.contains_key(&frame.name) {
            self.input_handles.insert(frame.handle, frame.name.clone());
            let mut failed = false;
            if let Some(link) = self.links.get_mut(&frame.name) {
                if let Err(link_error) = link.on_attach(frame, &out) {
                    debug!(
                        "[{}] unable to attach link {:?}: {link_error}",
                        self.name, frame.name
                    );
                    link.detach(true, None, &out);
                }
                failed = link.is_closed();
            }
            if failed {
                self.remove_link(&frame.name);
            }
            return;
        }

        let handle = match self.next_output_handle() {
            Ok(handle) => handle,
            Err(alloc_error) => {
                error!("[{}] unable to attach new link: {alloc_error}", self.name);
                out.send(Performative::Detach(Detach {
                    handle: frame.handle,
                    closed: true,
                    error: Some(
                        AmqpError::new(ErrorCondition::LinkDetachForced).with_description(
                            format!(
                                "cannot allocate more handles, the maximum number of handles is {}",
                                self.handle_max
                            ),
                        ),
                    ),
                }));
                return;
            }
        };
        let (mut link, channel) = Link::from_incoming_attach(handle, frame);
        if let Err(link_error) = link.on_attach(frame, &out) {
            debug!(
                "[{}] unable to attach link {:?}: {link_error}",
                self.name, frame.name
            );
            out.send(Performative::Detach(Detach {
                handle,
                closed: true,
                error: None,
            }));
            return;
        }
        self.output_handles.insert(handle, frame.name.clone());
        self.input_handles.insert(frame.handle, frame.name.clone());
        self.links.insert(frame.name.clone(), link);
        self.pending_incoming.push_back(PendingIncoming {
            name: frame.name.clone(),
            channel,
        });
    }

    /// Route an incoming Detach. An unknown handle leaves session and
    /// peer state inconsistent, so the connection is torn down.
    pub(crate) fn incoming_detach(&mut self, frame: &Detach) {
        let Some(name) = self.input_handles.get(&frame.handle).cloned() else {
            error!(
                "[{}] received detach for unattached handle {}, closing connection",
                self.name, frame.handle
            );
            #[cfg(feature = "metrics")]
            crate::metrics::inc_protocol_errors();
            self.set_state(SessionState::Discarding);
            self.connection.close(Some(unattached_handle_error()));
            return;
        };
        let out = self.writer();
        let mut fully_closed = false;
        if let Some(link) = self.links.get_mut(&name) {
            link.on_detach(frame, &out);
            fully_closed = link.is_closed();
        }
        if fully_closed {
            self.remove_link(&name);
        }
    }

    // ---- Flow control ----------------------------------------------------

    /// Merge session windows into an optional link update and transmit.
    pub(crate) fn outgoing_flow(&self, link: Option<LinkFlowUpdate>) {
        let frame = Flow {
            next_incoming_id: self.next_incoming_id,
            incoming_window: self.incoming_window,
            next_outgoing_id: self.next_outgoing_id,
            outgoing_window: self.outgoing_window,
            handle: link.as_ref().map(|update| update.handle),
            delivery_count: link.as_ref().and_then(|update| update.delivery_count),
            link_credit: link.as_ref().and_then(|update| update.link_credit),
            available: link.as_ref().and_then(|update| update.available),
            drain: link.as_ref().is_some_and(|update| update.drain),
            echo: link.as_ref().is_some_and(|update| update.echo),
            properties: None,
        };
        self.writer().send(Performative::Flow(frame));
    }

    pub(crate) fn incoming_flow(&mut self, frame: &Flow) {
        self.next_incoming_id = Some(frame.next_outgoing_id);
        let remote_incoming_id = frame.next_incoming_id.unwrap_or(self.next_outgoing_id);
        self.remote_incoming_window = remote_incoming_id
            .wrapping_add(frame.incoming_window)
            .wrapping_sub(self.next_outgoing_id);
        self.remote_outgoing_window = frame.outgoing_window;
        if let Some(handle) = frame.handle {
            let Some(name) = self.input_handles.get(&handle).cloned() else {
                warn!(
                    "[{}] flow update for unknown handle {handle}, ignoring",
                    self.name
                );
                return;
            };
            if let Some(link) = self.links.get_mut(&name) {
                link.on_flow(frame);
            }
        } else {
            let names: Vec<String> = self.output_handles.values().cloned().collect();
            for name in names {
                if self.remote_incoming_window == 0 {
                    break;
                }
                if let Some(link) = self.links.get_mut(&name) {
                    if !link.is_closed() {
                        link.on_flow(frame);
                    }
                }
            }
        }
    }

    /// Extend receiver credit on a link and advertise it to the peer.
    pub(crate) fn issue_credit(
        &mut self,
        name: &str,
        credit: u32,
        drain: bool,
    ) -> Result<(), SessionError> {
        let update = {
            let link = self
                .links
                .get_mut(name)
                .ok_or_else(|| SessionError::LinkNotFound(name.to_owned()))?;
            if link.core.role != Role::Receiver {
                return Err(LinkError::WrongRole {
                    expected: Role::Receiver,
                    actual: link.core.role,
                }
                .into());
            }
            if !link.core.state.is_attached() {
                return Err(LinkError::NotAttached(link.core.state).into());
            }
            link.core.link_credit = credit;
            link.core.drain = drain;
            LinkFlowUpdate {
                handle: link.core.handle,
                delivery_count: Some(link.core.delivery_count),
                link_credit: Some(credit),
                available: None,
                drain,
                echo: false,
            }
        };
        self.outgoing_flow(Some(update));
        Ok(())
    }

    // ---- Disposition -----------------------------------------------------

    pub(crate) fn outgoing_disposition(&self, frame: Disposition) {
        self.writer().send(Performative::Disposition(frame));
    }

    /// Settlement ranges are not addressed to a handle; every attached
    /// link checks the range against its own outstanding deliveries.
    pub(crate) fn incoming_disposition(&mut self, frame: &Disposition) {
        let names: Vec<String> = self.input_handles.values().cloned().collect();
        for name in names {
            if let Some(link) = self.links.get_mut(&name) {
                link.on_disposition(frame);
            }
        }
    }

    pub(crate) fn settle_delivery(
        &mut self,
        name: &str,
        delivery_id: TransferNumber,
        state: DeliveryState,
    ) -> Result<(), SessionError> {
        let link = self
            .links
            .get(name)
            .ok_or_else(|| SessionError::LinkNotFound(name.to_owned()))?;
        if link.core.role != Role::Receiver {
            return Err(LinkError::WrongRole {
                expected: Role::Receiver,
                actual: link.core.role,
            }
            .into());
        }
        if !link.core.state.is_attached() {
            return Err(LinkError::NotAttached(link.core.state).into());
        }
        self.outgoing_disposition(Disposition {
            role: Role::Receiver,
            first: delivery_id,
            last: None,
            settled: true,
            state: Some(state),
            batchable: false,
        });
        Ok(())
    }
}

/// Error cited whenever a frame references a handle with no attached link.
pub(crate) fn unattached_handle_error() -> AmqpError {
    AmqpError::new(ErrorCondition::SessionUnattachedHandle).with_description(
        "invalid handle reference in received frame: \
         handle is not currently associated with an attached link",
    )
}
