//! Sessions: flow-controlled contexts multiplexed over connection channels.
//!
//! A [`Session`] owns a set of links, multiplexes their frames over one
//! connection channel, tracks the session-level transfer windows, and
//! fragments outgoing deliveries into Transfer frames sized to the peer's
//! maximum frame size. The connection delivers decoded performatives
//! through the `on_*` methods; applications create links and drive the
//! Begin/End handshake.
//!
//! All session state lives behind one coarse mutex, taken once per
//! operation and never held across an await. Waits for handshake
//! completion observe a `watch` channel the receive path resolves, so
//! `begin`/`end` block without polling.

pub(crate) mod core;
mod error;
mod options;
mod state;
mod transfer;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};

pub use error::SessionError;
pub use options::{SessionOptions, Wait};
pub use state::SessionState;

use self::core::{SessionCore, lock_core};
use crate::{
    connection::Connection,
    error::AmqpError,
    link::{
        IncomingLink,
        LinkOptions,
        PendingLinkChannel,
        ReceiverLink,
        SenderLink,
    },
    performative::{
        Attach,
        Begin,
        Channel,
        Detach,
        Disposition,
        End,
        Fields,
        Flow,
        Handle,
        Performative,
        Transfer,
        TransferNumber,
    },
};

/// One AMQP session bound to a connection channel.
pub struct Session {
    core: Arc<Mutex<SessionCore>>,
    state_rx: watch::Receiver<SessionState>,
}

impl Session {
    /// Create a session on `channel` of `connection`.
    #[must_use]
    pub fn new(connection: Arc<dyn Connection>, channel: Channel, options: SessionOptions) -> Self {
        let (core, state_rx) = SessionCore::new(connection, channel, None, options);
        Self {
            core: Arc::new(Mutex::new(core)),
            state_rx,
        }
    }

    /// Create a session for a peer-initiated Begin that arrived on
    /// `remote_channel`, to be hosted locally on `channel`.
    ///
    /// The remote channel is recorded up front so the echoing Begin can
    /// reference it.
    #[must_use]
    pub fn from_incoming_frame(
        connection: Arc<dyn Connection>,
        channel: Channel,
        remote_channel: Channel,
    ) -> Self {
        let (core, state_rx) = SessionCore::new(
            connection,
            channel,
            Some(remote_channel),
            SessionOptions::default(),
        );
        Self {
            core: Arc::new(Mutex::new(core)),
            state_rx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionCore> {
        lock_core(&self.core)
    }

    // ---- Observability ---------------------------------------------------

    /// Session name used in logs.
    #[must_use]
    pub fn name(&self) -> String {
        self.lock().name.to_string()
    }

    /// Channel this session occupies on its connection.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.lock().channel
    }

    /// Channel the peer assigned to its half of the session.
    #[must_use]
    pub fn remote_channel(&self) -> Option<Channel> {
        self.lock().remote_channel
    }

    /// Current handshake state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Subscribe to session state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Transfer number the next outgoing delivery will be assigned.
    #[must_use]
    pub fn next_outgoing_id(&self) -> TransferNumber {
        self.lock().next_outgoing_id
    }

    /// Transfer number expected on the next incoming delivery.
    #[must_use]
    pub fn next_incoming_id(&self) -> Option<TransferNumber> {
        self.lock().next_incoming_id
    }

    /// Remaining capacity to receive deliveries.
    #[must_use]
    pub fn incoming_window(&self) -> u32 {
        self.lock().incoming_window
    }

    /// Remaining capacity to send deliveries.
    #[must_use]
    pub fn outgoing_window(&self) -> u32 {
        self.lock().outgoing_window
    }

    /// The peer's remaining capacity to receive deliveries.
    #[must_use]
    pub fn remote_incoming_window(&self) -> u32 {
        self.lock().remote_incoming_window
    }

    /// The peer's advertised outgoing window.
    #[must_use]
    pub fn remote_outgoing_window(&self) -> u32 {
        self.lock().remote_outgoing_window
    }

    /// Largest link handle number permitted on the session.
    #[must_use]
    pub fn handle_max(&self) -> Handle {
        self.lock().handle_max
    }

    /// Properties the peer attached to its Begin.
    #[must_use]
    pub fn remote_properties(&self) -> Option<Fields> {
        self.lock().remote_properties().cloned()
    }

    // ---- Handshake -------------------------------------------------------

    /// Send a Begin and optionally wait for the session to map.
    ///
    /// With [`Wait::No`] the caller proceeds pipelined, using the session
    /// before the remote Begin arrives; that requires
    /// `allow_pipelined_open` and fails fast at call time otherwise,
    /// before any frame is sent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PipelinedOpenDisallowed`] on the misuse
    /// described above, or [`SessionError::Timeout`] when a bounded wait
    /// expires before the session maps.
    pub async fn begin(&self, wait: Wait) -> Result<(), SessionError> {
        {
            let mut core = self.lock();
            if wait == Wait::No && !core.allow_pipelined_open {
                return Err(SessionError::PipelinedOpenDisallowed);
            }
            core.outgoing_begin();
            core.set_state(SessionState::BeginSent);
        }
        self.wait_for_state(SessionState::Mapped, wait).await
    }

    /// End the session, optionally reporting `error` to the peer.
    ///
    /// Teardown is unconditional: links are detached and the session
    /// leaves its mapped state even when individual steps misbehave.
    /// Ending an already unmapped session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] when a bounded wait expires
    /// before the peer's End unmaps the session.
    pub async fn end(&self, error: Option<AmqpError>, wait: Wait) -> Result<(), SessionError> {
        self.lock().teardown(error);
        self.wait_for_state(SessionState::Unmapped, wait).await
    }

    async fn wait_for_state(&self, target: SessionState, wait: Wait) -> Result<(), SessionError> {
        let mut state_rx = self.state_rx.clone();
        let reached = state_rx.wait_for(|state| *state == target);
        match wait {
            Wait::No => Ok(()),
            Wait::Forever => {
                reached.await.map_err(|_| SessionError::Terminated)?;
                Ok(())
            }
            Wait::Timeout(limit) => match tokio::time::timeout(limit, reached).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(_)) => Err(SessionError::Terminated),
                Err(_) => Err(SessionError::Timeout { expected: target }),
            },
        }
    }

    // ---- Link creation ---------------------------------------------------

    /// Create a sending link towards `target_address`.
    ///
    /// The link is registered immediately; call
    /// [`SenderLink::attach`] to start the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LinkNameInUse`] when the chosen name is
    /// taken, or [`SessionError::HandleExhausted`] when no handle number
    /// is free.
    pub fn create_sender_link(
        &self,
        target_address: &str,
        options: LinkOptions,
    ) -> Result<SenderLink, SessionError> {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let name = {
            let mut core = self.lock();
            let name = options
                .name
                .clone()
                .unwrap_or_else(|| core.next_link_name("sender"));
            core.register_sender_link(name.clone(), target_address, &options, outcomes_tx)?;
            name
        };
        Ok(SenderLink::new(name, Arc::clone(&self.core), outcomes_rx))
    }

    /// Create a receiving link from `source_address`.
    ///
    /// # Errors
    ///
    /// Same contract as [`create_sender_link`](Self::create_sender_link).
    pub fn create_receiver_link(
        &self,
        source_address: &str,
        options: LinkOptions,
    ) -> Result<ReceiverLink, SessionError> {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let name = {
            let mut core = self.lock();
            let name = options
                .name
                .clone()
                .unwrap_or_else(|| core.next_link_name("receiver"));
            core.register_receiver_link(name.clone(), source_address, &options, messages_tx)?;
            name
        };
        Ok(ReceiverLink::new(name, Arc::clone(&self.core), messages_rx))
    }

    /// Create a request/response link pair on a management endpoint.
    ///
    /// # Errors
    ///
    /// Returns a session error when either half of the pair cannot be
    /// registered.
    pub fn create_request_response_link_pair(
        &self,
        endpoint: &str,
        options: LinkOptions,
    ) -> Result<crate::management::ManagementLink, SessionError> {
        crate::management::ManagementLink::create(self, endpoint, options)
    }

    /// Adopt the next link the peer initiated, if one is pending.
    #[must_use]
    pub fn accept_incoming_link(&self) -> Option<IncomingLink> {
        let pending = self.lock().pop_pending_incoming()?;
        Some(match pending.channel {
            PendingLinkChannel::Outcomes(outcomes_rx) => IncomingLink::Sender(SenderLink::new(
                pending.name,
                Arc::clone(&self.core),
                outcomes_rx,
            )),
            PendingLinkChannel::Messages(messages_rx) => IncomingLink::Receiver(
                ReceiverLink::new(pending.name, Arc::clone(&self.core), messages_rx),
            ),
        })
    }

    // ---- Connection-facing frame intake ----------------------------------

    /// Dispatch one decoded performative to the matching handler.
    pub fn on_frame(&self, frame: &Performative) {
        match frame {
            Performative::Begin(begin) => self.on_begin(begin),
            Performative::End(end) => self.on_end(end),
            Performative::Attach(attach) => self.on_attach(attach),
            Performative::Detach(detach) => self.on_detach(detach),
            Performative::Flow(flow) => self.on_flow(flow),
            Performative::Transfer(transfer) => self.on_transfer(transfer),
            Performative::Disposition(disposition) => self.on_disposition(disposition),
        }
    }

    /// Handle an incoming Begin.
    pub fn on_begin(&self, frame: &Begin) {
        let mut core = self.lock();
        note_frame(&core, frame);
        core.incoming_begin(frame);
    }

    /// Handle an incoming End.
    pub fn on_end(&self, frame: &End) {
        let mut core = self.lock();
        note_frame(&core, frame);
        core.incoming_end(frame);
    }

    /// Handle an incoming Attach.
    pub fn on_attach(&self, frame: &Attach) {
        let mut core = self.lock();
        note_frame(&core, frame);
        core.incoming_attach(frame);
    }

    /// Handle an incoming Detach.
    pub fn on_detach(&self, frame: &Detach) {
        let mut core = self.lock();
        note_frame(&core, frame);
        core.incoming_detach(frame);
    }

    /// Handle an incoming Flow.
    pub fn on_flow(&self, frame: &Flow) {
        let mut core = self.lock();
        note_frame(&core, frame);
        core.incoming_flow(frame);
    }

    /// Handle an incoming Transfer fragment.
    pub fn on_transfer(&self, frame: &Transfer) {
        let mut core = self.lock();
        note_frame(&core, frame);
        core.incoming_transfer(frame);
    }

    /// Handle an incoming Disposition.
    pub fn on_disposition(&self, frame: &Disposition) {
        let mut core = self.lock();
        note_frame(&core, frame);
        core.incoming_disposition(frame);
    }
}

fn note_frame(core: &SessionCore, frame: &dyn std::fmt::Debug) {
    if core.network_trace {
        tracing::debug!("[{}] <- {:?}", core.name, frame);
    }
    #[cfg(feature = "metrics")]
    crate::metrics::inc_frames(crate::metrics::Direction::Inbound);
}
