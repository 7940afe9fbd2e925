//! Outgoing transfer fragmentation and incoming transfer accounting.
//!
//! One delivery may span many physical Transfer frames, but the session
//! windows count deliveries, not frames: `next_outgoing_id` advances and
//! `remote_incoming_window` shrinks exactly once per delivery on the
//! outgoing side, while every received physical frame consumes one unit
//! of `incoming_window` on the incoming side.

use bytes::Bytes;
use log::error;

use super::{
    core::{SessionCore, unattached_handle_error},
    error::SessionError,
    state::SessionState,
};
use crate::{
    delivery::{Delivery, TransferState},
    link::{LinkError, SendOptions},
    performative::{
        Performative,
        Role,
        SenderSettleMode,
        Transfer,
        codec::{self, FRAME_HEADER_SIZE},
    },
};

impl SessionCore {
    /// Build a delivery for `name` and hand it to the outgoing-transfer
    /// routine, recording link bookkeeping when transmission succeeds.
    pub(crate) fn send_on_link(
        &mut self,
        name: &str,
        payload: Bytes,
        options: &SendOptions,
    ) -> Result<Delivery, SessionError> {
        let (transfer, tag, settled) = {
            let link = self
                .links
                .get_mut(name)
                .ok_or_else(|| SessionError::LinkNotFound(name.to_owned()))?;
            if link.core.role != Role::Sender {
                return Err(LinkError::WrongRole {
                    expected: Role::Sender,
                    actual: link.core.role,
                }
                .into());
            }
            if !link.core.state.is_attached() {
                return Err(LinkError::NotAttached(link.core.state).into());
            }
            let tag = link.next_delivery_tag()?;
            let settled = options
                .settled
                .unwrap_or(link.core.snd_settle_mode == SenderSettleMode::Settled);
            let transfer = Transfer {
                handle: link.core.handle,
                delivery_id: None,
                delivery_tag: Some(tag.clone()),
                message_format: Some(options.message_format.unwrap_or(0)),
                settled: Some(settled),
                more: false,
                rcv_settle_mode: None,
                state: options.state.clone(),
                resume: false,
                aborted: false,
                batchable: false,
                payload,
            };
            (transfer, tag, settled)
        };

        let mut delivery = Delivery::new(transfer);
        self.outgoing_transfer(&mut delivery);
        if delivery.state() == TransferState::Okay {
            if let Some(delivery_id) = delivery.delivery_id() {
                if let Some(link) = self.links.get_mut(name) {
                    link.record_outgoing_delivery(delivery_id, tag, settled);
                }
            }
        }
        Ok(delivery)
    }

    /// Transmit one delivery, fragmenting its payload across as many
    /// Transfer frames as the peer's maximum frame size requires.
    ///
    /// Flow-control refusals are recorded on the delivery, never raised:
    /// `Busy` when the remote incoming window is exhausted, `Error` when
    /// the session is not mapped or the delivery cannot be framed.
    pub(crate) fn outgoing_transfer(&mut self, delivery: &mut Delivery) {
        if self.state != SessionState::Mapped {
            delivery.set_state(TransferState::Error);
            return;
        }
        if self.remote_incoming_window == 0 {
            delivery.set_state(TransferState::Busy);
            return;
        }

        let delivery_id = self.next_outgoing_id;
        delivery.transfer_mut().delivery_id = Some(delivery_id);
        let payload = delivery.transfer().payload.clone();

        // The per-frame payload budget is whatever remains of the peer's
        // max frame size after the encoded performative and frame header.
        let mut template = delivery.transfer().clone();
        template.payload = Bytes::new();
        let overhead = match codec::encoded_len(&Performative::Transfer(template.clone())) {
            Ok(len) => len,
            Err(codec_error) => {
                error!(
                    "[{}] failed to measure transfer overhead: {codec_error}",
                    self.name
                );
                delivery.set_state(TransferState::Error);
                return;
            }
        };
        let max_frame =
            usize::try_from(self.connection.remote_max_frame_size()).unwrap_or(usize::MAX);
        let available_frame_size = max_frame
            .checked_sub(overhead + FRAME_HEADER_SIZE)
            .filter(|size| *size > 0);
        let Some(available_frame_size) = available_frame_size else {
            error!(
                "[{}] remote max frame size {max_frame} cannot fit a transfer for delivery {delivery_id}",
                self.name
            );
            delivery.set_state(TransferState::Error);
            return;
        };

        let out = self.writer();
        let mut start = 0usize;
        while payload.len() - start > available_frame_size {
            let mut fragment = template.clone();
            fragment.more = true;
            fragment.payload = payload.slice(start..start + available_frame_size);
            out.send_transfer(fragment);
            start += available_frame_size;
        }
        let mut last = template;
        last.more = false;
        last.payload = payload.slice(start..);
        out.send_transfer(last);

        self.next_outgoing_id = self.next_outgoing_id.wrapping_add(1);
        self.remote_incoming_window -= 1;
        self.outgoing_window = self.outgoing_window.saturating_sub(1);
        delivery.set_state(TransferState::Okay);
    }

    /// Account for one received Transfer frame and route it to its link.
    ///
    /// A handle with no attached link is fatal: the session discards and
    /// ends, citing the unattached handle. When the incoming window runs
    /// out it is replenished immediately and a Flow advertises the
    /// renewed capacity, so the sender never stalls on a silent zero.
    pub(crate) fn incoming_transfer(&mut self, frame: &Transfer) {
        self.next_incoming_id = Some(self.next_incoming_id.unwrap_or_default().wrapping_add(1));
        self.remote_outgoing_window = self.remote_outgoing_window.saturating_sub(1);
        self.incoming_window = self.incoming_window.saturating_sub(1);

        let routed = self.input_handles.get(&frame.handle).cloned();
        match routed {
            Some(name) => {
                if let Some(link) = self.links.get_mut(&name) {
                    link.on_transfer(frame);
                }
            }
            None => {
                error!(
                    "[{}] received transfer on unattached handle {}, ending session",
                    self.name, frame.handle
                );
                #[cfg(feature = "metrics")]
                crate::metrics::inc_protocol_errors();
                self.outgoing_end(Some(unattached_handle_error()));
                self.detach_all_links();
                self.set_state(SessionState::Discarding);
                return;
            }
        }

        if self.incoming_window == 0 {
            self.incoming_window = self.target_incoming_window;
            self.outgoing_flow(None);
        }
    }
}
