//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §4.C Member: owns the single active PeerCall for one remote (user_id, device_id),
//! decides who initiates, retries retryable hangups, and stamps/filters the signalling
//! envelope. Grounded on the role ringrtc's `core::call::Call` plays relative to
//! `core::connection::Connection` -- a thin owner that multiplexes retries and outbound
//! framing around a single per-peer state machine, generalized here from "one device we
//! called" to "one device we may call or be called by".

use crate::common::{
    CallId, ConferenceId, DeviceId, LocalMediaRef, MemberKey, Result, SessionId, UserId,
};
use crate::core::peer_call::{IncomingSignal, OutboundSignal, PeerCall};
use crate::core::signaling::{Envelope, Message};
use crate::webrtc::engine::PeerConnectionFactory;

/// An outbound signalling message, stamped and addressed but not yet encrypted or sent
/// (§4.C "signalling outbound envelope"). `GroupCall` hands these to the encrypter and
/// then the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub message: Message,
}

/// One remote device's membership in this call (§3 Member attributes).
pub struct Member {
    conf_id: ConferenceId,
    user_id: UserId,
    device_id: DeviceId,
    own_user_id: UserId,
    own_device_id: DeviceId,
    own_session_id: SessionId,
    /// The remote's current `session_id` as last observed in `m.call.member` (§4.D
    /// "Inbound filter" uses this, renamed `dest_session_id` on outbound envelopes).
    session_id: SessionId,
    /// Position in the membership device list (§3 Member attributes). Informational
    /// only: initiator selection (§4.C) is defined purely in terms of lexicographic
    /// `(user_id, device_id)` comparison and never consults this.
    device_index: u32,
    event_timestamp: u64,
    /// MSC3401-style membership-expiry supplement (SPEC_FULL.md §C.1): `None` means the
    /// device's membership never expires on its own.
    expires_ms: Option<u64>,
    retry_count: u32,
    last_local_media: Option<LocalMediaRef>,
    peer_call: Option<PeerCall>,
    next_seq: u64,
}

impl Member {
    /// §4.C "re-runs connect() if retry_count <= 3".
    pub const MAX_RETRY_COUNT: u32 = 3;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conf_id: ConferenceId,
        user_id: UserId,
        device_id: DeviceId,
        session_id: SessionId,
        device_index: u32,
        event_timestamp: u64,
        expires_ms: Option<u64>,
        own_user_id: UserId,
        own_device_id: DeviceId,
        own_session_id: SessionId,
    ) -> Self {
        Self {
            conf_id,
            user_id,
            device_id,
            own_user_id,
            own_device_id,
            own_session_id,
            session_id,
            device_index,
            event_timestamp,
            expires_ms,
            retry_count: 0,
            last_local_media: None,
            peer_call: None,
            next_seq: 0,
        }
    }

    /// §4.D reconciliation "update the Member's call info in place" for the
    /// same-session-id branch.
    pub fn update_call_info(&mut self, device_index: u32, event_timestamp: u64, expires_ms: Option<u64>) {
        self.device_index = device_index;
        self.event_timestamp = event_timestamp;
        self.expires_ms = expires_ms;
    }

    /// MSC3401-style membership expiry (SPEC_FULL.md §C.1): true once `now_ms` has
    /// passed this device's last-seen timestamp plus its advertised `expires_ms`, so
    /// `GroupCall` reconciliation can drop it even without an explicit removal.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_ms {
            Some(expires_ms) => now_ms >= self.event_timestamp.saturating_add(expires_ms),
            None => false,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn has_active_peer_call(&self) -> bool {
        matches!(&self.peer_call, Some(pc) if !pc.is_ended())
    }

    /// The owned leg's current state, for host-application UI and tests. `None` before
    /// any PeerCall has been created.
    pub fn peer_call_state(&self) -> Option<crate::core::peer_call::State> {
        self.peer_call.as_ref().map(|pc| pc.state())
    }

    /// The owned leg's call id, if any (§3 PeerCall identity).
    pub fn peer_call_id(&self) -> Option<&CallId> {
        self.peer_call.as_ref().map(|pc| pc.call_id())
    }

    fn own_key(&self) -> MemberKey {
        MemberKey::new(self.own_user_id.clone(), self.own_device_id.clone())
    }

    fn remote_key(&self) -> MemberKey {
        MemberKey::new(self.user_id.clone(), self.device_id.clone())
    }

    /// §4.C "Initiator selection": this side initiates iff the remote (user_id,
    /// device_id) is lexicographically *less than* ours. `MemberKey`'s derived `Ord`
    /// compares `user_id` first, then `device_id`, which collapses the "same user,
    /// different device" and "different user" branches into one comparison.
    pub fn is_initiator(&self) -> bool {
        self.remote_key() < self.own_key()
    }

    /// §4.B "Renegotiation": the polite side is the receiver, i.e. whichever side is
    /// *not* the initiator. The parenthetical in §4.B describing the polite side as
    /// lexicographically "greater" conflicts with §4.C's own definition of the
    /// lexicographically-greater side as the initiator; this core follows the explicit
    /// "i.e., the receiver" clause and standard Perfect-Negotiation practice (the callee
    /// is polite, the caller is impolite) rather than the inconsistent "greater" wording.
    fn is_polite(&self) -> bool {
        !self.is_initiator()
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn stamp(&mut self, call_id: &CallId, signal: OutboundSignal) -> OutboundMessage {
        let envelope = Envelope {
            call_id: call_id.clone(),
            conf_id: self.conf_id.clone(),
            party_id: self.own_device_id.clone(),
            device_id: self.device_id.clone(),
            sender_session_id: self.own_session_id.clone(),
            dest_session_id: self.session_id.clone(),
            seq: self.next_seq(),
        };
        let message = match signal {
            OutboundSignal::Invite(p) => Message::Invite(envelope, p),
            OutboundSignal::Answer(p) => Message::Answer(envelope, p),
            OutboundSignal::Candidates(p) => Message::Candidates(envelope, p),
            OutboundSignal::Hangup(p) => Message::Hangup(envelope, p),
            OutboundSignal::Reject(p) => Message::Reject(envelope, p),
            OutboundSignal::Negotiate(p) => Message::Negotiate(envelope, p),
        };
        OutboundMessage {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            message,
        }
    }

    fn stamp_all(&mut self, call_id: CallId, signals: Vec<OutboundSignal>) -> Vec<OutboundMessage> {
        signals
            .into_iter()
            .map(|s| self.stamp(&call_id, s))
            .collect()
    }

    /// Drives initiator selection and, if this side initiates, creates a fresh Outgoing
    /// PeerCall and sends the Invite (§4.C, §4.D `join()`/retry). A no-op on the
    /// non-initiating side: it simply clears any prior, now-Ended PeerCall so a fresh
    /// incoming Invite can start a new one.
    pub async fn connect(
        &mut self,
        local_media: &LocalMediaRef,
        factory: &dyn PeerConnectionFactory,
    ) -> Result<Vec<OutboundMessage>> {
        self.last_local_media = Some(local_media.clone());
        if let Some(pc) = &self.peer_call {
            if !pc.is_ended() {
                return Ok(Vec::new());
            }
        }
        self.peer_call = None;
        if !self.is_initiator() {
            return Ok(Vec::new());
        }

        let call_id = CallId::generate();
        let engine = factory.create_peer_connection(&call_id).await?;
        let mut peer_call = PeerCall::new_outgoing(call_id.clone(), self.is_polite(), engine);
        let outcome = peer_call.call(local_media).await?;
        self.peer_call = Some(peer_call);
        Ok(self.stamp_all(call_id, outcome.outbound))
    }

    /// Accepts the locally owned PeerCall's incoming ring (§4.B `answer()`), only valid
    /// while a PeerCall is sitting in `Ringing`.
    pub async fn answer(&mut self, local_media: &LocalMediaRef) -> Result<Vec<OutboundMessage>> {
        let Some(peer_call) = &mut self.peer_call else {
            return Ok(Vec::new());
        };
        let call_id = peer_call.call_id().clone();
        let outcome = peer_call.answer(local_media).await?;
        Ok(self.stamp_all(call_id, outcome.outbound))
    }

    /// Replaces local tracks on the owned PeerCall, if any (§4.D `set_media` fan-out).
    pub async fn set_media(&mut self, local_media: &LocalMediaRef) -> Result<Vec<OutboundMessage>> {
        self.last_local_media = Some(local_media.clone());
        let Some(peer_call) = &mut self.peer_call else {
            return Ok(Vec::new());
        };
        let call_id = peer_call.call_id().clone();
        let outcome = peer_call.set_media(local_media).await?;
        Ok(self.stamp_all(call_id, outcome.outbound))
    }

    /// §4.D "Inbound filter" plus routing into the owned PeerCall, folding in glare
    /// replacement and the retry policy. Returns the outbound messages this produced.
    pub async fn handle_device_message(
        &mut self,
        envelope: &Envelope,
        signal: IncomingSignal,
        factory: &dyn PeerConnectionFactory,
    ) -> Result<Vec<OutboundMessage>> {
        if envelope.dest_session_id != self.own_session_id {
            log::debug!(
                "member {}/{}: dropping message for stale session {:?} (current {:?})",
                self.user_id,
                self.device_id,
                envelope.dest_session_id,
                self.own_session_id
            );
            return Ok(Vec::new());
        }

        let sender = envelope.party_id.clone();
        let mut outbound = Vec::new();

        match self.peer_call.as_mut() {
            None => {
                if let IncomingSignal::Invite(call_id, invite) = signal {
                    let engine = factory.create_peer_connection(&call_id).await?;
                    self.peer_call = Some(PeerCall::new_incoming(
                        call_id,
                        self.is_polite(),
                        sender,
                        invite,
                        engine,
                    ));
                } else {
                    log::debug!(
                        "member {}/{}: dropping stray signalling with no active call",
                        self.user_id,
                        self.device_id
                    );
                }
            }
            Some(peer_call) => {
                let call_id = peer_call.call_id().clone();
                let outcome = peer_call.handle_incoming_signalling(sender.clone(), signal).await?;
                outbound.extend(self.stamp_all(call_id, outcome.outbound));

                if let Some((new_call_id, invite)) = outcome.replace_with_incoming_invite {
                    let engine = factory.create_peer_connection(&new_call_id).await?;
                    self.peer_call = Some(PeerCall::new_incoming(
                        new_call_id,
                        self.is_polite(),
                        sender,
                        invite,
                        engine,
                    ));
                }
            }
        }

        outbound.extend(self.retry_if_ended(factory).await?);
        Ok(outbound)
    }

    /// Feeds a WebRTC engine event (ICE candidate, connection state) into the owned
    /// PeerCall and runs the retry policy afterward.
    pub async fn handle_engine_event(
        &mut self,
        event: crate::webrtc::engine::EngineEvent,
        factory: &dyn PeerConnectionFactory,
    ) -> Result<Vec<OutboundMessage>> {
        let Some(peer_call) = self.peer_call.as_mut() else {
            return Ok(Vec::new());
        };
        let call_id = peer_call.call_id().clone();
        let outcome = peer_call.handle_engine_event(event).await?;
        let mut outbound = self.stamp_all(call_id, outcome.outbound);
        outbound.extend(self.retry_if_ended(factory).await?);
        Ok(outbound)
    }

    /// §4.C retry policy: a retryable terminal hangup re-runs `connect()` up to
    /// `MAX_RETRY_COUNT` times; a non-retryable one (or an exhausted retry budget) just
    /// drops the dead PeerCall, leaving the Member otherwise intact.
    async fn retry_if_ended(&mut self, factory: &dyn PeerConnectionFactory) -> Result<Vec<OutboundMessage>> {
        let Some(peer_call) = &self.peer_call else {
            return Ok(Vec::new());
        };
        if !peer_call.is_ended() {
            return Ok(Vec::new());
        }
        let retryable = peer_call
            .hangup_reason()
            .map(|r| r.is_retryable())
            .unwrap_or(false);
        self.peer_call = None;
        if !retryable || self.retry_count >= Self::MAX_RETRY_COUNT {
            return Ok(Vec::new());
        }
        self.retry_count += 1;
        let Some(media) = self.last_local_media.clone() else {
            return Ok(Vec::new());
        };
        log::info!(
            "member {}/{}: retrying connection (attempt {})",
            self.user_id,
            self.device_id,
            self.retry_count
        );
        self.connect(&media, factory).await
    }

    /// Tears down the owned PeerCall without emitting a Hangup (§4.B `close`), used when
    /// `GroupCall` is removing this Member outright (membership reconciliation, `leave`).
    pub async fn close(&mut self) {
        if let Some(peer_call) = &mut self.peer_call {
            peer_call.close(None).await;
        }
        self.peer_call = None;
    }
}
