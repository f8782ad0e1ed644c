//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §4.B PeerCall: the state machine for one leg (own device <-> one remote device). It
//! wraps an injected `PeerConnection` and converts WebRTC engine events into outbound
//! signalling messages. It knows nothing about GroupCall or Member -- those layers own
//! routing, retry, and envelope stamping -- the same separation ringrtc draws between
//! `core::connection` (one leg's FSM) and `core::call`/`core::call_manager` (the layers
//! above it).

use std::fmt;

use crate::common::{CallId, DeviceId, Direction, LocalMediaRef, Result};
use crate::core::signaling::{
    Answer, CallErrorCode, Candidate, Candidates, Hangup, Invite, Negotiate, Reject,
    SdpStreamMetadataChanged, SdpType,
};
use crate::error::CoreError;
use crate::webrtc::engine::{
    EngineEvent, IceConnectionState, PeerConnection, SessionDescription,
};

/// §4.B state diagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Fledgling,
    CreateOffer,
    InviteSent,
    Ringing,
    CreateAnswer,
    Connecting,
    Connected,
    Ended,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An inbound signalling message, already stripped of its envelope by `Member` (the
/// envelope's routing fields were only needed to get the message here; PeerCall only
/// needs the payload and the sender's device id for `opponent_party_id`/glare).
#[derive(Clone, Debug, PartialEq)]
pub enum IncomingSignal {
    Invite(CallId, Invite),
    Answer(Answer),
    Candidates(Candidates),
    Negotiate(Negotiate),
    Hangup(Hangup),
    Reject(Reject),
    SdpStreamMetadataChanged(SdpStreamMetadataChanged),
}

/// An outbound signalling payload produced by a PeerCall transition. `Member` stamps the
/// envelope (conf_id, party_id, session ids, seq) and hands it to the transport (§4.C).
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundSignal {
    Invite(Invite),
    Answer(Answer),
    Candidates(Candidates),
    Hangup(Hangup),
    Reject(Reject),
    Negotiate(Negotiate),
}

/// The result of feeding a PeerCall an event. `replace_with_incoming_invite` is set only
/// when this leg lost glare (§4.B "Glare resolution"): the caller should tear this
/// PeerCall down and build a fresh Incoming one from the carried Invite, "as if it had
/// arrived in Fledgling".
#[derive(Default)]
pub struct Outcome {
    pub outbound: Vec<OutboundSignal>,
    pub replace_with_incoming_invite: Option<(CallId, Invite)>,
}

impl Outcome {
    fn with(outbound: Vec<OutboundSignal>) -> Self {
        Self {
            outbound,
            replace_with_incoming_invite: None,
        }
    }

    fn empty() -> Self {
        Self::default()
    }
}

pub struct PeerCall {
    call_id: CallId,
    direction: Direction,
    state: State,
    /// Perfect-Negotiation role (§4.B "Renegotiation"), decided by Member's
    /// initiator-selection rule (§4.C) and passed in at construction.
    polite: bool,
    hangup_reason: Option<CallErrorCode>,
    remote_sdp_applied: bool,
    remote_candidate_buffer: Vec<Candidate>,
    pending_outbound_candidates: Vec<Candidate>,
    opponent_party_id: Option<DeviceId>,
    /// Guards a long operation (`call`/`answer`/renegotiation) against re-entrant
    /// corruption while it's suspended on an engine await (Design Notes §9: "expose
    /// each long operation as a single state-machine transition guarded by an explicit
    /// 'operation in flight' flag").
    in_flight: bool,
    last_local_media: Option<LocalMediaRef>,
    /// The remote offer SDP for a leg sitting in `Ringing`, held until `Member` calls
    /// `answer()`. Set at construction for `new_incoming` and when a Fledgling Outgoing
    /// leg receives an unexpected Invite first (§4.B "Invite while Fledgling").
    pending_invite_sdp: Option<String>,
    engine: Box<dyn PeerConnection>,
}

impl PeerCall {
    pub fn new_outgoing(call_id: CallId, polite: bool, engine: Box<dyn PeerConnection>) -> Self {
        Self {
            call_id,
            direction: Direction::Outgoing,
            state: State::Fledgling,
            polite,
            hangup_reason: None,
            remote_sdp_applied: false,
            remote_candidate_buffer: Vec::new(),
            pending_outbound_candidates: Vec::new(),
            opponent_party_id: None,
            in_flight: false,
            last_local_media: None,
            pending_invite_sdp: None,
            engine,
        }
    }

    /// Constructs the Incoming leg directly in `Ringing`, seeded by the Invite that
    /// created it (§3 "PeerCall is created by its owning Member ... as Incoming on
    /// first m.call.invite reception").
    pub fn new_incoming(
        call_id: CallId,
        polite: bool,
        opponent_party_id: DeviceId,
        invite: Invite,
        engine: Box<dyn PeerConnection>,
    ) -> Self {
        Self {
            call_id,
            direction: Direction::Incoming,
            state: State::Ringing,
            polite,
            hangup_reason: None,
            remote_sdp_applied: false,
            remote_candidate_buffer: Vec::new(),
            pending_outbound_candidates: Vec::new(),
            opponent_party_id: Some(opponent_party_id),
            in_flight: false,
            last_local_media: None,
            pending_invite_sdp: Some(invite.sdp),
            engine,
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn hangup_reason(&self) -> Option<CallErrorCode> {
        self.hangup_reason
    }

    pub fn is_ended(&self) -> bool {
        self.state == State::Ended
    }

    // -----------------------------------------------------------------------------
    // Local operations
    // -----------------------------------------------------------------------------

    /// Only valid from `Fledgling` Outgoing; idempotent for repeated invocation (§4.B).
    pub async fn call(&mut self, media: &LocalMediaRef) -> Result<Outcome> {
        if self.direction != Direction::Outgoing || self.state != State::Fledgling {
            return Ok(Outcome::empty());
        }
        if self.in_flight {
            return Ok(Outcome::empty());
        }
        self.in_flight = true;
        self.state = State::CreateOffer;
        self.last_local_media = Some(media.clone());

        let result = async {
            self.engine.set_local_media(media).await?;
            let offer = self.engine.create_offer().await?;
            self.engine.set_local_description(offer.clone()).await?;
            Ok::<_, CoreError>(offer)
        }
        .await;

        self.in_flight = false;
        let offer = result?;
        self.state = State::InviteSent;
        log::info!("peer_call {}: Fledgling -> InviteSent (call)", self.call_id);
        Ok(Outcome::with(vec![OutboundSignal::Invite(Invite {
            sdp: offer.sdp,
        })]))
    }

    /// Only valid from `Ringing` (§4.B).
    pub async fn answer(&mut self, media: &LocalMediaRef) -> Result<Outcome> {
        if self.state != State::Ringing {
            return Ok(Outcome::empty());
        }
        if self.in_flight {
            return Ok(Outcome::empty());
        }
        let offer_sdp = match self.pending_invite_sdp.take() {
            Some(sdp) => sdp,
            None => return Ok(Outcome::empty()),
        };
        self.in_flight = true;
        self.state = State::CreateAnswer;
        self.last_local_media = Some(media.clone());

        let result = async {
            self.engine.set_local_media(media).await?;
            self.engine
                .set_remote_description(SessionDescription { sdp: offer_sdp })
                .await?;
            let answer = self.engine.create_answer().await?;
            self.engine.set_local_description(answer.clone()).await?;
            Ok::<_, CoreError>(answer)
        }
        .await;

        self.in_flight = false;
        let answer = result?;
        self.remote_sdp_applied = true;
        self.state = State::Connecting;
        log::info!(
            "peer_call {}: Ringing -> Connecting (answer)",
            self.call_id
        );
        let mut outcome = Outcome::with(vec![OutboundSignal::Answer(Answer { sdp: answer.sdp })]);
        self.flush_candidate_buffer().await?;
        self.flush_pending_outbound(&mut outcome.outbound);
        Ok(outcome)
    }

    /// Valid in any non-Ended state (§4.B).
    pub async fn hangup(&mut self, reason: CallErrorCode) -> Outcome {
        if self.state == State::Ended {
            return Outcome::empty();
        }
        self.enter_ended(Some(reason)).await;
        Outcome::with(vec![OutboundSignal::Hangup(Hangup { reason })])
    }

    /// Local-only termination: no Hangup is emitted (§4.B "used when the peer is
    /// already gone").
    pub async fn close(&mut self, reason: Option<CallErrorCode>) {
        if self.state == State::Ended {
            return;
        }
        self.enter_ended(reason).await;
    }

    async fn enter_ended(&mut self, reason: Option<CallErrorCode>) {
        self.hangup_reason = reason;
        self.state = State::Ended;
        self.engine.close().await;
        log::info!(
            "peer_call {}: -> Ended (reason={reason:?})",
            self.call_id
        );
    }

    /// Replaces local tracks. Triggers renegotiation via `m.call.negotiate` (§4.B
    /// `set_media`). The polite side always renegotiates; the impolite side still sends
    /// but silently drops a collision if one occurs (handled by `handle_incoming` when
    /// the remote's own Negotiate arrives first).
    pub async fn set_media(&mut self, media: &LocalMediaRef) -> Result<Outcome> {
        if self.state != State::Connecting && self.state != State::Connected {
            self.last_local_media = Some(media.clone());
            return Ok(Outcome::empty());
        }
        let changed = self.last_local_media.as_ref().map(|m| &m.0) != Some(&media.0);
        self.last_local_media = Some(media.clone());
        if !changed {
            return Ok(Outcome::empty());
        }
        self.engine.set_local_media(media).await?;
        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer.clone()).await?;
        Ok(Outcome::with(vec![OutboundSignal::Negotiate(Negotiate {
            sdp: offer.sdp,
            description_type: SdpType::Offer,
        })]))
    }

    // -----------------------------------------------------------------------------
    // Inbound signalling (§4.B dispatch table)
    // -----------------------------------------------------------------------------

    pub async fn handle_incoming_signalling(
        &mut self,
        sender: DeviceId,
        msg: IncomingSignal,
    ) -> Result<Outcome> {
        if self.state == State::Ended {
            log::debug!("peer_call {}: ignoring {:?} in Ended", self.call_id, msg);
            return Ok(Outcome::empty());
        }

        match msg {
            IncomingSignal::Invite(incoming_call_id, invite) => {
                self.handle_invite(sender, incoming_call_id, invite).await
            }
            IncomingSignal::Answer(answer) => self.handle_answer(answer).await,
            IncomingSignal::Candidates(candidates) => self.handle_candidates(candidates).await,
            IncomingSignal::Negotiate(negotiate) => self.handle_negotiate(negotiate).await,
            IncomingSignal::Hangup(hangup) => {
                self.close(Some(hangup.reason)).await;
                Ok(Outcome::empty())
            }
            IncomingSignal::Reject(reject) => {
                self.close(reject.reason).await;
                Ok(Outcome::empty())
            }
            IncomingSignal::SdpStreamMetadataChanged(_) => {
                // Opaque passthrough; nothing in this core depends on its contents
                // beyond handing it to the observer (§4.B table: "update").
                Ok(Outcome::empty())
            }
        }
    }

    async fn handle_invite(
        &mut self,
        sender: DeviceId,
        incoming_call_id: CallId,
        invite: Invite,
    ) -> Result<Outcome> {
        match self.state {
            State::Fledgling => {
                self.call_id = incoming_call_id;
                self.opponent_party_id = Some(sender);
                self.state = State::Ringing;
                self.direction = Direction::Incoming;
                self.last_local_media = None;
                self.pending_invite_sdp = Some(invite.sdp);
                Ok(Outcome::empty())
            }
            State::CreateOffer | State::InviteSent => {
                // Glare (§4.B "Glare resolution"): lexicographically lower call_id wins.
                if incoming_call_id.as_str() < self.call_id.as_str() {
                    log::info!(
                        "peer_call {}: lost glare to {}",
                        self.call_id,
                        incoming_call_id
                    );
                    self.enter_ended(Some(CallErrorCode::Replaced)).await;
                    Ok(Outcome {
                        outbound: Vec::new(),
                        replace_with_incoming_invite: Some((incoming_call_id, invite)),
                    })
                } else {
                    log::info!(
                        "peer_call {}: won glare against {}",
                        self.call_id,
                        incoming_call_id
                    );
                    Ok(Outcome::empty())
                }
            }
            State::Ringing | State::CreateAnswer => {
                // We've already taken on the Incoming role for this pair; a second
                // Invite mid-ring is glare against the offer we're about to answer.
                if incoming_call_id.as_str() < self.call_id.as_str() {
                    self.enter_ended(Some(CallErrorCode::Replaced)).await;
                    Ok(Outcome {
                        outbound: Vec::new(),
                        replace_with_incoming_invite: Some((incoming_call_id, invite)),
                    })
                } else {
                    Ok(Outcome::empty())
                }
            }
            State::Connecting | State::Connected | State::Ended => {
                log::debug!(
                    "peer_call {}: ignoring stray Invite {} in {:?}",
                    self.call_id,
                    incoming_call_id,
                    self.state
                );
                Ok(Outcome::empty())
            }
        }
    }

    async fn handle_answer(&mut self, answer: Answer) -> Result<Outcome> {
        if self.state != State::InviteSent {
            log::debug!(
                "peer_call {}: ignoring Answer in {:?}",
                self.call_id,
                self.state
            );
            return Ok(Outcome::empty());
        }
        self.engine
            .set_remote_description(SessionDescription { sdp: answer.sdp })
            .await?;
        self.remote_sdp_applied = true;
        self.state = State::Connecting;
        log::info!(
            "peer_call {}: InviteSent -> Connecting (answer applied)",
            self.call_id
        );
        let mut outcome = Outcome::empty();
        self.flush_candidate_buffer().await?;
        self.flush_pending_outbound(&mut outcome.outbound);
        Ok(outcome)
    }

    async fn handle_candidates(&mut self, candidates: Candidates) -> Result<Outcome> {
        for candidate in candidates.candidates {
            if candidate.is_end_of_candidates() {
                continue;
            }
            if self.remote_sdp_applied {
                self.engine.add_ice_candidate(candidate).await?;
            } else {
                self.remote_candidate_buffer.push(candidate);
            }
        }
        Ok(Outcome::empty())
    }

    async fn handle_negotiate(&mut self, negotiate: Negotiate) -> Result<Outcome> {
        if self.state != State::Connecting && self.state != State::Connected {
            log::debug!(
                "peer_call {}: ignoring Negotiate in {:?}",
                self.call_id,
                self.state
            );
            return Ok(Outcome::empty());
        }
        match negotiate.description_type {
            SdpType::Answer => {
                self.engine
                    .set_remote_description(SessionDescription { sdp: negotiate.sdp })
                    .await?;
                Ok(Outcome::empty())
            }
            SdpType::Offer => {
                let colliding = self.in_flight;
                if colliding {
                    if !self.polite {
                        // Impolite side ignores the collision (§4.B "Renegotiation").
                        log::debug!(
                            "peer_call {}: impolite side ignoring colliding Negotiate offer",
                            self.call_id
                        );
                        return Ok(Outcome::empty());
                    }
                    self.engine.rollback_local_description().await?;
                }
                self.engine
                    .set_remote_description(SessionDescription { sdp: negotiate.sdp })
                    .await?;
                let answer = self.engine.create_answer().await?;
                self.engine.set_local_description(answer.clone()).await?;
                Ok(Outcome::with(vec![OutboundSignal::Negotiate(Negotiate {
                    sdp: answer.sdp,
                    description_type: SdpType::Answer,
                })]))
            }
        }
    }

    // -----------------------------------------------------------------------------
    // Engine-driven events
    // -----------------------------------------------------------------------------

    pub async fn handle_engine_event(&mut self, event: EngineEvent) -> Result<Outcome> {
        match event {
            EngineEvent::LocalIceCandidate(candidate) => Ok(self.send_candidate(candidate)),
            EngineEvent::IceGatheringComplete => {
                Ok(self.send_candidate(Candidate::end_of_candidates()))
            }
            EngineEvent::IceConnectionStateChanged(IceConnectionState::Connected) => {
                if self.state == State::Connecting {
                    self.state = State::Connected;
                    log::info!("peer_call {}: Connecting -> Connected", self.call_id);
                }
                Ok(Outcome::empty())
            }
            EngineEvent::IceConnectionStateChanged(IceConnectionState::Failed) => {
                Ok(self.hangup(CallErrorCode::IceFailed).await)
            }
            EngineEvent::IceConnectionStateChanged(_) => Ok(Outcome::empty()),
            EngineEvent::NegotiationNeeded | EngineEvent::RemoteTrackAdded => {
                Ok(Outcome::empty())
            }
        }
    }

    /// Called by the WebRTC engine for every locally gathered candidate (§4.B
    /// `send_candidate`).
    fn send_candidate(&mut self, candidate: Candidate) -> Outcome {
        if self.remote_sdp_applied {
            Outcome::with(vec![OutboundSignal::Candidates(Candidates {
                candidates: vec![candidate],
            })])
        } else {
            self.pending_outbound_candidates.push(candidate);
            Outcome::empty()
        }
    }

    async fn flush_candidate_buffer(&mut self) -> Result<()> {
        for candidate in self.remote_candidate_buffer.drain(..) {
            self.engine.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    fn flush_pending_outbound(&mut self, outbound: &mut Vec<OutboundSignal>) {
        if !self.pending_outbound_candidates.is_empty() {
            outbound.push(OutboundSignal::Candidates(Candidates {
                candidates: std::mem::take(&mut self.pending_outbound_candidates),
            }));
        }
    }
}
