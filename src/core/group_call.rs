//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §4.D GroupCall: owns one conference's Member set, its own join/leave lifecycle, and
//! the buffering of to-device messages that outrun their sender's membership event.
//! Grounded on the lifecycle-and-membership-map shape of ringrtc's
//! `core::call_manager::CallManager` (owns a map keyed by an opaque id, drives state
//! transitions from both local intents and remote events) generalized from "one 1:1 call
//! per id" to "one Member per remote device in a shared conference".

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::common::{
    ConferenceId, DeviceId, Intent, LocalMediaRef, MediaType, MemberKey, MuteSettings, Result,
    SessionId, UserId,
};
use crate::core::member::{Member, OutboundMessage};
use crate::core::peer_call::IncomingSignal;
use crate::core::signaling::{
    ConferenceStateContent, Message, MemberCallEntry, MemberDeviceEntry, MemberStateContent,
};
use crate::error::CoreError;
use crate::transport::{DeviceMessageEncrypter, HomeserverTransport, IceServerConfig};
use crate::webrtc::engine::{EngineEvent, PeerConnectionFactory};

/// §3 "Lifecycle states: Fledgling -> Creating -> Created -> Joining -> Joined, with
/// Joined -> Created on disconnect."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupCallState {
    Fledgling,
    Creating,
    Created,
    Joining,
    Joined,
}

/// SPEC_FULL.md §C.2: a diagnostic classification of why a GroupCall stopped being
/// Joined, mirroring the role ringrtc's `group_call::EndReason` plays for its
/// `Client::on_ended` callback. Not wired to an observer in this core (no UI layer to
/// notify) but recorded so a host application layer can surface it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupCallEndReason {
    LocalLeave,
    RemovedFromConference,
    ConferenceTerminated,
}

fn to_incoming(msg: Message) -> (crate::core::signaling::Envelope, IncomingSignal) {
    match msg {
        Message::Invite(e, p) => {
            let call_id = e.call_id.clone();
            (e, IncomingSignal::Invite(call_id, p))
        }
        Message::Answer(e, p) => (e, IncomingSignal::Answer(p)),
        Message::Candidates(e, p) => (e, IncomingSignal::Candidates(p)),
        Message::Hangup(e, p) => (e, IncomingSignal::Hangup(p)),
        Message::Reject(e, p) => (e, IncomingSignal::Reject(p)),
        Message::Negotiate(e, p) => (e, IncomingSignal::Negotiate(p)),
        Message::SdpStreamMetadataChanged(e, p) => {
            (e, IncomingSignal::SdpStreamMetadataChanged(p))
        }
        Message::Unknown { .. } => unreachable!("caller filters Unknown before conversion"),
    }
}

pub struct GroupCall {
    conference_id: ConferenceId,
    intent: Intent,
    media_type: MediaType,
    name: Option<String>,
    terminated: bool,
    state: GroupCallState,

    own_user_id: UserId,
    own_device_id: DeviceId,
    own_session_id: Option<SessionId>,
    own_device_index: Option<u32>,
    own_event_timestamp: Option<u64>,

    local_media: Option<LocalMediaRef>,
    local_mute: MuteSettings,
    turn_server: Option<IceServerConfig>,

    members: HashMap<MemberKey, Member>,
    /// Capped per-key queue of to-device messages that arrived before their sender's
    /// Member existed (§4.D "To-device routing and buffering").
    buffered: HashMap<MemberKey, VecDeque<Message>>,

    last_end_reason: Option<GroupCallEndReason>,

    transport: Arc<dyn HomeserverTransport>,
    encrypter: Arc<dyn DeviceMessageEncrypter>,
    engine_factory: Arc<dyn PeerConnectionFactory>,
}

impl GroupCall {
    /// §4.D "implementations must cap per-key buffer size (recommended: 64 messages)".
    pub const BUFFER_CAP: usize = 64;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conference_id: ConferenceId,
        intent: Intent,
        media_type: MediaType,
        own_user_id: UserId,
        own_device_id: DeviceId,
        transport: Arc<dyn HomeserverTransport>,
        encrypter: Arc<dyn DeviceMessageEncrypter>,
        engine_factory: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        Self {
            conference_id,
            intent,
            media_type,
            name: None,
            terminated: false,
            state: GroupCallState::Fledgling,
            own_user_id,
            own_device_id,
            own_session_id: None,
            own_device_index: None,
            own_event_timestamp: None,
            local_media: None,
            local_mute: MuteSettings::default(),
            turn_server: None,
            members: HashMap::new(),
            buffered: HashMap::new(),
            last_end_reason: None,
            transport,
            encrypter,
            engine_factory,
        }
    }

    /// Constructs a GroupCall seeded from an inbound `m.call` state event, observed
    /// before any local intent (§3 "GroupCall is created by the Registry on first
    /// observation of ... a conference state event").
    #[allow(clippy::too_many_arguments)]
    pub fn from_remote_state(
        conference_id: ConferenceId,
        content: &ConferenceStateContent,
        own_user_id: UserId,
        own_device_id: DeviceId,
        transport: Arc<dyn HomeserverTransport>,
        encrypter: Arc<dyn DeviceMessageEncrypter>,
        engine_factory: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        let mut call = Self::new(
            conference_id,
            content.intent.into(),
            content.media_type.into(),
            own_user_id,
            own_device_id,
            transport,
            encrypter,
            engine_factory,
        );
        call.state = GroupCallState::Created;
        call.apply_conference_state(content);
        call
    }

    pub fn conference_id(&self) -> &ConferenceId {
        &self.conference_id
    }

    pub fn state(&self) -> GroupCallState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn has_joined(&self) -> bool {
        matches!(self.state, GroupCallState::Joining | GroupCallState::Joined)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Looks up a Member by its `(user_id, device_id)` key, for host-application UI and
    /// tests.
    pub fn member(&self, key: &MemberKey) -> Option<&Member> {
        self.members.get(key)
    }

    pub fn last_end_reason(&self) -> Option<GroupCallEndReason> {
        self.last_end_reason
    }

    /// This device's current join session id, if joined (§3 "sender_session_id").
    pub fn own_session_id(&self) -> Option<&SessionId> {
        self.own_session_id.as_ref()
    }

    fn apply_conference_state(&mut self, content: &ConferenceStateContent) {
        self.intent = content.intent.into();
        self.media_type = content.media_type.into();
        self.name = content.name.clone();
        if content.terminated.unwrap_or(false) {
            self.terminated = true;
        }
    }

    /// Applies a freshly decoded `m.call` state event to this already-existing GroupCall
    /// (as opposed to `from_remote_state`, which constructs one).
    pub fn update_conference_state(&mut self, content: &ConferenceStateContent) {
        self.apply_conference_state(content);
    }

    // -----------------------------------------------------------------------------
    // Local operations (§4.D)
    // -----------------------------------------------------------------------------

    /// Valid only from `Fledgling`.
    pub async fn create(&mut self) -> Result<()> {
        if self.state != GroupCallState::Fledgling {
            return Err(CoreError::invalid_state("create", self.state));
        }
        self.state = GroupCallState::Creating;
        let content = ConferenceStateContent {
            intent: self.intent.into(),
            media_type: self.media_type.into(),
            name: self.name.clone(),
            terminated: None,
        };
        let content_value = serde_json::to_value(&content).map_err(|e| {
            CoreError::MalformedEvent(crate::error::SignalingError::WrongShape {
                field: "conference_state",
                reason: e.to_string(),
            })
        })?;
        self.transport
            .send_state(
                crate::core::signaling::EVENT_TYPE_CALL,
                self.conference_id.as_str(),
                content_value,
            )
            .await?;
        self.state = GroupCallState::Created;
        log::info!("groupcall {}: Fledgling -> Created", self.conference_id);
        Ok(())
    }

    /// Valid from `Created`. Writes the own membership entry, transitions to `Joining`,
    /// and connects to every already-known Member; becomes `Joined` once the own
    /// membership event round-trips back through `update_membership`.
    pub async fn join(&mut self, local_media: LocalMediaRef) -> Result<()> {
        if self.state != GroupCallState::Created {
            return Err(CoreError::invalid_state("join", self.state));
        }
        self.state = GroupCallState::Joining;
        self.local_media = Some(local_media.clone());
        self.own_session_id = Some(SessionId::generate());
        self.terminated = false;

        self.turn_server = Some(self.transport.query_turn_settings().await?);
        self.publish_own_membership().await?;

        let mut outbound = Vec::new();
        for member in self.members.values_mut() {
            outbound.extend(member.connect(&local_media, self.engine_factory.as_ref()).await?);
        }
        self.dispatch(outbound).await?;
        log::info!("groupcall {}: Created -> Joining", self.conference_id);
        Ok(())
    }

    /// Valid while `has_joined()`. Disposes every Member and clears local join state.
    pub async fn leave(&mut self) -> Result<()> {
        if !self.has_joined() {
            return Err(CoreError::invalid_state("leave", self.state));
        }
        for member in self.members.values_mut() {
            member.close().await;
        }
        self.members.clear();
        self.buffered.clear();

        self.retract_own_membership().await?;

        if matches!(self.intent, Intent::Ring) {
            self.terminated = true;
            self.send_terminated_state().await?;
            self.last_end_reason = Some(GroupCallEndReason::ConferenceTerminated);
        } else {
            self.last_end_reason = Some(GroupCallEndReason::LocalLeave);
        }

        self.local_media = None;
        self.own_session_id = None;
        self.own_device_index = None;
        self.own_event_timestamp = None;
        self.turn_server = None;
        self.state = GroupCallState::Created;
        log::info!("groupcall {}: -> Created (leave)", self.conference_id);
        Ok(())
    }

    /// Fans `local_media` out to every Member (§4.D `set_media`).
    pub async fn set_media(&mut self, local_media: LocalMediaRef) -> Result<()> {
        self.local_media = Some(local_media.clone());
        let mut outbound = Vec::new();
        for member in self.members.values_mut() {
            outbound.extend(member.set_media(&local_media).await?);
        }
        self.dispatch(outbound).await
    }

    /// Updates local mute state, fanning out only if it actually changed (§4.D
    /// `set_muted`). Mute is signalled via a fresh `m.call.member` publish rather than a
    /// PeerCall renegotiation, since it doesn't change the track set `set_media` reacts
    /// to; muting is local-track-enable and is out of this core's signalling surface
    /// beyond the membership event's informational feeds.
    pub async fn set_muted(&mut self, mute: MuteSettings) -> Result<()> {
        if mute == self.local_mute {
            return Ok(());
        }
        self.local_mute = mute;
        if self.has_joined() {
            self.publish_own_membership().await?;
        }
        Ok(())
    }

    /// Accepts a ringing Member's incoming PeerCall (§4.B `answer()`). The host
    /// application decides when to call this (e.g. the user tapped "accept"); GroupCall
    /// itself never auto-answers.
    pub async fn answer(&mut self, key: &MemberKey, local_media: LocalMediaRef) -> Result<()> {
        let Some(member) = self.members.get_mut(key) else {
            return Ok(());
        };
        let outbound = member.answer(&local_media).await?;
        self.dispatch(outbound).await
    }

    // -----------------------------------------------------------------------------
    // Membership reconciliation (§4.D)
    // -----------------------------------------------------------------------------

    pub async fn update_membership(
        &mut self,
        user_id: UserId,
        devices: Vec<MemberDeviceEntry>,
        event_timestamp: u64,
    ) -> Result<()> {
        let mut outbound = Vec::new();
        let mut seen: HashSet<DeviceId> = HashSet::new();
        let own_seen_in_own_event = user_id == self.own_user_id;

        for (index, device) in devices.iter().enumerate() {
            seen.insert(device.device_id.clone());

            if own_seen_in_own_event && device.device_id == self.own_device_id {
                self.own_device_index = Some(index as u32);
                self.own_event_timestamp = Some(event_timestamp);
                if self.state == GroupCallState::Joining {
                    self.state = GroupCallState::Joined;
                    log::info!("groupcall {}: Joining -> Joined", self.conference_id);
                }
                continue;
            }

            let key = MemberKey::new(user_id.clone(), device.device_id.clone());
            match self.members.get_mut(&key) {
                None => {
                    let mut member = self.new_member(
                        &key,
                        &device.session_id,
                        index as u32,
                        event_timestamp,
                        device.expires_ms,
                    );
                    if self.has_joined() {
                        if let Some(media) = self.local_media.clone() {
                            outbound.extend(
                                member.connect(&media, self.engine_factory.as_ref()).await?,
                            );
                        }
                    }
                    self.members.insert(key.clone(), member);
                    outbound.extend(self.flush_buffer(&key).await?);
                }
                Some(existing) => {
                    if existing.session_id() != &device.session_id {
                        existing.close().await;
                        self.members.remove(&key);
                        let mut member = self.new_member(
                            &key,
                            &device.session_id,
                            index as u32,
                            event_timestamp,
                            device.expires_ms,
                        );
                        if self.has_joined() {
                            if let Some(media) = self.local_media.clone() {
                                outbound.extend(
                                    member.connect(&media, self.engine_factory.as_ref()).await?,
                                );
                            }
                        }
                        self.members.insert(key.clone(), member);
                        outbound.extend(self.flush_buffer(&key).await?);
                    } else {
                        existing.update_call_info(index as u32, event_timestamp, device.expires_ms);
                    }
                }
            }
        }

        // MSC3401-style membership expiry (SPEC_FULL.md §C.1): any member whose
        // advertised `expires_ms` has lapsed by this event's timestamp is dropped, even
        // if it was never explicitly removed from a device list.
        let expired: Vec<MemberKey> = self
            .members
            .iter()
            .filter(|(_, member)| member.is_expired(event_timestamp))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if let Some(mut member) = self.members.remove(&key) {
                log::info!(
                    "groupcall {}: member {:?} membership expired, dropping",
                    self.conference_id,
                    key
                );
                member.close().await;
            }
            self.buffered.remove(&key);
        }

        if own_seen_in_own_event && !seen.contains(&self.own_device_id) {
            // Own device absent from own membership event: treated as a local
            // disconnect (§4.D).
            for member in self.members.values_mut() {
                member.close().await;
            }
            self.members.clear();
            self.buffered.clear();
            self.local_media = None;
            self.own_session_id = None;
            self.state = GroupCallState::Created;
            self.last_end_reason = Some(GroupCallEndReason::RemovedFromConference);
            log::warn!(
                "groupcall {}: own device absent from membership event, treating as disconnect",
                self.conference_id
            );
            self.dispatch(outbound).await?;
            return Ok(());
        }

        if own_seen_in_own_event {
            let stale: Vec<MemberKey> = self
                .members
                .keys()
                .filter(|k| k.user_id == self.own_user_id)
                .filter(|k| !seen.contains(&k.device_id))
                .cloned()
                .collect();
            for key in stale {
                if let Some(mut member) = self.members.remove(&key) {
                    member.close().await;
                }
                self.buffered.remove(&key);
            }
        } else {
            let stale: Vec<MemberKey> = self
                .members
                .keys()
                .filter(|k| k.user_id == user_id)
                .filter(|k| !seen.contains(&k.device_id))
                .cloned()
                .collect();
            for key in stale {
                if let Some(mut member) = self.members.remove(&key) {
                    member.close().await;
                }
                self.buffered.remove(&key);
            }
        }

        self.dispatch(outbound).await
    }

    /// Encrypts and transmits every outbound message a Member produced (§2 "Outbound
    /// messages bubble the reverse path ... then being transmitted via the external
    /// homeserver interface").
    async fn dispatch(&self, outbound: Vec<OutboundMessage>) -> Result<()> {
        for om in outbound {
            let event_type = om.message.event_type().to_string();
            let envelope = om
                .message
                .envelope()
                .expect("OutboundMessage is never the Unknown variant")
                .clone();
            let content = crate::core::signaling::message_content(&om.message).map_err(|e| {
                CoreError::MalformedEvent(e)
            })?;
            let encrypted = self
                .encrypter
                .encrypt(&om.user_id, &om.device_id, content)
                .await?;
            let txn_id = format!("{}-{}", envelope.call_id, envelope.seq);
            self.transport
                .send_to_device(
                    &event_type,
                    vec![(om.user_id, om.device_id, encrypted.0)],
                    &txn_id,
                )
                .await?;
        }
        Ok(())
    }

    fn new_member(
        &self,
        key: &MemberKey,
        session_id: &SessionId,
        device_index: u32,
        event_timestamp: u64,
        expires_ms: Option<u64>,
    ) -> Member {
        Member::new(
            self.conference_id.clone(),
            key.user_id.clone(),
            key.device_id.clone(),
            session_id.clone(),
            device_index,
            event_timestamp,
            expires_ms,
            self.own_user_id.clone(),
            self.own_device_id.clone(),
            self.own_session_id.clone().unwrap_or_else(SessionId::generate),
        )
    }

    // -----------------------------------------------------------------------------
    // To-device routing and buffering (§4.D)
    // -----------------------------------------------------------------------------

    pub async fn handle_device_message(
        &mut self,
        msg: Message,
        sender_user_id: UserId,
        sender_device_id: DeviceId,
    ) -> Result<()> {
        if let Message::Unknown { event_type } = &msg {
            log::debug!(
                "groupcall {}: ignoring unknown to-device event type {event_type}",
                self.conference_id
            );
            return Ok(());
        }
        let envelope = msg
            .envelope()
            .expect("non-Unknown messages always carry an envelope")
            .clone();
        let key = MemberKey::new(sender_user_id, sender_device_id);

        let deliverable = self
            .members
            .get(&key)
            .map(|m| m.session_id() == &envelope.sender_session_id)
            .unwrap_or(false);

        if deliverable {
            let (_, signal) = to_incoming(msg);
            let member = self.members.get_mut(&key).expect("checked above");
            let outbound = member
                .handle_device_message(&envelope, signal, self.engine_factory.as_ref())
                .await?;
            self.dispatch(outbound).await
        } else {
            self.buffer(key, msg);
            Ok(())
        }
    }

    fn buffer(&mut self, key: MemberKey, msg: Message) {
        let queue = self.buffered.entry(key.clone()).or_default();
        if queue.len() >= Self::BUFFER_CAP {
            queue.pop_front();
            log::warn!(
                "groupcall {}: buffer for {key} at capacity ({}), dropping oldest message",
                self.conference_id,
                Self::BUFFER_CAP
            );
        }
        queue.push_back(msg);
    }

    /// Drains buffered entries whose `sender_session_id` matches the now-existing
    /// Member's current session, in insertion order; non-matching entries (stale
    /// incarnations) stay buffered (§4.D "drain those entries ... then remove them").
    async fn flush_buffer(&mut self, key: &MemberKey) -> Result<Vec<OutboundMessage>> {
        let Some(session_id) = self.members.get(key).map(|m| m.session_id().clone()) else {
            return Ok(Vec::new());
        };
        let Some(queue) = self.buffered.get_mut(key) else {
            return Ok(Vec::new());
        };
        if queue.is_empty() {
            return Ok(Vec::new());
        }

        let mut to_deliver = Vec::new();
        let mut remaining = VecDeque::new();
        for msg in queue.drain(..) {
            let matches = msg
                .envelope()
                .map(|e| e.sender_session_id == session_id)
                .unwrap_or(false);
            if matches {
                to_deliver.push(msg);
            } else {
                remaining.push_back(msg);
            }
        }
        if remaining.is_empty() {
            self.buffered.remove(key);
        } else {
            self.buffered.insert(key.clone(), remaining);
        }

        let mut outbound = Vec::new();
        for msg in to_deliver {
            let envelope = msg.envelope().expect("checked above").clone();
            let (_, signal) = to_incoming(msg);
            if let Some(member) = self.members.get_mut(key) {
                outbound.extend(
                    member
                        .handle_device_message(&envelope, signal, self.engine_factory.as_ref())
                        .await?,
                );
            }
        }
        Ok(outbound)
    }

    /// Feeds a per-leg WebRTC engine event through to the owning Member.
    pub async fn handle_engine_event(&mut self, key: &MemberKey, event: EngineEvent) -> Result<()> {
        let Some(member) = self.members.get_mut(key) else {
            return Ok(());
        };
        let outbound = member
            .handle_engine_event(event, self.engine_factory.as_ref())
            .await?;
        self.dispatch(outbound).await
    }

    // -----------------------------------------------------------------------------
    // Outbound state publishing
    // -----------------------------------------------------------------------------

    /// Publishes this device's `m.call.member` entry for this conference only. Merging
    /// with a user's other simultaneous conferences in the same room (§4.A #2) is the
    /// responsibility of whatever sits behind `HomeserverTransport::send_state` (a real
    /// client reads-modifies-writes full room state); this core only ever expresses its
    /// own conference's delta, consistent with persistent room-state storage being an
    /// explicitly out-of-scope external collaborator (§1).
    async fn publish_own_membership(&self) -> Result<()> {
        let Some(session_id) = &self.own_session_id else {
            return Ok(());
        };
        let content = MemberStateContent {
            calls: vec![MemberCallEntry {
                call_id: self.conference_id.clone(),
                devices: vec![MemberDeviceEntry {
                    device_id: self.own_device_id.clone(),
                    session_id: session_id.clone(),
                    feeds: Vec::new(),
                    expires_ms: None,
                }],
            }],
        };
        let value = serde_json::to_value(&content).map_err(|e| {
            CoreError::MalformedEvent(crate::error::SignalingError::WrongShape {
                field: "member_state",
                reason: e.to_string(),
            })
        })?;
        self.transport
            .send_state(
                crate::core::signaling::EVENT_TYPE_CALL_MEMBER,
                self.own_user_id.as_str(),
                value,
            )
            .await?;
        Ok(())
    }

    async fn retract_own_membership(&self) -> Result<()> {
        let content = MemberStateContent { calls: Vec::new() };
        let value = serde_json::to_value(&content).map_err(|e| {
            CoreError::MalformedEvent(crate::error::SignalingError::WrongShape {
                field: "member_state",
                reason: e.to_string(),
            })
        })?;
        self.transport
            .send_state(
                crate::core::signaling::EVENT_TYPE_CALL_MEMBER,
                self.own_user_id.as_str(),
                value,
            )
            .await?;
        Ok(())
    }

    async fn send_terminated_state(&self) -> Result<()> {
        let content = ConferenceStateContent {
            intent: self.intent.into(),
            media_type: self.media_type.into(),
            name: self.name.clone(),
            terminated: Some(true),
        };
        let value = serde_json::to_value(&content).map_err(|e| {
            CoreError::MalformedEvent(crate::error::SignalingError::WrongShape {
                field: "conference_state",
                reason: e.to_string(),
            })
        })?;
        self.transport
            .send_state(
                crate::core::signaling::EVENT_TYPE_CALL,
                self.conference_id.as_str(),
                value,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_cap_is_positive() {
        assert!(GroupCall::BUFFER_CAP > 0);
    }
}
