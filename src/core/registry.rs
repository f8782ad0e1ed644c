//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §4.E CallRegistry: the flat collection of GroupCalls in a room, and the dispatcher
//! that routes inbound state events and to-device messages to the right one. Grounded on
//! the map-of-active-calls-plus-router role ringrtc's `core::call_manager::CallManager`
//! plays over its `call_map`, generalized to key by `(room_id, conference_id)` instead of
//! a single active call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::common::{Clock, ConferenceId, DeviceId, Intent, MediaType, Result, RoomId, UserId};
use crate::core::group_call::GroupCall;
use crate::core::signaling::{
    self, Message, EVENT_TYPE_CALL, EVENT_TYPE_CALL_MEMBER,
};
use crate::error::CoreError;
use crate::transport::{DeviceMessageEncrypter, HomeserverTransport};
use crate::webrtc::engine::PeerConnectionFactory;

struct Entry {
    call: GroupCall,
    /// Set when the GroupCall became terminated with no local resources left; the entry
    /// is reaped once `Clock::now()` passes `terminated_at + GRACE_WINDOW` (§4.E
    /// "retained for a grace window so late to-device messages still find a home").
    terminated_at: Option<Instant>,
}

pub struct CallRegistry {
    own_user_id: UserId,
    own_device_id: DeviceId,
    calls: HashMap<(RoomId, ConferenceId), Entry>,
    /// Secondary index so a to-device message (which carries only `conf_id`, never
    /// `room_id` -- to-device delivery isn't room-scoped in Matrix) can still be routed
    /// to its GroupCall without a linear scan.
    by_conference: HashMap<ConferenceId, RoomId>,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn HomeserverTransport>,
    encrypter: Arc<dyn DeviceMessageEncrypter>,
    engine_factory: Arc<dyn PeerConnectionFactory>,
}

impl CallRegistry {
    /// §4.E "retained for a grace window (>= 30 s)".
    pub const GRACE_WINDOW: Duration = Duration::from_secs(30);

    pub fn new(
        own_user_id: UserId,
        own_device_id: DeviceId,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn HomeserverTransport>,
        encrypter: Arc<dyn DeviceMessageEncrypter>,
        engine_factory: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        Self {
            own_user_id,
            own_device_id,
            calls: HashMap::new(),
            by_conference: HashMap::new(),
            clock,
            transport,
            encrypter,
            engine_factory,
        }
    }

    pub fn get(&self, room_id: &RoomId, conference_id: &ConferenceId) -> Option<&GroupCall> {
        self.calls
            .get(&(room_id.clone(), conference_id.clone()))
            .map(|e| &e.call)
    }

    pub fn get_mut(
        &mut self,
        room_id: &RoomId,
        conference_id: &ConferenceId,
    ) -> Option<&mut GroupCall> {
        self.calls
            .get_mut(&(room_id.clone(), conference_id.clone()))
            .map(|e| &mut e.call)
    }

    /// Starts a brand-new, locally initiated conference (§3 "Fledgling applies only to a
    /// locally initiated, not-yet-announced call").
    pub fn create_local(
        &mut self,
        room_id: RoomId,
        conference_id: ConferenceId,
        intent: Intent,
        media_type: MediaType,
    ) -> &mut GroupCall {
        let call = GroupCall::new(
            conference_id.clone(),
            intent,
            media_type,
            self.own_user_id.clone(),
            self.own_device_id.clone(),
            self.transport.clone(),
            self.encrypter.clone(),
            self.engine_factory.clone(),
        );
        self.by_conference
            .insert(conference_id.clone(), room_id.clone());
        let key = (room_id, conference_id);
        self.calls.insert(
            key.clone(),
            Entry {
                call,
                terminated_at: None,
            },
        );
        &mut self.calls.get_mut(&key).expect("just inserted").call
    }

    /// §4.E "on each inbound state event of type m.call, it creates or updates the
    /// matching GroupCall; on m.call.member, it fans out update_membership to every
    /// GroupCall referenced in m.calls".
    pub async fn handle_state_event(
        &mut self,
        room_id: RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
        event_timestamp: u64,
    ) -> Result<()> {
        self.reap();
        match event_type {
            EVENT_TYPE_CALL => {
                let conference_id = ConferenceId::from(state_key);
                let parsed = signaling::decode_conference_state(&content)
                    .map_err(CoreError::MalformedEvent)?;
                let key = (room_id.clone(), conference_id.clone());
                match self.calls.get_mut(&key) {
                    Some(entry) => {
                        entry.call.update_conference_state(&parsed);
                        if entry.call.is_terminated() && entry.terminated_at.is_none() {
                            entry.terminated_at = Some(self.clock.now());
                        }
                    }
                    None => {
                        let call = GroupCall::from_remote_state(
                            conference_id.clone(),
                            &parsed,
                            self.own_user_id.clone(),
                            self.own_device_id.clone(),
                            self.transport.clone(),
                            self.encrypter.clone(),
                            self.engine_factory.clone(),
                        );
                        let terminated_at = call.is_terminated().then(|| self.clock.now());
                        self.by_conference
                            .insert(conference_id.clone(), room_id.clone());
                        self.calls.insert(key, Entry { call, terminated_at });
                    }
                }
                Ok(())
            }
            EVENT_TYPE_CALL_MEMBER => {
                let user_id = UserId::from(state_key);
                let parsed = signaling::decode_member_state(&content)
                    .map_err(CoreError::MalformedEvent)?;
                for entry in parsed.calls {
                    let key = (room_id.clone(), entry.call_id.clone());
                    if let Some(e) = self.calls.get_mut(&key) {
                        e.call
                            .update_membership(user_id.clone(), entry.devices, event_timestamp)
                            .await?;
                    } else {
                        log::debug!(
                            "registry: membership event references unknown conference {}",
                            entry.call_id
                        );
                    }
                }
                Ok(())
            }
            other => {
                log::debug!("registry: ignoring unrecognized state event type {other}");
                Ok(())
            }
        }
    }

    /// §4.E "on each inbound to-device message, it looks up the referenced conf_id and
    /// forwards to that GroupCall's handle_device_message".
    pub async fn handle_to_device(
        &mut self,
        json: &str,
        sender_user_id: UserId,
        sender_device_id: DeviceId,
    ) -> Result<()> {
        self.reap();
        let msg = signaling::decode_message(json).map_err(CoreError::MalformedEvent)?;
        if let Message::Unknown { event_type } = &msg {
            log::debug!("registry: ignoring unknown to-device type {event_type}");
            return Ok(());
        }
        let conf_id = msg
            .envelope()
            .expect("non-Unknown messages always carry an envelope")
            .conf_id
            .clone();
        let Some(room_id) = self.by_conference.get(&conf_id).cloned() else {
            log::debug!("registry: dropping message for unknown conference {conf_id}");
            return Ok(());
        };
        let Some(entry) = self.calls.get_mut(&(room_id, conf_id)) else {
            return Ok(());
        };
        entry
            .call
            .handle_device_message(msg, sender_user_id, sender_device_id)
            .await
    }

    /// Drops entries whose grace window has elapsed (§4.E). Called at the top of every
    /// inbound-event handler rather than on a separate timer, consistent with the
    /// single-threaded cooperative scheduling model (§5): no background task competes
    /// for mutable access to the map.
    fn reap(&mut self) {
        let now = self.clock.now();
        let expired: Vec<(RoomId, ConferenceId)> = self
            .calls
            .iter()
            .filter_map(|(key, entry)| {
                entry
                    .terminated_at
                    .filter(|&t| now.duration_since(t) >= Self::GRACE_WINDOW)
                    .map(|_| key.clone())
            })
            .collect();
        for key in expired {
            self.by_conference.remove(&key.1);
            self.calls.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_window_is_at_least_30_seconds() {
        assert!(CallRegistry::GRACE_WINDOW >= Duration::from_secs(30));
    }
}
