//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Shared harness for the scenario tests in §8, grounded in the `tests/common` module
//! ringrtc's own `tests/incoming.rs`/`tests/outgoing.rs` build on top of.

use std::sync::Arc;

use groupcall_core::common::{
    ConferenceId, DeviceId, Intent, LocalMediaRef, MediaType, MemberKey, UserId,
};
use groupcall_core::core::group_call::GroupCall;
use groupcall_core::core::signaling::{self, Message};
use groupcall_core::sim::{FakeDeviceMessageEncrypter, FakeHomeserverTransport, FakePeerConnectionFactory, SentToDevice};

#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter(None, log::LevelFilter::Debug)
        .try_init();
}

pub const CONFERENCE_ID: &str = "conf1";

pub fn own_user() -> UserId {
    UserId::from("@alice:example.org")
}

pub fn own_device() -> DeviceId {
    DeviceId::from("D2")
}

pub fn remote_user() -> UserId {
    UserId::from("@alice:example.org")
}

pub fn remote_device() -> DeviceId {
    DeviceId::from("D1")
}

pub fn local_media() -> LocalMediaRef {
    LocalMediaRef::new("local-track")
}

pub fn key(user: &UserId, device: &DeviceId) -> MemberKey {
    MemberKey::new(user.clone(), device.clone())
}

pub struct Harness {
    pub call: GroupCall,
    pub transport: Arc<FakeHomeserverTransport>,
}

/// Builds a fresh conference with the given own identity, backed entirely by `sim`
/// fakes.
pub fn new_harness(own_user_id: UserId, own_device_id: DeviceId) -> Harness {
    let transport = Arc::new(FakeHomeserverTransport::new());
    let encrypter = Arc::new(FakeDeviceMessageEncrypter);
    let factory = Arc::new(FakePeerConnectionFactory);
    let call = GroupCall::new(
        ConferenceId::from(CONFERENCE_ID),
        Intent::Ring,
        MediaType::Video,
        own_user_id,
        own_device_id,
        transport.clone(),
        encrypter,
        factory,
    );
    Harness { call, transport }
}

/// Drives a GroupCall from Fledgling through Joined, with no remote participants yet.
pub async fn create_and_join(call: &mut GroupCall) {
    call.create().await.expect("create");
    call.join(local_media()).await.expect("join");
    let own = own_user();
    let own_dev = own_device();
    let own_session = call.own_session_id().cloned().expect("own session set by join");
    call.update_membership(
        own.clone(),
        vec![groupcall_core::core::signaling::MemberDeviceEntry {
            device_id: own_dev,
            session_id: own_session,
            feeds: Vec::new(),
            expires_ms: None,
        }],
        1,
    )
    .await
    .expect("own membership echo");
}

/// Reconstructs the `Message` a `SentToDevice` record carries, by re-wrapping it in the
/// `{"type": ..., "content": ...}` shape `decode_message` expects.
pub fn decode_sent(sent: &SentToDevice) -> Message {
    let json = serde_json::json!({
        "type": sent.event_type,
        "content": sent.content,
    })
    .to_string();
    signaling::decode_message(&json).expect("sent message decodes")
}
