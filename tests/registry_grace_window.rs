//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §4.E: a terminated GroupCall is retained for a grace window so late to-device
//! messages still find a home, then reaped.

use std::sync::Arc;
use std::time::Duration;

use groupcall_core::common::{ConferenceId, DeviceId, Intent, MediaType, RoomId, UserId};
use groupcall_core::core::registry::CallRegistry;
use groupcall_core::core::signaling::EVENT_TYPE_CALL;
use groupcall_core::sim::{FakeClock, FakeDeviceMessageEncrypter, FakeHomeserverTransport, FakePeerConnectionFactory};

#[tokio::test]
async fn terminated_conference_is_reaped_after_grace_window_elapses() {
    let clock = Arc::new(FakeClock::new());
    let transport = Arc::new(FakeHomeserverTransport::new());
    let encrypter = Arc::new(FakeDeviceMessageEncrypter);
    let factory = Arc::new(FakePeerConnectionFactory);

    let own_user = UserId::from("@alice:example.org");
    let own_device = DeviceId::from("D1");
    let mut registry = CallRegistry::new(
        own_user,
        own_device,
        clock.clone(),
        transport,
        encrypter,
        factory,
    );

    let room_id = RoomId::from("!room:example.org");
    let conf_id = ConferenceId::from("conf1");
    registry.create_local(room_id.clone(), conf_id.clone(), Intent::Ring, MediaType::Video);
    assert!(registry.get(&room_id, &conf_id).is_some());

    let terminated_content = serde_json::json!({
        "m.intent": "ring",
        "m.type": "video",
        "m.terminated": true,
    });
    registry
        .handle_state_event(room_id.clone(), EVENT_TYPE_CALL, conf_id.as_str(), terminated_content, 1)
        .await
        .expect("terminated state applied");
    assert!(registry.get(&room_id, &conf_id).unwrap().is_terminated());

    clock.advance(Duration::from_secs(31));

    // Any inbound event triggers a reap pass; an unrecognized to-device type is the
    // cheapest way to provoke one without needing a second well-formed conference.
    registry
        .handle_to_device(
            r#"{"type":"m.call.unused","content":{}}"#,
            UserId::from("@bob:example.org"),
            DeviceId::from("D9"),
        )
        .await
        .expect("unknown to-device type is a no-op besides the reap pass");

    assert!(
        registry.get(&room_id, &conf_id).is_none(),
        "terminated conference should be gone once the grace window has elapsed"
    );
}

#[tokio::test]
async fn terminated_conference_survives_within_grace_window() {
    let clock = Arc::new(FakeClock::new());
    let transport = Arc::new(FakeHomeserverTransport::new());
    let encrypter = Arc::new(FakeDeviceMessageEncrypter);
    let factory = Arc::new(FakePeerConnectionFactory);

    let own_user = UserId::from("@alice:example.org");
    let own_device = DeviceId::from("D1");
    let mut registry = CallRegistry::new(
        own_user,
        own_device,
        clock.clone(),
        transport,
        encrypter,
        factory,
    );

    let room_id = RoomId::from("!room:example.org");
    let conf_id = ConferenceId::from("conf1");
    registry.create_local(room_id.clone(), conf_id.clone(), Intent::Ring, MediaType::Video);

    let terminated_content = serde_json::json!({
        "m.intent": "ring",
        "m.type": "video",
        "m.terminated": true,
    });
    registry
        .handle_state_event(room_id.clone(), EVENT_TYPE_CALL, conf_id.as_str(), terminated_content, 1)
        .await
        .expect("terminated state applied");

    clock.advance(Duration::from_secs(5));
    registry
        .handle_to_device(
            r#"{"type":"m.call.unused","content":{}}"#,
            UserId::from("@bob:example.org"),
            DeviceId::from("D9"),
        )
        .await
        .expect("no-op besides the reap pass");

    assert!(
        registry.get(&room_id, &conf_id).is_some(),
        "grace window hasn't elapsed yet"
    );
}
