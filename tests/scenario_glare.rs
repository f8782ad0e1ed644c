//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §8 scenario 6: both sides send an Invite at once. The side whose own leg's `call_id`
//! is lexicographically greater loses, tears its outgoing leg down, and answers the
//! incoming one instead -- ending up Connected on a single leg carrying the *other*
//! side's `call_id`.

mod common;

use groupcall_core::common::{CallId, SessionId};
use groupcall_core::core::peer_call::State as PeerCallState;
use groupcall_core::core::signaling::{ConferenceId, Envelope, Invite, MemberDeviceEntry, Message};
use groupcall_core::webrtc::engine::{EngineEvent, IceConnectionState};

use common::*;

#[tokio::test]
async fn losing_glare_converts_outgoing_leg_to_incoming_and_connects() {
    let mut h = new_harness(own_user(), own_device());
    create_and_join(&mut h.call).await;
    let k = key(&remote_user(), &remote_device());

    h.call
        .update_membership(
            remote_user(),
            vec![MemberDeviceEntry {
                device_id: remote_device(),
                session_id: SessionId::from("S-remote"),
                feeds: Vec::new(),
                expires_ms: None,
            }],
            1,
        )
        .await
        .expect("initial membership, creates our outgoing leg");

    let own_call_id = h.call.member(&k).unwrap().peer_call_id().cloned().unwrap();
    // The empty string sorts before any non-empty call_id our side could have
    // generated (a uuid v4 string), so the remote's leg deterministically wins glare.
    let remote_call_id = CallId::from("");
    assert!(remote_call_id.as_str() < own_call_id.as_str());

    let invite_envelope = Envelope {
        call_id: remote_call_id.clone(),
        conf_id: ConferenceId::from(CONFERENCE_ID),
        party_id: remote_device(),
        device_id: own_device(),
        sender_session_id: SessionId::from("S-remote"),
        dest_session_id: h.call.own_session_id().cloned().unwrap(),
        seq: 0,
    };
    let invite_msg = Message::Invite(
        invite_envelope,
        Invite {
            sdp: "offer-sdp:remote".to_string(),
        },
    );
    h.call
        .handle_device_message(invite_msg, remote_user(), remote_device())
        .await
        .expect("colliding invite processed");

    let member = h.call.member(&k).unwrap();
    assert_eq!(member.peer_call_id(), Some(&remote_call_id));
    assert_eq!(member.peer_call_state(), Some(PeerCallState::Ringing));

    h.call
        .answer(&k, local_media())
        .await
        .expect("answer the surviving incoming leg");

    let member = h.call.member(&k).unwrap();
    assert_eq!(member.peer_call_state(), Some(PeerCallState::Connecting));

    h.call
        .handle_engine_event(
            &k,
            EngineEvent::IceConnectionStateChanged(IceConnectionState::Connected),
        )
        .await
        .expect("engine event handled");

    let member = h.call.member(&k).unwrap();
    assert_eq!(member.peer_call_state(), Some(PeerCallState::Connected));
    assert_eq!(member.peer_call_id(), Some(&remote_call_id));
}
