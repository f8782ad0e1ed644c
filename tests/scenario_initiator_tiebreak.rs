//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §8 scenario 1: initiator tie-break. `own=("@a","D2")`, `remote=("@a","D1")`; the
//! lexicographically greater device initiates.

mod common;

use groupcall_core::core::peer_call::State as PeerCallState;
use groupcall_core::core::signaling::{Answer, ConferenceId, Envelope, MemberDeviceEntry, Message};
use groupcall_core::webrtc::engine::{EngineEvent, IceConnectionState};

use common::*;

#[tokio::test]
async fn own_device_initiates_and_reaches_connected() {
    let mut h = new_harness(own_user(), own_device());
    create_and_join(&mut h.call).await;
    assert_eq!(
        h.call.state(),
        groupcall_core::core::group_call::GroupCallState::Joined
    );

    h.call
        .update_membership(
            remote_user(),
            vec![MemberDeviceEntry {
                device_id: remote_device(),
                session_id: groupcall_core::common::SessionId::from("S-remote"),
                feeds: Vec::new(),
                expires_ms: None,
            }],
            1,
        )
        .await
        .expect("remote membership");

    let k = key(&remote_user(), &remote_device());
    let member = h.call.member(&k).expect("member installed on connect");
    assert_eq!(member.peer_call_state(), Some(PeerCallState::InviteSent));

    let sent = h.transport.sent_to_device();
    assert_eq!(sent.len(), 1, "only the initiator sends an Invite");
    assert_eq!(sent[0].user_id, remote_user());
    assert_eq!(sent[0].device_id, remote_device());
    let invite_envelope = match decode_sent(&sent[0]) {
        Message::Invite(e, _) => e,
        other => panic!("expected Invite, got {other}"),
    };
    let call_id = invite_envelope.call_id.clone();

    let answer_envelope = Envelope {
        call_id: call_id.clone(),
        conf_id: ConferenceId::from(CONFERENCE_ID),
        party_id: remote_device(),
        device_id: own_device(),
        sender_session_id: invite_envelope.dest_session_id.clone(),
        dest_session_id: invite_envelope.sender_session_id.clone(),
        seq: 0,
    };
    let answer_msg = Message::Answer(
        answer_envelope,
        Answer {
            sdp: format!("answer-sdp:{call_id}"),
        },
    );
    h.call
        .handle_device_message(answer_msg, remote_user(), remote_device())
        .await
        .expect("answer delivered");

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
}
