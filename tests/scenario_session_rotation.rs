//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §8 scenario 3: a membership event for an already-known device carries a new
//! `session_id`. The old PeerCall is disposed, a fresh Member is installed with
//! `retry_count == 0`, and messages still tagged with the stale session never reach the
//! new PeerCall.

mod common;

use groupcall_core::common::SessionId;
use groupcall_core::core::signaling::{CallErrorCode, ConferenceId, Envelope, Hangup, MemberDeviceEntry, Message};

use common::*;

#[tokio::test]
async fn session_change_replaces_member_and_resets_retry_count() {
    let mut h = new_harness(own_user(), own_device());
    create_and_join(&mut h.call).await;
    let k = key(&remote_user(), &remote_device());

    h.call
        .update_membership(
            remote_user(),
            vec![MemberDeviceEntry {
                device_id: remote_device(),
                session_id: SessionId::from("S1"),
                feeds: Vec::new(),
                expires_ms: None,
            }],
            1,
        )
        .await
        .expect("initial membership");

    let first_call_id = h
        .call
        .member(&k)
        .and_then(|m| m.peer_call_id())
        .cloned()
        .expect("outgoing leg created");

    h.call
        .update_membership(
            remote_user(),
            vec![MemberDeviceEntry {
                device_id: remote_device(),
                session_id: SessionId::from("S2"),
                feeds: Vec::new(),
                expires_ms: None,
            }],
            2,
        )
        .await
        .expect("rotated membership");

    let member = h.call.member(&k).expect("member re-created after rotation");
    assert_eq!(member.session_id(), &SessionId::from("S2"));
    assert_eq!(member.retry_count(), 0);
    let second_call_id = member.peer_call_id().cloned().expect("fresh outgoing leg");
    assert_ne!(first_call_id, second_call_id, "rotation must mint a new leg");

    // A message still tagged with the stale session never reaches the new PeerCall.
    let stale_envelope = Envelope {
        call_id: second_call_id.clone(),
        conf_id: ConferenceId::from(CONFERENCE_ID),
        party_id: remote_device(),
        device_id: own_device(),
        sender_session_id: SessionId::from("S1"),
        dest_session_id: h.call.own_session_id().cloned().unwrap(),
        seq: 0,
    };
    let stale_msg = Message::Hangup(
        stale_envelope,
        Hangup {
            reason: CallErrorCode::IceFailed,
        },
    );
    h.call
        .handle_device_message(stale_msg, remote_user(), remote_device())
        .await
        .expect("stale message is buffered, not an error");

    let member = h.call.member(&k).unwrap();
    assert_eq!(member.peer_call_id(), Some(&second_call_id));
    assert_ne!(
        member.peer_call_state(),
        None,
        "the S2 PeerCall must be untouched by a message tagged S1"
    );
}
