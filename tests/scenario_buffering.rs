//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §8 scenario 2 (adapted): a signalling message for a remote device arrives before that
//! device's membership is known. It must sit in the buffer, then be delivered exactly
//! once -- and only once -- when a Member with the matching `session_id` is installed.

mod common;

use groupcall_core::common::SessionId;
use groupcall_core::core::signaling::{CallErrorCode, ConferenceId, Envelope, Hangup, MemberDeviceEntry, Message};

use common::*;

#[tokio::test]
async fn early_message_is_buffered_then_delivered_exactly_once() {
    let mut h = new_harness(own_user(), own_device());
    create_and_join(&mut h.call).await;

    let remote_session = SessionId::from("S7");
    let k = key(&remote_user(), &remote_device());

    // A Hangup for this remote arrives before any Member exists for it. It carries a
    // call_id this side knows nothing about (the remote's own leg id) -- buffering
    // doesn't require call_id agreement, only (user_id, device_id, session_id).
    let early_envelope = Envelope {
        call_id: groupcall_core::common::CallId::from("does-not-matter"),
        conf_id: ConferenceId::from(CONFERENCE_ID),
        party_id: remote_device(),
        device_id: own_device(),
        sender_session_id: remote_session.clone(),
        dest_session_id: h.call.own_session_id().cloned().unwrap(),
        seq: 0,
    };
    let early_msg = Message::Hangup(
        early_envelope,
        Hangup {
            reason: CallErrorCode::NewSession,
        },
    );
    h.call
        .handle_device_message(early_msg, remote_user(), remote_device())
        .await
        .expect("buffered, not an error");

    assert!(
        h.call.member(&k).is_none(),
        "no Member yet, so nothing to observe beyond the buffer"
    );

    // Now the membership event arrives. Since we're joined and we're the initiator
    // (own device "D2" > remote "D1"), this immediately creates an outgoing PeerCall
    // and sends its Invite -- then the buffered Hangup should drain onto that same
    // PeerCall, ending it (NewSession is not retryable).
    h.call
        .update_membership(
            remote_user(),
            vec![MemberDeviceEntry {
                device_id: remote_device(),
                session_id: remote_session.clone(),
                feeds: Vec::new(),
                expires_ms: None,
            }],
            1,
        )
        .await
        .expect("membership reconciled");

    let member = h.call.member(&k).expect("member installed");
    assert_eq!(
        member.peer_call_state(),
        None,
        "buffered Hangup should have ended and then dropped the fresh PeerCall"
    );
    assert_eq!(member.retry_count(), 0, "NewSession is not retryable");

    let sent_before = h.transport.sent_to_device().len();

    // A second, identical membership re-emission must not redeliver anything: the
    // buffer was already drained and removed.
    h.call
        .update_membership(
            remote_user(),
            vec![MemberDeviceEntry {
                device_id: remote_device(),
                session_id: remote_session,
                feeds: Vec::new(),
                expires_ms: None,
            }],
            2,
        )
        .await
        .expect("re-emission is a no-op update");

    assert_eq!(h.call.member(&k).unwrap().peer_call_state(), None);
    assert_eq!(h.transport.sent_to_device().len(), sent_before);
}
