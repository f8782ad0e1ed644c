//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §8 scenarios 4 and 5: a retryable hangup re-runs `connect()` up to
//! `Member::MAX_RETRY_COUNT` times, minting a fresh `call_id` each time; a non-retryable
//! hangup never retries.

mod common;

use groupcall_core::common::SessionId;
use groupcall_core::core::member::Member;
use groupcall_core::core::signaling::{CallErrorCode, ConferenceId, Envelope, Hangup, MemberDeviceEntry, Message};

use common::*;

async fn send_hangup(
    h: &mut Harness,
    call_id: &groupcall_core::common::CallId,
    reason: CallErrorCode,
) {
    let envelope = Envelope {
        call_id: call_id.clone(),
        conf_id: ConferenceId::from(CONFERENCE_ID),
        party_id: remote_device(),
        device_id: own_device(),
        sender_session_id: SessionId::from("S-remote"),
        dest_session_id: h.call.own_session_id().cloned().unwrap(),
        seq: 0,
    };
    h.call
        .handle_device_message(
            Message::Hangup(envelope, Hangup { reason }),
            remote_user(),
            remote_device(),
        )
        .await
        .expect("hangup handled");
}

#[tokio::test]
async fn retryable_hangup_reconnects_up_to_the_cap() {
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
        .expect("initial membership");

    for attempt in 1..=Member::MAX_RETRY_COUNT {
        let call_id = h
            .call
            .member(&k)
            .and_then(|m| m.peer_call_id())
            .cloned()
            .unwrap_or_else(|| panic!("expected a live leg before retry {attempt}"));
        send_hangup(&mut h, &call_id, CallErrorCode::IceFailed).await;

        let member = h.call.member(&k).expect("member retained across retries");
        assert_eq!(member.retry_count(), attempt);
        assert!(
            member.peer_call_id().is_some(),
            "retry {attempt} should have minted a fresh outgoing leg"
        );
    }

    // One more failure exceeds the cap: Member stops retrying and drops the leg.
    let last_call_id = h.call.member(&k).unwrap().peer_call_id().cloned().unwrap();
    send_hangup(&mut h, &last_call_id, CallErrorCode::IceFailed).await;

    let member = h.call.member(&k).unwrap();
    assert_eq!(member.retry_count(), Member::MAX_RETRY_COUNT);
    assert_eq!(member.peer_call_state(), None);
}

#[tokio::test]
async fn non_retryable_hangup_never_retries() {
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
        .expect("initial membership");

    let call_id = h.call.member(&k).unwrap().peer_call_id().cloned().unwrap();
    send_hangup(&mut h, &call_id, CallErrorCode::UserHangup).await;

    let member = h.call.member(&k).expect("member remains, awaiting a session change");
    assert_eq!(member.retry_count(), 0);
    assert_eq!(member.peer_call_state(), None);
}
