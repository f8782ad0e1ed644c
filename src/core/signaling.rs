//
// Copyright (C) 2019, 2020 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! §4.A SignallingCodec: the wire schema for the conference/member state events and the
//! to-device signalling messages, plus their parser/serializer. A pure, side-effect-free
//! layer -- it never touches a Member or GroupCall directly, mirroring how ringrtc keeps
//! `core::signaling` a plain set of message types with no state of its own.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{CallId, ConferenceId, DeviceId, Intent, MediaType, SessionId, UserId};
use crate::error::SignalingError;

pub const EVENT_TYPE_CALL: &str = "m.call";
pub const EVENT_TYPE_CALL_MEMBER: &str = "m.call.member";

pub const EVENT_TYPE_INVITE: &str = "m.call.invite";
pub const EVENT_TYPE_ANSWER: &str = "m.call.answer";
pub const EVENT_TYPE_CANDIDATES: &str = "m.call.candidates";
pub const EVENT_TYPE_HANGUP: &str = "m.call.hangup";
pub const EVENT_TYPE_REJECT: &str = "m.call.reject";
pub const EVENT_TYPE_NEGOTIATE: &str = "m.call.negotiate";
pub const EVENT_TYPE_SDP_STREAM_METADATA_CHANGED: &str = "m.call.sdp_stream_metadata_changed";

// ---------------------------------------------------------------------------------
// Conference / membership state events
// ---------------------------------------------------------------------------------

/// Content of the `m.call` conference state event (§4.A #1). State key = `conference_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConferenceStateContent {
    #[serde(rename = "m.intent")]
    pub intent: WireIntent,
    #[serde(rename = "m.type")]
    pub media_type: WireMediaType,
    #[serde(rename = "m.name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "m.terminated", skip_serializing_if = "Option::is_none")]
    pub terminated: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WireIntent {
    Ring,
    Prompt,
    Room,
}

impl From<WireIntent> for Intent {
    fn from(w: WireIntent) -> Self {
        match w {
            WireIntent::Ring => Intent::Ring,
            WireIntent::Prompt => Intent::Prompt,
            WireIntent::Room => Intent::Room,
        }
    }
}

impl From<Intent> for WireIntent {
    fn from(i: Intent) -> Self {
        match i {
            Intent::Ring => WireIntent::Ring,
            Intent::Prompt => WireIntent::Prompt,
            Intent::Room => WireIntent::Room,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WireMediaType {
    Voice,
    Video,
}

impl From<WireMediaType> for MediaType {
    fn from(w: WireMediaType) -> Self {
        match w {
            WireMediaType::Voice => MediaType::Voice,
            WireMediaType::Video => MediaType::Video,
        }
    }
}

impl From<MediaType> for WireMediaType {
    fn from(m: MediaType) -> Self {
        match m {
            MediaType::Voice => WireMediaType::Voice,
            MediaType::Video => WireMediaType::Video,
        }
    }
}

/// Content of the `m.call.member` state event (§4.A #2). State key = `user_id`. A single
/// user can be in several conferences in the room at once; each gets its own entry in
/// `calls`.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct MemberStateContent {
    #[serde(rename = "m.calls", default)]
    pub calls: Vec<MemberCallEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberCallEntry {
    #[serde(rename = "m.call_id")]
    pub call_id: ConferenceId,
    #[serde(rename = "m.devices")]
    pub devices: Vec<MemberDeviceEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberDeviceEntry {
    pub device_id: DeviceId,
    pub session_id: SessionId,
    #[serde(default)]
    pub feeds: Vec<Feed>,
    /// MSC3401-style membership-expiry supplement (SPEC_FULL.md §C.1): when this
    /// membership's server timestamp plus this duration has passed, `GroupCall`
    /// reconciliation treats the device as gone even without an explicit removal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub purpose: String,
}

// ---------------------------------------------------------------------------------
// To-device signalling messages
// ---------------------------------------------------------------------------------

/// Common fields every signalling message carries (§4.A #3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub call_id: CallId,
    pub conf_id: ConferenceId,
    pub party_id: DeviceId,
    pub device_id: DeviceId,
    pub sender_session_id: SessionId,
    pub dest_session_id: SessionId,
    pub seq: u64,
}

/// One variant per to-device message kind named in §4.A, plus `Unknown` for
/// forward-compatible event types the codec doesn't recognize.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Invite(Envelope, Invite),
    Answer(Envelope, Answer),
    Candidates(Envelope, Candidates),
    Hangup(Envelope, Hangup),
    Reject(Envelope, Reject),
    Negotiate(Envelope, Negotiate),
    SdpStreamMetadataChanged(Envelope, SdpStreamMetadataChanged),
    Unknown { event_type: String },
}

impl Message {
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Message::Invite(e, _)
            | Message::Answer(e, _)
            | Message::Candidates(e, _)
            | Message::Hangup(e, _)
            | Message::Reject(e, _)
            | Message::Negotiate(e, _)
            | Message::SdpStreamMetadataChanged(e, _) => Some(e),
            Message::Unknown { .. } => None,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Message::Invite(..) => EVENT_TYPE_INVITE,
            Message::Answer(..) => EVENT_TYPE_ANSWER,
            Message::Candidates(..) => EVENT_TYPE_CANDIDATES,
            Message::Hangup(..) => EVENT_TYPE_HANGUP,
            Message::Reject(..) => EVENT_TYPE_REJECT,
            Message::Negotiate(..) => EVENT_TYPE_NEGOTIATE,
            Message::SdpStreamMetadataChanged(..) => EVENT_TYPE_SDP_STREAM_METADATA_CHANGED,
            Message::Unknown { event_type } => event_type,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::Invite(e, _) => write!(f, "Invite(call_id={})", e.call_id),
            Message::Answer(e, _) => write!(f, "Answer(call_id={})", e.call_id),
            Message::Candidates(e, c) => {
                write!(f, "Candidates(call_id={}, n={})", e.call_id, c.candidates.len())
            }
            Message::Hangup(e, h) => write!(f, "Hangup(call_id={}, reason={:?})", e.call_id, h.reason),
            Message::Reject(e, _) => write!(f, "Reject(call_id={})", e.call_id),
            Message::Negotiate(e, _) => write!(f, "Negotiate(call_id={})", e.call_id),
            Message::SdpStreamMetadataChanged(e, _) => {
                write!(f, "SdpStreamMetadataChanged(call_id={})", e.call_id)
            }
            Message::Unknown { event_type } => write!(f, "Unknown({event_type})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invite {
    pub sdp: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub sdp: String,
}

/// An ICE candidate. An empty `sdp` is the end-of-gathering sentinel (§4.B
/// `send_candidate`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub sdp: String,
}

impl Candidate {
    pub fn end_of_candidates() -> Self {
        Self { sdp: String::new() }
    }

    pub fn is_end_of_candidates(&self) -> bool {
        self.sdp.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidates {
    pub candidates: Vec<Candidate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hangup {
    pub reason: CallErrorCode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CallErrorCode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Negotiate {
    pub sdp: String,
    /// Real `m.call.negotiate` events carry this to say whether `sdp` is a fresh offer
    /// or the answer to one the recipient sent -- without it, a recipient mid-collision
    /// can't tell which Perfect-Negotiation branch to take. Opaque passthrough beyond
    /// that, same as every other SDP field here.
    pub description_type: SdpType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SdpStreamMetadataChanged {
    pub metadata: Value,
}

/// Hangup/reject reason codes (§4.B "Failure semantics", §6 wire formats). Mirrors the
/// shape of ringrtc's `signaling::Hangup`/`HangupType` split between a rich enum and a
/// wire-stable discriminant, except reasons here have no payload -- Matrix's
/// `m.call.hangup` carries only a string `reason` code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallErrorCode {
    UserHangup,
    AnsweredElsewhere,
    Replaced,
    UserBusy,
    Transferred,
    NewSession,
    IceFailed,
    IceTimeout,
    UserMediaFailed,
    InviteTimeout,
    UnknownError,
}

impl CallErrorCode {
    /// §4.B: a retryable hangup reason lets the Member re-attempt `connect()`; the
    /// listed codes are all terminal and not retryable.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            CallErrorCode::UserHangup
                | CallErrorCode::AnsweredElsewhere
                | CallErrorCode::Replaced
                | CallErrorCode::UserBusy
                | CallErrorCode::Transferred
                | CallErrorCode::NewSession
        )
    }
}

// ---------------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------------

/// The envelope-over-JSON shape used on the wire: `{"type": "...", "content": {...}}`,
/// matching a Matrix to-device event.
#[derive(Serialize, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    content: Value,
}

pub fn decode_message(json: &str) -> std::result::Result<Message, SignalingError> {
    let raw: RawEvent = serde_json::from_str(json).map_err(|e| SignalingError::WrongShape {
        field: "<root>",
        reason: e.to_string(),
    })?;
    decode_content(&raw.event_type, raw.content)
}

fn decode_content(
    event_type: &str,
    content: Value,
) -> std::result::Result<Message, SignalingError> {
    let envelope = || decode_envelope(&content);
    match event_type {
        EVENT_TYPE_INVITE => Ok(Message::Invite(envelope()?, from_value(&content)?)),
        EVENT_TYPE_ANSWER => Ok(Message::Answer(envelope()?, from_value(&content)?)),
        EVENT_TYPE_CANDIDATES => Ok(Message::Candidates(envelope()?, from_value(&content)?)),
        EVENT_TYPE_HANGUP => Ok(Message::Hangup(envelope()?, from_value(&content)?)),
        EVENT_TYPE_REJECT => Ok(Message::Reject(envelope()?, from_value(&content)?)),
        EVENT_TYPE_NEGOTIATE => Ok(Message::Negotiate(envelope()?, from_value(&content)?)),
        EVENT_TYPE_SDP_STREAM_METADATA_CHANGED => Ok(Message::SdpStreamMetadataChanged(
            envelope()?,
            from_value(&content)?,
        )),
        other => Ok(Message::Unknown {
            event_type: other.to_string(),
        }),
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(
    value: &Value,
) -> std::result::Result<T, SignalingError> {
    serde_json::from_value(value.clone()).map_err(|e| SignalingError::WrongShape {
        field: "content",
        reason: e.to_string(),
    })
}

fn decode_envelope(content: &Value) -> std::result::Result<Envelope, SignalingError> {
    from_value(content)
}

/// Merges a message's envelope and payload into the single JSON object a Matrix
/// to-device event's `content` carries. Exposed so callers that hand content to an
/// encrypter (rather than serializing the whole event to a string) can reuse the same
/// merge logic as `encode_message`.
pub fn message_content(message: &Message) -> std::result::Result<Value, SignalingError> {
    match message {
        Message::Invite(e, p) => merge_envelope(e, p),
        Message::Answer(e, p) => merge_envelope(e, p),
        Message::Candidates(e, p) => merge_envelope(e, p),
        Message::Hangup(e, p) => merge_envelope(e, p),
        Message::Reject(e, p) => merge_envelope(e, p),
        Message::Negotiate(e, p) => merge_envelope(e, p),
        Message::SdpStreamMetadataChanged(e, p) => merge_envelope(e, p),
        Message::Unknown { event_type } => Err(SignalingError::UnknownEventType(event_type.clone())),
    }
}

pub fn encode_message(message: &Message) -> std::result::Result<String, SignalingError> {
    let content = message_content(message)?;
    let raw = RawEvent {
        event_type: message.event_type().to_string(),
        content,
    };
    serde_json::to_string(&raw).map_err(|e| SignalingError::WrongShape {
        field: "<root>",
        reason: e.to_string(),
    })
}

fn merge_envelope<P: Serialize>(
    envelope: &Envelope,
    payload: &P,
) -> std::result::Result<Value, SignalingError> {
    let mut content = serde_json::to_value(envelope).map_err(|e| SignalingError::WrongShape {
        field: "envelope",
        reason: e.to_string(),
    })?;
    let payload_value =
        serde_json::to_value(payload).map_err(|e| SignalingError::WrongShape {
            field: "payload",
            reason: e.to_string(),
        })?;
    if let (Value::Object(content_map), Value::Object(payload_map)) =
        (&mut content, payload_value)
    {
        content_map.extend(payload_map);
    }
    Ok(content)
}

pub fn decode_conference_state(
    content: &Value,
) -> std::result::Result<ConferenceStateContent, SignalingError> {
    from_value(content)
}

pub fn decode_member_state(
    content: &Value,
) -> std::result::Result<MemberStateContent, SignalingError> {
    from_value(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> Envelope {
        Envelope {
            call_id: CallId::from("c1"),
            conf_id: ConferenceId::from("conf1"),
            party_id: DeviceId::from("DEV_A"),
            device_id: DeviceId::from("DEV_A"),
            sender_session_id: SessionId::from("S1"),
            dest_session_id: SessionId::from("S2"),
            seq: 1,
        }
    }

    #[test]
    fn invite_round_trips() {
        let msg = Message::Invite(
            sample_envelope(),
            Invite {
                sdp: "v=0...".to_string(),
            },
        );
        let json = encode_message(&msg).unwrap();
        let decoded = decode_message(&json).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn candidates_with_sentinel_round_trip() {
        let msg = Message::Candidates(
            sample_envelope(),
            Candidates {
                candidates: vec![
                    Candidate {
                        sdp: "candidate:1".to_string(),
                    },
                    Candidate::end_of_candidates(),
                ],
            },
        );
        let json = encode_message(&msg).unwrap();
        let decoded = decode_message(&json).unwrap();
        assert_eq!(msg, decoded);
        if let Message::Candidates(_, c) = decoded {
            assert!(c.candidates.last().unwrap().is_end_of_candidates());
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn missing_field_is_malformed() {
        let json = r#"{"type":"m.call.invite","content":{"call_id":"c1"}}"#;
        let err = decode_message(json).unwrap_err();
        matches!(err, SignalingError::WrongShape { .. });
    }

    #[test]
    fn unknown_event_type_decodes_to_unknown_variant() {
        let json = r#"{"type":"m.call.future_thing","content":{"anything":1}}"#;
        let decoded = decode_message(json).unwrap();
        assert!(matches!(decoded, Message::Unknown { .. }));
    }

    #[test]
    fn hangup_reason_retryability() {
        assert!(!CallErrorCode::UserHangup.is_retryable());
        assert!(!CallErrorCode::Replaced.is_retryable());
        assert!(CallErrorCode::IceFailed.is_retryable());
    }

    #[test]
    fn member_state_content_round_trips() {
        let content = MemberStateContent {
            calls: vec![MemberCallEntry {
                call_id: ConferenceId::from("conf1"),
                devices: vec![MemberDeviceEntry {
                    device_id: DeviceId::from("DEV_A"),
                    session_id: SessionId::from("S1"),
                    feeds: vec![Feed {
                        purpose: "usermedia".to_string(),
                    }],
                    expires_ms: None,
                }],
            }],
        };
        let value = serde_json::to_value(&content).unwrap();
        let decoded = decode_member_state(&value).unwrap();
        assert_eq!(content, decoded);
    }
}
