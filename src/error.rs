//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! The error taxonomy of §7. Kept as one focused `thiserror` enum per aggregate
//! (`SignalingError`, `TransportError`) composed into the crate-wide `CoreError` via
//! `#[from]`, the way `core/crypto.rs::Error` and `core/endorsements.rs::EndorsementUpdateError`
//! are small and local rather than one crate-wide mega-enum.

use thiserror::Error;

use crate::common::{CallId, ConferenceId, DeviceId, UserId};

/// Errors raised while parsing or encoding a signalling event (§4.A, §7
/// `MalformedEvent`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' had the wrong shape: {reason}")]
    WrongShape {
        field: &'static str,
        reason: String,
    },
    #[error("unrecognized event type '{0}'")]
    UnknownEventType(String),
}

/// Errors surfaced by the injected homeserver transport (§6, §7 `TransportFailure`).
#[derive(Error, Debug, Clone)]
#[error("transport failure after {attempts} attempt(s): {message}")]
pub struct TransportError {
    pub attempts: u8,
    pub message: String,
}

/// The crate-wide error type. Each variant corresponds to one kind in §7's taxonomy.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Schema violation; logged and dropped by the caller (§7 `MalformedEvent`).
    #[error("malformed event: {0}")]
    MalformedEvent(#[from] SignalingError),

    /// A to-device message referenced a `(conf_id, call_id)` this node doesn't know
    /// about (§7 `UnknownCall`).
    #[error("unknown call: conf_id={conf_id}, call_id={call_id:?}")]
    UnknownCall {
        conf_id: ConferenceId,
        call_id: Option<CallId>,
    },

    /// The homeserver RPC backing an operation failed after exhausting retries (§7
    /// `TransportFailure`).
    #[error(transparent)]
    TransportFailure(#[from] TransportError),

    /// The device-message encrypter refused or failed; the triggering send was aborted
    /// (§7 `EncryptionFailure`).
    #[error("encryption failed for {user_id}/{device_id}: {reason}")]
    EncryptionFailure {
        user_id: UserId,
        device_id: DeviceId,
        reason: String,
    },

    /// The injected WebRTC engine reported an unrecoverable error (§7 `WebRTCFatal`).
    #[error("webrtc engine fatal error on call {0}: {1}")]
    WebRtcFatal(CallId, String),

    /// This side's outgoing leg lost glare resolution (§7 `GlareLost`).
    #[error("glare lost for call {0}")]
    GlareLost(CallId),

    /// An operation was attempted from a state that doesn't allow it (e.g. `join()`
    /// called twice). Not one of §7's wire-facing kinds, but the natural "invalid state
    /// transition" error every state machine in this core needs.
    #[error("invalid operation '{operation}' in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}

impl CoreError {
    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Debug) -> Self {
        Self::InvalidState {
            operation,
            state: format!("{state:?}"),
        }
    }
}
