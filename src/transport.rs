//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! The external collaborators of §6: the homeserver transport, the device-message
//! encrypter, and the TURN-settings provider. Grounded on the role ringrtc's
//! `group_call::SfuClient` trait plays -- a thin, injected interface to the one
//! networked collaborator the core cannot implement itself.

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{DeviceId, Result, UserId};

/// An opaque ICE server configuration handed back by `query_turn_settings` (§6). The
/// core never inspects its contents; it only caches and passes it to the WebRTC engine.
#[derive(Clone, Debug, PartialEq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// An opaque Matrix event id, returned by `send_state`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventId(pub String);

/// The homeserver transport (§6). `send_to_device` takes a per-recipient-device content
/// map because Matrix to-device sends are addressed `user_id -> device_id -> content`,
/// not broadcast.
#[async_trait]
pub trait HomeserverTransport: Send + Sync {
    async fn send_state(
        &self,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<EventId>;

    async fn send_to_device(
        &self,
        event_type: &str,
        targets: Vec<(UserId, DeviceId, Value)>,
        txn_id: &str,
    ) -> Result<()>;

    async fn query_turn_settings(&self) -> Result<IceServerConfig>;
}

/// An encrypted to-device payload, ready for `HomeserverTransport::send_to_device`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedEnvelope(pub Value);

/// The end-to-end device-message encryption layer (§6), out of scope to implement (it's
/// an external collaborator) but required at this seam so `Member` can stamp and forward
/// outbound messages without knowing how they're protected.
#[async_trait]
pub trait DeviceMessageEncrypter: Send + Sync {
    async fn encrypt(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        payload: Value,
    ) -> Result<EncryptedEnvelope>;
}

/// Whether an unencrypted fallback is permitted when the encrypter fails (§9 Open
/// Questions: "a reimplementation must decide whether unencrypted fallback is
/// permitted"). DESIGN.md records this core's answer: no fallback, ever -- see
/// `EncryptionFailurePolicy::Abort`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EncryptionFailurePolicy {
    #[default]
    Abort,
    AllowPlaintextFallback,
}
