//
// Copyright (C) 2020 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{DeviceId, Result, UserId};
use crate::transport::{
    DeviceMessageEncrypter, EncryptedEnvelope, EventId, HomeserverTransport, IceServerConfig,
};

#[derive(Clone, Debug, PartialEq)]
pub struct SentToDevice {
    pub event_type: String,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub content: Value,
}

/// A fake homeserver: state writes and to-device sends just append to an in-memory log
/// a test can inspect, rather than going anywhere. Grounded in ringrtc's
/// `sim::sim_platform` pattern of recording calls for assertions instead of performing
/// network I/O.
pub struct FakeHomeserverTransport {
    sent_state: Mutex<Vec<(String, String, Value)>>,
    sent_to_device: Mutex<Vec<SentToDevice>>,
    ice_servers: IceServerConfig,
    next_event_id: AtomicU64,
}

impl FakeHomeserverTransport {
    pub fn new() -> Self {
        Self {
            sent_state: Mutex::new(Vec::new()),
            sent_to_device: Mutex::new(Vec::new()),
            ice_servers: IceServerConfig {
                urls: vec!["turn:fake.example.org".to_string()],
                username: Some("fake-user".to_string()),
                credential: Some("fake-credential".to_string()),
            },
            next_event_id: AtomicU64::new(0),
        }
    }

    pub fn sent_state(&self) -> Vec<(String, String, Value)> {
        self.sent_state.lock().unwrap().clone()
    }

    pub fn sent_to_device(&self) -> Vec<SentToDevice> {
        self.sent_to_device.lock().unwrap().clone()
    }

    pub fn take_sent_to_device(&self) -> Vec<SentToDevice> {
        std::mem::take(&mut self.sent_to_device.lock().unwrap())
    }
}

impl Default for FakeHomeserverTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HomeserverTransport for FakeHomeserverTransport {
    async fn send_state(
        &self,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<EventId> {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        self.sent_state
            .lock()
            .unwrap()
            .push((event_type.to_string(), state_key.to_string(), content));
        Ok(EventId(format!("$fake-event-{id}")))
    }

    async fn send_to_device(
        &self,
        event_type: &str,
        targets: Vec<(UserId, DeviceId, Value)>,
        _txn_id: &str,
    ) -> Result<()> {
        let mut sent = self.sent_to_device.lock().unwrap();
        for (user_id, device_id, content) in targets {
            sent.push(SentToDevice {
                event_type: event_type.to_string(),
                user_id,
                device_id,
                content,
            });
        }
        Ok(())
    }

    async fn query_turn_settings(&self) -> Result<IceServerConfig> {
        Ok(self.ice_servers.clone())
    }
}

/// A no-op "encrypter" that passes payloads through unchanged, so tests can decode the
/// plaintext content straight out of `FakeHomeserverTransport::sent_to_device`.
#[derive(Default)]
pub struct FakeDeviceMessageEncrypter;

#[async_trait]
impl DeviceMessageEncrypter for FakeDeviceMessageEncrypter {
    async fn encrypt(
        &self,
        _user_id: &UserId,
        _device_id: &DeviceId,
        payload: Value,
    ) -> Result<EncryptedEnvelope> {
        Ok(EncryptedEnvelope(payload))
    }
}
