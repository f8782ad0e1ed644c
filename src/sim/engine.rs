//
// Copyright (C) 2020 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::common::{CallId, LocalMediaRef, Result};
use crate::core::signaling::Candidate;
use crate::webrtc::engine::{PeerConnection, PeerConnectionFactory, SessionDescription};

/// A fake `PeerConnection` that never touches real media or a network. SDP blobs are
/// deterministic strings derived from the call id, so tests can assert on them without
/// depending on a real SDP grammar.
pub struct FakePeerConnection {
    call_id: CallId,
    local_media: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl FakePeerConnection {
    pub fn new(call_id: CallId) -> Self {
        Self {
            call_id,
            local_media: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn set_local_media(&self, media: &LocalMediaRef) -> Result<()> {
        *self.local_media.lock().unwrap() = Some(media.0.to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription {
            sdp: format!("offer-sdp:{}", self.call_id),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription {
            sdp: format!("answer-sdp:{}", self.call_id),
        })
    }

    async fn set_local_description(&self, _description: SessionDescription) -> Result<()> {
        Ok(())
    }

    async fn set_remote_description(&self, _description: SessionDescription) -> Result<()> {
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: Candidate) -> Result<()> {
        Ok(())
    }

    async fn rollback_local_description(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakePeerConnectionFactory;

#[async_trait]
impl PeerConnectionFactory for FakePeerConnectionFactory {
    async fn create_peer_connection(
        &self,
        call_id: &CallId,
    ) -> Result<Box<dyn PeerConnection>> {
        Ok(Box::new(FakePeerConnection::new(call_id.clone())))
    }
}
