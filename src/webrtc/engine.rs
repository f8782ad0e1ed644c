//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! The WebRTC engine interface injected per leg (§6). Trimmed to the operations §4.B
//! actually drives: no stats, no data channels, no raw FFI -- those are ringrtc concerns
//! this spec's Non-goals exclude ("media transport, codec negotiation details beyond
//! opaque SDP passthrough"). Grounded on the shape of ringrtc's
//! `webrtc::peer_connection::PeerConnection` (command methods) and
//! `webrtc::peer_connection_observer::PeerConnectionObserverTrait` (callback methods),
//! collapsed into one async trait the way modern Rust WebRTC wrappers (e.g. the
//! `webrtc` crate used throughout `other_examples/`) expose `create_offer`/
//! `set_local_description` as `async fn`s instead of C++ callback pairs.

use async_trait::async_trait;

use crate::common::{LocalMediaRef, Result};
use crate::core::signaling::Candidate;

/// An ICE connectivity state, mirroring `RTCIceConnectionState` (ringrtc's
/// `IceConnectionState`, trimmed to the values this core branches on).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// One local or remote session description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp: String,
}

/// Events the engine delivers to whoever is driving the leg (§6: `onNegotiationNeeded`,
/// `onIceCandidate`, `onIceConnectionStateChange`, `onTrack`). Collapsed into a single
/// enum so `PeerCall::handle_engine_event` can dispatch like it dispatches signalling
/// messages, instead of one callback method per event as in ringrtc's FFI observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    NegotiationNeeded,
    LocalIceCandidate(Candidate),
    IceGatheringComplete,
    IceConnectionStateChanged(IceConnectionState),
    RemoteTrackAdded,
}

/// One peer connection (§3 PeerCall "wraps the WebRTC engine"). A real implementation
/// wraps whatever local WebRTC stack the host application embeds; `sim::FakePeerConnection`
/// is the in-memory stand-in used by this crate's own tests.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn set_local_media(&self, media: &LocalMediaRef) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: Candidate) -> Result<()>;

    /// Initiates rollback of a not-yet-applied local offer for Perfect-Negotiation glare
    /// handling (§4.B "polite sides roll back on collision").
    async fn rollback_local_description(&self) -> Result<()>;

    /// Releases all engine resources. Idempotent.
    async fn close(&self);
}

/// Creates per-leg `PeerConnection`s (§6 "WebRTC engine (injected, per-leg)").
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create_peer_connection(&self, call_id: &crate::common::CallId)
    -> Result<Box<dyn PeerConnection>>;
}
