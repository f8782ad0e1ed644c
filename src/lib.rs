//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! # Group Call Signalling Core
//!
//! A transport- and platform-independent core for coordinating multi-party WebRTC
//! conferences over Matrix room-state and to-device events. This crate owns the
//! signalling state machines only: it never touches real media, a real homeserver
//! connection, or a real WebRTC engine, instead driving them through the injected
//! [`webrtc::engine::PeerConnectionFactory`] and [`transport::HomeserverTransport`]
//! traits.

#[macro_use]
pub mod common;

mod error;

pub use error::CoreError;

/// Core, platform-independent signalling state machines.
pub mod core {
    pub mod actor;
    pub mod group_call;
    pub mod member;
    pub mod peer_call;
    pub mod registry;
    pub mod signaling;
}

/// The injected interface to a WebRTC engine, kept deliberately narrow (§6).
pub mod webrtc {
    pub mod engine;
}

/// The injected interfaces to the homeserver transport and to-device encryption (§6).
pub mod transport;

/// In-memory fakes of the injected interfaces, used by this crate's own tests and by
/// downstream integration tests that want to drive the state machines without a real
/// network, media stack, or homeserver.
pub mod sim;
