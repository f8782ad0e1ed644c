//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Common types used throughout the signalling core.

pub mod clock;

use std::fmt;

pub use clock::{Clock, SystemClock};

/// Common Result type for the core.
pub type Result<T> = std::result::Result<T, crate::error::CoreError>;

/// Declares a newtype wrapper around an opaque Matrix identifier (a `String` in the
/// wire format) with the `Display`/`From`/`AsRef<str>` boilerplate every one of them
/// needs. Mirrors how `ruma`'s identifier types give each ID kind in a Matrix event a
/// distinct Rust type instead of passing bare `String`s around, but without the owned/
/// borrowed split those types use -- this core only ever needs an owned form.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// A Matrix room ID.
    RoomId
);
opaque_id!(
    /// A Matrix user ID, e.g. `@alice:example.org`.
    UserId
);
opaque_id!(
    /// A Matrix device ID, unique per user.
    DeviceId
);
opaque_id!(
    /// Opaque identifier minted by each device per client incarnation. A change implies
    /// a fresh peer whose prior state is discarded (§3, invariant 3's "sender_session_id").
    SessionId
);
opaque_id!(
    /// The state key of the conference's `m.call` state event.
    ConferenceId
);
opaque_id!(
    /// Opaque per-leg identifier, generated by the initiator of that leg (§3 PeerCall
    /// identity).
    CallId
);

impl CallId {
    /// Generates a fresh, globally unique call id for a newly initiated leg.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl SessionId {
    /// Mints a fresh session id for a new join incarnation (§3 "a change implies a
    /// fresh peer whose prior state is discarded").
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// `MemberKey` uniquely identifies a participating device within one GroupCall (§3).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberKey {
    pub user_id: UserId,
    pub device_id: DeviceId,
}

impl MemberKey {
    pub fn new(user_id: UserId, device_id: DeviceId) -> Self {
        Self { user_id, device_id }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.device_id)
    }
}

/// The kind of ringing behavior requested for a conference (`m.intent`, §4.A).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    /// Ring every invited device immediately.
    Ring,
    /// Show a non-ringing prompt to invited devices.
    Prompt,
    /// Ambient room call: no invite semantics, join at will.
    Room,
}

/// The media type of a conference or leg (`m.type`, §4.A).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    Voice,
    Video,
}

/// Which side of a leg this instance plays (§3 PeerCall attributes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A stand-in for a locally captured media handle. The WebRTC engine owns the real
/// tracks; the core only needs to know "do we have media" and hand an opaque reference
/// down to each PeerCall (§3 local_media, §5 "local_media is shared ... as a read-only
/// reference").
#[derive(Clone, Debug)]
pub struct LocalMediaRef(pub std::sync::Arc<str>);

impl LocalMediaRef {
    pub fn new(label: impl Into<String>) -> Self {
        Self(std::sync::Arc::from(label.into()))
    }
}

/// Local mute settings fanned out by `GroupCall::set_muted` (§4.D).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MuteSettings {
    pub audio_muted: bool,
    pub video_muted: bool,
}
