//
// Copyright (C) 2020 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! In-memory fakes of the three external interfaces (§6), used only by this crate's own
//! tests. Grounded in ringrtc's `webrtc::sim`/`sim::sim_platform` fake-backend pattern:
//! a deterministic stand-in good enough to drive real state-machine transitions without
//! a real network or media stack.

pub mod clock;
pub mod engine;
pub mod transport;

pub use clock::FakeClock;
pub use engine::{FakePeerConnection, FakePeerConnectionFactory};
pub use transport::{FakeDeviceMessageEncrypter, FakeHomeserverTransport, SentToDevice};
