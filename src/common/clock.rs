//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! An injected time capability, so retry backoff, the membership-expiry check (§4.D
//! supplement) and the registry's grace window (§4.E) can be driven deterministically in
//! tests instead of reading a `SystemTime::now()`/`Instant::now()` singleton directly.

use std::time::{Duration, SystemTime};

pub trait Clock: Send + Sync {
    /// Monotonic instant, used for timeouts and the grace-window timer.
    fn now(&self) -> std::time::Instant;

    /// Wall-clock time, used to stamp and compare server event timestamps
    /// (`event_timestamp`, `created_ts`/`expires`).
    fn system_now(&self) -> SystemTime;
}

/// The real clock, backed by the standard library.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn system_now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Converts a Matrix `origin_server_ts`-style millisecond timestamp to `SystemTime`.
pub fn from_unix_millis(ms: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
}

/// Converts a `SystemTime` to a Matrix `origin_server_ts`-style millisecond timestamp.
pub fn to_unix_millis(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
