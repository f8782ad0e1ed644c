//
// Copyright (C) 2020 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::common::Clock;

/// A clock whose `now()`/`system_now()` only move when `advance()` is called, so tests
/// can exercise the registry's grace-window reap deterministically instead of racing a
/// real timer.
#[derive(Clone)]
pub struct FakeClock {
    start: Instant,
    elapsed_ms: Arc<AtomicU64>,
    system_start: SystemTime,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed_ms: Arc::new(AtomicU64::new(0)),
            system_start: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.elapsed_ms
            .fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
    }

    fn system_now(&self) -> SystemTime {
        self.system_start + Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
    }
}
