// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A clock that only moves when told to.

use captap::provider::ClockProvider;
use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// A [`ClockProvider`] stepped by the test. Clones share the same
/// time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    uptime_ns: Arc<AtomicU64>,
    boot: Duration,
}

impl ManualClock {
    pub fn new(boot: Duration) -> Self {
        Self { uptime_ns: Arc::new(AtomicU64::new(0)), boot }
    }

    pub fn set(&self, uptime: Duration) {
        self.uptime_ns.store(uptime.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.uptime_ns.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl ClockProvider for ManualClock {
    fn uptime(&self) -> Duration {
        Duration::from_nanos(self.uptime_ns.load(Ordering::SeqCst))
    }

    fn boottime(&self) -> Duration {
        self.boot
    }
}
