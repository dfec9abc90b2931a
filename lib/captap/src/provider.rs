// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers allow the engine to work in different contexts by
//! allowing implementations of core services to be plugged in: a
//! test wants a clock it can step and a log it can inspect, the admin
//! tool wants slog output. If a service doesn't have at least two
//! obvious implementations, then it probably doesn't need to be a
//! provider.

use core::fmt;
use core::fmt::Display;
use core::time::Duration;
use std::time::Instant;
use std::time::SystemTime;

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// The source of record timestamps.
///
/// Timestamps are taken as uptime (time since the clock's epoch) and
/// converted to wall-clock time by adding `boottime()` unless the
/// descriptor asked for monotonic stamps.
pub trait ClockProvider: Send + Sync {
    /// The precise uptime.
    fn uptime(&self) -> Duration;

    /// A cheaper, coarser uptime. By default this is the precise
    /// uptime truncated to the millisecond.
    fn uptime_fast(&self) -> Duration {
        let t = self.uptime();
        Duration::from_millis(t.as_millis() as u64)
    }

    /// The wall-clock time, since the Unix epoch, at which uptime was
    /// zero.
    fn boottime(&self) -> Duration;
}

/// A clock backed by [`Instant`] and [`SystemTime`].
pub struct SystemClock {
    start: Instant,
    boot: Duration,
}

impl SystemClock {
    pub fn new() -> Self {
        let boot = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        Self { start: Instant::now(), boot }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockProvider for SystemClock {
    fn uptime(&self) -> Duration {
        self.start.elapsed()
    }

    fn boottime(&self) -> Duration {
        self.boot
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Fixed(Duration);

    impl ClockProvider for Fixed {
        fn uptime(&self) -> Duration {
            self.0
        }

        fn boottime(&self) -> Duration {
            Duration::ZERO
        }
    }

    #[test]
    fn fast_uptime_truncates() {
        let c = Fixed(Duration::new(3, 123_456_789));
        assert_eq!(c.uptime_fast(), Duration::from_millis(3_123));
    }

    #[test]
    fn system_clock_moves_forward() {
        let c = SystemClock::new();
        let a = c.uptime();
        let b = c.uptime();
        assert!(b >= a);
        assert!(c.boottime() > Duration::ZERO);
    }
}
