// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Record timestamp policy.

use core::fmt;
use core::fmt::Display;
use core::time::Duration;
use serde::Deserialize;
use serde::Serialize;

pub const T_MICROTIME: u32 = 0x0000;
pub const T_NANOTIME: u32 = 0x0001;
pub const T_BINTIME: u32 = 0x0002;
pub const T_NONE: u32 = 0x0003;
pub const T_FORMAT_MASK: u32 = 0x0003;
pub const T_FAST: u32 = 0x0100;
pub const T_MONOTONIC: u32 = 0x0200;
pub const T_FLAG_MASK: u32 = 0x0300;

/// The representation of the timestamp fraction in a record header.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum TsFormat {
    /// Seconds and microseconds.
    #[default]
    Micro,
    /// Seconds and nanoseconds.
    Nano,
    /// Seconds and a 64-bit binary fraction of a second.
    Bin,
    /// No timestamp; the header fields are zero.
    None,
}

/// How much effort to spend reading the clock.
///
/// Ordered so that a timestamp taken at a higher quality may stand
/// in for any lower one while fanning a packet out.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum TsQuality {
    None,
    Fast,
    Normal,
    External,
}

/// A descriptor's timestamp policy.
///
/// On the wire (`SET_TIMESTAMP_POLICY`) this is a bit pattern: the
/// low two bits select the [`TsFormat`] and [`T_FAST`] /
/// [`T_MONOTONIC`] are flags. `T_NONE` may not be combined with any
/// flag.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TimestampPolicy {
    pub format: TsFormat,
    /// Use the coarse clock.
    pub fast: bool,
    /// Report time since boot rather than wall-clock time.
    pub monotonic: bool,
}

impl TimestampPolicy {
    pub const NONE: Self =
        Self { format: TsFormat::None, fast: false, monotonic: false };

    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits == T_NONE {
            return Some(Self::NONE);
        }

        if bits & !(T_FORMAT_MASK | T_FLAG_MASK) != 0 {
            return None;
        }

        let format = match bits & T_FORMAT_MASK {
            T_MICROTIME => TsFormat::Micro,
            T_NANOTIME => TsFormat::Nano,
            T_BINTIME => TsFormat::Bin,
            _ => return None,
        };

        Some(Self {
            format,
            fast: bits & T_FAST != 0,
            monotonic: bits & T_MONOTONIC != 0,
        })
    }

    pub fn bits(&self) -> u32 {
        let mut bits = match self.format {
            TsFormat::Micro => T_MICROTIME,
            TsFormat::Nano => T_NANOTIME,
            TsFormat::Bin => T_BINTIME,
            TsFormat::None => return T_NONE,
        };

        if self.fast {
            bits |= T_FAST;
        }

        if self.monotonic {
            bits |= T_MONOTONIC;
        }

        bits
    }

    pub fn quality(&self) -> TsQuality {
        match (self.format, self.fast) {
            (TsFormat::None, _) => TsQuality::None,
            (_, true) => TsQuality::Fast,
            (_, false) => TsQuality::Normal,
        }
    }

    /// Convert an uptime reading into the record representation.
    ///
    /// `boottime` is the wall-clock time at which uptime was zero; it
    /// is ignored for monotonic policies.
    pub fn stamp(&self, uptime: Duration, boottime: Duration) -> Timestamp {
        let t = if self.monotonic { uptime } else { uptime + boottime };
        let sec = t.as_secs() as i64;
        let frac = match self.format {
            TsFormat::Micro => u64::from(t.subsec_micros()),
            TsFormat::Nano => u64::from(t.subsec_nanos()),
            TsFormat::Bin => {
                ((u128::from(t.subsec_nanos()) << 64) / 1_000_000_000) as u64
            }
            TsFormat::None => return Timestamp::ZERO,
        };
        Timestamp { sec, frac }
    }
}

impl Display for TimestampPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fmt = match self.format {
            TsFormat::Micro => "micro",
            TsFormat::Nano => "nano",
            TsFormat::Bin => "bin",
            TsFormat::None => return write!(f, "none"),
        };
        write!(f, "{fmt}")?;
        if self.fast {
            write!(f, ",fast")?;
        }
        if self.monotonic {
            write!(f, ",monotonic")?;
        }
        Ok(())
    }
}

impl core::str::FromStr for TimestampPolicy {
    type Err = String;

    /// Parse `micro`, `nano,monotonic`, `bin,fast`, `none`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',').map(str::trim);
        let format = match parts.next().map(str::to_ascii_lowercase).as_deref()
        {
            Some("micro") => TsFormat::Micro,
            Some("nano") => TsFormat::Nano,
            Some("bin") => TsFormat::Bin,
            Some("none") => TsFormat::None,
            _ => return Err(format!("invalid timestamp format: {s}")),
        };

        let mut policy = Self { format, fast: false, monotonic: false };
        for flag in parts {
            match flag.to_ascii_lowercase().as_str() {
                "fast" => policy.fast = true,
                "monotonic" => policy.monotonic = true,
                _ => return Err(format!("invalid timestamp flag: {flag}")),
            }
        }

        if format == TsFormat::None && (policy.fast || policy.monotonic) {
            return Err(format!("invalid timestamp policy: {s}"));
        }

        Ok(policy)
    }
}

/// A record timestamp: seconds plus a fraction whose unit depends on
/// the [`TsFormat`] in effect when the record was written.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Timestamp {
    pub sec: i64,
    pub frac: u64,
}

impl Timestamp {
    pub const ZERO: Self = Self { sec: 0, frac: 0 };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bits_round_trip() {
        for bits in [
            T_MICROTIME,
            T_NANOTIME,
            T_BINTIME,
            T_NONE,
            T_NANOTIME | T_MONOTONIC,
            T_BINTIME | T_FAST | T_MONOTONIC,
        ] {
            let p = TimestampPolicy::from_bits(bits).unwrap();
            assert_eq!(p.bits(), bits);
        }
    }

    #[test]
    fn invalid_bits() {
        assert!(TimestampPolicy::from_bits(T_NONE | T_FAST).is_none());
        assert!(TimestampPolicy::from_bits(0x10).is_none());
        assert!(TimestampPolicy::from_bits(0x1000).is_none());
        assert!("none,fast".parse::<TimestampPolicy>().is_err());
        assert_eq!(
            "nano,monotonic".parse::<TimestampPolicy>().unwrap().bits(),
            T_NANOTIME | T_MONOTONIC
        );
    }

    #[test]
    fn stamp_formats() {
        let up = Duration::new(5, 250_000_000);
        let boot = Duration::from_secs(1_000);

        let micro = TimestampPolicy::default();
        let want = Timestamp { sec: 1005, frac: 250_000 };
        assert_eq!(micro.stamp(up, boot), want);

        let nano = TimestampPolicy {
            format: TsFormat::Nano,
            fast: false,
            monotonic: true,
        };
        let want = Timestamp { sec: 5, frac: 250_000_000 };
        assert_eq!(nano.stamp(up, boot), want);

        let bin = TimestampPolicy {
            format: TsFormat::Bin,
            fast: false,
            monotonic: true,
        };
        assert_eq!(bin.stamp(up, boot), Timestamp { sec: 5, frac: 1 << 62 });

        assert_eq!(TimestampPolicy::NONE.stamp(up, boot), Timestamp::ZERO);
    }

    #[test]
    fn quality_order() {
        assert!(TsQuality::External > TsQuality::Normal);
        assert!(TsQuality::Normal > TsQuality::Fast);
        assert!(TsQuality::Fast > TsQuality::None);
        let fast = TimestampPolicy::from_bits(T_FAST).unwrap();
        assert_eq!(fast.quality(), TsQuality::Fast);
        assert_eq!(TimestampPolicy::NONE.quality(), TsQuality::None);
    }
}
