// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cmd;
pub mod link;
pub mod record;
pub mod tstamp;

pub use cmd::*;
pub use link::*;
pub use record::*;
pub use tstamp::*;

/// The overall version of the API. Anytime a command, request, or
/// response type is added, removed, or modified, this number should
/// increment. We attach no semantic meaning to the number other than
/// as a means to verify that the client and the engine are compiled
/// against the same API.
pub const API_VERSION: u64 = 1;

/// The capture protocol version reported by `GET_VERSION`. A reader
/// is compatible as long as the major number matches and the minor
/// number is at least the one it was written against.
pub const BPF_MAJOR_VERSION: u16 = 1;
pub const BPF_MINOR_VERSION: u16 = 1;

/// The smallest capture buffer a descriptor may be configured with.
pub const MIN_BUFSIZE: u32 = 32;

/// The capture buffer size a new descriptor starts with.
pub const DEFAULT_BUFSIZE: u32 = 4096;

/// The largest capture buffer a descriptor may be configured with.
pub const MAX_BUFSIZE: u32 = 0x80000;

/// The size of a single filter instruction, in bytes.
pub const INSN_SIZE: usize = 8;

/// The maximum number of instructions in a filter program.
pub const MAX_INSNS: usize = 512;

pub const PAGE_SIZE: usize = 4096;

/// The maximum number of pages in a single zero-copy region.
pub const ZBUF_MAX_PAGES: usize = 512;

/// The largest zero-copy region, in bytes.
pub const ZBUF_MAX_SIZE: usize = PAGE_SIZE * ZBUF_MAX_PAGES;

/// Signal numbers must be below this value.
pub const MAX_SIGNAL: i32 = 32;

/// The direction a packet was travelling when it was tapped.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    In = 1,
    Out = 2,
}

impl core::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            _ => Err(format!("invalid direction: {s}")),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        };

        write!(f, "{dirstr}")
    }
}

/// Which packet directions a descriptor wants to see.
///
/// The discriminants are the values carried by `SET_DIRECTION`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum DirectionPolicy {
    In = 0,
    #[default]
    InOut = 1,
    Out = 2,
}

impl DirectionPolicy {
    /// Does this policy admit a packet travelling in `dir`?
    pub fn admits(&self, dir: Direction) -> bool {
        match (self, dir) {
            (Self::InOut, _) => true,
            (Self::In, Direction::In) => true,
            (Self::Out, Direction::Out) => true,
            _ => false,
        }
    }
}

impl TryFrom<u32> for DirectionPolicy {
    type Error = CaptureError;

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(Self::In),
            1 => Ok(Self::InOut),
            2 => Ok(Self::Out),
            _ => Err(CaptureError::InvalidArgument(format!(
                "bad direction: {val}"
            ))),
        }
    }
}

impl core::str::FromStr for DirectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            "inout" | "both" => Ok(Self::InOut),
            _ => Err(format!("invalid direction policy: {s}")),
        }
    }
}

impl Display for DirectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::In => "IN",
            Self::InOut => "INOUT",
            Self::Out => "OUT",
        };
        write!(f, "{s}")
    }
}

/// How captured records are moved to the consumer.
///
/// The mode is fixed for the life of a session once buffers exist.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum BufferMode {
    /// Records are copied out of the hold buffer by `read()`.
    #[default]
    Copying = 1,
    /// Records are written into consumer-registered regions which
    /// are handed back and forth via generation counters.
    ZeroCopy = 2,
}

impl TryFrom<u32> for BufferMode {
    type Error = CaptureError;

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match val {
            1 => Ok(Self::Copying),
            2 => Ok(Self::ZeroCopy),
            _ => Err(CaptureError::InvalidArgument(format!(
                "bad buffer mode: {val}"
            ))),
        }
    }
}

impl Display for BufferMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Copying => "copy",
            Self::ZeroCopy => "zbuf",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const CURRENT: Self =
        Self { major: BPF_MAJOR_VERSION, minor: BPF_MINOR_VERSION };

    /// Can a consumer written against `self` talk to `engine`?
    pub fn compatible_with(&self, engine: &Version) -> bool {
        self.major == engine.major && self.minor <= engine.minor
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn direction_policy_admits() {
        assert!(DirectionPolicy::InOut.admits(Direction::In));
        assert!(DirectionPolicy::InOut.admits(Direction::Out));
        assert!(DirectionPolicy::In.admits(Direction::In));
        assert!(!DirectionPolicy::In.admits(Direction::Out));
        assert!(DirectionPolicy::Out.admits(Direction::Out));
        assert!(!DirectionPolicy::Out.admits(Direction::In));
    }

    #[test]
    fn direction_policy_wire_values() {
        assert_eq!(DirectionPolicy::try_from(0).unwrap(), DirectionPolicy::In);
        assert_eq!(
            DirectionPolicy::try_from(1).unwrap(),
            DirectionPolicy::InOut
        );
        assert_eq!(DirectionPolicy::try_from(2).unwrap(), DirectionPolicy::Out);
        assert!(DirectionPolicy::try_from(3).is_err());
        assert_eq!("both".parse(), Ok(DirectionPolicy::InOut));
    }

    #[test]
    fn version_compat() {
        let v = Version { major: 1, minor: 0 };
        assert!(v.compatible_with(&Version::CURRENT));
        let v = Version { major: 2, minor: 0 };
        assert!(!v.compatible_with(&Version::CURRENT));
    }
}
