// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Data link types.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// A data link type (DLT) code.
///
/// Each tap on an interface is keyed by one of these; it determines
/// the framing of the bytes handed to consumers and the link address
/// synthesized for writes.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct LinkType(pub u32);

impl LinkType {
    /// BSD loopback: a 4-byte host-order address family header.
    pub const NULL: Self = Self(0);
    pub const EN10MB: Self = Self(1);
    pub const SLIP: Self = Self(8);
    pub const PPP: Self = Self(9);
    pub const FDDI: Self = Self(10);
    pub const ATM_RFC1483: Self = Self(11);
    /// Raw IP; the packet begins with the IP header.
    pub const RAW: Self = Self(12);
    pub const IEEE802_11_RADIO: Self = Self(127);

    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::NULL => "NULL",
            Self::EN10MB => "EN10MB",
            Self::SLIP => "SLIP",
            Self::PPP => "PPP",
            Self::FDDI => "FDDI",
            Self::ATM_RFC1483 => "ATM_RFC1483",
            Self::RAW => "RAW",
            Self::IEEE802_11_RADIO => "IEEE802_11_RADIO",
            _ => return None,
        };
        Some(name)
    }
}

impl Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "DLT({})", self.0),
        }
    }
}

impl core::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dlt = match s.to_ascii_uppercase().as_str() {
            "NULL" => Self::NULL,
            "EN10MB" | "ETHER" | "ETHERNET" => Self::EN10MB,
            "SLIP" => Self::SLIP,
            "PPP" => Self::PPP,
            "FDDI" => Self::FDDI,
            "ATM_RFC1483" => Self::ATM_RFC1483,
            "RAW" => Self::RAW,
            "IEEE802_11_RADIO" => Self::IEEE802_11_RADIO,
            other => other
                .parse::<u32>()
                .map(Self)
                .map_err(|_| format!("unknown link type: {s}"))?,
        };
        Ok(dlt)
    }
}
