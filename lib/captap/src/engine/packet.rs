// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A borrowed view of a packet as the data plane hands it to a tap.
//!
//! Packets may arrive as a chain of segments (think `mblk_t` or
//! `mbuf` chains); the capture path copies straight out of the chain
//! and only a filter that needs contiguous bytes pays for a pullup.

use super::Direction;
use super::registry::DescriptorId;
use bitflags::bitflags;
use core::time::Duration;
use std::borrow::Cow;

bitflags! {
/// Out-of-band packet markers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PacketFlags: u32 {
    /// A copy of a frame a capture consumer wrote, looped back into
    /// the interface's input path.
    const FEEDBACK = 1 << 0;
}
}

#[derive(Clone, Debug)]
pub struct Packet<'a> {
    segs: Vec<&'a [u8]>,
    len: usize,
    dir: Direction,
    flags: PacketFlags,
    tstamp: Option<Duration>,
    writer: Option<DescriptorId>,
}

impl<'a> Packet<'a> {
    /// A single contiguous packet.
    pub fn new(bytes: &'a [u8], dir: Direction) -> Self {
        Self::from_segments(vec![bytes], dir)
    }

    pub fn from_segments(segs: Vec<&'a [u8]>, dir: Direction) -> Self {
        let len = segs.iter().map(|s| s.len()).sum();
        Self {
            segs,
            len,
            dir,
            flags: PacketFlags::empty(),
            tstamp: None,
            writer: None,
        }
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Mark the packet as a looped-back copy of a frame written by
    /// descriptor `id`.
    pub fn with_writer(mut self, id: DescriptorId) -> Self {
        self.flags |= PacketFlags::FEEDBACK;
        self.writer = Some(id);
        self
    }

    /// Attach a timestamp taken by the device, in the uptime base of
    /// the engine's clock. It is used in place of reading the clock.
    pub fn with_timestamp(mut self, uptime: Duration) -> Self {
        self.tstamp = Some(uptime);
        self
    }

    /// Put a synthesized link header in front of the packet, for
    /// interfaces whose native framing lacks the header a link type
    /// requires.
    pub fn prepend(&mut self, hdr: &'a [u8]) {
        self.segs.insert(0, hdr);
        self.len += hdr.len();
    }

    pub fn segments(&self) -> &[&'a [u8]] {
        &self.segs
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dir(&self) -> Direction {
        self.dir
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn tstamp(&self) -> Option<Duration> {
        self.tstamp
    }

    /// The descriptor whose write this packet loops back, if any.
    pub fn writer(&self) -> Option<DescriptorId> {
        self.writer
    }

    /// The packet as one contiguous slice, copying only when the
    /// packet is split across segments.
    pub fn pullup(&self) -> Cow<'a, [u8]> {
        match self.segs.as_slice() {
            [] => Cow::Borrowed(&[]),
            [seg] => Cow::Borrowed(seg),
            segs => Cow::Owned(segs.concat()),
        }
    }
}
