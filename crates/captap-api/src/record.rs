// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The layout of captured records and zero-copy buffer headers.
//!
//! A capture buffer is a sequence of records. Each record is a
//! [`BpfXhdr`] followed, at `hdrlen` bytes from its start, by `caplen`
//! bytes of packet data. The next record begins at the next word
//! boundary after the data.
//!
//! ```text
//! +----------+-----+-------------+---+----------+-----
//! | BpfXhdr  | pad | packet data |pad| BpfXhdr  | ...
//! +----------+-----+-------------+---+----------+-----
//! ^ 0        ^ 26  ^ hdrlen          ^ wordalign(hdrlen + caplen)
//! ```

use super::tstamp::Timestamp;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// The number of header bytes actually written ahead of each record;
/// the trailing struct padding of [`BpfXhdr`] is not part of the
/// record.
pub const SIZEOF_BPF_XHDR: usize = 26;

/// The alignment of record starts within a capture buffer.
pub const WORD_ALIGN: usize = core::mem::size_of::<usize>();

/// The length of the header at the start of each zero-copy region.
pub const ZBUF_HEADER_LEN: usize = core::mem::size_of::<ZBufHeader>();

/// Round `x` up to the record alignment.
pub const fn word_align(x: usize) -> usize {
    (x + (WORD_ALIGN - 1)) & !(WORD_ALIGN - 1)
}

/// The record header length for a link header of `link_hdrlen`
/// bytes, chosen so that the network-layer header that follows the
/// link header lands on a word boundary.
pub const fn bpf_hdrlen(link_hdrlen: usize) -> usize {
    word_align(SIZEOF_BPF_XHDR + link_hdrlen) - link_hdrlen
}

/// The header preceding each captured packet, in host byte order.
#[derive(
    Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes,
    KnownLayout, PartialEq,
)]
#[repr(C)]
pub struct BpfXhdr {
    pub ts_sec: i64,
    pub ts_frac: u64,
    pub caplen: u32,
    pub datalen: u32,
    pub hdrlen: u16,
    _pad: [u8; 6],
}

impl BpfXhdr {
    pub fn new(ts: Timestamp, caplen: u32, datalen: u32, hdrlen: u16) -> Self {
        Self {
            ts_sec: ts.sec,
            ts_frac: ts.frac,
            caplen,
            datalen,
            hdrlen,
            _pad: [0; 6],
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        Timestamp { sec: self.ts_sec, frac: self.ts_frac }
    }

    /// The bytes written into a capture buffer.
    pub fn record_bytes(&self) -> &[u8] {
        &self.as_bytes()[..SIZEOF_BPF_XHDR]
    }

    /// Parse a header from the start of `bytes`, which need only hold
    /// [`SIZEOF_BPF_XHDR`] bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let src = bytes.get(..SIZEOF_BPF_XHDR)?;
        let mut raw = [0u8; core::mem::size_of::<BpfXhdr>()];
        raw[..SIZEOF_BPF_XHDR].copy_from_slice(src);
        Self::read_from_bytes(&raw).ok()
    }
}

/// One record parsed out of a capture buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CaptureRecord<'a> {
    pub hdr: BpfXhdr,
    pub data: &'a [u8],
}

/// Walk the records in the first `len` bytes returned by a read (or
/// found in a zero-copy region).
///
/// Iteration stops at the first truncated or malformed record.
pub struct RecordIter<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> RecordIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = CaptureRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.buf.get(self.off..)?;
        let hdr = BpfXhdr::parse(rest)?;
        let hdrlen = usize::from(hdr.hdrlen);
        let caplen = hdr.caplen as usize;

        if hdrlen < SIZEOF_BPF_XHDR {
            return None;
        }

        let data = rest.get(hdrlen..hdrlen + caplen)?;
        self.off += word_align(hdrlen + caplen);
        Some(CaptureRecord { hdr, data })
    }
}

/// The header at the start of each zero-copy region.
///
/// The region belongs to the consumer whenever `kernel_gen !=
/// user_gen`; the consumer hands it back by setting `user_gen` to
/// `kernel_gen`.
#[derive(
    Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes,
    KnownLayout, PartialEq,
)]
#[repr(C)]
pub struct ZBufHeader {
    pub kernel_gen: u32,
    pub kernel_len: u32,
    pub user_gen: u32,
    _pad: [u32; 5],
}

impl ZBufHeader {
    pub fn new(kernel_gen: u32, kernel_len: u32, user_gen: u32) -> Self {
        Self { kernel_gen, kernel_len, user_gen, _pad: [0; 5] }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(core::mem::size_of::<BpfXhdr>(), 32);
        assert_eq!(ZBUF_HEADER_LEN, 32);
    }

    #[test]
    fn hdrlen_aligns_network_header() {
        for link in [0, 4, 12, 14] {
            let hdrlen = bpf_hdrlen(link);
            assert!(hdrlen >= SIZEOF_BPF_XHDR);
            assert_eq!((hdrlen + link) % WORD_ALIGN, 0);
        }
    }

    #[test]
    fn iterate_records() {
        let mut buf = vec![0u8; 256];
        let hdrlen = bpf_hdrlen(14);
        let mut off = 0;

        for (i, len) in [20usize, 7].into_iter().enumerate() {
            let ts = Timestamp { sec: i as i64, frac: 0 };
            let hdr = BpfXhdr::new(ts, len as u32, 100, hdrlen as u16);
            buf[off..off + SIZEOF_BPF_XHDR].copy_from_slice(hdr.record_bytes());
            buf[off + hdrlen..off + hdrlen + len].fill(i as u8 + 1);
            off = word_align(off + hdrlen + len);
        }

        let recs: Vec<_> = RecordIter::new(&buf[..off]).collect();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].data, &[1u8; 20][..]);
        assert_eq!(recs[1].hdr.timestamp().sec, 1);
        assert_eq!(recs[1].hdr.datalen, 100);
        assert_eq!(recs[1].data, &[2u8; 7][..]);
    }

    #[test]
    fn truncated_record_stops() {
        let hdr = BpfXhdr::new(Timestamp::ZERO, 64, 64, 32);
        let mut buf = vec![0u8; 40];
        buf[..SIZEOF_BPF_XHDR].copy_from_slice(hdr.record_bytes());
        assert_eq!(RecordIter::new(&buf).count(), 0);
    }
}
