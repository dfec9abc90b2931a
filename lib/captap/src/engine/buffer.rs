// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The store/hold/free buffer rotation.
//!
//! A descriptor owns two physical buffers and three slots naming
//! them:
//!
//! * store: the buffer the delivery path appends records to; always
//!   present.
//!
//! * hold: a full buffer waiting for (or owned by) the consumer.
//!
//! * free: the buffer the next rotation will make the store.
//!
//! With two buffers exactly one of hold and free is present at any
//! time. Rotation moves store to hold and free to store, and is only
//! possible while hold is empty.
//!
//! ```text
//!            rotate()                 release_hold() / reclaim()
//!   store ─────────────► hold ──────────────────────────────► free
//!     ▲                                                          │
//!     └──────────────────────── rotate() ◄───────────────────────┘
//! ```
//!
//! How the bytes are stored and who may touch a held buffer is up to
//! the [`BufferStrategy`].

use super::packet::Packet;
use crate::api::BufferMode;
use crate::api::CaptureError;

/// Names one of the two physical buffers of a strategy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BufId(pub u8);

impl BufId {
    pub fn index(&self) -> usize {
        usize::from(self.0)
    }
}

/// How a buffer mode stores records and moves them to the consumer.
///
/// The strategy is chosen when a descriptor's buffers are created and
/// never changes for the life of the session. Every method is called
/// with the descriptor lock held.
pub trait BufferStrategy: Send {
    fn mode(&self) -> BufferMode;

    /// Copy `src` into `buf` at offset `off`.
    fn append_bytes(&mut self, buf: BufId, off: usize, src: &[u8]);

    /// Copy the first `len` bytes of `pkt` into `buf` at `off`,
    /// walking the packet's segment chain.
    fn append_chained(
        &mut self,
        buf: BufId,
        off: usize,
        pkt: &Packet,
        len: usize,
    ) {
        let mut off = off;
        let mut left = len;
        for seg in pkt.segments() {
            if left == 0 {
                break;
            }

            let n = left.min(seg.len());
            self.append_bytes(buf, off, &seg[..n]);
            off += n;
            left -= n;
        }
    }

    /// Has the consumer handed the held buffer back?
    fn is_reclaimable(&self, _hold: BufId) -> bool {
        false
    }

    /// May a flush throw away the held buffer?
    fn can_discard_hold(&self, _hold: BufId) -> bool {
        true
    }

    /// May records be appended to the store buffer?
    fn is_writable(&self, _store: BufId) -> bool {
        true
    }

    /// The store buffer has no room for the next record and there is
    /// no free buffer to rotate to.
    fn on_buffer_full(&mut self, _store: BufId, _len: usize) {}

    /// The store buffer just became the hold buffer.
    fn on_buffer_held(&mut self, _hold: BufId, _len: usize) {}

    /// The hold buffer just became the free buffer.
    fn on_buffer_reclaimed(&mut self, _free: BufId) {}

    /// Copy the first `len` bytes of the held buffer into `dst`.
    fn copy_out(
        &self,
        hold: BufId,
        len: usize,
        dst: &mut [u8],
    ) -> Result<(), CaptureError>;

    /// The id of the shared region backing `buf`, if any.
    fn region_id(&self, _buf: BufId) -> Option<u64> {
        None
    }

    /// Release the buffers; called once, when the session's buffers
    /// are torn down.
    fn free(&mut self) {}
}

/// Two private buffers; records reach the consumer by `read()`
/// copying the hold buffer out.
pub struct CopyBuffers {
    bufs: [Box<[u8]>; 2],
}

impl CopyBuffers {
    pub fn new(size: usize) -> Self {
        Self {
            bufs: [
                vec![0u8; size].into_boxed_slice(),
                vec![0u8; size].into_boxed_slice(),
            ],
        }
    }
}

impl BufferStrategy for CopyBuffers {
    fn mode(&self) -> BufferMode {
        BufferMode::Copying
    }

    fn append_bytes(&mut self, buf: BufId, off: usize, src: &[u8]) {
        self.bufs[buf.index()][off..off + src.len()].copy_from_slice(src);
    }

    fn copy_out(
        &self,
        hold: BufId,
        len: usize,
        dst: &mut [u8],
    ) -> Result<(), CaptureError> {
        let src = &self.bufs[hold.index()][..len];
        match dst.get_mut(..len) {
            Some(dst) => {
                dst.copy_from_slice(src);
                Ok(())
            }

            None => Err(CaptureError::InvalidArgument(format!(
                "read buffer of {} bytes cannot hold {len}",
                dst.len()
            ))),
        }
    }
}

pub struct BufferTriple {
    strategy: Box<dyn BufferStrategy>,
    size: usize,
    store: BufId,
    slen: usize,
    hold: Option<BufId>,
    hlen: usize,
    free: Option<BufId>,
}

impl BufferTriple {
    /// Wrap a strategy whose buffers each hold `size` record bytes.
    pub fn new(strategy: Box<dyn BufferStrategy>, size: usize) -> Self {
        Self {
            strategy,
            size,
            store: BufId(0),
            slen: 0,
            hold: None,
            hlen: 0,
            free: Some(BufId(1)),
        }
    }

    pub fn mode(&self) -> BufferMode {
        self.strategy.mode()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn store(&self) -> BufId {
        self.store
    }

    pub fn hold(&self) -> Option<BufId> {
        self.hold
    }

    pub fn free(&self) -> Option<BufId> {
        self.free
    }

    /// Bytes of records in the store buffer.
    pub fn slen(&self) -> usize {
        self.slen
    }

    /// Bytes of records in the hold buffer.
    pub fn hlen(&self) -> usize {
        self.hlen
    }

    pub fn strategy(&self) -> &dyn BufferStrategy {
        self.strategy.as_ref()
    }

    pub fn store_writable(&self) -> bool {
        self.strategy.is_writable(self.store)
    }

    /// Is the hold buffer full of records the consumer has yet to
    /// take?
    pub fn hold_pending(&self) -> bool {
        match self.hold {
            Some(hold) => self.hlen != 0 && !self.strategy.is_reclaimable(hold),
            None => false,
        }
    }

    /// Move store to hold and free to store.
    ///
    /// Return `false`, changing nothing, if there is no free buffer
    /// (which is always the case while hold is occupied).
    pub fn rotate(&mut self) -> bool {
        let Some(free) = self.free.take() else {
            return false;
        };

        let held = self.store;
        self.hold = Some(held);
        self.hlen = self.slen;
        self.store = free;
        self.slen = 0;
        self.strategy.on_buffer_held(held, self.hlen);
        true
    }

    /// If the consumer has handed the hold buffer back, make it the
    /// free buffer.
    pub fn reclaim(&mut self) -> bool {
        match self.hold {
            Some(hold) if self.strategy.is_reclaimable(hold) => {
                self.release_hold();
                true
            }

            _ => false,
        }
    }

    /// Make the hold buffer the free buffer.
    pub fn release_hold(&mut self) {
        if let Some(hold) = self.hold.take() {
            self.free = Some(hold);
            self.hlen = 0;
            self.strategy.on_buffer_reclaimed(hold);
        }
    }

    /// Throw away buffered records, as far as the strategy allows.
    pub fn discard(&mut self) {
        if let Some(hold) = self.hold {
            if self.strategy.can_discard_hold(hold) {
                self.release_hold();
            }
        }

        if self.store_writable() {
            self.slen = 0;
        }
    }

    /// Tell the strategy the store buffer is out of room.
    pub fn store_full(&mut self) {
        self.strategy.on_buffer_full(self.store, self.slen);
    }

    /// Write a record into the store buffer at `off` (which must be
    /// word aligned): `hdr` at the start, then `caplen` bytes of
    /// `pkt` at `off + hdrlen`. The store fill becomes `off + hdrlen
    /// + caplen`.
    pub fn append(
        &mut self,
        off: usize,
        hdr: &[u8],
        hdrlen: usize,
        pkt: &Packet,
        caplen: usize,
    ) {
        let store = self.store;
        self.strategy.append_bytes(store, off, hdr);
        self.strategy.append_chained(store, off + hdrlen, pkt, caplen);
        self.slen = off + hdrlen + caplen;
    }

    /// Copy the hold buffer's records into `dst`, returning the number
    /// of bytes copied.
    pub fn copy_out_hold(&self, dst: &mut [u8]) -> Result<usize, CaptureError> {
        match self.hold {
            Some(hold) => {
                self.strategy.copy_out(hold, self.hlen, dst)?;
                Ok(self.hlen)
            }

            None => Ok(0),
        }
    }
}

impl Drop for BufferTriple {
    fn drop(&mut self) {
        self.strategy.free();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Direction;

    fn triple(size: usize) -> BufferTriple {
        BufferTriple::new(Box::new(CopyBuffers::new(size)), size)
    }

    #[test]
    fn rotate_and_release() {
        let mut bt = triple(64);
        let data = [7u8; 10];
        let pkt = Packet::new(&data, Direction::In);
        bt.append(0, &[1; 4], 8, &pkt, 10);
        assert_eq!(bt.slen(), 18);

        assert!(bt.rotate());
        assert_eq!(bt.hold(), Some(BufId(0)));
        assert_eq!(bt.store(), BufId(1));
        assert_eq!(bt.free(), None);
        assert_eq!(bt.hlen(), 18);
        assert_eq!(bt.slen(), 0);
        assert!(bt.hold_pending());

        // Hold is occupied; a second rotation is refused.
        assert!(!bt.rotate());

        let mut out = [0u8; 64];
        assert_eq!(bt.copy_out_hold(&mut out).unwrap(), 18);
        assert_eq!(&out[..4], &[1; 4]);
        assert_eq!(&out[8..18], &[7; 10]);

        bt.release_hold();
        assert_eq!(bt.hold(), None);
        assert_eq!(bt.free(), Some(BufId(0)));
        assert!(bt.rotate());
    }

    #[test]
    fn copy_never_reclaimable() {
        let mut bt = triple(64);
        assert!(bt.rotate());
        assert!(!bt.reclaim());
        assert!(bt.hold().is_some());
    }

    #[test]
    fn chained_append_spans_segments() {
        let mut bt = triple(64);
        let a = [1u8; 3];
        let b = [2u8; 5];
        let pkt = Packet::from_segments(vec![&a, &b], Direction::Out);
        bt.append(0, &[], 0, &pkt, 6);
        assert!(bt.rotate());
        let mut out = [0u8; 64];
        bt.copy_out_hold(&mut out).unwrap();
        assert_eq!(&out[..6], &[1, 1, 1, 2, 2, 2]);
        assert_eq!(out[6], 0);
    }

    #[test]
    fn discard_clears_both() {
        let mut bt = triple(64);
        let pkt = Packet::new(&[0u8; 4], Direction::In);
        bt.append(0, &[], 0, &pkt, 4);
        assert!(bt.rotate());
        bt.append(0, &[], 0, &pkt, 4);
        bt.discard();
        assert_eq!(bt.hold(), None);
        assert_eq!(bt.slen(), 0);
        assert_eq!(bt.hlen(), 0);
    }
}
