// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Zero-copy buffers.
//!
//! Instead of copying records out on `read()`, a zero-copy descriptor
//! writes them directly into two regions shared with the consumer.
//! Ownership of each region is negotiated through the generation
//! counters in its header ([`ZBufHeader`]):
//!
//! * When the engine hands a region to the consumer it records the
//!   number of valid bytes in `kernel_len` and bumps `kernel_gen`.
//!
//! * The consumer owns the region for as long as `kernel_gen !=
//!   user_gen`. When it is done it sets `user_gen = kernel_gen`.
//!
//! * The engine reclaims an acknowledged region the next time it
//!   needs room.
//!
//! While a region is assigned to the consumer the engine never
//! writes to it, even if it is still the store buffer.

use super::buffer::BufId;
use super::buffer::BufferStrategy;
use crate::api::BufferMode;
use crate::api::CaptureError;
use crate::api::PAGE_SIZE;
use crate::api::ZBUF_HEADER_LEN;
use crate::api::ZBUF_MAX_SIZE;
use crate::api::ZBufHeader;
use crate::ddi::sync::KMutex;
use core::fmt;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use std::sync::Arc;

/// A region shared between the engine and a consumer.
///
/// Regions are created by [`crate::engine::registry::Registry::map_region`]
/// and handed to a descriptor with `SET_ZEROCOPY_REGIONS`.
pub struct ZeroCopyRegion {
    id: u64,
    len: usize,
    kernel_gen: AtomicU32,
    kernel_len: AtomicU32,
    user_gen: AtomicU32,
    // Engine side only: the region has been handed to the consumer
    // and may not be written until it is reclaimed.
    assigned: AtomicBool,
    data: KMutex<Vec<u8>>,
}

// The record area is left out: it may be large and is only
// meaningful while the consumer owns the region.
impl fmt::Debug for ZeroCopyRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZeroCopyRegion")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("header", &self.header())
            .field("assigned", &self.is_assigned())
            .finish_non_exhaustive()
    }
}

impl ZeroCopyRegion {
    /// Check a region length: a whole number of pages, no larger than
    /// the zero-copy maximum, with room for the header.
    pub fn check_len(len: usize) -> Result<(), CaptureError> {
        if len <= ZBUF_HEADER_LEN || len % PAGE_SIZE != 0 || len > ZBUF_MAX_SIZE
        {
            return Err(CaptureError::InvalidArgument(format!(
                "bad zero-copy region length: {len}"
            )));
        }

        Ok(())
    }

    pub(crate) fn new(id: u64, len: usize) -> Result<Self, CaptureError> {
        Self::check_len(len)?;
        Ok(Self {
            id,
            len,
            kernel_gen: AtomicU32::new(0),
            kernel_len: AtomicU32::new(0),
            user_gen: AtomicU32::new(0),
            assigned: AtomicBool::new(false),
            data: KMutex::new(vec![0; len - ZBUF_HEADER_LEN]),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The length of the whole region, header included.
    pub fn len(&self) -> usize {
        self.len
    }

    /// A snapshot of the region header.
    pub fn header(&self) -> ZBufHeader {
        ZBufHeader::new(
            self.kernel_gen.load(Ordering::Acquire),
            self.kernel_len.load(Ordering::Acquire),
            self.user_gen.load(Ordering::Acquire),
        )
    }

    /// Does the consumer currently own this region?
    pub fn user_owns(&self) -> bool {
        self.kernel_gen.load(Ordering::Acquire)
            != self.user_gen.load(Ordering::Acquire)
    }

    /// The records in the region, if the consumer owns it.
    pub fn read(&self) -> Option<Vec<u8>> {
        if !self.user_owns() {
            return None;
        }

        let len = self.kernel_len.load(Ordering::Acquire) as usize;
        Some(self.data.lock()[..len].to_vec())
    }

    /// Hand the region back to the engine.
    pub fn acknowledge(&self) {
        let kgen = self.kernel_gen.load(Ordering::Acquire);
        self.user_gen.store(kgen, Ordering::Release);
    }

    fn is_assigned(&self) -> bool {
        self.assigned.load(Ordering::Acquire)
    }

    /// Give the region to the consumer with `len` valid bytes, unless
    /// it already has it.
    fn assign(&self, len: usize) {
        if self.is_assigned() {
            return;
        }

        self.assigned.store(true, Ordering::Release);
        self.kernel_len.store(len as u32, Ordering::Release);
        self.kernel_gen.fetch_add(1, Ordering::AcqRel);
    }

    fn unassign(&self) {
        self.assigned.store(false, Ordering::Release);
    }
}

/// The engine's side of a pair of zero-copy regions.
pub struct ZeroCopyBuffers {
    regions: [Arc<ZeroCopyRegion>; 2],
}

impl ZeroCopyBuffers {
    /// Validate a region pair for a session of `len` byte regions.
    pub fn new(
        a: Arc<ZeroCopyRegion>,
        b: Arc<ZeroCopyRegion>,
        len: usize,
    ) -> Result<Self, CaptureError> {
        ZeroCopyRegion::check_len(len)?;

        if a.id() == b.id() {
            return Err(CaptureError::InvalidArgument(
                "zero-copy regions must be distinct".to_string(),
            ));
        }

        if a.len() != len || b.len() != len {
            return Err(CaptureError::InvalidArgument(format!(
                "zero-copy regions must both be {len} bytes"
            )));
        }

        Ok(Self { regions: [a, b] })
    }

    /// The number of record bytes each region holds.
    pub fn bufsize(&self) -> usize {
        self.regions[0].len() - ZBUF_HEADER_LEN
    }

    fn region(&self, buf: BufId) -> &ZeroCopyRegion {
        &self.regions[buf.index()]
    }
}

impl BufferStrategy for ZeroCopyBuffers {
    fn mode(&self) -> BufferMode {
        BufferMode::ZeroCopy
    }

    fn append_bytes(&mut self, buf: BufId, off: usize, src: &[u8]) {
        let mut data = self.region(buf).data.lock();
        data[off..off + src.len()].copy_from_slice(src);
    }

    fn is_reclaimable(&self, hold: BufId) -> bool {
        !self.region(hold).user_owns()
    }

    fn can_discard_hold(&self, hold: BufId) -> bool {
        self.is_reclaimable(hold)
    }

    fn is_writable(&self, store: BufId) -> bool {
        !self.region(store).is_assigned()
    }

    fn on_buffer_full(&mut self, store: BufId, len: usize) {
        self.region(store).assign(len);
    }

    fn on_buffer_held(&mut self, hold: BufId, len: usize) {
        self.region(hold).assign(len);
    }

    fn on_buffer_reclaimed(&mut self, free: BufId) {
        self.region(free).unassign();
    }

    fn copy_out(
        &self,
        _hold: BufId,
        _len: usize,
        _dst: &mut [u8],
    ) -> Result<(), CaptureError> {
        Err(CaptureError::NotSupported(
            "read() on a zero-copy descriptor".to_string(),
        ))
    }

    fn region_id(&self, buf: BufId) -> Option<u64> {
        Some(self.region(buf).id())
    }

    fn free(&mut self) {
        for r in &self.regions {
            r.unassign();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Direction;
    use crate::engine::buffer::BufferTriple;
    use crate::engine::packet::Packet;

    fn pair() -> (Arc<ZeroCopyRegion>, Arc<ZeroCopyRegion>) {
        (
            Arc::new(ZeroCopyRegion::new(1, PAGE_SIZE).unwrap()),
            Arc::new(ZeroCopyRegion::new(2, PAGE_SIZE).unwrap()),
        )
    }

    #[test]
    fn region_lengths() {
        assert!(ZeroCopyRegion::new(1, 100).is_err());
        assert!(ZeroCopyRegion::new(1, ZBUF_MAX_SIZE + PAGE_SIZE).is_err());
        let (a, _) = pair();
        assert!(ZeroCopyBuffers::new(a.clone(), a.clone(), PAGE_SIZE).is_err());
        let b = Arc::new(ZeroCopyRegion::new(3, 2 * PAGE_SIZE).unwrap());
        assert!(ZeroCopyBuffers::new(a, b, PAGE_SIZE).is_err());
    }

    #[test]
    fn debug_shows_header_not_records() {
        let (a, _) = pair();
        a.data.lock()[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let out = format!("{a:?}");
        assert!(out.starts_with("ZeroCopyRegion { id: 1, len: 4096"));
        assert!(out.contains("kernel_gen: 0"));
        assert!(out.contains("assigned: false"));
        assert!(!out.contains("222"));
        assert!(out.ends_with(", .. }"));
    }

    #[test]
    fn ownership_hand_off() {
        let (a, b) = pair();
        let zb = ZeroCopyBuffers::new(a.clone(), b.clone(), PAGE_SIZE).unwrap();
        assert_eq!(zb.bufsize(), PAGE_SIZE - ZBUF_HEADER_LEN);
        let size = PAGE_SIZE - ZBUF_HEADER_LEN;
        let mut bt = BufferTriple::new(Box::new(zb), size);

        let empty = Packet::new(&[], Direction::In);
        bt.append(0, &[5; 16], 16, &empty, 0);
        assert_eq!(bt.slen(), 16);
        assert!(!a.user_owns());
        assert!(a.read().is_none());

        // Rotation assigns the held region to the consumer.
        assert!(bt.rotate());
        assert!(a.user_owns());
        assert_eq!(a.header().kernel_len, 16);
        assert_eq!(a.header().kernel_gen, 1);
        assert_eq!(a.read().unwrap(), vec![5; 16]);

        // Not reclaimable until acknowledged.
        assert!(!bt.reclaim());
        a.acknowledge();
        assert!(!a.user_owns());
        assert!(bt.reclaim());
        assert_eq!(bt.free(), Some(BufId(0)));
        assert!(bt.strategy().is_writable(BufId(0)));
    }

    #[test]
    fn full_store_is_assigned_in_place() {
        let (a, b) = pair();
        let zb = ZeroCopyBuffers::new(a.clone(), b, PAGE_SIZE).unwrap();
        let size = PAGE_SIZE - ZBUF_HEADER_LEN;
        let mut bt = BufferTriple::new(Box::new(zb), size);
        bt.store_full();
        assert!(a.user_owns());
        assert!(!bt.store_writable());
        assert!(bt.copy_out_hold(&mut []).is_ok());
        assert!(bt.rotate());
        let mut dst = [0u8; 8];
        assert!(matches!(
            bt.copy_out_hold(&mut dst),
            Err(CaptureError::NotSupported(_))
        ));
    }
}
