// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The delivery path: fanning a packet out to a tap's descriptors and
//! appending it to each one's store buffer.

use super::descriptor::DescState;
use super::descriptor::Descriptor;
use super::filter::FilterKind;
use super::packet::Packet;
use super::packet::PacketFlags;
use super::tap::Tap;
use super::wait::WaitState;
use crate::api::BpfXhdr;
use crate::api::BufferMode;
use crate::api::Direction;
use crate::api::DirectionPolicy;
use crate::api::Timestamp;
use crate::api::TsQuality;
use crate::api::bpf_hdrlen;
use crate::api::word_align;
use crate::provider::ClockProvider;
use core::time::Duration;

/// The best uptime reading taken so far for the packet being fanned
/// out, so the clock is read at most once per quality level.
pub(crate) struct StampCache {
    best: Option<(TsQuality, Duration)>,
}

impl StampCache {
    /// Start from the device timestamp, if the packet carries one.
    pub(crate) fn new(device: Option<Duration>) -> Self {
        Self { best: device.map(|t| (TsQuality::External, t)) }
    }

    /// An uptime of at least quality `q`.
    pub(crate) fn uptime(
        &mut self,
        q: TsQuality,
        clock: &dyn ClockProvider,
    ) -> Option<Duration> {
        if q == TsQuality::None {
            return None;
        }

        if let Some((have, t)) = self.best {
            if have >= q {
                return Some(t);
            }
        }

        let t = match q {
            TsQuality::Fast => clock.uptime_fast(),
            _ => clock.uptime(),
        };
        self.best = Some((q, t));
        Some(t)
    }
}

impl Tap {
    /// Hand a packet to every descriptor attached to this tap.
    pub fn deliver(&self, pkt: &Packet) {
        let descs = self.descs.read();
        if descs.is_empty() {
            return;
        }

        let mut stamps = StampCache::new(pkt.tstamp());
        for d in descs.iter() {
            d.tap_packet(self.hdrlen(), pkt, &mut stamps);
        }
    }
}

impl Descriptor {
    fn tap_packet(
        &self,
        link_hdrlen: usize,
        pkt: &Packet,
        stamps: &mut StampCache,
    ) {
        let mut st = self.state.lock();
        if st.closing || !st.direction.admits(pkt.dir()) {
            return;
        }

        // A frame this descriptor wrote, looped back on input, was
        // already seen on the way out.
        if st.feedback
            && pkt.dir() == Direction::In
            && pkt.flags().contains(PacketFlags::FEEDBACK)
            && pkt.writer() == Some(self.id())
            && st.direction == DirectionPolicy::InOut
        {
            return;
        }

        st.stats.vals.received += 1;

        let snaplen = st.filters.evaluate(
            self.ctx.filter.as_ref(),
            FilterKind::Read,
            pkt,
        );
        if snaplen == 0 {
            return;
        }

        st.stats.vals.captured += 1;

        let clock = self.ctx.clock.as_ref();
        let ts = match stamps.uptime(st.tstamp.quality(), clock) {
            Some(up) => st.tstamp.stamp(up, clock.boottime()),
            None => Timestamp::ZERO,
        };

        if self.catch_packet(&mut st, pkt, snaplen as usize, ts, link_hdrlen) {
            self.wakeup_locked(&mut st);
        }
    }

    /// Append one record to the store buffer, rotating if it is full.
    /// Return whether readers should be woken.
    fn catch_packet(
        &self,
        st: &mut DescState,
        pkt: &Packet,
        snaplen: usize,
        ts: Timestamp,
        link_hdrlen: usize,
    ) -> bool {
        let immediate = st.immediate;
        let timed_out = st.wait == WaitState::TimedOut;
        let Some(bufs) = st.bufs.as_mut() else {
            return false;
        };

        if bufs.free().is_none() {
            bufs.reclaim();
        }

        let size = bufs.size();
        let hdrlen = bpf_hdrlen(link_hdrlen);
        if hdrlen > size {
            st.stats.vals.dropped += 1;
            return false;
        }

        let pktlen = pkt.len();
        let totlen = (hdrlen + snaplen.min(pktlen)).min(size);
        let mut curlen = word_align(bufs.slen());
        let mut wake = false;

        if curlen + totlen > size || !bufs.store_writable() {
            if bufs.free().is_none() {
                bufs.store_full();
                st.stats.vals.dropped += 1;
                return false;
            }

            bufs.rotate();
            wake = true;
            curlen = 0;
        } else if immediate || timed_out {
            wake = true;
        }

        let caplen = totlen - hdrlen;
        let hdr = BpfXhdr::new(ts, caplen as u32, pktlen as u32, hdrlen as u16);
        bufs.append(curlen, hdr.record_bytes(), hdrlen, pkt, caplen);

        if bufs.mode() == BufferMode::ZeroCopy {
            st.stats.vals.zcopy += 1;
        }

        wake
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::sync::atomic::AtomicU32;
    use core::sync::atomic::Ordering;

    #[derive(Default)]
    struct Counting {
        reads: AtomicU32,
    }

    impl Counting {
        fn reads(&self) -> u32 {
            self.reads.load(Ordering::Relaxed)
        }
    }

    impl ClockProvider for Counting {
        fn uptime(&self) -> Duration {
            let n = self.reads.fetch_add(1, Ordering::Relaxed) + 1;
            Duration::from_secs(u64::from(n))
        }

        fn boottime(&self) -> Duration {
            Duration::ZERO
        }
    }

    #[test]
    fn stamp_cache_reads_once_per_quality() {
        let clock = Counting::default();
        let mut sc = StampCache::new(None);
        assert_eq!(sc.uptime(TsQuality::None, &clock), None);

        let fast = sc.uptime(TsQuality::Fast, &clock).unwrap();
        assert_eq!(clock.reads(), 1);
        assert_eq!(sc.uptime(TsQuality::Fast, &clock), Some(fast));
        assert_eq!(clock.reads(), 1);

        // A better quality forces a fresh read, which then serves
        // every lower quality.
        let normal = sc.uptime(TsQuality::Normal, &clock).unwrap();
        assert_eq!(clock.reads(), 2);
        assert_eq!(sc.uptime(TsQuality::Fast, &clock), Some(normal));
    }

    #[test]
    fn device_stamp_wins() {
        let clock = Counting::default();
        let dev = Duration::from_millis(42);
        let mut sc = StampCache::new(Some(dev));
        assert_eq!(sc.uptime(TsQuality::Normal, &clock), Some(dev));
        assert_eq!(clock.reads(), 0);
    }
}
