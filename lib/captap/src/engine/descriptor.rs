// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A capture descriptor: one consumer's session on a tap.
//!
//! # Control
//!
//! Every control operation validates its arguments first and only
//! then mutates the session, all under the descriptor lock; an
//! operation either fully applies or fully rejects. Once a descriptor
//! is locked (see [`Descriptor::lock`]) only the commands for which
//! [`CaptureCmd::allowed_when_locked()`] holds are accepted.
//!
//! # Lifecycle
//!
//! ```text
//!   open ──► unbound ──── bind ────► bound ◄──┐
//!               ▲                      │      │ bind / set_link_type
//!               └── interface detach ──┤──────┘
//!                                      │
//!                     close ◄──────────┘
//! ```
//!
//! Buffers are allocated on the first bind (copy mode) or by
//! registering zero-copy regions, and from then on the buffer mode
//! and size are fixed.

use super::buffer::BufferTriple;
use super::buffer::CopyBuffers;
use super::filter::FilterKind;
use super::filter::FilterProgram;
use super::filter::FilterSlot;
use super::registry::DescriptorId;
use super::tap::Tap;
use super::wait::EventNote;
use super::wait::NotifyOwner;
use super::wait::WaitState;
use super::zerocopy::ZeroCopyBuffers;
use super::zerocopy::ZeroCopyRegion;
use crate::ExecCtx;
use crate::api::BufferMode;
use crate::api::CaptureCmd;
use crate::api::CaptureError;
use crate::api::CaptureStats;
use crate::api::DEFAULT_BUFSIZE;
use crate::api::DescriptorInfo;
use crate::api::DirectionPolicy;
use crate::api::LinkType;
use crate::api::MAX_BUFSIZE;
use crate::api::MAX_SIGNAL;
use crate::api::MIN_BUFSIZE;
use crate::api::ReadTimeout;
use crate::api::RotateZeroCopyResp;
use crate::api::TimestampPolicy;
use crate::api::Version;
use crate::api::ZBUF_MAX_SIZE;
use crate::ddi::kstat;
use crate::ddi::kstat::KStatNamed;
use crate::ddi::kstat::KStatProvider;
use crate::ddi::kstat::KStatU64;
use crate::ddi::sync::KCondvar;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KMutexGuard;
use crate::ddi::time::Callout;
use core::time::Duration;
use kstat_macro::KStatProvider;
use std::sync::Arc;
use std::sync::Weak;

/// Cumulative counters for a single [`Descriptor`].
#[derive(KStatProvider)]
pub struct DescStats {
    /// Packets which passed the direction check.
    pub received: KStatU64,

    /// Packets accepted by the read filter but lost because the
    /// buffers were full.
    pub dropped: KStatU64,

    /// Packets accepted by the read filter.
    pub captured: KStatU64,

    pub written: KStatU64,

    /// Writes which did not reach the interface.
    pub write_dropped: KStatU64,

    /// Writes rejected by the write filter.
    pub write_filtered: KStatU64,

    /// Records appended to zero-copy buffers.
    pub zcopy: KStatU64,
}

impl From<DescStatsSnap> for CaptureStats {
    fn from(s: DescStatsSnap) -> Self {
        Self {
            received: s.received,
            dropped: s.dropped,
            captured: s.captured,
            written: s.written,
            write_dropped: s.write_dropped,
            write_filtered: s.write_filtered,
            zcopy: s.zcopy,
        }
    }
}

/// The mutable state of a descriptor, guarded by the descriptor lock.
pub struct DescState {
    pub(crate) tap: Option<Arc<Tap>>,
    pub(crate) bufmode: BufferMode,
    pub(crate) bufsize: usize,
    pub(crate) bufs: Option<BufferTriple>,
    pub(crate) filters: FilterSlot,
    pub(crate) immediate: bool,
    pub(crate) promisc: bool,
    pub(crate) hdrcmplt: bool,
    pub(crate) feedback: bool,
    pub(crate) nonblock: bool,
    pub(crate) locked: bool,
    pub(crate) direction: DirectionPolicy,
    pub(crate) tstamp: TimestampPolicy,
    pub(crate) rtout: Duration,
    pub(crate) wait: WaitState,
    pub(crate) callout: Option<Callout>,
    pub(crate) callout_gen: u64,
    pub(crate) async_notify: bool,
    pub(crate) sig: i32,
    pub(crate) owner: Option<Arc<dyn NotifyOwner>>,
    pub(crate) knotes: Vec<(usize, Arc<dyn EventNote>)>,
    pub(crate) next_knote: usize,
    pub(crate) pid: u32,
    pub(crate) closing: bool,
    pub(crate) stats: KStatNamed<DescStats>,
}

impl DescState {
    fn new(stats: KStatNamed<DescStats>) -> Self {
        Self {
            tap: None,
            bufmode: BufferMode::Copying,
            bufsize: DEFAULT_BUFSIZE as usize,
            bufs: None,
            filters: FilterSlot::default(),
            immediate: false,
            promisc: false,
            hdrcmplt: false,
            feedback: false,
            nonblock: false,
            locked: false,
            direction: DirectionPolicy::InOut,
            tstamp: TimestampPolicy::default(),
            rtout: Duration::ZERO,
            wait: WaitState::Idle,
            callout: None,
            callout_gen: 0,
            async_notify: false,
            sig: libc::SIGIO,
            owner: None,
            knotes: vec![],
            next_knote: 0,
            pid: std::process::id(),
            closing: false,
            stats,
        }
    }

    /// Discard buffered records and zero the counters.
    pub(crate) fn reset(&mut self) {
        if let Some(bufs) = self.bufs.as_mut() {
            bufs.discard();
        }

        self.stats.vals.reset();
    }

    /// Allocate copy buffers at the configured size, if there are
    /// none yet.
    pub(crate) fn alloc_copy_buffers(&mut self) {
        if self.bufs.is_none() && self.bufmode == BufferMode::Copying {
            let strategy = Box::new(CopyBuffers::new(self.bufsize));
            self.bufs = Some(BufferTriple::new(strategy, self.bufsize));
        }
    }

    pub(crate) fn slen(&self) -> usize {
        self.bufs.as_ref().map(|b| b.slen()).unwrap_or(0)
    }

    pub(crate) fn hlen(&self) -> usize {
        self.bufs.as_ref().map(|b| b.hlen()).unwrap_or(0)
    }

    fn check_cmd(&self, cmd: CaptureCmd) -> Result<(), CaptureError> {
        if self.closing {
            return Err(CaptureError::Closed);
        }

        if self.locked && !cmd.allowed_when_locked() {
            return Err(CaptureError::PermissionDenied(format!(
                "{cmd:?} on a locked descriptor"
            )));
        }

        Ok(())
    }

    fn bound_tap(&self) -> Result<&Arc<Tap>, CaptureError> {
        self.tap.as_ref().ok_or_else(|| {
            CaptureError::InvalidArgument("descriptor is not bound".to_string())
        })
    }
}

pub struct Descriptor {
    id: DescriptorId,
    pub(crate) state: KMutex<DescState>,
    pub(crate) cv: KCondvar,
    pub(crate) ctx: Arc<ExecCtx>,
    pub(crate) this: Weak<Descriptor>,
}

impl Descriptor {
    pub(crate) fn new(
        id: DescriptorId,
        ctx: Arc<ExecCtx>,
    ) -> Result<Arc<Self>, CaptureError> {
        let name = format!("desc{}", id.index());
        let stats = KStatNamed::new("captap", &name, DescStats::new())
            .map_err(|e| CaptureError::System {
                errno: libc::EINVAL,
                msg: e.to_string(),
            })?;

        Ok(Arc::new_cyclic(|this| Self {
            id,
            state: KMutex::new(DescState::new(stats)),
            cv: KCondvar::new(),
            ctx,
            this: this.clone(),
        }))
    }

    pub fn id(&self) -> DescriptorId {
        self.id
    }

    /// The process that most recently opened or used this descriptor.
    pub fn pid(&self) -> u32 {
        self.state.lock().pid
    }

    /// Take the descriptor lock on behalf of `cmd`, failing if the
    /// descriptor is closing or locked against it.
    pub(crate) fn lock_for(
        &self,
        cmd: CaptureCmd,
    ) -> Result<KMutexGuard<'_, DescState>, CaptureError> {
        let st = self.state.lock();
        st.check_cmd(cmd)?;
        Ok(st)
    }

    pub fn buffer_len(&self) -> Result<u32, CaptureError> {
        let st = self.lock_for(CaptureCmd::GetBufferLen)?;
        Ok(st.bufsize as u32)
    }

    /// Set the size of each capture buffer, allocating them. The size
    /// is clamped into the supported range; return the size actually
    /// used.
    pub fn set_buffer_len(&self, len: u32) -> Result<u32, CaptureError> {
        let mut st = self.lock_for(CaptureCmd::SetBufferLen)?;

        if st.bufmode == BufferMode::ZeroCopy {
            return Err(CaptureError::NotSupported(
                "buffer length is set by the zero-copy regions".to_string(),
            ));
        }

        if st.tap.is_some() || st.bufs.is_some() {
            return Err(CaptureError::InvalidArgument(
                "buffers already allocated".to_string(),
            ));
        }

        let size = len.clamp(MIN_BUFSIZE, MAX_BUFSIZE);
        st.bufsize = size as usize;
        st.alloc_copy_buffers();
        Ok(size)
    }

    /// Install (or, with an empty program, clear) a filter.
    ///
    /// Installing a read filter with `reset` discards buffered
    /// records and zeroes the counters.
    pub fn set_filter(
        &self,
        kind: FilterKind,
        program: &[u8],
        reset: bool,
    ) -> Result<(), CaptureError> {
        let cmd = match (kind, reset) {
            (FilterKind::Write, _) => CaptureCmd::SetWriteFilter,
            (FilterKind::Read, true) => CaptureCmd::SetReadFilter,
            (FilterKind::Read, false) => CaptureCmd::SetReadFilterNoReset,
        };

        // Validation happens outside the lock; a program is opaque and
        // the validator never touches the descriptor.
        self.state.lock().check_cmd(cmd)?;
        let prog = FilterProgram::new(self.ctx.filter.as_ref(), program)?;

        let mut st = self.lock_for(cmd)?;
        st.filters.set(kind, prog);
        if kind == FilterKind::Read && reset {
            st.reset();
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), CaptureError> {
        let mut st = self.lock_for(CaptureCmd::Flush)?;
        st.reset();
        Ok(())
    }

    /// Ask the bound interface for promiscuous mode. Asking again is a
    /// no-op.
    pub fn set_promiscuous(&self) -> Result<(), CaptureError> {
        let mut st = self.lock_for(CaptureCmd::PromiscuousOn)?;
        let tap = st.bound_tap()?.clone();

        if st.promisc {
            return Ok(());
        }

        tap.ifp().set_promisc(true)?;
        st.promisc = true;
        Ok(())
    }

    pub fn link_type(&self) -> Result<LinkType, CaptureError> {
        let st = self.lock_for(CaptureCmd::GetLinkType)?;
        Ok(st.bound_tap()?.link_type())
    }

    pub fn interface_name(&self) -> Result<String, CaptureError> {
        let st = self.lock_for(CaptureCmd::GetInterface)?;
        Ok(st.bound_tap()?.name().to_string())
    }

    pub fn set_read_timeout(&self, t: ReadTimeout) -> Result<(), CaptureError> {
        if u64::from(t.usec) >= crate::ddi::time::MICROS {
            return Err(CaptureError::InvalidArgument(format!(
                "bad timeout: {}.{:06}",
                t.sec, t.usec
            )));
        }

        let mut st = self.lock_for(CaptureCmd::SetReadTimeout)?;
        st.rtout = t.as_duration();
        Ok(())
    }

    pub fn read_timeout(&self) -> Result<ReadTimeout, CaptureError> {
        let st = self.lock_for(CaptureCmd::GetReadTimeout)?;
        Ok(ReadTimeout::from_duration(st.rtout))
    }

    pub fn stats(&self) -> Result<CaptureStats, CaptureError> {
        let st = self.lock_for(CaptureCmd::GetStats)?;
        Ok(st.stats.vals.snapshot().into())
    }

    pub fn set_immediate(&self, on: bool) -> Result<(), CaptureError> {
        self.lock_for(CaptureCmd::SetImmediate)?.immediate = on;
        Ok(())
    }

    pub fn version(&self) -> Result<Version, CaptureError> {
        self.lock_for(CaptureCmd::GetVersion)?;
        Ok(Version::CURRENT)
    }

    pub fn header_complete(&self) -> Result<bool, CaptureError> {
        Ok(self.lock_for(CaptureCmd::GetHeaderComplete)?.hdrcmplt)
    }

    pub fn set_header_complete(&self, on: bool) -> Result<(), CaptureError> {
        self.lock_for(CaptureCmd::SetHeaderComplete)?.hdrcmplt = on;
        Ok(())
    }

    pub fn direction(&self) -> Result<DirectionPolicy, CaptureError> {
        Ok(self.lock_for(CaptureCmd::GetDirection)?.direction)
    }

    pub fn set_direction(
        &self,
        direction: DirectionPolicy,
    ) -> Result<(), CaptureError> {
        self.lock_for(CaptureCmd::SetDirection)?.direction = direction;
        Ok(())
    }

    pub fn timestamp_policy(&self) -> Result<TimestampPolicy, CaptureError> {
        Ok(self.lock_for(CaptureCmd::GetTimestampPolicy)?.tstamp)
    }

    /// Set the timestamp policy from its wire bit pattern.
    pub fn set_timestamp_policy(&self, bits: u32) -> Result<(), CaptureError> {
        let policy = TimestampPolicy::from_bits(bits).ok_or_else(|| {
            CaptureError::InvalidArgument(format!(
                "bad timestamp policy: {bits:#x}"
            ))
        })?;

        self.lock_for(CaptureCmd::SetTimestampPolicy)?.tstamp = policy;
        Ok(())
    }

    pub fn feedback(&self) -> bool {
        self.state.lock().feedback
    }

    pub fn set_feedback(&self, on: bool) -> Result<(), CaptureError> {
        self.lock_for(CaptureCmd::SetFeedback)?.feedback = on;
        Ok(())
    }

    /// Lock the descriptor; there is no way back.
    pub fn lock(&self) -> Result<(), CaptureError> {
        self.lock_for(CaptureCmd::Lock)?.locked = true;
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    pub fn async_notify(&self) -> Result<bool, CaptureError> {
        Ok(self.lock_for(CaptureCmd::GetAsyncNotify)?.async_notify)
    }

    pub fn set_async_notify(&self, on: bool) -> Result<(), CaptureError> {
        self.lock_for(CaptureCmd::SetAsyncNotify)?.async_notify = on;
        Ok(())
    }

    pub fn receive_signal(&self) -> Result<i32, CaptureError> {
        Ok(self.lock_for(CaptureCmd::GetReceiveSignal)?.sig)
    }

    pub fn set_receive_signal(&self, sig: i32) -> Result<(), CaptureError> {
        if !(0..MAX_SIGNAL).contains(&sig) {
            return Err(CaptureError::InvalidArgument(format!(
                "bad signal: {sig}"
            )));
        }

        self.lock_for(CaptureCmd::SetReceiveSignal)?.sig = sig;
        Ok(())
    }

    /// Set (or clear) the owner signalled when records are ready and
    /// async notification is on.
    pub fn set_notify_owner(
        &self,
        owner: Option<Arc<dyn NotifyOwner>>,
    ) -> Result<(), CaptureError> {
        let mut st = self.state.lock();
        if st.closing {
            return Err(CaptureError::Closed);
        }
        st.owner = owner;
        Ok(())
    }

    pub fn nonblocking(&self) -> bool {
        self.state.lock().nonblock
    }

    pub fn set_nonblocking(&self, on: bool) -> Result<(), CaptureError> {
        self.lock_for(CaptureCmd::SetNonBlocking)?.nonblock = on;
        Ok(())
    }

    pub fn buffer_mode(&self) -> Result<BufferMode, CaptureError> {
        Ok(self.lock_for(CaptureCmd::GetBufferMode)?.bufmode)
    }

    /// Choose the buffer mode; only possible before buffers exist and
    /// before the first bind.
    pub fn set_buffer_mode(
        &self,
        mode: BufferMode,
    ) -> Result<(), CaptureError> {
        let mut st = self.lock_for(CaptureCmd::SetBufferMode)?;

        if st.bufs.is_some() || st.tap.is_some() {
            return Err(CaptureError::Busy(
                "buffer mode is fixed once buffers exist".to_string(),
            ));
        }

        st.bufmode = mode;
        Ok(())
    }

    pub fn zerocopy_max_size(&self) -> Result<u64, CaptureError> {
        let st = self.lock_for(CaptureCmd::GetZeroCopyMaxSize)?;
        if st.bufmode != BufferMode::ZeroCopy {
            return Err(CaptureError::NotSupported(
                "not a zero-copy descriptor".to_string(),
            ));
        }

        Ok(ZBUF_MAX_SIZE as u64)
    }

    /// Hand the descriptor its pair of zero-copy regions, each `len`
    /// bytes long.
    pub fn set_zerocopy_regions(
        &self,
        a: Arc<ZeroCopyRegion>,
        b: Arc<ZeroCopyRegion>,
        len: usize,
    ) -> Result<(), CaptureError> {
        let mut st = self.lock_for(CaptureCmd::SetZeroCopyRegions)?;

        if st.bufmode != BufferMode::ZeroCopy {
            return Err(CaptureError::InvalidArgument(
                "not a zero-copy descriptor".to_string(),
            ));
        }

        if st.bufs.is_some() || st.tap.is_some() {
            return Err(CaptureError::InvalidArgument(
                "buffers already allocated".to_string(),
            ));
        }

        let zb = ZeroCopyBuffers::new(a, b, len)?;
        st.bufsize = zb.bufsize();
        st.bufs = Some(BufferTriple::new(Box::new(zb), st.bufsize));
        Ok(())
    }

    /// Force the store buffer over to the consumer if hold is empty
    /// and the store has records; report the region now held.
    pub fn rotate_zerocopy_buffer(
        &self,
    ) -> Result<RotateZeroCopyResp, CaptureError> {
        let mut st = self.lock_for(CaptureCmd::RotateZeroCopyBuffer)?;

        if st.bufmode != BufferMode::ZeroCopy {
            return Err(CaptureError::NotSupported(
                "not a zero-copy descriptor".to_string(),
            ));
        }

        let Some(bufs) = st.bufs.as_mut() else {
            return Ok(RotateZeroCopyResp { region: None, len: 0 });
        };

        bufs.reclaim();
        if bufs.hold().is_none() && bufs.slen() != 0 && bufs.rotate() {
            let hold = bufs.hold();
            return Ok(RotateZeroCopyResp {
                region: hold.and_then(|h| bufs.strategy().region_id(h)),
                len: bufs.hlen() as u32,
            });
        }

        Ok(RotateZeroCopyResp { region: None, len: 0 })
    }

    /// A summary of the session.
    pub fn info(&self) -> DescriptorInfo {
        let st = self.state.lock();
        DescriptorInfo {
            id: self.id.as_u64(),
            pid: st.pid,
            interface: st.tap.as_ref().map(|t| t.name().to_string()),
            link_type: st.tap.as_ref().map(|t| t.link_type()),
            mode: st.bufmode,
            bufsize: st.bufsize as u32,
            slen: st.slen() as u32,
            hlen: st.hlen() as u32,
            immediate: st.immediate,
            promisc: st.promisc,
            hdrcmplt: st.hdrcmplt,
            feedback: st.feedback,
            locked: st.locked,
            async_notify: st.async_notify,
            direction: st.direction,
            sig: st.sig,
            stats: st.stats.vals.snapshot().into(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().tap.is_some()
    }

    pub fn is_closing(&self) -> bool {
        self.state.lock().closing
    }

    /// Tear down the session: cancel the read timeout, drop the
    /// notification hooks and buffers, and wake every waiter with
    /// [`CaptureError::Closed`]. The caller detaches the descriptor
    /// from its tap.
    pub(crate) fn shutdown(&self) {
        let mut st = self.state.lock();
        st.closing = true;
        super::wait::stop_callout(&mut st);
        st.wait = WaitState::Idle;
        st.owner = None;
        st.knotes.clear();
        st.bufs = None;
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::T_NANOTIME;
    use crate::api::T_NONE;
    use crate::engine::filter::Snaplen;
    use crate::provider::PrintlnLog;
    use crate::provider::SystemClock;

    fn desc() -> Arc<Descriptor> {
        let ctx = Arc::new(ExecCtx {
            log: Box::new(PrintlnLog),
            clock: Box::new(SystemClock::new()),
            filter: Box::new(Snaplen),
        });
        Descriptor::new(DescriptorId::new(0, 1), ctx).unwrap()
    }

    #[test]
    fn defaults() {
        let d = desc();
        assert_eq!(d.buffer_len().unwrap(), DEFAULT_BUFSIZE);
        assert_eq!(d.buffer_mode().unwrap(), BufferMode::Copying);
        assert_eq!(d.direction().unwrap(), DirectionPolicy::InOut);
        assert_eq!(d.timestamp_policy().unwrap(), TimestampPolicy::default());
        assert_eq!(d.read_timeout().unwrap(), ReadTimeout::default());
        assert_eq!(d.receive_signal().unwrap(), libc::SIGIO);
        assert!(!d.header_complete().unwrap());
        assert!(!d.async_notify().unwrap());
        assert!(!d.is_bound());
    }

    #[test]
    fn buffer_len_clamped_then_fixed() {
        let d = desc();
        assert_eq!(d.set_buffer_len(1).unwrap(), MIN_BUFSIZE);
        assert!(matches!(
            d.set_buffer_len(8192),
            Err(CaptureError::InvalidArgument(_))
        ));

        let d = desc();
        assert_eq!(d.set_buffer_len(u32::MAX).unwrap(), MAX_BUFSIZE);
        assert!(matches!(
            d.set_buffer_mode(BufferMode::ZeroCopy),
            Err(CaptureError::Busy(_))
        ));
    }

    #[test]
    fn zerocopy_rejects_buffer_len() {
        let d = desc();
        d.set_buffer_mode(BufferMode::ZeroCopy).unwrap();
        assert!(matches!(
            d.set_buffer_len(8192),
            Err(CaptureError::NotSupported(_))
        ));
        assert_eq!(d.zerocopy_max_size().unwrap(), ZBUF_MAX_SIZE as u64);
    }

    #[test]
    fn setters_validate() {
        let d = desc();
        let bad = ReadTimeout { sec: 0, usec: 1_000_000 };
        assert!(d.set_read_timeout(bad).is_err());
        d.set_read_timeout(ReadTimeout { sec: 2, usec: 999_999 }).unwrap();
        assert_eq!(d.read_timeout().unwrap().usec, 999_999);

        assert!(d.set_receive_signal(MAX_SIGNAL).is_err());
        assert!(d.set_receive_signal(-1).is_err());
        d.set_receive_signal(libc::SIGUSR1).unwrap();
        assert_eq!(d.receive_signal().unwrap(), libc::SIGUSR1);

        assert!(d.set_timestamp_policy(T_NONE | 0x100).is_err());
        d.set_timestamp_policy(T_NANOTIME).unwrap();
        assert_eq!(d.timestamp_policy().unwrap().bits(), T_NANOTIME);

        assert!(d.set_filter(FilterKind::Read, &[0; 3], true).is_err());
    }

    #[test]
    fn unbound_queries() {
        let d = desc();
        assert!(matches!(
            d.set_promiscuous(),
            Err(CaptureError::InvalidArgument(_))
        ));
        assert!(d.link_type().is_err());
        assert!(d.interface_name().is_err());
    }

    #[test]
    fn locked_allow_list() {
        let d = desc();
        d.lock().unwrap();
        assert!(d.is_locked());

        // Allowed.
        d.set_immediate(true).unwrap();
        d.set_read_timeout(ReadTimeout { sec: 1, usec: 0 }).unwrap();
        d.set_timestamp_policy(T_NANOTIME).unwrap();
        d.set_feedback(true).unwrap();
        d.flush().unwrap();
        d.stats().unwrap();
        d.lock().unwrap();

        // Refused.
        for res in [
            d.set_direction(DirectionPolicy::In),
            d.set_header_complete(true),
            d.set_filter(FilterKind::Read, &[], true),
            d.set_filter(FilterKind::Write, &[], false),
            d.set_buffer_mode(BufferMode::ZeroCopy),
            d.set_buffer_len(8192).map(|_| ()),
        ] {
            assert!(matches!(res, Err(CaptureError::PermissionDenied(_))));
        }
    }

    #[test]
    fn closed_rejects_everything() {
        let d = desc();
        d.shutdown();
        assert_eq!(d.stats().unwrap_err(), CaptureError::Closed);
        assert_eq!(d.set_immediate(true).unwrap_err(), CaptureError::Closed);
        assert!(d.is_closing());
    }
}
