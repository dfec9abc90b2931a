// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Reading, readiness, and wakeups.
//!
//! A descriptor is ready when its hold buffer has records the
//! consumer has yet to take, or when the store buffer has records and
//! either immediate mode is on or the read timeout has expired.
//!
//! The read timeout is a per-descriptor state machine:
//!
//! ```text
//!              arm (rtout > 0)              callout fires
//!   Idle ──────────────────────► Waiting ──────────────────► TimedOut
//!    ▲                              │                           │
//!    └──── wakeup / read / bind ────┴───────────────────────────┘
//! ```
//!
//! A callout which fires after the descriptor has left `Waiting`, or
//! after it was re-armed, is ignored: every arm bumps a generation
//! number the callback must match.

use super::descriptor::DescState;
use super::descriptor::Descriptor;
use crate::api::BufferMode;
use crate::api::CaptureCmd;
use crate::api::CaptureError;
use crate::ddi::time::Callout;
use crate::provider::LogLevel;
use bitflags::bitflags;
use core::time::Duration;
use std::sync::Arc;

/// The read timeout state of a descriptor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WaitState {
    #[default]
    Idle,
    Waiting,
    TimedOut,
}

/// Whoever asked for asynchronous notification on a descriptor.
pub trait NotifyOwner: Send + Sync {
    fn signal(&self, sig: i32);
}

/// A registered readiness listener, in the style of a kqueue knote.
pub trait EventNote: Send + Sync {
    /// The descriptor became readable with `bytes` bytes available.
    fn activate(&self, bytes: usize);
}

bitflags! {
/// Poll event bits, with the usual `poll(2)` values.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PollEvents: i16 {
    const IN = libc::POLLIN;
    const PRI = libc::POLLPRI;
    const OUT = libc::POLLOUT;
    const ERR = libc::POLLERR;
    const HUP = libc::POLLHUP;
    const NVAL = libc::POLLNVAL;
    const RDNORM = libc::POLLRDNORM;
    const WRNORM = libc::POLLWRNORM;
}
}

impl PollEvents {
    const READ: Self = Self::IN.union(Self::RDNORM);
    const WRITE: Self = Self::OUT.union(Self::WRNORM);
}

impl DescState {
    pub(crate) fn is_ready(&self) -> bool {
        let Some(bufs) = self.bufs.as_ref() else {
            return false;
        };

        bufs.hold_pending()
            || ((self.immediate || self.wait == WaitState::TimedOut)
                && bufs.slen() != 0)
    }

    pub(crate) fn bytes_available(&self) -> usize {
        self.slen() + self.hlen()
    }
}

/// Cancel a pending read timeout, making any late callback stale.
pub(crate) fn stop_callout(st: &mut DescState) {
    if let Some(c) = st.callout.take() {
        c.stop();
    }
    st.callout_gen = st.callout_gen.wrapping_add(1);
}

impl DescState {
    /// Forget any read timeout of a previous session.
    pub(crate) fn reset_wait(&mut self) {
        stop_callout(self);
        self.wait = WaitState::Idle;
    }
}

impl Descriptor {
    /// Start the read timeout, if one is configured and not already
    /// running.
    pub(crate) fn arm_timeout(&self, st: &mut DescState) {
        if st.rtout.is_zero() || st.wait != WaitState::Idle {
            return;
        }

        st.callout_gen = st.callout_gen.wrapping_add(1);
        let generation = st.callout_gen;
        let this = self.this.clone();
        let res = Callout::reset(st.rtout, move || {
            if let Some(d) = this.upgrade() {
                d.timed_out(generation);
            }
        });

        match res {
            Ok(c) => {
                st.callout = Some(c);
                st.wait = WaitState::Waiting;
            }

            Err(e) => {
                let msg =
                    format!("{}: failed to arm read timeout: {e}", self.id());
                self.ctx.log.log(LogLevel::Error, &msg);
            }
        }
    }

    fn timed_out(&self, generation: u64) {
        let mut st = self.state.lock();
        if st.callout_gen != generation || st.wait != WaitState::Waiting {
            return;
        }

        st.callout = None;
        st.wait = WaitState::TimedOut;
        if st.slen() != 0 {
            self.wakeup_locked(&mut st);
        } else {
            self.cv.notify_all();
        }
    }

    /// Tell everyone waiting on this descriptor that records are
    /// ready: blocked readers, the async notification owner, and
    /// registered event notes.
    pub(crate) fn wakeup_locked(&self, st: &mut DescState) {
        if st.wait == WaitState::Waiting {
            stop_callout(st);
            st.wait = WaitState::Idle;
        }

        self.cv.notify_all();

        if st.async_notify && st.sig != 0 {
            if let Some(owner) = st.owner.as_ref() {
                owner.signal(st.sig);
            }
        }

        if !st.knotes.is_empty() {
            if st.is_ready() {
                let bytes = st.bytes_available();
                for (_, note) in st.knotes.iter() {
                    note.activate(bytes);
                }
            } else {
                self.arm_timeout(st);
            }
        }
    }

    /// Copy the hold buffer's records into `buf`, which must be
    /// exactly the buffer size, blocking until records are ready.
    ///
    /// Returns the number of bytes copied. Zero means the read timeout
    /// expired with nothing captured.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, CaptureError> {
        let mut st = self.state.lock();
        if st.closing {
            return Err(CaptureError::Closed);
        }

        if st.bufmode == BufferMode::ZeroCopy {
            return Err(CaptureError::NotSupported(
                "read on a zero-copy descriptor".to_string(),
            ));
        }

        if buf.len() != st.bufsize {
            return Err(CaptureError::InvalidArgument(format!(
                "read of {} bytes, buffer size is {}",
                buf.len(),
                st.bufsize
            )));
        }

        if st.wait == WaitState::Waiting {
            stop_callout(&mut st);
        }
        let timed_out = st.wait == WaitState::TimedOut;
        st.wait = WaitState::Idle;

        loop {
            if st.closing {
                return Err(CaptureError::Closed);
            }

            let (held, slen) = match st.bufs.as_ref() {
                Some(b) => (b.hold().is_some(), b.slen()),
                None => (false, 0),
            };

            if held {
                break;
            }

            if slen != 0 && (st.immediate || st.nonblock || timed_out) {
                if let Some(b) = st.bufs.as_mut() {
                    b.rotate();
                }
                break;
            }

            if st.tap.is_none() {
                return Err(CaptureError::NotConfigured);
            }

            if st.nonblock {
                return Err(CaptureError::WouldBlock);
            }

            self.arm_timeout(&mut st);
            st = self.cv.wait(st);

            if st.closing {
                return Err(CaptureError::Closed);
            }

            // An empty return leaves the state TimedOut, so the next
            // packet or read is serviced without waiting out another
            // timeout.
            if st.wait == WaitState::TimedOut {
                let Some(b) = st.bufs.as_mut() else {
                    return Ok(0);
                };

                if b.hold().is_none() {
                    if b.slen() == 0 {
                        return Ok(0);
                    }

                    b.rotate();
                }

                st.wait = WaitState::Idle;
                break;
            }
        }

        let Some(b) = st.bufs.as_mut() else {
            return Ok(0);
        };
        let n = b.copy_out_hold(buf)?;
        b.release_hold();
        Ok(n)
    }

    /// Report which of `events` are currently true, arming the read
    /// timeout when the caller is waiting for input that is not yet
    /// ready.
    pub fn poll(&self, events: PollEvents) -> PollEvents {
        let mut st = self.state.lock();
        if st.closing {
            return PollEvents::NVAL;
        }

        if st.tap.is_none() {
            return events
                & (PollEvents::HUP | PollEvents::READ | PollEvents::WRITE);
        }

        let mut revents = events & PollEvents::WRITE;
        if events.intersects(PollEvents::READ) {
            if st.is_ready() {
                revents |= events & PollEvents::READ;
            } else {
                self.arm_timeout(&mut st);
            }
        }

        revents
    }

    /// Block until the descriptor is readable or `timeout` expires.
    /// Return whether it is readable.
    pub fn wait_readable(
        &self,
        timeout: Option<Duration>,
    ) -> Result<bool, CaptureError> {
        let mut st = self.state.lock();
        let deadline = timeout.map(|t| crate::ddi::time::Instant::now() + t);

        loop {
            if st.closing {
                return Err(CaptureError::Closed);
            }

            if st.is_ready() {
                return Ok(true);
            }

            if st.tap.is_none() {
                return Err(CaptureError::NotConfigured);
            }

            self.arm_timeout(&mut st);
            match deadline {
                Some(deadline) => {
                    let now = crate::ddi::time::Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    (st, _) = self.cv.wait_timeout(st, deadline - now);
                }

                None => st = self.cv.wait(st),
            }
        }
    }

    /// Register an event note, returning the key to deregister it
    /// with. The note fires at once if the descriptor is already
    /// readable.
    pub fn register_event(
        &self,
        note: Arc<dyn EventNote>,
    ) -> Result<usize, CaptureError> {
        let mut st = self.state.lock();
        if st.closing {
            return Err(CaptureError::Closed);
        }

        let key = st.next_knote;
        st.next_knote += 1;

        if st.is_ready() {
            note.activate(st.bytes_available());
        } else {
            self.arm_timeout(&mut st);
        }

        st.knotes.push((key, note));
        Ok(key)
    }

    pub fn deregister_event(&self, key: usize) -> bool {
        let mut st = self.state.lock();
        let before = st.knotes.len();
        st.knotes.retain(|(k, _)| *k != key);
        st.knotes.len() != before
    }

    /// Bytes of records buffered in store and hold.
    pub fn bytes_available(&self) -> Result<u32, CaptureError> {
        let st = self.lock_for(CaptureCmd::BytesAvailable)?;
        Ok(st.bytes_available() as u32)
    }
}
