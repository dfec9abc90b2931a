// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments, callouts, etc.

use super::sync::KCondvar;
use super::sync::KMutex;
use core::time::Duration;
use std::io;
use std::sync::Arc;
use std::thread;
pub use std::time::Instant;

/// The number of microseconds in a second.
pub const MICROS: u64 = 1_000_000;

enum CalloutState {
    Pending,
    Stopped,
    Fired,
}

struct CalloutShared {
    state: KMutex<CalloutState>,
    cv: KCondvar,
}

/// A one-shot timer, in the style of `callout(9)`.
///
/// The callback runs on its own thread once the deadline passes,
/// unless the callout is stopped first. Dropping a `Callout` stops
/// it.
///
/// A callback which has already started may still be running when
/// `stop()` returns `false`; callers that need to ignore such a late
/// callback must check for it themselves (e.g. with a generation
/// number).
pub struct Callout {
    shared: Arc<CalloutShared>,
}

impl Callout {
    /// Arrange for `f` to run once `after` has elapsed.
    pub fn reset<F>(after: Duration, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(CalloutShared {
            state: KMutex::new(CalloutState::Pending),
            cv: KCondvar::new(),
        });
        let deadline = Instant::now() + after;
        let timer = shared.clone();

        thread::Builder::new().name("captap-callout".to_string()).spawn(
            move || {
                let mut state = timer.state.lock();
                loop {
                    if !matches!(*state, CalloutState::Pending) {
                        return;
                    }

                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }

                    (state, _) = timer.cv.wait_timeout(state, deadline - now);
                }

                *state = CalloutState::Fired;
                drop(state);
                f();
            },
        )?;

        Ok(Self { shared })
    }

    /// Stop the callout. Return `true` if it had not yet fired.
    pub fn stop(&self) -> bool {
        let mut state = self.shared.state.lock();
        match *state {
            CalloutState::Pending => {
                *state = CalloutState::Stopped;
                self.shared.cv.notify_all();
                true
            }

            CalloutState::Stopped | CalloutState::Fired => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.shared.state.lock(), CalloutState::Pending)
    }
}

impl Drop for Callout {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn callout_fires() {
        let (tx, rx) = mpsc::channel();
        let c = Callout::reset(Duration::from_millis(5), move || {
            tx.send(()).unwrap();
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!c.is_pending());
        assert!(!c.stop());
    }

    #[test]
    fn callout_stopped() {
        let (tx, rx) = mpsc::channel::<()>();
        let c = Callout::reset(Duration::from_secs(60), move || {
            tx.send(()).unwrap();
        })
        .unwrap();
        assert!(c.stop());
        // The timer thread exits and drops the sender without firing.
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
    }
}
