// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The network interface contract, and a software interface to drive
//! the engine without a real data plane.

use super::packet::Packet;
use super::packet::PacketFlags;
use super::registry::DescriptorId;
use super::registry::Registry;
use super::tap::Tap;
use crate::api::CaptureError;
use crate::api::Direction;
use crate::api::LinkType;
use crate::ddi::sync::KMutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Weak;

/// What the engine needs from a network interface.
///
/// None of these methods is called with a descriptor lock held except
/// [`NetIf::set_promisc`], which must therefore never call back into
/// the engine.
pub trait NetIf: Send + Sync {
    fn name(&self) -> &str;

    /// The largest payload, excluding the link header, the interface
    /// will transmit.
    fn mtu(&self) -> usize;

    fn is_up(&self) -> bool;

    /// Take (`true`) or drop (`false`) one promiscuous mode reference.
    fn set_promisc(&self, on: bool) -> Result<(), CaptureError>;

    /// Transmit `payload` to the link address `dst`.
    fn output(&self, dst: &LinkAddr, payload: Vec<u8>)
    -> Result<(), CaptureError>;

    /// Inject a frame into the interface's input path. A frame looped
    /// back from a write names the descriptor that wrote it.
    fn input(
        &self,
        frame: Vec<u8>,
        flags: PacketFlags,
        writer: Option<DescriptorId>,
    );
}

/// The address family of a [`LinkAddr`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddrFamily {
    Unspec,
    Inet,
    ImpLink,
    Ieee80211,
    /// The payload already carries a complete link header.
    HeaderComplete,
}

/// The destination of a write: the link header bytes, tagged with the
/// family the output routine should interpret them as.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkAddr {
    pub family: AddrFamily,
    pub data: Vec<u8>,
}

/// The most frames either queue of a [`PseudoIf`] holds; the oldest
/// frame is dropped to make room.
pub const PSEUDO_QUEUE_LIMIT: usize = 1024;

fn enqueue<T>(q: &mut VecDeque<T>, item: T) {
    if q.len() == PSEUDO_QUEUE_LIMIT {
        q.pop_front();
    }
    q.push_back(item);
}

struct PseudoState {
    up: bool,
    gone: bool,
    promisc: u32,
    taps: Vec<Weak<Tap>>,
    fail_output: Option<CaptureError>,
    fail_promisc: Option<CaptureError>,
    tx: VecDeque<Vec<u8>>,
    rx: VecDeque<(Vec<u8>, PacketFlags)>,
}

/// A software interface.
///
/// Frames handed to [`PseudoIf::receive`] and [`PseudoIf::transmit`]
/// are tapped on the interface's first (primary) tap as inbound and
/// outbound traffic. Writes from capture consumers land in a transmit
/// queue; looped-back feedback frames land in a receive queue. Both
/// queues keep only the latest [`PSEUDO_QUEUE_LIMIT`] frames.
pub struct PseudoIf {
    name: String,
    mtu: usize,
    state: KMutex<PseudoState>,
}

impl PseudoIf {
    pub fn new(name: &str, mtu: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            mtu,
            state: KMutex::new(PseudoState {
                up: true,
                gone: false,
                promisc: 0,
                taps: vec![],
                fail_output: None,
                fail_promisc: None,
                tx: VecDeque::new(),
                rx: VecDeque::new(),
            }),
        })
    }

    /// Register a tap for this interface with `reg`. The first one
    /// attached is the primary tap.
    pub fn attach(
        self: &Arc<Self>,
        reg: &Registry,
        dlt: LinkType,
        hdrlen: usize,
    ) -> Result<Arc<Tap>, CaptureError> {
        let ifp: Arc<dyn NetIf> = self.clone();
        let tap = reg.attach_interface(ifp, dlt, hdrlen)?;
        self.state.lock().taps.push(Arc::downgrade(&tap));
        Ok(tap)
    }

    /// Tear the interface down: every tap is removed from `reg` and
    /// its descriptors are detached.
    pub fn detach(&self, reg: &Registry) -> Result<usize, CaptureError> {
        {
            let mut st = self.state.lock();
            st.gone = true;
            st.taps.clear();
        }
        reg.detach_interface(&self.name)
    }

    pub fn set_up(&self, up: bool) {
        self.state.lock().up = up;
    }

    /// The number of outstanding promiscuous mode references.
    pub fn promisc_refs(&self) -> u32 {
        self.state.lock().promisc
    }

    /// Make every subsequent transmit fail with `err`.
    pub fn fail_output(&self, err: Option<CaptureError>) {
        self.state.lock().fail_output = err;
    }

    /// Make every subsequent promiscuous mode change fail with `err`.
    pub fn fail_promisc(&self, err: Option<CaptureError>) {
        self.state.lock().fail_promisc = err;
    }

    fn taps(&self) -> Vec<Arc<Tap>> {
        self.state.lock().taps.iter().filter_map(Weak::upgrade).collect()
    }

    fn primary(&self) -> Option<Arc<Tap>> {
        let st = self.state.lock();
        st.taps.first().and_then(Weak::upgrade)
    }

    /// A frame arrived from the wire.
    pub fn receive(&self, frame: &[u8]) {
        if let Some(tap) = self.primary() {
            tap.tap_bytes(frame, Direction::In);
        }
    }

    /// A frame left for the wire.
    pub fn transmit(&self, frame: &[u8]) {
        if let Some(tap) = self.primary() {
            tap.tap_bytes(frame, Direction::Out);
        }
    }

    /// Deliver `pkt` on this interface's tap for `dlt`, if it has one.
    pub fn deliver_on(&self, dlt: LinkType, pkt: &Packet) {
        let taps = self.taps();
        if let Some(tap) = taps.into_iter().find(|t| t.link_type() == dlt) {
            tap.deliver(pkt);
        }
    }

    /// Drain the frames written by capture consumers.
    pub fn take_output(&self) -> Vec<Vec<u8>> {
        self.state.lock().tx.drain(..).collect()
    }

    /// Drain the frames looped back into the input path.
    pub fn take_input(&self) -> Vec<(Vec<u8>, PacketFlags)> {
        self.state.lock().rx.drain(..).collect()
    }
}

impl NetIf for PseudoIf {
    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn is_up(&self) -> bool {
        let st = self.state.lock();
        st.up && !st.gone
    }

    fn set_promisc(&self, on: bool) -> Result<(), CaptureError> {
        let mut st = self.state.lock();
        if st.gone {
            return Err(CaptureError::NoSuchDevice(self.name.clone()));
        }

        if let Some(err) = st.fail_promisc.as_ref() {
            return Err(err.clone());
        }

        if on {
            st.promisc += 1;
        } else {
            st.promisc = st.promisc.saturating_sub(1);
        }
        Ok(())
    }

    fn output(
        &self,
        dst: &LinkAddr,
        payload: Vec<u8>,
    ) -> Result<(), CaptureError> {
        let frame = {
            let mut st = self.state.lock();
            if st.gone {
                return Err(CaptureError::NoSuchDevice(self.name.clone()));
            }

            if let Some(err) = st.fail_output.as_ref() {
                return Err(err.clone());
            }

            let mut frame = dst.data.clone();
            frame.extend_from_slice(&payload);
            enqueue(&mut st.tx, frame.clone());
            frame
        };

        self.transmit(&frame);
        Ok(())
    }

    fn input(
        &self,
        frame: Vec<u8>,
        flags: PacketFlags,
        writer: Option<DescriptorId>,
    ) {
        {
            let mut st = self.state.lock();
            if st.gone {
                return;
            }
            enqueue(&mut st.rx, (frame.clone(), flags));
        }

        if let Some(tap) = self.primary() {
            let mut pkt = Packet::new(&frame, Direction::In).with_flags(flags);
            if let Some(id) = writer {
                pkt = pkt.with_writer(id);
            }
            tap.deliver(&pkt);
        }
    }
}
