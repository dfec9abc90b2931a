// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod clock;
pub mod filter;
pub mod log;
pub mod pcap;
pub mod pkt;

// Let's make our lives easier and pub use a bunch of stuff.
pub use captap::ExecCtx;
pub use captap::api::Direction::*;
pub use captap::api::*;
pub use captap::engine::descriptor::Descriptor;
pub use captap::engine::ifnet::PSEUDO_QUEUE_LIMIT;
pub use captap::engine::ifnet::PseudoIf;
pub use captap::engine::packet::Packet;
pub use captap::engine::packet::PacketFlags;
pub use captap::engine::registry::Registry;
pub use captap::engine::wait::PollEvents;
pub use captap::provider::SystemClock;
pub use clock::ManualClock;
pub use filter::PortFilter;
pub use log::CaptureLog;
pub use std::sync::Arc;

/// A registry on the system clock, with the [`PortFilter`] engine
/// and a log that collects into memory.
pub fn sim_registry() -> Arc<Registry> {
    Registry::new(ExecCtx {
        log: Box::new(CaptureLog::new()),
        clock: Box::new(SystemClock::new()),
        filter: Box::new(PortFilter),
    })
}

/// A registry whose clock and log are held by the caller.
pub fn sim_registry_with(
    log: &CaptureLog,
    clock: &ManualClock,
) -> Arc<Registry> {
    Registry::new(ExecCtx {
        log: Box::new(log.clone()),
        clock: Box::new(clock.clone()),
        filter: Box::new(PortFilter),
    })
}

/// A pseudo interface named `name` presenting Ethernet, attached to
/// `reg`.
pub fn sim_ether(reg: &Arc<Registry>, name: &str) -> Arc<PseudoIf> {
    let ifp = PseudoIf::new(name, 1500);
    ifp.attach(reg, LinkType::EN10MB, pkt::ETHER_HDR_LEN).unwrap();
    ifp
}

/// Open a descriptor bound to `iface` with buffers of `bufsize`.
pub fn open_bound(
    reg: &Arc<Registry>,
    iface: &str,
    bufsize: u32,
) -> Arc<Descriptor> {
    let d = reg.open().unwrap();
    d.set_buffer_len(bufsize).unwrap();
    reg.bind(&d, iface).unwrap();
    d
}

/// Read one buffer's worth of records from `d`.
pub fn read_all(d: &Descriptor) -> Vec<u8> {
    let mut buf = vec![0u8; d.buffer_len().unwrap() as usize];
    let n = d.read(&mut buf).unwrap();
    buf.truncate(n);
    buf
}
