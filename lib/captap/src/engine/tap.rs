// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A tap: one (interface, link type) attachment point.

use super::descriptor::Descriptor;
use super::ifnet::NetIf;
use super::packet::Packet;
use super::registry::DescriptorId;
use crate::api::Direction;
use crate::api::LinkType;
use crate::ddi::sync::KRwLock;
use std::sync::Arc;

/// The point at which an interface presents its traffic under one
/// link type.
///
/// The descriptor list is read-locked for the duration of each
/// delivery and write-locked to attach or detach a descriptor, so a
/// detach waits for any delivery in flight to finish.
pub struct Tap {
    ifp: Arc<dyn NetIf>,
    dlt: LinkType,
    hdrlen: usize,
    pub(crate) descs: KRwLock<Vec<Arc<Descriptor>>>,
}

impl Tap {
    /// A tap presenting `ifp` with `dlt` framing, whose link header
    /// is `hdrlen` bytes long.
    pub fn new(ifp: Arc<dyn NetIf>, dlt: LinkType, hdrlen: usize) -> Self {
        Self { ifp, dlt, hdrlen, descs: KRwLock::new(vec![]) }
    }

    pub fn link_type(&self) -> LinkType {
        self.dlt
    }

    pub fn hdrlen(&self) -> usize {
        self.hdrlen
    }

    pub fn ifp(&self) -> &Arc<dyn NetIf> {
        &self.ifp
    }

    pub fn name(&self) -> &str {
        self.ifp.name()
    }

    /// Is any descriptor attached? A data path may use this to skip
    /// building a [`Packet`] at all.
    pub fn has_listeners(&self) -> bool {
        !self.descs.read().is_empty()
    }

    pub fn num_listeners(&self) -> usize {
        self.descs.read().len()
    }

    /// Deliver a contiguous packet.
    pub fn tap_bytes(&self, bytes: &[u8], dir: Direction) {
        self.deliver(&Packet::new(bytes, dir));
    }

    /// Deliver `pkt` with `hdr` synthesized in front of it.
    pub fn tap_with_header(&self, hdr: &[u8], pkt: &Packet) {
        let mut full = pkt.clone();
        full.prepend(hdr);
        self.deliver(&full);
    }

    pub(crate) fn attach(&self, d: Arc<Descriptor>) {
        self.descs.write().push(d);
    }

    pub(crate) fn detach(&self, id: DescriptorId) -> bool {
        let mut descs = self.descs.write();
        match descs.iter().position(|d| d.id() == id) {
            Some(idx) => {
                descs.swap_remove(idx);
                true
            }

            None => false,
        }
    }
}
