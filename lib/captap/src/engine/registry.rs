// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The registry: every tap, descriptor, and zero-copy region known to
//! one instance of the engine.
//!
//! # Locking
//!
//! Locks are always taken in this order:
//!
//! 1. the registry's interface table (`ifaces`),
//! 2. a tap's descriptor list,
//! 3. a descriptor's state.
//!
//! The descriptor arena and the region table are leaves: nothing else
//! is acquired while holding them. The interface table serializes
//! every bind, detach, close, and link type change, so at most one
//! attachment change is in flight at a time.

use super::descriptor::Descriptor;
use super::ifnet::NetIf;
use super::tap::Tap;
use super::zerocopy::ZeroCopyRegion;
use crate::ExecCtx;
use crate::api::BufferMode;
use crate::api::CaptureCmd;
use crate::api::CaptureError;
use crate::api::CmdIoctl;
use crate::api::DescriptorInfo;
use crate::api::LinkType;
use crate::api::ZeroCopyRegionsReq;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KRwLock;
use crate::ddi::sync::KRwLockWriteGuard;
use crate::provider::LogLevel;
use core::fmt;
use core::fmt::Display;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A handle to an open descriptor: a slot in the registry's arena
/// plus the generation of that slot, so a stale handle to a reused
/// slot is detected.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DescriptorId {
    index: u32,
    generation: u32,
}

impl DescriptorId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The handle as carried in a [`DescriptorInfo`].
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_u64(raw: u64) -> Self {
        Self { index: raw as u32, generation: (raw >> 32) as u32 }
    }
}

impl Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "bpf{}.{}", self.index, self.generation)
    }
}

enum Slot {
    Occupied { generation: u32, desc: Arc<Descriptor> },
    Vacant { generation: u32 },
}

impl Slot {
    fn generation(&self) -> u32 {
        match self {
            Self::Occupied { generation, .. } | Self::Vacant { generation } => {
                *generation
            }
        }
    }

    fn holds(&self, id: DescriptorId) -> bool {
        matches!(self, Self::Occupied { .. })
            && self.generation() == id.generation
    }
}

/// A generational slab of open descriptors.
#[derive(Default)]
struct DescriptorTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl DescriptorTable {
    /// Reserve a slot, returning the id the descriptor will carry.
    fn reserve(&mut self) -> DescriptorId {
        match self.free.pop() {
            Some(index) => {
                let slot = &self.slots[index as usize];
                DescriptorId::new(index, slot.generation().wrapping_add(1))
            }

            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Vacant { generation: 0 });
                DescriptorId::new(index, 1)
            }
        }
    }

    fn fill(&mut self, id: DescriptorId, desc: Arc<Descriptor>) {
        let generation = id.generation;
        self.slots[id.index as usize] = Slot::Occupied { generation, desc };
    }

    /// Give back a reserved slot that was never filled.
    fn unreserve(&mut self, id: DescriptorId) {
        let generation = id.generation;
        self.slots[id.index as usize] = Slot::Vacant { generation };
        self.free.push(id.index);
    }

    fn get(&self, id: DescriptorId) -> Option<&Arc<Descriptor>> {
        let slot = self.slots.get(id.index as usize)?;
        match slot {
            Slot::Occupied { desc, .. } if slot.holds(id) => Some(desc),
            _ => None,
        }
    }

    fn remove(&mut self, id: DescriptorId) -> Option<Arc<Descriptor>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if !slot.holds(id) {
            return None;
        }

        let vacant = Slot::Vacant { generation: id.generation };
        let old = core::mem::replace(slot, vacant);
        self.free.push(id.index);
        match old {
            Slot::Occupied { desc, .. } => Some(desc),
            Slot::Vacant { .. } => None,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<Descriptor>> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied { desc, .. } => Some(desc),
            Slot::Vacant { .. } => None,
        })
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

struct IfaceTable {
    taps: Vec<Arc<Tap>>,
    attached: usize,
}

impl IfaceTable {
    /// The first tap registered for `name` is its primary tap.
    fn primary(&self, name: &str) -> Option<&Arc<Tap>> {
        self.taps.iter().find(|t| t.name() == name)
    }

    fn find(&self, name: &str, dlt: LinkType) -> Option<&Arc<Tap>> {
        self.taps.iter().find(|t| t.name() == name && t.link_type() == dlt)
    }
}

#[derive(Default)]
struct RegionTable {
    next_id: u64,
    regions: BTreeMap<u64, Arc<ZeroCopyRegion>>,
}

/// The explicit owner of all engine state.
pub struct Registry {
    ctx: Arc<ExecCtx>,
    ifaces: KRwLock<IfaceTable>,
    descs: KMutex<DescriptorTable>,
    regions: KMutex<RegionTable>,
}

impl Registry {
    pub fn new(ctx: ExecCtx) -> Arc<Self> {
        Arc::new(Self {
            ctx: Arc::new(ctx),
            ifaces: KRwLock::new(IfaceTable { taps: vec![], attached: 0 }),
            descs: KMutex::new(DescriptorTable::default()),
            regions: KMutex::new(RegionTable::default()),
        })
    }

    pub fn ctx(&self) -> &ExecCtx {
        &self.ctx
    }

    /// Open a new, unbound descriptor.
    pub fn open(&self) -> Result<Arc<Descriptor>, CaptureError> {
        let id = self.descs.lock().reserve();
        match Descriptor::new(id, self.ctx.clone()) {
            Ok(d) => {
                self.descs.lock().fill(id, d.clone());
                Ok(d)
            }

            Err(e) => {
                self.descs.lock().unreserve(id);
                Err(e)
            }
        }
    }

    pub fn descriptor(
        &self,
        id: DescriptorId,
    ) -> Result<Arc<Descriptor>, CaptureError> {
        self.descs
            .lock()
            .get(id)
            .cloned()
            .ok_or(CaptureError::BadDescriptor(id.as_u64()))
    }

    /// Close a descriptor: wake its waiters with
    /// [`CaptureError::Closed`], detach it, and release its buffers.
    pub fn close(&self, id: DescriptorId) -> Result<(), CaptureError> {
        let d = self
            .descs
            .lock()
            .remove(id)
            .ok_or(CaptureError::BadDescriptor(id.as_u64()))?;

        d.shutdown();
        let mut ifaces = self.ifaces.write();
        self.detach_locked(&mut ifaces, &d, false);
        Ok(())
    }

    /// Register a tap for `ifp` presenting link type `dlt`.
    pub fn attach_interface(
        &self,
        ifp: Arc<dyn NetIf>,
        dlt: LinkType,
        hdrlen: usize,
    ) -> Result<Arc<Tap>, CaptureError> {
        let mut ifaces = self.ifaces.write();
        if ifaces.find(ifp.name(), dlt).is_some() {
            return Err(CaptureError::Busy(format!(
                "{} already has a {dlt} tap",
                ifp.name()
            )));
        }

        let tap = Arc::new(Tap::new(ifp, dlt, hdrlen));
        ifaces.taps.push(tap.clone());
        let msg = format!("{} attached {dlt}, hdrlen {hdrlen}", tap.name());
        self.ctx.log.log(LogLevel::Note, &msg);
        Ok(tap)
    }

    /// Remove every tap of interface `name`, detaching and waking
    /// their descriptors. Return the number of taps removed.
    pub fn detach_interface(&self, name: &str) -> Result<usize, CaptureError> {
        let mut ifaces = self.ifaces.write();
        let (gone, keep): (Vec<_>, Vec<_>) =
            ifaces.taps.drain(..).partition(|t| t.name() == name);
        ifaces.taps = keep;

        if gone.is_empty() {
            return Err(CaptureError::NoSuchDevice(name.to_string()));
        }

        for tap in gone.iter() {
            let descs: Vec<_> = tap.descs.read().clone();
            for d in descs {
                let msg = format!(
                    "{}: forced detach from {name} {}",
                    d.id(),
                    tap.link_type()
                );
                self.ctx.log.log(LogLevel::Warn, &msg);
                self.detach_locked(&mut ifaces, &d, true);
            }
        }

        let msg = format!("{name} detached, {} taps", gone.len());
        self.ctx.log.log(LogLevel::Note, &msg);
        Ok(gone.len())
    }

    /// Bind `d` to the primary tap of interface `name`.
    pub fn bind(
        &self,
        d: &Arc<Descriptor>,
        name: &str,
    ) -> Result<(), CaptureError> {
        let mut ifaces = self.ifaces.write();

        let (tap, was_bound) = {
            let mut st = d.lock_for(CaptureCmd::SetInterface)?;
            let tap = ifaces
                .primary(name)
                .cloned()
                .ok_or_else(|| CaptureError::NoSuchDevice(name.to_string()))?;

            match st.bufmode {
                BufferMode::Copying => st.alloc_copy_buffers(),
                BufferMode::ZeroCopy if st.bufs.is_none() => {
                    return Err(CaptureError::InvalidArgument(
                        "zero-copy regions not set".to_string(),
                    ));
                }
                BufferMode::ZeroCopy => (),
            }

            let same =
                st.tap.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, &tap));
            if same {
                st.reset();
                st.reset_wait();
                d.cv.notify_all();
                return Ok(());
            }

            (tap, st.tap.is_some())
        };

        if was_bound {
            self.detach_locked(&mut ifaces, d, false);
        }

        self.attach_locked(&mut ifaces, d, &tap);
        Ok(())
    }

    fn attach_locked(
        &self,
        ifaces: &mut KRwLockWriteGuard<'_, IfaceTable>,
        d: &Arc<Descriptor>,
        tap: &Arc<Tap>,
    ) {
        tap.attach(d.clone());
        let mut st = d.state.lock();
        st.tap = Some(tap.clone());
        st.reset();
        // A reader blocked across the rebind re-arms its timeout for
        // the new session.
        st.reset_wait();
        d.cv.notify_all();
        ifaces.attached += 1;
    }

    /// Detach `d` from its tap, if any. A `gone` detach is one forced
    /// by the interface going away: the descriptor is woken and its
    /// promiscuous reference is not handed back.
    fn detach_locked(
        &self,
        ifaces: &mut KRwLockWriteGuard<'_, IfaceTable>,
        d: &Arc<Descriptor>,
        gone: bool,
    ) {
        let Some(tap) = d.state.lock().tap.clone() else {
            return;
        };

        tap.detach(d.id());

        let promisc = {
            let mut st = d.state.lock();
            st.tap = None;
            let promisc = core::mem::take(&mut st.promisc);
            if gone {
                d.wakeup_locked(&mut st);
            }
            promisc
        };

        ifaces.attached = ifaces.attached.saturating_sub(1);

        if promisc && !gone {
            match tap.ifp().set_promisc(false) {
                Ok(()) => (),
                Err(CaptureError::NoSuchDevice(_))
                | Err(CaptureError::NotConfigured) => (),
                Err(e) => {
                    let msg = format!(
                        "{}: failed to drop promiscuous mode on {}: {e}",
                        d.id(),
                        tap.name()
                    );
                    self.ctx.log.log(LogLevel::Warn, &msg);
                }
            }
        }
    }

    /// Move `d` to the tap of its interface presenting `dlt`.
    pub fn set_link_type(
        &self,
        d: &Arc<Descriptor>,
        dlt: LinkType,
    ) -> Result<(), CaptureError> {
        let mut ifaces = self.ifaces.write();

        let (new, promisc) = {
            let st = d.lock_for(CaptureCmd::SetLinkType)?;
            let Some(cur) = st.tap.as_ref() else {
                return Err(CaptureError::InvalidArgument(
                    "descriptor is not bound".to_string(),
                ));
            };

            if cur.link_type() == dlt {
                return Ok(());
            }

            let new = ifaces.find(cur.name(), dlt).cloned().ok_or_else(|| {
                CaptureError::InvalidArgument(format!(
                    "{} has no {dlt} tap",
                    cur.name()
                ))
            })?;
            (new, st.promisc)
        };

        self.detach_locked(&mut ifaces, d, false);
        self.attach_locked(&mut ifaces, d, &new);

        if promisc {
            match new.ifp().set_promisc(true) {
                Ok(()) => d.state.lock().promisc = true,
                Err(e) => {
                    let msg = format!(
                        "{}: failed to restore promiscuous mode on {}: {e}",
                        d.id(),
                        new.name()
                    );
                    self.ctx.log.log(LogLevel::Warn, &msg);
                }
            }
        }

        Ok(())
    }

    /// Every link type offered by the interface `d` is bound to, in
    /// registration order. `max` is the caller's capacity.
    pub fn link_types(
        &self,
        d: &Arc<Descriptor>,
        max: usize,
    ) -> Result<Vec<LinkType>, CaptureError> {
        let ifaces = self.ifaces.read();
        let name = {
            let st = d.lock_for(CaptureCmd::GetLinkTypeList)?;
            match st.tap.as_ref() {
                Some(tap) => tap.name().to_string(),
                None => {
                    return Err(CaptureError::InvalidArgument(
                        "descriptor is not bound".to_string(),
                    ));
                }
            }
        };

        let dlts: Vec<_> = ifaces
            .taps
            .iter()
            .filter(|t| t.name() == name)
            .map(|t| t.link_type())
            .collect();

        if max < dlts.len() {
            return Err(CaptureError::ResultTooLarge {
                needed: dlts.len(),
                given: max,
            });
        }

        Ok(dlts)
    }

    /// One summary per open descriptor, in arena order.
    pub fn list_descriptors(&self) -> Vec<DescriptorInfo> {
        let descs: Vec<_> = self.descs.lock().iter().cloned().collect();
        descs.iter().map(|d| d.info()).collect()
    }

    pub fn num_descriptors(&self) -> usize {
        self.descs.lock().len()
    }

    /// The number of descriptors attached to any tap.
    pub fn attached_count(&self) -> usize {
        self.ifaces.read().attached
    }

    pub fn interfaces(&self) -> Vec<(String, LinkType)> {
        self.ifaces
            .read()
            .taps
            .iter()
            .map(|t| (t.name().to_string(), t.link_type()))
            .collect()
    }

    /// Create a zero-copy region of `len` bytes, header included.
    pub fn map_region(
        &self,
        len: usize,
    ) -> Result<Arc<ZeroCopyRegion>, CaptureError> {
        let mut rt = self.regions.lock();
        let id = rt.next_id;
        let region = Arc::new(ZeroCopyRegion::new(id, len)?);
        rt.next_id += 1;
        rt.regions.insert(id, region.clone());
        Ok(region)
    }

    /// Forget a region. Descriptors using it keep it alive until they
    /// are closed.
    pub fn unmap_region(&self, id: u64) -> bool {
        self.regions.lock().regions.remove(&id).is_some()
    }

    pub fn region(&self, id: u64) -> Option<Arc<ZeroCopyRegion>> {
        self.regions.lock().regions.get(&id).cloned()
    }

    /// Hand `d` the regions named by `req`.
    pub fn set_zerocopy_regions(
        &self,
        d: &Descriptor,
        req: &ZeroCopyRegionsReq,
    ) -> Result<(), CaptureError> {
        let lookup = |id| {
            self.region(id).ok_or_else(|| {
                CaptureError::InvalidArgument(format!("no such region: {id}"))
            })
        };
        let a = lookup(req.region_a)?;
        let b = lookup(req.region_b)?;
        d.set_zerocopy_regions(a, b, req.len as usize)
    }

    /// Run a serialized command against descriptor `id`, returning the
    /// serialized response.
    pub fn ioctl(
        &self,
        id: DescriptorId,
        ioc: &CmdIoctl,
    ) -> Result<Vec<u8>, CaptureError> {
        let d = self.descriptor(id)?;
        super::ioctl::dispatch(self, &d, ioc)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn id_round_trip() {
        let id = DescriptorId::new(7, 3);
        assert_eq!(DescriptorId::from_u64(id.as_u64()), id);
        assert_eq!(id.to_string(), "bpf7.3");
    }

    #[test]
    fn table_generations() {
        let mut t = DescriptorTable::default();
        let a = t.reserve();
        assert_eq!(a, DescriptorId::new(0, 1));
        t.unreserve(a);
        assert_eq!(t.len(), 0);

        let b = t.reserve();
        assert_eq!(b, DescriptorId::new(0, 2));
        assert!(t.get(a).is_none());
        assert!(t.remove(a).is_none());

        let c = t.reserve();
        assert_eq!(c.index(), 1);
    }
}
