// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests for zero-copy buffer hand-off.

use captap::engine::zerocopy::ZeroCopyRegion;
use captap_test_utils::pkt::frame_of_len;
use captap_test_utils::*;

struct ZcSession {
    reg: Arc<Registry>,
    ifp: Arc<PseudoIf>,
    d: Arc<Descriptor>,
    a: Arc<ZeroCopyRegion>,
    b: Arc<ZeroCopyRegion>,
}

fn zc_session() -> ZcSession {
    let reg = sim_registry();
    let ifp = sim_ether(&reg, "sim0");
    let a = reg.map_region(PAGE_SIZE).unwrap();
    let b = reg.map_region(PAGE_SIZE).unwrap();

    let d = reg.open().unwrap();
    d.set_buffer_mode(BufferMode::ZeroCopy).unwrap();
    let req = ZeroCopyRegionsReq {
        region_a: a.id(),
        region_b: b.id(),
        len: PAGE_SIZE as u64,
    };
    reg.set_zerocopy_regions(&d, &req).unwrap();
    reg.bind(&d, "sim0").unwrap();
    ZcSession { reg, ifp, d, a, b }
}

fn count(records: &[u8]) -> usize {
    RecordIter::new(records).count()
}

#[test]
fn setup_rules() {
    let reg = sim_registry();
    let _ifp = sim_ether(&reg, "sim0");
    let d = reg.open().unwrap();

    // Copy mode knows nothing of regions.
    assert!(matches!(
        d.zerocopy_max_size(),
        Err(CaptureError::NotSupported(_))
    ));

    d.set_buffer_mode(BufferMode::ZeroCopy).unwrap();
    assert_eq!(d.zerocopy_max_size().unwrap(), ZBUF_MAX_SIZE as u64);
    assert!(matches!(
        d.set_buffer_len(8192),
        Err(CaptureError::NotSupported(_))
    ));
    assert!(matches!(
        reg.bind(&d, "sim0"),
        Err(CaptureError::InvalidArgument(_))
    ));
    assert!(reg.map_region(100).is_err());

    let a = reg.map_region(PAGE_SIZE).unwrap();
    let req = |b: u64| ZeroCopyRegionsReq {
        region_a: a.id(),
        region_b: b,
        len: PAGE_SIZE as u64,
    };
    assert!(reg.set_zerocopy_regions(&d, &req(a.id())).is_err());
    assert!(reg.set_zerocopy_regions(&d, &req(999)).is_err());

    let b = reg.map_region(PAGE_SIZE).unwrap();
    reg.set_zerocopy_regions(&d, &req(b.id())).unwrap();
    assert!(matches!(
        d.set_buffer_mode(BufferMode::Copying),
        Err(CaptureError::Busy(_))
    ));

    reg.bind(&d, "sim0").unwrap();
    let bufsize = PAGE_SIZE - ZBUF_HEADER_LEN;
    assert_eq!(d.buffer_len().unwrap() as usize, bufsize);

    let mut buf = vec![0u8; bufsize];
    assert!(matches!(
        d.read(&mut buf),
        Err(CaptureError::NotSupported(_))
    ));

    // The descriptor keeps unmapped regions alive.
    assert!(reg.unmap_region(a.id()));
    assert!(reg.region(a.id()).is_none());
    assert_eq!(d.info().mode, BufferMode::ZeroCopy);
}

#[test]
fn ownership_follows_generations() {
    let s = zc_session();
    s.ifp.receive(&frame_of_len(100, 1));
    s.ifp.receive(&frame_of_len(100, 2));
    assert!(!s.a.user_owns());
    assert!(s.a.read().is_none());

    // Rotation assigns the store to the consumer.
    let r = s.d.rotate_zerocopy_buffer().unwrap();
    assert_eq!(r.region, Some(s.a.id()));
    assert!(s.a.user_owns());
    assert_eq!(s.a.header().kernel_len, r.len);
    assert_eq!(count(&s.a.read().unwrap()), 2);

    // Until the consumer acknowledges, there is nothing more to hand
    // over.
    s.ifp.receive(&frame_of_len(100, 3));
    let r = s.d.rotate_zerocopy_buffer().unwrap();
    assert_eq!(r, RotateZeroCopyResp { region: None, len: 0 });
    assert!(s.d.poll(PollEvents::IN).contains(PollEvents::IN));

    s.a.acknowledge();
    assert!(!s.a.user_owns());
    let r = s.d.rotate_zerocopy_buffer().unwrap();
    assert_eq!(r.region, Some(s.b.id()));
    assert!(s.b.user_owns());
    assert_eq!(count(&s.b.read().unwrap()), 1);

    assert_eq!(s.d.stats().unwrap().zcopy, 3);
}

#[test]
fn full_store_goes_to_consumer_in_place() {
    let s = zc_session();
    s.d.set_immediate(true).unwrap();

    // Three 1000 byte frames fill a region; the fourth rotates.
    for i in 0..4 {
        s.ifp.receive(&frame_of_len(1000, i));
    }
    assert!(s.a.user_owns());
    assert_eq!(count(&s.a.read().unwrap()), 3);
    assert!(!s.b.user_owns());

    // With a still held, filling b hands it over where it stands and
    // later packets are dropped.
    for i in 4..8 {
        s.ifp.receive(&frame_of_len(1000, i));
    }
    assert!(s.b.user_owns());
    assert_eq!(count(&s.b.read().unwrap()), 3);

    let stats = s.d.stats().unwrap();
    assert_eq!(stats.captured, 8);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.zcopy, 6);

    // Nothing is written into a region while the consumer owns it.
    let before = s.b.read().unwrap();
    s.ifp.receive(&frame_of_len(60, 9));
    assert_eq!(s.b.read().unwrap(), before);

    s.reg.close(s.d.id()).unwrap();
}
