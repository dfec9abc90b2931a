// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests for the write path and the session lock.

use captap::engine::filter::FilterKind;
use captap_test_utils::pkt::frame_of_len;
use captap_test_utils::*;

fn records(d: &Descriptor) -> Vec<Vec<u8>> {
    d.set_nonblocking(true).unwrap();
    let buf = read_all(d);
    RecordIter::new(&buf).map(|r| r.data.to_vec()).collect()
}

#[test]
fn write_transmits_and_taps() {
    let reg = sim_registry();
    let ifp = sim_ether(&reg, "sim0");
    let d = open_bound(&reg, "sim0", 4096);

    let f = frame_of_len(120, 53);
    assert_eq!(d.write(&f), Ok(f.len()));
    assert_eq!(ifp.take_output(), vec![f.clone()]);

    // The writer sees its own frame leave.
    assert_eq!(records(&d), vec![f]);
    let stats = d.stats().unwrap();
    assert_eq!(stats.written, 1);
    assert_eq!(stats.write_dropped, 0);
}

#[test]
fn write_errors() {
    let reg = sim_registry();
    let ifp = sim_ether(&reg, "sim0");

    let unbound = reg.open().unwrap();
    assert_eq!(
        unbound.write(&frame_of_len(60, 1)),
        Err(CaptureError::NotConfigured)
    );

    let d = open_bound(&reg, "sim0", 4096);

    // Shorter than the link header.
    assert!(matches!(
        d.write(&[0u8; 10]),
        Err(CaptureError::MessageSize { .. })
    ));

    // Larger than the MTU plus the link header.
    assert!(matches!(
        d.write(&frame_of_len(1515, 1)),
        Err(CaptureError::MessageSize { len: 1515, max: 1514 })
    ));
    assert_eq!(d.write(&frame_of_len(1514, 1)), Ok(1514));

    ifp.set_up(false);
    assert!(matches!(
        d.write(&frame_of_len(60, 1)),
        Err(CaptureError::NetworkDown(_))
    ));
    ifp.set_up(true);

    let err = CaptureError::System { errno: 55, msg: "no buffers".into() };
    ifp.fail_output(Some(err.clone()));
    assert_eq!(d.write(&frame_of_len(60, 1)), Err(err));
    ifp.fail_output(None);

    // An empty write transmits nothing.
    assert_eq!(d.write(&[]), Ok(0));

    let stats = d.stats().unwrap();
    assert_eq!(stats.written, 6);
    assert_eq!(stats.write_dropped, 5);
    assert_eq!(ifp.take_output().len(), 1);
}

#[test]
fn write_filter_rejects() {
    let reg = sim_registry();
    let ifp = sim_ether(&reg, "sim0");
    let d = open_bound(&reg, "sim0", 4096);
    d.set_filter(FilterKind::Write, &PortFilter::udp(53, 1500), false)
        .unwrap();

    assert!(matches!(
        d.write(&frame_of_len(80, 80)),
        Err(CaptureError::PermissionDenied(_))
    ));
    assert_eq!(d.write(&frame_of_len(80, 53)), Ok(80));

    let stats = d.stats().unwrap();
    assert_eq!(stats.write_filtered, 1);
    assert_eq!(stats.write_dropped, 1);
    assert_eq!(ifp.take_output().len(), 1);
}

#[test]
fn feedback_loops_back_once() {
    let reg = sim_registry();
    let ifp = sim_ether(&reg, "sim0");
    let writer = open_bound(&reg, "sim0", 4096);
    let other = open_bound(&reg, "sim0", 4096);
    let peer = open_bound(&reg, "sim0", 4096);
    writer.set_feedback(true).unwrap();
    peer.set_feedback(true).unwrap();
    assert!(writer.feedback());

    let f = frame_of_len(90, 5);
    writer.write(&f).unwrap();

    let input = ifp.take_input();
    assert_eq!(input.len(), 1);
    assert_eq!(input[0].0, f);
    assert!(input[0].1.contains(PacketFlags::FEEDBACK));

    // The writer already saw the frame go out; the loop back is
    // suppressed for it but not for anyone else, even a descriptor
    // with feedback on itself.
    assert_eq!(records(&writer).len(), 1);
    assert_eq!(records(&other).len(), 2);
    assert_eq!(records(&peer), vec![f.clone(), f.clone()]);

    // An inbound-only writer does see the looped-back copy.
    writer.set_direction(DirectionPolicy::In).unwrap();
    writer.write(&f).unwrap();
    assert_eq!(records(&writer), vec![f]);
}

#[test]
fn pseudo_queues_keep_the_latest_frames() {
    let reg = sim_registry();
    let ifp = sim_ether(&reg, "sim0");
    let d = open_bound(&reg, "sim0", 4096);
    d.set_feedback(true).unwrap();

    let total = PSEUDO_QUEUE_LIMIT + 10;
    for i in 0..total {
        let mut f = frame_of_len(64, 5);
        f[60..64].copy_from_slice(&(i as u32).to_be_bytes());
        d.write(&f).unwrap();
    }

    let tag = |f: &[u8]| u32::from_be_bytes([f[60], f[61], f[62], f[63]]);
    let out = ifp.take_output();
    assert_eq!(out.len(), PSEUDO_QUEUE_LIMIT);
    assert_eq!(tag(&out[0]), 10);
    assert_eq!(tag(&out[PSEUDO_QUEUE_LIMIT - 1]), total as u32 - 1);

    let input = ifp.take_input();
    assert_eq!(input.len(), PSEUDO_QUEUE_LIMIT);
    assert_eq!(tag(&input[0].0), 10);

    // Draining empties both queues.
    assert!(ifp.take_output().is_empty());
    assert!(ifp.take_input().is_empty());
    assert_eq!(d.stats().unwrap().written, total as u64);
}

#[test]
fn locked_descriptor_allow_list() {
    let reg = sim_registry();
    let ifp = sim_ether(&reg, "sim0");
    let d = open_bound(&reg, "sim0", 4096);
    d.lock().unwrap();
    assert!(d.is_locked());

    let denied = |r: Result<(), CaptureError>| {
        assert!(matches!(r, Err(CaptureError::PermissionDenied(_))), "{r:?}");
    };
    denied(d.set_filter(FilterKind::Read, &PortFilter::any(64), true));
    denied(d.set_filter(FilterKind::Write, &[], false));
    denied(d.set_direction(DirectionPolicy::In));
    denied(d.set_header_complete(true));
    denied(d.set_buffer_mode(BufferMode::ZeroCopy));
    denied(reg.bind(&d, "sim0"));
    assert!(matches!(
        d.set_buffer_len(8192),
        Err(CaptureError::PermissionDenied(_))
    ));

    // Reading state and tuning how records are read remain possible.
    d.set_immediate(true).unwrap();
    d.set_read_timeout(ReadTimeout::default()).unwrap();
    d.set_timestamp_policy(T_NANOTIME).unwrap();
    d.set_nonblocking(true).unwrap();
    d.set_async_notify(true).unwrap();
    d.set_feedback(false).unwrap();
    d.flush().unwrap();
    d.set_promiscuous().unwrap();
    d.lock().unwrap();
    assert_eq!(d.buffer_len().unwrap(), 4096);
    assert_eq!(d.interface_name().unwrap(), "sim0");
    assert_eq!(d.direction().unwrap(), DirectionPolicy::InOut);

    // The data path is unaffected.
    ifp.receive(&frame_of_len(60, 1));
    assert_eq!(records(&d).len(), 1);
    assert_eq!(d.write(&frame_of_len(60, 1)), Ok(60));
}
