// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Routines for building and reading packet capture files.

use captap::api::RecordIter;
use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;

/// Build an in-memory pcap file from a series of frames or captured
/// records.
pub struct PcapBuilder {
    bytes: Vec<u8>,
}

impl PcapBuilder {
    pub fn new(snaplen: u32) -> Self {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen,
            network: Linktype::ETHERNET,
        };

        Self { bytes: hdr.to_vec().unwrap() }
    }

    /// Add a whole frame.
    pub fn add_frame(&mut self, ts_sec: u32, ts_usec: u32, frame: &[u8]) {
        self.add_block(ts_sec, ts_usec, frame.len() as u32, frame);
    }

    /// Add every record of a buffer returned by a read. Record
    /// timestamps are taken to be in microseconds.
    pub fn add_records(&mut self, buf: &[u8]) {
        for rec in RecordIter::new(buf) {
            self.add_block(
                rec.hdr.ts_sec as u32,
                rec.hdr.ts_frac as u32,
                rec.hdr.datalen,
                rec.data,
            );
        }
    }

    fn add_block(&mut self, ts_sec: u32, ts_usec: u32, len: u32, data: &[u8]) {
        let mut block = LegacyPcapBlock {
            ts_sec,
            ts_usec,
            caplen: data.len() as u32,
            origlen: len,
            data,
        };
        self.bytes.extend_from_slice(&block.to_vec().unwrap());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// The frames of a pcap file, as `(caplen, origlen, data)`.
pub fn frames(mut input: &[u8]) -> Vec<(u32, u32, Vec<u8>)> {
    let (rest, _hdr) = match pcap::parse_pcap_header(input) {
        Ok(v) => v,
        Err(e) => panic!("failed to get header: {e:?}"),
    };
    input = rest;

    let mut out = vec![];
    while !input.is_empty() {
        match pcap::parse_pcap_frame(input) {
            Ok((rest, block)) => {
                out.push((block.caplen, block.origlen, block.data.to_vec()));
                input = rest;
            }

            Err(e) => panic!("failed to get next block: {e:?}"),
        }
    }
    out
}
