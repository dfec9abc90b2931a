// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print descriptor state and captured records in a human-friendly
//! manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both captapadm and integration tests.

use crate::api::CaptureStats;
use crate::api::DescriptorInfo;
use crate::api::RecordIter;
use std::io::Write;
use tabwriter::TabWriter;

/// Print the descriptor table.
pub fn print_descriptors(descs: &[DescriptorInfo]) -> std::io::Result<()> {
    print_descriptors_into(&mut std::io::stdout(), descs)
}

/// Print the descriptor table into a given writer.
pub fn print_descriptors_into(
    writer: &mut impl Write,
    descs: &[DescriptorInfo],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(
        t,
        "ID\tPID\tIFACE\tDLT\tMODE\tBUFSIZE\tSLEN\tHLEN\tFLAGS\tDIR\tSIG\t\
         RECV\tDROP\tCAPT"
    )?;
    write_hr(&mut t)?;

    for d in descs {
        writeln!(
            t,
            "{:#x}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            d.id,
            d.pid,
            d.interface.as_deref().unwrap_or("-"),
            d.link_type.map(|l| l.to_string()).unwrap_or("-".to_string()),
            d.mode,
            d.bufsize,
            d.slen,
            d.hlen,
            flags(d),
            d.direction,
            d.sig,
            d.stats.received,
            d.stats.dropped,
            d.stats.captured,
        )?;
    }
    t.flush()
}

// One letter per flag, in the style of netstat -B.
fn flags(d: &DescriptorInfo) -> String {
    [
        (d.promisc, 'p'),
        (d.immediate, 'i'),
        (d.hdrcmplt, 'h'),
        (d.async_notify, 'a'),
        (d.feedback, 'f'),
        (d.locked, 'l'),
    ]
    .into_iter()
    .map(|(on, c)| if on { c } else { '-' })
    .collect()
}

/// Print a descriptor's counters.
pub fn print_stats(stats: &CaptureStats) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), stats)
}

/// Print a descriptor's counters into a given writer.
pub fn print_stats_into(
    writer: &mut impl Write,
    stats: &CaptureStats,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "received\t{}", stats.received)?;
    writeln!(t, "captured\t{}", stats.captured)?;
    writeln!(t, "dropped\t{}", stats.dropped)?;
    writeln!(t, "written\t{}", stats.written)?;
    writeln!(t, "write dropped\t{}", stats.write_dropped)?;
    writeln!(t, "write filtered\t{}", stats.write_filtered)?;
    writeln!(t, "zero-copy\t{}", stats.zcopy)?;
    t.flush()
}

/// Print the records of a buffer returned by a read.
pub fn print_records(buf: &[u8]) -> std::io::Result<()> {
    print_records_into(&mut std::io::stdout(), buf)
}

/// Print the records of a buffer into a given writer.
pub fn print_records_into(
    writer: &mut impl Write,
    buf: &[u8],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "SEC\tFRAC\tCAPLEN\tDATALEN\tHDRLEN\tDATA")?;
    write_hr(&mut t)?;

    for rec in RecordIter::new(buf) {
        let head: String = rec
            .data
            .iter()
            .take(16)
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}",
            rec.hdr.ts_sec,
            rec.hdr.ts_frac,
            rec.hdr.caplen,
            rec.hdr.datalen,
            rec.hdr.hdrlen,
            head,
        )?;
    }
    t.flush()
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::BpfXhdr;
    use crate::api::BufferMode;
    use crate::api::DirectionPolicy;
    use crate::api::LinkType;
    use crate::api::SIZEOF_BPF_XHDR;
    use crate::api::Timestamp;

    #[test]
    fn descriptor_table() {
        let info = DescriptorInfo {
            id: 1,
            pid: 42,
            interface: Some("sim0".to_string()),
            link_type: Some(LinkType::EN10MB),
            mode: BufferMode::Copying,
            bufsize: 4096,
            slen: 0,
            hlen: 0,
            immediate: true,
            promisc: true,
            hdrcmplt: false,
            feedback: false,
            locked: false,
            async_notify: false,
            direction: DirectionPolicy::InOut,
            sig: 23,
            stats: CaptureStats { received: 9, ..Default::default() },
        };

        let mut out = vec![];
        print_descriptors_into(&mut out, &[info]).unwrap();
        let out = String::from_utf8(out).unwrap();
        let row = out.lines().nth(2).unwrap();
        assert!(row.contains("sim0"));
        assert!(row.contains("EN10MB"));
        assert!(row.contains("pi----"));
    }

    #[test]
    fn records() {
        let mut buf = vec![0u8; 64];
        let hdr = BpfXhdr::new(Timestamp { sec: 3, frac: 7 }, 2, 60, 32);
        buf[..SIZEOF_BPF_XHDR].copy_from_slice(hdr.record_bytes());
        buf[32] = 0xab;
        buf[33] = 0xcd;

        let mut out = vec![];
        print_records_into(&mut out, &buf[..34]).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.lines().nth(2).unwrap().contains("ab cd"));
    }
}
