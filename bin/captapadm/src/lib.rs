// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Capture tap administration library.
//!
//! The engine lives in-process, so the tool drives it against a
//! pseudo interface: frames from a pcap file are replayed through the
//! interface and whatever a configured descriptor captures is
//! reported.

use anyhow::Context;
use anyhow::bail;
use captap::ExecCtx;
use captap::api::BpfXhdr;
use captap::api::CaptureError;
use captap::api::DirectionPolicy;
use captap::api::LinkType;
use captap::api::RecordIter;
use captap::api::TimestampPolicy;
use captap::engine::filter::Snaplen;
use captap::engine::ifnet::PseudoIf;
use captap::engine::registry::Registry;
use captap::engine::wait::PollEvents;
use captap::provider::LogLevel;
use captap::provider::LogProvider;
use captap::provider::SystemClock;
use captap_ioctl::CaptureHdl;
use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use slog::Drain;
use slog::Logger;
use slog::error;
use slog::info;
use slog::warn;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// The name of the pseudo interface frames are replayed through.
pub const REPLAY_IFACE: &str = "replay0";

/// Build the root logger: terminal output, filtered by `RUST_LOG`.
pub fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, slog::o!("component" => "captap"))
}

/// Route engine log messages to slog.
pub struct SlogLog(pub Logger);

impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => info!(self.0, "{}", msg),
            LogLevel::Warn => warn!(self.0, "{}", msg),
            LogLevel::Error => error!(self.0, "{}", msg),
        }
    }
}

/// A registry with the snap length filter engine and the system
/// clock, logging to `log`.
pub fn registry(log: &Logger) -> Arc<Registry> {
    Registry::new(ExecCtx {
        log: Box::new(SlogLog(log.clone())),
        clock: Box::new(SystemClock::new()),
        filter: Box::new(Snaplen),
    })
}

/// The handle used to administer one descriptor.
pub struct CaptapAdm(CaptureHdl);

impl Deref for CaptapAdm {
    type Target = CaptureHdl;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl CaptapAdm {
    pub fn open(reg: &Arc<Registry>) -> Result<Self, captap_ioctl::Error> {
        CaptureHdl::open(reg).map(Self)
    }

    pub fn into_inner(self) -> CaptureHdl {
        self.0
    }
}

/// How the replay descriptor is configured.
#[derive(Clone, Debug)]
pub struct ReplayCfg {
    pub bufsize: u32,
    pub snaplen: Option<u32>,
    pub timeout: Option<Duration>,
    pub immediate: bool,
    pub direction: DirectionPolicy,
    pub tstamp: TimestampPolicy,
    pub promisc: bool,
}

impl Default for ReplayCfg {
    fn default() -> Self {
        Self {
            bufsize: captap::api::DEFAULT_BUFSIZE,
            snaplen: None,
            timeout: None,
            immediate: true,
            direction: DirectionPolicy::InOut,
            tstamp: TimestampPolicy::default(),
            promisc: false,
        }
    }
}

/// What a replay produced.
#[derive(Debug, Default)]
pub struct ReplayResult {
    /// The concatenated contents of every successful read.
    pub records: Vec<u8>,
    pub reads: usize,
    pub stats: captap::api::CaptureStats,
    pub descriptors: Vec<captap::api::DescriptorInfo>,
}

/// Parse a pcap file into its frames.
pub fn pcap_frames(mut input: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
    let (rest, hdr) = pcap::parse_pcap_header(input)
        .map_err(|e| anyhow::anyhow!("bad pcap header: {e:?}"))?;
    if hdr.network != Linktype::ETHERNET {
        bail!("only Ethernet captures can be replayed: {:?}", hdr.network);
    }
    input = rest;

    let mut frames = vec![];
    while !input.is_empty() {
        let (rest, block) = pcap::parse_pcap_frame(input)
            .map_err(|e| anyhow::anyhow!("bad pcap frame: {e:?}"))?;
        frames.push(block.data.to_vec());
        input = rest;
    }
    Ok(frames)
}

/// Serialize the records of a read buffer as a pcap file.
pub fn records_to_pcap(
    records: &[u8],
    snaplen: u32,
) -> anyhow::Result<Vec<u8>> {
    let mut hdr = PcapHeader {
        magic_number: 0xa1b2c3d4,
        version_major: 2,
        version_minor: 4,
        thiszone: 0,
        sigfigs: 0,
        snaplen,
        network: Linktype::ETHERNET,
    };
    let mut out = hdr
        .to_vec()
        .map_err(|e| anyhow::anyhow!("pcap header: {e:?}"))?;

    for rec in RecordIter::new(records) {
        let hdr: &BpfXhdr = &rec.hdr;
        let mut block = LegacyPcapBlock {
            ts_sec: hdr.ts_sec as u32,
            ts_usec: hdr.ts_frac as u32,
            caplen: hdr.caplen,
            origlen: hdr.datalen,
            data: rec.data,
        };
        let bytes = block
            .to_vec()
            .map_err(|e| anyhow::anyhow!("pcap block: {e:?}"))?;
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

// Move whatever a nonblocking read returns out of the descriptor.
// With `ready_only`, stop as soon as a poll says nothing is ready.
fn drain_records(
    adm: &CaptapAdm,
    buf: &mut [u8],
    ready_only: bool,
    res: &mut ReplayResult,
) -> anyhow::Result<()> {
    loop {
        if ready_only && !adm.poll(PollEvents::IN).contains(PollEvents::IN) {
            return Ok(());
        }

        match adm.read(buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                res.records.extend_from_slice(&buf[..n]);
                res.reads += 1;
            }
            Err(e) if e.capture_error() == Some(&CaptureError::WouldBlock) => {
                return Ok(());
            }
            Err(e) => return Err(e).context("read"),
        }
    }
}

/// Replay `frames` inbound through a fresh pseudo interface and
/// collect what a descriptor configured by `cfg` captures.
pub fn replay(
    log: &Logger,
    cfg: &ReplayCfg,
    frames: &[Vec<u8>],
) -> anyhow::Result<ReplayResult> {
    let reg = registry(log);
    let ifp = PseudoIf::new(REPLAY_IFACE, 9000);
    ifp.attach(&reg, LinkType::EN10MB, 14)?;

    let adm = CaptapAdm::open(&reg)?;
    let bufsize = adm.set_buffer_len(cfg.bufsize)?;
    if let Some(snaplen) = cfg.snaplen {
        adm.set_read_filter(&Snaplen::program(snaplen))?;
    }
    adm.set_interface(REPLAY_IFACE)?;
    adm.set_immediate(cfg.immediate)?;
    adm.set_direction(cfg.direction)?;
    adm.set_timestamp_policy(cfg.tstamp)?;
    if let Some(t) = cfg.timeout {
        adm.set_read_timeout(t)?;
    }
    if cfg.promisc {
        adm.set_promiscuous()?;
    }
    adm.set_nonblocking(true)?;
    info!(log, "replaying"; "frames" => frames.len(), "bufsize" => bufsize);

    let mut buf = vec![0u8; bufsize as usize];
    let mut res = ReplayResult::default();
    for f in frames {
        ifp.receive(f);
        drain_records(&adm, &mut buf, true, &mut res)?;
    }

    // Whatever is left in the store buffer.
    drain_records(&adm, &mut buf, false, &mut res)?;

    res.stats = adm.stats()?;
    res.descriptors = reg.list_descriptors();
    adm.into_inner().close()?;
    ifp.detach(&reg)?;
    Ok(res)
}

#[cfg(test)]
mod test {
    use super::*;
    use captap_test_utils::pcap::PcapBuilder;
    use captap_test_utils::pkt::frame_of_len;

    fn quiet() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn replay_captures_every_frame() {
        let mut pb = PcapBuilder::new(1500);
        for len in [60, 200, 1000] {
            pb.add_frame(1, 0, &frame_of_len(len, 53));
        }
        let frames = pcap_frames(&pb.into_bytes()).unwrap();
        assert_eq!(frames.len(), 3);

        let cfg = ReplayCfg { snaplen: Some(96), ..Default::default() };
        let res = replay(&quiet(), &cfg, &frames).unwrap();
        let lens: Vec<_> = RecordIter::new(&res.records)
            .map(|r| (r.hdr.caplen, r.hdr.datalen))
            .collect();
        assert_eq!(lens, vec![(60, 60), (96, 200), (96, 1000)]);
        assert_eq!(res.stats.received, 3);
        assert_eq!(res.stats.captured, 3);
        assert_eq!(res.descriptors.len(), 1);
    }

    #[test]
    fn records_become_pcap() {
        let frames = vec![frame_of_len(120, 53)];
        let res = replay(&quiet(), &ReplayCfg::default(), &frames).unwrap();
        let out = records_to_pcap(&res.records, 65535).unwrap();
        let back = captap_test_utils::pcap::frames(&out);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].2, frames[0]);
    }

    #[test]
    fn outbound_only_sees_nothing() {
        let frames = vec![frame_of_len(64, 1)];
        let cfg =
            ReplayCfg { direction: DirectionPolicy::Out, ..Default::default() };
        let res = replay(&quiet(), &cfg, &frames).unwrap();
        assert!(res.records.is_empty());
        assert_eq!(res.stats.received, 0);
    }
}
