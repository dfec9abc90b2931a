// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use slog::info;

use captap::api::API_VERSION;
use captap::api::DEFAULT_BUFSIZE;
use captap::api::DirectionPolicy;
use captap::api::TimestampPolicy;
use captap::api::Version;
use captap::print::print_descriptors;
use captap::print::print_records;
use captap::print::print_stats;
use captapadm::ReplayCfg;

/// Administer the capture tap engine.
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Replay a pcap file through a pseudo interface and report what
    /// a capture descriptor sees.
    Replay {
        /// The Ethernet pcap file to replay.
        input: PathBuf,

        /// Write the captured records to this pcap file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The requested buffer size.
        #[arg(long, default_value_t = DEFAULT_BUFSIZE)]
        bufsize: u32,

        /// Capture at most this many bytes of each frame.
        #[arg(long)]
        snaplen: Option<u32>,

        /// The read timeout, in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Only hand over full buffers.
        #[arg(long)]
        batch: bool,

        /// Which traffic to see: in, out, or inout.
        #[arg(long, default_value_t = DirectionPolicy::InOut)]
        direction: DirectionPolicy,

        /// Timestamp policy, e.g. `micro`, `nano,monotonic`, `none`.
        #[arg(long, default_value = "micro")]
        tstamp: TimestampPolicy,

        /// Put the interface into promiscuous mode.
        #[arg(long)]
        promisc: bool,

        /// Print each record rather than just the counters.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the engine version.
    Version,
}

fn main() -> anyhow::Result<()> {
    let log = captapadm::logger();
    let cmd = Command::parse();

    match cmd {
        Command::Replay {
            input,
            output,
            bufsize,
            snaplen,
            timeout_ms,
            batch,
            direction,
            tstamp,
            promisc,
            verbose,
        } => {
            let bytes = std::fs::read(&input)?;
            let frames = captapadm::pcap_frames(&bytes)?;
            let cfg = ReplayCfg {
                bufsize,
                snaplen,
                timeout: timeout_ms.map(Duration::from_millis),
                immediate: !batch,
                direction,
                tstamp,
                promisc,
            };

            let res = captapadm::replay(&log, &cfg, &frames)?;
            info!(log, "replay done"; "reads" => res.reads);
            print_descriptors(&res.descriptors)?;
            println!();
            if verbose {
                print_records(&res.records)?;
                println!();
            }
            print_stats(&res.stats)?;

            if let Some(path) = output {
                let snap = snaplen.unwrap_or(u16::MAX as u32);
                let pcap = captapadm::records_to_pcap(&res.records, snap)?;
                std::fs::write(path, pcap)?;
            }
        }

        Command::Version => {
            println!("engine version: {}", Version::CURRENT);
            println!("API version: {API_VERSION}");
        }
    }

    Ok(())
}
