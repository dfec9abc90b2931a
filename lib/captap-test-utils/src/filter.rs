// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A small filter engine that matches IPv4 transport ports.
//!
//! Each instruction is eight bytes:
//!
//! ```text
//! [proto, 0, port (BE u16), snaplen (BE u32)]
//! ```
//!
//! An Ethernet frame carrying IPv4 with transport protocol `proto`
//! whose source or destination port is `port` matches, and
//! `min(snaplen, len)` bytes are captured. A `proto` of zero matches
//! any transport and ignores the port. The first matching instruction
//! wins; a frame no instruction matches is rejected.

use captap::api::INSN_SIZE;
use captap::engine::filter::FilterEngine;
use captap::engine::filter::FilterProgram;
use captap::engine::packet::Packet;
use smoltcp::wire::EthernetFrame;
use smoltcp::wire::EthernetProtocol;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::TcpPacket;
use smoltcp::wire::UdpPacket;

#[derive(Clone, Copy, Debug, Default)]
pub struct PortFilter;

impl PortFilter {
    pub fn insn(proto: IpProtocol, port: u16, snaplen: u32) -> [u8; 8] {
        let mut insn = [0u8; 8];
        insn[0] = u8::from(proto);
        insn[2..4].copy_from_slice(&port.to_be_bytes());
        insn[4..].copy_from_slice(&snaplen.to_be_bytes());
        insn
    }

    pub fn udp(port: u16, snaplen: u32) -> Vec<u8> {
        Self::insn(IpProtocol::Udp, port, snaplen).to_vec()
    }

    pub fn tcp(port: u16, snaplen: u32) -> Vec<u8> {
        Self::insn(IpProtocol::Tcp, port, snaplen).to_vec()
    }

    /// Accept every frame, capturing at most `snaplen` bytes.
    pub fn any(snaplen: u32) -> Vec<u8> {
        let mut insn = [0u8; 8];
        insn[4..].copy_from_slice(&snaplen.to_be_bytes());
        insn.to_vec()
    }

    /// Reject every frame.
    pub fn none() -> Vec<u8> {
        Self::any(0)
    }
}

// The transport protocol and ports of an Ethernet/IPv4 frame.
fn ports(frame: &[u8]) -> Option<(u8, u16, u16)> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    if eth.ethertype() != EthernetProtocol::Ipv4 {
        return None;
    }

    let ip = Ipv4Packet::new_checked(eth.payload()).ok()?;
    let proto = ip.next_header();
    let (src, dst) = match proto {
        IpProtocol::Udp => {
            let udp = UdpPacket::new_checked(ip.payload()).ok()?;
            (udp.src_port(), udp.dst_port())
        }

        IpProtocol::Tcp => {
            let tcp = TcpPacket::new_checked(ip.payload()).ok()?;
            (tcp.src_port(), tcp.dst_port())
        }

        _ => (0, 0),
    };

    Some((u8::from(proto), src, dst))
}

impl FilterEngine for PortFilter {
    fn validate(&self, program: &[u8]) -> Result<(), String> {
        for insn in program.chunks(INSN_SIZE) {
            if insn.len() != INSN_SIZE || insn[1] != 0 {
                return Err(format!("malformed instruction: {insn:02x?}"));
            }
        }
        Ok(())
    }

    fn evaluate(&self, program: &FilterProgram, pkt: &Packet) -> u32 {
        let bytes = pkt.pullup();
        let found = ports(&bytes);
        let len = pkt.len() as u32;

        for insn in program.bytes().chunks_exact(INSN_SIZE) {
            let proto = insn[0];
            let port = u16::from_be_bytes([insn[2], insn[3]]);
            let snaplen =
                u32::from_be_bytes([insn[4], insn[5], insn[6], insn[7]]);

            let hit = match found {
                _ if proto == 0 => true,
                Some((p, src, dst)) => {
                    p == proto && (src == port || dst == port)
                }
                None => false,
            };

            if hit {
                return snaplen.min(len);
            }
        }

        0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pkt;
    use captap::api::Direction;

    #[test]
    fn matches_port_and_snaps() {
        let udp = pkt::udp_frame(pkt::Endpoints::default(), 5353, 53, 158);
        let tcp = pkt::tcp_frame(pkt::Endpoints::default(), 4000, 80, 26);
        assert_eq!(udp.len(), 200);
        assert_eq!(tcp.len(), 80);

        let prog = FilterProgram::new(&PortFilter, &PortFilter::udp(53, 64))
            .unwrap()
            .unwrap();
        let eval = |f: &[u8]| {
            PortFilter.evaluate(&prog, &Packet::new(f, Direction::In))
        };
        assert_eq!(eval(&udp), 64);
        assert_eq!(eval(&tcp), 0);
        assert_eq!(eval(&[0u8; 10]), 0);
    }

    #[test]
    fn any_and_none() {
        let f = pkt::tcp_frame(pkt::Endpoints::default(), 1, 2, 0);
        let any = FilterProgram::new(&PortFilter, &PortFilter::any(1 << 20))
            .unwrap()
            .unwrap();
        let none = FilterProgram::new(&PortFilter, &PortFilter::none())
            .unwrap()
            .unwrap();
        let p = Packet::new(&f, Direction::Out);
        assert_eq!(PortFilter.evaluate(&any, &p), f.len() as u32);
        assert_eq!(PortFilter.evaluate(&none, &p), 0);
    }

    #[test]
    fn rejects_malformed() {
        assert!(PortFilter.validate(&[17, 1, 0, 53, 0, 0, 0, 64]).is_err());
        assert!(PortFilter.validate(&PortFilter::tcp(22, 96)).is_ok());
    }
}
