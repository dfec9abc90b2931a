// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Routines for building Ethernet/IPv4 test frames.

use smoltcp::phy::ChecksumCapabilities as CsumCapab;
use smoltcp::wire::EthernetAddress;
use smoltcp::wire::EthernetFrame;
use smoltcp::wire::EthernetProtocol;
use smoltcp::wire::EthernetRepr;
use smoltcp::wire::IpAddress;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Address;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::Ipv4Repr;
use smoltcp::wire::TcpPacket;
use smoltcp::wire::TcpSeqNumber;
use smoltcp::wire::UdpPacket;
use smoltcp::wire::UdpRepr;

pub const ETHER_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;
pub const UDP_HDR_LEN: usize = 8;
pub const TCP_HDR_LEN: usize = 20;

/// The link and network addresses of a frame.
#[derive(Clone, Copy, Debug)]
pub struct Endpoints {
    pub eth_src: EthernetAddress,
    pub eth_dst: EthernetAddress,
    pub ip_src: Ipv4Address,
    pub ip_dst: Ipv4Address,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            eth_src: EthernetAddress([0xa8, 0x40, 0x25, 0x00, 0x00, 0x01]),
            eth_dst: EthernetAddress([0xa8, 0x40, 0x25, 0x00, 0x00, 0x02]),
            ip_src: Ipv4Address::new(10, 0, 0, 1),
            ip_dst: Ipv4Address::new(10, 0, 0, 2),
        }
    }
}

// Emit the Ethernet and IPv4 headers for a transport segment of
// `l4_len` bytes, returning the frame.
fn frame(ep: Endpoints, proto: IpProtocol, l4_len: usize) -> Vec<u8> {
    let l3_off = ETHER_HDR_LEN;
    let mut buf = vec![0u8; l3_off + IPV4_HDR_LEN + l4_len];

    let eth = EthernetRepr {
        src_addr: ep.eth_src,
        dst_addr: ep.eth_dst,
        ethertype: EthernetProtocol::Ipv4,
    };
    eth.emit(&mut EthernetFrame::new_unchecked(&mut buf[..]));

    let ip = Ipv4Repr {
        src_addr: ep.ip_src,
        dst_addr: ep.ip_dst,
        next_header: proto,
        payload_len: l4_len,
        hop_limit: 64,
    };
    ip.emit(
        &mut Ipv4Packet::new_unchecked(&mut buf[l3_off..]),
        &CsumCapab::default(),
    );
    buf
}

// A recognizable payload.
fn body(len: usize) -> impl Iterator<Item = u8> {
    (0..len).map(|i| (i % 251) as u8)
}

/// A UDP datagram in an Ethernet frame, carrying `body_len` bytes.
pub fn udp_frame(
    ep: Endpoints,
    sport: u16,
    dport: u16,
    body_len: usize,
) -> Vec<u8> {
    let l4_len = UDP_HDR_LEN + body_len;
    let mut buf = frame(ep, IpProtocol::Udp, l4_len);
    let l4_off = ETHER_HDR_LEN + IPV4_HDR_LEN;

    let udp = UdpRepr { src_port: sport, dst_port: dport };
    udp.emit(
        &mut UdpPacket::new_unchecked(&mut buf[l4_off..]),
        &IpAddress::from(ep.ip_src),
        &IpAddress::from(ep.ip_dst),
        body_len,
        |payload| {
            for (dst, b) in payload.iter_mut().zip(body(body_len)) {
                *dst = b;
            }
        },
        &CsumCapab::default(),
    );
    buf
}

/// A TCP segment (ACK|PSH) in an Ethernet frame, carrying `body_len`
/// bytes.
pub fn tcp_frame(
    ep: Endpoints,
    sport: u16,
    dport: u16,
    body_len: usize,
) -> Vec<u8> {
    let l4_len = TCP_HDR_LEN + body_len;
    let mut buf = frame(ep, IpProtocol::Tcp, l4_len);
    let l4_off = ETHER_HDR_LEN + IPV4_HDR_LEN;

    let mut tcp = TcpPacket::new_unchecked(&mut buf[l4_off..]);
    tcp.set_src_port(sport);
    tcp.set_dst_port(dport);
    tcp.set_seq_number(TcpSeqNumber(1));
    tcp.set_ack_number(TcpSeqNumber(1));
    tcp.set_header_len(TCP_HDR_LEN as u8);
    tcp.clear_flags();
    tcp.set_ack(true);
    tcp.set_psh(true);
    tcp.set_window_len(64240);
    for (dst, b) in tcp.payload_mut().iter_mut().zip(body(body_len)) {
        *dst = b;
    }
    tcp.fill_checksum(&IpAddress::from(ep.ip_src), &IpAddress::from(ep.ip_dst));
    buf
}

/// A frame of exactly `len` bytes: a UDP datagram when there is room
/// for one, otherwise a run of patterned bytes.
pub fn frame_of_len(len: usize, dport: u16) -> Vec<u8> {
    let hdrs = ETHER_HDR_LEN + IPV4_HDR_LEN + UDP_HDR_LEN;
    if len >= hdrs {
        udp_frame(Endpoints::default(), 40000, dport, len - hdrs)
    } else {
        body(len).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn udp_parses_back() {
        let f = udp_frame(Endpoints::default(), 5353, 53, 158);
        let eth = EthernetFrame::new_checked(&f[..]).unwrap();
        let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
        assert!(ip.verify_checksum());
        assert_eq!(ip.next_header(), IpProtocol::Udp);
        let udp = UdpPacket::new_checked(ip.payload()).unwrap();
        assert_eq!(udp.dst_port(), 53);
        assert_eq!(udp.payload().len(), 158);
    }

    #[test]
    fn tcp_parses_back() {
        let ep = Endpoints::default();
        let f = tcp_frame(ep, 4000, 80, 26);
        let eth = EthernetFrame::new_checked(&f[..]).unwrap();
        let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
        let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
        assert_eq!(tcp.dst_port(), 80);
        assert!(tcp.ack() && tcp.psh());
        assert!(tcp.verify_checksum(
            &IpAddress::from(ep.ip_src),
            &IpAddress::from(ep.ip_dst)
        ));
    }

    #[test]
    fn exact_lengths() {
        assert_eq!(frame_of_len(100, 9).len(), 100);
        assert_eq!(frame_of_len(20, 9).len(), 20);
    }
}
