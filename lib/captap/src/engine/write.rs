// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Injecting frames through a descriptor.

use super::descriptor::DescState;
use super::descriptor::Descriptor;
use super::filter::FilterKind;
use super::ifnet::AddrFamily;
use super::ifnet::LinkAddr;
use super::ifnet::NetIf;
use super::packet::Packet;
use super::packet::PacketFlags;
use crate::api::CaptureError;
use crate::api::Direction;
use crate::api::LinkType;
use std::sync::Arc;

/// The longest link header an 802.11 radio frame may carry.
const IEEE80211_MAX_HDRLEN: usize = 14;

/// Split the link header off the front of `payload`: the address
/// family and the number of header bytes for `dlt`.
pub fn link_addr(
    dlt: LinkType,
    payload: &[u8],
) -> Result<(LinkAddr, usize), CaptureError> {
    let (family, hlen) = match dlt {
        LinkType::SLIP => (AddrFamily::Inet, 0),
        LinkType::EN10MB => (AddrFamily::Unspec, 14),
        LinkType::FDDI => (AddrFamily::ImpLink, 0),
        LinkType::RAW => (AddrFamily::Unspec, 0),
        LinkType::NULL => (AddrFamily::Unspec, 4),
        LinkType::ATM_RFC1483 => (AddrFamily::Unspec, 12),
        LinkType::PPP => (AddrFamily::Unspec, 4),
        LinkType::IEEE802_11_RADIO => {
            let hlen = match payload.get(1) {
                Some(&b) => usize::from(b),
                None => {
                    return Err(CaptureError::MessageSize {
                        len: payload.len(),
                        max: 0,
                    });
                }
            };

            if hlen > IEEE80211_MAX_HDRLEN {
                return Err(CaptureError::InvalidArgument(format!(
                    "radio header of {hlen} bytes"
                )));
            }

            (AddrFamily::Ieee80211, hlen)
        }

        other => {
            return Err(CaptureError::NotSupported(format!(
                "write on link type {other}"
            )));
        }
    };

    let data = payload.get(..hlen).map(<[u8]>::to_vec).unwrap_or_default();
    Ok((LinkAddr { family, data }, hlen))
}

/// A write that passed every check, ready for transmit.
struct Outbound {
    ifp: Arc<dyn NetIf>,
    dst: LinkAddr,
    hlen: usize,
    feedback: bool,
}

impl Descriptor {
    /// Transmit `payload`, a complete frame in the bound tap's
    /// framing, on the bound interface.
    ///
    /// Return the number of bytes written. An empty write transmits
    /// nothing and is counted as dropped.
    pub fn write(&self, payload: &[u8]) -> Result<usize, CaptureError> {
        let out = {
            let mut st = self.state.lock();
            if st.closing {
                return Err(CaptureError::Closed);
            }

            st.stats.vals.written += 1;
            match self.prepare_write(&mut st, payload) {
                Ok(Some(out)) => out,
                Ok(None) => {
                    st.stats.vals.write_dropped += 1;
                    return Ok(0);
                }
                Err(e) => {
                    st.stats.vals.write_dropped += 1;
                    return Err(e);
                }
            }
        };

        if let Err(e) = out.ifp.output(&out.dst, payload[out.hlen..].to_vec())
        {
            self.state.lock().stats.vals.write_dropped += 1;
            return Err(e);
        }

        if out.feedback {
            out.ifp.input(
                payload.to_vec(),
                PacketFlags::FEEDBACK,
                Some(self.id()),
            );
        }

        Ok(payload.len())
    }

    fn prepare_write(
        &self,
        st: &mut DescState,
        payload: &[u8],
    ) -> Result<Option<Outbound>, CaptureError> {
        let Some(tap) = st.tap.as_ref() else {
            return Err(CaptureError::NotConfigured);
        };
        let ifp = tap.ifp().clone();

        if !ifp.is_up() {
            return Err(CaptureError::NetworkDown(ifp.name().to_string()));
        }

        if payload.is_empty() {
            return Ok(None);
        }

        let (mut dst, hlen) = link_addr(tap.link_type(), payload)?;
        let mtu = ifp.mtu();
        if payload.len() < hlen || payload.len() - hlen > mtu {
            return Err(CaptureError::MessageSize {
                len: payload.len(),
                max: mtu + hlen,
            });
        }

        let pkt = Packet::new(payload, Direction::Out);
        let engine = self.ctx.filter.as_ref();
        if st.filters.evaluate(engine, FilterKind::Write, &pkt) == 0 {
            st.stats.vals.write_filtered += 1;
            return Err(CaptureError::PermissionDenied(
                "rejected by write filter".to_string(),
            ));
        }

        if st.hdrcmplt {
            dst.family = AddrFamily::HeaderComplete;
        }

        Ok(Some(Outbound { ifp, dst, hlen, feedback: st.feedback }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn link_addr_table() {
        let frame = [0u8; 64];
        for (dlt, fam, hlen) in [
            (LinkType::SLIP, AddrFamily::Inet, 0),
            (LinkType::EN10MB, AddrFamily::Unspec, 14),
            (LinkType::FDDI, AddrFamily::ImpLink, 0),
            (LinkType::RAW, AddrFamily::Unspec, 0),
            (LinkType::NULL, AddrFamily::Unspec, 4),
            (LinkType::ATM_RFC1483, AddrFamily::Unspec, 12),
            (LinkType::PPP, AddrFamily::Unspec, 4),
        ] {
            let (addr, n) = link_addr(dlt, &frame).unwrap();
            assert_eq!(addr.family, fam, "{dlt}");
            assert_eq!(n, hlen, "{dlt}");
            assert_eq!(addr.data.len(), hlen, "{dlt}");
        }
    }

    #[test]
    fn radio_header_length() {
        let mut frame = [0u8; 32];
        frame[1] = 8;
        let (addr, n) =
            link_addr(LinkType::IEEE802_11_RADIO, &frame).unwrap();
        assert_eq!(addr.family, AddrFamily::Ieee80211);
        assert_eq!(n, 8);

        frame[1] = 15;
        assert!(matches!(
            link_addr(LinkType::IEEE802_11_RADIO, &frame),
            Err(CaptureError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_link_type() {
        assert!(matches!(
            link_addr(LinkType(200), &[0; 16]),
            Err(CaptureError::NotSupported(_))
        ));
    }
}
