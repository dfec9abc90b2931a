// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Serialized command dispatch.
//!
//! Each [`CaptureCmd`] has a handler which decodes its request body,
//! runs the typed operation on the descriptor or registry, and hands
//! the typed response to [`hdlr_resp()`] for encoding.

use super::descriptor::Descriptor;
use super::filter::FilterKind;
use super::registry::Registry;
use crate::api::API_VERSION;
use crate::api::BufferLenResp;
use crate::api::BufferMode;
use crate::api::BufferModeResp;
use crate::api::BytesAvailableResp;
use crate::api::CaptureCmd;
use crate::api::CaptureError;
use crate::api::CmdIoctl;
use crate::api::CmdOk;
use crate::api::DirectionPolicy;
use crate::api::DirectionResp;
use crate::api::FlagReq;
use crate::api::FlagResp;
use crate::api::InterfaceResp;
use crate::api::LinkTypeListReq;
use crate::api::LinkTypeListResp;
use crate::api::LinkTypeResp;
use crate::api::NoResp;
use crate::api::ReadTimeout;
use crate::api::SetBufferLenReq;
use crate::api::SetBufferModeReq;
use crate::api::SetDirectionReq;
use crate::api::SetFilterReq;
use crate::api::SetInterfaceReq;
use crate::api::SetLinkTypeReq;
use crate::api::SetTimestampPolicyReq;
use crate::api::SignalReq;
use crate::api::SignalResp;
use crate::api::TimestampPolicyResp;
use crate::api::ZeroCopyMaxResp;
use crate::api::ZeroCopyRegionsReq;
use std::sync::Arc;

fn hdlr_resp<T>(resp: Result<T, CaptureError>) -> Result<Vec<u8>, CaptureError>
where
    T: CmdOk,
{
    let resp = resp?;
    postcard::to_allocvec(&resp)
        .map_err(|e| CaptureError::SerCmdResp(e.to_string()))
}

fn set_filter_hdlr(
    d: &Descriptor,
    ioc: &CmdIoctl,
    kind: FilterKind,
    reset: bool,
) -> Result<NoResp, CaptureError> {
    let req: SetFilterReq = ioc.req()?;
    d.set_filter(kind, &req.program, reset)?;
    Ok(NoResp::default())
}

fn set_flag_hdlr(
    ioc: &CmdIoctl,
    set: impl FnOnce(bool) -> Result<(), CaptureError>,
) -> Result<NoResp, CaptureError> {
    let req: FlagReq = ioc.req()?;
    set(req.on)?;
    Ok(NoResp::default())
}

fn set_buffer_len_hdlr(
    d: &Descriptor,
    ioc: &CmdIoctl,
) -> Result<BufferLenResp, CaptureError> {
    let req: SetBufferLenReq = ioc.req()?;
    Ok(BufferLenResp { len: d.set_buffer_len(req.len)? })
}

fn link_type_list_hdlr(
    reg: &Registry,
    d: &Arc<Descriptor>,
    ioc: &CmdIoctl,
) -> Result<LinkTypeListResp, CaptureError> {
    let req: LinkTypeListReq = ioc.req()?;
    let link_types = reg.link_types(d, req.max as usize)?;
    Ok(LinkTypeListResp { link_types })
}

fn set_link_type_hdlr(
    reg: &Registry,
    d: &Arc<Descriptor>,
    ioc: &CmdIoctl,
) -> Result<NoResp, CaptureError> {
    let req: SetLinkTypeReq = ioc.req()?;
    reg.set_link_type(d, req.link_type)?;
    Ok(NoResp::default())
}

fn set_interface_hdlr(
    reg: &Registry,
    d: &Arc<Descriptor>,
    ioc: &CmdIoctl,
) -> Result<NoResp, CaptureError> {
    let req: SetInterfaceReq = ioc.req()?;
    reg.bind(d, &req.name)?;
    Ok(NoResp::default())
}

fn set_read_timeout_hdlr(
    d: &Descriptor,
    ioc: &CmdIoctl,
) -> Result<NoResp, CaptureError> {
    let req: ReadTimeout = ioc.req()?;
    d.set_read_timeout(req)?;
    Ok(NoResp::default())
}

fn set_direction_hdlr(
    d: &Descriptor,
    ioc: &CmdIoctl,
) -> Result<NoResp, CaptureError> {
    let req: SetDirectionReq = ioc.req()?;
    d.set_direction(DirectionPolicy::try_from(req.direction)?)?;
    Ok(NoResp::default())
}

fn set_timestamp_policy_hdlr(
    d: &Descriptor,
    ioc: &CmdIoctl,
) -> Result<NoResp, CaptureError> {
    let req: SetTimestampPolicyReq = ioc.req()?;
    d.set_timestamp_policy(req.bits)?;
    Ok(NoResp::default())
}

fn set_receive_signal_hdlr(
    d: &Descriptor,
    ioc: &CmdIoctl,
) -> Result<NoResp, CaptureError> {
    let req: SignalReq = ioc.req()?;
    d.set_receive_signal(req.sig)?;
    Ok(NoResp::default())
}

fn set_buffer_mode_hdlr(
    d: &Descriptor,
    ioc: &CmdIoctl,
) -> Result<NoResp, CaptureError> {
    let req: SetBufferModeReq = ioc.req()?;
    d.set_buffer_mode(BufferMode::try_from(req.mode)?)?;
    Ok(NoResp::default())
}

fn set_zerocopy_regions_hdlr(
    reg: &Registry,
    d: &Descriptor,
    ioc: &CmdIoctl,
) -> Result<NoResp, CaptureError> {
    let req: ZeroCopyRegionsReq = ioc.req()?;
    reg.set_zerocopy_regions(d, &req)?;
    Ok(NoResp::default())
}

/// Verify the API version of `ioc` and run its command against `d`.
pub fn dispatch(
    reg: &Registry,
    d: &Arc<Descriptor>,
    ioc: &CmdIoctl,
) -> Result<Vec<u8>, CaptureError> {
    if !ioc.check_version() {
        return Err(CaptureError::BadApiVersion {
            user: ioc.api_version,
            kernel: API_VERSION,
        });
    }

    match ioc.cmd {
        CaptureCmd::GetBufferLen => {
            hdlr_resp(d.buffer_len().map(|len| BufferLenResp { len }))
        }

        CaptureCmd::SetBufferLen => hdlr_resp(set_buffer_len_hdlr(d, ioc)),

        CaptureCmd::SetReadFilter => {
            hdlr_resp(set_filter_hdlr(d, ioc, FilterKind::Read, true))
        }

        CaptureCmd::SetReadFilterNoReset => {
            hdlr_resp(set_filter_hdlr(d, ioc, FilterKind::Read, false))
        }

        CaptureCmd::SetWriteFilter => {
            hdlr_resp(set_filter_hdlr(d, ioc, FilterKind::Write, false))
        }

        CaptureCmd::Flush => hdlr_resp(d.flush().map(|_| NoResp::default())),

        CaptureCmd::PromiscuousOn => {
            hdlr_resp(d.set_promiscuous().map(|_| NoResp::default()))
        }

        CaptureCmd::GetLinkType => {
            hdlr_resp(d.link_type().map(|link_type| LinkTypeResp { link_type }))
        }

        CaptureCmd::GetLinkTypeList => {
            hdlr_resp(link_type_list_hdlr(reg, d, ioc))
        }

        CaptureCmd::SetLinkType => hdlr_resp(set_link_type_hdlr(reg, d, ioc)),

        CaptureCmd::GetInterface => {
            hdlr_resp(d.interface_name().map(|name| InterfaceResp { name }))
        }

        CaptureCmd::SetInterface => hdlr_resp(set_interface_hdlr(reg, d, ioc)),

        CaptureCmd::SetReadTimeout => hdlr_resp(set_read_timeout_hdlr(d, ioc)),

        CaptureCmd::GetReadTimeout => hdlr_resp(d.read_timeout()),

        CaptureCmd::GetStats => hdlr_resp(d.stats()),

        CaptureCmd::SetImmediate => {
            hdlr_resp(set_flag_hdlr(ioc, |on| d.set_immediate(on)))
        }

        CaptureCmd::GetVersion => hdlr_resp(d.version()),

        CaptureCmd::GetHeaderComplete => {
            hdlr_resp(d.header_complete().map(|on| FlagResp { on }))
        }

        CaptureCmd::SetHeaderComplete => {
            hdlr_resp(set_flag_hdlr(ioc, |on| d.set_header_complete(on)))
        }

        CaptureCmd::GetDirection => {
            hdlr_resp(d.direction().map(|direction| DirectionResp {
                direction,
            }))
        }

        CaptureCmd::SetDirection => hdlr_resp(set_direction_hdlr(d, ioc)),

        CaptureCmd::GetTimestampPolicy => hdlr_resp(
            d.timestamp_policy()
                .map(|p| TimestampPolicyResp { bits: p.bits() }),
        ),

        CaptureCmd::SetTimestampPolicy => {
            hdlr_resp(set_timestamp_policy_hdlr(d, ioc))
        }

        CaptureCmd::SetFeedback => {
            hdlr_resp(set_flag_hdlr(ioc, |on| d.set_feedback(on)))
        }

        CaptureCmd::Lock => hdlr_resp(d.lock().map(|_| NoResp::default())),

        CaptureCmd::SetAsyncNotify => {
            hdlr_resp(set_flag_hdlr(ioc, |on| d.set_async_notify(on)))
        }

        CaptureCmd::GetAsyncNotify => {
            hdlr_resp(d.async_notify().map(|on| FlagResp { on }))
        }

        CaptureCmd::SetReceiveSignal => {
            hdlr_resp(set_receive_signal_hdlr(d, ioc))
        }

        CaptureCmd::GetReceiveSignal => {
            hdlr_resp(d.receive_signal().map(|sig| SignalResp { sig }))
        }

        CaptureCmd::GetBufferMode => {
            hdlr_resp(d.buffer_mode().map(|mode| BufferModeResp { mode }))
        }

        CaptureCmd::SetBufferMode => hdlr_resp(set_buffer_mode_hdlr(d, ioc)),

        CaptureCmd::GetZeroCopyMaxSize => {
            hdlr_resp(d.zerocopy_max_size().map(|max| ZeroCopyMaxResp { max }))
        }

        CaptureCmd::SetZeroCopyRegions => {
            hdlr_resp(set_zerocopy_regions_hdlr(reg, d, ioc))
        }

        CaptureCmd::RotateZeroCopyBuffer => {
            hdlr_resp(d.rotate_zerocopy_buffer())
        }

        CaptureCmd::BytesAvailable => {
            hdlr_resp(
                d.bytes_available().map(|bytes| BytesAvailableResp { bytes }),
            )
        }

        CaptureCmd::SetNonBlocking => {
            hdlr_resp(set_flag_hdlr(ioc, |on| d.set_nonblocking(on)))
        }
    }
}
