// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A client handle for a capture descriptor.
//!
//! Every control operation travels as a serialized [`CmdIoctl`]
//! through [`Registry::ioctl`], the same path a device front end
//! would use; the data path (read, write, poll) goes straight to the
//! descriptor.

use captap::api::API_VERSION;
use captap::api::BufferLenResp;
use captap::api::BufferMode;
use captap::api::BufferModeResp;
use captap::api::BytesAvailableResp;
use captap::api::CaptureCmd;
pub use captap::api::CaptureError;
use captap::api::CaptureStats;
use captap::api::CmdIoctl;
use captap::api::CmdOk;
use captap::api::DirectionPolicy;
use captap::api::DirectionResp;
use captap::api::FlagReq;
use captap::api::FlagResp;
use captap::api::InterfaceResp;
use captap::api::LinkType;
use captap::api::LinkTypeListReq;
use captap::api::LinkTypeListResp;
use captap::api::LinkTypeResp;
use captap::api::NoResp;
use captap::api::ReadTimeout;
use captap::api::RotateZeroCopyResp;
use captap::api::SetBufferLenReq;
use captap::api::SetBufferModeReq;
use captap::api::SetDirectionReq;
use captap::api::SetFilterReq;
use captap::api::SetInterfaceReq;
use captap::api::SetLinkTypeReq;
use captap::api::SetTimestampPolicyReq;
use captap::api::SignalReq;
use captap::api::SignalResp;
use captap::api::TimestampPolicy;
use captap::api::TimestampPolicyResp;
use captap::api::Version;
use captap::api::ZeroCopyMaxResp;
use captap::api::ZeroCopyRegionsReq;
use captap::engine::descriptor::Descriptor;
use captap::engine::registry::DescriptorId;
use captap::engine::registry::Registry;
use captap::engine::wait::PollEvents;
use captap::engine::zerocopy::ZeroCopyRegion;
use core::time::Duration;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;

/// Errors from driving a descriptor through its handle.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open descriptor: {0}")]
    Open(CaptureError),

    #[error("request serialization failed for command {0:?}: {1}")]
    ReqSer(CaptureCmd, postcard::Error),

    #[error("response deserialization failed for command {0:?}: {1}")]
    RespDeser(CaptureCmd, postcard::Error),

    #[error("command {0:?} failed: {1}")]
    CommandError(CaptureCmd, CaptureError),

    /// A data path operation (read, write, wait) failed.
    #[error("{0}")]
    Io(CaptureError),
}

impl Error {
    /// The engine error underneath, if this is one.
    pub fn capture_error(&self) -> Option<&CaptureError> {
        match self {
            Self::Open(e) | Self::CommandError(_, e) | Self::Io(e) => Some(e),
            Self::ReqSer(..) | Self::RespDeser(..) => None,
        }
    }
}

/// The handle to one open capture descriptor.
pub struct CaptureHdl {
    reg: Arc<Registry>,
    desc: Arc<Descriptor>,
}

impl CaptureHdl {
    /// Open a new descriptor on `reg`.
    pub fn open(reg: &Arc<Registry>) -> Result<Self, Error> {
        let desc = reg.open().map_err(Error::Open)?;
        Ok(Self { reg: reg.clone(), desc })
    }

    pub fn id(&self) -> DescriptorId {
        self.desc.id()
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.desc
    }

    /// Close the descriptor, waking anyone blocked on it.
    pub fn close(self) -> Result<(), Error> {
        self.reg.close(self.desc.id()).map_err(Error::Io)
    }

    pub fn buffer_len(&self) -> Result<u32, Error> {
        let cmd = CaptureCmd::GetBufferLen;
        let resp: BufferLenResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.len)
    }

    /// Request a buffer size; return the size actually used.
    pub fn set_buffer_len(&self, len: u32) -> Result<u32, Error> {
        let cmd = CaptureCmd::SetBufferLen;
        let resp: BufferLenResp =
            self.run_cmd(cmd, Some(&SetBufferLenReq { len }))?;
        Ok(resp.len)
    }

    pub fn set_read_filter(&self, program: &[u8]) -> Result<NoResp, Error> {
        let cmd = CaptureCmd::SetReadFilter;
        let req = SetFilterReq { program: program.to_vec() };
        self.run_cmd(cmd, Some(&req))
    }

    /// Replace the read filter without discarding buffered records.
    pub fn set_read_filter_no_reset(
        &self,
        program: &[u8],
    ) -> Result<NoResp, Error> {
        let cmd = CaptureCmd::SetReadFilterNoReset;
        let req = SetFilterReq { program: program.to_vec() };
        self.run_cmd(cmd, Some(&req))
    }

    pub fn set_write_filter(&self, program: &[u8]) -> Result<NoResp, Error> {
        let cmd = CaptureCmd::SetWriteFilter;
        let req = SetFilterReq { program: program.to_vec() };
        self.run_cmd(cmd, Some(&req))
    }

    pub fn flush(&self) -> Result<NoResp, Error> {
        self.run_cmd(CaptureCmd::Flush, None::<&()>)
    }

    pub fn set_promiscuous(&self) -> Result<NoResp, Error> {
        self.run_cmd(CaptureCmd::PromiscuousOn, None::<&()>)
    }

    pub fn link_type(&self) -> Result<LinkType, Error> {
        let cmd = CaptureCmd::GetLinkType;
        let resp: LinkTypeResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.link_type)
    }

    pub fn link_types(&self, max: u32) -> Result<Vec<LinkType>, Error> {
        let cmd = CaptureCmd::GetLinkTypeList;
        let resp: LinkTypeListResp =
            self.run_cmd(cmd, Some(&LinkTypeListReq { max }))?;
        Ok(resp.link_types)
    }

    pub fn set_link_type(&self, link_type: LinkType) -> Result<NoResp, Error> {
        let cmd = CaptureCmd::SetLinkType;
        self.run_cmd(cmd, Some(&SetLinkTypeReq { link_type }))
    }

    pub fn interface(&self) -> Result<String, Error> {
        let cmd = CaptureCmd::GetInterface;
        let resp: InterfaceResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.name)
    }

    /// Bind the descriptor to interface `name`.
    pub fn set_interface(&self, name: &str) -> Result<NoResp, Error> {
        let cmd = CaptureCmd::SetInterface;
        let req = SetInterfaceReq { name: name.to_string() };
        self.run_cmd(cmd, Some(&req))
    }

    pub fn set_read_timeout(&self, timeout: Duration) -> Result<NoResp, Error> {
        let cmd = CaptureCmd::SetReadTimeout;
        self.run_cmd(cmd, Some(&ReadTimeout::from_duration(timeout)))
    }

    pub fn read_timeout(&self) -> Result<Duration, Error> {
        let cmd = CaptureCmd::GetReadTimeout;
        let resp: ReadTimeout = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.as_duration())
    }

    pub fn stats(&self) -> Result<CaptureStats, Error> {
        self.run_cmd(CaptureCmd::GetStats, None::<&()>)
    }

    pub fn set_immediate(&self, on: bool) -> Result<NoResp, Error> {
        self.run_cmd(CaptureCmd::SetImmediate, Some(&FlagReq { on }))
    }

    pub fn version(&self) -> Result<Version, Error> {
        self.run_cmd(CaptureCmd::GetVersion, None::<&()>)
    }

    pub fn header_complete(&self) -> Result<bool, Error> {
        let cmd = CaptureCmd::GetHeaderComplete;
        let resp: FlagResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.on)
    }

    pub fn set_header_complete(&self, on: bool) -> Result<NoResp, Error> {
        self.run_cmd(CaptureCmd::SetHeaderComplete, Some(&FlagReq { on }))
    }

    pub fn direction(&self) -> Result<DirectionPolicy, Error> {
        let cmd = CaptureCmd::GetDirection;
        let resp: DirectionResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.direction)
    }

    pub fn set_direction(&self, dir: DirectionPolicy) -> Result<NoResp, Error> {
        let req = SetDirectionReq { direction: dir as u32 };
        self.run_cmd(CaptureCmd::SetDirection, Some(&req))
    }

    pub fn timestamp_policy(&self) -> Result<TimestampPolicy, Error> {
        let cmd = CaptureCmd::GetTimestampPolicy;
        let resp: TimestampPolicyResp = self.run_cmd(cmd, None::<&()>)?;
        // The engine only ever reports a valid pattern.
        Ok(TimestampPolicy::from_bits(resp.bits).unwrap_or_default())
    }

    pub fn set_timestamp_policy(
        &self,
        policy: TimestampPolicy,
    ) -> Result<NoResp, Error> {
        let req = SetTimestampPolicyReq { bits: policy.bits() };
        self.run_cmd(CaptureCmd::SetTimestampPolicy, Some(&req))
    }

    pub fn set_feedback(&self, on: bool) -> Result<NoResp, Error> {
        self.run_cmd(CaptureCmd::SetFeedback, Some(&FlagReq { on }))
    }

    pub fn lock(&self) -> Result<NoResp, Error> {
        self.run_cmd(CaptureCmd::Lock, None::<&()>)
    }

    pub fn set_async_notify(&self, on: bool) -> Result<NoResp, Error> {
        self.run_cmd(CaptureCmd::SetAsyncNotify, Some(&FlagReq { on }))
    }

    pub fn async_notify(&self) -> Result<bool, Error> {
        let cmd = CaptureCmd::GetAsyncNotify;
        let resp: FlagResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.on)
    }

    pub fn set_receive_signal(&self, sig: i32) -> Result<NoResp, Error> {
        self.run_cmd(CaptureCmd::SetReceiveSignal, Some(&SignalReq { sig }))
    }

    pub fn receive_signal(&self) -> Result<i32, Error> {
        let cmd = CaptureCmd::GetReceiveSignal;
        let resp: SignalResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.sig)
    }

    pub fn buffer_mode(&self) -> Result<BufferMode, Error> {
        let cmd = CaptureCmd::GetBufferMode;
        let resp: BufferModeResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.mode)
    }

    pub fn set_buffer_mode(&self, mode: BufferMode) -> Result<NoResp, Error> {
        let req = SetBufferModeReq { mode: mode as u32 };
        self.run_cmd(CaptureCmd::SetBufferMode, Some(&req))
    }

    pub fn zerocopy_max_size(&self) -> Result<u64, Error> {
        let cmd = CaptureCmd::GetZeroCopyMaxSize;
        let resp: ZeroCopyMaxResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.max)
    }

    /// Map a pair of zero-copy regions of `len` bytes each and hand
    /// them to the descriptor.
    pub fn setup_zerocopy(
        &self,
        len: usize,
    ) -> Result<[Arc<ZeroCopyRegion>; 2], Error> {
        let cmd = CaptureCmd::SetZeroCopyRegions;
        let map = || {
            self.reg.map_region(len).map_err(|e| Error::CommandError(cmd, e))
        };
        let a = map()?;
        let b = map()?;
        let req = ZeroCopyRegionsReq {
            region_a: a.id(),
            region_b: b.id(),
            len: len as u64,
        };
        let _: NoResp = self.run_cmd(cmd, Some(&req))?;
        Ok([a, b])
    }

    pub fn rotate_zerocopy_buffer(&self) -> Result<RotateZeroCopyResp, Error> {
        self.run_cmd(CaptureCmd::RotateZeroCopyBuffer, None::<&()>)
    }

    pub fn bytes_available(&self) -> Result<u32, Error> {
        let cmd = CaptureCmd::BytesAvailable;
        let resp: BytesAvailableResp = self.run_cmd(cmd, None::<&()>)?;
        Ok(resp.bytes)
    }

    pub fn set_nonblocking(&self, on: bool) -> Result<NoResp, Error> {
        self.run_cmd(CaptureCmd::SetNonBlocking, Some(&FlagReq { on }))
    }

    /// Read captured records into `buf`, which must be exactly the
    /// buffer size.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        self.desc.read(buf).map_err(Error::Io)
    }

    pub fn write(&self, payload: &[u8]) -> Result<usize, Error> {
        self.desc.write(payload).map_err(Error::Io)
    }

    pub fn poll(&self, events: PollEvents) -> PollEvents {
        self.desc.poll(events)
    }

    pub fn wait_readable(
        &self,
        timeout: Option<Duration>,
    ) -> Result<bool, Error> {
        self.desc.wait_readable(timeout).map_err(Error::Io)
    }

    fn run_cmd<T, R>(
        &self,
        cmd: CaptureCmd,
        req: Option<&R>,
    ) -> Result<T, Error>
    where
        T: CmdOk + DeserializeOwned,
        R: Serialize,
    {
        run_cmd(&self.reg, self.desc.id(), cmd, req)
    }
}

/// Send `cmd` with an optional request body to descriptor `id` and
/// decode the response.
pub fn run_cmd<T, R>(
    reg: &Registry,
    id: DescriptorId,
    cmd: CaptureCmd,
    req: Option<&R>,
) -> Result<T, Error>
where
    T: CmdOk + DeserializeOwned,
    R: Serialize,
{
    let req = match req {
        Some(req) => {
            postcard::to_allocvec(req).map_err(|e| Error::ReqSer(cmd, e))?
        }

        None => vec![],
    };

    let ioc = CmdIoctl { api_version: API_VERSION, cmd, req };
    let resp = reg.ioctl(id, &ioc).map_err(|e| Error::CommandError(cmd, e))?;
    postcard::from_bytes(&resp).map_err(|e| Error::RespDeser(cmd, e))
}

#[cfg(test)]
mod test {
    use super::*;
    use captap::api::DEFAULT_BUFSIZE;
    use captap::api::LinkType;
    use captap::api::PAGE_SIZE;
    use captap::api::RecordIter;
    use captap::api::ZBUF_MAX_SIZE;
    use captap::api::T_NANOTIME;
    use captap::engine::ifnet::PseudoIf;
    use captap_test_utils::filter::PortFilter;
    use captap_test_utils::pkt::frame_of_len;
    use captap_test_utils::sim_registry;

    #[test]
    fn control_round_trips() {
        let reg = sim_registry();
        let ifp = PseudoIf::new("sim0", 1500);
        ifp.attach(&reg, LinkType::EN10MB, 14).unwrap();
        ifp.attach(&reg, LinkType::RAW, 0).unwrap();

        let hdl = CaptureHdl::open(&reg).unwrap();
        assert_eq!(hdl.buffer_len().unwrap(), DEFAULT_BUFSIZE);
        assert_eq!(hdl.set_buffer_len(8192).unwrap(), 8192);
        assert_eq!(hdl.version().unwrap(), Version::CURRENT);

        hdl.set_interface("sim0").unwrap();
        assert_eq!(hdl.interface().unwrap(), "sim0");
        assert_eq!(hdl.link_type().unwrap(), LinkType::EN10MB);
        assert_eq!(
            hdl.link_types(8).unwrap(),
            vec![LinkType::EN10MB, LinkType::RAW]
        );
        hdl.set_link_type(LinkType::RAW).unwrap();
        assert_eq!(hdl.link_type().unwrap(), LinkType::RAW);

        hdl.set_read_timeout(Duration::from_millis(1500)).unwrap();
        assert_eq!(hdl.read_timeout().unwrap(), Duration::from_millis(1500));

        hdl.set_direction(DirectionPolicy::Out).unwrap();
        assert_eq!(hdl.direction().unwrap(), DirectionPolicy::Out);

        let nano = TimestampPolicy::from_bits(T_NANOTIME).unwrap();
        hdl.set_timestamp_policy(nano).unwrap();
        assert_eq!(hdl.timestamp_policy().unwrap(), nano);

        hdl.set_header_complete(true).unwrap();
        assert!(hdl.header_complete().unwrap());
        hdl.set_async_notify(true).unwrap();
        assert!(hdl.async_notify().unwrap());
        hdl.set_receive_signal(10).unwrap();
        assert_eq!(hdl.receive_signal().unwrap(), 10);

        hdl.set_read_filter(&PortFilter::udp(53, 64)).unwrap();
        hdl.set_write_filter(&[]).unwrap();
        assert_eq!(hdl.bytes_available().unwrap(), 0);
        assert_eq!(hdl.stats().unwrap(), CaptureStats::default());
        assert_eq!(hdl.buffer_mode().unwrap(), BufferMode::Copying);
    }

    #[test]
    fn zerocopy_over_commands() {
        let reg = sim_registry();
        let ifp = PseudoIf::new("sim0", 1500);
        ifp.attach(&reg, LinkType::EN10MB, 14).unwrap();

        let hdl = CaptureHdl::open(&reg).unwrap();
        hdl.set_buffer_mode(BufferMode::ZeroCopy).unwrap();
        assert_eq!(hdl.zerocopy_max_size().unwrap(), ZBUF_MAX_SIZE as u64);
        let [a, b] = hdl.setup_zerocopy(PAGE_SIZE).unwrap();
        hdl.set_interface("sim0").unwrap();
        hdl.set_read_filter_no_reset(&PortFilter::udp(53, 64)).unwrap();

        ifp.receive(&frame_of_len(200, 53));
        ifp.receive(&frame_of_len(200, 80));
        let resp = hdl.rotate_zerocopy_buffer().unwrap();
        assert_eq!(resp.region, Some(a.id()));
        assert!(!b.user_owns());

        let recs = a.read().unwrap();
        let caps: Vec<_> =
            RecordIter::new(&recs).map(|r| r.hdr.caplen).collect();
        assert_eq!(caps, vec![64]);
        assert_eq!(hdl.stats().unwrap().zcopy, 1);
    }

    #[test]
    fn errors_carry_the_command() {
        let reg = sim_registry();
        let hdl = CaptureHdl::open(&reg).unwrap();

        match hdl.set_interface("nope") {
            Err(Error::CommandError(cmd, CaptureError::NoSuchDevice(name))) => {
                assert_eq!(cmd, CaptureCmd::SetInterface);
                assert_eq!(name, "nope");
            }
            res => panic!("unexpected result: {res:?}"),
        }

        let err = hdl.set_receive_signal(99).unwrap_err();
        assert!(matches!(
            err.capture_error(),
            Some(CaptureError::InvalidArgument(_))
        ));

        hdl.lock().unwrap();
        assert!(matches!(
            hdl.set_buffer_mode(BufferMode::ZeroCopy),
            Err(Error::CommandError(_, CaptureError::PermissionDenied(_)))
        ));
    }

    #[test]
    fn bad_api_version() {
        let reg = sim_registry();
        let hdl = CaptureHdl::open(&reg).unwrap();
        let ioc = CmdIoctl {
            api_version: API_VERSION + 1,
            cmd: CaptureCmd::GetStats,
            req: vec![],
        };
        assert!(matches!(
            reg.ioctl(hdl.id(), &ioc),
            Err(CaptureError::BadApiVersion { .. })
        ));
    }

    #[test]
    fn missing_request_body() {
        let reg = sim_registry();
        let hdl = CaptureHdl::open(&reg).unwrap();
        let res: Result<NoResp, _> =
            run_cmd(&reg, hdl.id(), CaptureCmd::SetImmediate, None::<&()>);
        assert!(matches!(
            res,
            Err(Error::CommandError(_, CaptureError::NoRequestBody))
        ));
    }

    #[test]
    fn closed_handle() {
        let reg = sim_registry();
        let hdl = CaptureHdl::open(&reg).unwrap();
        let id = hdl.id();
        hdl.close().unwrap();
        let res: Result<CaptureStats, _> =
            run_cmd(&reg, id, CaptureCmd::GetStats, None::<&()>);
        assert!(matches!(
            res,
            Err(Error::CommandError(_, CaptureError::BadDescriptor(_)))
        ));
    }
}
