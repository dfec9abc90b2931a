// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::API_VERSION;
use super::BufferMode;
use super::DirectionPolicy;
use super::Version;
use super::link::LinkType;
use core::fmt::Debug;
use libc::c_int;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(C)]
pub enum CaptureCmd {
    GetBufferLen = 1,          // BIOCGBLEN
    SetBufferLen = 2,          // BIOCSBLEN
    SetReadFilter = 3,         // BIOCSETF
    SetReadFilterNoReset = 4,  // BIOCSETFNR
    SetWriteFilter = 5,        // BIOCSETWF
    Flush = 6,                 // BIOCFLUSH
    PromiscuousOn = 7,         // BIOCPROMISC
    GetLinkType = 8,           // BIOCGDLT
    GetLinkTypeList = 9,       // BIOCGDLTLIST
    SetLinkType = 10,          // BIOCSDLT
    GetInterface = 11,         // BIOCGETIF
    SetInterface = 12,         // BIOCSETIF
    SetReadTimeout = 13,       // BIOCSRTIMEOUT
    GetReadTimeout = 14,       // BIOCGRTIMEOUT
    GetStats = 15,             // BIOCGSTATS
    SetImmediate = 16,         // BIOCIMMEDIATE
    GetVersion = 17,           // BIOCVERSION
    GetHeaderComplete = 18,    // BIOCGHDRCMPLT
    SetHeaderComplete = 19,    // BIOCSHDRCMPLT
    GetDirection = 20,         // BIOCGDIRECTION
    SetDirection = 21,         // BIOCSDIRECTION
    GetTimestampPolicy = 22,   // BIOCGTSTAMP
    SetTimestampPolicy = 23,   // BIOCSTSTAMP
    SetFeedback = 24,          // BIOCFEEDBACK
    Lock = 25,                 // BIOCLOCK
    SetAsyncNotify = 26,       // FIOASYNC
    GetAsyncNotify = 27,       // FIOASYNC (query)
    SetReceiveSignal = 28,     // BIOCSRSIG
    GetReceiveSignal = 29,     // BIOCGRSIG
    GetBufferMode = 30,        // BIOCGETBUFMODE
    SetBufferMode = 31,        // BIOCSETBUFMODE
    GetZeroCopyMaxSize = 32,   // BIOCGETZMAX
    SetZeroCopyRegions = 33,   // BIOCSETZBUF
    RotateZeroCopyBuffer = 34, // BIOCROTZBUF
    BytesAvailable = 35,       // FIONREAD
    SetNonBlocking = 36,       // FIONBIO
}

impl CaptureCmd {
    /// May this command be issued against a locked descriptor?
    ///
    /// Everything that only reads state is allowed, along with the
    /// handful of setters that change how (not what) the consumer
    /// reads.
    pub fn allowed_when_locked(&self) -> bool {
        use CaptureCmd::*;

        matches!(
            self,
            GetBufferLen
                | Flush
                | PromiscuousOn
                | GetLinkType
                | GetLinkTypeList
                | GetInterface
                | SetReadTimeout
                | GetReadTimeout
                | GetStats
                | SetImmediate
                | GetVersion
                | GetHeaderComplete
                | GetDirection
                | GetTimestampPolicy
                | SetTimestampPolicy
                | SetFeedback
                | Lock
                | SetAsyncNotify
                | GetAsyncNotify
                | SetReceiveSignal
                | GetReceiveSignal
                | GetBufferMode
                | GetZeroCopyMaxSize
                | RotateZeroCopyBuffer
                | BytesAvailable
                | SetNonBlocking
        )
    }
}

impl TryFrom<c_int> for CaptureCmd {
    type Error = ();

    fn try_from(num: c_int) -> Result<Self, Self::Error> {
        match num {
            1 => Ok(Self::GetBufferLen),
            2 => Ok(Self::SetBufferLen),
            3 => Ok(Self::SetReadFilter),
            4 => Ok(Self::SetReadFilterNoReset),
            5 => Ok(Self::SetWriteFilter),
            6 => Ok(Self::Flush),
            7 => Ok(Self::PromiscuousOn),
            8 => Ok(Self::GetLinkType),
            9 => Ok(Self::GetLinkTypeList),
            10 => Ok(Self::SetLinkType),
            11 => Ok(Self::GetInterface),
            12 => Ok(Self::SetInterface),
            13 => Ok(Self::SetReadTimeout),
            14 => Ok(Self::GetReadTimeout),
            15 => Ok(Self::GetStats),
            16 => Ok(Self::SetImmediate),
            17 => Ok(Self::GetVersion),
            18 => Ok(Self::GetHeaderComplete),
            19 => Ok(Self::SetHeaderComplete),
            20 => Ok(Self::GetDirection),
            21 => Ok(Self::SetDirection),
            22 => Ok(Self::GetTimestampPolicy),
            23 => Ok(Self::SetTimestampPolicy),
            24 => Ok(Self::SetFeedback),
            25 => Ok(Self::Lock),
            26 => Ok(Self::SetAsyncNotify),
            27 => Ok(Self::GetAsyncNotify),
            28 => Ok(Self::SetReceiveSignal),
            29 => Ok(Self::GetReceiveSignal),
            30 => Ok(Self::GetBufferMode),
            31 => Ok(Self::SetBufferMode),
            32 => Ok(Self::GetZeroCopyMaxSize),
            33 => Ok(Self::SetZeroCopyRegions),
            34 => Ok(Self::RotateZeroCopyBuffer),
            35 => Ok(Self::BytesAvailable),
            36 => Ok(Self::SetNonBlocking),
            _ => Err(()),
        }
    }
}

/// The envelope carrying a [`CaptureCmd`] to the engine.
///
/// The command's request body is serialized by postcard into `req`;
/// the engine answers with either the serialized response type or a
/// [`CaptureError`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CmdIoctl {
    pub api_version: u64,
    pub cmd: CaptureCmd,
    pub req: Vec<u8>,
}

impl CmdIoctl {
    pub fn new<R: Serialize>(
        cmd: CaptureCmd,
        req: &R,
    ) -> Result<Self, CaptureError> {
        let req = postcard::to_allocvec(req)
            .map_err(|e| CaptureError::SerCmdReq(e.to_string()))?;
        Ok(Self { api_version: API_VERSION, cmd, req })
    }

    /// Is this the expected API version?
    ///
    /// NOTE: This function is compiled into both the client and the
    /// engine. As long as we remember to update the `API_VERSION`
    /// value when making API changes, this method will return `false`
    /// when the two disagree.
    pub fn check_version(&self) -> bool {
        self.api_version == API_VERSION
    }

    /// Deserialize the request body.
    pub fn req<T: DeserializeOwned>(&self) -> Result<T, CaptureError> {
        if self.req.is_empty() {
            return Err(CaptureError::NoRequestBody);
        }

        postcard::from_bytes(&self.req)
            .map_err(|e| CaptureError::DeserCmdReq(e.to_string()))
    }
}

#[derive(
    Clone, Debug, Deserialize, Eq, PartialEq, Serialize, thiserror::Error,
)]
pub enum CaptureError {
    #[error("API version mismatch: user {user}, engine {kernel}")]
    BadApiVersion { user: u64, kernel: u64 },

    #[error("no such descriptor: {0:#x}")]
    BadDescriptor(u64),

    #[error("busy: {0}")]
    Busy(String),

    /// The descriptor was closed while the caller was waiting on it.
    #[error("descriptor closed")]
    Closed,

    #[error("failed to deserialize command request: {0}")]
    DeserCmdReq(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("message too long: {len} bytes, max {max}")]
    MessageSize { len: usize, max: usize },

    #[error("network down: {0}")]
    NetworkDown(String),

    /// The [`CmdIoctl`] carries no request body but the command
    /// expects one.
    #[error("missing request body")]
    NoRequestBody,

    #[error("no such device: {0}")]
    NoSuchDevice(String),

    /// The descriptor is not bound to an interface, or the interface
    /// went away underneath it.
    #[error("device not configured")]
    NotConfigured,

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("result too large: need {needed}, given {given}")]
    ResultTooLarge { needed: usize, given: usize },

    #[error("failed to serialize command request: {0}")]
    SerCmdReq(String),

    #[error("failed to serialize command response: {0}")]
    SerCmdResp(String),

    #[error("system error {errno}: {msg}")]
    System { errno: c_int, msg: String },

    #[error("operation would block")]
    WouldBlock,
}

impl CaptureError {
    /// Convert to an errno value.
    pub fn to_errno(&self) -> c_int {
        use libc::*;

        match self {
            Self::BadApiVersion { .. } => EPROTO,
            Self::BadDescriptor(_) => EBADF,
            Self::Busy(_) => EBUSY,
            Self::Closed => EBADF,
            Self::DeserCmdReq(_) => ENOMSG,
            Self::InvalidArgument(_) => EINVAL,
            Self::MessageSize { .. } => EMSGSIZE,
            Self::NetworkDown(_) => ENETDOWN,
            Self::NoRequestBody => EINVAL,
            Self::NoSuchDevice(_) => ENXIO,
            Self::NotConfigured => ENXIO,
            Self::NotSupported(_) => EOPNOTSUPP,
            Self::PermissionDenied(_) => EPERM,
            Self::ResultTooLarge { .. } => ENOMEM,
            Self::SerCmdReq(_) => ENOMSG,
            Self::SerCmdResp(_) => ENOMSG,
            Self::System { errno, .. } => *errno,
            Self::WouldBlock => EAGAIN,
        }
    }
}

/// A marker trait indicating a success response type that is returned
/// from a command and may be passed across the ioctl/API boundary.
pub trait CmdOk: Debug + Serialize {}

impl CmdOk for () {}

/// Indicates no meaningful response value on success.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NoResp {
    pub unused: u64,
}

impl CmdOk for NoResp {}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BufferLenResp {
    pub len: u32,
}

impl CmdOk for BufferLenResp {}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SetBufferLenReq {
    pub len: u32,
}

/// A filter program; an empty program clears the filter.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SetFilterReq {
    pub program: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LinkTypeResp {
    pub link_type: LinkType,
}

impl CmdOk for LinkTypeResp {}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct LinkTypeListReq {
    /// The number of entries the caller has room for.
    pub max: u32,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LinkTypeListResp {
    pub link_types: Vec<LinkType>,
}

impl CmdOk for LinkTypeListResp {}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SetLinkTypeReq {
    pub link_type: LinkType,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InterfaceResp {
    pub name: String,
}

impl CmdOk for InterfaceResp {}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SetInterfaceReq {
    pub name: String,
}

/// A read timeout; zero means wait forever.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct ReadTimeout {
    pub sec: u64,
    pub usec: u32,
}

impl CmdOk for ReadTimeout {}

impl ReadTimeout {
    pub fn as_duration(&self) -> core::time::Duration {
        core::time::Duration::new(self.sec, self.usec * 1_000)
    }

    pub fn from_duration(d: core::time::Duration) -> Self {
        Self { sec: d.as_secs(), usec: d.subsec_micros() }
    }
}

/// Per-descriptor counters.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct CaptureStats {
    /// Packets that passed the direction check.
    pub received: u64,
    /// Packets accepted by the filter but lost to a full buffer.
    pub dropped: u64,
    /// Packets accepted by the filter.
    pub captured: u64,
    pub written: u64,
    pub write_dropped: u64,
    pub write_filtered: u64,
    /// Records appended into zero-copy buffers.
    pub zcopy: u64,
}

impl CmdOk for CaptureStats {}

impl CmdOk for Version {}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct FlagReq {
    pub on: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlagResp {
    pub on: bool,
}

impl CmdOk for FlagResp {}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DirectionResp {
    pub direction: DirectionPolicy,
}

impl CmdOk for DirectionResp {}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SetDirectionReq {
    /// One of the `DirectionPolicy` wire values.
    pub direction: u32,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TimestampPolicyResp {
    pub bits: u32,
}

impl CmdOk for TimestampPolicyResp {}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SetTimestampPolicyReq {
    pub bits: u32,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SignalReq {
    pub sig: i32,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignalResp {
    pub sig: i32,
}

impl CmdOk for SignalResp {}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BufferModeResp {
    pub mode: BufferMode,
}

impl CmdOk for BufferModeResp {}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SetBufferModeReq {
    /// One of the `BufferMode` wire values.
    pub mode: u32,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ZeroCopyMaxResp {
    pub max: u64,
}

impl CmdOk for ZeroCopyMaxResp {}

/// Hand two previously mapped regions to a zero-copy descriptor.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ZeroCopyRegionsReq {
    pub region_a: u64,
    pub region_b: u64,
    pub len: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RotateZeroCopyResp {
    /// The region now held for the consumer, if any.
    pub region: Option<u64>,
    /// The number of record bytes in that region.
    pub len: u32,
}

impl CmdOk for RotateZeroCopyResp {}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BytesAvailableResp {
    pub bytes: u32,
}

impl CmdOk for BytesAvailableResp {}

/// A summary of one open descriptor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DescriptorInfo {
    pub id: u64,
    pub pid: u32,
    pub interface: Option<String>,
    pub link_type: Option<LinkType>,
    pub mode: BufferMode,
    pub bufsize: u32,
    /// Bytes in the store buffer.
    pub slen: u32,
    /// Bytes in the hold buffer.
    pub hlen: u32,
    pub immediate: bool,
    pub promisc: bool,
    pub hdrcmplt: bool,
    pub feedback: bool,
    pub locked: bool,
    pub async_notify: bool,
    pub direction: DirectionPolicy,
    pub sig: i32,
    pub stats: CaptureStats,
}

impl CmdOk for DescriptorInfo {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cmd_numbers() {
        for n in 1..=36 {
            let cmd = CaptureCmd::try_from(n).unwrap();
            assert_eq!(cmd as c_int, n);
        }
        assert!(CaptureCmd::try_from(0).is_err());
        assert!(CaptureCmd::try_from(37).is_err());
    }

    #[test]
    fn lock_allow_list() {
        assert!(CaptureCmd::GetStats.allowed_when_locked());
        assert!(CaptureCmd::Flush.allowed_when_locked());
        assert!(CaptureCmd::RotateZeroCopyBuffer.allowed_when_locked());
        assert!(!CaptureCmd::SetInterface.allowed_when_locked());
        assert!(!CaptureCmd::SetReadFilter.allowed_when_locked());
        assert!(!CaptureCmd::SetWriteFilter.allowed_when_locked());
        assert!(!CaptureCmd::SetBufferLen.allowed_when_locked());
        assert!(!CaptureCmd::SetDirection.allowed_when_locked());
        assert!(!CaptureCmd::SetHeaderComplete.allowed_when_locked());
        assert!(!CaptureCmd::SetLinkType.allowed_when_locked());
    }

    #[test]
    fn envelope_req() {
        let ioc =
            CmdIoctl::new(CaptureCmd::SetBufferLen, &SetBufferLenReq {
                len: 8192,
            })
            .unwrap();
        assert!(ioc.check_version());
        let req: SetBufferLenReq = ioc.req().unwrap();
        assert_eq!(req.len, 8192);

        let empty = CmdIoctl {
            api_version: API_VERSION,
            cmd: CaptureCmd::SetBufferLen,
            req: vec![],
        };
        assert_eq!(
            empty.req::<SetBufferLenReq>().unwrap_err(),
            CaptureError::NoRequestBody
        );
    }

    #[test]
    fn errnos() {
        assert_eq!(CaptureError::WouldBlock.to_errno(), libc::EAGAIN);
        assert_eq!(CaptureError::NotConfigured.to_errno(), libc::ENXIO);
        assert_eq!(
            CaptureError::MessageSize { len: 2000, max: 1514 }.to_errno(),
            libc::EMSGSIZE
        );
        assert_eq!(
            CaptureError::System { errno: libc::EIO, msg: "io".into() }
                .to_errno(),
            libc::EIO
        );
    }

    #[test]
    fn read_timeout_duration() {
        let t = ReadTimeout { sec: 1, usec: 500_000 };
        assert_eq!(t.as_duration().as_millis(), 1500);
        assert_eq!(ReadTimeout::from_duration(t.as_duration()), t);
    }
}
