//! Frame values exchanged between a stream and its connection.
//!
//! These are the decoded shapes of protocol messages. Turning them into bytes
//! is the transport's job; this crate only builds and consumes them.

use core::fmt;

use bytes::Bytes;

use crate::{ErrorCode, FrameFlags};

/// Stream identifier, unique among the open streams of one connection.
///
/// Stream 0 is reserved for connection-level frames.
pub type StreamId = u32;

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameType {
    Reserved = 0x0000,
    Setup = 0x0001,
    Lease = 0x0002,
    Keepalive = 0x0003,
    RequestResponse = 0x0004,
    RequestFnf = 0x0005,
    RequestStream = 0x0006,
    RequestSub = 0x0007,
    RequestChannel = 0x0008,
    RequestN = 0x0009,
    Cancel = 0x000A,
    Response = 0x000B,
    Error = 0x000C,
    MetadataPush = 0x000D,
    Ext = 0xFFFF,
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reserved => "RESERVED",
            Self::Setup => "SETUP",
            Self::Lease => "LEASE",
            Self::Keepalive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::RequestFnf => "REQUEST_FNF",
            Self::RequestStream => "REQUEST_STREAM",
            Self::RequestSub => "REQUEST_SUB",
            Self::RequestChannel => "REQUEST_CHANNEL",
            Self::RequestN => "REQUEST_N",
            Self::Cancel => "CANCEL",
            Self::Response => "RESPONSE",
            Self::Error => "ERROR",
            Self::MetadataPush => "METADATA_PUSH",
            Self::Ext => "EXT",
        };
        f.write_str(name)
    }
}

/// Common header of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    pub stream_id: StreamId,
}

impl FrameHeader {
    pub const fn new(frame_type: FrameType, flags: FrameFlags, stream_id: StreamId) -> Self {
        Self {
            frame_type,
            flags,
            stream_id,
        }
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[stream={}, flags={:#06x}]",
            self.frame_type,
            self.stream_id,
            self.flags.bits()
        )
    }
}

/// Data item carried by request and response frames.
///
/// Metadata is optional; an absent metadata block is the "empty metadata"
/// of completion and error frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub data: Bytes,
    pub metadata: Option<Bytes>,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(data: impl Into<Bytes>, metadata: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: Some(metadata.into()),
        }
    }

    /// A payload with neither data nor metadata.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.metadata.is_none()
    }

    /// Flags implied by the payload's contents.
    fn flags(&self) -> FrameFlags {
        if self.metadata.is_some() {
            FrameFlags::METADATA
        } else {
            FrameFlags::empty()
        }
    }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self {
        Self::new(Bytes::from_static(data.as_bytes()))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// REQUEST_CHANNEL: opens a channel or carries a subsequent item on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestChannelFrame {
    pub header: FrameHeader,
    /// Initial credit granted to the responder (meaningful on the opening frame).
    pub request_n: u32,
    pub payload: Payload,
}

impl RequestChannelFrame {
    pub fn new(stream_id: StreamId, flags: FrameFlags, request_n: u32, payload: Payload) -> Self {
        let mut flags = flags | payload.flags();
        if request_n > 0 {
            flags |= FrameFlags::REQN_PRESENT;
        }
        Self {
            header: FrameHeader::new(FrameType::RequestChannel, flags, stream_id),
            request_n,
            payload,
        }
    }

    /// True if the peer will send no more items on this channel.
    pub fn is_complete(&self) -> bool {
        self.header.flags.is_complete()
    }
}

/// REQUEST_N: grants the receiver credit to send `request_n` more items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestNFrame {
    pub header: FrameHeader,
    pub request_n: u32,
}

impl RequestNFrame {
    pub fn new(stream_id: StreamId, request_n: u32) -> Self {
        Self {
            header: FrameHeader::new(FrameType::RequestN, FrameFlags::empty(), stream_id),
            request_n,
        }
    }
}

/// CANCEL: the sender is no longer interested in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelFrame {
    pub header: FrameHeader,
}

impl CancelFrame {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            header: FrameHeader::new(FrameType::Cancel, FrameFlags::empty(), stream_id),
        }
    }
}

/// RESPONSE: one item from the responder, or its completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub header: FrameHeader,
    pub payload: Payload,
}

impl ResponseFrame {
    /// A data frame carrying one item.
    pub fn next(stream_id: StreamId, payload: Payload) -> Self {
        Self {
            header: FrameHeader::new(FrameType::Response, payload.flags(), stream_id),
            payload,
        }
    }

    /// A terminal frame: COMPLETE set, empty metadata, no payload.
    pub fn complete(stream_id: StreamId) -> Self {
        Self {
            header: FrameHeader::new(FrameType::Response, FrameFlags::COMPLETE, stream_id),
            payload: Payload::empty(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.header.flags.is_complete()
    }
}

/// ERROR: terminates the stream (or the connection, on stream 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    pub header: FrameHeader,
    pub error_code: ErrorCode,
    /// Human-readable description in `payload.data`.
    pub payload: Payload,
}

impl ErrorFrame {
    pub fn new(stream_id: StreamId, error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            header: FrameHeader::new(FrameType::Error, FrameFlags::empty(), stream_id),
            error_code,
            payload: Payload::new(Bytes::from(message.into())),
        }
    }

    /// An APPLICATION_ERROR frame describing `message`.
    pub fn application(stream_id: StreamId, message: impl Into<String>) -> Self {
        Self::new(stream_id, ErrorCode::ApplicationError, message)
    }

    /// The error description, lossily decoded as UTF-8.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.payload.data).into_owned()
    }
}

/// Any frame a stream can send or receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    RequestChannel(RequestChannelFrame),
    RequestN(RequestNFrame),
    Cancel(CancelFrame),
    Response(ResponseFrame),
    Error(ErrorFrame),
    /// Frame types this crate routes but does not interpret.
    Other { header: FrameHeader, payload: Payload },
}

impl Frame {
    pub fn header(&self) -> &FrameHeader {
        match self {
            Frame::RequestChannel(f) => &f.header,
            Frame::RequestN(f) => &f.header,
            Frame::Cancel(f) => &f.header,
            Frame::Response(f) => &f.header,
            Frame::Error(f) => &f.header,
            Frame::Other { header, .. } => header,
        }
    }

    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.header().stream_id
    }

    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.header().frame_type
    }

    #[inline]
    pub fn flags(&self) -> FrameFlags {
        self.header().flags
    }

    /// True for RESPONSE+COMPLETE and ERROR frames, which end a stream.
    pub fn is_terminal(&self) -> bool {
        match self {
            Frame::Response(f) => f.is_complete(),
            Frame::Error(_) => true,
            _ => false,
        }
    }
}

impl From<RequestChannelFrame> for Frame {
    fn from(frame: RequestChannelFrame) -> Self {
        Frame::RequestChannel(frame)
    }
}

impl From<RequestNFrame> for Frame {
    fn from(frame: RequestNFrame) -> Self {
        Frame::RequestN(frame)
    }
}

impl From<CancelFrame> for Frame {
    fn from(frame: CancelFrame) -> Self {
        Frame::Cancel(frame)
    }
}

impl From<ResponseFrame> for Frame {
    fn from(frame: ResponseFrame) -> Self {
        Frame::Response(frame)
    }
}

impl From<ErrorFrame> for Frame {
    fn from(frame: ErrorFrame) -> Self {
        Frame::Error(frame)
    }
}
