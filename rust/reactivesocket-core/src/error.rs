//! Error codes, completion signals and error types.

use core::fmt;

use crate::StreamId;

/// Error codes carried by ERROR frames.
///
/// Codes below 0x0100 are setup errors, 0x01xx are connection errors and
/// 0x02xx are stream-scoped errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// The SETUP frame is invalid for the server.
    InvalidSetup = 0x0001,
    /// Some (or all) of the SETUP parameters are not supported.
    UnsupportedSetup = 0x0002,
    /// The server rejected the SETUP.
    RejectedSetup = 0x0003,
    /// The connection is being terminated.
    ConnectionError = 0x0101,
    /// Application layer logic failed while processing a request.
    ApplicationError = 0x0201,
    /// The responder rejected the request.
    Rejected = 0x0202,
    /// The request was cancelled.
    Canceled = 0x0203,
    /// The request is invalid.
    Invalid = 0x0204,
    /// Reserved.
    Reserved = 0xFFFF_FFFF,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSetup => write!(f, "invalid setup"),
            Self::UnsupportedSetup => write!(f, "unsupported setup"),
            Self::RejectedSetup => write!(f, "rejected setup"),
            Self::ConnectionError => write!(f, "connection error"),
            Self::ApplicationError => write!(f, "application error"),
            Self::Rejected => write!(f, "rejected"),
            Self::Canceled => write!(f, "canceled"),
            Self::Invalid => write!(f, "invalid"),
            Self::Reserved => write!(f, "reserved"),
        }
    }
}

/// Why a stream ended.
///
/// `Graceful` and `Error` are produced by the stream state machines
/// themselves; the remaining values originate in the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamCompletionSignal {
    /// Orderly completion or cancellation.
    Graceful,
    /// Application-level failure on this stream.
    Error,
    InvalidSetup,
    UnsupportedSetup,
    RejectedSetup,
    /// The connection failed underneath the stream.
    ConnectionError,
    /// The connection was closed while the stream was open.
    ConnectionEnd,
}

impl StreamCompletionSignal {
    #[inline]
    pub fn is_graceful(self) -> bool {
        self == Self::Graceful
    }
}

impl fmt::Display for StreamCompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => write!(f, "graceful"),
            Self::Error => write!(f, "error"),
            Self::InvalidSetup => write!(f, "invalid setup"),
            Self::UnsupportedSetup => write!(f, "unsupported setup"),
            Self::RejectedSetup => write!(f, "rejected setup"),
            Self::ConnectionError => write!(f, "connection error"),
            Self::ConnectionEnd => write!(f, "connection end"),
        }
    }
}

/// Error delivered to an application subscriber when its stream ends
/// non-gracefully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The local application failed the stream.
    Application { message: String },
    /// The peer sent an ERROR frame.
    Remote { code: ErrorCode, message: String },
    /// The stream was torn down with a non-graceful completion signal.
    Terminated(StreamCompletionSignal),
}

impl StreamError {
    /// Application failure with the given description.
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application { message } => f.write_str(message),
            Self::Remote { code, message } => write!(f, "{code}: {message}"),
            Self::Terminated(signal) => write!(f, "stream terminated: {signal}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<StreamCompletionSignal> for StreamError {
    fn from(signal: StreamCompletionSignal) -> Self {
        Self::Terminated(signal)
    }
}

/// Errors reported by the connection when registering or routing streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Stream id 0 is reserved for connection-level frames.
    ReservedStreamId,
    /// A stream with this id is already open.
    DuplicateStream { stream_id: StreamId },
    /// The configured limit of concurrently open streams was reached.
    StreamLimit { max: usize },
    /// A new channel must be opened with a REQUEST_CHANNEL frame.
    UnexpectedFrame { stream_id: StreamId, frame_type: crate::FrameType },
    /// The connection has been closed.
    Closed,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReservedStreamId => write!(f, "stream id 0 is reserved"),
            Self::DuplicateStream { stream_id } => {
                write!(f, "stream {stream_id} is already open")
            }
            Self::StreamLimit { max } => write!(f, "stream limit of {max} reached"),
            Self::UnexpectedFrame {
                stream_id,
                frame_type,
            } => write!(f, "unexpected {frame_type} frame opening stream {stream_id}"),
            Self::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ConnectionError {}
