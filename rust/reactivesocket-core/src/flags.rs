//! Frame flags.
//!
//! Flags live in the upper bits of the 16-bit flags field of every frame
//! header. Several flags share a bit and are only meaningful for particular
//! frame types.

use bitflags::bitflags;

bitflags! {
    /// Flags carried in each frame header.
    ///
    /// Receivers ignore flags they do not understand for a given frame type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u16 {
        /// The frame may be ignored if its type is not understood.
        const IGNORE        = 0x8000;

        /// Metadata is present in the frame.
        const METADATA      = 0x4000;

        /// More fragments follow (request and response frames).
        const FOLLOWS       = 0x2000;

        /// Respond to this KEEPALIVE (shares the FOLLOWS bit).
        const KEEPALIVE     = 0x2000;

        /// Lease is honoured on this connection (SETUP only, shares the FOLLOWS bit).
        const LEASE         = 0x2000;

        /// This is the last frame of the stream in the sender's direction.
        ///
        /// On a RESPONSE frame sent by a channel responder it terminates the
        /// stream; on an inbound REQUEST_CHANNEL frame it tells the responder
        /// the peer will send no more items.
        const COMPLETE      = 0x1000;

        /// An initial request-n value is present (REQUEST_STREAM, REQUEST_CHANNEL).
        const REQN_PRESENT  = 0x0800;
    }
}

impl FrameFlags {
    /// True if the COMPLETE flag is set.
    #[inline]
    pub const fn is_complete(self) -> bool {
        self.contains(Self::COMPLETE)
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self::empty()
    }
}
