//! Message frames.
//!
//! A [`Msg`] is a single frame of a (possibly multipart) logical message:
//! a refcounted byte buffer plus a small set of flags. Frames are moved,
//! never copied, between pipe slots; [`Msg::take`] transfers ownership and
//! leaves the source empty, mirroring the single-owner invariant of the
//! transport core.

use bytes::Bytes;
use std::fmt;

/// Per-frame metadata bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgFlags(u8);

impl MsgFlags {
    /// More frames of the same logical message follow.
    pub const MORE: MsgFlags = MsgFlags(0x01);
    /// The frame carries a routing identity, not payload.
    pub const IDENTITY: MsgFlags = MsgFlags(0x02);
    /// The frame is a protocol command, invisible to the application.
    pub const COMMAND: MsgFlags = MsgFlags(0x04);

    /// Empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        MsgFlags(0)
    }

    #[must_use]
    pub const fn contains(self, other: MsgFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: MsgFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: MsgFlags) {
        self.0 &= !other.0;
    }
}

/// A single message frame.
///
/// Payloads are `Bytes`, so cloning the underlying storage is a refcount
/// bump and slicing is zero-copy. An empty `Msg` (the result of
/// [`Msg::new`] or of being [`Msg::take`]n from) owns no buffer.
///
/// # Examples
///
/// ```
/// use keelson_core::msg::Msg;
/// use bytes::Bytes;
///
/// let mut first = Msg::from_bytes(Bytes::from_static(b"topic"));
/// first.set_more(true);
/// assert!(first.more());
/// assert_eq!(first.size(), 5);
///
/// let moved = first.take();
/// assert_eq!(moved.size(), 5);
/// assert_eq!(first.size(), 0);
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Msg {
    data: Bytes,
    flags: MsgFlags,
}

impl Msg {
    /// Create an empty frame.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: Bytes::new(),
            flags: MsgFlags::empty(),
        }
    }

    /// Create a frame owning `data`.
    #[must_use]
    pub const fn from_bytes(data: Bytes) -> Self {
        Self {
            data,
            flags: MsgFlags::empty(),
        }
    }

    /// Create a frame with explicit flags.
    #[must_use]
    pub const fn with_flags(data: Bytes, flags: MsgFlags) -> Self {
        Self { data, flags }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Borrow the payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame, returning the payload buffer.
    #[must_use]
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Frame flags.
    #[must_use]
    pub const fn flags(&self) -> MsgFlags {
        self.flags
    }

    /// Whether more frames of the same logical message follow.
    #[must_use]
    pub const fn more(&self) -> bool {
        self.flags.contains(MsgFlags::MORE)
    }

    /// Set or clear the continuation bit.
    pub fn set_more(&mut self, more: bool) {
        if more {
            self.flags.insert(MsgFlags::MORE);
        } else {
            self.flags.remove(MsgFlags::MORE);
        }
    }

    /// Whether the frame is a protocol command.
    #[must_use]
    pub const fn is_command(&self) -> bool {
        self.flags.contains(MsgFlags::COMMAND)
    }

    /// Whether the frame carries a routing identity.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.flags.contains(MsgFlags::IDENTITY)
    }

    /// Move the frame out, leaving `self` empty.
    ///
    /// This is the only way a frame changes hands inside the core: the
    /// source is reset to the empty frame, so a buffer never has two
    /// owners.
    #[must_use]
    pub fn take(&mut self) -> Msg {
        std::mem::take(self)
    }
}

impl From<Bytes> for Msg {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<Vec<u8>> for Msg {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(Bytes::from(data))
    }
}

impl fmt::Debug for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Msg")
            .field("size", &self.data.len())
            .field("more", &self.more())
            .field("command", &self.is_command())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame() {
        let msg = Msg::new();
        assert_eq!(msg.size(), 0);
        assert!(!msg.more());
        assert!(!msg.is_command());
    }

    #[test]
    fn flags_roundtrip() {
        let mut msg = Msg::from_bytes(Bytes::from_static(b"payload"));
        msg.set_more(true);
        assert!(msg.more());
        msg.set_more(false);
        assert!(!msg.more());

        let cmd = Msg::with_flags(Bytes::from_static(b"SUB"), MsgFlags::COMMAND);
        assert!(cmd.is_command());
        assert!(!cmd.more());
    }

    #[test]
    fn take_leaves_source_empty() {
        let mut msg = Msg::from_bytes(Bytes::from_static(b"abc"));
        msg.set_more(true);

        let taken = msg.take();
        assert_eq!(taken.data(), b"abc");
        assert!(taken.more());
        assert_eq!(msg.size(), 0);
        assert!(!msg.more());
    }
}
