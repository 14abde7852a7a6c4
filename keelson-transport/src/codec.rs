//! Length-prefixed wire framing.
//!
//! Frame layout, reproduced exactly for wire compatibility:
//!
//! ```text
//! [1 byte: length, or 0xFF escape]
//! [8 bytes: length, only if the first byte was 0xFF]
//! [1 byte flags: bit0=MORE bit1=LONG bit2=COMMAND]
//! [payload: length bytes]
//! ```
//!
//! The short form is used iff the payload is under 255 bytes. The
//! 8-byte length is big-endian by default; peers configured for the
//! little-endian variant must agree out of band. The LONG flag bit
//! mirrors which length form preceded it and is validated on decode.
//!
//! The decoder is incremental: bytes arrive in arbitrary chunks and
//! partial-frame state persists between calls, so a frame split across
//! any number of TCP reads reassembles correctly.

use bytes::{BufMut, Bytes};

use keelson_core::buffer::SegmentedBuffer;
use keelson_core::error::{KeelsonError, KeelsonResult};
use keelson_core::msg::{Msg, MsgFlags};
use keelson_core::options::Endian;

const LONG_FORM_MARKER: u8 = 0xFF;
const SHORT_FORM_MAX: usize = 254;

const FLAG_MORE: u8 = 0x01;
const FLAG_LONG: u8 = 0x02;
const FLAG_COMMAND: u8 = 0x04;
const FLAG_MASK: u8 = FLAG_MORE | FLAG_LONG | FLAG_COMMAND;

/// Stateless frame encoder.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    endian: Endian,
}

impl FrameEncoder {
    #[must_use]
    pub fn new(endian: Endian) -> Self {
        Self { endian }
    }

    /// Bytes `encode` will append for `msg`.
    #[must_use]
    pub fn encoded_size(msg: &Msg) -> usize {
        let header = if msg.size() <= SHORT_FORM_MAX { 2 } else { 10 };
        header + msg.size()
    }

    /// Append the wire form of `msg` to `out`.
    pub fn encode<B: BufMut>(&self, msg: &Msg, out: &mut B) {
        let len = msg.size();
        let long = len > SHORT_FORM_MAX;

        if long {
            out.put_u8(LONG_FORM_MARKER);
            match self.endian {
                Endian::Big => out.put_u64(len as u64),
                Endian::Little => out.put_u64_le(len as u64),
            }
        } else {
            out.put_u8(len as u8);
        }

        let mut flags = 0u8;
        if msg.more() {
            flags |= FLAG_MORE;
        }
        if long {
            flags |= FLAG_LONG;
        }
        if msg.is_command() {
            flags |= FLAG_COMMAND;
        }
        out.put_u8(flags);
        out.put_slice(msg.data());
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Expecting the 1-byte length or the 0xFF escape.
    Size,
    /// Expecting the 8-byte extended length.
    LongSize,
    /// Expecting the flags byte.
    Flags { size: u64, long: bool },
    /// Expecting `size` payload bytes.
    Body { size: u64, flags: u8 },
}

/// Incremental frame decoder.
///
/// Feed wire bytes with [`FrameDecoder::push`], then drain completed
/// frames with [`FrameDecoder::next`] until it returns `Ok(None)`.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    buffer: SegmentedBuffer,
    endian: Endian,
    max_msg_size: Option<u64>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(endian: Endian, max_msg_size: Option<u64>) -> Self {
        Self {
            state: DecodeState::Size,
            buffer: SegmentedBuffer::new(),
            endian,
            max_msg_size,
        }
    }

    /// Append bytes read from the wire.
    pub fn push(&mut self, bytes: Bytes) {
        self.buffer.push(bytes);
    }

    /// Decode the next complete frame, if the buffered bytes contain
    /// one. `Ok(None)` means more bytes are needed.
    ///
    /// A framing violation poisons the connection; the caller must
    /// drop it without delivering partial messages downstream.
    pub fn next(&mut self) -> KeelsonResult<Option<Msg>> {
        loop {
            match self.state {
                DecodeState::Size => {
                    let Some(byte) = self.buffer.take_u8() else {
                        return Ok(None);
                    };
                    if byte == LONG_FORM_MARKER {
                        self.state = DecodeState::LongSize;
                    } else {
                        self.check_size(u64::from(byte))?;
                        self.state = DecodeState::Flags {
                            size: u64::from(byte),
                            long: false,
                        };
                    }
                }
                DecodeState::LongSize => {
                    let Some(raw) = self.buffer.take_array::<8>() else {
                        return Ok(None);
                    };
                    let size = match self.endian {
                        Endian::Big => u64::from_be_bytes(raw),
                        Endian::Little => u64::from_le_bytes(raw),
                    };
                    self.check_size(size)?;
                    self.state = DecodeState::Flags { size, long: true };
                }
                DecodeState::Flags { size, long } => {
                    let Some(flags) = self.buffer.take_u8() else {
                        return Ok(None);
                    };
                    if flags & !FLAG_MASK != 0 {
                        return Err(KeelsonError::Framing(format!(
                            "reserved flag bits set: {flags:#04x}"
                        )));
                    }
                    if (flags & FLAG_LONG != 0) != long {
                        return Err(KeelsonError::Framing(
                            "LONG flag disagrees with length form".to_string(),
                        ));
                    }
                    self.state = DecodeState::Body { size, flags };
                }
                DecodeState::Body { size, flags } => {
                    let Some(payload) = self.buffer.take_bytes(size as usize) else {
                        return Ok(None);
                    };
                    self.state = DecodeState::Size;

                    let mut msg_flags = MsgFlags::empty();
                    if flags & FLAG_MORE != 0 {
                        msg_flags.insert(MsgFlags::MORE);
                    }
                    if flags & FLAG_COMMAND != 0 {
                        msg_flags.insert(MsgFlags::COMMAND);
                    }
                    return Ok(Some(Msg::with_flags(payload, msg_flags)));
                }
            }
        }
    }

    /// Whether a frame is partially decoded.
    #[must_use]
    pub fn mid_frame(&self) -> bool {
        !matches!(self.state, DecodeState::Size) || !self.buffer.is_empty()
    }

    fn check_size(&self, size: u64) -> KeelsonResult<()> {
        if let Some(max) = self.max_msg_size {
            if size > max {
                return Err(KeelsonError::FrameTooLarge { size, max });
            }
        }
        Ok(())
    }
}
