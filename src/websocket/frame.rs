//! RFC 6455 frame codec.
//!
//! Grounded primarily on the `proxmox-http` websocket module's `FrameHeader`/`create_frame` (byte
//! layout, RSV-bit rejection, control-frame validation) and `willrnch-fastwebsockets`'
//! `parse_frame_header` (spill-buffer handling, max-size checks), both adapted from async to the
//! blocking `Read`/`Write` this crate uses everywhere else.
use std::io::{self, Read, Write};

/// The server drives one blocking read per frame rather than feeding arbitrary byte chunks into
/// a growable buffer (as a reactor-based implementation would): the connection's `Read` already
/// blocks until the bytes it asked for arrive, so the frame-buffer-doubling trick is unnecessary
/// here. The wire format and validation rules below are unchanged either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("io error")]
    Io(#[from] io::Error),
    #[error("reserved bits set")]
    ReservedBitsSet,
    #[error("client frame was not masked")]
    NotMasked,
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("control frame must not be fragmented")]
    FragmentedControlFrame,
    #[error("control frame payload larger than 125 bytes")]
    ControlFrameTooLarge,
    #[error("frame payload of {0} bytes exceeds the maximum of {1} bytes")]
    PayloadTooLarge(u64, u64),
    #[error("continuation frame received with no message in progress")]
    UnexpectedContinuation,
    #[error("new message started before the previous one finished")]
    UnfinishedMessage,
}

pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// Reads exactly one frame from `stream`, unmasking the payload in place.
///
/// Per RFC 6455 ยง5.1, client-to-server frames MUST be masked; an unmasked frame is a protocol
/// violation and the connection must be failed rather than merely have the frame ignored.
///
/// An unrecognized opcode is reported as [`FrameError::UnknownOpcode`] only after the rest of the
/// frame (length, mask key, payload) has been fully read off `stream`, so the caller can ignore
/// the frame and keep reading the next one without losing sync on the byte stream.
pub fn read_frame(stream: &mut impl Read, max_payload_len: u64) -> Result<Frame, FrameError> {
    let mut head = [0_u8; 2];
    stream.read_exact(&mut head)?;

    let fin = head[0] & 0x80 != 0;
    let rsv = head[0] & 0x70;
    let opcode_byte = head[0] & 0x0F;
    let opcode = OpCode::from_u8(opcode_byte);
    let masked = head[1] & 0x80 != 0;
    let len_field = head[1] & 0x7F;

    if rsv != 0 {
        return Err(FrameError::ReservedBitsSet);
    }

    if !masked {
        return Err(FrameError::NotMasked);
    }

    let is_control = opcode.map(OpCode::is_control).unwrap_or(false);

    if is_control && !fin {
        return Err(FrameError::FragmentedControlFrame);
    }

    let payload_len = match len_field {
        126 => {
            let mut ext = [0_u8; 2];
            stream.read_exact(&mut ext)?;
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0_u8; 8];
            stream.read_exact(&mut ext)?;
            u64::from_be_bytes(ext)
        }
        len => len as u64,
    };

    if is_control && payload_len > 125 {
        return Err(FrameError::ControlFrameTooLarge);
    }

    if payload_len > max_payload_len {
        return Err(FrameError::PayloadTooLarge(payload_len, max_payload_len));
    }

    let mut mask_key = [0_u8; 4];
    stream.read_exact(&mut mask_key)?;

    let mut payload = vec![0_u8; payload_len as usize];
    stream.read_exact(&mut payload)?;
    unmask(&mut payload, mask_key);

    let opcode = opcode.ok_or(FrameError::UnknownOpcode(opcode_byte))?;

    Ok(Frame {
        fin,
        opcode,
        payload,
    })
}

/// Unmasks `data` in place, XOR-ing each byte against the 4-byte rolling `key`, the same
/// byte-at-a-time loop `proxmox-http`'s `mask_bytes` falls back to below its 32-byte SIMD-ish
/// fast path; that fast path is not worth the `unsafe` alignment juggling here.
pub fn unmask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Writes a single unmasked frame (server-to-client frames must never be masked).
pub fn write_frame(stream: &mut impl Write, fin: bool, opcode: OpCode, payload: &[u8]) -> io::Result<()> {
    let mut head = vec![(if fin { 0x80 } else { 0x00 }) | opcode.as_u8()];

    match payload.len() {
        len @ 0..=125 => head.push(len as u8),
        len @ 126..=0xFFFF => {
            head.push(126);
            head.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            head.push(127);
            head.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    stream.write_all(&head)?;
    stream.write_all(payload)?;
    stream.flush()
}

/// Splits `payload` into ≤125-byte sub-frames: the first carries `opcode` with `FIN=0`,
/// subsequent ones carry the continuation opcode, also `FIN=0`. Callers must follow up with a
/// zero-payload `FIN=1` continuation frame to close the message out.
pub fn write_fragmented(
    stream: &mut impl Write,
    opcode: OpCode,
    payload: &[u8],
) -> io::Result<()> {
    if payload.is_empty() {
        write_frame(stream, false, opcode, &[])?;
        return Ok(());
    }

    for (i, chunk) in payload.chunks(125).enumerate() {
        let opcode = if i == 0 {
            opcode
        } else {
            OpCode::Continuation
        };
        write_frame(stream, false, opcode, chunk)?;
    }

    Ok(())
}
