use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::debug;

use crate::error::FramingError;


/// Command ids understood by the vehicle firmware.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandId {
    Noop = 0,
    ForwardDir = 1,
    Steer = 2,
    CameraSetMode = 3,
}

/// The 4-byte value slot of a request. On the wire this is a C union: every variant
/// is written little-endian into the same four bytes, shorter types zero-extended.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CommandValue {
    I32(i32),
    F32(f32),
    U32(u32),
    U16(u16),
    U8(u8),
}

impl CommandValue {
    pub fn encode(&self) -> [u8; 4] {
        match *self {
            CommandValue::I32(v) => v.to_le_bytes(),
            CommandValue::F32(v) => v.to_le_bytes(),
            CommandValue::U32(v) => v.to_le_bytes(),
            CommandValue::U16(v) => {
                let mut out = [0u8; 4];
                out[..2].copy_from_slice(&v.to_le_bytes());
                out
            }
            CommandValue::U8(v) => [v, 0, 0, 0],
        }
    }
}

impl From<i32> for CommandValue {
    fn from(v: i32) -> Self {
        CommandValue::I32(v)
    }
}
impl From<f32> for CommandValue {
    fn from(v: f32) -> Self {
        CommandValue::F32(v)
    }
}
impl From<u8> for CommandValue {
    fn from(v: u8) -> Self {
        CommandValue::U8(v)
    }
}


/// Header shared by requests and replies: `sequence_id: u16`, `msg_length: u16`.
/// `msg_length` always equals the exact byte length of everything after it.
pub const FRAME_HEADER_SIZE: usize = 4;

/// `command_id: u8` + 4-byte value union + `payload_len: u32`.
pub const REQUEST_FIXED_PAYLOAD_SIZE: usize = 9;

/// 4-byte value union + `status: u8` + `payload_len: u32`.
pub const REPLY_FIXED_PAYLOAD_SIZE: usize = 9;

pub const MIN_REPLY_SIZE: usize = FRAME_HEADER_SIZE + REPLY_FIXED_PAYLOAD_SIZE;


/// Encodes one command request. Layout (packed, little-endian):
/// `sequence_id:u16 | msg_length:u16 | command_id:u8 | data:[u8;4] | payload_len:u32 | extra`
pub fn encode_request(
    sequence_id: u16,
    command_id: CommandId,
    value: CommandValue,
    extra_payload: &[u8],
) -> Bytes {
    let msg_length = (REQUEST_FIXED_PAYLOAD_SIZE + extra_payload.len()) as u16;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + msg_length as usize);
    buf.put_u16_le(sequence_id);
    buf.put_u16_le(msg_length);
    buf.put_u8(command_id.into());
    buf.put_slice(&value.encode());
    buf.put_u32_le(extra_payload.len() as u32);
    buf.put_slice(extra_payload);
    buf.freeze()
}


/// A decoded reply. `data` is the raw 4-byte union slot; the typed accessors
/// reinterpret it the way the original firmware does.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub sequence_id: u16,
    pub data: [u8; 4],
    pub status: u8,
    pub payload: Bytes,
}

impl Reply {
    pub fn int_value(&self) -> i32 {
        i32::from_le_bytes(self.data)
    }

    pub fn float_value(&self) -> f32 {
        f32::from_le_bytes(self.data)
    }

    /// Parses a reply datagram. Validation is strict on lengths that would read out of
    /// bounds, lenient on a `payload_len` field that merely disagrees with the actual
    /// trailing length (logged, actual length wins).
    pub fn try_decode(data: &[u8]) -> Result<Reply, FramingError> {
        if data.len() < MIN_REPLY_SIZE {
            return Err(FramingError::TooShort { actual: data.len(), min: MIN_REPLY_SIZE });
        }

        let mut buf = data;
        let sequence_id = buf.get_u16_le();
        let msg_length = buf.get_u16_le() as usize;

        if msg_length > buf.remaining() {
            return Err(FramingError::LengthOutOfBounds { declared: msg_length, available: buf.remaining() });
        }
        if msg_length < REPLY_FIXED_PAYLOAD_SIZE {
            return Err(FramingError::TooShort {
                actual: msg_length,
                min: REPLY_FIXED_PAYLOAD_SIZE,
            });
        }

        let mut value = [0u8; 4];
        buf.copy_to_slice(&mut value);
        let status = buf.get_u8();
        let declared_payload_len = buf.get_u32_le() as usize;

        let actual_payload_len = msg_length - REPLY_FIXED_PAYLOAD_SIZE;
        if declared_payload_len != actual_payload_len {
            debug!(
                "reply payload length mismatch (field={}, actual={}) seq={} - proceeding with actual",
                declared_payload_len, actual_payload_len, sequence_id
            );
        }

        Ok(Reply {
            sequence_id,
            data: value,
            status,
            payload: Bytes::copy_from_slice(&buf[..actual_payload_len]),
        })
    }

    /// Inverse of [try_decode](Reply::try_decode); only used by the device simulation
    /// in tests but kept here so the layout lives in one place.
    pub fn encode(&self) -> Bytes {
        let msg_length = (REPLY_FIXED_PAYLOAD_SIZE + self.payload.len()) as u16;

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + msg_length as usize);
        buf.put_u16_le(self.sequence_id);
        buf.put_u16_le(msg_length);
        buf.put_slice(&self.data);
        buf.put_u8(self.status);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
