use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::FramingError;


/// Largest payload a single UDP datagram can carry.
pub const MAX_UDP_PAYLOAD: usize = 65507;

pub const VIDEO_NAME_LEN: usize = 128;

/// Payload budget per fragment once both fixed headers are accounted for.
pub const MAX_FRAGMENT_PAYLOAD: usize = MAX_UDP_PAYLOAD - FragmentHeader::SIZE - FrameMetadata::SIZE;


#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Mono = 0,
    Stereo = 1,
    Disparity = 2,
}

/// Only meaningful for stereo fragments; other frame kinds ignore the side byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameSide {
    Left = 0,
    Right = 1,
}


/// First two bytes of every video datagram: `frame_type: u8`, `frame_side: u8`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FragmentHeader {
    pub frame_type: FrameType,
    pub frame_side: FrameSide,
}

impl FragmentHeader {
    pub const SIZE: usize = 2;
}


/// Packed little-endian fragment metadata:
/// `video_name:[u8;128] | sequence_id:u32 | segment_id:u8 | num_segments:u8 | total_length:u32 | length:u16`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameMetadata {
    /// NUL-padded source name, used for mono/training playback.
    pub video_name: [u8; VIDEO_NAME_LEN],
    /// Shared by all fragments of one frame; monotonically increasing per sender.
    pub sequence_id: u32,
    /// 0-based, assignment order equals send order.
    pub segment_id: u8,
    pub num_segments: u8,
    /// Byte length of the complete reassembled frame.
    pub total_length: u32,
    /// Byte length of this fragment's payload.
    pub length: u16,
}

impl FrameMetadata {
    pub const SIZE: usize = VIDEO_NAME_LEN + 4 + 1 + 1 + 4 + 2;

    /// The name with trailing NUL padding stripped; lossy on invalid UTF-8.
    pub fn video_name_str(&self) -> String {
        let end = self.video_name.iter().position(|&b| b == 0).unwrap_or(VIDEO_NAME_LEN);
        String::from_utf8_lossy(&self.video_name[..end]).into_owned()
    }
}

pub fn encode_video_name(name: &str) -> [u8; VIDEO_NAME_LEN] {
    let mut out = [0u8; VIDEO_NAME_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(VIDEO_NAME_LEN - 1); // keep at least one NUL
    out[..len].copy_from_slice(&bytes[..len]);
    out
}


/// One UDP datagram of an oversized frame: header + metadata + payload slice.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub metadata: FrameMetadata,
    pub payload: Bytes,
}

impl Fragment {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FragmentHeader::SIZE + FrameMetadata::SIZE + self.payload.len());
        buf.put_u8(self.header.frame_type.into());
        buf.put_u8(self.header.frame_side.into());
        buf.put_slice(&self.metadata.video_name);
        buf.put_u32_le(self.metadata.sequence_id);
        buf.put_u8(self.metadata.segment_id);
        buf.put_u8(self.metadata.num_segments);
        buf.put_u32_le(self.metadata.total_length);
        buf.put_u16_le(self.metadata.length);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Strict on anything that would read out of bounds, tolerant of trailing padding
    /// after the declared payload length (older senders pad to the full frame size).
    pub fn try_decode(data: &[u8]) -> Result<Fragment, FramingError> {
        let min = FragmentHeader::SIZE + FrameMetadata::SIZE;
        if data.len() < min {
            return Err(FramingError::TooShort { actual: data.len(), min });
        }

        let mut buf = data;
        let frame_type_raw = buf.get_u8();
        let frame_side_raw = buf.get_u8();

        let frame_type = FrameType::try_from(frame_type_raw)
            .map_err(|_| FramingError::UnknownFrameType(frame_type_raw))?;
        let frame_side = match frame_type {
            FrameType::Stereo => FrameSide::try_from(frame_side_raw)
                .map_err(|_| FramingError::UnknownFrameSide(frame_side_raw))?,
            // the side byte carries no information for mono/disparity
            _ => FrameSide::Left,
        };

        let mut video_name = [0u8; VIDEO_NAME_LEN];
        buf.copy_to_slice(&mut video_name);
        let sequence_id = buf.get_u32_le();
        let segment_id = buf.get_u8();
        let num_segments = buf.get_u8();
        let total_length = buf.get_u32_le();
        let length = buf.get_u16_le();

        if length as usize > buf.remaining() {
            return Err(FramingError::LengthOutOfBounds {
                declared: length as usize,
                available: buf.remaining(),
            });
        }

        Ok(Fragment {
            header: FragmentHeader { frame_type, frame_side },
            metadata: FrameMetadata {
                video_name,
                sequence_id,
                segment_id,
                num_segments,
                total_length,
                length,
            },
            payload: Bytes::copy_from_slice(&buf[..length as usize]),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fragment(frame_type: FrameType, frame_side: FrameSide, payload: &'static [u8]) -> Fragment {
        Fragment {
            header: FragmentHeader { frame_type, frame_side },
            metadata: FrameMetadata {
                video_name: encode_video_name("clip.mov"),
                sequence_id: 7,
                segment_id: 2,
                num_segments: 5,
                total_length: 1000,
                length: payload.len() as u16,
            },
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_size_constants() {
        assert_eq!(FrameMetadata::SIZE, 140);
        assert_eq!(MAX_FRAGMENT_PAYLOAD, 65365);
    }

    #[test]
    fn test_exact_byte_layout() {
        let encoded = fragment(FrameType::Stereo, FrameSide::Right, b"xy").encode();

        assert_eq!(encoded.len(), 2 + 140 + 2);
        assert_eq!(encoded[0], 1); // Stereo
        assert_eq!(encoded[1], 1); // Right
        assert_eq!(&encoded[2..10], b"clip.mov");
        assert_eq!(encoded[10], 0); // NUL padding starts
        assert_eq!(&encoded[130..134], &[7, 0, 0, 0]); // sequence_id
        assert_eq!(encoded[134], 2); // segment_id
        assert_eq!(encoded[135], 5); // num_segments
        assert_eq!(&encoded[136..140], &[0xE8, 0x03, 0, 0]); // total_length = 1000
        assert_eq!(&encoded[140..142], &[2, 0]); // length
        assert_eq!(&encoded[142..], b"xy");
    }

    #[rstest]
    #[case::mono(FrameType::Mono, FrameSide::Left)]
    #[case::stereo_left(FrameType::Stereo, FrameSide::Left)]
    #[case::stereo_right(FrameType::Stereo, FrameSide::Right)]
    #[case::disparity(FrameType::Disparity, FrameSide::Left)]
    fn test_roundtrip(#[case] frame_type: FrameType, #[case] frame_side: FrameSide) {
        let original = fragment(frame_type, frame_side, b"payload bytes");
        let decoded = Fragment::try_decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_too_short_rejected() {
        let result = Fragment::try_decode(&[0u8; 100]);
        assert_eq!(result, Err(FramingError::TooShort { actual: 100, min: 142 }));
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let mut encoded = fragment(FrameType::Mono, FrameSide::Left, b"x").encode().to_vec();
        encoded[0] = 9;
        assert_eq!(Fragment::try_decode(&encoded), Err(FramingError::UnknownFrameType(9)));
    }

    #[test]
    fn test_bad_side_only_rejected_for_stereo() {
        let mut encoded = fragment(FrameType::Stereo, FrameSide::Left, b"x").encode().to_vec();
        encoded[1] = 7;
        assert_eq!(Fragment::try_decode(&encoded), Err(FramingError::UnknownFrameSide(7)));

        encoded[0] = u8::from(FrameType::Mono);
        assert!(Fragment::try_decode(&encoded).is_ok());
    }

    #[test]
    fn test_declared_length_past_datagram_rejected() {
        let mut frag = fragment(FrameType::Mono, FrameSide::Left, b"abc");
        frag.metadata.length = 500;
        let result = Fragment::try_decode(&frag.encode());
        assert_eq!(result, Err(FramingError::LengthOutOfBounds { declared: 500, available: 3 }));
    }

    #[test]
    fn test_trailing_padding_tolerated() {
        let frag = fragment(FrameType::Mono, FrameSide::Left, b"abc");
        let mut encoded = frag.encode().to_vec();
        encoded.extend_from_slice(&[0u8; 64]); // sender padded to a fixed frame size

        let decoded = Fragment::try_decode(&encoded).unwrap();
        assert_eq!(decoded.payload.as_ref(), b"abc");
    }

    #[test]
    fn test_video_name_roundtrip_and_truncation() {
        let name = encode_video_name("training-run-42.mov");
        let meta = FrameMetadata {
            video_name: name,
            sequence_id: 0,
            segment_id: 0,
            num_segments: 1,
            total_length: 0,
            length: 0,
        };
        assert_eq!(meta.video_name_str(), "training-run-42.mov");

        let long = "x".repeat(300);
        let truncated = encode_video_name(&long);
        assert_eq!(truncated[VIDEO_NAME_LEN - 1], 0);
        assert_eq!(truncated.iter().filter(|&&b| b != 0).count(), VIDEO_NAME_LEN - 1);
    }
}
