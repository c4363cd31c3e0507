use thiserror::Error;


/// Errors raised while parsing a single datagram. These are never fatal: the datagram
/// is logged and dropped, and processing continues with the next one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("datagram too short: {actual} bytes, need at least {min}")]
    TooShort { actual: usize, min: usize },

    #[error("declared length {declared} exceeds the {available} bytes actually present")]
    LengthOutOfBounds { declared: usize, available: usize },

    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    #[error("unknown frame side {0}")]
    UnknownFrameSide(u8),
}


/// Integrity violations detected while reconstructing a frame from its fragments.
/// The affected context is cleared and the partial frame discarded - partial data is
/// never delivered downstream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("missing segment {segment_id} of {num_segments} for frame {sequence_id}")]
    MissingSegment {
        sequence_id: u32,
        segment_id: u8,
        num_segments: u8,
    },

    #[error("segment id {segment_id} out of range for frame {sequence_id} with {num_segments} segments")]
    SegmentOutOfRange {
        sequence_id: u32,
        segment_id: u8,
        num_segments: u8,
    },

    #[error("frame of {total_length} bytes exceeds the maximum of {max_segments} segments")]
    FrameTooLarge {
        total_length: usize,
        max_segments: usize,
    },
}
