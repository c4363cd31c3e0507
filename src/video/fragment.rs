use bytes::Bytes;
use tracing::{error, trace};

use crate::error::ReassemblyError;
use crate::transport::DatagramSink;
use crate::video::wire::{
    encode_video_name, Fragment, FragmentHeader, FrameMetadata, FrameSide, FrameType,
    MAX_FRAGMENT_PAYLOAD, VIDEO_NAME_LEN,
};


/// Per-fragment progress notification: `(bytes_sent_so_far, total_bytes)`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(usize, usize);

/// Splits encoded frames into MTU-bounded fragments and hands them to an outbound
/// adapter one at a time. There is no fragment-level acknowledgment; a failed send
/// abandons the rest of the frame.
pub struct Fragmenter {
    next_sequence_id: u32,
    video_name: [u8; VIDEO_NAME_LEN],
}

impl Fragmenter {
    pub fn new() -> Fragmenter {
        Fragmenter {
            next_sequence_id: 0,
            video_name: [0u8; VIDEO_NAME_LEN],
        }
    }

    /// Sets the source name carried in every fragment's metadata (mono/training
    /// playback uses it to label the stream).
    pub fn set_source_name(&mut self, name: &str) {
        self.video_name = encode_video_name(name);
    }

    /// Splits one frame. All fragments share a freshly allocated sequence id;
    /// segment ids are assigned in send order.
    pub fn fragment(
        &mut self,
        frame_type: FrameType,
        frame_side: FrameSide,
        data: &[u8],
    ) -> Result<Vec<Fragment>, ReassemblyError> {
        let num_segments = data.len().div_ceil(MAX_FRAGMENT_PAYLOAD);
        if num_segments > u8::MAX as usize {
            return Err(ReassemblyError::FrameTooLarge {
                total_length: data.len(),
                max_segments: u8::MAX as usize,
            });
        }

        let sequence_id = self.next_sequence_id;
        self.next_sequence_id = self.next_sequence_id.wrapping_add(1);

        let fragments = data
            .chunks(MAX_FRAGMENT_PAYLOAD)
            .enumerate()
            .map(|(segment_id, chunk)| Fragment {
                header: FragmentHeader { frame_type, frame_side },
                metadata: FrameMetadata {
                    video_name: self.video_name,
                    sequence_id,
                    segment_id: segment_id as u8,
                    num_segments: num_segments as u8,
                    total_length: data.len() as u32,
                    length: chunk.len() as u16,
                },
                payload: Bytes::copy_from_slice(chunk),
            })
            .collect();

        Ok(fragments)
    }

    /// Fragments and transmits one frame. Returns `false` if any fragment failed to
    /// send (the remainder of the frame is not sent - the receiver would drop the
    /// partial frame anyway).
    pub async fn send_frame(
        &mut self,
        sink: &dyn DatagramSink,
        frame_type: FrameType,
        frame_side: FrameSide,
        data: &[u8],
        mut progress: Option<ProgressFn<'_>>,
    ) -> bool {
        let fragments = match self.fragment(frame_type, frame_side, data) {
            Ok(fragments) => fragments,
            Err(e) => {
                error!("cannot fragment frame: {}", e);
                return false;
            }
        };

        let total = data.len();
        let mut sent = 0usize;
        for fragment in fragments {
            let payload_len = fragment.payload.len();
            if !sink.send(fragment.encode()).await {
                error!("failed to transmit fragment {} of frame {}", fragment.metadata.segment_id, fragment.metadata.sequence_id);
                return false;
            }
            sent += payload_len;
            if let Some(progress) = progress.as_mut() {
                progress(sent, total);
            }
        }
        trace!("sent frame of {} bytes in {} fragments", total, total.div_ceil(MAX_FRAGMENT_PAYLOAD).max(1));
        true
    }
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new()
    }
}
