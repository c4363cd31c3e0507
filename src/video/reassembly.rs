use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::ReassemblyError;
use crate::video::wire::FrameMetadata;


/// Collects the fragments of one frame at a time. A newer frame id supersedes an
/// incomplete older one; nothing is delivered downstream until every segment of the
/// active frame has arrived.
pub struct ReassemblyContext {
    label: &'static str,
    active_frame_id: Option<u32>,
    expected_segments: u8,
    segments: FxHashMap<u8, Bytes>,
}

impl ReassemblyContext {
    pub fn new(label: &'static str) -> ReassemblyContext {
        ReassemblyContext {
            label,
            active_frame_id: None,
            expected_segments: 0,
            segments: FxHashMap::default(),
        }
    }

    /// Feeds one fragment into the context. Returns the fully reassembled frame once
    /// the final missing segment arrives, `None` otherwise.
    pub fn accept(&mut self, metadata: &FrameMetadata, payload: Bytes) -> Option<Bytes> {
        match self.active_frame_id {
            Some(active) if active == metadata.sequence_id => {
                if metadata.num_segments != self.expected_segments {
                    warn!("{}: frame {} changed from {} to {} segments mid-flight, restarting it",
                        self.label, active, self.expected_segments, metadata.num_segments);
                    self.segments.clear();
                    self.expected_segments = metadata.num_segments;
                }
            }
            Some(active) => {
                warn!("{}: frame {} superseded by frame {} with {} of {} segments collected",
                    self.label, active, metadata.sequence_id, self.segments.len(), self.expected_segments);
                self.start_frame(metadata);
            }
            None => {
                self.start_frame(metadata);
            }
        }

        if metadata.segment_id >= self.expected_segments {
            let e = ReassemblyError::SegmentOutOfRange {
                sequence_id: metadata.sequence_id,
                segment_id: metadata.segment_id,
                num_segments: self.expected_segments,
            };
            warn!("{}: {}", self.label, e);
            return None;
        }

        self.segments.insert(metadata.segment_id, payload);

        if self.segments.len() == self.expected_segments as usize {
            match self.assemble(metadata.sequence_id) {
                Ok(frame) => {
                    debug!("{}: completed frame {} of {} bytes", self.label, metadata.sequence_id, frame.len());
                    self.reset();
                    return Some(frame);
                }
                Err(e) => {
                    warn!("{}: {}", self.label, e);
                    self.reset();
                }
            }
        }
        None
    }

    fn start_frame(&mut self, metadata: &FrameMetadata) {
        self.active_frame_id = Some(metadata.sequence_id);
        self.expected_segments = metadata.num_segments;
        self.segments.clear();
    }

    fn reset(&mut self) {
        self.active_frame_id = None;
        self.expected_segments = 0;
        self.segments.clear();
    }

    fn assemble(&self, sequence_id: u32) -> Result<Bytes, ReassemblyError> {
        let total: usize = self.segments.values().map(|s| s.len()).sum();
        let mut assembled = BytesMut::with_capacity(total);
        for segment_id in 0..self.expected_segments {
            let segment = self.segments.get(&segment_id).ok_or(ReassemblyError::MissingSegment {
                sequence_id,
                segment_id,
                num_segments: self.expected_segments,
            })?;
            assembled.put_slice(segment);
        }
        Ok(assembled.freeze())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::wire::encode_video_name;

    fn metadata(sequence_id: u32, segment_id: u8, num_segments: u8, total_length: u32, length: u16) -> FrameMetadata {
        FrameMetadata {
            video_name: encode_video_name(""),
            sequence_id,
            segment_id,
            num_segments,
            total_length,
            length,
        }
    }

    #[test]
    fn test_single_segment_frame_completes_immediately() {
        let mut ctx = ReassemblyContext::new("test");

        let result = ctx.accept(&metadata(7, 0, 1, 4, 4), Bytes::from_static(b"abcd"));
        assert_eq!(result, Some(Bytes::from_static(b"abcd")));
    }

    #[test]
    fn test_out_of_order_segments_reassemble_identically() {
        let segments: Vec<Bytes> = vec![
            Bytes::from_static(b"aaa"),
            Bytes::from_static(b"bbb"),
            Bytes::from_static(b"cc"),
        ];
        let total = 8u32;

        let mut in_order = ReassemblyContext::new("in_order");
        let mut result = None;
        for (i, seg) in segments.iter().enumerate() {
            result = in_order.accept(&metadata(1, i as u8, 3, total, seg.len() as u16), seg.clone());
        }
        let expected = result.unwrap();
        assert_eq!(expected, Bytes::from_static(b"aaabbbcc"));

        for permutation in [[2usize, 0, 1], [1, 2, 0], [2, 1, 0]] {
            let mut ctx = ReassemblyContext::new("permuted");
            let mut result = None;
            for &i in &permutation {
                let seg = &segments[i];
                result = ctx.accept(&metadata(1, i as u8, 3, total, seg.len() as u16), seg.clone());
            }
            assert_eq!(result.unwrap(), expected);
        }
    }

    #[test]
    fn test_withheld_segment_never_completes() {
        let mut ctx = ReassemblyContext::new("test");

        assert_eq!(ctx.accept(&metadata(1, 0, 3, 9, 3), Bytes::from_static(b"aaa")), None);
        assert_eq!(ctx.accept(&metadata(1, 2, 3, 9, 3), Bytes::from_static(b"ccc")), None);
        // duplicate of an already-held segment does not count towards completion
        assert_eq!(ctx.accept(&metadata(1, 0, 3, 9, 3), Bytes::from_static(b"aaa")), None);
    }

    #[test]
    fn test_newer_frame_supersedes_incomplete_older_one() {
        let mut ctx = ReassemblyContext::new("test");

        assert_eq!(ctx.accept(&metadata(1, 0, 2, 6, 3), Bytes::from_static(b"old")), None);

        assert_eq!(ctx.accept(&metadata(2, 0, 2, 6, 3), Bytes::from_static(b"new")), None);
        let result = ctx.accept(&metadata(2, 1, 2, 6, 3), Bytes::from_static(b"two"));
        assert_eq!(result, Some(Bytes::from_static(b"newtwo")));
    }

    #[test]
    fn test_old_frame_also_supersedes_active_one() {
        // ids are not compared for ordering, any different id restarts the context
        let mut ctx = ReassemblyContext::new("test");

        assert_eq!(ctx.accept(&metadata(5, 0, 2, 6, 3), Bytes::from_static(b"aaa")), None);
        assert_eq!(ctx.accept(&metadata(3, 0, 1, 3, 3), Bytes::from_static(b"bbb")), Some(Bytes::from_static(b"bbb")));
    }

    #[test]
    fn test_segment_id_out_of_range_is_dropped() {
        let mut ctx = ReassemblyContext::new("test");

        assert_eq!(ctx.accept(&metadata(1, 2, 2, 6, 3), Bytes::from_static(b"xxx")), None);

        // the frame still completes from its valid segments
        assert_eq!(ctx.accept(&metadata(1, 0, 2, 6, 3), Bytes::from_static(b"aaa")), None);
        let result = ctx.accept(&metadata(1, 1, 2, 6, 3), Bytes::from_static(b"bbb"));
        assert_eq!(result, Some(Bytes::from_static(b"aaabbb")));
    }

    #[test]
    fn test_changed_segment_count_restarts_frame() {
        let mut ctx = ReassemblyContext::new("test");

        assert_eq!(ctx.accept(&metadata(1, 0, 3, 9, 3), Bytes::from_static(b"aaa")), None);

        // same frame id reappears claiming two segments: collected data is stale
        assert_eq!(ctx.accept(&metadata(1, 0, 2, 6, 3), Bytes::from_static(b"xxx")), None);
        let result = ctx.accept(&metadata(1, 1, 2, 6, 3), Bytes::from_static(b"yyy"));
        assert_eq!(result, Some(Bytes::from_static(b"xxxyyy")));
    }

    #[test]
    fn test_context_is_reusable_after_completion() {
        let mut ctx = ReassemblyContext::new("test");

        assert_eq!(ctx.accept(&metadata(1, 0, 1, 3, 3), Bytes::from_static(b"one")), Some(Bytes::from_static(b"one")));
        assert_eq!(ctx.accept(&metadata(2, 0, 1, 3, 3), Bytes::from_static(b"two")), Some(Bytes::from_static(b"two")));
    }
}
