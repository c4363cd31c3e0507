use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::LinkConfig;
use crate::transport::DatagramHandler;
use crate::util::ring::RingBuffer;
use crate::video::reassembly::ReassemblyContext;
use crate::video::sensor::{split_sensor_frame, SensorMetadata};
use crate::video::wire::{Fragment, FrameSide, FrameType};


/// A complete single-camera frame. The image bytes are still in their on-wire
/// encoding; decoding is left to the consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct MonoFrame {
    pub image: Bytes,
    /// Source label from the fragment metadata (training playback file name).
    pub video_name: String,
    pub fps: f64,
}

/// Both eyes of a stereo pair, matched by frame id. A pair is only delivered once
/// both sides have fully reassembled.
#[derive(Clone, Debug, PartialEq)]
pub struct StereoFrame {
    pub left: Bytes,
    pub right: Bytes,
    pub fps: f64,
}

/// A disparity frame: the sensor record that prefixes the stream plus the encoded
/// disparity image.
#[derive(Clone, Debug, PartialEq)]
pub struct DisparityFrame {
    pub sensor: SensorMetadata,
    pub image: Bytes,
    pub fps: f64,
}


/// The per-kind output buffers handed to frame consumers. Oldest frames are evicted
/// when a consumer falls behind.
#[derive(Clone)]
pub struct FrameOutputs {
    pub mono: Arc<RingBuffer<MonoFrame>>,
    pub stereo: Arc<RingBuffer<StereoFrame>>,
    pub disparity: Arc<RingBuffer<DisparityFrame>>,
}

impl FrameOutputs {
    fn new(capacity: usize) -> FrameOutputs {
        FrameOutputs {
            mono: Arc::new(RingBuffer::new(capacity)),
            stereo: Arc::new(RingBuffer::new(capacity)),
            disparity: Arc::new(RingBuffer::new(capacity)),
        }
    }
}


/// Exponentially smoothed frames-per-second estimate. Samples are taken at least
/// `resample_interval` apart so frames drained from the socket in one batch do not
/// produce near-zero intervals.
struct FpsEstimator {
    alpha: f64,
    resample_interval: std::time::Duration,
    last_sample: Option<Instant>,
    frames_since_sample: u32,
    fps: f64,
}

impl FpsEstimator {
    fn new(config: &LinkConfig) -> FpsEstimator {
        FpsEstimator {
            alpha: config.fps_smoothing_alpha,
            resample_interval: config.fps_resample_interval,
            last_sample: None,
            frames_since_sample: 0,
            fps: 0.0,
        }
    }

    /// Registers one completed frame, returns the current estimate.
    fn on_frame(&mut self, now: Instant) -> f64 {
        let Some(last) = self.last_sample else {
            self.last_sample = Some(now);
            return self.fps;
        };

        self.frames_since_sample += 1;
        let elapsed = now - last;
        if elapsed >= self.resample_interval {
            let sample = self.frames_since_sample as f64 / elapsed.as_secs_f64();
            self.fps = if self.fps == 0.0 {
                sample
            } else {
                self.alpha * sample + (1.0 - self.alpha) * self.fps
            };
            self.last_sample = Some(now);
            self.frames_since_sample = 0;
        }
        self.fps
    }
}


/// All mutable reassembly state, owned by the engine task (tests drive it directly).
/// Stereo sides reassemble independently and are reconciled by frame id once both
/// complete.
struct EngineState {
    mono: ReassemblyContext,
    stereo_left: ReassemblyContext,
    stereo_right: ReassemblyContext,
    disparity: ReassemblyContext,

    completed_left: Option<(u32, Bytes)>,
    completed_right: Option<(u32, Bytes)>,

    mono_fps: FpsEstimator,
    stereo_fps: FpsEstimator,
    disparity_fps: FpsEstimator,

    outputs: FrameOutputs,
}

impl EngineState {
    fn new(config: &LinkConfig, outputs: FrameOutputs) -> EngineState {
        EngineState {
            mono: ReassemblyContext::new("mono"),
            stereo_left: ReassemblyContext::new("stereo/left"),
            stereo_right: ReassemblyContext::new("stereo/right"),
            disparity: ReassemblyContext::new("disparity"),
            completed_left: None,
            completed_right: None,
            mono_fps: FpsEstimator::new(config),
            stereo_fps: FpsEstimator::new(config),
            disparity_fps: FpsEstimator::new(config),
            outputs,
        }
    }

    fn handle_datagram(&mut self, data: &[u8]) {
        let fragment = match Fragment::try_decode(data) {
            Ok(fragment) => fragment,
            Err(e) => {
                debug!("dropping malformed video datagram: {}", e);
                return;
            }
        };

        match fragment.header.frame_type {
            FrameType::Mono => {
                let video_name = fragment.metadata.video_name_str();
                if let Some(image) = self.mono.accept(&fragment.metadata, fragment.payload) {
                    let fps = self.mono_fps.on_frame(Instant::now());
                    self.outputs.mono.push(MonoFrame { image, video_name, fps });
                }
            }
            FrameType::Stereo => {
                let side = fragment.header.frame_side;
                let sequence_id = fragment.metadata.sequence_id;
                let ctx = match side {
                    FrameSide::Left => &mut self.stereo_left,
                    FrameSide::Right => &mut self.stereo_right,
                };
                if let Some(image) = ctx.accept(&fragment.metadata, fragment.payload) {
                    self.on_stereo_side(side, sequence_id, image);
                }
            }
            FrameType::Disparity => {
                let sequence_id = fragment.metadata.sequence_id;
                if let Some(assembled) = self.disparity.accept(&fragment.metadata, fragment.payload) {
                    match split_sensor_frame(&assembled) {
                        Ok((sensor, image)) => {
                            let fps = self.disparity_fps.on_frame(Instant::now());
                            self.outputs.disparity.push(DisparityFrame { sensor, image, fps });
                        }
                        Err(e) => {
                            warn!("dropping disparity frame {}: {}", sequence_id, e);
                        }
                    }
                }
            }
        }
    }

    /// One stereo side finished. Emits a pair when the other side holds the same frame
    /// id; a completed side with a different id is stale and is dropped.
    fn on_stereo_side(&mut self, side: FrameSide, sequence_id: u32, image: Bytes) {
        let other = match side {
            FrameSide::Left => &mut self.completed_right,
            FrameSide::Right => &mut self.completed_left,
        };

        match other.take_if(|(other_id, _)| *other_id == sequence_id) {
            Some((_, other_image)) => {
                let (left, right) = match side {
                    FrameSide::Left => (image, other_image),
                    FrameSide::Right => (other_image, image),
                };
                let fps = self.stereo_fps.on_frame(Instant::now());
                self.outputs.stereo.push(StereoFrame { left, right, fps });
            }
            None => {
                if let Some((stale_id, _)) = other {
                    warn!("dropping unmatched {:?} stereo frame {}", side.opposite(), stale_id);
                    *other = None;
                }
                let own = match side {
                    FrameSide::Left => &mut self.completed_left,
                    FrameSide::Right => &mut self.completed_right,
                };
                if let Some((replaced_id, _)) = own.replace((sequence_id, image)) {
                    warn!("dropping unmatched {:?} stereo frame {}", side, replaced_id);
                }
            }
        }
    }
}

impl FrameSide {
    fn opposite(self) -> FrameSide {
        match self {
            FrameSide::Left => FrameSide::Right,
            FrameSide::Right => FrameSide::Left,
        }
    }
}


/// Pushes raw video datagrams into the engine's ingest buffer. Runs on the adapter's
/// receive task, so it only enqueues.
pub struct IngestHandler {
    ingest: Arc<RingBuffer<Bytes>>,
}

#[async_trait::async_trait]
impl DatagramHandler for IngestHandler {
    async fn handle_datagram(&self, data: Bytes) {
        self.ingest.push(data);
    }
}


/// Owns the reassembly task: drains the ingest buffer, reassembles frames and fans
/// them out to the per-kind output buffers.
pub struct ReassemblyEngine {
    config: LinkConfig,
    ingest: Arc<RingBuffer<Bytes>>,
    outputs: FrameOutputs,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReassemblyEngine {
    pub fn new(config: &LinkConfig) -> ReassemblyEngine {
        let (shutdown, _) = watch::channel(false);
        ReassemblyEngine {
            config: config.clone(),
            ingest: Arc::new(RingBuffer::new(config.ingest_buffer_capacity)),
            outputs: FrameOutputs::new(config.frame_buffer_capacity),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// The handler to register on the inbound video adapter.
    pub fn ingest_handler(&self) -> Arc<IngestHandler> {
        Arc::new(IngestHandler { ingest: self.ingest.clone() })
    }

    pub fn outputs(&self) -> FrameOutputs {
        self.outputs.clone()
    }

    /// Spawns the reassembly task. Idempotent.
    pub fn start(&self) {
        let mut task = self.task.lock().expect("engine task lock poisoned");
        if task.is_some() {
            return;
        }

        let mut state = EngineState::new(&self.config, self.outputs.clone());
        let ingest = self.ingest.clone();
        let mut shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(async move {
            loop {
                select! {
                    // Err means the engine was dropped; the task must die either way
                    _ = shutdown.wait_for(|s| *s) => break,
                    data = ingest.pop_wait() => {
                        state.handle_datagram(&data);
                    }
                }
            }
            debug!("reassembly task terminating");
        }));
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().expect("engine task lock poisoned").take();
        if let Some(task) = task {
            if tokio::time::timeout(self.config.shutdown_join_timeout, task).await.is_err() {
                warn!("reassembly task did not terminate within the join timeout");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::fragment::Fragmenter;

    fn test_config() -> LinkConfig {
        LinkConfig::new()
    }

    fn state() -> (EngineState, FrameOutputs) {
        let outputs = FrameOutputs::new(16);
        (EngineState::new(&test_config(), outputs.clone()), outputs)
    }

    fn datagrams(frame_type: FrameType, frame_side: FrameSide, data: &[u8], fragmenter: &mut Fragmenter) -> Vec<Bytes> {
        fragmenter
            .fragment(frame_type, frame_side, data)
            .unwrap()
            .into_iter()
            .map(|f| f.encode())
            .collect()
    }

    fn image(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(seed)).collect()
    }

    #[test]
    fn test_mono_frame_reassembles_across_fragments() {
        let (mut state, outputs) = state();
        let mut fragmenter = Fragmenter::new();
        fragmenter.set_source_name("track.mov");
        let data = image(crate::video::wire::MAX_FRAGMENT_PAYLOAD + 500, 3);

        for datagram in datagrams(FrameType::Mono, FrameSide::Left, &data, &mut fragmenter) {
            state.handle_datagram(&datagram);
        }

        let frame = outputs.mono.pop().unwrap();
        assert_eq!(frame.image, Bytes::from(data));
        assert_eq!(frame.video_name, "track.mov");
        assert!(outputs.mono.pop().is_none());
    }

    #[test]
    fn test_fragment_arrival_order_does_not_matter() {
        let data = image(3 * crate::video::wire::MAX_FRAGMENT_PAYLOAD, 7);

        let mut fragmenter = Fragmenter::new();
        let mut reference = datagrams(FrameType::Mono, FrameSide::Left, &data, &mut fragmenter);
        reference.rotate_left(1);
        reference.swap(0, 1);

        let (mut state, outputs) = state();
        for datagram in reference {
            state.handle_datagram(&datagram);
        }

        assert_eq!(outputs.mono.pop().unwrap().image, Bytes::from(data));
    }

    #[test]
    fn test_withheld_fragment_blocks_delivery() {
        let (mut state, outputs) = state();
        let mut fragmenter = Fragmenter::new();
        let data = image(2 * crate::video::wire::MAX_FRAGMENT_PAYLOAD, 5);

        let mut fragments = datagrams(FrameType::Mono, FrameSide::Left, &data, &mut fragmenter);
        fragments.pop();
        for datagram in fragments {
            state.handle_datagram(&datagram);
        }

        assert!(outputs.mono.pop().is_none());
    }

    #[test]
    fn test_stereo_pair_requires_both_sides() {
        let (mut state, outputs) = state();
        let mut fragmenter = Fragmenter::new();
        let left = image(1000, 2);
        let right = image(1000, 9);

        for datagram in datagrams(FrameType::Stereo, FrameSide::Left, &left, &mut fragmenter) {
            state.handle_datagram(&datagram);
        }
        assert!(outputs.stereo.pop().is_none());

        // the right side of the same frame id
        let mut right_fragmenter = Fragmenter::new();
        for datagram in datagrams(FrameType::Stereo, FrameSide::Right, &right, &mut right_fragmenter) {
            state.handle_datagram(&datagram);
        }

        let pair = outputs.stereo.pop().unwrap();
        assert_eq!(pair.left, Bytes::from(left));
        assert_eq!(pair.right, Bytes::from(right));
    }

    #[test]
    fn test_stereo_sides_complete_independently_with_different_segment_counts() {
        let (mut state, outputs) = state();
        let left = image(2 * crate::video::wire::MAX_FRAGMENT_PAYLOAD + 100, 2);
        let right = image(4 * crate::video::wire::MAX_FRAGMENT_PAYLOAD + 100, 9);

        let mut left_frag = Fragmenter::new();
        let mut right_frag = Fragmenter::new();
        let left_datagrams = datagrams(FrameType::Stereo, FrameSide::Left, &left, &mut left_frag);
        let right_datagrams = datagrams(FrameType::Stereo, FrameSide::Right, &right, &mut right_frag);
        assert_eq!(left_datagrams.len(), 3);
        assert_eq!(right_datagrams.len(), 5);

        // interleave the sides; the left completes while the right is still short
        // one segment, which must not emit anything
        for i in 0..4 {
            if i < 3 {
                state.handle_datagram(&left_datagrams[i]);
            }
            state.handle_datagram(&right_datagrams[i]);
        }
        assert!(outputs.stereo.pop().is_none());

        state.handle_datagram(&right_datagrams[4]);

        let pair = outputs.stereo.pop().unwrap();
        assert_eq!(pair.left, Bytes::from(left));
        assert_eq!(pair.right, Bytes::from(right));
        assert!(outputs.stereo.pop().is_none());
    }

    #[test]
    fn test_interleaved_stereo_sides_reconcile_by_frame_id() {
        let (mut state, outputs) = state();
        let left = image(600, 2);
        let right = image(600, 9);

        let mut left_frag = Fragmenter::new();
        let mut right_frag = Fragmenter::new();

        // left completes frames 0..3, right only frame 2
        for _ in 0..2 {
            for datagram in datagrams(FrameType::Stereo, FrameSide::Left, &left, &mut left_frag) {
                state.handle_datagram(&datagram);
            }
            let _ = datagrams(FrameType::Stereo, FrameSide::Right, &right, &mut right_frag);
        }
        for datagram in datagrams(FrameType::Stereo, FrameSide::Left, &left, &mut left_frag) {
            state.handle_datagram(&datagram);
        }
        for datagram in datagrams(FrameType::Stereo, FrameSide::Right, &right, &mut right_frag) {
            state.handle_datagram(&datagram);
        }

        let pair = outputs.stereo.pop().unwrap();
        assert_eq!(pair.left, Bytes::from(left));
        assert_eq!(pair.right, Bytes::from(right));
        assert!(outputs.stereo.pop().is_none());
    }

    #[test]
    fn test_disparity_frame_splits_sensor_prefix() {
        let (mut state, outputs) = state();
        let mut fragmenter = Fragmenter::new();

        let sensor = SensorMetadata {
            gyro: [1.0, 2.0, 3.0],
            accel: [0.0, -9.81, 0.0],
            rows: 400,
            cols: 640,
            image_type: 16,
            channels: 1,
            reprojection: [0.25; 16],
        };
        let disparity_image = image(5000, 11);
        let mut payload = sensor.encode().to_vec();
        payload.extend_from_slice(&disparity_image);

        for datagram in datagrams(FrameType::Disparity, FrameSide::Left, &payload, &mut fragmenter) {
            state.handle_datagram(&datagram);
        }

        let frame = outputs.disparity.pop().unwrap();
        assert_eq!(frame.sensor, sensor);
        assert_eq!(frame.image, Bytes::from(disparity_image));
    }

    #[test]
    fn test_disparity_frame_shorter_than_sensor_record_is_dropped() {
        let (mut state, outputs) = state();
        let mut fragmenter = Fragmenter::new();

        for datagram in datagrams(FrameType::Disparity, FrameSide::Left, &[0u8; 50], &mut fragmenter) {
            state.handle_datagram(&datagram);
        }

        assert!(outputs.disparity.pop().is_none());
    }

    #[test]
    fn test_superseded_mono_frame_is_dropped() {
        let (mut state, outputs) = state();
        let mut fragmenter = Fragmenter::new();
        let first = image(2 * crate::video::wire::MAX_FRAGMENT_PAYLOAD, 3);
        let second = image(800, 5);

        let mut incomplete = datagrams(FrameType::Mono, FrameSide::Left, &first, &mut fragmenter);
        incomplete.pop();
        for datagram in incomplete {
            state.handle_datagram(&datagram);
        }
        for datagram in datagrams(FrameType::Mono, FrameSide::Left, &second, &mut fragmenter) {
            state.handle_datagram(&datagram);
        }

        assert_eq!(outputs.mono.pop().unwrap().image, Bytes::from(second));
        assert!(outputs.mono.pop().is_none());
    }

    #[test]
    fn test_garbage_datagram_is_ignored() {
        let (mut state, outputs) = state();

        state.handle_datagram(&[0xFF; 300]);
        state.handle_datagram(&[]);

        assert!(outputs.mono.pop().is_none());
        assert!(outputs.stereo.pop().is_none());
        assert!(outputs.disparity.pop().is_none());
    }

    #[test]
    fn test_fps_estimator_ignores_burst_arrivals() {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
            .block_on(async {
                let mut fps = FpsEstimator::new(&test_config());

                assert_eq!(fps.on_frame(Instant::now()), 0.0);

                // 10 frames spread over one second, plus a burst in the same instant
                for _ in 0..10 {
                    tokio::time::advance(std::time::Duration::from_millis(100)).await;
                    fps.on_frame(Instant::now());
                }
                let estimate = fps.on_frame(Instant::now());
                assert!((estimate - 10.0).abs() < 1.5, "estimate was {}", estimate);

                // a burst within the resample window must not spike the estimate
                for _ in 0..100 {
                    fps.on_frame(Instant::now());
                }
                let after_burst = fps.on_frame(Instant::now());
                assert_eq!(after_burst, estimate);
            });
    }

    #[tokio::test]
    async fn test_engine_task_moves_datagrams_from_ingest_to_outputs() {
        let engine = ReassemblyEngine::new(&test_config());
        let handler = engine.ingest_handler();
        let outputs = engine.outputs();
        engine.start();

        let mut fragmenter = Fragmenter::new();
        let data = image(1200, 3);
        for datagram in datagrams(FrameType::Mono, FrameSide::Left, &data, &mut fragmenter) {
            handler.handle_datagram(datagram).await;
        }

        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), outputs.mono.pop_wait())
            .await
            .unwrap();
        assert_eq!(frame.image, Bytes::from(data));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_exits_when_engine_is_dropped_without_shutdown() {
        let engine = ReassemblyEngine::new(&test_config());
        engine.start();
        let task = engine.task.lock().unwrap().take().unwrap();

        drop(engine);

        // dropping the engine closes the shutdown channel, which must end the task
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
