use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::info;

use crate::command::bus::{Command, CommandBus};
use crate::command::wire::CommandId;
use crate::config::LinkConfig;
use crate::events::{DeviceConnectedData, LinkEvent, LinkEventNotifier};
use crate::transport::{AdapterRegistry, DatagramHandler};
use crate::util::ring::RingBuffer;
use crate::video::engine::{FrameOutputs, ReassemblyEngine};
use crate::video::fragment::{Fragmenter, ProgressFn};
use crate::video::wire::{FrameSide, FrameType};


const CONTROLLER_ADAPTER: &str = "controller";
const VIDEO_IN_ADAPTER: &str = "video_in";
const VIDEO_OUT_ADAPTER: &str = "video_out";
const TELEMETRY_ADAPTER: &str = "telemetry";


/// Routes controller replies into the command bus. Runs on the controller adapter's
/// receive task.
struct ReplyHandler {
    bus: Arc<CommandBus>,
}

#[async_trait::async_trait]
impl DatagramHandler for ReplyHandler {
    async fn handle_datagram(&self, data: Bytes) {
        self.bus.process_reply(&data);
    }
}

/// Buffers raw telemetry datagrams for polling consumers.
struct TelemetryHandler {
    buffer: Arc<RingBuffer<Bytes>>,
}

#[async_trait::async_trait]
impl DatagramHandler for TelemetryHandler {
    async fn handle_datagram(&self, data: Bytes) {
        self.buffer.push(data);
    }
}


/// The complete device link: command bus, video reassembly, video upload and
/// telemetry over four UDP channels, plus device discovery.
///
/// Lifecycle: [open](CarLink::open) binds the sockets, [start](CarLink::start) spawns
/// the worker tasks, [connect_to_device](CarLink::connect_to_device) targets a
/// concrete device (typically one announced via a `DeviceFound` event), and
/// [shutdown](CarLink::shutdown) tears everything down.
pub struct CarLink {
    config: Arc<LinkConfig>,
    events: Arc<LinkEventNotifier>,
    registry: AdapterRegistry,
    bus: Arc<CommandBus>,
    engine: ReassemblyEngine,
    telemetry: Arc<RingBuffer<Bytes>>,
    fragmenter: tokio::sync::Mutex<Fragmenter>,
}

impl CarLink {
    /// Binds all four channels. Inbound adapters (controller, video in, telemetry)
    /// get their receive tasks immediately; the controller and video-out adapters
    /// remain untargeted until a device is connected.
    pub async fn open(config: LinkConfig) -> anyhow::Result<CarLink> {
        let config = Arc::new(config);
        let events = Arc::new(LinkEventNotifier::new());
        let registry = AdapterRegistry::new(config.clone(), events.clone());

        // the bus sends on the same adapter its reply handler listens on, so the
        // receive task is started only after the bus exists
        let controller = registry
            .open_adapter(CONTROLLER_ADAPTER, config.controller_port, None, None)
            .await?;
        let bus = Arc::new(CommandBus::new(controller, config.clone(), events.clone()));
        registry.start_receiver(CONTROLLER_ADAPTER, Arc::new(ReplyHandler { bus: bus.clone() }));

        let engine = ReassemblyEngine::new(&config);
        registry
            .open_adapter(VIDEO_IN_ADAPTER, config.video_in_port, None, Some(engine.ingest_handler()))
            .await?;

        registry
            .open_adapter(VIDEO_OUT_ADAPTER, config.video_out_port, Some(config.video_out_host), None)
            .await?;

        let telemetry = Arc::new(RingBuffer::new(config.telemetry_buffer_capacity));
        registry
            .open_adapter(
                TELEMETRY_ADAPTER,
                config.telemetry_port,
                None,
                Some(Arc::new(TelemetryHandler { buffer: telemetry.clone() })),
            )
            .await?;

        Ok(CarLink {
            config,
            events,
            registry,
            bus,
            engine,
            telemetry,
            fragmenter: tokio::sync::Mutex::new(Fragmenter::new()),
        })
    }

    /// Spawns the dispatch, ping, watchdog and reassembly tasks. Idempotent.
    pub fn start(&self) {
        self.bus.start();
        self.engine.start();
    }

    /// Begins hostname-based device search; results arrive as `DeviceFound` events.
    pub fn start_discovery(&self) {
        self.registry.start_discovery();
    }

    /// Targets the command and video-upload channels at the device, arms the
    /// watchdog and sends an initial no-op so the device learns our reply address.
    pub fn connect_to_device(&self, ip: IpAddr) {
        info!("connecting to device at {}", ip);
        for name in [CONTROLLER_ADAPTER, VIDEO_OUT_ADAPTER] {
            if let Some(adapter) = self.registry.get_adapter(name) {
                adapter.set_server_ip(ip);
            }
        }
        self.bus.set_connected(true);
        self.bus.submit(Command::new(CommandId::Noop, 0));
        self.events.send_event(LinkEvent::DeviceConnected(DeviceConnectedData { ip }));
    }

    pub fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    /// Enqueues a command for the device; never blocks.
    pub fn submit(&self, cmd: impl Into<Command>) {
        self.bus.submit(cmd);
    }

    /// The reassembled frame buffers (mono, stereo, disparity).
    pub fn frames(&self) -> FrameOutputs {
        self.engine.outputs()
    }

    /// The next buffered telemetry datagram, if any.
    pub fn poll_telemetry(&self) -> Option<Bytes> {
        self.telemetry.pop()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// The source label stamped on subsequently uploaded frames.
    pub async fn set_video_source_name(&self, name: &str) {
        self.fragmenter.lock().await.set_source_name(name);
    }

    /// Fragments and uploads one frame on the video-out channel. Returns `false` if
    /// any fragment failed to send.
    pub async fn send_video_frame(
        &self,
        frame_type: FrameType,
        frame_side: FrameSide,
        data: &[u8],
        progress: Option<ProgressFn<'_>>,
    ) -> bool {
        let Some(adapter) = self.registry.get_adapter(VIDEO_OUT_ADAPTER) else {
            return false;
        };
        self.fragmenter.lock().await
            .send_frame(adapter.as_ref(), frame_type, frame_side, data, progress)
            .await
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Stops all worker tasks and closes the sockets.
    pub async fn shutdown(&self) {
        self.bus.shutdown().await;
        self.engine.shutdown().await;
        self.registry.shutdown_all();
        info!("link shut down");
    }
}
