use std::net::IpAddr;
use std::time::Duration;


/// All tunables of the link in one place, defaults matching the deployed protocol.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Command/reply channel. The adapter is bound locally and retargeted to the
    /// device once it is discovered or explicitly connected.
    pub controller_port: u16,
    /// Inbound video fragments. Port 5000 is the legacy default of older firmware.
    pub video_in_port: u16,
    /// Outbound video fragments (training/playback upload to the vehicle).
    pub video_out_port: u16,
    pub video_out_host: IpAddr,
    pub telemetry_port: u16,

    /// Well-known hostname the vehicle announces on the local network.
    pub device_hostname: String,
    pub discovery_retry_interval: Duration,

    pub ping_interval: Duration,
    pub watchdog_tick: Duration,
    /// Consecutive silent watchdog ticks before the link is declared disconnected.
    pub watchdog_silence_ticks: u32,
    /// Upper bound on waiting for worker tasks during shutdown.
    pub shutdown_join_timeout: Duration,

    /// Receive buffer per datagram; the maximum UDP payload.
    pub recv_buffer_size: usize,
    pub ingest_buffer_capacity: usize,
    pub frame_buffer_capacity: usize,
    pub telemetry_buffer_capacity: usize,

    /// Weight of the newest inter-arrival sample in the smoothed FPS estimate.
    pub fps_smoothing_alpha: f64,
    /// Minimum distance between FPS samples, so frames arriving in one receive batch
    /// do not pollute the estimate with near-zero intervals.
    pub fps_resample_interval: Duration,
}

impl LinkConfig {
    pub const LEGACY_VIDEO_PORT: u16 = 5000;

    pub fn new() -> LinkConfig {
        LinkConfig {
            controller_port: 65000,
            video_in_port: 5005,
            video_out_port: 5005,
            video_out_host: IpAddr::from([192, 168, 1, 10]),
            telemetry_port: 6000,
            device_hostname: "rc-car-machine.local".to_string(),
            discovery_retry_interval: Duration::from_secs(5),
            ping_interval: Duration::from_secs(2),
            watchdog_tick: Duration::from_secs(1),
            watchdog_silence_ticks: 5,
            shutdown_join_timeout: Duration::from_secs(2),
            recv_buffer_size: 65507,
            ingest_buffer_capacity: 100,
            frame_buffer_capacity: 100,
            telemetry_buffer_capacity: 100,
            fps_smoothing_alpha: 0.3,
            fps_resample_interval: Duration::from_secs(1),
        }
    }

    /// Defaults for devices running firmware that still streams video on port 5000.
    pub fn for_legacy_firmware() -> LinkConfig {
        LinkConfig {
            video_in_port: Self::LEGACY_VIDEO_PORT,
            ..Self::new()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}
