pub mod engine;
pub mod fragment;
pub mod reassembly;
pub mod sensor;
pub mod wire;

pub use engine::{DisparityFrame, FrameOutputs, MonoFrame, ReassemblyEngine, StereoFrame};
pub use fragment::Fragmenter;
pub use sensor::SensorMetadata;
pub use wire::{FrameSide, FrameType};
