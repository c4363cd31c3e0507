use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::command::bus::Command;
use crate::command::wire::{CommandId, CommandValue};


/// Sub-commands of the camera subsystem, carried as the extra payload of a
/// `CameraSetMode` request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CamCommand {
    SetFrameRate = 0,
    StartStream = 1,
    StopStream = 2,
    StreamMode = 3,
    SelectMode = 4,
    ClearVideoRecording = 5,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CamStreamMode {
    Camera = 0,
    Sim = 1,
}

/// Rendering mode of the onboard camera pipeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CamVideoMode {
    Regular = 0,
    Depth = 1,
    Training = 2,
}


/// Nested camera command record: `command: u8` + the same 4-byte value union the
/// outer request uses. 5 bytes, packed, little-endian.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CameraCommand {
    pub command: CamCommand,
    pub value: CommandValue,
}

impl CameraCommand {
    pub const SIZE: usize = 5;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u8(self.command.into());
        buf.put_slice(&self.value.encode());
        buf.freeze()
    }

    fn into_command(self) -> Command {
        Command::new(CommandId::CameraSetMode, CommandValue::I32(0))
            .with_payload(self.encode())
    }
}


/// Selects whether the vehicle streams its camera or the simulated feed.
pub fn stream_mode_command(mode: CamStreamMode) -> Command {
    CameraCommand {
        command: CamCommand::StreamMode,
        value: CommandValue::U8(mode.into()),
    }
    .into_command()
}

/// Switches the camera rendering mode (regular/depth/training).
pub fn video_mode_command(mode: CamVideoMode) -> Command {
    CameraCommand {
        command: CamCommand::SelectMode,
        value: CommandValue::U8(mode.into()),
    }
    .into_command()
}

/// Clears the onboard video recording buffer before a new upload starts.
pub fn clear_video_recording_command() -> Command {
    CameraCommand {
        command: CamCommand::ClearVideoRecording,
        value: CommandValue::U8(0),
    }
    .into_command()
}
