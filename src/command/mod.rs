pub mod bus;
pub mod camera;
pub mod watchdog;
pub mod wire;

pub use bus::{Command, CommandBus, ReplyCallback};
pub use wire::{CommandId, CommandValue, Reply};
