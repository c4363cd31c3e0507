use std::net::IpAddr;

use tokio::sync::broadcast;
use tracing::trace;


/// Lifecycle notifications surfaced to external collaborators (UI, reconnect flow).
/// The link itself never acts on these beyond emitting them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LinkEvent {
    /// Device discovery resolved the well-known hostname to a new IP.
    DeviceFound(DeviceFoundData),
    /// `connect_to_device` completed and the command channel is targeted.
    DeviceConnected(DeviceConnectedData),
    /// The watchdog saw its full silence window with no traffic. This is the only
    /// disconnect-detection mechanism in the protocol.
    DeviceDisconnected,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceFoundData {
    pub ip: IpAddr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceConnectedData {
    pub ip: IpAddr,
}


pub struct LinkEventNotifier {
    sender: broadcast::Sender<LinkEvent>,
}
impl LinkEventNotifier {
    pub fn new() -> LinkEventNotifier {
        let (sender, _) = broadcast::channel(128);

        LinkEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: LinkEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for LinkEventNotifier {
    fn default() -> Self {
        Self::new()
    }
}
