pub mod adapter;
pub mod discovery;
pub mod registry;

use bytes::Bytes;

#[cfg(test)] use mockall::automock;

pub use adapter::UdpAdapter;
pub use registry::AdapterRegistry;


/// Fire-and-forget send seam. Implemented by [UdpAdapter]; mocked in tests so the
/// command bus and fragmenter can run without sockets.
///
/// Returns `false` on any socket error or missing destination - transport failures are
/// never surfaced as errors that could escape a worker loop.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait DatagramSink: Send + Sync + 'static {
    async fn send(&self, buf: Bytes) -> bool;
}


/// Consumer side of a bound adapter's receive task. Implementations must not block:
/// they run on the receive task and anything slow belongs behind a ring buffer.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait DatagramHandler: Send + Sync + 'static {
    async fn handle_datagram(&self, data: Bytes);
}
