use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use crate::transport::DatagramSink;


/// Owns one UDP socket for one logical channel (controller, video-in, video-out,
/// telemetry). Created once per channel, torn down via [shutdown](UdpAdapter::shutdown).
///
/// An adapter is either *inbound* (bound to a local port, no initial destination) or
/// *outbound* (ephemeral local port, pre-configured destination). A discovery-bound
/// inbound adapter is retargeted later with [set_server_ip](UdpAdapter::set_server_ip).
pub struct UdpAdapter {
    socket: UdpSocket,
    remote: Mutex<Option<SocketAddr>>,
    /// destination port used when the adapter is retargeted by IP only
    remote_port: u16,
    shutdown: watch::Sender<bool>,
}

impl UdpAdapter {
    /// With a host, the adapter is outbound-only: it gets an ephemeral local port and
    /// `port` becomes the destination port. Without one, the socket is bound to `port`
    /// locally so datagrams can be received on it.
    pub async fn open(port: u16, host: Option<IpAddr>) -> anyhow::Result<UdpAdapter> {
        let socket = match host {
            None => UdpSocket::bind(("0.0.0.0", port)).await?,
            Some(_) => UdpSocket::bind(("0.0.0.0", 0)).await?,
        };
        let (shutdown, _) = watch::channel(false);

        debug!("opened UDP adapter on {:?}, remote {:?}:{}", socket.local_addr()?, host, port);

        Ok(UdpAdapter {
            socket,
            remote: Mutex::new(host.map(|h| SocketAddr::new(h, port))),
            remote_port: port,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Retargets the adapter, typically after device discovery resolved the host.
    pub fn set_server_ip(&self, ip: IpAddr) {
        let addr = SocketAddr::new(ip, self.remote_port);
        debug!("retargeting adapter to {}", addr);
        *self.remote.lock().expect("remote lock poisoned") = Some(addr);
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote.lock().expect("remote lock poisoned")
    }

    /// Fire-and-forget write to the pre-configured destination. `false` if no
    /// destination is configured or the socket write fails.
    pub async fn send(&self, buf: &[u8]) -> bool {
        let Some(to) = self.remote_addr() else {
            warn!("send on adapter without a destination - dropping {} bytes", buf.len());
            return false;
        };
        self.send_to(buf, to).await
    }

    pub async fn send_to(&self, buf: &[u8], to: SocketAddr) -> bool {
        match self.socket.send_to(buf, to).await {
            Ok(_) => true,
            Err(e) => {
                error!("failed to send {} bytes to {}: {}", buf.len(), to, e);
                false
            }
        }
    }

    /// Blocking read, resolved early by [shutdown](UdpAdapter::shutdown). `None` means
    /// "socket error or shutdown" - callers treat it as "try again" and poll
    /// [is_shutdown](UdpAdapter::is_shutdown) to terminate their loop.
    pub async fn recv(&self, max_size: usize) -> Option<Bytes> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return None;
        }

        let mut buf = vec![0u8; max_size];
        tokio::select! {
            _ = shutdown.wait_for(|v| *v) => None,
            recv_result = self.socket.recv_from(&mut buf) => {
                match recv_result {
                    Ok((len, from)) => {
                        trace!("received {} bytes from {}", len, from);
                        buf.truncate(len);
                        Some(Bytes::from(buf))
                    }
                    Err(e) => {
                        error!("error receiving UDP packet: {}", e);
                        None
                    }
                }
            }
        }
    }

    /// Idempotent; unblocks any pending [recv](UdpAdapter::recv) with `None`.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[async_trait::async_trait]
impl DatagramSink for UdpAdapter {
    async fn send(&self, buf: Bytes) -> bool {
        UdpAdapter::send(self, &buf).await
    }
}
