use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashSet;
use tokio::net::lookup_host;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::events::{DeviceFoundData, LinkEvent, LinkEventNotifier};


/// Resolves the vehicle's well-known hostname until it succeeds, then emits a single
/// `DeviceFound` event and returns. IPs already in the pool are not republished.
pub(crate) async fn run_discovery(
    hostname: String,
    retry_interval: Duration,
    pool: Arc<Mutex<FxHashSet<IpAddr>>>,
    events: Arc<LinkEventNotifier>,
) {
    info!("starting device discovery for '{}'", hostname);

    loop {
        match resolve_hostname(&hostname).await {
            Some(ip) => {
                info!("device found at {}", ip);
                let newly_discovered = pool.lock().expect("discovery pool lock poisoned").insert(ip);
                if newly_discovered {
                    events.send_event(LinkEvent::DeviceFound(DeviceFoundData { ip }));
                } else {
                    debug!("device {} already known - not republishing", ip);
                }
                return;
            }
            None => {
                debug!("'{}' not resolvable yet - retrying in {:?}", hostname, retry_interval);
                sleep(retry_interval).await;
            }
        }
    }
}

/// One resolution attempt. Prefers an IPv4 address when the resolver offers both
/// families, since the vehicle firmware only listens on IPv4.
pub(crate) async fn resolve_hostname(hostname: &str) -> Option<IpAddr> {
    match lookup_host((hostname, 0u16)).await {
        Ok(addrs) => {
            let addrs = addrs.map(|a| a.ip()).collect::<Vec<_>>();
            addrs.iter().find(|ip| ip.is_ipv4()).or(addrs.first()).copied()
        }
        Err(e) => {
            debug!("hostname resolution for '{}' failed: {}", hostname, e);
            None
        }
    }
}
