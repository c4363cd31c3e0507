use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::config::LinkConfig;
use crate::events::LinkEventNotifier;
use crate::transport::adapter::UdpAdapter;
use crate::transport::discovery;
use crate::transport::DatagramHandler;


/// Creates and tracks named [UdpAdapter]s, wiring one receive task per inbound adapter,
/// and runs device discovery. The registry keeps adapters for later retrieval but does
/// not manage their lifecycle beyond creation - shutdown stays with the owner.
pub struct AdapterRegistry {
    config: Arc<LinkConfig>,
    events: Arc<LinkEventNotifier>,
    adapters: Mutex<FxHashMap<String, Arc<UdpAdapter>>>,
    discovered_pool: Arc<Mutex<FxHashSet<IpAddr>>>,
    discovery_running: Arc<AtomicBool>,
}

impl AdapterRegistry {
    pub fn new(config: Arc<LinkConfig>, events: Arc<LinkEventNotifier>) -> AdapterRegistry {
        AdapterRegistry {
            config,
            events,
            adapters: Mutex::new(FxHashMap::default()),
            discovered_pool: Arc::new(Mutex::new(FxHashSet::default())),
            discovery_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Empty `host` means an inbound channel: the adapter is bound to the local port,
    /// and a given handler gets a dedicated receive task. With a host the adapter is
    /// outbound-only and any handler is ignored.
    pub async fn open_adapter(
        &self,
        name: &str,
        port: u16,
        host: Option<IpAddr>,
        handler: Option<Arc<dyn DatagramHandler>>,
    ) -> anyhow::Result<Arc<UdpAdapter>> {
        let adapter = Arc::new(UdpAdapter::open(port, host).await?);
        info!("opened adapter '{}' on port {} (host {:?})", name, port, host);

        if host.is_none() {
            if let Some(handler) = handler {
                self.spawn_receiver(name, adapter.clone(), handler);
            }
        }

        self.adapters.lock().expect("adapter pool lock poisoned")
            .insert(name.to_string(), adapter.clone());
        Ok(adapter)
    }

    /// Starts the receive task for an already-registered adapter. Split out of
    /// [open_adapter](AdapterRegistry::open_adapter) for consumers that need the
    /// adapter handle before the handler exists (e.g. the command bus sends on the
    /// same adapter its reply handler listens on).
    pub fn start_receiver(&self, name: &str, handler: Arc<dyn DatagramHandler>) -> bool {
        let Some(adapter) = self.get_adapter(name) else {
            return false;
        };
        self.spawn_receiver(name, adapter, handler);
        true
    }

    fn spawn_receiver(&self, name: &str, adapter: Arc<UdpAdapter>, handler: Arc<dyn DatagramHandler>) {
        let name = name.to_string();
        let recv_buffer_size = self.config.recv_buffer_size;

        tokio::spawn(async move {
            loop {
                match adapter.recv(recv_buffer_size).await {
                    Some(data) => handler.handle_datagram(data).await,
                    None => {
                        // socket error or shutdown; only the latter ends the loop
                        if adapter.is_shutdown() {
                            break;
                        }
                    }
                }
            }
            debug!("receive task for adapter '{}' exiting due to shutdown", name);
        });
    }

    pub fn get_adapter(&self, name: &str) -> Option<Arc<UdpAdapter>> {
        self.adapters.lock().expect("adapter pool lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.lock().expect("adapter pool lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Begins hostname-based device search, forwarding a deduplicated `DeviceFound`
    /// event to subscribers. A no-op while a previous search is still running.
    pub fn start_discovery(&self) {
        if self.discovery_running.swap(true, Ordering::SeqCst) {
            debug!("discovery already running");
            return;
        }

        let hostname = self.config.device_hostname.clone();
        let retry_interval = self.config.discovery_retry_interval;
        let pool = self.discovered_pool.clone();
        let events = self.events.clone();
        let running = self.discovery_running.clone();

        tokio::spawn(async move {
            discovery::run_discovery(hostname, retry_interval, pool, events).await;
            running.store(false, Ordering::SeqCst);
        });
    }

    /// Application shutdown: closes every registered adapter, which terminates the
    /// receive tasks.
    pub fn shutdown_all(&self) {
        for (name, adapter) in self.adapters.lock().expect("adapter pool lock poisoned").iter() {
            debug!("shutting down adapter '{}'", name);
            adapter.shutdown();
        }
    }
}
