use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::command::watchdog;
use crate::command::wire::{encode_request, CommandId, CommandValue, Reply};
use crate::config::LinkConfig;
use crate::events::{LinkEvent, LinkEventNotifier};
use crate::transport::DatagramSink;


/// Invoked at most once, with the correlated reply, from the receive task of the
/// controller adapter.
pub type ReplyCallback = Box<dyn FnOnce(Reply) + Send + 'static>;

/// A high-level command, created by a caller and consumed once by the dispatch loop.
pub struct Command {
    pub id: CommandId,
    pub value: CommandValue,
    pub payload: Bytes,
    pub on_reply: Option<ReplyCallback>,
}

impl Command {
    pub fn new(id: CommandId, value: impl Into<CommandValue>) -> Command {
        Command {
            id,
            value: value.into(),
            payload: Bytes::new(),
            on_reply: None,
        }
    }

    pub fn with_payload(mut self, payload: Bytes) -> Command {
        self.payload = payload;
        self
    }

    pub fn with_reply(mut self, on_reply: impl FnOnce(Reply) + Send + 'static) -> Command {
        self.on_reply = Some(Box::new(on_reply));
        self
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("value", &self.value)
            .field("payload_len", &self.payload.len())
            .field("has_reply_callback", &self.on_reply.is_some())
            .finish()
    }
}

/// `(CommandId, value)` shorthand accepted by [CommandBus::submit].
impl<V: Into<CommandValue>> From<(CommandId, V)> for Command {
    fn from((id, value): (CommandId, V)) -> Self {
        Command::new(id, value)
    }
}


struct InFlight {
    id: CommandId,
    on_reply: Option<ReplyCallback>,
}

/// In-flight command table keyed by sequence id. A sequence id is present for at most
/// one in-flight command at a time; allocation skips ids that are still occupied.
pub(crate) struct SentBank {
    next_sequence_id: u16,
    in_flight: FxHashMap<u16, InFlight>,
}

impl SentBank {
    fn new() -> SentBank {
        SentBank {
            next_sequence_id: 0,
            in_flight: FxHashMap::default(),
        }
    }

    /// Allocates the next free sequence id (wrapping mod 65536) and records the
    /// command under it. `None` only when all 65536 ids are in flight.
    fn allocate_and_insert(&mut self, id: CommandId, on_reply: Option<ReplyCallback>) -> Option<u16> {
        for _ in 0..=u16::MAX {
            let candidate = self.next_sequence_id;
            self.next_sequence_id = self.next_sequence_id.wrapping_add(1);

            if !self.in_flight.contains_key(&candidate) {
                self.in_flight.insert(candidate, InFlight { id, on_reply });
                return Some(candidate);
            }
        }
        None
    }

    fn pop(&mut self, sequence_id: u16) -> Option<InFlight> {
        self.in_flight.remove(&sequence_id)
    }

    fn clear(&mut self) {
        self.in_flight.clear();
    }

    fn len(&self) -> usize {
        self.in_flight.len()
    }
}


/// State shared between the dispatch loop, the reply path and the ping/watchdog tasks.
pub(crate) struct BusShared {
    bank: Mutex<SentBank>,
    connected: AtomicBool,
    silent_ticks: AtomicU32,
    events: Arc<LinkEventNotifier>,
}

impl BusShared {
    /// Any received traffic restarts the silence window.
    pub(crate) fn note_traffic(&self) {
        self.silent_ticks.store(0, Ordering::Relaxed);
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn tick_silence(&self) -> u32 {
        self.silent_ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Flips to disconnected, clears the SentBank and emits the notification. The
    /// compare-exchange makes sure one silence window yields exactly one event.
    pub(crate) fn declare_disconnected(&self) {
        if self.connected.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            let dropped = {
                let mut bank = self.bank.lock().expect("sent bank lock poisoned");
                let dropped = bank.len();
                bank.clear();
                dropped
            };
            warn!("no traffic from device for the full silence window - declaring disconnected ({} in-flight commands dropped)", dropped);
            self.events.send_event(LinkEvent::DeviceDisconnected);
        }
    }
}


/// Turns high-level [Command]s into wire frames on a single dispatch task and
/// correlates replies with requests by sequence id. Requests are fire-and-forget:
/// an unmatched or lost reply is never retried.
pub struct CommandBus {
    sink: Arc<dyn DatagramSink>,
    config: Arc<LinkConfig>,
    queue_tx: mpsc::UnboundedSender<Command>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    shared: Arc<BusShared>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CommandBus {
    pub fn new(sink: Arc<dyn DatagramSink>, config: Arc<LinkConfig>, events: Arc<LinkEventNotifier>) -> CommandBus {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        CommandBus {
            sink,
            config,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            shared: Arc::new(BusShared {
                bank: Mutex::new(SentBank::new()),
                connected: AtomicBool::new(false),
                silent_ticks: AtomicU32::new(0),
                events,
            }),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Starts the dispatch, ping and watchdog tasks. Idempotent.
    pub fn start(&self) {
        let Some(queue_rx) = self.queue_rx.lock().expect("queue lock poisoned").take() else {
            return;
        };

        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        tasks.push(tokio::spawn(dispatch_loop(
            queue_rx,
            self.sink.clone(),
            self.shared.clone(),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(watchdog::ping_loop(
            self.queue_tx.clone(),
            self.shared.clone(),
            self.config.ping_interval,
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(watchdog::watchdog_loop(
            self.shared.clone(),
            self.config.watchdog_tick,
            self.config.watchdog_silence_ticks,
            self.shutdown.subscribe(),
        )));
        info!("command bus started");
    }

    /// Stops the worker tasks, joining each with a bounded timeout.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().expect("task list lock poisoned"));
        for task in tasks {
            if timeout(self.config.shutdown_join_timeout, task).await.is_err() {
                warn!("command bus task did not terminate within the join timeout");
            }
        }
        info!("command bus stopped");
    }

    /// Enqueues a command; never blocks the caller.
    pub fn submit(&self, cmd: impl Into<Command>) {
        if self.queue_tx.send(cmd.into()).is_err() {
            debug!("command submitted after bus shutdown - dropping");
        }
    }

    /// Marks the device as connected, arming ping and watchdog.
    pub fn set_connected(&self, connected: bool) {
        self.shared.note_traffic();
        self.shared.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.bank.lock().expect("sent bank lock poisoned").len()
    }

    /// Handles a reply datagram. Runs on the controller adapter's receive task, not
    /// on the dispatch task; the bank mutex is the only synchronization between them.
    pub fn process_reply(&self, data: &[u8]) {
        self.shared.note_traffic();

        let reply = match Reply::try_decode(data) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("discarding malformed reply: {}", e);
                return;
            }
        };

        let in_flight = self.shared.bank.lock().expect("sent bank lock poisoned")
            .pop(reply.sequence_id);

        match in_flight {
            Some(in_flight) => {
                debug!("reply for {:?} (seq {}): status={}", in_flight.id, reply.sequence_id, reply.status);
                if let Some(on_reply) = in_flight.on_reply {
                    // outside the bank lock: callbacks are caller code
                    on_reply(reply);
                }
            }
            None => {
                debug!("reply for unknown sequence id {} - ignoring", reply.sequence_id);
            }
        }
    }
}


async fn dispatch_loop(
    mut queue: mpsc::UnboundedReceiver<Command>,
    sink: Arc<dyn DatagramSink>,
    shared: Arc<BusShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let cmd = tokio::select! {
            _ = shutdown.wait_for(|s| *s) => break,
            cmd = queue.recv() => {
                match cmd {
                    Some(cmd) => cmd,
                    None => break,
                }
            }
        };

        let Command { id, value, payload, on_reply } = cmd;

        // allocate + insert + encode under the bank lock, send outside of it
        let (sequence_id, frame) = {
            let mut bank = shared.bank.lock().expect("sent bank lock poisoned");
            match bank.allocate_and_insert(id, on_reply) {
                Some(sequence_id) => (sequence_id, encode_request(sequence_id, id, value, &payload)),
                None => {
                    error!("sequence space exhausted - dropping command {:?}", id);
                    continue;
                }
            }
        };

        if !sink.send(frame).await {
            // no reply can be expected for a frame that never left
            error!("failed to send command {:?} (seq {})", id, sequence_id);
            shared.bank.lock().expect("sent bank lock poisoned").pop(sequence_id);
        }
    }
    debug!("command dispatch task exiting");
}
