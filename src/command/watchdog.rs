use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::command::bus::{BusShared, Command};
use crate::command::wire::{CommandId, CommandValue};


/// Submits a no-op command at a fixed cadence while a device is connected - purely to
/// keep NAT/UDP state and the remote peer's liveness view warm.
pub(crate) async fn ping_loop(
    queue: mpsc::UnboundedSender<Command>,
    shared: Arc<BusShared>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|s| *s) => break,
            _ = ticker.tick() => {
                if shared.is_connected() {
                    let _ = queue.send(Command::new(CommandId::Noop, CommandValue::I32(0)));
                }
            }
        }
    }
    debug!("ping task exiting");
}


/// Counts silent seconds; once the window elapses with no traffic to reset it, the
/// link is declared disconnected. The protocol has no heartbeats or acks beyond
/// normal replies, so this is the only disconnect-detection mechanism.
pub(crate) async fn watchdog_loop(
    shared: Arc<BusShared>,
    tick: Duration,
    silence_ticks: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|s| *s) => break,
            _ = ticker.tick() => {
                if !shared.is_connected() {
                    continue;
                }
                if shared.tick_silence() >= silence_ticks {
                    shared.declare_disconnected();
                }
            }
        }
    }
    debug!("watchdog task exiting");
}
