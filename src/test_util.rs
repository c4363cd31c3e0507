use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::transport::DatagramSink;


/// Test double for an outbound adapter: records every datagram handed to it. Every
/// send attempt is recorded, including those that fail while [Self::set_fail] is set.
pub struct RecordingSink {
    sent: Mutex<Vec<Bytes>>,
    fail: AtomicBool,
    recorded: Notify,
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        RecordingSink {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            recorded: Notify::new(),
        }
    }

    /// Makes subsequent sends report failure.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    /// Everything sent so far, in send order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// Waits until at least `count` datagrams have been recorded, then returns them.
    pub async fn wait_for_count(&self, count: usize) -> Vec<Bytes> {
        loop {
            {
                let sent = self.sent.lock().unwrap();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            // notify_one stores a permit, so a send between the check and this await
            // is not lost
            self.recorded.notified().await;
        }
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatagramSink for RecordingSink {
    async fn send(&self, buf: Bytes) -> bool {
        self.sent.lock().unwrap().push(buf);
        self.recorded.notify_one();
        !self.fail.load(Ordering::Acquire)
    }
}
