use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::trace;


/// Fixed-capacity buffer that overwrites the oldest element when full. Producers never
/// block and get no backpressure signal - freshness is prioritized over completeness.
///
/// `pop` is non-blocking; `pop_wait` parks the consumer on a [Notify] until an element
/// is available. Intended for a single consumer task per buffer.
pub struct RingBuffer<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    readable: Notify,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> RingBuffer<T> {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        RingBuffer {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            readable: Notify::new(),
        }
    }

    /// Returns `false` if the oldest element was evicted to make room.
    pub fn push(&self, value: T) -> bool {
        let evicted = {
            let mut inner = self.inner.lock().expect("ring buffer lock poisoned");
            let evicted = if inner.len() == self.capacity {
                inner.pop_front();
                true
            } else {
                false
            };
            inner.push_back(value);
            evicted
        };

        if evicted {
            trace!("ring buffer full - evicting oldest element");
        }
        self.readable.notify_one();
        !evicted
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().expect("ring buffer lock poisoned").pop_front()
    }

    /// Waits for an element if the buffer is empty. Cancel-safe: no element is lost
    /// when the enclosing `select!` picks another branch.
    pub async fn pop_wait(&self) -> T {
        loop {
            if let Some(value) = self.pop() {
                return value;
            }
            self.readable.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ring buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_push_pop_fifo() {
        let ring = RingBuffer::new(4);
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(ring.push(3));

        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_overwrite_oldest_on_full() {
        let ring = RingBuffer::new(3);
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(ring.push(3));
        assert!(!ring.push(4));
        assert!(!ring.push(5));

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
        assert_eq!(ring.pop(), Some(5));
        assert!(ring.is_empty());
    }

    #[tokio::test]
    async fn test_pop_wait_wakes_on_push() {
        let ring = Arc::new(RingBuffer::new(2));

        let consumer = {
            let ring = ring.clone();
            tokio::spawn(async move { ring.pop_wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!consumer.is_finished());

        ring.push(42);
        assert_eq!(consumer.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_pop_wait_returns_immediately_when_nonempty() {
        let ring = RingBuffer::new(2);
        ring.push("a");
        assert_eq!(ring.pop_wait().await, "a");
    }
}
