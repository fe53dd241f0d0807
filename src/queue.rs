use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error returned to a producer pushing into a completed queue.
/// Carries the rejected item back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub struct Closed<T>(pub T);

/// Outcome of a push attempt bounded by a timeout
#[derive(Debug, PartialEq, Eq)]
pub enum TryPush<T> {
    /// The item was inserted at the tail
    Accepted,
    /// The queue stayed full for the whole timeout; the item is handed back
    TimedOut(T),
    /// The queue is completed; the item is handed back
    Closed(T),
}

/// Outcome of a pop attempt bounded by a timeout
#[derive(Debug, PartialEq, Eq)]
pub enum TryPop<T> {
    /// An item was removed from the head
    Item(T),
    /// The queue stayed empty for the whole timeout but may still receive items
    TimedOut,
    /// The queue is completed and drained; no item will ever arrive
    Exhausted,
}

struct State<T> {
    items: VecDeque<T>,
    completed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

/// A fixed-capacity, thread-safe FIFO with a one-way completion flag.
///
/// Handles are cheap to clone and share the same underlying queue. A full
/// queue blocks its producers (backpressure); an empty queue blocks its
/// consumers until either an item arrives or the queue is marked completed,
/// at which point consumers drain whatever is left and then observe
/// exhaustion instead of blocking.
pub struct BoundedQueue<T: Send> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send> BoundedQueue<T> {
    /// Create a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity),
                    completed: false,
                }),
                not_full: Condvar::new(),
                not_empty: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Insert at the tail, blocking while the queue is full.
    ///
    /// Fails with [`Closed`] if the queue is marked completed before space
    /// becomes available; the rejected item is returned to the caller.
    pub fn push(&self, item: T) -> Result<(), Closed<T>> {
        let mut state = self.shared.state.lock();
        loop {
            if state.completed {
                return Err(Closed(item));
            }
            if state.items.len() < self.shared.capacity {
                state.items.push_back(item);
                drop(state);
                self.shared.not_empty.notify_one();
                return Ok(());
            }
            self.shared.not_full.wait(&mut state);
        }
    }

    /// As [`push`](Self::push), but gives up once `timeout` elapses without
    /// available capacity.
    pub fn try_push(&self, item: T, timeout: Duration) -> TryPush<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.completed {
                return TryPush::Closed(item);
            }
            if state.items.len() < self.shared.capacity {
                state.items.push_back(item);
                drop(state);
                self.shared.not_empty.notify_one();
                return TryPush::Accepted;
            }
            if self.shared.not_full.wait_until(&mut state, deadline).timed_out() {
                return TryPush::TimedOut(item);
            }
        }
    }

    /// Remove from the head, blocking while the queue is empty.
    ///
    /// Returns `None` only when the queue is exhausted: completed and
    /// drained. Items present at completion time are still delivered.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                return Some(item);
            }
            if state.completed {
                return None;
            }
            self.shared.not_empty.wait(&mut state);
        }
    }

    /// As [`pop`](Self::pop), but gives up once `timeout` elapses without an
    /// item arriving.
    pub fn try_pop(&self, timeout: Duration) -> TryPop<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                return TryPop::Item(item);
            }
            if state.completed {
                return TryPop::Exhausted;
            }
            if self.shared.not_empty.wait_until(&mut state, deadline).timed_out() {
                return TryPop::TimedOut;
            }
        }
    }

    /// Mark the queue completed; idempotent and one-way.
    ///
    /// Every parked producer wakes and fails with [`Closed`]; every parked
    /// consumer wakes, drains remaining items, then observes exhaustion.
    pub fn mark_completed(&self) {
        let mut state = self.shared.state.lock();
        if !state.completed {
            state.completed = true;
            drop(state);
            self.shared.not_full.notify_all();
            self.shared.not_empty.notify_all();
        }
    }

    /// Current number of items
    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Check if the queue holds no items
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().items.is_empty()
    }

    /// Fixed capacity set at creation
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Check if the completion flag has been set
    pub fn is_completed(&self) -> bool {
        self.shared.state.lock().completed
    }

    /// Check if the queue is completed and drained
    pub fn is_exhausted(&self) -> bool {
        let state = self.shared.state.lock();
        state.completed && state.items.is_empty()
    }
}

impl<T: Send> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("BoundedQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.shared.capacity)
            .field("completed", &state.completed)
            .finish()
    }
}

/// Create a fan of `count` queues with the same capacity
pub fn queue_set<T: Send>(count: usize, capacity: usize) -> Vec<BoundedQueue<T>> {
    (0..count).map(|_| BoundedQueue::new(capacity)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_push_pop_fifo() {
        let queue = BoundedQueue::new(10);
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(42);
        assert_eq!(queue.capacity(), 42);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_panics() {
        let _ = BoundedQueue::<i32>::new(0);
    }

    #[test]
    fn test_full_push_blocks_until_pop() {
        let queue = BoundedQueue::new(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(3).is_ok())
        };

        // The producer must be parked; give it time to reach the wait
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(4);
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(50));
        queue.push(7).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(7));
    }

    #[test]
    fn test_try_push_times_out_when_full() {
        let queue = BoundedQueue::new(1);
        queue.push(1).unwrap();
        assert_eq!(
            queue.try_push(2, Duration::from_millis(20)),
            TryPush::TimedOut(2)
        );
    }

    #[test]
    fn test_try_pop_times_out_when_empty() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(1);
        assert_eq!(queue.try_pop(Duration::from_millis(20)), TryPop::TimedOut);
    }

    #[test]
    fn test_completed_queue_rejects_push() {
        let queue = BoundedQueue::new(4);
        queue.mark_completed();
        assert_eq!(queue.push(5), Err(Closed(5)));
        assert_eq!(queue.try_push(6, Duration::ZERO), TryPush::Closed(6));
    }

    #[test]
    fn test_completed_queue_drains_then_exhausts() {
        let queue = BoundedQueue::new(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.mark_completed();

        assert!(!queue.is_exhausted());
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.try_pop(Duration::ZERO), TryPop::Item(2));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.try_pop(Duration::from_secs(1)), TryPop::Exhausted);
        assert!(queue.is_exhausted());
    }

    #[test]
    fn test_mark_completed_wakes_blocked_popper() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(1);
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(50));
        queue.mark_completed();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_mark_completed_wakes_blocked_pusher() {
        let queue = BoundedQueue::new(1);
        queue.push(1).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(Duration::from_millis(50));
        queue.mark_completed();
        assert_eq!(producer.join().unwrap(), Err(Closed(2)));
    }

    #[test]
    fn test_queue_set() {
        let set: Vec<BoundedQueue<u8>> = queue_set(5, 100);
        assert_eq!(set.len(), 5);
        assert!(set.iter().all(|q| q.capacity() == 100));
    }
}
