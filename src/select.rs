use crate::cancel::CancelToken;
use crate::queue::{BoundedQueue, TryPop, TryPush};
use crossbeam::utils::Backoff;
use std::thread;
use std::time::{Duration, Instant};

/// How long one scan cycle courts a single queue while routing an item
const PER_QUEUE_PUSH_TIMEOUT: Duration = Duration::from_millis(5);

/// Sleep between scan cycles once spinning has run its course
const SCAN_IDLE: Duration = Duration::from_micros(200);

/// Outcome of taking an item from a queue set
#[derive(Debug, PartialEq, Eq)]
pub enum Take<T> {
    /// An item, along with the index of the queue that supplied it
    Item { index: usize, item: T },
    /// No item became available within the timeout; transient, retry
    TimedOut,
    /// Every queue in the set is completed and empty
    Exhausted,
    /// The cancellation signal was raised
    Cancelled,
}

/// Outcome of routing an item into a queue set
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// The item was accepted by the queue at `index`
    Accepted { index: usize },
    /// The cancellation signal was raised; the in-flight item is dropped
    Cancelled,
    /// Every queue in the set is completed; the in-flight item is dropped
    Closed,
}

/// Fair take/push over a set of bounded queues of one item type.
///
/// A rotation cursor guarantees every queue is visited once per scan cycle
/// and that no queue is starved: the cursor advances past whichever queue
/// last serviced a call, so a saturated low-index queue cannot shadow its
/// siblings. Each selector holds its own cursor; the queues themselves are
/// safe under any number of concurrent selectors.
pub struct Selector<T: Send> {
    queues: Vec<BoundedQueue<T>>,
    cursor: usize,
}

impl<T: Send> Selector<T> {
    pub fn new(queues: Vec<BoundedQueue<T>>) -> Self {
        Self { queues, cursor: 0 }
    }

    /// The underlying queue set, in construction order
    pub fn queues(&self) -> &[BoundedQueue<T>] {
        &self.queues
    }

    /// Take an item from whichever queue has one, waiting up to `timeout`.
    ///
    /// Cancellation is checked at least once per scan cycle. `Exhausted` is
    /// returned only when every queue is both completed and empty, which
    /// holds vacuously for an empty set.
    pub fn take_from_any(&mut self, timeout: Duration, cancel: &CancelToken) -> Take<T> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if cancel.is_cancelled() {
                return Take::Cancelled;
            }
            let mut exhausted = 0;
            for offset in 0..self.queues.len() {
                let index = (self.cursor + offset) % self.queues.len();
                match self.queues[index].try_pop(Duration::ZERO) {
                    TryPop::Item(item) => {
                        self.cursor = (index + 1) % self.queues.len();
                        return Take::Item { index, item };
                    }
                    TryPop::Exhausted => exhausted += 1,
                    TryPop::TimedOut => {}
                }
            }
            if exhausted == self.queues.len() {
                return Take::Exhausted;
            }
            if Instant::now() >= deadline {
                return Take::TimedOut;
            }
            if backoff.is_completed() {
                thread::sleep(SCAN_IDLE);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Route an item into whichever queue has room.
    ///
    /// Rotates across the set with a short per-queue timeout and keeps
    /// rotating until a queue accepts, so backpressure from full queues
    /// blocks the caller rather than dropping the item. Returns only on
    /// acceptance, cancellation, or when the whole set is closed.
    pub fn push_to_any(&mut self, item: T, cancel: &CancelToken) -> Route {
        if self.queues.is_empty() {
            return Route::Closed;
        }
        let mut item = item;
        loop {
            let mut closed = 0;
            for offset in 0..self.queues.len() {
                if cancel.is_cancelled() {
                    return Route::Cancelled;
                }
                let index = (self.cursor + offset) % self.queues.len();
                match self.queues[index].try_push(item, PER_QUEUE_PUSH_TIMEOUT) {
                    TryPush::Accepted => {
                        self.cursor = (index + 1) % self.queues.len();
                        return Route::Accepted { index };
                    }
                    TryPush::TimedOut(rejected) => item = rejected,
                    TryPush::Closed(rejected) => {
                        item = rejected;
                        closed += 1;
                    }
                }
            }
            if closed == self.queues.len() {
                return Route::Closed;
            }
        }
    }

    /// Mark every queue in the set completed
    pub fn complete_all(&self) {
        for queue in &self.queues {
            queue.mark_completed();
        }
    }
}
