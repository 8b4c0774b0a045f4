use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The queue was closed; the item was not enqueued (returned to the caller
    /// via `Full`-style APIs is not applicable here, the item is dropped).
    Closed,
    /// `push` timed out waiting for space.
    Timeout,
    /// `try_push` found the queue full.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    Closed,
    Timeout,
    Empty,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO of moved items, fixed capacity. `push`/`pop` block (with timeout) for
/// space/an item; `try_push`/`try_pop` never block. `close()` wakes every
/// waiter with a distinguished closed result — this is how `stop()` tears
/// down the pipeline without any worker blocking indefinitely.
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded queue capacity must be > 0");
        Self {
            capacity,
            state: Mutex::new(State { items: VecDeque::with_capacity(capacity), closed: false }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn push(&self, item: T, timeout: Duration) -> Result<(), PushError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(PushError::Closed);
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            let (guard, timeout_result) = self.not_full.wait_timeout(state, timeout).unwrap();
            state = guard;
            if timeout_result.timed_out() && state.items.len() >= self.capacity && !state.closed {
                return Err(PushError::Timeout);
            }
        }
    }

    pub fn try_push(&self, item: T) -> Result<(), PushError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(PushError::Closed);
        }
        if state.items.len() >= self.capacity {
            return Err(PushError::Full);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn pop(&self, timeout: Duration) -> Result<T, PopError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(PopError::Closed);
            }
            let (guard, timeout_result) = self.not_empty.wait_timeout(state, timeout).unwrap();
            state = guard;
            if timeout_result.timed_out() && state.items.is_empty() && !state.closed {
                return Err(PopError::Timeout);
            }
        }
    }

    pub fn try_pop(&self) -> Result<T, PopError> {
        let mut state = self.state.lock().unwrap();
        match state.items.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                Ok(item)
            }
            None if state.closed => Err(PopError::Closed),
            None => Err(PopError::Empty),
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.items.clear();
        self.not_full.notify_all();
    }

    /// Wakes every waiting `push`/`pop` with `Closed`. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_fifo_order() {
        let q = BoundedQueue::new(4);
        q.push(1, Duration::from_millis(10)).unwrap();
        q.push(2, Duration::from_millis(10)).unwrap();
        assert_eq!(q.pop(Duration::from_millis(10)), Ok(1));
        assert_eq!(q.pop(Duration::from_millis(10)), Ok(2));
    }

    #[test]
    fn try_push_full_and_try_pop_empty() {
        let q: BoundedQueue<i32> = BoundedQueue::new(1);
        q.try_push(1).unwrap();
        assert_eq!(q.try_push(2), Err(PushError::Full));
        assert_eq!(q.try_pop(), Ok(1));
        assert_eq!(q.try_pop(), Err(PopError::Empty));
    }

    #[test]
    fn pop_times_out_on_empty_queue() {
        let q: BoundedQueue<i32> = BoundedQueue::new(2);
        let start = std::time::Instant::now();
        assert_eq!(q.pop(Duration::from_millis(30)), Err(PopError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn close_wakes_blocked_pop_immediately() {
        let q = Arc::new(BoundedQueue::<i32>::new(2));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        q.close();
        let result = handle.join().unwrap();
        assert_eq!(result, Err(PopError::Closed));
    }

    #[test]
    fn close_wakes_blocked_push_immediately() {
        let q = Arc::new(BoundedQueue::<i32>::new(1));
        q.try_push(0).unwrap();
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.push(1, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(handle.join().unwrap(), Err(PushError::Closed));
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let q: BoundedQueue<i32> = BoundedQueue::new(3);
        for i in 0..3 {
            q.try_push(i).unwrap();
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.try_push(3), Err(PushError::Full));
        assert!(q.len() <= q.capacity());
    }

    #[test]
    fn clear_empties_without_closing() {
        let q = BoundedQueue::new(4);
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        q.clear();
        assert_eq!(q.len(), 0);
        assert!(!q.is_closed());
        q.try_push(3).unwrap();
        assert_eq!(q.try_pop(), Ok(3));
    }
}
