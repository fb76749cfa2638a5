//! Opportunistic work run while a wait loop would otherwise sleep.

use std::collections::VecDeque;
use std::sync::Mutex;

/// A registered callback.
pub type BusyCallback = Box<dyn FnOnce() + Send + 'static>;

/// FIFO of callbacks, each run at most once.
#[derive(Default)]
pub struct BusyQueue {
    pending: Mutex<VecDeque<BusyCallback>>,
}

impl std::fmt::Debug for BusyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyQueue")
            .field("pending", &self.len())
            .finish()
    }
}

impl BusyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It may never run.
    pub fn push(&self, callback: BusyCallback) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(callback);
        }
    }

    /// Run the oldest pending callback. Returns false if none was pending.
    pub fn run_one(&self) -> bool {
        // Pop before running so a callback may register more work.
        let next = match self.pending.lock() {
            Ok(mut pending) => pending.pop_front(),
            Err(_) => None,
        };
        match next {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Number of pending callbacks.
    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn test_runs_fifo_once() {
        let queue = BusyQueue::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            queue.push(Box::new(move || log.lock().unwrap().push(i)));
        }
        assert_eq!(queue.len(), 3);
        while queue.run_one() {}
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert!(queue.is_empty());
        assert!(!queue.run_one());
    }
}
