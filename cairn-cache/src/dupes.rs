//! Duplicate-get instrumentation.
//!
//! Counts how often each key is fetched within a window. The first repeat
//! schedules a single deferred report, which logs every key fetched more than
//! once at the time it runs.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A deferred unit of work.
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs work later, off the caller's path.
pub trait DeferredScheduler: Send + Sync + std::fmt::Debug {
    fn schedule(&self, task: DeferredTask);
}

/// Spawns deferred work on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the runtime of the calling task, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl DeferredScheduler for TokioScheduler {
    fn schedule(&self, task: DeferredTask) {
        self.handle.spawn(async move { task() });
    }
}

#[derive(Debug, Default)]
struct Window {
    /// Fetches after the first, per key
    repeats: HashMap<String, u64>,
    report_scheduled: bool,
}

/// Per-window duplicate fetch counter.
#[derive(Debug)]
pub struct DuplicateKeyTracker {
    window: Arc<Mutex<Window>>,
    scheduler: Option<Arc<dyn DeferredScheduler>>,
}

impl DuplicateKeyTracker {
    /// A tracker that does nothing.
    pub fn disabled() -> Self {
        Self {
            window: Arc::new(Mutex::new(Window::default())),
            scheduler: None,
        }
    }

    /// A tracker that reports through `scheduler`.
    pub fn new(scheduler: Arc<dyn DeferredScheduler>) -> Self {
        Self {
            window: Arc::new(Mutex::new(Window::default())),
            scheduler: Some(scheduler),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Record one fetch of `key`.
    pub fn track(&self, key: &str) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        let Ok(mut window) = self.window.lock() else {
            return;
        };

        match window.repeats.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(0);
                return;
            }
            Entry::Occupied(mut slot) => *slot.get_mut() += 1,
        }

        if !window.report_scheduled {
            window.report_scheduled = true;
            let window = Arc::clone(&self.window);
            scheduler.schedule(Box::new(move || report(&window)));
        }
    }

    /// Keys fetched more than once in this window, with total fetch counts.
    pub fn duplicates(&self) -> Vec<(String, u64)> {
        let Ok(window) = self.window.lock() else {
            return Vec::new();
        };
        collect_duplicates(&window)
    }

    /// Start a new window.
    pub fn reset_window(&self) {
        if let Ok(mut window) = self.window.lock() {
            *window = Window::default();
        }
    }
}

fn collect_duplicates(window: &Window) -> Vec<(String, u64)> {
    let mut dupes: Vec<(String, u64)> = window
        .repeats
        .iter()
        .filter(|(_, repeats)| **repeats > 0)
        .map(|(key, repeats)| (key.clone(), repeats + 1))
        .collect();
    dupes.sort();
    dupes
}

fn report(window: &Mutex<Window>) {
    let Ok(window) = window.lock() else {
        return;
    };
    for (key, count) in collect_duplicates(&window) {
        tracing::warn!(key = %key, count, "Duplicate get within one window");
    }
}
