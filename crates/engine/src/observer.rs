//! Observer fan-out for resolved queue items.

use conversions_core::types::ConversionQueueItem;
use std::sync::{Arc, Mutex};

/// Receives the outcome of each queue item after its delay elapses.
pub trait ConversionObserver: Send + Sync {
    fn on_conversion_succeeded(&self, item: &ConversionQueueItem);
    fn on_conversion_failed(&self, item: &ConversionQueueItem);
}

/// Subscriber handles owned by the engine instance. Iteration order is
/// stable within a single notification pass.
#[derive(Default)]
pub struct ObserverList {
    observers: Mutex<Vec<Arc<dyn ConversionObserver>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn ConversionObserver>) {
        self.observers
            .lock()
            .expect("observer list poisoned")
            .push(observer);
    }

    /// Removes a previously added observer, matched by handle identity.
    pub fn remove(&self, observer: &Arc<dyn ConversionObserver>) {
        self.observers
            .lock()
            .expect("observer list poisoned")
            .retain(|candidate| !Arc::ptr_eq(candidate, observer));
    }

    pub fn notify_succeeded(&self, item: &ConversionQueueItem) {
        for observer in self.snapshot() {
            observer.on_conversion_succeeded(item);
        }
    }

    pub fn notify_failed(&self, item: &ConversionQueueItem) {
        for observer in self.snapshot() {
            observer.on_conversion_failed(item);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn ConversionObserver>> {
        self.observers
            .lock()
            .expect("observer list poisoned")
            .clone()
    }
}

/// Observer that records outcomes, for tests.
#[derive(Default)]
pub struct CaptureObserver {
    succeeded: Mutex<Vec<ConversionQueueItem>>,
    failed: Mutex<Vec<ConversionQueueItem>>,
}

impl CaptureObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(&self) -> Vec<ConversionQueueItem> {
        self.succeeded.lock().expect("capture observer poisoned").clone()
    }

    pub fn failed(&self) -> Vec<ConversionQueueItem> {
        self.failed.lock().expect("capture observer poisoned").clone()
    }
}

impl ConversionObserver for CaptureObserver {
    fn on_conversion_succeeded(&self, item: &ConversionQueueItem) {
        self.succeeded
            .lock()
            .expect("capture observer poisoned")
            .push(item.clone());
    }

    fn on_conversion_failed(&self, item: &ConversionQueueItem) {
        self.failed
            .lock()
            .expect("capture observer poisoned")
            .push(item.clone());
    }
}
