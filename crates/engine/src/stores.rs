//! Async seams to the external storage engine.
//!
//! The persistent store owns record layout and I/O semantics; this crate
//! only requires that every call resolves, reporting success or failure.
//! In-memory implementations are shipped for tests and for embedders that
//! do not persist across restarts.

use async_trait::async_trait;
use conversions_core::{ConversionError, ConversionResult};
use conversions_core::types::{AdEvent, ConversionQueueItem, ConversionRule};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Append-only table of ad lifecycle events.
#[async_trait]
pub trait AdEventStore: Send + Sync {
    async fn get_all(&self) -> ConversionResult<Vec<AdEvent>>;
    async fn append(&self, ad_event: AdEvent) -> ConversionResult<()>;
}

/// Read-only view of the conversion rule catalog.
#[async_trait]
pub trait ConversionRuleStore: Send + Sync {
    async fn get_all(&self) -> ConversionResult<Vec<ConversionRule>>;
}

/// Durable queue of credited conversions awaiting their privacy delay.
///
/// `get_unprocessed` returns items ordered by `process_at` ascending, ties
/// broken by insertion order.
#[async_trait]
pub trait ConversionQueueStore: Send + Sync {
    async fn get_unprocessed(&self) -> ConversionResult<Vec<ConversionQueueItem>>;
    async fn save(&self, items: Vec<ConversionQueueItem>) -> ConversionResult<()>;
    async fn update(&self, item: &ConversionQueueItem) -> ConversionResult<()>;
    async fn delete(&self, item: &ConversionQueueItem) -> ConversionResult<()>;
}

fn store_error(table: &str, op: &str) -> ConversionError {
    ConversionError::Store(format!("{table}: {op} failed"))
}

/// In-memory ad-event table with a failure toggle and call counters.
#[derive(Default)]
pub struct MemoryAdEventStore {
    events: Mutex<Vec<AdEvent>>,
    fail: AtomicBool,
    fail_append: AtomicBool,
    get_all_calls: AtomicUsize,
}

impl MemoryAdEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<AdEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            ..Self::default()
        }
    }

    /// Make every subsequent call report failure.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Fail only `append`, leaving reads working.
    pub fn set_failing_append(&self, failing: bool) {
        self.fail_append.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<AdEvent> {
        self.events.lock().expect("ad event store poisoned").clone()
    }

    pub fn get_all_calls(&self) -> usize {
        self.get_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdEventStore for MemoryAdEventStore {
    async fn get_all(&self) -> ConversionResult<Vec<AdEvent>> {
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(store_error("ad_events", "get_all"));
        }
        Ok(self.events())
    }

    async fn append(&self, ad_event: AdEvent) -> ConversionResult<()> {
        if self.fail.load(Ordering::SeqCst) || self.fail_append.load(Ordering::SeqCst) {
            return Err(store_error("ad_events", "append"));
        }
        self.events
            .lock()
            .expect("ad event store poisoned")
            .push(ad_event);
        Ok(())
    }
}

/// In-memory rule catalog.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<Vec<ConversionRule>>,
    fail: AtomicBool,
    get_all_calls: AtomicUsize,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<ConversionRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn get_all_calls(&self) -> usize {
        self.get_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversionRuleStore for MemoryRuleStore {
    async fn get_all(&self) -> ConversionResult<Vec<ConversionRule>> {
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(store_error("conversion_rules", "get_all"));
        }
        Ok(self.rules.lock().expect("rule store poisoned").clone())
    }
}

/// In-memory durable queue. Items are matched for update/delete by their
/// identifying fields plus `process_at`, mirroring a keyed table.
#[derive(Default)]
pub struct MemoryQueueStore {
    items: Mutex<Vec<ConversionQueueItem>>,
    fail: AtomicBool,
    fail_mutations: AtomicBool,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<ConversionQueueItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Fail only `save`/`update`/`delete`, leaving reads working.
    pub fn set_failing_mutations(&self, failing: bool) {
        self.fail_mutations.store(failing, Ordering::SeqCst);
    }

    pub fn items(&self) -> Vec<ConversionQueueItem> {
        self.items.lock().expect("queue store poisoned").clone()
    }

    fn failing(&self) -> bool {
        self.fail.load(Ordering::SeqCst)
    }

    fn failing_mutations(&self) -> bool {
        self.failing() || self.fail_mutations.load(Ordering::SeqCst)
    }

    fn position_of(items: &[ConversionQueueItem], item: &ConversionQueueItem) -> Option<usize> {
        items.iter().position(|candidate| {
            candidate.creative_instance_id == item.creative_instance_id
                && candidate.creative_set_id == item.creative_set_id
                && candidate.campaign_id == item.campaign_id
                && candidate.process_at == item.process_at
        })
    }
}

#[async_trait]
impl ConversionQueueStore for MemoryQueueStore {
    async fn get_unprocessed(&self) -> ConversionResult<Vec<ConversionQueueItem>> {
        if self.failing() {
            return Err(store_error("conversion_queue", "get_unprocessed"));
        }

        let mut unprocessed: Vec<ConversionQueueItem> = self
            .items()
            .into_iter()
            .filter(|item| !item.was_processed)
            .collect();
        unprocessed.sort_by_key(|item| item.process_at);
        Ok(unprocessed)
    }

    async fn save(&self, items: Vec<ConversionQueueItem>) -> ConversionResult<()> {
        if self.failing_mutations() {
            return Err(store_error("conversion_queue", "save"));
        }
        self.items
            .lock()
            .expect("queue store poisoned")
            .extend(items);
        Ok(())
    }

    async fn update(&self, item: &ConversionQueueItem) -> ConversionResult<()> {
        if self.failing_mutations() {
            return Err(store_error("conversion_queue", "update"));
        }

        let mut items = self.items.lock().expect("queue store poisoned");
        match Self::position_of(&items, item) {
            Some(position) => {
                items[position] = item.clone();
                Ok(())
            }
            None => Err(store_error("conversion_queue", "update")),
        }
    }

    async fn delete(&self, item: &ConversionQueueItem) -> ConversionResult<()> {
        if self.failing_mutations() {
            return Err(store_error("conversion_queue", "delete"));
        }

        let mut items = self.items.lock().expect("queue store poisoned");
        match Self::position_of(&items, item) {
            Some(position) => {
                items.remove(position);
                Ok(())
            }
            None => Err(store_error("conversion_queue", "delete")),
        }
    }
}
