//! Durable queue scheduling of credited conversions.
//!
//! The scheduler drains the persisted queue one item per timer fire: it
//! arms a single timer for the earliest-due item, revalidates the front of
//! the queue when the timer fires, marks it processed (or evicts it if
//! invalid), notifies observers, and re-arms for the next item until the
//! queue is empty.

use chrono::Utc;
use conversions_core::types::ConversionQueueItem;
use conversions_core::ConversionsConfig;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::observer::ObserverList;
use crate::policy::DelaySource;
use crate::stores::ConversionQueueStore;

pub struct ConversionQueueScheduler {
    queue_store: Arc<dyn ConversionQueueStore>,
    observers: Arc<ObserverList>,
    delay_source: Arc<dyn DelaySource>,
    config: ConversionsConfig,
    // At most one armed timer; arming replaces (aborts) the previous one.
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConversionQueueScheduler {
    pub fn new(
        queue_store: Arc<dyn ConversionQueueStore>,
        observers: Arc<ObserverList>,
        delay_source: Arc<dyn DelaySource>,
        config: ConversionsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue_store,
            observers,
            delay_source,
            config,
            timer: Mutex::new(None),
        })
    }

    /// Loads the unprocessed queue and arms a timer for the front item.
    /// Empty queue leaves the scheduler idle. Calling while a timer is
    /// already armed rearms deterministically for the current front item.
    pub async fn process(self: &Arc<Self>) {
        let items = match self.queue_store.get_unprocessed().await {
            Ok(items) => items,
            Err(error) => {
                return warn!(%error, "Failed to get unprocessed conversions");
            }
        };

        let Some(front) = items.into_iter().next() else {
            self.disarm();
            return debug!("Conversion queue is empty");
        };

        self.arm_timer(front);
    }

    /// Disarms any pending timer and leaves the queue untouched. Called on
    /// engine teardown.
    pub fn shutdown(&self) {
        self.disarm();
    }

    /// Whether a timer is currently armed for a queue item.
    pub fn is_scheduled(&self) -> bool {
        self.timer
            .lock()
            .expect("conversion timer poisoned")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn disarm(&self) {
        if let Some(handle) = self
            .timer
            .lock()
            .expect("conversion timer poisoned")
            .take()
        {
            handle.abort();
        }
    }

    fn arm_timer(self: &Arc<Self>, item: ConversionQueueItem) {
        let now = Utc::now();
        let delay = if now < item.process_at {
            item.process_at - now
        } else {
            // Past due, e.g. the browser was offline beyond process_at.
            // Spread overdue conversions over a short random window instead
            // of firing them all at once on startup.
            self.delay_source
                .uniform(self.config.overdue_convert_after())
        };

        info!(
            ad_type = ?item.ad_type,
            campaign_id = %item.campaign_id,
            creative_set_id = %item.creative_set_id,
            creative_instance_id = %item.creative_instance_id,
            advertiser_id = %item.advertiser_id,
            process_at = %(now + delay),
            "Scheduled conversion"
        );

        // The handle must land in the slot before the spawned task can
        // re-arm, or a timer firing at once would have its successor
        // aborted by this stale store. Keep the lock across the spawn;
        // nothing is awaited while it is held.
        let mut timer = self.timer.lock().expect("conversion timer poisoned");

        let this = Arc::clone(self);
        let sleep_for = delay.to_std().unwrap_or_default();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(sleep_for).await;
            this.process_queue().await;
        });

        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    // Re-reads the front of the queue when the timer fires; the queue may
    // have changed while the timer was pending.
    async fn process_queue(self: &Arc<Self>) {
        let items = match self.queue_store.get_unprocessed().await {
            Ok(items) => items,
            Err(error) => {
                return warn!(%error, "Failed to get conversion queue");
            }
        };

        let Some(front) = items.into_iter().next() else {
            return debug!("Conversion queue is empty");
        };

        self.process_queue_item(front).await;
    }

    async fn process_queue_item(self: &Arc<Self>, item: ConversionQueueItem) {
        if !item.is_valid() {
            return self.evict_invalid_queue_item(item).await;
        }

        self.mark_queue_item_processed(item).await;
    }

    async fn evict_invalid_queue_item(self: &Arc<Self>, item: ConversionQueueItem) {
        if let Err(error) = self.queue_store.delete(&item).await {
            // The item was just read back; a failing delete means the
            // storage layer is corrupt.
            panic!("Failed to remove invalid conversion: {error}");
        }

        warn!(
            ad_type = ?item.ad_type,
            campaign_id = %item.campaign_id,
            creative_set_id = %item.creative_set_id,
            creative_instance_id = %item.creative_instance_id,
            advertiser_id = %item.advertiser_id,
            "Failed to convert ad"
        );

        self.observers.notify_failed(&item);

        self.process().await;
    }

    async fn mark_queue_item_processed(self: &Arc<Self>, item: ConversionQueueItem) {
        let mut processed = item;
        processed.was_processed = true;

        if let Err(error) = self.queue_store.update(&processed).await {
            panic!("Failed to mark conversion as processed: {error}");
        }

        info!(
            ad_type = ?processed.ad_type,
            campaign_id = %processed.campaign_id,
            creative_set_id = %processed.creative_set_id,
            creative_instance_id = %processed.creative_instance_id,
            advertiser_id = %processed.advertiser_id,
            "Successfully converted ad"
        );

        self.observers.notify_succeeded(&processed);

        self.process().await;
    }
}

impl Drop for ConversionQueueScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self
            .timer
            .lock()
            .expect("conversion timer poisoned")
            .take()
        {
            handle.abort();
        }
    }
}
