//! Orchestration of the conversion matching pipeline.
//!
//! A page-load/redirect event enters here; ad-event history and the
//! conversion rule catalog are loaded, candidates are filtered, a
//! verifiable conversion id is extracted, and each credited match is
//! admitted to the durable queue with a randomized privacy delay.

use chrono::Utc;
use conversions_core::types::{
    AdEvent, ConfirmationType, ConversionIdPatternMap, ConversionQueueItem, VerifiableConversion,
};
use conversions_core::ConversionsConfig;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::filter::{filter_ad_events, filter_conversion_rules, sort_rules_clicks_first};
use crate::id_extractor::extract_conversion_id;
use crate::observer::{ConversionObserver, ObserverList};
use crate::policy::{
    DelaySource, HttpsSupportPolicy, PrivateAdsOptInPolicy, RandDelaySource, StaticOptInPolicy,
    UrlSupportPolicy,
};
use crate::queue::ConversionQueueScheduler;
use crate::stores::{AdEventStore, ConversionQueueStore, ConversionRuleStore};

pub struct ConversionEngine {
    ad_event_store: Arc<dyn AdEventStore>,
    rule_store: Arc<dyn ConversionRuleStore>,
    queue_store: Arc<dyn ConversionQueueStore>,
    scheduler: Arc<ConversionQueueScheduler>,
    observers: Arc<ObserverList>,
    url_support: Arc<dyn UrlSupportPolicy>,
    opt_in: Arc<dyn PrivateAdsOptInPolicy>,
    delay_source: Arc<dyn DelaySource>,
    config: ConversionsConfig,
}

impl ConversionEngine {
    /// Creates an engine with the default policies: https-only URL
    /// support, private-ads opted in, and thread-local randomized delays.
    pub fn new(
        ad_event_store: Arc<dyn AdEventStore>,
        rule_store: Arc<dyn ConversionRuleStore>,
        queue_store: Arc<dyn ConversionQueueStore>,
        config: ConversionsConfig,
    ) -> Self {
        let observers = Arc::new(ObserverList::new());
        let delay_source: Arc<dyn DelaySource> = Arc::new(RandDelaySource);
        let scheduler = ConversionQueueScheduler::new(
            queue_store.clone(),
            observers.clone(),
            delay_source.clone(),
            config.clone(),
        );

        Self {
            ad_event_store,
            rule_store,
            queue_store,
            scheduler,
            observers,
            url_support: Arc::new(HttpsSupportPolicy),
            opt_in: Arc::new(StaticOptInPolicy(true)),
            delay_source,
            config,
        }
    }

    pub fn with_url_support(mut self, policy: Arc<dyn UrlSupportPolicy>) -> Self {
        self.url_support = policy;
        self
    }

    pub fn with_opt_in_policy(mut self, policy: Arc<dyn PrivateAdsOptInPolicy>) -> Self {
        self.opt_in = policy;
        self
    }

    pub fn with_delay_source(mut self, delay_source: Arc<dyn DelaySource>) -> Self {
        // The scheduler captured the previous source; rebuild it.
        self.scheduler.shutdown();
        self.delay_source = delay_source.clone();
        self.scheduler = ConversionQueueScheduler::new(
            self.queue_store.clone(),
            self.observers.clone(),
            delay_source,
            self.config.clone(),
        );
        self
    }

    pub fn add_observer(&self, observer: Arc<dyn ConversionObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn ConversionObserver>) {
        self.observers.remove(observer);
    }

    /// Resumes draining the persisted queue, e.g. after a restart.
    pub async fn on_app_initialized(&self) {
        self.scheduler.process().await;
    }

    /// Entry point for observed page content: runs a conversion matching
    /// pass over the redirect chain and page HTML.
    pub async fn on_page_content_observed(
        &self,
        redirect_chain: &[Url],
        html: &str,
        id_patterns: &ConversionIdPatternMap,
    ) {
        self.maybe_convert(redirect_chain, html, id_patterns).await;
    }

    /// Disarms any pending timer. Queue items stay persisted and resume
    /// on the next `on_app_initialized`.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    async fn maybe_convert(
        &self,
        redirect_chain: &[Url],
        html: &str,
        id_patterns: &ConversionIdPatternMap,
    ) {
        let Some(url) = redirect_chain.last() else {
            return;
        };

        if !self.url_support.is_supported(url) {
            return debug!(%url, "URL is not supported for conversions");
        }

        debug!("Checking URL for conversions");

        let ad_events = match self.ad_event_store.get_all().await {
            Ok(ad_events) => ad_events,
            Err(error) => {
                return warn!(%error, "Failed to get ad events");
            }
        };

        let rules = match self.rule_store.get_all().await {
            Ok(rules) => rules,
            Err(error) => {
                return warn!(%error, "Failed to get conversion rules");
            }
        };

        if rules.is_empty() {
            return debug!("There are no conversion rules");
        }

        let mut matching_rules = filter_conversion_rules(redirect_chain, &rules);
        sort_rules_clicks_first(&mut matching_rules);

        // One credit per creative set, across this pass and prior passes.
        let mut converted_creative_sets = converted_creative_sets(&ad_events);
        let opted_in = self.opt_in.is_opted_in();
        let now = Utc::now();

        let mut converted = false;

        for rule in &matching_rules {
            for ad_event in filter_ad_events(&ad_events, rule, now, opted_in) {
                if converted_creative_sets.contains(&rule.creative_set_id) {
                    continue;
                }

                debug_assert_eq!(ad_event.creative_set_id, rule.creative_set_id);
                converted_creative_sets.insert(ad_event.creative_set_id.clone());

                let verifiable_conversion = VerifiableConversion {
                    id: extract_conversion_id(
                        html,
                        redirect_chain,
                        &rule.url_pattern,
                        id_patterns,
                        &self.config.default_conversion_id_pattern,
                    ),
                    public_key: rule.advertiser_public_key.clone(),
                };

                self.credit(&ad_event, verifiable_conversion).await;

                converted = true;
            }
        }

        if converted {
            info!("There was a conversion match");
        } else {
            info!("There were no conversion matches");
        }
    }

    /// Credits a match: appends a synthetic Conversion ad event
    /// (best-effort) and admits a delayed item to the durable queue.
    async fn credit(&self, ad_event: &AdEvent, verifiable_conversion: VerifiableConversion) {
        info!(
            ad_type = ?ad_event.ad_type,
            campaign_id = %ad_event.campaign_id,
            creative_set_id = %ad_event.creative_set_id,
            creative_instance_id = %ad_event.creative_instance_id,
            advertiser_id = %ad_event.advertiser_id,
            "Conversion"
        );

        let conversion_ad_event = AdEvent {
            confirmation_type: ConfirmationType::Conversion,
            created_at: Utc::now(),
            ..ad_event.clone()
        };

        // A failed log does not block queue admission.
        if let Err(error) = self.ad_event_store.append(conversion_ad_event).await {
            warn!(%error, "Failed to log conversion event");
        }

        let delay = if self.config.debug {
            self.config.debug_convert_after()
        } else {
            self.delay_source.uniform(self.config.convert_after())
        };

        let item = ConversionQueueItem {
            campaign_id: ad_event.campaign_id.clone(),
            creative_set_id: ad_event.creative_set_id.clone(),
            creative_instance_id: ad_event.creative_instance_id.clone(),
            advertiser_id: ad_event.advertiser_id.clone(),
            segment: ad_event.segment.clone(),
            ad_type: ad_event.ad_type,
            conversion_id: verifiable_conversion.id,
            advertiser_public_key: verifiable_conversion.public_key,
            process_at: Utc::now() + delay,
            was_processed: false,
        };

        if let Err(error) = self.queue_store.save(vec![item]).await {
            // The caller re-triggers via a future redirect or page event.
            return warn!(%error, "Failed to add conversion to queue");
        }

        debug!("Successfully added conversion to queue");

        self.scheduler.process().await;
    }
}

impl Drop for ConversionEngine {
    // An armed timer task keeps the scheduler alive through its own Arc;
    // disarm here so dropping the engine cancels it without requiring an
    // explicit shutdown call.
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

/// Creative sets already bearing a Conversion-type ad event; seeds the
/// dedup set so replaying the same redirect chain cannot credit twice.
fn converted_creative_sets(ad_events: &[AdEvent]) -> HashSet<String> {
    ad_events
        .iter()
        .filter(|ad_event| ad_event.confirmation_type == ConfirmationType::Conversion)
        .map(|ad_event| ad_event.creative_set_id.clone())
        .collect()
}
