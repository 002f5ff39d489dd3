//! End-to-end flow: observed page content through crediting, queue
//! persistence, the privacy delay, and observer notification.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use url::Url;

use conversions_core::types::{
    AdEvent, AdType, ConfirmationType, ConversionIdPattern, ConversionIdPatternMap,
    ConversionRule, ConversionRuleType, SearchIn,
};
use conversions_core::ConversionsConfig;
use conversions_engine::observer::CaptureObserver;
use conversions_engine::policy::FixedDelaySource;
use conversions_engine::stores::{MemoryAdEventStore, MemoryQueueStore, MemoryRuleStore};
use conversions_engine::ConversionEngine;

fn viewed_ad_event() -> AdEvent {
    AdEvent {
        ad_type: AdType::NewTabPageAd,
        confirmation_type: ConfirmationType::Viewed,
        campaign_id: "campaign-1".into(),
        creative_set_id: "creative-set-1".into(),
        creative_instance_id: "creative-instance-1".into(),
        advertiser_id: "advertiser-1".into(),
        segment: "untargeted".into(),
        created_at: Utc::now() - Duration::hours(1),
    }
}

fn postview_rule() -> ConversionRule {
    ConversionRule {
        creative_set_id: "creative-set-1".into(),
        url_pattern: "https://example.com/*".into(),
        rule_type: ConversionRuleType::Postview,
        observation_window: Duration::days(30),
        advertiser_public_key: "advertiser-public-key".into(),
    }
}

fn id_patterns() -> ConversionIdPatternMap {
    let mut table = HashMap::new();
    table.insert(
        "https://example.com/*".to_string(),
        ConversionIdPattern {
            url_pattern: "https://example.com/*".to_string(),
            search_in: SearchIn::Url,
            id_pattern: "id=(\\w+)".to_string(),
        },
    );
    table
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if done() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn page_visit_converts_and_reports_after_the_delay() {
    let ad_events = Arc::new(MemoryAdEventStore::with_events(vec![viewed_ad_event()]));
    let rules = Arc::new(MemoryRuleStore::with_rules(vec![postview_rule()]));
    let queue = Arc::new(MemoryQueueStore::new());
    let observer = Arc::new(CaptureObserver::new());

    // A zero delay source makes the privacy delay elapse immediately.
    let engine = ConversionEngine::new(
        ad_events,
        rules,
        queue.clone(),
        ConversionsConfig::default(),
    )
    .with_delay_source(Arc::new(FixedDelaySource(Duration::zero())));
    engine.add_observer(observer.clone());

    let chain = vec![Url::parse("https://example.com/landing?id=ABC123").unwrap()];
    engine
        .on_page_content_observed(&chain, "", &id_patterns())
        .await;

    let pending = observer.clone();
    wait_until(move || pending.succeeded().len() == 1).await;

    let succeeded = observer.succeeded();
    assert_eq!(succeeded[0].conversion_id, "ABC123");
    assert_eq!(succeeded[0].creative_set_id, "creative-set-1");
    assert!(observer.failed().is_empty());

    let items = queue.items();
    assert_eq!(items.len(), 1);
    assert!(items[0].was_processed);

    engine.shutdown();
}

#[tokio::test]
async fn queue_resumes_draining_after_restart() {
    // A pending item persisted by a previous run, already past due.
    let pending = conversions_core::types::ConversionQueueItem {
        campaign_id: "campaign-1".into(),
        creative_set_id: "creative-set-1".into(),
        creative_instance_id: "creative-instance-1".into(),
        advertiser_id: "advertiser-1".into(),
        segment: "untargeted".into(),
        ad_type: AdType::NewTabPageAd,
        conversion_id: String::new(),
        advertiser_public_key: String::new(),
        process_at: Utc::now() - Duration::days(2),
        was_processed: false,
    };
    let queue = Arc::new(MemoryQueueStore::with_items(vec![pending]));
    let observer = Arc::new(CaptureObserver::new());

    let engine = ConversionEngine::new(
        Arc::new(MemoryAdEventStore::new()),
        Arc::new(MemoryRuleStore::new()),
        queue.clone(),
        ConversionsConfig::default(),
    )
    .with_delay_source(Arc::new(FixedDelaySource(Duration::zero())));
    engine.add_observer(observer.clone());

    engine.on_app_initialized().await;

    let pending = observer.clone();
    wait_until(move || pending.succeeded().len() == 1).await;

    assert!(queue.items()[0].was_processed);

    engine.shutdown();
}
