use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The surface an ad was delivered on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    Undefined,
    NotificationAd,
    NewTabPageAd,
    PromotedContentAd,
    InlineContentAd,
    SearchResultAd,
}

/// Lifecycle action recorded for an ad.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationType {
    Undefined,
    Served,
    Viewed,
    Clicked,
    Dismissed,
    Transferred,
    Saved,
    Flagged,
    Upvoted,
    Downvoted,
    Conversion,
}

/// A timestamped record of an ad lifecycle action, owned by the ad-event
/// store. Immutable once logged; crediting a conversion appends a new
/// record with `confirmation_type = Conversion` rather than mutating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdEvent {
    pub ad_type: AdType,
    pub confirmation_type: ConfirmationType,
    pub campaign_id: String,
    pub creative_set_id: String,
    pub creative_instance_id: String,
    pub advertiser_id: String,
    pub segment: String,
    pub created_at: DateTime<Utc>,
}

/// Attribution mode of a conversion rule: credit impressions or clicks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversionRuleType {
    Postview,
    Postclick,
}

/// Merchant-defined rule describing what page visit, within what window,
/// counts as crediting an ad. Loaded read-only from the rule catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionRule {
    pub creative_set_id: String,
    pub url_pattern: String,
    pub rule_type: ConversionRuleType,
    #[serde(with = "duration_secs")]
    pub observation_window: Duration,
    pub advertiser_public_key: String,
}

/// Where the conversion id should be searched for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchIn {
    Url,
    Html,
}

/// Per-url-pattern override for conversion id extraction, supplied by the
/// resource-loading collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionIdPattern {
    pub url_pattern: String,
    pub search_in: SearchIn,
    pub id_pattern: String,
}

/// Lookup table keyed by url pattern.
pub type ConversionIdPatternMap = HashMap<String, ConversionIdPattern>;

/// Opaque token extracted from the converting page or URL, forwarded with
/// the report for external verification. An empty id is valid; the
/// conversion is simply not externally verifiable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerifiableConversion {
    pub id: String,
    pub public_key: String,
}

/// A credited conversion awaiting its privacy delay before the report
/// fires. Persisted in the durable queue; `was_processed` flips when the
/// scheduler resolves it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionQueueItem {
    pub campaign_id: String,
    pub creative_set_id: String,
    pub creative_instance_id: String,
    pub advertiser_id: String,
    pub segment: String,
    pub ad_type: AdType,
    pub conversion_id: String,
    pub advertiser_public_key: String,
    pub process_at: DateTime<Utc>,
    #[serde(default)]
    pub was_processed: bool,
}

impl ConversionQueueItem {
    /// A queue item is processable only if every identifying field is
    /// present. Items failing this check are evicted by the scheduler.
    pub fn is_valid(&self) -> bool {
        !self.campaign_id.is_empty()
            && !self.creative_set_id.is_empty()
            && !self.creative_instance_id.is_empty()
            && !self.advertiser_id.is_empty()
            && self.ad_type != AdType::Undefined
    }
}

mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(Duration::seconds(secs))
    }
}
