//! Eligibility filtering of ad events against conversion rules.

use chrono::{DateTime, Utc};
use conversions_core::types::{
    AdEvent, AdType, ConfirmationType, ConversionRule, ConversionRuleType,
};
use url::Url;

use crate::url_pattern::match_url_pattern;

/// Keeps the rules whose `url_pattern` matches at least one URL in the
/// redirect chain.
pub fn filter_conversion_rules(
    redirect_chain: &[Url],
    rules: &[ConversionRule],
) -> Vec<ConversionRule> {
    rules
        .iter()
        .filter(|rule| {
            redirect_chain
                .iter()
                .any(|url| match_url_pattern(url, &rule.url_pattern))
        })
        .cloned()
        .collect()
}

/// Orders postclick rules before postview rules (stable), so a click-based
/// rule claims a creative set before a view-based rule can.
pub fn sort_rules_clicks_first(rules: &mut [ConversionRule]) {
    rules.sort_by(|lhs, rhs| {
        let rank = |rule: &ConversionRule| match rule.rule_type {
            ConversionRuleType::Postclick => 0,
            ConversionRuleType::Postview => 1,
        };
        rank(lhs).cmp(&rank(rhs))
    });
}

/// Keeps the ad events eligible for crediting under `rule` as of `now`.
pub fn filter_ad_events(
    ad_events: &[AdEvent],
    rule: &ConversionRule,
    now: DateTime<Utc>,
    opted_in_to_private_ads: bool,
) -> Vec<AdEvent> {
    ad_events
        .iter()
        .filter(|ad_event| {
            ad_event.creative_set_id == rule.creative_set_id
                && should_convert_ad_event(ad_event, opted_in_to_private_ads)
                && confirmation_matches_rule_type(ad_event.confirmation_type, rule.rule_type)
                && !observation_window_elapsed(rule.observation_window, ad_event, now)
        })
        .cloned()
        .collect()
}

/// Per-surface conversion eligibility.
pub fn should_convert_ad_event(ad_event: &AdEvent, opted_in_to_private_ads: bool) -> bool {
    match ad_event.ad_type {
        // Only convert post clicks.
        AdType::InlineContentAd | AdType::PromotedContentAd => {
            ad_event.confirmation_type != ConfirmationType::Viewed
        }

        AdType::NewTabPageAd | AdType::SearchResultAd => true,

        AdType::NotificationAd => opted_in_to_private_ads,

        AdType::Undefined => {
            unreachable!("ad event with undefined ad type")
        }
    }
}

/// Postview credits views, postclick credits clicks; no other confirmation
/// type ever matches a rule.
pub fn confirmation_matches_rule_type(
    confirmation_type: ConfirmationType,
    rule_type: ConversionRuleType,
) -> bool {
    match confirmation_type {
        ConfirmationType::Viewed => rule_type == ConversionRuleType::Postview,
        ConfirmationType::Clicked => rule_type == ConversionRuleType::Postclick,

        ConfirmationType::Served
        | ConfirmationType::Dismissed
        | ConfirmationType::Transferred
        | ConfirmationType::Saved
        | ConfirmationType::Flagged
        | ConfirmationType::Upvoted
        | ConfirmationType::Downvoted
        | ConfirmationType::Conversion => false,

        ConfirmationType::Undefined => {
            unreachable!("ad event with undefined confirmation type")
        }
    }
}

/// Strict inequality: an event created exactly `window` ago is still
/// inside the observation window.
pub fn observation_window_elapsed(
    window: chrono::Duration,
    ad_event: &AdEvent,
    now: DateTime<Utc>,
) -> bool {
    ad_event.created_at < now - window
}
