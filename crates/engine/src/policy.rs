//! Policy seams owned by the embedding application.

use chrono::Duration;
use rand::Rng;
use url::Url;

/// Decides whether a landing URL may participate in conversion matching.
pub trait UrlSupportPolicy: Send + Sync {
    fn is_supported(&self, url: &Url) -> bool;
}

/// Default policy: conversions only run over https pages.
pub struct HttpsSupportPolicy;

impl UrlSupportPolicy for HttpsSupportPolicy {
    fn is_supported(&self, url: &Url) -> bool {
        url.scheme() == "https"
    }
}

/// Whether the user participates in the private-ads program. Gates
/// notification-ad conversions.
pub trait PrivateAdsOptInPolicy: Send + Sync {
    fn is_opted_in(&self) -> bool;
}

/// Fixed opt-in state, set once at construction.
pub struct StaticOptInPolicy(pub bool);

impl PrivateAdsOptInPolicy for StaticOptInPolicy {
    fn is_opted_in(&self) -> bool {
        self.0
    }
}

/// Uniformly-distributed delay source. Injectable so tests can pin delays
/// to zero; cryptographic quality is not required.
pub trait DelaySource: Send + Sync {
    /// Draws a delay uniformly from `[0, max]`.
    fn uniform(&self, max: Duration) -> Duration;
}

/// Production delay source backed by the thread-local RNG.
pub struct RandDelaySource;

impl DelaySource for RandDelaySource {
    fn uniform(&self, max: Duration) -> Duration {
        let max_ms = max.num_milliseconds().max(0);
        Duration::milliseconds(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Fixed delay source for tests.
pub struct FixedDelaySource(pub Duration);

impl DelaySource for FixedDelaySource {
    fn uniform(&self, max: Duration) -> Duration {
        self.0.min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_support_policy() {
        let policy = HttpsSupportPolicy;
        assert!(policy.is_supported(&Url::parse("https://example.com/").unwrap()));
        assert!(!policy.is_supported(&Url::parse("http://example.com/").unwrap()));
        assert!(!policy.is_supported(&Url::parse("file:///tmp/page.html").unwrap()));
    }

    #[test]
    fn test_rand_delay_source_stays_in_bounds() {
        let source = RandDelaySource;
        let max = Duration::days(1);
        for _ in 0..100 {
            let delay = source.uniform(max);
            assert!(delay >= Duration::zero());
            assert!(delay <= max);
        }
    }

    #[test]
    fn test_fixed_delay_source_is_capped() {
        let source = FixedDelaySource(Duration::minutes(5));
        assert_eq!(source.uniform(Duration::minutes(1)), Duration::minutes(1));
        assert_eq!(source.uniform(Duration::hours(1)), Duration::minutes(5));
    }
}
