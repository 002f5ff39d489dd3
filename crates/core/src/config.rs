use chrono::Duration;
use serde::Deserialize;

/// Conversion engine configuration. Every field has a default so embedders
/// can deserialize a partial (or empty) config table.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionsConfig {
    /// Debug builds use a fixed short delay instead of the randomized
    /// privacy window so conversions can be observed quickly.
    #[serde(default)]
    pub debug: bool,
    /// Ceiling of the randomized privacy delay before a credited
    /// conversion is reported.
    #[serde(default = "default_convert_after_secs")]
    pub convert_after_secs: u64,
    /// Fixed delay used when `debug` is set.
    #[serde(default = "default_debug_convert_after_secs")]
    pub debug_convert_after_secs: u64,
    /// Ceiling of the randomized delay applied to items already past due,
    /// e.g. after the browser was offline past their `process_at`.
    #[serde(default = "default_overdue_convert_after_secs")]
    pub overdue_convert_after_secs: u64,
    /// Fallback id regex used when the id-pattern table has no entry for
    /// the matched url pattern. Searches the page HTML for the advertiser
    /// meta tag.
    #[serde(default = "default_conversion_id_pattern")]
    pub default_conversion_id_pattern: String,
}

impl ConversionsConfig {
    pub fn convert_after(&self) -> Duration {
        Duration::seconds(self.convert_after_secs as i64)
    }

    pub fn debug_convert_after(&self) -> Duration {
        Duration::seconds(self.debug_convert_after_secs as i64)
    }

    pub fn overdue_convert_after(&self) -> Duration {
        Duration::seconds(self.overdue_convert_after_secs as i64)
    }
}

impl Default for ConversionsConfig {
    fn default() -> Self {
        Self {
            debug: false,
            convert_after_secs: default_convert_after_secs(),
            debug_convert_after_secs: default_debug_convert_after_secs(),
            overdue_convert_after_secs: default_overdue_convert_after_secs(),
            default_conversion_id_pattern: default_conversion_id_pattern(),
        }
    }
}

// Default functions
fn default_convert_after_secs() -> u64 {
    24 * 60 * 60
}
fn default_debug_convert_after_secs() -> u64 {
    60
}
fn default_overdue_convert_after_secs() -> u64 {
    60
}
fn default_conversion_id_pattern() -> String {
    "<meta.*name=\"ad-conversion-id\".*content=\"([-a-zA-Z0-9]*)\".*>".to_string()
}
