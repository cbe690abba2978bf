pub mod ebilet;
pub mod going;

use afisz_core::ScrapedEvent;
use anyhow::Result;
use async_trait::async_trait;

/// A portal adapter: `fetch` pages the portal and returns raw records,
/// `map` turns them into normalized event documents.
///
/// `fetch` stops on the first of: no further page, the per-source cap, or a
/// fatal error after partial data (in which case it returns what it has).
/// `map` must be pure and deterministic; records it cannot map are dropped
/// with a log line.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> Result<Vec<serde_json::Value>>;

    fn map(&self, raw: &[serde_json::Value]) -> Vec<ScrapedEvent>;
}

/// Pull a string field, or `None` when absent/null/empty.
pub(crate) fn text_field(record: &serde_json::Value, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Join a JSON string array field with `", "`.
pub(crate) fn joined_list(record: &serde_json::Value, field: &str) -> Option<String> {
    let items: Vec<&str> = record
        .get(field)?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    }
}
