//! Browser-driven adapter for the Going search page.
//!
//! The portal renders listings client-side and loads them through an Algolia
//! XHR, so plain HTTP gets nothing. The collection script runs next to the
//! page in the headless service: it dismisses the consent overlay, clicks
//! the "load more" control until it disappears or the cap is met, and
//! intercepts the Algolia responses. Completion is gated on no tracked
//! requests remaining in flight.

use afisz_core::document::coerce_epoch_seconds;
use afisz_core::ScrapedEvent;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_client::HeadlessClient;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use tracing::{error, info};

use super::{joined_list, text_field, SourceAdapter};

const SEARCH_URL: &str = "https://goingapp.pl/szukaj?refinementList%5Btype%5D%5B0%5D=rundate&refinementList%5Btype%5D%5B1%5D=activity";
const CONSENT_SELECTOR: &str = "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll";
const LOAD_MORE_SELECTOR: &str = ".ais-InfiniteHits-loadMore";

const THUMBNAIL_PREFIX: &str =
    "https://res.cloudinary.com/dr89d8ldb/image/upload/c_fill,h_350,w_405/f_webp/q_auto:eco/v1/";

/// Puppeteer module executed by the headless service. Tracked Algolia
/// requests count up on dispatch and down on response; the gate resolves
/// when the count reaches zero, so a click's results are all collected
/// before the next click.
const COLLECT_SCRIPT: &str = r#"
export default async function ({ page, context }) {
    const records = [];
    let pending = 0;
    let resolveIdle = null;

    const idle = () => new Promise((resolve) => {
        resolveIdle = resolve;
        if (pending === 0) resolve();
    });

    page.on('request', (request) => {
        if (request.url().includes('algolia.net/1/indexes/')) {
            pending += 1;
        }
    });

    page.on('response', async (response) => {
        if (!response.url().includes('algolia.net/1/indexes/')) return;
        try {
            const contentType = response.headers()['content-type'] || '';
            if (response.status() === 200 && contentType.includes('application/json')) {
                const body = await response.json();
                const hits = body && body.results && body.results[0] && body.results[0].hits;
                if (Array.isArray(hits)) {
                    for (const hit of hits) {
                        if (records.length < context.cap) records.push(hit);
                    }
                }
            }
        } catch (err) {
            // Malformed payloads are skipped; the page keeps loading.
        } finally {
            pending -= 1;
            if (pending <= 0 && resolveIdle) resolveIdle();
        }
    });

    await page.goto(context.url, { waitUntil: 'networkidle2', timeout: 60000 });

    const consent = await page.$(context.consentSelector);
    if (consent) {
        await consent.click();
        await page.waitForTimeout(1000);
    }

    while (records.length < context.cap) {
        await idle();
        const button = await page.$(context.loadMoreSelector);
        if (!button) break;
        const disabled = await button.evaluate((el) => el.disabled);
        if (disabled) break;
        await button.click();
        await page.waitForTimeout(1500);
    }
    await idle();

    return { data: records.slice(0, context.cap), type: 'application/json' };
}
"#;

pub struct GoingAdapter {
    headless: HeadlessClient,
    cap: usize,
}

impl GoingAdapter {
    pub fn new(headless: HeadlessClient, cap: usize) -> Self {
        Self { headless, cap }
    }

    fn map_record(&self, record: &Value) -> ScrapedEvent {
        let url = match (text_field(record, "slug"), text_field(record, "rundate_slug")) {
            (Some(slug), Some(rundate)) => {
                format!("https://queue.goingapp.pl/wydarzenie/{slug}/{rundate}")
            }
            _ => "Unknown URL".to_string(),
        };

        let thumbnail = text_field(record, "thumbnail")
            .map(|path| format!("{THUMBNAIL_PREFIX}{}", encode_thumbnail_path(&path)))
            .unwrap_or_else(|| "Unknown Thumbnail".to_string());

        let location = record
            .get("locations_names")
            .and_then(|v| v.as_array())
            .and_then(|names| names.first())
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown Location".to_string());

        ScrapedEvent {
            event_name: text_field(record, "name_pl")
                .unwrap_or_else(|| "Unknown Event".to_string()),
            start_date: epoch_field(record, "start_date_timestamp"),
            end_date: epoch_field(record, "end_date_timestamp"),
            thumbnail,
            url,
            location,
            place: text_field(record, "place_name").unwrap_or_else(|| "Unknown Place".to_string()),
            category: text_field(record, "category_name")
                .unwrap_or_else(|| "Unknown Category".to_string()),
            tags: joined_list(record, "tags_names").unwrap_or_default(),
            artists: joined_list(record, "artists_names").unwrap_or_default(),
            description: text_field(record, "description_pl")
                .unwrap_or_else(|| "No Description".to_string()),
            source: "GoingApp".to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for GoingAdapter {
    fn name(&self) -> &'static str {
        "going"
    }

    async fn fetch(&self) -> Result<Vec<Value>> {
        info!(cap = self.cap, "collecting Going listings via headless browser");

        let context = serde_json::json!({
            "url": SEARCH_URL,
            "cap": self.cap,
            "consentSelector": CONSENT_SELECTOR,
            "loadMoreSelector": LOAD_MORE_SELECTOR,
        });

        let result = match self.headless.function(COLLECT_SCRIPT, context).await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "headless collection failed");
                return Err(anyhow!("Going collection failed: {err}"));
            }
        };

        // The service returns the script's array directly, or wrapped under
        // `data` depending on deployment.
        let records = match result {
            Value::Array(records) => records,
            Value::Object(mut object) => match object.remove("data") {
                Some(Value::Array(records)) => records,
                _ => return Err(anyhow!("unexpected headless payload shape")),
            },
            _ => return Err(anyhow!("unexpected headless payload shape")),
        };

        info!(count = records.len(), "finished collecting Going listings");
        Ok(records)
    }

    fn map(&self, raw: &[Value]) -> Vec<ScrapedEvent> {
        raw.iter().map(|record| self.map_record(record)).collect()
    }
}

/// Timestamps arrive as numbers or digit strings, sometimes in milliseconds.
fn epoch_field(record: &Value, field: &str) -> String {
    match record.get(field) {
        Some(Value::Number(n)) => coerce_epoch_seconds(&n.to_string()),
        Some(Value::String(s)) => coerce_epoch_seconds(s),
        _ => "null".to_string(),
    }
}

/// Percent-encode each path segment of a thumbnail path, preserving the
/// slashes between segments.
const SEGMENT_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_thumbnail_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT_ENCODE).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> GoingAdapter {
        GoingAdapter::new(HeadlessClient::new("http://localhost:3000", None), 100)
    }

    #[test]
    fn maps_an_algolia_hit() {
        let hit = json!({
            "name_pl": "Brodka: Sadza Tour",
            "artists_names": ["Brodka"],
            "tags_names": ["Pop", "Alternatywa"],
            "locations_names": ["Warszawa", "Kraków"],
            "place_name": "Klub Stodoła",
            "category_name": "Koncert",
            "slug": "brodka-sadza-tour",
            "rundate_slug": "warszawa-2025-11-08",
            "start_date_timestamp": 1762624800i64,
            "end_date_timestamp": 1762632000000i64,
            "thumbnail": "going/brodka sadza.jpg",
            "description_pl": "Nowa trasa koncertowa."
        });
        let docs = adapter().map(&[hit]);
        let doc = &docs[0];
        assert_eq!(doc.event_name, "Brodka: Sadza Tour");
        assert_eq!(
            doc.url,
            "https://queue.goingapp.pl/wydarzenie/brodka-sadza-tour/warszawa-2025-11-08"
        );
        assert_eq!(doc.location, "Warszawa");
        assert_eq!(doc.artists, "Brodka");
        assert_eq!(doc.tags, "Pop, Alternatywa");
        // Millisecond end timestamp is scaled down to seconds.
        assert_eq!(doc.start_date, "1762624800");
        assert_eq!(doc.end_date, "1762632000");
        assert_eq!(
            doc.thumbnail,
            format!("{THUMBNAIL_PREFIX}going/brodka%20sadza.jpg")
        );
        assert_eq!(doc.source, "GoingApp");
    }

    #[test]
    fn missing_slugs_mean_unknown_url() {
        let docs = adapter().map(&[json!({ "name_pl": "X", "slug": "only-half" })]);
        assert_eq!(docs[0].url, "Unknown URL");
    }

    #[test]
    fn thumbnail_segments_are_encoded_individually() {
        assert_eq!(
            encode_thumbnail_path("going/zażółć 100%.jpg"),
            "going/za%C5%BC%C3%B3%C5%82%C4%87%20100%25.jpg"
        );
    }
}
