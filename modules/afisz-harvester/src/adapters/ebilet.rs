//! HTTP-paged adapter for the eBilet listing API: linear offset/size paging
//! until an empty page arrives or the per-source cap is met.

use afisz_core::ScrapedEvent;
use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use tracing::{error, info};

use super::{text_field, SourceAdapter};

const BASE_URL: &str = "https://www.ebilet.pl/api/TitleListing/Search";
const PAGE_SIZE: usize = 20;

pub struct EbiletAdapter {
    client: reqwest::Client,
    base_url: String,
    cap: usize,
}

impl EbiletAdapter {
    pub fn new(client: reqwest::Client, cap: usize) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            cap,
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    fn map_record(&self, record: &Value) -> ScrapedEvent {
        let url = text_field(record, "slug")
            .map(|slug| format!("https://www.ebilet.pl/{}", slug.trim_matches('/')))
            .unwrap_or_else(|| "Unknown URL".to_string());

        let thumbnail = text_field(record, "imageLandscape")
            .map(|image| {
                if image.starts_with("http") {
                    image
                } else {
                    format!("https://www.ebilet.pl{image}")
                }
            })
            .unwrap_or_else(|| "Unknown Thumbnail".to_string());

        ScrapedEvent {
            event_name: text_field(record, "title").unwrap_or_else(|| "Unknown Event".to_string()),
            start_date: iso_to_epoch(record, "dateFrom"),
            end_date: iso_to_epoch(record, "dateTo"),
            thumbnail,
            url,
            location: text_field(record, "city").unwrap_or_else(|| "Unknown Location".to_string()),
            place: text_field(record, "place").unwrap_or_else(|| "Unknown Place".to_string()),
            category: text_field(record, "categoryName")
                .unwrap_or_else(|| "Unknown Category".to_string()),
            tags: text_field(record, "subcategoryName").unwrap_or_default(),
            artists: text_field(record, "artists").unwrap_or_default(),
            description: text_field(record, "description")
                .unwrap_or_else(|| "No Description".to_string()),
            source: "Ebilet".to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for EbiletAdapter {
    fn name(&self) -> &'static str {
        "ebilet"
    }

    async fn fetch(&self) -> Result<Vec<Value>> {
        let mut records: Vec<Value> = Vec::new();
        let mut offset = 0usize;

        info!(cap = self.cap, "fetching eBilet listings");

        while records.len() < self.cap {
            let url = format!(
                "{}?currentTab=2&sort=1&top={offset}&size={PAGE_SIZE}",
                self.base_url
            );

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(err) => {
                    // Fatal after partial data: keep what we have.
                    error!(error = %err, fetched = records.len(), "eBilet request failed");
                    break;
                }
            };

            if !response.status().is_success() {
                error!(status = %response.status(), "eBilet returned an error page");
                break;
            }

            let body: Value = match response.json().await {
                Ok(body) => body,
                Err(err) => {
                    error!(error = %err, "eBilet payload was not JSON");
                    break;
                }
            };

            let page = body
                .get("titles")
                .and_then(|titles| titles.as_array())
                .cloned()
                .unwrap_or_default();
            if page.is_empty() {
                break;
            }

            let room = self.cap - records.len();
            records.extend(page.into_iter().take(room));
            offset += PAGE_SIZE;
        }

        info!(count = records.len(), "finished fetching eBilet listings");
        Ok(records)
    }

    fn map(&self, raw: &[Value]) -> Vec<ScrapedEvent> {
        raw.iter().map(|record| self.map_record(record)).collect()
    }
}

/// Portal dates are ISO-8601; the document contract wants epoch seconds.
fn iso_to_epoch(record: &Value, field: &str) -> String {
    text_field(record, field)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|ts| ts.timestamp().to_string())
        .unwrap_or_else(|| "null".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> EbiletAdapter {
        EbiletAdapter::new(reqwest::Client::new(), 100)
    }

    #[test]
    fn maps_a_complete_listing() {
        let record = json!({
            "title": "Męskie Granie 2025",
            "slug": "muzyka/pop-rock/meskie-granie",
            "categoryName": "Muzyka",
            "subcategoryName": "Pop / Rock",
            "city": "Warszawa",
            "place": "Tor Służewiec",
            "imageLandscape": "/media/meskie-granie.jpg",
            "dateFrom": "2025-08-22T18:00:00+02:00",
            "description": "Letnia trasa koncertowa."
        });
        let docs = adapter().map(&[record]);
        let doc = &docs[0];
        assert_eq!(doc.event_name, "Męskie Granie 2025");
        assert_eq!(doc.url, "https://www.ebilet.pl/muzyka/pop-rock/meskie-granie");
        assert_eq!(doc.thumbnail, "https://www.ebilet.pl/media/meskie-granie.jpg");
        assert_eq!(doc.start_date, "1755878400");
        assert_eq!(doc.end_date, "null");
        assert_eq!(doc.place, "Tor Służewiec");
        assert_eq!(doc.tags, "Pop / Rock");
        assert_eq!(doc.source, "Ebilet");
    }

    #[test]
    fn missing_fields_fall_back_to_placeholders() {
        let docs = adapter().map(&[json!({})]);
        let doc = &docs[0];
        assert_eq!(doc.event_name, "Unknown Event");
        assert_eq!(doc.url, "Unknown URL");
        assert_eq!(doc.start_date, "null");
        assert_eq!(doc.tags, "");
    }

    #[test]
    fn mapping_is_deterministic() {
        let record = json!({ "title": "Test", "slug": "x" });
        let a = adapter().map(std::slice::from_ref(&record));
        let b = adapter().map(std::slice::from_ref(&record));
        assert_eq!(a, b);
    }
}
