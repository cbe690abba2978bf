use std::sync::Arc;

use afisz_core::ScrapedEvent;
use afisz_harvester::adapters::SourceAdapter;
use afisz_harvester::orchestrator::ScrapeOrchestrator;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Adapter stub emitting canned records, optionally failing outright.
struct FakeAdapter {
    name: &'static str,
    urls: Vec<&'static str>,
    fail: bool,
    delay_ms: u64,
}

impl FakeAdapter {
    fn emitting(name: &'static str, urls: Vec<&'static str>) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            name,
            urls,
            fail: false,
            delay_ms: 0,
        })
    }

    fn failing(name: &'static str) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            name,
            urls: Vec::new(),
            fail: true,
            delay_ms: 0,
        })
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self) -> Result<Vec<Value>> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail {
            return Err(anyhow!("portal unreachable"));
        }
        Ok(self.urls.iter().map(|url| json!({ "url": url })).collect())
    }

    fn map(&self, raw: &[Value]) -> Vec<ScrapedEvent> {
        raw.iter()
            .map(|record| ScrapedEvent {
                event_name: "event".into(),
                start_date: "null".into(),
                end_date: "null".into(),
                thumbnail: String::new(),
                url: record["url"].as_str().unwrap_or_default().to_string(),
                location: String::new(),
                place: String::new(),
                category: String::new(),
                tags: String::new(),
                artists: String::new(),
                description: String::new(),
                source: self.name.to_string(),
            })
            .collect()
    }
}

#[tokio::test]
async fn merges_all_adapters() {
    let orchestrator = ScrapeOrchestrator::new(
        vec![
            FakeAdapter::emitting("a", vec!["https://a/1", "https://a/2"]),
            FakeAdapter::emitting("b", vec!["https://b/1"]),
        ],
        4,
        100,
    );
    let documents = orchestrator.run().await;
    assert_eq!(documents.len(), 3);
}

#[tokio::test]
async fn duplicate_urls_resolve_first_write_wins() {
    let orchestrator = ScrapeOrchestrator::new(
        vec![
            FakeAdapter::emitting("first", vec!["https://shared/1"]),
            FakeAdapter::emitting("second", vec!["https://shared/1", "https://second/2"]),
        ],
        4,
        100,
    );
    let documents = orchestrator.run().await;
    assert_eq!(documents.len(), 2);
    // The merge walks adapters in registration order, so the earlier
    // adapter's document survives even if the later one finished first.
    let shared = documents
        .iter()
        .find(|doc| doc.url == "https://shared/1")
        .unwrap();
    assert_eq!(shared.source, "first");
}

#[tokio::test]
async fn slow_first_adapter_still_wins_duplicates() {
    let slow: Arc<dyn SourceAdapter> = Arc::new(FakeAdapter {
        name: "slow",
        urls: vec!["https://shared/1"],
        fail: false,
        delay_ms: 50,
    });
    let orchestrator = ScrapeOrchestrator::new(
        vec![slow, FakeAdapter::emitting("fast", vec!["https://shared/1"])],
        4,
        100,
    );
    let documents = orchestrator.run().await;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].source, "slow");
}

#[tokio::test]
async fn one_failing_adapter_does_not_abort_the_others() {
    let orchestrator = ScrapeOrchestrator::new(
        vec![
            FakeAdapter::failing("broken"),
            FakeAdapter::emitting("healthy", vec!["https://h/1", "https://h/2"]),
        ],
        4,
        100,
    );
    let documents = orchestrator.run().await;
    assert_eq!(documents.len(), 2);
    assert!(documents.iter().all(|doc| doc.source == "healthy"));
}

#[tokio::test]
async fn global_cap_bounds_the_merge() {
    let orchestrator = ScrapeOrchestrator::new(
        vec![
            FakeAdapter::emitting("a", vec!["https://a/1", "https://a/2", "https://a/3"]),
            FakeAdapter::emitting("b", vec!["https://b/1", "https://b/2"]),
        ],
        4,
        4,
    );
    let documents = orchestrator.run().await;
    assert_eq!(documents.len(), 4);
}
