//! Runs every registered adapter concurrently and merges their output into
//! one de-duplicated document list.

use std::collections::HashSet;
use std::sync::Arc;

use afisz_core::ScrapedEvent;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::adapters::SourceAdapter;

pub struct ScrapeOrchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    concurrency: usize,
    global_cap: usize,
}

impl ScrapeOrchestrator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, concurrency: usize, global_cap: usize) -> Self {
        Self {
            adapters,
            concurrency: concurrency.max(1),
            global_cap,
        }
    }

    /// Fetch and map from every adapter, up to `concurrency` at a time.
    /// Every adapter completes (success or failure) before merging; an
    /// adapter failure is logged and contributes nothing, and never aborts
    /// the others. Duplicated canonical URLs resolve first-write-wins, with
    /// the merge walking adapters in registration order so the outcome is
    /// deterministic. The global cap bounds the merged output.
    pub async fn run(&self) -> Vec<ScrapedEvent> {
        let mut results: Vec<(usize, Vec<ScrapedEvent>)> = stream::iter(
            self.adapters.iter().cloned().enumerate().map(|(index, adapter)| async move {
                let documents = match adapter.fetch().await {
                    Ok(raw) => {
                        if raw.is_empty() {
                            warn!(adapter = adapter.name(), "adapter returned zero records");
                        }
                        adapter.map(&raw)
                    }
                    Err(err) => {
                        error!(adapter = adapter.name(), error = %err, "adapter failed");
                        Vec::new()
                    }
                };
                info!(
                    adapter = adapter.name(),
                    count = documents.len(),
                    "adapter finished"
                );
                (index, documents)
            }),
        )
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        // Registration order, not completion order.
        results.sort_by_key(|(index, _)| *index);

        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut merged: Vec<ScrapedEvent> = Vec::new();
        let mut duplicates = 0usize;

        'outer: for (_, documents) in results {
            for doc in documents {
                if merged.len() >= self.global_cap {
                    warn!(cap = self.global_cap, "global record cap reached");
                    break 'outer;
                }
                if seen_urls.insert(doc.url.clone()) {
                    merged.push(doc);
                } else {
                    duplicates += 1;
                }
            }
        }

        info!(
            total = merged.len(),
            duplicates, "scrape orchestration complete"
        );
        merged
    }
}
