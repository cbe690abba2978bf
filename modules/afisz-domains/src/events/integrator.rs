//! Materializes normalized event documents into the database.
//!
//! Documents are de-duplicated by canonical URL against an in-process set
//! primed from the database once per run, then processed in chunked
//! `READ COMMITTED` transactions. Each document gets a savepoint so one bad
//! document rolls back alone and never poisons the rest of its chunk; a
//! failing chunk rolls back alone and never aborts the run.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use afisz_core::document::{parse_epoch_timestamp, parse_name_list, ScrapedEvent};
use afisz_core::error::AfiszError;
use afisz_core::stats::{PipelineStats, StatsSnapshot};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, warn};

use crate::artists::{Artist, ArtistRegistry};
use crate::links::{link_artists_to_event, link_tags_to_event};
use crate::tags::{Tag, TagRegistry};
use crate::venues::{Venue, VenueEnricher};

use super::model::{Event, NewEvent};

/// Placeholder the mappers emit when a portal record has no usable URL.
const UNKNOWN_URL: &str = "Unknown URL";

#[derive(Debug, Default)]
struct ChunkOutcome {
    inserted: u32,
    skipped: u32,
    errors: u32,
}

/// Integration status surfaced to the management console.
#[derive(Debug, serde::Serialize)]
pub struct IntegrationStatus {
    pub total_events: i64,
    pub total_artists: i64,
    pub total_tags: i64,
    pub total_venues: i64,
    pub pending_documents: usize,
    pub cached_urls: usize,
    pub cached_artists: usize,
    pub cached_tags: usize,
    pub cached_place_ids: usize,
    pub counters: StatsSnapshot,
}

pub struct EventIntegrator {
    pool: PgPool,
    enricher: Arc<VenueEnricher>,
    artists: Arc<ArtistRegistry>,
    tags: Arc<TagRegistry>,
    stats: Arc<PipelineStats>,
    chunk_size: usize,
    batch_size: usize,
    seen_urls: RwLock<HashSet<String>>,
    urls_primed: AtomicBool,
    pending: tokio::sync::Mutex<VecDeque<ScrapedEvent>>,
    tick_active: AtomicBool,
}

impl EventIntegrator {
    pub fn new(
        pool: PgPool,
        enricher: Arc<VenueEnricher>,
        artists: Arc<ArtistRegistry>,
        tags: Arc<TagRegistry>,
        stats: Arc<PipelineStats>,
        chunk_size: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            enricher,
            artists,
            tags,
            stats,
            chunk_size: chunk_size.max(1),
            batch_size: batch_size.max(1),
            seen_urls: RwLock::new(HashSet::new()),
            urls_primed: AtomicBool::new(false),
            pending: tokio::sync::Mutex::new(VecDeque::new()),
            tick_active: AtomicBool::new(false),
        }
    }

    /// Queue documents for integration and process the first batch
    /// immediately. The remainder is drained by the periodic [`tick`].
    ///
    /// [`tick`]: EventIntegrator::tick
    pub async fn submit(&self, documents: Vec<ScrapedEvent>) -> Result<(), AfiszError> {
        if documents.is_empty() {
            info!("no documents to integrate");
            return Ok(());
        }
        info!(count = documents.len(), "queueing documents for integration");
        self.pending.lock().await.extend(documents);
        self.tick().await
    }

    /// Process up to one batch of pending documents. Non-reentrant: a tick
    /// that fires while another is running is skipped.
    pub async fn tick(&self) -> Result<(), AfiszError> {
        if self
            .tick_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("previous integration tick still running, skipping");
            return Ok(());
        }
        let result = self.run_tick().await;
        self.tick_active.store(false, Ordering::SeqCst);
        result
    }

    pub async fn has_pending(&self) -> bool {
        !self.pending.lock().await.is_empty()
    }

    async fn run_tick(&self) -> Result<(), AfiszError> {
        self.prime_seen_urls().await?;

        let batch: Vec<ScrapedEvent> = {
            let mut pending = self.pending.lock().await;
            let take = self.batch_size.min(pending.len());
            pending.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(());
        }

        info!(count = batch.len(), "integrating batch");
        for chunk in batch.chunks(self.chunk_size) {
            match self.process_chunk(chunk).await {
                Ok(outcome) => {
                    info!(
                        inserted = outcome.inserted,
                        skipped = outcome.skipped,
                        errors = outcome.errors,
                        "chunk committed"
                    );
                }
                Err(err) => {
                    PipelineStats::bump(&self.stats.chunks_rolled_back);
                    error!(error = %err, "chunk rolled back");
                }
            }
        }
        Ok(())
    }

    /// One chunk, one transaction.
    async fn process_chunk(&self, documents: &[ScrapedEvent]) -> Result<ChunkOutcome, AfiszError> {
        let mut outcome = ChunkOutcome::default();

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;

        for doc in documents {
            let url = doc.url.trim();
            if url.is_empty() || url == UNKNOWN_URL || self.is_seen(url) {
                outcome.skipped += 1;
                PipelineStats::bump(&self.stats.events_skipped);
                continue;
            }

            // Savepoint per document: a failed insert must not poison the
            // transaction for the documents that follow.
            sqlx::query("SAVEPOINT document").execute(&mut *tx).await?;
            match self.process_document(&mut tx, doc).await {
                Ok(()) => {
                    sqlx::query("RELEASE SAVEPOINT document")
                        .execute(&mut *tx)
                        .await?;
                    self.mark_seen(url);
                    outcome.inserted += 1;
                    PipelineStats::bump(&self.stats.events_inserted);
                }
                Err(AfiszError::Race(reason)) => {
                    // A concurrent integrator materialized this URL first;
                    // that is a success, not a failure.
                    sqlx::query("ROLLBACK TO SAVEPOINT document")
                        .execute(&mut *tx)
                        .await?;
                    self.mark_seen(url);
                    outcome.skipped += 1;
                    PipelineStats::bump(&self.stats.events_skipped);
                    debug!(url, reason, "document raced with a concurrent writer");
                }
                Err(err) => {
                    sqlx::query("ROLLBACK TO SAVEPOINT document")
                        .execute(&mut *tx)
                        .await?;
                    outcome.errors += 1;
                    PipelineStats::bump(&self.stats.document_errors);
                    warn!(url, error = %err, "document failed, continuing with chunk");
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn process_document(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        doc: &ScrapedEvent,
    ) -> Result<(), AfiszError> {
        let (start_date, end_date) = self.parse_window(doc);

        // Venue resolution completes before the event row exists. It runs
        // outside the chunk transaction: venues are independently owned and
        // survive a chunk rollback.
        let place_id = self.enricher.venue_for_document(doc).await;

        let event_id = NewEvent {
            event_name: doc.event_name.clone(),
            start_date,
            end_date,
            thumbnail: doc.thumbnail.clone(),
            url: doc.url.trim().to_string(),
            location: doc.location.clone(),
            category: doc.category.clone(),
            description: doc.description.clone(),
            source: doc.source.clone(),
            place_id,
        }
        .insert(&mut **tx)
        .await?;

        let artist_names = parse_name_list(&doc.artists);
        if !artist_names.is_empty() {
            let resolved = self.artists.find_or_create(&artist_names, &mut **tx).await?;
            let ids: Vec<i64> = resolved.values().copied().collect();
            link_artists_to_event(event_id, &ids, &mut **tx, &self.stats).await?;
        }

        let tag_names = parse_name_list(&doc.tags);
        if !tag_names.is_empty() {
            let resolved = self.tags.find_or_create(&tag_names, &mut **tx).await?;
            let ids: Vec<i64> = resolved.values().copied().collect();
            link_tags_to_event(event_id, &ids, &mut **tx, &self.stats).await?;
        }

        Ok(())
    }

    /// Parse the document's start/end timestamps. Missing or unparseable
    /// values are replaced with `now` / `now + 1h` rather than dropping the
    /// document; every substitution bumps the `fabricated_timestamps`
    /// counter.
    fn parse_window(&self, doc: &ScrapedEvent) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        let start_date = match parse_epoch_timestamp(&doc.start_date) {
            Some(ts) => ts,
            None => {
                PipelineStats::bump(&self.stats.fabricated_timestamps);
                now
            }
        };
        let end_date = match parse_epoch_timestamp(&doc.end_date) {
            Some(ts) => ts,
            None => {
                PipelineStats::bump(&self.stats.fabricated_timestamps);
                now + Duration::hours(1)
            }
        };
        (start_date, end_date)
    }

    async fn prime_seen_urls(&self) -> Result<(), AfiszError> {
        if self
            .urls_primed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        match Event::all_urls(&self.pool).await {
            Ok(urls) => {
                info!(count = urls.len(), "primed seen-URL set from database");
                let mut seen = self.seen_urls.write().expect("seen urls poisoned");
                seen.extend(urls);
                Ok(())
            }
            Err(err) => {
                // Allow a later tick to retry priming.
                self.urls_primed.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn is_seen(&self, url: &str) -> bool {
        self.seen_urls
            .read()
            .expect("seen urls poisoned")
            .contains(url)
    }

    fn mark_seen(&self, url: &str) {
        self.seen_urls
            .write()
            .expect("seen urls poisoned")
            .insert(url.to_string());
    }

    /// Admin surface: drop every in-process cache. The next tick re-primes
    /// the URL set from the database.
    pub fn clear_caches(&self) {
        self.seen_urls.write().expect("seen urls poisoned").clear();
        self.urls_primed.store(false, Ordering::SeqCst);
        self.artists.clear_cache();
        self.tags.clear_cache();
        self.enricher.clear_cache();
        info!("integration caches cleared");
    }

    pub async fn status(&self) -> Result<IntegrationStatus, AfiszError> {
        Ok(IntegrationStatus {
            total_events: Event::count(&self.pool).await?,
            total_artists: Artist::count(&self.pool).await?,
            total_tags: Tag::count(&self.pool).await?,
            total_venues: Venue::count(&self.pool).await?,
            pending_documents: self.pending.lock().await.len(),
            cached_urls: self.seen_urls.read().expect("seen urls poisoned").len(),
            cached_artists: self.artists.cached_len(),
            cached_tags: self.tags.cached_len(),
            cached_place_ids: self.enricher.cached_len(),
            counters: self.stats.snapshot(),
        })
    }
}
