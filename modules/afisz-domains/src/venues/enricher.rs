//! Venue resolution and enrichment against the places provider.
//!
//! Every outbound call goes through the shared rate limiter, the retry
//! policy (transient errors only) and the circuit breaker. While the circuit
//! is open, resolution falls back to "no venue" and enrichment leaves the
//! row as a stub with `last_enriched_date` stamped, so the integrator keeps
//! flowing in degraded mode instead of hammering a failing provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use afisz_core::document::ScrapedEvent;
use afisz_core::error::AfiszError;
use afisz_core::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RetryPolicy};
use afisz_core::stats::PipelineStats;
use async_trait::async_trait;
use chrono::Utc;
use places_client::types::PlaceDetails;
use places_client::{PlacesClient, PlacesError};
use sqlx::PgPool;
use tracing::{info, warn};

use super::model::Venue;
use super::popularity::popularity_score;

/// Seam over the places provider so the enricher can be exercised without
/// the network.
#[async_trait]
pub trait PlacesApi: Send + Sync {
    async fn find_place_id(&self, query: &str) -> Result<Option<String>, PlacesError>;
    async fn place_details(&self, place_id: &str) -> Result<PlaceDetails, PlacesError>;
}

#[async_trait]
impl PlacesApi for PlacesClient {
    async fn find_place_id(&self, query: &str) -> Result<Option<String>, PlacesError> {
        PlacesClient::find_place_id(self, query).await
    }

    async fn place_details(&self, place_id: &str) -> Result<PlaceDetails, PlacesError> {
        PlacesClient::place_details(self, place_id).await
    }
}

#[derive(Debug, Clone)]
pub struct EnricherOptions {
    pub enabled: bool,
    pub refresh_days: i64,
    pub rate_delay: std::time::Duration,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

pub struct VenueEnricher {
    api: Arc<dyn PlacesApi>,
    pool: PgPool,
    enabled: bool,
    refresh_days: i64,
    limiter: RateLimiter,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    /// `"<scraped name>|<location hint>"` → place id.
    id_cache: RwLock<HashMap<String, String>>,
    stats: Arc<PipelineStats>,
}

impl VenueEnricher {
    pub fn new(
        api: Arc<dyn PlacesApi>,
        pool: PgPool,
        options: EnricherOptions,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            api,
            pool,
            enabled: options.enabled,
            refresh_days: options.refresh_days,
            limiter: RateLimiter::new(options.rate_delay),
            retry: options.retry,
            breaker: CircuitBreaker::new("places", options.breaker),
            id_cache: RwLock::new(HashMap::new()),
            stats,
        }
    }

    /// Resolve the document's scraped venue to a persisted place id.
    /// `None` means the event proceeds without a venue: enrichment disabled,
    /// no venue name, no provider match, or the provider is unavailable.
    pub async fn venue_for_document(&self, doc: &ScrapedEvent) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let name = doc.place.trim();
        if name.is_empty() {
            return None;
        }

        let cache_key = format!("{name}|{}", doc.location.trim());
        if let Some(place_id) = self.cached_id(&cache_key) {
            match Venue::find_by_place_id(&place_id, &self.pool).await {
                Ok(Some(venue)) => {
                    self.refresh_if_stale(&venue).await;
                    return Some(venue.place_id);
                }
                Ok(None) => {
                    // Cached id no longer backed by a row; fall through and
                    // resolve again.
                }
                Err(err) => {
                    warn!(place_id, error = %err, "venue lookup failed");
                    return None;
                }
            }
        }

        let place_id = self.resolve(name, doc.location.trim()).await?;

        match Venue::find_by_place_id(&place_id, &self.pool).await {
            Ok(Some(venue)) => {
                self.cache_id(cache_key, place_id);
                self.refresh_if_stale(&venue).await;
                Some(venue.place_id)
            }
            Ok(None) => {
                if let Err(err) = Venue::insert_stub(&place_id, name, &self.pool).await {
                    warn!(place_id, error = %err, "venue stub insert failed");
                    return None;
                }
                self.enrich(&place_id).await;
                self.cache_id(cache_key, place_id.clone());
                PipelineStats::bump(&self.stats.venues_resolved);
                Some(place_id)
            }
            Err(err) => {
                warn!(place_id, error = %err, "venue lookup failed");
                None
            }
        }
    }

    /// Text-search the provider for a place id. Fallback is `None`.
    async fn resolve(&self, name: &str, location_hint: &str) -> Option<String> {
        if !self.breaker.try_acquire() {
            PipelineStats::bump(&self.stats.venue_fallbacks);
            warn!(name, "places circuit open, skipping venue resolution");
            return None;
        }

        let query = format!("{name} {location_hint}").trim().to_string();
        let result = self
            .retry
            .run(
                || async {
                    self.limiter.acquire().await;
                    self.api.find_place_id(&query).await
                },
                PlacesError::is_transient,
            )
            .await;

        match result {
            Ok(found) => {
                self.breaker.record_success();
                found
            }
            Err(err) => {
                if err.is_transient() {
                    self.breaker.record_failure();
                }
                warn!(query, error = %err, "venue resolution failed");
                None
            }
        }
    }

    /// Fetch details and write them onto the row. On failure the row stays a
    /// stub with `last_enriched_date` stamped so it is not retried on every
    /// access.
    async fn enrich(&self, place_id: &str) {
        if !self.breaker.try_acquire() {
            PipelineStats::bump(&self.stats.venue_fallbacks);
            warn!(place_id, "places circuit open, leaving venue as stub");
            let _ = Venue::touch_enriched(place_id, &self.pool).await;
            return;
        }

        let result = self
            .retry
            .run(
                || async {
                    self.limiter.acquire().await;
                    self.api.place_details(place_id).await
                },
                PlacesError::is_transient,
            )
            .await;

        match result {
            Ok(details) => {
                self.breaker.record_success();
                let popularity =
                    popularity_score(details.rating, details.user_ratings_total.unwrap_or(0));
                if let Err(err) =
                    Venue::apply_details(place_id, &details, popularity, &self.pool).await
                {
                    warn!(place_id, error = %err, "venue detail write failed");
                }
            }
            Err(err) => {
                if err.is_transient() {
                    self.breaker.record_failure();
                }
                PipelineStats::bump(&self.stats.venues_enrich_failed);
                warn!(place_id, error = %err, "venue enrichment failed, stamping stub");
                let _ = Venue::touch_enriched(place_id, &self.pool).await;
            }
        }
    }

    async fn refresh_if_stale(&self, venue: &Venue) {
        if venue.is_stale(self.refresh_days, Utc::now()) {
            info!(place_id = %venue.place_id, "venue data stale, refreshing");
            self.enrich(&venue.place_id).await;
        }
    }

    /// Periodic sweep: re-enrich venues whose data is older than the
    /// horizon. Returns the number of venues touched.
    pub async fn refresh_stale_venues(&self, limit: i64) -> Result<u32, AfiszError> {
        let stale = Venue::stale_place_ids(self.refresh_days, limit, &self.pool).await?;
        if stale.is_empty() {
            return Ok(0);
        }
        info!(count = stale.len(), "refreshing stale venues");
        for place_id in &stale {
            self.enrich(place_id).await;
        }
        Ok(stale.len() as u32)
    }

    pub fn clear_cache(&self) {
        self.id_cache.write().expect("place id cache poisoned").clear();
    }

    pub fn cached_len(&self) -> usize {
        self.id_cache.read().expect("place id cache poisoned").len()
    }

    fn cached_id(&self, key: &str) -> Option<String> {
        self.id_cache
            .read()
            .expect("place id cache poisoned")
            .get(key)
            .cloned()
    }

    fn cache_id(&self, key: String, place_id: String) {
        self.id_cache
            .write()
            .expect("place id cache poisoned")
            .insert(key, place_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FailingApi {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PlacesApi for FailingApi {
        async fn find_place_id(&self, _query: &str) -> Result<Option<String>, PlacesError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PlacesError::Network("connection refused".into()))
        }

        async fn place_details(&self, _place_id: &str) -> Result<PlaceDetails, PlacesError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PlacesError::Network("connection refused".into()))
        }
    }

    fn enricher(api: Arc<dyn PlacesApi>) -> VenueEnricher {
        // Lazy pool: never connects, and these tests never touch it.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        VenueEnricher::new(
            api,
            pool,
            EnricherOptions {
                enabled: true,
                refresh_days: 30,
                rate_delay: Duration::ZERO,
                retry: RetryPolicy::new(1, Duration::from_millis(1)),
                breaker: CircuitBreakerConfig::default(),
            },
            Arc::new(PipelineStats::default()),
        )
    }

    #[tokio::test]
    async fn open_circuit_skips_outbound_resolution() {
        let api = Arc::new(FailingApi {
            calls: AtomicU32::new(0),
        });
        let enricher = enricher(api.clone());

        // Ten consecutive transient failures trip the breaker.
        for _ in 0..10 {
            assert!(enricher.resolve("Klub Stodoła", "Warszawa").await.is_none());
        }
        let calls_when_tripped = api.calls.load(Ordering::SeqCst);

        // The next resolve falls back without going outbound.
        assert!(enricher.resolve("Klub Stodoła", "Warszawa").await.is_none());
        assert_eq!(api.calls.load(Ordering::SeqCst), calls_when_tripped);
        assert_eq!(
            enricher.stats.venue_fallbacks.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn disabled_enricher_returns_no_venue() {
        let api = Arc::new(FailingApi {
            calls: AtomicU32::new(0),
        });
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let enricher = VenueEnricher::new(
            api.clone(),
            pool,
            EnricherOptions {
                enabled: false,
                refresh_days: 30,
                rate_delay: Duration::ZERO,
                retry: RetryPolicy::new(1, Duration::from_millis(1)),
                breaker: CircuitBreakerConfig::default(),
            },
            Arc::new(PipelineStats::default()),
        );

        let doc = ScrapedEvent {
            event_name: "Test".into(),
            start_date: "null".into(),
            end_date: "null".into(),
            thumbnail: String::new(),
            url: "https://example.com/e/1".into(),
            location: "Warszawa".into(),
            place: "Klub Stodoła".into(),
            category: "Koncert".into(),
            tags: String::new(),
            artists: String::new(),
            description: String::new(),
            source: "test".into(),
        };
        assert!(enricher.venue_for_document(&doc).await.is_none());
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }
}
