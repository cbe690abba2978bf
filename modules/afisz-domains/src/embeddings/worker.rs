//! Sweeps events whose vector is null, composes their embedding text, and
//! writes provider vectors back with the native vector type.

use std::sync::Arc;
use std::time::Duration;

use afisz_core::error::AfiszError;
use afisz_core::stats::PipelineStats;
use pgvector::Vector;
use sqlx::PgPool;
use tracing::{info, warn};

use super::text::{compose_event_text, EmbeddingSource};
use super::EmbeddingService;
use crate::events::Event;

pub struct EmbeddingWorker {
    pool: PgPool,
    embedder: Arc<dyn EmbeddingService>,
    sub_batch: usize,
    pause: Duration,
    sweep_limit: i64,
    stats: Arc<PipelineStats>,
}

impl EmbeddingWorker {
    pub fn new(
        pool: PgPool,
        embedder: Arc<dyn EmbeddingService>,
        sub_batch: usize,
        pause: Duration,
        sweep_limit: i64,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            pool,
            embedder,
            sub_batch: sub_batch.max(1),
            pause,
            sweep_limit,
            stats,
        }
    }

    /// One sweep: select up to the configured limit of events without a
    /// vector and embed them in sub-batches, pausing between provider calls.
    /// A failing sub-batch is logged and skipped; a misconfiguration
    /// (dimension mismatch, open circuit) aborts the sweep with a typed
    /// error. Returns the number of vectors written.
    pub async fn run_sweep(&self) -> Result<u32, AfiszError> {
        let missing = Event::count_missing_embedding(&self.pool).await?;
        if missing == 0 {
            info!("no events waiting for embeddings");
            return Ok(0);
        }
        info!(missing, limit = self.sweep_limit, "starting embedding sweep");

        let rows: Vec<EmbeddingSource> = sqlx::query_as(
            r#"
            SELECT e.id, e.event_name, e.category, e.location, e.description,
                   e.start_date,
                   (SELECT string_agg(a.artist_name, ', ')
                      FROM artists a
                      JOIN event_artists ea ON ea.artist_id = a.id
                     WHERE ea.event_id = e.id) AS artists,
                   (SELECT string_agg(t.tag_name, ', ')
                      FROM tags t
                      JOIN event_tags et ON et.tag_id = t.id
                     WHERE et.event_id = e.id) AS tags,
                   p.place_types, p.rating, p.user_ratings_total,
                   p.popularity_score, p.city
            FROM events e
            LEFT JOIN places p ON p.place_id = e.place_id
            WHERE e.embedding IS NULL
            ORDER BY e.id
            LIMIT $1
            "#,
        )
        .bind(self.sweep_limit)
        .fetch_all(&self.pool)
        .await?;

        let mut written = 0u32;
        let batches = rows.chunks(self.sub_batch);
        let batch_count = batches.len();
        for (index, batch) in batches.enumerate() {
            let texts: Vec<String> = batch.iter().map(compose_event_text).collect();

            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    for (source, vector) in batch.iter().zip(vectors) {
                        sqlx::query("UPDATE events SET embedding = $1 WHERE id = $2")
                            .bind(Vector::from(vector))
                            .bind(source.id)
                            .execute(&self.pool)
                            .await?;
                        written += 1;
                    }
                    PipelineStats::add(&self.stats.embeddings_written, batch.len() as u64);
                    info!(
                        written,
                        total = rows.len(),
                        "embedding sweep progress"
                    );
                }
                // Misconfiguration and an open circuit will fail every
                // remaining sub-batch the same way; stop and surface them.
                Err(err @ (AfiszError::Config(_) | AfiszError::EmbeddingUnavailable)) => {
                    return Err(err);
                }
                Err(err) => {
                    PipelineStats::bump(&self.stats.embedding_batch_errors);
                    warn!(error = %err, "embedding sub-batch failed, continuing");
                }
            }

            if index + 1 < batch_count {
                tokio::time::sleep(self.pause).await;
            }
        }

        info!(written, "embedding sweep complete");
        Ok(written)
    }
}
