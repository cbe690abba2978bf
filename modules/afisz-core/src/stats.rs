use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide pipeline counters. Thread-safe via atomics; cheap enough to
/// bump from any worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub events_inserted: AtomicU64,
    pub events_skipped: AtomicU64,
    pub document_errors: AtomicU64,
    pub chunks_rolled_back: AtomicU64,
    /// Start/end dates that were missing or unparseable and replaced with
    /// `now` / `now + 1h`.
    pub fabricated_timestamps: AtomicU64,
    /// Unique-violation races swallowed during relationship inserts.
    pub link_races: AtomicU64,
    pub venues_resolved: AtomicU64,
    pub venues_enrich_failed: AtomicU64,
    pub venue_fallbacks: AtomicU64,
    pub embeddings_written: AtomicU64,
    pub embedding_batch_errors: AtomicU64,
}

/// Point-in-time copy of the counters, for the status surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSnapshot {
    pub events_inserted: u64,
    pub events_skipped: u64,
    pub document_errors: u64,
    pub chunks_rolled_back: u64,
    pub fabricated_timestamps: u64,
    pub link_races: u64,
    pub venues_resolved: u64,
    pub venues_enrich_failed: u64,
    pub venue_fallbacks: u64,
    pub embeddings_written: u64,
    pub embedding_batch_errors: u64,
}

impl PipelineStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_inserted: self.events_inserted.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            document_errors: self.document_errors.load(Ordering::Relaxed),
            chunks_rolled_back: self.chunks_rolled_back.load(Ordering::Relaxed),
            fabricated_timestamps: self.fabricated_timestamps.load(Ordering::Relaxed),
            link_races: self.link_races.load(Ordering::Relaxed),
            venues_resolved: self.venues_resolved.load(Ordering::Relaxed),
            venues_enrich_failed: self.venues_enrich_failed.load(Ordering::Relaxed),
            venue_fallbacks: self.venue_fallbacks.load(Ordering::Relaxed),
            embeddings_written: self.embeddings_written.load(Ordering::Relaxed),
            embedding_batch_errors: self.embedding_batch_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let stats = PipelineStats::default();
        PipelineStats::bump(&stats.events_inserted);
        PipelineStats::add(&stats.link_races, 3);
        let snap = stats.snapshot();
        assert_eq!(snap.events_inserted, 1);
        assert_eq!(snap.link_races, 3);
        assert_eq!(snap.document_errors, 0);
    }
}
