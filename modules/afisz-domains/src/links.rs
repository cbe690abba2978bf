//! Batch linker for the event↔artist and event↔tag join tables.
//!
//! Linking is idempotent: existing pairs are read up front and skipped, and
//! pairs lost to a concurrent writer's insert are swallowed by
//! `ON CONFLICT DO NOTHING` and counted instead of raised.

use std::collections::HashSet;

use afisz_core::error::AfiszError;
use afisz_core::stats::PipelineStats;
use sqlx::PgConnection;
use tracing::debug;

pub async fn link_artists_to_event(
    event_id: i64,
    artist_ids: &[i64],
    conn: &mut PgConnection,
    stats: &PipelineStats,
) -> Result<u64, AfiszError> {
    link_pairs("event_artists", "artist_id", event_id, artist_ids, conn, stats).await
}

pub async fn link_tags_to_event(
    event_id: i64,
    tag_ids: &[i64],
    conn: &mut PgConnection,
    stats: &PipelineStats,
) -> Result<u64, AfiszError> {
    link_pairs("event_tags", "tag_id", event_id, tag_ids, conn, stats).await
}

async fn link_pairs(
    table: &str,
    column: &str,
    event_id: i64,
    ids: &[i64],
    conn: &mut PgConnection,
    stats: &PipelineStats,
) -> Result<u64, AfiszError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let select = format!("SELECT {column} FROM {table} WHERE event_id = $1");
    let existing: HashSet<i64> = sqlx::query_scalar(&select)
        .bind(event_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .collect();

    let mut fresh: Vec<i64> = Vec::new();
    for id in ids {
        if !existing.contains(id) && !fresh.contains(id) {
            fresh.push(*id);
        }
    }
    if fresh.is_empty() {
        return Ok(0);
    }

    let insert = format!(
        "INSERT INTO {table} (event_id, {column}) \
         SELECT $1, linked FROM UNNEST($2::bigint[]) AS t(linked) \
         ON CONFLICT DO NOTHING"
    );
    let inserted = sqlx::query(&insert)
        .bind(event_id)
        .bind(&fresh)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let races = fresh.len() as u64 - inserted;
    if races > 0 {
        debug!(table, event_id, races, "links already created by a concurrent writer");
        PipelineStats::add(&stats.link_races, races);
    }

    Ok(inserted)
}
