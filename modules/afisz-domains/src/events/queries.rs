//! Read-path queries shared with the HTTP API: upcoming events with a
//! venue, optionally filtered by category, location, artist, or tag.
//! Visibility rules match the similarity path: past or venueless events are
//! never returned.

use afisz_core::error::AfiszError;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::tags::normalize_tag;

use super::model::{order_graphs_by, EventGraph};

#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    pub category: Option<String>,
    pub location: Option<String>,
    pub artist: Option<String>,
    pub tag: Option<String>,
}

/// Upcoming events with a venue, soonest first, hydrated with their full
/// graphs.
pub async fn list_upcoming(
    filters: &EventFilters,
    limit: i64,
    offset: i64,
    pool: &PgPool,
) -> Result<Vec<EventGraph>, AfiszError> {
    let mut qb = QueryBuilder::new("SELECT e.id FROM events e ");
    push_visibility_and_filters(&mut qb, filters);
    qb.push("ORDER BY e.start_date ASC, e.id ASC LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let ids: Vec<i64> = qb.build_query_scalar().fetch_all(pool).await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let graphs = EventGraph::load(&ids, pool).await?;
    Ok(order_graphs_by(&ids, graphs))
}

pub async fn count_upcoming(filters: &EventFilters, pool: &PgPool) -> Result<i64, AfiszError> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM events e ");
    push_visibility_and_filters(&mut qb, filters);
    let count = qb.build_query_scalar().fetch_one(pool).await?;
    Ok(count)
}

/// Categories with at least one upcoming, venue-backed event.
pub async fn distinct_categories(pool: &PgPool) -> Result<Vec<String>, AfiszError> {
    sqlx::query_scalar(
        "SELECT DISTINCT category FROM events \
         WHERE start_date >= NOW() AND place_id IS NOT NULL \
         ORDER BY category",
    )
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

/// Locations with at least one upcoming, venue-backed event.
pub async fn distinct_locations(pool: &PgPool) -> Result<Vec<String>, AfiszError> {
    sqlx::query_scalar(
        "SELECT DISTINCT location FROM events \
         WHERE start_date >= NOW() AND place_id IS NOT NULL \
         ORDER BY location",
    )
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

fn push_visibility_and_filters<'args>(
    qb: &mut QueryBuilder<'args, Postgres>,
    filters: &'args EventFilters,
) {
    qb.push("WHERE e.start_date >= NOW() AND e.place_id IS NOT NULL ");

    if let Some(category) = &filters.category {
        qb.push("AND e.category = ");
        qb.push_bind(category);
        qb.push(" ");
    }
    if let Some(location) = &filters.location {
        qb.push("AND e.location = ");
        qb.push_bind(location);
        qb.push(" ");
    }
    if let Some(artist) = &filters.artist {
        qb.push(
            "AND EXISTS (SELECT 1 FROM event_artists ea \
             JOIN artists a ON a.id = ea.artist_id \
             WHERE ea.event_id = e.id AND a.artist_name = ",
        );
        qb.push_bind(artist);
        qb.push(") ");
    }
    if let Some(tag) = &filters.tag {
        // Filter input goes through the same normalization as ingestion, so
        // "Rock-Alternatywny" matches the stored "rock alternatywny" row.
        qb.push(
            "AND EXISTS (SELECT 1 FROM event_tags et \
             JOIN tags t ON t.id = et.tag_id \
             WHERE et.event_id = e.id AND t.tag_name = ",
        );
        qb.push_bind(normalize_tag(tag));
        qb.push(") ");
    }
}
