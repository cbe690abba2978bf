use std::collections::HashMap;

use afisz_core::error::{is_unique_violation, AfiszError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use crate::artists::Artist;
use crate::tags::Tag;
use crate::venues::Venue;

/// Column list for event reads. The `embedding` column is deliberately
/// excluded: only the embedding worker writes it and only the similarity
/// query orders by it, so hydrated events never carry the vector.
const EVENT_COLUMNS: &str = "id, event_name, start_date, end_date, thumbnail, url, \
location, category, description, source, place_id";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub event_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub thumbnail: String,
    pub url: String,
    pub location: String,
    pub category: String,
    pub description: String,
    pub source: String,
    pub place_id: Option<String>,
}

/// Row to insert; the id is generated by the database.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub thumbnail: String,
    pub url: String,
    pub location: String,
    pub category: String,
    pub description: String,
    pub source: String,
    pub place_id: Option<String>,
}

impl NewEvent {
    /// Insert and return the generated id. A unique violation on `url`
    /// (another integrator materialized this event concurrently) surfaces as
    /// [`AfiszError::Race`] so callers can treat it as already-seen.
    pub async fn insert(&self, conn: &mut PgConnection) -> Result<i64, AfiszError> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO events
                (event_name, start_date, end_date, thumbnail, url, location,
                 category, description, source, place_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&self.event_name)
        .bind(self.start_date)
        .bind(self.end_date)
        .bind(&self.thumbnail)
        .bind(&self.url)
        .bind(&self.location)
        .bind(&self.category)
        .bind(&self.description)
        .bind(&self.source)
        .bind(&self.place_id)
        .fetch_one(conn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                AfiszError::Race(format!("event url already exists: {}", self.url))
            } else {
                err.into()
            }
        })?;
        Ok(id)
    }
}

impl Event {
    /// Every canonical URL already persisted. Primes the integrator's
    /// seen-URL set once per run.
    pub async fn all_urls(pool: &PgPool) -> Result<Vec<String>, AfiszError> {
        sqlx::query_scalar("SELECT url FROM events")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_ids(ids: &[i64], pool: &PgPool) -> Result<Vec<Self>, AfiszError> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ANY($1)");
        sqlx::query_as::<_, Self>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn count(pool: &PgPool) -> Result<i64, AfiszError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub async fn count_missing_embedding(pool: &PgPool) -> Result<i64, AfiszError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE embedding IS NULL")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

/// An event hydrated with its venue and related entities. In memory this is
/// a tree of owned values, not an object graph.
#[derive(Debug, Clone, Serialize)]
pub struct EventGraph {
    pub event: Event,
    pub venue: Option<Venue>,
    pub artists: Vec<Artist>,
    pub tags: Vec<Tag>,
}

impl EventGraph {
    /// Hydrate full graphs for a set of event ids. The returned order is
    /// unspecified; callers needing a particular order re-sort with
    /// [`order_graphs_by`].
    pub async fn load(ids: &[i64], pool: &PgPool) -> Result<Vec<Self>, AfiszError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let events = Event::find_by_ids(ids, pool).await?;

        let place_ids: Vec<String> = {
            let mut seen = std::collections::HashSet::new();
            events
                .iter()
                .filter_map(|e| e.place_id.clone())
                .filter(|id| seen.insert(id.clone()))
                .collect()
        };
        let venues: HashMap<String, Venue> = Venue::find_by_place_ids(&place_ids, pool)
            .await?
            .into_iter()
            .map(|v| (v.place_id.clone(), v))
            .collect();

        let artist_rows: Vec<(i64, i64, String)> = sqlx::query_as(
            r#"
            SELECT ea.event_id, a.id, a.artist_name
            FROM artists a
            JOIN event_artists ea ON ea.artist_id = a.id
            WHERE ea.event_id = ANY($1)
            ORDER BY a.artist_name
            "#,
        )
        .bind(ids)
        .fetch_all(pool)
        .await?;
        let mut artists_by_event: HashMap<i64, Vec<Artist>> = HashMap::new();
        for (event_id, id, artist_name) in artist_rows {
            artists_by_event
                .entry(event_id)
                .or_default()
                .push(Artist { id, artist_name });
        }

        let tag_rows: Vec<(i64, i64, String)> = sqlx::query_as(
            r#"
            SELECT et.event_id, t.id, t.tag_name
            FROM tags t
            JOIN event_tags et ON et.tag_id = t.id
            WHERE et.event_id = ANY($1)
            ORDER BY t.tag_name
            "#,
        )
        .bind(ids)
        .fetch_all(pool)
        .await?;
        let mut tags_by_event: HashMap<i64, Vec<Tag>> = HashMap::new();
        for (event_id, id, tag_name) in tag_rows {
            tags_by_event
                .entry(event_id)
                .or_default()
                .push(Tag { id, tag_name });
        }

        Ok(events
            .into_iter()
            .map(|event| {
                let venue = event
                    .place_id
                    .as_ref()
                    .and_then(|id| venues.get(id).cloned());
                let artists = artists_by_event.remove(&event.id).unwrap_or_default();
                let tags = tags_by_event.remove(&event.id).unwrap_or_default();
                EventGraph {
                    event,
                    venue,
                    artists,
                    tags,
                }
            })
            .collect())
    }
}

/// Re-order hydrated graphs to match an id ranking (hydration does not
/// preserve input order). Ids with no matching graph are dropped.
pub fn order_graphs_by(ids: &[i64], graphs: Vec<EventGraph>) -> Vec<EventGraph> {
    let mut by_id: HashMap<i64, EventGraph> = graphs
        .into_iter()
        .map(|graph| (graph.event.id, graph))
        .collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(id: i64) -> EventGraph {
        EventGraph {
            event: Event {
                id,
                event_name: format!("event {id}"),
                start_date: Utc::now(),
                end_date: Utc::now(),
                thumbnail: String::new(),
                url: format!("https://example.com/{id}"),
                location: String::new(),
                category: String::new(),
                description: String::new(),
                source: "test".into(),
                place_id: None,
            },
            venue: None,
            artists: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn ordering_follows_the_id_ranking_not_hydration_order() {
        let ranked = vec![7, 3, 5];
        // Hydration comes back shuffled.
        let hydrated = vec![graph(3), graph(5), graph(7)];
        let ordered = order_graphs_by(&ranked, hydrated);
        let ids: Vec<i64> = ordered.iter().map(|g| g.event.id).collect();
        assert_eq!(ids, ranked);
    }

    #[test]
    fn missing_ids_are_dropped() {
        let ordered = order_graphs_by(&[1, 2], vec![graph(2)]);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].event.id, 2);
    }
}
