//! Vector similarity retrieval: embed the query text, rank event ids by
//! cosine distance in SQL, hydrate full graphs, and restore the distance
//! order before applying visibility filters.

use afisz_core::error::AfiszError;
use chrono::Utc;
use pgvector::Vector;
use sqlx::PgPool;
use tracing::info;

use crate::embeddings::EmbeddingService;
use crate::events::{order_graphs_by, EventGraph};

/// Find events most similar to a free-text query, ordered by ascending
/// cosine distance (ties broken by id). Only future events with a venue are
/// returned; an unpopulated vector column yields an empty list, not an
/// error.
pub async fn find_similar(
    query_text: &str,
    limit: i64,
    embedder: &dyn EmbeddingService,
    pool: &PgPool,
) -> Result<Vec<EventGraph>, AfiszError> {
    let query_text = query_text.trim();
    if query_text.is_empty() {
        return Err(AfiszError::InvalidInput("query text is empty".into()));
    }

    let query_vector = Vector::from(embedder.embed(query_text).await?);

    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM events
        WHERE embedding IS NOT NULL
        ORDER BY embedding <=> $1, id ASC
        LIMIT $2
        "#,
    )
    .bind(&query_vector)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    if ids.is_empty() {
        info!("no similar events found");
        return Ok(Vec::new());
    }

    let graphs = EventGraph::load(&ids, pool).await?;
    let ordered = order_graphs_by(&ids, graphs);

    let now = Utc::now();
    let visible: Vec<EventGraph> = ordered
        .into_iter()
        .filter(|graph| graph.event.start_date >= now && graph.venue.is_some())
        .collect();

    info!(count = visible.len(), "similarity search served");
    Ok(visible)
}
