use std::collections::HashMap;

use afisz_core::error::AfiszError;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use crate::registry::NameRegistry;

/// Artist names are unique case-sensitively after trimming; rows are created
/// on first reference and never deleted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Artist {
    pub id: i64,
    pub artist_name: String,
}

impl Artist {
    pub async fn count(pool: &PgPool) -> Result<i64, AfiszError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM artists")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

pub struct ArtistRegistry {
    inner: NameRegistry,
}

impl Default for ArtistRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtistRegistry {
    pub fn new() -> Self {
        Self {
            inner: NameRegistry::new("artists", "artist_name"),
        }
    }

    /// Map each supplied name to its artist id, creating missing artists.
    pub async fn find_or_create(
        &self,
        names: &[String],
        conn: &mut PgConnection,
    ) -> Result<HashMap<String, i64>, AfiszError> {
        self.inner.find_or_create(names, conn).await
    }

    pub fn clear_cache(&self) {
        self.inner.clear_cache();
    }

    pub fn cached_len(&self) -> usize {
        self.inner.cached_len()
    }
}
