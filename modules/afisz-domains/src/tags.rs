use std::collections::HashMap;

use afisz_core::error::AfiszError;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use crate::registry::NameRegistry;

/// Tag names are stored normalized (see [`normalize_tag`]); uniqueness holds
/// over the normalized form.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub tag_name: String,
}

impl Tag {
    pub async fn count(pool: &PgPool) -> Result<i64, AfiszError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

/// Normalize a tag name: lowercase, `-`/`_` become spaces, remaining
/// non-alphanumerics are stripped (diacritics survive), whitespace runs
/// collapse to a single space.
pub fn normalize_tag(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let kept: String = lowered
        .chars()
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct TagRegistry {
    inner: NameRegistry,
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TagRegistry {
    pub fn new() -> Self {
        Self {
            inner: NameRegistry::new("tags", "tag_name"),
        }
    }

    /// Map each supplied raw name to a tag id. Names normalizing to the same
    /// form share one row; names normalizing to nothing are dropped.
    pub async fn find_or_create(
        &self,
        names: &[String],
        conn: &mut PgConnection,
    ) -> Result<HashMap<String, i64>, AfiszError> {
        let mut normalized_for: HashMap<&str, String> = HashMap::new();
        let mut unique: Vec<String> = Vec::new();
        for name in names {
            let normalized = normalize_tag(name);
            if normalized.is_empty() {
                continue;
            }
            if !unique.contains(&normalized) {
                unique.push(normalized.clone());
            }
            normalized_for.insert(name.as_str(), normalized);
        }

        let by_normalized = self.inner.find_or_create(&unique, conn).await?;

        let mut resolved = HashMap::new();
        for (raw, normalized) in normalized_for {
            if let Some(id) = by_normalized.get(&normalized) {
                resolved.insert(raw.to_string(), *id);
            }
        }
        Ok(resolved)
    }

    pub fn clear_cache(&self) {
        self.inner.clear_cache();
    }

    pub fn cached_len(&self) -> usize {
        self.inner.cached_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_normalize_to_one_form() {
        for raw in ["Rock Alternatywny", "rock-alternatywny", "Rock_Alternatywny"] {
            assert_eq!(normalize_tag(raw), "rock alternatywny");
        }
    }

    #[test]
    fn diacritics_survive() {
        assert_eq!(normalize_tag("Muzyka Źródeł"), "muzyka źródeł");
    }

    #[test]
    fn punctuation_is_stripped_and_whitespace_collapsed() {
        assert_eq!(normalize_tag("  Hip-Hop / Rap!  "), "hip hop rap");
        assert_eq!(normalize_tag("jazz   &   blues"), "jazz blues");
    }

    #[test]
    fn empty_after_normalization() {
        assert_eq!(normalize_tag("!!!"), "");
        assert_eq!(normalize_tag("  "), "");
    }
}
