//! Batched find-or-create over a `(id, name)` table with an in-process
//! name→id cache. Artists and tags share this machinery; only the table and
//! column differ.

use std::collections::HashMap;
use std::sync::RwLock;

use afisz_core::error::AfiszError;
use sqlx::PgConnection;
use tracing::debug;

pub struct NameRegistry {
    table: &'static str,
    column: &'static str,
    cache: RwLock<HashMap<String, i64>>,
}

impl NameRegistry {
    pub fn new(table: &'static str, column: &'static str) -> Self {
        Self {
            table,
            column,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve every name to an id, creating rows that do not exist yet.
    ///
    /// Names are trimmed and empties dropped. Cache misses are looked up in
    /// one `WHERE name = ANY(..)` statement; the remainder is inserted in one
    /// batched statement with `ON CONFLICT DO NOTHING`, and names a
    /// concurrent writer inserted first are picked up by a follow-up read.
    /// Unique-constraint races therefore never surface to the caller.
    pub async fn find_or_create(
        &self,
        names: &[String],
        conn: &mut PgConnection,
    ) -> Result<HashMap<String, i64>, AfiszError> {
        let mut resolved = HashMap::new();

        let mut cleaned: Vec<String> = Vec::new();
        for name in names {
            let name = name.trim();
            if !name.is_empty() && !cleaned.iter().any(|seen| seen == name) {
                cleaned.push(name.to_string());
            }
        }
        if cleaned.is_empty() {
            return Ok(resolved);
        }

        let misses: Vec<String> = {
            let cache = self.cache.read().expect("registry cache poisoned");
            cleaned
                .iter()
                .filter(|name| {
                    if let Some(id) = cache.get(*name) {
                        resolved.insert((*name).clone(), *id);
                        false
                    } else {
                        true
                    }
                })
                .cloned()
                .collect()
        };
        if misses.is_empty() {
            return Ok(resolved);
        }

        let select = format!(
            "SELECT id, {col} FROM {table} WHERE {col} = ANY($1)",
            col = self.column,
            table = self.table,
        );
        let existing: Vec<(i64, String)> = sqlx::query_as(&select)
            .bind(&misses)
            .fetch_all(&mut *conn)
            .await?;
        for (id, name) in existing {
            resolved.insert(name, id);
        }

        let to_create: Vec<String> = misses
            .iter()
            .filter(|name| !resolved.contains_key(*name))
            .cloned()
            .collect();

        if !to_create.is_empty() {
            debug!(table = self.table, count = to_create.len(), "creating names");
            let insert = format!(
                "INSERT INTO {table} ({col}) \
                 SELECT name FROM UNNEST($1::text[]) AS t(name) \
                 ON CONFLICT ({col}) DO NOTHING \
                 RETURNING id, {col}",
                col = self.column,
                table = self.table,
            );
            let inserted: Vec<(i64, String)> = sqlx::query_as(&insert)
                .bind(&to_create)
                .fetch_all(&mut *conn)
                .await?;
            for (id, name) in inserted {
                resolved.insert(name, id);
            }

            // Names missing from RETURNING lost an insert race; re-read them.
            let raced: Vec<String> = to_create
                .iter()
                .filter(|name| !resolved.contains_key(*name))
                .cloned()
                .collect();
            if !raced.is_empty() {
                debug!(table = self.table, count = raced.len(), "re-reading raced names");
                let rows: Vec<(i64, String)> = sqlx::query_as(&select)
                    .bind(&raced)
                    .fetch_all(&mut *conn)
                    .await?;
                for (id, name) in rows {
                    resolved.insert(name, id);
                }
            }
        }

        let mut cache = self.cache.write().expect("registry cache poisoned");
        for (name, id) in &resolved {
            cache.insert(name.clone(), *id);
        }

        Ok(resolved)
    }

    pub fn clear_cache(&self) {
        self.cache.write().expect("registry cache poisoned").clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().expect("registry cache poisoned").len()
    }
}
