use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AfiszError;
use crate::resilience::CircuitBreakerConfig;

/// Vector dimension baked into the `events.embedding vector(1536)` column.
/// The configured dimension must match it; a mismatch is fatal at startup.
pub const SCHEMA_EMBEDDING_DIM: usize = 1536;

/// Pipeline options recognized under the `AFISZ_` prefix. Anything else with
/// that prefix is rejected at load so typos fail loudly instead of silently
/// falling back to a default.
const KNOWN_KEYS: &[&str] = &[
    "AFISZ_SCRAPE_CAP_PER_SOURCE",
    "AFISZ_SCRAPE_CONCURRENCY",
    "AFISZ_INTEGRATOR_CHUNK",
    "AFISZ_INTEGRATOR_BATCH",
    "AFISZ_INTEGRATOR_TICK_SECS",
    "AFISZ_PLACES_ENRICH_ENABLED",
    "AFISZ_PLACES_REFRESH_DAYS",
    "AFISZ_PLACES_RATE_DELAY_MS",
    "AFISZ_PLACES_REFRESH_HOUR",
    "AFISZ_EMBEDDING_MODEL",
    "AFISZ_EMBEDDING_DIMENSIONS",
    "AFISZ_EMBEDDING_SUBBATCH",
    "AFISZ_EMBEDDING_SLEEP_SECS",
    "AFISZ_EMBEDDING_SWEEP_LIMIT",
    "AFISZ_RETRY_MAX",
    "AFISZ_RETRY_WAIT_MS",
    "AFISZ_CB_FAILURE_RATE",
    "AFISZ_CB_WINDOW",
    "AFISZ_CB_MIN_CALLS",
    "AFISZ_CB_OPEN_WAIT_SECS",
    "AFISZ_CB_HALF_OPEN_PROBES",
    "AFISZ_HTTP_TIMEOUT_SECS",
];

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,

    // Providers
    pub openai_api_key: String,
    pub google_maps_api_key: Option<String>,
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,

    // Scraping
    pub scrape_cap_per_source: usize,
    pub scrape_concurrency: usize,

    // Integrator
    pub integrator_chunk: usize,
    pub integrator_batch: usize,
    pub integrator_tick: Duration,

    // Venue enrichment
    pub places_enrich_enabled: bool,
    pub places_refresh_days: i64,
    pub places_rate_delay: Duration,
    pub places_refresh_hour: u32,

    // Embeddings
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_subbatch: usize,
    pub embedding_sleep: Duration,
    pub embedding_sweep_limit: i64,

    // Resilience
    pub retry_max: u32,
    pub retry_wait: Duration,
    pub circuit_breaker: CircuitBreakerConfig,

    // HTTP
    pub http_timeout: Duration,
}

impl AppConfig {
    /// Load configuration from the environment (and `.env` if present).
    /// Fails on missing required variables, unknown `AFISZ_` options, and an
    /// embedding dimension that disagrees with the schema.
    pub fn from_env() -> Result<Self, AfiszError> {
        dotenvy::dotenv().ok();
        reject_unknown_keys()?;

        let places_enrich_enabled = parsed("AFISZ_PLACES_ENRICH_ENABLED", false)?;
        let google_maps_api_key = env::var("GOOGLE_MAPS_API_KEY").ok();
        if places_enrich_enabled && google_maps_api_key.is_none() {
            return Err(AfiszError::Config(
                "GOOGLE_MAPS_API_KEY is required when AFISZ_PLACES_ENRICH_ENABLED=true".into(),
            ));
        }

        let embedding_dimensions = parsed("AFISZ_EMBEDDING_DIMENSIONS", SCHEMA_EMBEDDING_DIM)?;
        if embedding_dimensions != SCHEMA_EMBEDDING_DIM {
            return Err(AfiszError::Config(format!(
                "AFISZ_EMBEDDING_DIMENSIONS={embedding_dimensions} does not match the \
                 vector({SCHEMA_EMBEDDING_DIM}) schema column"
            )));
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            openai_api_key: required("OPENAI_API_KEY")?,
            google_maps_api_key,
            browserless_url: env::var("BROWSERLESS_URL").ok(),
            browserless_token: env::var("BROWSERLESS_TOKEN").ok(),
            scrape_cap_per_source: parsed("AFISZ_SCRAPE_CAP_PER_SOURCE", 3000)?,
            scrape_concurrency: parsed("AFISZ_SCRAPE_CONCURRENCY", 4)?,
            integrator_chunk: parsed("AFISZ_INTEGRATOR_CHUNK", 50)?,
            integrator_batch: parsed("AFISZ_INTEGRATOR_BATCH", 1000)?,
            integrator_tick: Duration::from_secs(parsed("AFISZ_INTEGRATOR_TICK_SECS", 10u64)?),
            places_enrich_enabled,
            places_refresh_days: parsed("AFISZ_PLACES_REFRESH_DAYS", 30)?,
            places_rate_delay: Duration::from_millis(parsed("AFISZ_PLACES_RATE_DELAY_MS", 200u64)?),
            places_refresh_hour: parsed("AFISZ_PLACES_REFRESH_HOUR", 3u32)?,
            embedding_model: env::var("AFISZ_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimensions,
            embedding_subbatch: parsed("AFISZ_EMBEDDING_SUBBATCH", 20)?,
            embedding_sleep: Duration::from_secs(parsed("AFISZ_EMBEDDING_SLEEP_SECS", 1u64)?),
            embedding_sweep_limit: parsed("AFISZ_EMBEDDING_SWEEP_LIMIT", 1000i64)?,
            retry_max: parsed("AFISZ_RETRY_MAX", 3u32)?,
            retry_wait: Duration::from_millis(parsed("AFISZ_RETRY_WAIT_MS", 300u64)?),
            circuit_breaker: CircuitBreakerConfig {
                failure_rate_threshold: parsed("AFISZ_CB_FAILURE_RATE", 50.0)?,
                window_size: parsed("AFISZ_CB_WINDOW", 100)?,
                min_calls: parsed("AFISZ_CB_MIN_CALLS", 10)?,
                open_wait: Duration::from_secs(parsed("AFISZ_CB_OPEN_WAIT_SECS", 30u64)?),
                half_open_probes: parsed("AFISZ_CB_HALF_OPEN_PROBES", 10u32)?,
            },
            http_timeout: Duration::from_secs(parsed("AFISZ_HTTP_TIMEOUT_SECS", 10u64)?),
        })
    }

    /// Pool sized for the adapter fan-out, the integrator, and the embedding
    /// worker plus read path.
    pub fn pool_size(&self) -> u32 {
        self.scrape_concurrency as u32 + 1 + 2
    }

    /// Log key lengths (never values) for startup debugging.
    pub fn log_redacted(&self) {
        for (name, value) in [
            ("OPENAI_API_KEY", Some(&self.openai_api_key)),
            ("GOOGLE_MAPS_API_KEY", self.google_maps_api_key.as_ref()),
            ("BROWSERLESS_TOKEN", self.browserless_token.as_ref()),
        ] {
            match value {
                Some(v) => tracing::info!("{name} = ({} chars)", v.len()),
                None => tracing::info!("{name} = (unset)"),
            }
        }
    }
}

fn required(key: &str) -> Result<String, AfiszError> {
    env::var(key).map_err(|_| AfiszError::Config(format!("{key} environment variable is required")))
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, AfiszError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AfiszError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn reject_unknown_keys() -> Result<(), AfiszError> {
    for (key, _) in env::vars() {
        if key.starts_with("AFISZ_") && !KNOWN_KEYS.contains(&key.as_str()) {
            return Err(AfiszError::Config(format!(
                "unrecognized configuration option: {key}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_prefixed_key_is_rejected() {
        env::set_var("AFISZ_INTEGRATOR_CHUNKS", "50");
        let err = reject_unknown_keys().unwrap_err();
        assert!(err.to_string().contains("AFISZ_INTEGRATOR_CHUNKS"));
        env::remove_var("AFISZ_INTEGRATOR_CHUNKS");
        assert!(reject_unknown_keys().is_ok());
    }

    #[test]
    fn parsed_falls_back_to_default() {
        env::remove_var("AFISZ_INTEGRATOR_CHUNK");
        let value: usize = parsed("AFISZ_INTEGRATOR_CHUNK", 50).unwrap();
        assert_eq!(value, 50);
    }

    #[test]
    fn parsed_rejects_garbage() {
        env::set_var("AFISZ_RETRY_MAX", "many");
        let result: Result<u32, _> = parsed("AFISZ_RETRY_MAX", 3);
        assert!(result.is_err());
        env::remove_var("AFISZ_RETRY_MAX");
    }
}
