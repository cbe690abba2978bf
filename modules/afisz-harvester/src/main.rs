use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use afisz_core::resilience::RetryPolicy;
use afisz_core::{AppConfig, PipelineStats};
use afisz_domains::embeddings::{EmbeddingService, EmbeddingWorker, GuardedEmbedder};
use afisz_domains::events::{queries, EventFilters, EventIntegrator};
use afisz_domains::search::find_similar;
use afisz_domains::venues::{EnricherOptions, VenueEnricher};
use afisz_domains::{ArtistRegistry, TagRegistry};
use afisz_harvester::adapters::ebilet::EbiletAdapter;
use afisz_harvester::adapters::going::GoingAdapter;
use afisz_harvester::adapters::SourceAdapter;
use afisz_harvester::orchestrator::ScrapeOrchestrator;
use afisz_harvester::scheduler;
use embed_client::EmbedClient;
use headless_client::HeadlessClient;
use places_client::PlacesClient;

/// Venues touched per refresh sweep.
const REFRESH_SWEEP_LIMIT: i64 = 500;

#[derive(Parser)]
#[command(name = "afisz-harvester", about = "Event aggregation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape all portals and integrate the results.
    Run,
    /// Generate embeddings for events without a vector.
    Embed,
    /// Re-enrich venues whose data is older than the refresh horizon.
    RefreshVenues {
        /// Keep running and sweep daily at the configured hour.
        #[arg(long)]
        daemon: bool,
    },
    /// Rank events by semantic similarity to free text.
    Similar {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// List upcoming events with optional filters.
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print integration status as JSON.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size())
        .connect(&config.database_url)
        .await
        .context("database unreachable")?;
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("migrations failed")?;

    let deps = Deps::build(&config, pool)?;

    match cli.command {
        Command::Run => run_pipeline(&config, &deps).await,
        Command::Embed => {
            let written = deps.embedding_worker(&config).run_sweep().await?;
            info!(written, "embedding run finished");
            Ok(())
        }
        Command::RefreshVenues { daemon } => {
            if daemon {
                let shutdown = scheduler::shutdown_flag();
                scheduler::venue_refresh_loop(
                    deps.enricher.clone(),
                    config.places_refresh_hour,
                    REFRESH_SWEEP_LIMIT,
                    shutdown,
                )
                .await;
            } else {
                let count = deps.enricher.refresh_stale_venues(REFRESH_SWEEP_LIMIT).await?;
                info!(count, "venue refresh finished");
            }
            Ok(())
        }
        Command::Similar { query, limit } => {
            let results = find_similar(&query, limit, deps.embedder.as_ref(), &deps.pool).await?;
            for (rank, graph) in results.iter().enumerate() {
                let venue = graph
                    .venue
                    .as_ref()
                    .and_then(|v| v.place_name_canonical.clone().or(v.place_name_scraped.clone()))
                    .unwrap_or_default();
                println!(
                    "{:>2}. {} | {} | {} | {}",
                    rank + 1,
                    graph.event.event_name,
                    graph.event.start_date.format("%Y-%m-%d %H:%M"),
                    venue,
                    graph.event.url
                );
            }
            Ok(())
        }
        Command::List {
            category,
            location,
            artist,
            tag,
            limit,
        } => {
            let filters = EventFilters {
                category,
                location,
                artist,
                tag,
            };
            let total = queries::count_upcoming(&filters, &deps.pool).await?;
            let results = queries::list_upcoming(&filters, limit, 0, &deps.pool).await?;
            println!("{total} upcoming events match");
            for graph in &results {
                println!(
                    "{} | {} | {} | {}",
                    graph.event.start_date.format("%Y-%m-%d %H:%M"),
                    graph.event.event_name,
                    graph.event.location,
                    graph.event.url
                );
            }
            Ok(())
        }
        Command::Status => {
            let status = deps.integrator(&config).status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

/// Shared wiring for every subcommand.
struct Deps {
    pool: PgPool,
    http: reqwest::Client,
    enricher: Arc<VenueEnricher>,
    embedder: Arc<dyn EmbeddingService>,
    artists: Arc<ArtistRegistry>,
    tags: Arc<TagRegistry>,
    stats: Arc<PipelineStats>,
}

impl Deps {
    fn build(config: &AppConfig, pool: PgPool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let stats = Arc::new(PipelineStats::default());
        let retry = RetryPolicy::new(config.retry_max, config.retry_wait);

        let places = PlacesClient::new(
            http.clone(),
            config.google_maps_api_key.clone().unwrap_or_default(),
        );
        let enricher = Arc::new(VenueEnricher::new(
            Arc::new(places),
            pool.clone(),
            EnricherOptions {
                enabled: config.places_enrich_enabled,
                refresh_days: config.places_refresh_days,
                rate_delay: config.places_rate_delay,
                retry: retry.clone(),
                breaker: config.circuit_breaker.clone(),
            },
            stats.clone(),
        ));

        let embed_client = EmbedClient::new(
            http.clone(),
            config.openai_api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        );
        let embedder: Arc<dyn EmbeddingService> = Arc::new(GuardedEmbedder::new(
            embed_client,
            retry,
            config.circuit_breaker.clone(),
        ));

        Ok(Self {
            pool,
            http,
            enricher,
            embedder,
            artists: Arc::new(ArtistRegistry::new()),
            tags: Arc::new(TagRegistry::new()),
            stats,
        })
    }

    fn integrator(&self, config: &AppConfig) -> EventIntegrator {
        EventIntegrator::new(
            self.pool.clone(),
            self.enricher.clone(),
            self.artists.clone(),
            self.tags.clone(),
            self.stats.clone(),
            config.integrator_chunk,
            config.integrator_batch,
        )
    }

    fn embedding_worker(&self, config: &AppConfig) -> EmbeddingWorker {
        EmbeddingWorker::new(
            self.pool.clone(),
            self.embedder.clone(),
            config.embedding_subbatch,
            config.embedding_sleep,
            config.embedding_sweep_limit,
            self.stats.clone(),
        )
    }

    fn adapters(&self, config: &AppConfig) -> Vec<Arc<dyn SourceAdapter>> {
        let mut adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(EbiletAdapter::new(
            self.http.clone(),
            config.scrape_cap_per_source,
        ))];

        match &config.browserless_url {
            Some(url) => {
                let headless = HeadlessClient::new(url, config.browserless_token.as_deref());
                adapters.push(Arc::new(GoingAdapter::new(
                    headless,
                    config.scrape_cap_per_source,
                )));
            }
            None => {
                tracing::warn!("BROWSERLESS_URL not set, skipping browser-driven sources");
            }
        }

        adapters
    }
}

async fn run_pipeline(config: &AppConfig, deps: &Deps) -> Result<()> {
    let shutdown = scheduler::shutdown_flag();

    let adapters = deps.adapters(config);
    let global_cap = config.scrape_cap_per_source * adapters.len();
    let orchestrator = ScrapeOrchestrator::new(adapters, config.scrape_concurrency, global_cap);

    let documents = orchestrator.run().await;

    let integrator = deps.integrator(config);
    integrator.submit(documents).await?;
    scheduler::drain_integrator(&integrator, config.integrator_tick, &shutdown).await?;

    let counters = deps.stats.snapshot();
    info!(
        inserted = counters.events_inserted,
        skipped = counters.events_skipped,
        errors = counters.document_errors,
        fabricated_timestamps = counters.fabricated_timestamps,
        "pipeline run finished"
    );
    Ok(())
}
