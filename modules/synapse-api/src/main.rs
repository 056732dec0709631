use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use synapse_common::Config;
use synapse_core::{OpenAiClassifier, OpenAiEmbedder, PgVectorIndex, SynapseDeps};
use synapse_ingest::{
    register_schedules, DailyBriefingHandler, NewsIngestHandler, NightlyReflectionHandler,
    Scheduler, WorkerPool,
};

use synapse_api::routes;

/// News pipeline workers; briefing and reflection run single-file.
const NEWS_WORKERS: usize = 2;
const SCHEDULED_WORKERS: usize = 1;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting synapse-api");

    let config = Config::from_env();

    // Separate pools: HTTP handlers must not starve behind worker claims.
    let http_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let worker_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("../../migrations").run(&http_pool).await?;
    tracing::info!("Connected to database, migrations complete");

    let ai = Arc::new(
        ai_client::OpenAi::new(&config.openai_api_key, &config.chat_model)
            .with_embedding_model(&config.embedding_model),
    );

    let deps_for = |pool: sqlx::PgPool| SynapseDeps {
        db_pool: pool.clone(),
        ai: ai.clone(),
        embedder: Arc::new(OpenAiEmbedder::new(ai.clone())),
        classifier: Arc::new(OpenAiClassifier::new(ai.clone(), &config.classifier_model)),
        vectors: Arc::new(PgVectorIndex::new(pool)),
        config: config.clone(),
    };
    let http_deps = Arc::new(deps_for(http_pool.clone()));
    let worker_deps = deps_for(worker_pool.clone());

    // Recurring schedules and the queue workers
    register_schedules(&worker_pool, &config).await?;
    Scheduler::new(worker_pool.clone()).spawn();

    let mut worker_handles = Vec::new();
    worker_handles.extend(
        WorkerPool::new(
            worker_pool.clone(),
            Arc::new(NewsIngestHandler::new(worker_deps.clone())),
            NEWS_WORKERS,
        )
        .spawn(),
    );
    worker_handles.extend(
        WorkerPool::new(
            worker_pool.clone(),
            Arc::new(DailyBriefingHandler::new(worker_deps.clone())),
            SCHEDULED_WORKERS,
        )
        .spawn(),
    );
    worker_handles.extend(
        WorkerPool::new(
            worker_pool,
            Arc::new(NightlyReflectionHandler::new(worker_deps)),
            SCHEDULED_WORKERS,
        )
        .spawn(),
    );
    tracing::info!(workers = worker_handles.len(), "workers started");

    let app = routes::build_router(http_deps);
    let addr = format!("{}:{}", config.web_host, config.web_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
