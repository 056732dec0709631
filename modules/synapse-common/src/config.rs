use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres (with pgvector)
    pub database_url: String,

    // AI provider (OpenAI-compatible)
    pub openai_api_key: String,
    pub chat_model: String,
    pub classifier_model: String,
    pub embedding_model: String,

    // Ingestion entrypoint shared secret
    pub ingest_secret: String,

    // Authorized owner identities (channel user ids). The sovereign gate:
    // configured, never hardcoded.
    pub owner_ids: Vec<String>,

    // Dispatcher confidence bands
    pub auto_commit_threshold: f32,
    pub discard_threshold: f32,

    // News dedup threshold, in similarity units (1 - cosine distance)
    pub dedup_threshold: f32,

    // Daily briefing timezone (IANA name, e.g. "Europe/Lisbon")
    pub briefing_timezone: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            openai_api_key: required_env("OPENAI_API_KEY"),
            chat_model: env::var("SYNAPSE_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            classifier_model: env::var("SYNAPSE_CLASSIFIER_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model: env::var("SYNAPSE_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            ingest_secret: required_env("SYNAPSE_INGEST_SECRET"),
            owner_ids: required_env("SYNAPSE_OWNER_IDS")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            auto_commit_threshold: parsed_env("SYNAPSE_AUTO_COMMIT_THRESHOLD", 0.85),
            discard_threshold: parsed_env("SYNAPSE_DISCARD_THRESHOLD", 0.55),
            dedup_threshold: parsed_env("SYNAPSE_DEDUP_THRESHOLD", 0.90),
            briefing_timezone: env::var("SYNAPSE_BRIEFING_TZ")
                .unwrap_or_else(|_| "Europe/Lisbon".to_string()),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
        }
    }

    /// Whether a channel identity is the configured owner.
    pub fn is_owner(&self, identity: &str) -> bool {
        self.owner_ids.iter().any(|id| id == identity)
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env(key: &str, default: f32) -> f32 {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
