//! Persistent application configuration model and defaults.

/// Root configuration persisted to `filmflux.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Build artifact and cache locations.
    pub data: DataConfig,
    #[serde(default)]
    /// Poster metadata service access and resilience policy.
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    /// Result shaping.
    pub recommendation: RecommendationConfig,
}

/// Locations of the catalog/matrix artifacts and the poster cache.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DataConfig {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    #[serde(default = "default_similarity_path")]
    pub similarity_path: String,
    /// Empty means `<data dir>/filmflux/posters.db`.
    #[serde(default)]
    pub cache_path: String,
}

/// Metadata service endpoint, credentials, and call policy.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Leave empty to read the key from `FILMFLUX_API_KEY` or the OS keyring.
    #[serde(default)]
    pub api_key: String,
    /// Total attempts per lookup, first call included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay; doubles on every further retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Minimum spacing between outbound lookups.
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
}

/// Result size and fallback artwork.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RecommendationConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_placeholder_asset_url")]
    pub placeholder_asset_url: String,
}

fn default_catalog_path() -> String {
    "movie_dict.json".to_string()
}

fn default_similarity_path() -> String {
    "similarity.json".to_string()
}

fn default_base_url() -> String {
    "http://www.omdbapi.com/".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_pacing_delay_ms() -> u64 {
    100
}

fn default_max_concurrent_lookups() -> usize {
    1
}

fn default_top_k() -> usize {
    5
}

fn default_placeholder_asset_url() -> String {
    "https://via.placeholder.com/500x750?text=No+Poster".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            similarity_path: default_similarity_path(),
            cache_path: String::new(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pacing_delay_ms: default_pacing_delay_ms(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            placeholder_asset_url: default_placeholder_asset_url(),
        }
    }
}

/// Clamps user-edited values into the ranges the runtime supports.
pub fn sanitize_config(config: Config) -> Config {
    let base_url = if config.enrichment.base_url.trim().is_empty() {
        default_base_url()
    } else {
        config.enrichment.base_url.trim().to_string()
    };
    let placeholder_asset_url = if config.recommendation.placeholder_asset_url.trim().is_empty() {
        default_placeholder_asset_url()
    } else {
        config.recommendation.placeholder_asset_url.trim().to_string()
    };

    Config {
        data: config.data,
        enrichment: EnrichmentConfig {
            base_url,
            api_key: config.enrichment.api_key.trim().to_string(),
            max_attempts: config.enrichment.max_attempts.clamp(1, 10),
            backoff_base_ms: config.enrichment.backoff_base_ms.min(30_000),
            request_timeout_ms: config.enrichment.request_timeout_ms.clamp(500, 120_000),
            pacing_delay_ms: config.enrichment.pacing_delay_ms.min(10_000),
            max_concurrent_lookups: config.enrichment.max_concurrent_lookups.clamp(1, 8),
        },
        recommendation: RecommendationConfig {
            top_k: config.recommendation.top_k.clamp(1, 50),
            placeholder_asset_url,
        },
    }
}
