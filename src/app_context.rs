use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::{
    asset_cache::{AssetCache, CacheStoreError},
    catalog::{self, Catalog, SimilarityMatrix},
    config::Config,
    config_persistence, credentials,
    poster_enrichment::{EnrichmentClient, EnrichmentSettings, MetadataTransport, UreqTransport},
    recommendation_engine::{RecommendationEngine, RecommendationSettings},
};

/// Long-lived handles built once at startup and shared by every request.
pub(crate) struct AppContext {
    pub(crate) config: Config,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) matrix: Arc<SimilarityMatrix>,
    pub(crate) asset_cache: Arc<AssetCache>,
    pub(crate) enrichment: Arc<EnrichmentClient>,
}

/// Resolves a configured artifact path relative to the config file's directory.
pub(crate) fn resolve_data_path(config_dir: Option<&Path>, configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    match config_dir {
        Some(dir) if path.is_relative() && !path.exists() => dir.join(path),
        _ => path,
    }
}

pub(crate) fn open_asset_cache(config: &Config) -> Result<AssetCache, CacheStoreError> {
    let cache_path = config_persistence::resolve_cache_path(config);
    let cache = AssetCache::open(&cache_path)?;
    match cache.len() {
        Ok(entries) => info!(
            "Poster cache opened at {} ({} entries)",
            cache_path.display(),
            entries
        ),
        Err(err) => warn!(
            "Poster cache opened at {} but could not be counted: {}",
            cache_path.display(),
            err
        ),
    }
    Ok(cache)
}

/// Opens the persistent cache, or an in-memory one when the store is unusable.
fn open_asset_cache_or_fallback(config: &Config) -> Result<AssetCache, CacheStoreError> {
    match open_asset_cache(config) {
        Ok(cache) => Ok(cache),
        Err(err) => {
            warn!(
                "Poster cache unavailable, continuing without persistence: {}",
                err
            );
            AssetCache::open_in_memory()
        }
    }
}

impl AppContext {
    pub(crate) fn bootstrap(config: Config, config_path: &Path) -> Result<Self, Box<dyn Error>> {
        let config_dir = config_path.parent();
        let catalog_path = resolve_data_path(config_dir, &config.data.catalog_path);
        let similarity_path = resolve_data_path(config_dir, &config.data.similarity_path);
        let (catalog, matrix) = catalog::load_artifacts(&catalog_path, &similarity_path)?;

        let asset_cache = Arc::new(open_asset_cache_or_fallback(&config)?);

        let api_key = credentials::resolve_api_key(&config.enrichment.api_key);
        if api_key.is_none() {
            warn!("No metadata API key configured; poster lookups will likely be rejected");
        }
        let settings = EnrichmentSettings::from_config(&config.enrichment, api_key);
        let transport: Arc<dyn MetadataTransport> = Arc::new(UreqTransport::new(
            Duration::from_millis(config.enrichment.request_timeout_ms),
        ));
        let enrichment = Arc::new(EnrichmentClient::new(
            settings,
            Arc::clone(&asset_cache),
            transport,
        ));

        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            matrix: Arc::new(matrix),
            asset_cache,
            enrichment,
        })
    }

    pub(crate) fn recommendation_engine(&self) -> RecommendationEngine {
        RecommendationEngine::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.matrix),
            Arc::clone(&self.enrichment),
            RecommendationSettings::from_config(
                &self.config.recommendation,
                self.config.enrichment.max_concurrent_lookups,
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{resolve_data_path, AppContext};
    use crate::config::Config;

    fn temp_dir(name: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("filmflux_{name}_{nonce}"));
        std::fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn test_relative_data_paths_resolve_against_config_dir() {
        let resolved = resolve_data_path(
            Some(Path::new("/etc/filmflux")),
            "filmflux-missing-artifact.json",
        );
        assert_eq!(
            resolved,
            PathBuf::from("/etc/filmflux/filmflux-missing-artifact.json")
        );
        assert_eq!(
            resolve_data_path(Some(Path::new("/etc/filmflux")), "/data/m.json"),
            PathBuf::from("/data/m.json")
        );
    }

    #[test]
    fn test_bootstrap_wires_engine_from_artifacts() {
        let dir = temp_dir("bootstrap");
        std::fs::write(
            dir.join("movie_dict.json"),
            r#"{"title": {"0": "Avatar", "1": "Spectre", "2": "Skyfall"}}"#,
        )
        .expect("write catalog");
        std::fs::write(
            dir.join("similarity.json"),
            "[[1.0, 0.2, 0.3], [0.2, 1.0, 0.9], [0.3, 0.9, 1.0]]",
        )
        .expect("write matrix");

        let mut config = Config::default();
        config.data.cache_path = dir.join("posters.db").display().to_string();
        config.enrichment.api_key = "test-key".to_string();

        let context = AppContext::bootstrap(config, &dir.join("filmflux.toml"));
        let context = context.expect("bootstrap should succeed");
        assert_eq!(context.catalog.len(), 3);
        assert_eq!(context.matrix.dimension(), 3);
        assert_eq!(context.asset_cache.len().expect("count"), 0);
        drop(context);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bootstrap_continues_without_persistent_cache() {
        let dir = temp_dir("unopenable_cache");
        std::fs::write(
            dir.join("movie_dict.json"),
            r#"{"title": {"0": "Avatar", "1": "Spectre"}}"#,
        )
        .expect("write catalog");
        std::fs::write(dir.join("similarity.json"), "[[1.0, 0.4], [0.4, 1.0]]")
            .expect("write matrix");
        std::fs::write(dir.join("blocker"), b"regular file").expect("write blocker");

        let mut config = Config::default();
        config.data.cache_path = dir.join("blocker").join("posters.db").display().to_string();
        config.enrichment.api_key = "test-key".to_string();

        let context = AppContext::bootstrap(config, &dir.join("filmflux.toml"))
            .expect("bootstrap should fall back to an in-memory cache");
        context
            .asset_cache
            .put("Spectre", "https://img/s.jpg")
            .expect("in-memory cache accepts writes");
        assert_eq!(context.asset_cache.len().expect("count"), 1);
        assert!(!dir.join("blocker").join("posters.db").exists());
        drop(context);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
