//! Poster enrichment client.
//!
//! Turns a display title into a poster URL: the asset cache is consulted first,
//! then the metadata service is queried with bounded retries, exponential
//! backoff, and a process-wide pacing limiter. Every failure is reported as an
//! [`AssetLookup`] value; nothing escapes this boundary as an error.

use std::fmt;
use std::io::Read;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, error, info, warn};
use serde_json::Value;

use crate::asset_cache::AssetCache;
use crate::config::EnrichmentConfig;
use crate::protocol::AssetLookup;

const USER_AGENT: &str = "filmflux/0.1.0 (poster enrichment)";
const NO_POSTER_SENTINEL: &str = "N/A";
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const PACER_POLL_INTERVAL: Duration = Duration::from_millis(10);

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Failure of a single HTTP exchange with the metadata service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Status(u16),
    Connection(String),
    Timeout(String),
    InvalidRequest(String),
    MalformedBody(String),
}

impl TransportError {
    /// Rate limiting, gateway/server errors, and connection-level failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::InvalidRequest(_) | Self::MalformedBody(_) => false,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "HTTP status {code}"),
            Self::Connection(message) => write!(f, "connection failed: {message}"),
            Self::Timeout(message) => write!(f, "timed out: {message}"),
            Self::InvalidRequest(message) => write!(f, "invalid request: {message}"),
            Self::MalformedBody(message) => write!(f, "malformed response: {message}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// One blocking JSON GET against the metadata service.
pub trait MetadataTransport: Send + Sync {
    fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, TransportError>;
}

pub struct UreqTransport {
    http_client: ureq::Agent,
}

impl UreqTransport {
    pub fn new(request_timeout: Duration) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(request_timeout)
            .timeout(request_timeout)
            .build();
        Self { http_client }
    }

    fn classify_ureq_failure(error: ureq::Error) -> TransportError {
        match error {
            ureq::Error::Status(code, _) => TransportError::Status(code),
            ureq::Error::Transport(transport) => {
                let message = transport.to_string();
                let lowered = message.to_ascii_lowercase();
                match transport.kind() {
                    ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
                        TransportError::InvalidRequest(message)
                    }
                    _ if lowered.contains("timed out") || lowered.contains("timeout") => {
                        TransportError::Timeout(message)
                    }
                    _ => TransportError::Connection(message),
                }
            }
        }
    }

    fn classify_io_failure(error: &std::io::Error) -> TransportError {
        let message = format!("Failed to read response: {error}");
        if matches!(
            error.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        ) || error.to_string().to_ascii_lowercase().contains("timed out")
        {
            TransportError::Timeout(message)
        } else {
            TransportError::Connection(message)
        }
    }
}

impl MetadataTransport for UreqTransport {
    fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, TransportError> {
        let response = self
            .http_client
            .get(url)
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/json")
            .timeout(timeout)
            .call()
            .map_err(Self::classify_ureq_failure)?;
        if response.status() != 200 {
            return Err(TransportError::Status(response.status()));
        }
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|error| Self::classify_io_failure(&error))?;
        serde_json::from_str(&body)
            .map_err(|error| TransportError::MalformedBody(format!("Invalid JSON response: {error}")))
    }
}

/// Endpoint and resilience policy for poster lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub request_timeout: Duration,
    pub pacing_delay: Duration,
}

impl EnrichmentSettings {
    pub fn from_config(config: &EnrichmentConfig, api_key: Option<String>) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            pacing_delay: Duration::from_millis(config.pacing_delay_ms),
        }
    }
}

/// Cache-aside poster lookup shared by every recommendation request.
pub struct EnrichmentClient {
    settings: EnrichmentSettings,
    asset_cache: Arc<AssetCache>,
    transport: Arc<dyn MetadataTransport>,
    pacer: Option<DirectLimiter>,
}

impl EnrichmentClient {
    pub fn new(
        settings: EnrichmentSettings,
        asset_cache: Arc<AssetCache>,
        transport: Arc<dyn MetadataTransport>,
    ) -> Self {
        let pacer = Quota::with_period(settings.pacing_delay)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            settings,
            asset_cache,
            transport,
            pacer,
        }
    }

    /// Builds the `?t=<title>&apikey=<key>` lookup URL; spaces become `+`.
    pub fn request_url(&self, title: &str) -> String {
        let base = self.settings.base_url.as_str();
        let joiner = if base.contains('?') { '&' } else { '?' };
        let encoded_title = urlencoding::encode(title).replace("%20", "+");
        let api_key = self.settings.api_key.as_deref().unwrap_or_default();
        format!(
            "{base}{joiner}t={encoded_title}&apikey={}",
            urlencoding::encode(api_key)
        )
    }

    pub fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1u32 << exponent;
        base_delay
            .checked_mul(multiplier)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Looks up the poster for `title`.
    ///
    /// Cache hits return immediately. Every call that reaches the network path
    /// sleeps the pacing delay before returning, whatever the outcome.
    pub fn fetch_asset(&self, title: &str) -> AssetLookup {
        if let Some(url) = self.cached_asset(title) {
            debug!("Enrichment[{}]: served from cache", title);
            return AssetLookup::Cached(url);
        }

        let outcome = self.fetch_from_upstream(title);
        if let AssetLookup::Fetched(url) = &outcome {
            self.store_asset(title, url);
        }
        Self::report_outcome(title, &outcome);

        if !self.settings.pacing_delay.is_zero() {
            std::thread::sleep(self.settings.pacing_delay);
        }
        outcome
    }

    fn cached_asset(&self, title: &str) -> Option<String> {
        match self.asset_cache.get(title) {
            Ok(Some(url)) if !url.trim().is_empty() => Some(url),
            Ok(_) => None,
            Err(error) => {
                warn!(
                    "Enrichment[{}]: poster cache read failed, treating as miss: {}",
                    title, error
                );
                None
            }
        }
    }

    fn store_asset(&self, title: &str, url: &str) {
        if let Err(error) = self.asset_cache.put(title, url) {
            warn!(
                "Enrichment[{}]: failed to persist poster to cache: {}",
                title, error
            );
        }
    }

    fn wait_for_pacing_slot(&self) {
        let Some(pacer) = self.pacer.as_ref() else {
            return;
        };
        while pacer.check().is_err() {
            std::thread::sleep(PACER_POLL_INTERVAL.min(self.settings.pacing_delay));
        }
    }

    fn fetch_from_upstream(&self, title: &str) -> AssetLookup {
        let url = self.request_url(title);
        let mut attempt = 1u32;
        loop {
            self.wait_for_pacing_slot();
            match self
                .transport
                .get_json(&url, self.settings.request_timeout)
            {
                Ok(value) => return Self::interpret_payload(&value),
                Err(error) if error.is_retryable() && attempt < self.settings.max_attempts => {
                    let backoff = Self::backoff_delay(self.settings.backoff_base, attempt);
                    info!(
                        "Enrichment[{}]: attempt {} failed ({}), retrying in {:?}",
                        title, attempt, error, backoff
                    );
                    std::thread::sleep(backoff);
                    attempt = attempt.saturating_add(1);
                }
                Err(error) if error.is_retryable() => {
                    return AssetLookup::Unavailable {
                        reason: format!("{error} after {attempt} attempts"),
                    };
                }
                Err(error) => {
                    return AssetLookup::Rejected {
                        reason: error.to_string(),
                    };
                }
            }
        }
    }

    /// Maps a metadata response body onto a lookup outcome.
    fn interpret_payload(value: &Value) -> AssetLookup {
        let Some(response_flag) = value.get("Response").and_then(Value::as_str) else {
            return AssetLookup::Rejected {
                reason: "malformed response: missing Response flag".to_string(),
            };
        };
        if !response_flag.trim().eq_ignore_ascii_case("true") {
            let reason = value
                .get("Error")
                .and_then(Value::as_str)
                .unwrap_or("no matching record")
                .to_string();
            return AssetLookup::NotFound { reason };
        }

        match value.get("Poster").and_then(Value::as_str).map(str::trim) {
            Some(poster) if !poster.is_empty() && poster != NO_POSTER_SENTINEL => {
                AssetLookup::Fetched(poster.to_string())
            }
            _ => AssetLookup::NoAsset,
        }
    }

    fn report_outcome(title: &str, outcome: &AssetLookup) {
        match outcome {
            AssetLookup::Cached(_) => {}
            AssetLookup::Fetched(url) => debug!("Enrichment[{}]: fetched poster {}", title, url),
            AssetLookup::NotFound { reason } => {
                warn!("Movie '{}' not found by metadata service ({})", title, reason)
            }
            AssetLookup::NoAsset => warn!("No poster found for '{}'", title),
            AssetLookup::Unavailable { reason } => {
                error!("Network error for '{}': {}", title, reason)
            }
            AssetLookup::Rejected { reason } => {
                error!("Metadata request for '{}' failed: {}", title, reason)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use serde_json::{json, Value};

    use super::{EnrichmentClient, EnrichmentSettings, MetadataTransport, TransportError};
    use crate::asset_cache::AssetCache;
    use crate::protocol::AssetLookup;

    /// Replays canned responses and counts network calls.
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Value, TransportError>>>,
        fallback: Result<Value, TransportError>,
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(
            responses: Vec<Result<Value, TransportError>>,
            fallback: Result<Value, TransportError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                fallback,
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn always(response: Result<Value, TransportError>) -> Arc<Self> {
            Self::new(Vec::new(), response)
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn urls(&self) -> Vec<String> {
            self.urls.lock().expect("urls lock").clone()
        }
    }

    impl MetadataTransport for ScriptedTransport {
        fn get_json(&self, url: &str, _timeout: Duration) -> Result<Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().expect("urls lock").push(url.to_string());
            self.responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    pub(crate) fn poster_found(url: &str) -> Result<Value, TransportError> {
        Ok(json!({"Title": "Any", "Response": "True", "Poster": url}))
    }

    pub(crate) fn movie_not_found() -> Result<Value, TransportError> {
        Ok(json!({"Response": "False", "Error": "Movie not found!"}))
    }

    pub(crate) fn test_settings() -> EnrichmentSettings {
        EnrichmentSettings {
            base_url: "http://metadata.test/".to_string(),
            api_key: Some("k3y".to_string()),
            max_attempts: 3,
            backoff_base: Duration::ZERO,
            request_timeout: Duration::from_secs(1),
            pacing_delay: Duration::ZERO,
        }
    }

    fn client_with(
        settings: EnrichmentSettings,
        transport: &Arc<ScriptedTransport>,
    ) -> (EnrichmentClient, Arc<AssetCache>) {
        let cache = Arc::new(AssetCache::open_in_memory().expect("cache should open"));
        let transport: Arc<dyn MetadataTransport> = transport.clone();
        (
            EnrichmentClient::new(settings, Arc::clone(&cache), transport),
            cache,
        )
    }

    #[test]
    fn test_request_url_encodes_title_with_plus_separators() {
        let transport = ScriptedTransport::always(movie_not_found());
        let (client, _) = client_with(test_settings(), &transport);
        assert_eq!(
            client.request_url("The Dark Knight & Co"),
            "http://metadata.test/?t=The+Dark+Knight+%26+Co&apikey=k3y"
        );
    }

    #[test]
    fn test_request_url_extends_existing_query() {
        let transport = ScriptedTransport::always(movie_not_found());
        let settings = EnrichmentSettings {
            base_url: "http://metadata.test/?type=movie".to_string(),
            api_key: None,
            ..test_settings()
        };
        let (client, _) = client_with(settings, &transport);
        assert_eq!(
            client.request_url("Up"),
            "http://metadata.test/?type=movie&t=Up&apikey="
        );
    }

    #[test]
    fn test_backoff_delay_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(EnrichmentClient::backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(EnrichmentClient::backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(EnrichmentClient::backoff_delay(base, 3), Duration::from_secs(4));
        assert_eq!(
            EnrichmentClient::backoff_delay(base, 12),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_retryable_errors_match_transient_status_set() {
        for code in [429, 500, 502, 503, 504] {
            assert!(TransportError::Status(code).is_retryable(), "{code}");
        }
        for code in [400, 401, 403, 404, 501] {
            assert!(!TransportError::Status(code).is_retryable(), "{code}");
        }
        assert!(TransportError::Connection("reset".to_string()).is_retryable());
        assert!(TransportError::Timeout("read".to_string()).is_retryable());
        assert!(!TransportError::MalformedBody("eof".to_string()).is_retryable());
    }

    #[test]
    fn test_second_lookup_is_served_from_cache_without_network() {
        let transport = ScriptedTransport::always(poster_found("https://img/avatar.jpg"));
        let (client, cache) = client_with(test_settings(), &transport);

        let first = client.fetch_asset("Avatar");
        assert_eq!(first, AssetLookup::Fetched("https://img/avatar.jpg".to_string()));
        assert_eq!(transport.calls(), 1);
        assert_eq!(
            cache.get("Avatar").expect("read").as_deref(),
            Some("https://img/avatar.jpg")
        );

        let second = client.fetch_asset("Avatar");
        assert_eq!(second, AssetLookup::Cached("https://img/avatar.jpg".to_string()));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_recovers_after_two_service_unavailable_responses() {
        let transport = ScriptedTransport::new(
            vec![
                Err(TransportError::Status(503)),
                Err(TransportError::Status(503)),
            ],
            poster_found("https://img/spectre.jpg"),
        );
        let (client, _) = client_with(test_settings(), &transport);

        let outcome = client.fetch_asset("Spectre");
        assert_eq!(
            outcome,
            AssetLookup::Fetched("https://img/spectre.jpg".to_string())
        );
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let transport = ScriptedTransport::always(Err(TransportError::Status(503)));
        let (client, cache) = client_with(test_settings(), &transport);

        let outcome = client.fetch_asset("Spectre");
        assert!(matches!(outcome, AssetLookup::Unavailable { .. }));
        assert_eq!(transport.calls(), 3);
        assert_eq!(cache.len().expect("count"), 0);
    }

    #[test]
    fn test_connection_errors_are_retried() {
        let transport = ScriptedTransport::new(
            vec![Err(TransportError::Connection("refused".to_string()))],
            poster_found("https://img/up.jpg"),
        );
        let (client, _) = client_with(test_settings(), &transport);
        assert!(client.fetch_asset("Up").is_found());
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn test_non_transient_status_is_not_retried() {
        let transport = ScriptedTransport::always(Err(TransportError::Status(401)));
        let (client, _) = client_with(test_settings(), &transport);

        let outcome = client.fetch_asset("Avatar");
        assert_eq!(
            outcome,
            AssetLookup::Rejected {
                reason: "HTTP status 401".to_string()
            }
        );
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_malformed_body_is_not_retried() {
        let transport =
            ScriptedTransport::always(Err(TransportError::MalformedBody("eof".to_string())));
        let (client, _) = client_with(test_settings(), &transport);
        assert!(matches!(
            client.fetch_asset("Avatar"),
            AssetLookup::Rejected { .. }
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_not_found_response_is_distinguished_from_missing_poster() {
        let transport = ScriptedTransport::new(
            vec![
                movie_not_found(),
                Ok(json!({"Response": "True", "Poster": "N/A"})),
                Ok(json!({"Response": "True"})),
            ],
            movie_not_found(),
        );
        let (client, cache) = client_with(test_settings(), &transport);

        assert_eq!(
            client.fetch_asset("Nope"),
            AssetLookup::NotFound {
                reason: "Movie not found!".to_string()
            }
        );
        assert_eq!(client.fetch_asset("Bare"), AssetLookup::NoAsset);
        assert_eq!(client.fetch_asset("Empty"), AssetLookup::NoAsset);
        assert_eq!(cache.len().expect("count"), 0);
    }

    #[test]
    fn test_payload_without_response_flag_is_rejected() {
        let transport = ScriptedTransport::always(Ok(json!(["unexpected"])));
        let (client, _) = client_with(test_settings(), &transport);
        assert!(matches!(
            client.fetch_asset("Avatar"),
            AssetLookup::Rejected { .. }
        ));
    }

    #[test]
    fn test_pacing_delay_applies_to_network_calls_only() {
        let transport = ScriptedTransport::always(poster_found("https://img/a.jpg"));
        let settings = EnrichmentSettings {
            pacing_delay: Duration::from_millis(60),
            ..test_settings()
        };
        let (client, _) = client_with(settings, &transport);

        let started = Instant::now();
        assert!(client.fetch_asset("Avatar").is_found());
        assert!(started.elapsed() >= Duration::from_millis(60));

        let started = Instant::now();
        assert!(matches!(
            client.fetch_asset("Avatar"),
            AssetLookup::Cached(_)
        ));
        assert!(started.elapsed() < Duration::from_millis(60));
    }

    #[test]
    fn test_pacing_delay_applies_even_when_lookup_fails() {
        let transport = ScriptedTransport::always(movie_not_found());
        let settings = EnrichmentSettings {
            pacing_delay: Duration::from_millis(40),
            ..test_settings()
        };
        let (client, _) = client_with(settings, &transport);
        let started = Instant::now();
        assert!(!client.fetch_asset("Nope").is_found());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_cache_failures_degrade_to_upstream_result() {
        let transport = ScriptedTransport::always(poster_found("https://img/x.jpg"));
        let (client, cache) = client_with(test_settings(), &transport);
        cache.break_store_for_test();

        let outcome = client.fetch_asset("Avatar");
        assert_eq!(outcome, AssetLookup::Fetched("https://img/x.jpg".to_string()));
        assert_eq!(transport.calls(), 1);
        assert!(cache.get("Avatar").is_err());
    }

    #[test]
    fn test_lookup_sends_configured_key_and_title() {
        let transport = ScriptedTransport::always(poster_found("https://img/a.jpg"));
        let (client, _) = client_with(test_settings(), &transport);
        client.fetch_asset("Avatar");
        assert_eq!(
            transport.urls(),
            vec!["http://metadata.test/?t=Avatar&apikey=k3y".to_string()]
        );
    }
}
