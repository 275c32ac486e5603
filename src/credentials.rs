//! Metadata service API key resolution and keyring storage.

use keyring::Entry;
use log::{debug, warn};

const API_KEY_ENV_VAR: &str = "FILMFLUX_API_KEY";
const KEYRING_SERVICE_NAME: &str = "filmflux.enrichment";
const KEYRING_ACCOUNT: &str = "omdb";

fn api_key_entry() -> Result<Entry, String> {
    Entry::new(KEYRING_SERVICE_NAME, KEYRING_ACCOUNT)
        .map_err(|err| format!("failed to create keyring entry: {err}"))
}

/// Saves the metadata service API key into the OS keyring.
pub fn store_api_key(api_key: &str) -> Result<(), String> {
    let entry = api_key_entry()?;
    entry
        .set_password(api_key)
        .map_err(|err| format!("failed to set keyring password: {err}"))
}

/// Loads the metadata service API key from the OS keyring.
pub fn load_api_key() -> Result<Option<String>, String> {
    let entry = api_key_entry()?;
    match entry.get_password() {
        Ok(api_key) => Ok(Some(api_key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(format!("failed to get keyring password: {err}")),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Picks the first available key: environment, config file, then keyring.
pub fn resolve_api_key(configured: &str) -> Option<String> {
    resolve_api_key_from(std::env::var(API_KEY_ENV_VAR).ok(), configured, || {
        load_api_key().unwrap_or_else(|err| {
            warn!("API key keyring lookup failed: {}", err);
            None
        })
    })
}

fn resolve_api_key_from<F>(env_value: Option<String>, configured: &str, keyring: F) -> Option<String>
where
    F: FnOnce() -> Option<String>,
{
    if let Some(api_key) = non_empty(env_value) {
        debug!("Using API key from {}", API_KEY_ENV_VAR);
        return Some(api_key);
    }
    if let Some(api_key) = non_empty(Some(configured.to_string())) {
        debug!("Using API key from config file");
        return Some(api_key);
    }
    non_empty(keyring())
}
