//! Result types shared by the catalog, enrichment, and recommendation components.
//!
//! Every enrichment outcome is an ordinary value here; only an unknown selected
//! title is surfaced as an error to the presentation layer.

use std::fmt;

/// One recommendable item and its row in the similarity matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub index: usize,
    pub title: String,
}

/// Outcome of a single poster lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLookup {
    /// Served from the asset cache without touching the network.
    Cached(String),
    /// Fetched from the metadata service and written back to the cache.
    Fetched(String),
    /// The metadata service has no record for the title.
    NotFound { reason: String },
    /// The record exists but carries no usable poster.
    NoAsset,
    /// Transient failures persisted after every retry was spent.
    Unavailable { reason: String },
    /// Non-retryable status or an unreadable response body.
    Rejected { reason: String },
}

impl AssetLookup {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Cached(url) | Self::Fetched(url) => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.url().is_some()
    }
}

/// Why a recommendation carries the placeholder poster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderReason {
    NotFound,
    NoAsset,
    Unavailable,
    Rejected,
}

/// Where the poster URL of a recommendation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum AssetSource {
    Cache,
    Upstream,
    Placeholder(PlaceholderReason),
}

impl AssetSource {
    pub fn from_lookup(lookup: &AssetLookup) -> Self {
        match lookup {
            AssetLookup::Cached(_) => Self::Cache,
            AssetLookup::Fetched(_) => Self::Upstream,
            AssetLookup::NotFound { .. } => Self::Placeholder(PlaceholderReason::NotFound),
            AssetLookup::NoAsset => Self::Placeholder(PlaceholderReason::NoAsset),
            AssetLookup::Unavailable { .. } => Self::Placeholder(PlaceholderReason::Unavailable),
            AssetLookup::Rejected { .. } => Self::Placeholder(PlaceholderReason::Rejected),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Upstream => "upstream",
            Self::Placeholder(PlaceholderReason::NotFound) => "placeholder (not found)",
            Self::Placeholder(PlaceholderReason::NoAsset) => "placeholder (no poster)",
            Self::Placeholder(PlaceholderReason::Unavailable) => "placeholder (service unavailable)",
            Self::Placeholder(PlaceholderReason::Rejected) => "placeholder (request rejected)",
        }
    }
}

/// One entry of a recommendation result, in rank order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RecommendedItem {
    /// Normalized display title; also the key used for poster lookup.
    pub title: String,
    pub asset_url: String,
    pub score: f32,
    pub source: AssetSource,
}

/// Request-level failure of a recommendation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecommendError {
    ItemNotFound { title: String },
}

impl fmt::Display for RecommendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ItemNotFound { title } => {
                write!(f, "selected title '{title}' is not in the catalog")
            }
        }
    }
}

impl std::error::Error for RecommendError {}
