//! Read-only catalog and similarity matrix loaded from the offline build artifacts.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use log::{info, warn};
use serde_json::Value;

use crate::protocol::CatalogItem;

const TITLE_COLUMN: &str = "title";

/// Fatal load-time problems with the catalog or matrix artifacts.
#[derive(Debug)]
pub enum LoadError {
    Io { path: String, error: std::io::Error },
    Parse { path: String, error: serde_json::Error },
    MissingTitleColumn,
    NonContiguousIndex { expected: usize, found: String },
    DuplicateTitle { title: String },
    NotSquare { row: usize, expected: usize, actual: usize },
    NonFiniteScore { row: usize, column: usize },
    DimensionMismatch { catalog: usize, matrix: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, error } => write!(f, "failed to read {path}: {error}"),
            Self::Parse { path, error } => write!(f, "failed to parse {path}: {error}"),
            Self::MissingTitleColumn => write!(f, "catalog has no '{TITLE_COLUMN}' column"),
            Self::NonContiguousIndex { expected, found } => write!(
                f,
                "catalog row index '{found}' breaks the 0..N ordering (expected {expected})"
            ),
            Self::DuplicateTitle { title } => write!(f, "catalog title '{title}' is not unique"),
            Self::NotSquare {
                row,
                expected,
                actual,
            } => write!(
                f,
                "similarity row {row} has {actual} columns, expected {expected}"
            ),
            Self::NonFiniteScore { row, column } => {
                write!(f, "similarity score at ({row}, {column}) is not finite")
            }
            Self::DimensionMismatch { catalog, matrix } => write!(
                f,
                "catalog has {catalog} items but the similarity matrix is {matrix}x{matrix}"
            ),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { error, .. } => Some(error),
            Self::Parse { error, .. } => Some(error),
            _ => None,
        }
    }
}

fn read_json(path: &Path) -> Result<Value, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|error| LoadError::Io {
        path: path.display().to_string(),
        error,
    })?;
    serde_json::from_str(&text).map_err(|error| LoadError::Parse {
        path: path.display().to_string(),
        error,
    })
}

/// Ordered, immutable set of recommendable titles.
#[derive(Debug, Clone)]
pub struct Catalog {
    titles: Vec<String>,
    index_by_title: HashMap<String, usize>,
}

impl Catalog {
    /// Builds a catalog whose row order is the order of `titles`.
    pub fn from_titles(titles: Vec<String>) -> Result<Self, LoadError> {
        let mut index_by_title = HashMap::with_capacity(titles.len());
        for (index, title) in titles.iter().enumerate() {
            if index_by_title.insert(title.clone(), index).is_some() {
                return Err(LoadError::DuplicateTitle {
                    title: title.clone(),
                });
            }
        }
        Ok(Self {
            titles,
            index_by_title,
        })
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let value = read_json(path)?;
        Self::from_titles(Self::titles_from_value(&value)?)
    }

    /// Accepts a column table (`{"title": {"0": ..}}`) or an array of records.
    fn titles_from_value(value: &Value) -> Result<Vec<String>, LoadError> {
        match value {
            Value::Array(records) => records
                .iter()
                .map(|record| {
                    record
                        .get(TITLE_COLUMN)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or(LoadError::MissingTitleColumn)
                })
                .collect(),
            Value::Object(columns) => {
                let column = columns
                    .get(TITLE_COLUMN)
                    .ok_or(LoadError::MissingTitleColumn)?;
                match column {
                    Value::Array(titles) => titles
                        .iter()
                        .map(|title| {
                            title
                                .as_str()
                                .map(str::to_string)
                                .ok_or(LoadError::MissingTitleColumn)
                        })
                        .collect(),
                    Value::Object(rows) => Self::titles_from_indexed_rows(rows),
                    _ => Err(LoadError::MissingTitleColumn),
                }
            }
            _ => Err(LoadError::MissingTitleColumn),
        }
    }

    fn titles_from_indexed_rows(
        rows: &serde_json::Map<String, Value>,
    ) -> Result<Vec<String>, LoadError> {
        let mut ordered = BTreeMap::new();
        for (key, title) in rows {
            let index = key
                .trim()
                .parse::<usize>()
                .map_err(|_| LoadError::NonContiguousIndex {
                    expected: ordered.len(),
                    found: key.clone(),
                })?;
            let title = title.as_str().ok_or(LoadError::MissingTitleColumn)?;
            ordered.insert(index, title.to_string());
        }

        let mut titles = Vec::with_capacity(ordered.len());
        for (expected, (index, title)) in ordered.into_iter().enumerate() {
            if index != expected {
                return Err(LoadError::NonContiguousIndex {
                    expected,
                    found: index.to_string(),
                });
            }
            titles.push(title);
        }
        Ok(titles)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    /// Exact-match lookup; no normalization is applied to `title`.
    pub fn index_of(&self, title: &str) -> Option<usize> {
        self.index_by_title.get(title).copied()
    }

    pub fn title_of(&self, index: usize) -> Option<&str> {
        self.titles.get(index).map(String::as_str)
    }

    pub fn items(&self) -> impl Iterator<Item = CatalogItem> + '_ {
        self.titles
            .iter()
            .enumerate()
            .map(|(index, title)| CatalogItem {
                index,
                title: title.clone(),
            })
    }

    /// Case-insensitive substring filter over titles, in catalog order.
    pub fn search(&self, query: &str) -> Vec<CatalogItem> {
        let needle = query.trim().to_lowercase();
        self.items()
            .filter(|item| needle.is_empty() || item.title.to_lowercase().contains(&needle))
            .collect()
    }
}

/// Dense N x N score matrix, row-aligned with the catalog.
#[derive(Debug, Clone)]
pub struct SimilarityMatrix {
    dimension: usize,
    scores: Vec<f32>,
}

impl SimilarityMatrix {
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, LoadError> {
        let dimension = rows.len();
        let mut scores = Vec::with_capacity(dimension * dimension);
        for (row_index, row) in rows.into_iter().enumerate() {
            if row.len() != dimension {
                return Err(LoadError::NotSquare {
                    row: row_index,
                    expected: dimension,
                    actual: row.len(),
                });
            }
            if let Some(column) = row.iter().position(|score| !score.is_finite()) {
                return Err(LoadError::NonFiniteScore {
                    row: row_index,
                    column,
                });
            }
            scores.extend(row);
        }
        Ok(Self { dimension, scores })
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let value = read_json(path)?;
        let rows: Vec<Vec<f32>> =
            serde_json::from_value(value).map_err(|error| LoadError::Parse {
                path: path.display().to_string(),
                error,
            })?;
        Self::from_rows(rows)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn row(&self, index: usize) -> &[f32] {
        let start = index * self.dimension;
        &self.scores[start..start + self.dimension]
    }

    /// Scores of `index` against every other row; the self pair is never yielded.
    ///
    /// Panics if `index` is out of range, which catalog validation rules out.
    pub fn row_scores(&self, index: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.row(index)
            .iter()
            .copied()
            .enumerate()
            .filter(move |(neighbor, _)| *neighbor != index)
    }
}

/// Loads both artifacts and checks they describe the same row ordering.
pub fn load_artifacts(
    catalog_path: &Path,
    similarity_path: &Path,
) -> Result<(Catalog, SimilarityMatrix), LoadError> {
    let catalog = Catalog::load(catalog_path)?;
    let matrix = SimilarityMatrix::load(similarity_path)?;
    if catalog.len() != matrix.dimension() {
        return Err(LoadError::DimensionMismatch {
            catalog: catalog.len(),
            matrix: matrix.dimension(),
        });
    }
    if catalog.is_empty() {
        warn!("Catalog {} contains no titles", catalog_path.display());
    }
    info!(
        "Loaded catalog with {} titles from {}",
        catalog.len(),
        catalog_path.display()
    );
    Ok((catalog, matrix))
}
