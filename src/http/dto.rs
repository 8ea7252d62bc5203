//! Request/response bodies for the HTTP surface (§6.1).
//!
//! These are thin wire shapes around the storage layer's own types
//! (`Change`, `UpdateBatch`, `ScoredDoc`): the core never speaks HTTP, this
//! module just gives axum something `Serialize`/`Deserialize` to bind to.

use serde::{Deserialize, Serialize};

use crate::storage::index::IndexStats;
use crate::storage::searcher::ScoredDoc;
use crate::storage::types::{DocId, Hash, Version};

#[derive(Debug, Deserialize)]
pub struct PutFingerprintRequest {
    pub hashes: Vec<Hash>,
}

#[derive(Debug, Serialize)]
pub struct FingerprintVersionResponse {
    pub version: Version,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: Vec<Hash>,
    pub limit: Option<u32>,
    /// Milliseconds.
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ScoredDocDto {
    pub id: DocId,
    pub score: u32,
}

impl From<ScoredDoc> for ScoredDocDto {
    fn from(s: ScoredDoc) -> Self {
        Self { id: s.id, score: s.score }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ScoredDocDto>,
    pub complete: bool,
}

#[derive(Debug, Serialize)]
pub struct IndexStatsBody {
    pub min_doc_id: DocId,
    pub max_doc_id: DocId,
    pub num_segments: usize,
    pub num_docs: u64,
}

#[derive(Debug, Serialize)]
pub struct IndexInfoResponse {
    pub version: Version,
    pub metadata: Option<std::collections::BTreeMap<String, i64>>,
    pub stats: IndexStatsBody,
}

impl From<IndexStats> for IndexInfoResponse {
    fn from(s: IndexStats) -> Self {
        let metadata = if s.attributes.is_empty() { None } else { Some(s.attributes.clone()) };
        Self {
            version: s.version,
            metadata,
            stats: IndexStatsBody {
                min_doc_id: s.min_doc_id,
                max_doc_id: s.max_doc_id,
                num_segments: s.num_segments,
                num_docs: s.num_docs,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Empty {}
