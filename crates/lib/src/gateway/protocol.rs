//! HTTP wire types for `/research` and `/`.

use serde::{Deserialize, Serialize};

pub use crate::pipeline::ResearchRequest;

/// `POST /research` success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub report: String,
}

/// Body of every 4xx response from `/research`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// `GET /` health payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}
