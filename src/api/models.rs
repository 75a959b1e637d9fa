// API request/response models (DTOs)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database_ops::catalog::CatalogCounts;
use crate::database_ops::models::ImportMode;
use crate::jobs::{JobKind, JobSnapshot, StartOutcome};

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub uptime_seconds: u64,
}

/// Body of `POST /api/v1/sync/import`; every field is optional.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ImportTriggerRequest {
    #[serde(default)]
    pub total: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub mode: Option<ImportMode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub job: JobKind,
    pub outcome: StartOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub job: JobKind,
    /// False when no run of this kind was active.
    pub stop_requested: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SweepResponse {
    pub promoted: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub jobs: Vec<JobSnapshot>,
    pub catalog: CatalogCounts,
}
