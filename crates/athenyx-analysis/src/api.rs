//! Wire types and transport for the analysis service.
//!
//! Endpoints consumed (the client defines nothing beyond what the polling
//! machine depends on):
//!   POST /analyze            — submit a job, returns { jobId, status }
//!   GET  /jobs/{id}          — status poll, returns { status, progress, error? }
//!   GET  /jobs/{id}/result   — result fetch; `data` may be present even when
//!                              status is not `completed` (partial results)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use athenyx_common::ApiError;
use athenyx_gateway::RequestGateway;

// ── Job status ────────────────────────────────────────────────────────────────

/// Server-reported job state. Unrecognised strings map to `Unknown` so a
/// backend upgrade cannot crash the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ── Submission ────────────────────────────────────────────────────────────────

/// Which analysis stages the backend should run for this document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOptions {
    #[serde(default = "default_true")]
    pub extract_sections: bool,
    #[serde(default = "default_true")]
    pub summarize: bool,
    #[serde(default = "default_true")]
    pub extract_references: bool,
    /// Methods-quality assessment is the slowest stage; off by default.
    #[serde(default)]
    pub assess_methods: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            extract_sections: true,
            summarize: true,
            extract_references: true,
            assess_methods: false,
        }
    }
}

/// Parameters for one analysis submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Server-side reference of the uploaded document.
    pub document_id: String,
    #[serde(default)]
    pub options: AnalysisOptions,
}

impl AnalysisRequest {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            options: AnalysisOptions::default(),
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(alias = "jobId")]
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    /// Raw server value; the orchestrator clamps it to [0, 100].
    #[serde(default)]
    pub progress: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultResponse {
    pub status: JobStatus,
    /// Analysis payload. May be present while `status` is still
    /// `processing` or even `failed` (partial results).
    pub data: Option<serde_json::Value>,
    pub message: Option<String>,
}

// ── Transport trait ───────────────────────────────────────────────────────────

/// The three calls the orchestrator makes. Mocked in tests; implemented
/// over [`RequestGateway`] in production.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    async fn submit(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<SubmitResponse, ApiError>;

    async fn status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<StatusResponse, ApiError>;

    async fn result(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultResponse, ApiError>;
}

#[async_trait]
impl<T> AnalysisApi for std::sync::Arc<T>
where
    T: AnalysisApi + ?Sized,
{
    async fn submit(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<SubmitResponse, ApiError> {
        (**self).submit(request, cancel).await
    }

    async fn status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<StatusResponse, ApiError> {
        (**self).status(job_id, cancel).await
    }

    async fn result(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultResponse, ApiError> {
        (**self).result(job_id, cancel).await
    }
}

/// HTTP implementation over the authenticated gateway.
pub struct HttpAnalysisApi {
    gateway: RequestGateway,
}

impl HttpAnalysisApi {
    pub fn new(gateway: RequestGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl AnalysisApi for HttpAnalysisApi {
    async fn submit(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<SubmitResponse, ApiError> {
        let body = serde_json::to_value(request)?;
        // Submission may block while the backend queues the job; use the
        // extended timeout.
        self.gateway
            .post_json_extended("/analyze", &body, cancel)
            .await
    }

    async fn status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<StatusResponse, ApiError> {
        self.gateway
            .get_json(&format!("/jobs/{job_id}"), cancel)
            .await
    }

    async fn result(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultResponse, ApiError> {
        self.gateway
            .get_json(&format!("/jobs/{job_id}/result"), cancel)
            .await
    }
}
