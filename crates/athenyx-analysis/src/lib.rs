//! athenyx-analysis — Client-side orchestration of server-side
//! document-analysis jobs: submission, status polling, stall detection,
//! and partial-result recovery.

pub mod api;
pub mod events;
pub mod orchestrator;

pub use api::{
    AnalysisApi, AnalysisOptions, AnalysisRequest, HttpAnalysisApi, JobStatus, ResultResponse,
    StatusResponse, SubmitResponse,
};
pub use events::AnalysisEvent;
pub use orchestrator::{JobHandle, JobOrchestrator, OrchestratorConfig, OrchestratorState};
