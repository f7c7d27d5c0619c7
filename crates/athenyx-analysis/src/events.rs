//! Events broadcast to the consuming surface (UI, agent, logs).
//!
//! Advisories are non-fatal by construction: connectivity degradation,
//! partial results, and status inconsistencies inform the caller without
//! terminating the job.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::api::JobStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    /// The backend accepted the job.
    Submitted { run_id: Uuid, job_id: String },

    /// Polled progress changed.
    Progress { run_id: Uuid, progress: u8 },

    /// Progress has been frozen inside the ambiguous band past the first
    /// stall threshold; recovery starts if it persists.
    Stalled {
        run_id: Uuid,
        progress: u8,
        stalled_for_secs: u64,
    },

    /// Consecutive poll failures crossed the warning threshold. Polling
    /// continues regardless.
    ConnectivityDegraded {
        run_id: Uuid,
        consecutive_failures: u32,
    },

    /// A usable but incomplete payload was stored. `terminal` is true when
    /// the job itself is over (degraded success) and false when polling
    /// continues and a later completion may supersede the payload.
    PartialResult { run_id: Uuid, terminal: bool },

    /// Status poll and result fetch disagree about the job.
    InconsistentState {
        run_id: Uuid,
        polled: JobStatus,
        reported: JobStatus,
    },

    /// The original job was declared lost and a fresh one submitted.
    Resubmitted {
        run_id: Uuid,
        lost_job_id: String,
        new_job_id: String,
    },

    /// The stored session was rejected; the caller must re-authenticate.
    SessionExpired { run_id: Uuid },

    Completed {
        run_id: Uuid,
        partial: bool,
        at: DateTime<Utc>,
    },

    Failed { run_id: Uuid, error: String },

    Cancelled { run_id: Uuid },
}
