//! Polling state machine for one analysis job.
//!
//! Drives a job from submission to a terminal outcome without either hanging
//! forever or reporting a false completion:
//!   Idle → Submitting → Polling → {Completed, Failed, Recovering, Cancelled}
//!
//! `Recovering` is transient: it is entered when progress freezes inside the
//! ambiguous band, issues exactly one result fetch, and resolves back into
//! `Completed` (usable payload found) or `Polling` (job really still running).
//!
//! One orchestrator owns exactly one job. Concurrent analyses need
//! independent orchestrator instances; nothing here is shared between them.

use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use athenyx_common::ApiError;

use crate::api::{AnalysisApi, AnalysisRequest, JobStatus, StatusResponse};
use crate::events::AnalysisEvent;

// ── Config ────────────────────────────────────────────────────────────────────

/// Timing policy. The stall thresholds and the ambiguous band are empirical
/// values tied to the backend pipeline's staging; they are configuration,
/// not protocol constants.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Cadence between status polls.
    pub poll_interval: std::time::Duration,
    /// Frozen progress inside the band for this long marks the job stalled.
    pub stall_threshold: std::time::Duration,
    /// A stall persisting this long triggers recovery.
    pub stall_confirm_threshold: std::time::Duration,
    /// Inclusive progress band in which a sub-stage may have silently
    /// completed without the status flag updating.
    pub ambiguous_band: (u8, u8),
    /// Consecutive transient poll failures before the connectivity advisory.
    pub poll_failure_warning: u32,
    /// Re-submit a fresh job when status and result disagree and the
    /// last-known status was `completed`. Heuristic; switch off for
    /// backends where a lost job should fail instead.
    pub resubmit_on_lost_job: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(2),
            stall_threshold: std::time::Duration::from_secs(60),
            stall_confirm_threshold: std::time::Duration::from_secs(120),
            ambiguous_band: (50, 99),
            poll_failure_warning: 10,
            resubmit_on_lost_job: true,
        }
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Submitting,
    Polling,
    Recovering,
    Completed,
    Failed,
    Cancelled,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Completed | OrchestratorState::Failed | OrchestratorState::Cancelled
        )
    }
}

/// One submitted analysis job as the client sees it.
#[derive(Debug, Clone)]
pub struct JobHandle {
    /// Server-assigned identifier; immutable once set.
    pub job_id: String,
    pub status: JobStatus,
    /// Clamped to [0, 100]. Not monotonic; the server may report resets.
    pub progress: u8,
    /// When the progress *value* last changed (any direction).
    pub last_progress_change: Instant,
    /// Consecutive transient poll failures; reset on any successful poll.
    pub poll_failure_count: u32,
    /// Populated once, on completion or on a recovery fetch.
    pub result: Option<Value>,
    /// True when `result` holds a partial payload.
    pub partial: bool,
    pub error: Option<String>,
}

impl JobHandle {
    fn new(job_id: String, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            progress: 0,
            last_progress_change: Instant::now(),
            poll_failure_count: 0,
            result: None,
            partial: false,
            error: None,
        }
    }
}

/// Why a result fetch is being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveTrigger {
    /// The status poll reported `completed`.
    Completion,
    /// Progress froze inside the ambiguous band past the confirm threshold.
    Stall,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct JobOrchestrator<A: AnalysisApi> {
    api: A,
    cfg: OrchestratorConfig,
    run_id: Uuid,
    state: OrchestratorState,
    handle: Option<JobHandle>,
    /// Kept for re-submission when the original job is declared lost.
    request: Option<AnalysisRequest>,
    events: broadcast::Sender<AnalysisEvent>,
    cancel: CancellationToken,
    last_error: Option<String>,
    stall_warned: bool,
    connectivity_warned: bool,
}

impl<A: AnalysisApi> JobOrchestrator<A> {
    pub fn new(api: A, cfg: OrchestratorConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            api,
            cfg,
            run_id: Uuid::new_v4(),
            state: OrchestratorState::Idle,
            handle: None,
            request: None,
            events,
            cancel: CancellationToken::new(),
            last_error: None,
            stall_warned: false,
            connectivity_warned: false,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn handle(&self) -> Option<&JobHandle> {
        self.handle.as_ref()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Subscribe to progress and advisory events.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.events.subscribe()
    }

    /// Token that aborts in-flight calls and stops the cadence. Hand this to
    /// whatever owns the cancel button.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop everything. Safe from any state; a no-op once terminal.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.transition_cancelled();
    }

    // ── Submission ────────────────────────────────────────────────────────

    /// Submit the job. On success the orchestrator is left in `Polling`;
    /// call [`run`](Self::run) to drive it to a terminal state.
    #[instrument(skip(self, request), fields(run_id = %self.run_id))]
    pub async fn submit(&mut self, request: AnalysisRequest) -> Result<(), ApiError> {
        if self.cancel.is_cancelled() {
            self.transition_cancelled();
            return Err(ApiError::Cancelled);
        }
        self.state = OrchestratorState::Submitting;

        if request.document_id.trim().is_empty() {
            let err = ApiError::Permanent {
                status: 400,
                message: "document reference must not be empty".to_string(),
            };
            self.fail(err.to_string());
            return Err(err);
        }

        let cancel = self.cancel.clone();
        match self.api.submit(&request, &cancel).await {
            Ok(resp) => {
                info!(job_id = %resp.job_id, "Analysis job accepted");
                let _ = self.events.send(AnalysisEvent::Submitted {
                    run_id: self.run_id,
                    job_id: resp.job_id.clone(),
                });
                self.handle = Some(JobHandle::new(resp.job_id, resp.status));
                self.request = Some(request);
                self.state = OrchestratorState::Polling;
                Ok(())
            }
            Err(ApiError::Cancelled) => {
                self.transition_cancelled();
                Err(ApiError::Cancelled)
            }
            Err(err) => {
                if err.is_session_expired() {
                    let _ = self
                        .events
                        .send(AnalysisEvent::SessionExpired { run_id: self.run_id });
                }
                self.fail(err.to_string());
                Err(err)
            }
        }
    }

    // ── Poll loop ─────────────────────────────────────────────────────────

    /// Drive the job to a terminal state. Polls are strictly sequential:
    /// the next one is scheduled only after the previous call resolved.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(&mut self) -> OrchestratorState {
        while self.state == OrchestratorState::Polling {
            let cancel = self.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.transition_cancelled();
                    break;
                }
                _ = tokio::time::sleep(self.cfg.poll_interval) => {}
            }
            self.poll().await;
        }
        self.state
    }

    /// One poll tick. Normally invoked by [`run`](Self::run)'s cadence;
    /// callable directly where the host owns the timer. A confirmed stall
    /// resolves its recovery fetch within the same tick.
    pub async fn poll(&mut self) {
        if self.state != OrchestratorState::Polling {
            return;
        }
        if self.cancel.is_cancelled() {
            self.transition_cancelled();
            return;
        }
        self.poll_status().await;
        if self.state == OrchestratorState::Recovering {
            self.resolve_result(ResolveTrigger::Stall).await;
        }
    }

    async fn poll_status(&mut self) {
        let Some(job_id) = self.handle.as_ref().map(|h| h.job_id.clone()) else {
            return;
        };

        let cancel = self.cancel.clone();
        match self.api.status(&job_id, &cancel).await {
            Ok(status) => self.apply_status(status).await,
            Err(ApiError::SessionExpired) => {
                warn!(job_id = %job_id, "Session expired during polling, stopping");
                let _ = self
                    .events
                    .send(AnalysisEvent::SessionExpired { run_id: self.run_id });
                self.transition_cancelled();
            }
            Err(ApiError::Cancelled) => self.transition_cancelled(),
            Err(err) if err.is_transient() => {
                let handle = self.handle.as_mut().expect("polling without a handle");
                handle.poll_failure_count += 1;
                warn!(
                    job_id = %job_id,
                    consecutive = handle.poll_failure_count,
                    error = %err,
                    "Status poll failed; keeping the cadence"
                );
                if handle.poll_failure_count == self.cfg.poll_failure_warning
                    && !self.connectivity_warned
                {
                    self.connectivity_warned = true;
                    let _ = self.events.send(AnalysisEvent::ConnectivityDegraded {
                        run_id: self.run_id,
                        consecutive_failures: self.cfg.poll_failure_warning,
                    });
                }
            }
            Err(err) => {
                // Permanent (e.g. the job vanished server-side) or undecodable.
                self.fail(format!("status poll failed: {err}"));
            }
        }
    }

    async fn apply_status(&mut self, status: StatusResponse) {
        {
            let handle = self.handle.as_mut().expect("polling without a handle");
            handle.poll_failure_count = 0;
        }
        self.connectivity_warned = false;

        match status.status {
            JobStatus::Completed => {
                self.handle.as_mut().expect("polling without a handle").status =
                    JobStatus::Completed;
                self.resolve_result(ResolveTrigger::Completion).await;
            }
            JobStatus::Failed => {
                self.handle.as_mut().expect("polling without a handle").status = JobStatus::Failed;
                let message = status
                    .error
                    .unwrap_or_else(|| "analysis failed without detail".to_string());
                self.fail(message);
            }
            JobStatus::Pending | JobStatus::Processing | JobStatus::Unknown => {
                let progress = clamp_progress(status.progress);
                let handle = self.handle.as_mut().expect("polling without a handle");
                handle.status = status.status;

                if progress != handle.progress {
                    // Staleness is "did the value change at all" — a regression
                    // also restarts the clock.
                    handle.progress = progress;
                    handle.last_progress_change = Instant::now();
                    self.stall_warned = false;
                    debug!(progress, "Progress update");
                    let _ = self.events.send(AnalysisEvent::Progress {
                        run_id: self.run_id,
                        progress,
                    });
                    return;
                }

                let frozen_for = handle.last_progress_change.elapsed();
                if !in_ambiguous_band(progress, self.cfg.ambiguous_band) {
                    return;
                }
                if frozen_for >= self.cfg.stall_threshold && !self.stall_warned {
                    self.stall_warned = true;
                    warn!(
                        progress,
                        stalled_secs = frozen_for.as_secs(),
                        "Progress frozen inside the ambiguous band"
                    );
                    let _ = self.events.send(AnalysisEvent::Stalled {
                        run_id: self.run_id,
                        progress,
                        stalled_for_secs: frozen_for.as_secs(),
                    });
                }
                if frozen_for >= self.cfg.stall_confirm_threshold {
                    info!(progress, "Stall confirmed, fetching the result directly");
                    self.state = OrchestratorState::Recovering;
                }
            }
        }
    }

    // ── Result resolution ─────────────────────────────────────────────────

    /// Fetch `/jobs/{id}/result` once and fold the outcome back into the
    /// state machine. Reached from a `completed` poll and from a confirmed
    /// stall; the two triggers disagree about what "still processing" means.
    async fn resolve_result(&mut self, trigger: ResolveTrigger) {
        let (job_id, last_known) = {
            let handle = self.handle.as_ref().expect("resolving without a handle");
            (handle.job_id.clone(), handle.status)
        };

        let cancel = self.cancel.clone();
        let response = match self.api.result(&job_id, &cancel).await {
            Ok(response) => response,
            Err(ApiError::SessionExpired) => {
                let _ = self
                    .events
                    .send(AnalysisEvent::SessionExpired { run_id: self.run_id });
                self.transition_cancelled();
                return;
            }
            Err(ApiError::Cancelled) => {
                self.transition_cancelled();
                return;
            }
            Err(err) => {
                match trigger {
                    ResolveTrigger::Stall => {
                        // Same treatment as a failed poll: note it, restart the
                        // stall clock, give the cadence another chance.
                        warn!(job_id = %job_id, error = %err, "Recovery fetch failed, resuming polls");
                        let handle = self.handle.as_mut().expect("resolving without a handle");
                        handle.poll_failure_count += 1;
                        handle.last_progress_change = Instant::now();
                        self.stall_warned = false;
                        self.state = OrchestratorState::Polling;
                    }
                    ResolveTrigger::Completion => {
                        self.fail(format!(
                            "analysis completed but the result could not be retrieved: {err}"
                        ));
                    }
                }
                return;
            }
        };

        match response.status {
            JobStatus::Completed => {
                let handle = self.handle.as_mut().expect("resolving without a handle");
                handle.result = response.data;
                handle.status = JobStatus::Completed;
                self.complete(false);
            }
            JobStatus::Failed => {
                if has_payload(&response.data) {
                    // Degraded success: a usable payload outranks the failure
                    // flag. Terminal, distinguishable from pure failure.
                    let handle = self.handle.as_mut().expect("resolving without a handle");
                    handle.result = response.data;
                    handle.partial = true;
                    handle.status = JobStatus::Completed;
                    let _ = self.events.send(AnalysisEvent::PartialResult {
                        run_id: self.run_id,
                        terminal: true,
                    });
                    self.complete(true);
                } else {
                    self.handle_inconsistency(last_known, response.status).await;
                }
            }
            JobStatus::Pending | JobStatus::Processing | JobStatus::Unknown => match trigger {
                ResolveTrigger::Stall => {
                    if has_payload(&response.data) {
                        let handle = self.handle.as_mut().expect("resolving without a handle");
                        handle.result = response.data;
                        handle.partial = true;
                        let _ = self.events.send(AnalysisEvent::PartialResult {
                            run_id: self.run_id,
                            terminal: false,
                        });
                        info!(job_id = %job_id, "Stored partial payload, job still running");
                    }
                    // The job really is still processing; a later completion
                    // may supersede whatever we stored.
                    let handle = self.handle.as_mut().expect("resolving without a handle");
                    handle.last_progress_change = Instant::now();
                    self.stall_warned = false;
                    self.state = OrchestratorState::Polling;
                }
                ResolveTrigger::Completion => {
                    self.handle_inconsistency(last_known, response.status).await;
                }
            },
        }
    }

    /// Status poll and result fetch disagree. Advisory only — never a crash.
    async fn handle_inconsistency(&mut self, polled: JobStatus, reported: JobStatus) {
        warn!(%polled, %reported, "Status poll and result fetch disagree");
        let _ = self.events.send(AnalysisEvent::InconsistentState {
            run_id: self.run_id,
            polled,
            reported,
        });

        if polled == JobStatus::Completed {
            if self.cfg.resubmit_on_lost_job {
                self.resubmit_fresh().await;
            } else {
                self.fail("job reported completed but its result is unavailable".to_string());
            }
        } else {
            // Let the next poll sort it out; if the job truly failed the
            // status endpoint will say so.
            let handle = self.handle.as_mut().expect("resolving without a handle");
            handle.last_progress_change = Instant::now();
            self.stall_warned = false;
            self.state = OrchestratorState::Polling;
        }
    }

    /// The original job is considered lost; start over with the same request.
    async fn resubmit_fresh(&mut self) {
        let Some(request) = self.request.clone() else {
            self.fail("cannot re-submit a lost job without its original request".to_string());
            return;
        };
        let lost_job_id = self
            .handle
            .as_ref()
            .map(|h| h.job_id.clone())
            .unwrap_or_default();

        info!(lost_job_id = %lost_job_id, "Re-submitting a fresh analysis attempt");
        let cancel = self.cancel.clone();
        match self.api.submit(&request, &cancel).await {
            Ok(resp) => {
                let _ = self.events.send(AnalysisEvent::Resubmitted {
                    run_id: self.run_id,
                    lost_job_id,
                    new_job_id: resp.job_id.clone(),
                });
                self.handle = Some(JobHandle::new(resp.job_id, resp.status));
                self.stall_warned = false;
                self.connectivity_warned = false;
                self.state = OrchestratorState::Polling;
            }
            Err(ApiError::Cancelled) => self.transition_cancelled(),
            Err(ApiError::SessionExpired) => {
                let _ = self
                    .events
                    .send(AnalysisEvent::SessionExpired { run_id: self.run_id });
                self.transition_cancelled();
            }
            Err(err) => self.fail(format!("re-submission after lost job failed: {err}")),
        }
    }

    // ── Terminal transitions ──────────────────────────────────────────────

    fn complete(&mut self, partial: bool) {
        if self.state.is_terminal() {
            return;
        }
        self.state = OrchestratorState::Completed;
        info!(partial, "Analysis job completed");
        let _ = self.events.send(AnalysisEvent::Completed {
            run_id: self.run_id,
            partial,
            at: Utc::now(),
        });
    }

    fn fail(&mut self, message: String) {
        if self.state.is_terminal() {
            return;
        }
        warn!(error = %message, "Analysis job failed");
        if let Some(handle) = &mut self.handle {
            handle.error = Some(message.clone());
        }
        self.last_error = Some(message.clone());
        self.state = OrchestratorState::Failed;
        let _ = self.events.send(AnalysisEvent::Failed {
            run_id: self.run_id,
            error: message,
        });
    }

    fn transition_cancelled(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = OrchestratorState::Cancelled;
        let _ = self
            .events
            .send(AnalysisEvent::Cancelled { run_id: self.run_id });
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn clamp_progress(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}

fn in_ambiguous_band(progress: u8, band: (u8, u8)) -> bool {
    progress >= band.0 && progress <= band.1
}

/// A payload counts only if it carries data: `null`, `{}`, `[]`, and `""`
/// are as good as absent.
fn has_payload(data: &Option<Value>) -> bool {
    match data {
        None | Some(Value::Null) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(-5), 0);
        assert_eq!(clamp_progress(0), 0);
        assert_eq!(clamp_progress(42), 42);
        assert_eq!(clamp_progress(100), 100);
        assert_eq!(clamp_progress(250), 100);
    }

    #[test]
    fn test_ambiguous_band_is_inclusive() {
        let band = (50, 99);
        assert!(!in_ambiguous_band(49, band));
        assert!(in_ambiguous_band(50, band));
        assert!(in_ambiguous_band(99, band));
        assert!(!in_ambiguous_band(100, band));
    }

    #[test]
    fn test_has_payload_rejects_empty_shapes() {
        assert!(!has_payload(&None));
        assert!(!has_payload(&Some(Value::Null)));
        assert!(!has_payload(&Some(json!({}))));
        assert!(!has_payload(&Some(json!([]))));
        assert!(!has_payload(&Some(json!(""))));
        assert!(has_payload(&Some(json!({"partial": true}))));
        assert!(has_payload(&Some(json!([1]))));
    }

    #[test]
    fn test_default_config_matches_policy() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.poll_interval, std::time::Duration::from_secs(2));
        assert_eq!(cfg.stall_threshold, std::time::Duration::from_secs(60));
        assert_eq!(cfg.stall_confirm_threshold, std::time::Duration::from_secs(120));
        assert_eq!(cfg.poll_failure_warning, 10);
        assert!(cfg.resubmit_on_lost_job);
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrchestratorState::Completed.is_terminal());
        assert!(OrchestratorState::Failed.is_terminal());
        assert!(OrchestratorState::Cancelled.is_terminal());
        assert!(!OrchestratorState::Idle.is_terminal());
        assert!(!OrchestratorState::Polling.is_terminal());
        assert!(!OrchestratorState::Recovering.is_terminal());
    }

    #[test]
    fn test_fresh_handle_invariants() {
        let handle = JobHandle::new("j-1".into(), JobStatus::Pending);
        assert_eq!(handle.progress, 0);
        assert_eq!(handle.poll_failure_count, 0);
        assert!(handle.result.is_none());
        assert!(!handle.partial);
        assert!(handle.error.is_none());
    }
}
