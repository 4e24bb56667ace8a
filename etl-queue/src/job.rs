//! Per-job state document and its pure state-transition logic. No I/O
//! lives here; persistence is behind the [`crate::job_store::JobStore`]
//! trait so the transitions stay unit-testable without a database.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use etl_core::{IntegrationId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// UUID threaded unchanged through every message of one job.
pub type JobToken = Uuid;

/// Per-(step, stage) status. Markers never regress a finished stage to
/// running: late-arriving messages after `last_item=true` are treated as
/// benign updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Idle,
    Running,
    Finished,
    Failed,
}

impl StageStatus {
    pub fn on_first_item(self) -> Self {
        match self {
            StageStatus::Failed => self,
            _ => StageStatus::Running,
        }
    }

    pub fn on_last_item(self) -> Self {
        match self {
            StageStatus::Failed => self,
            // A late last_item after the stage already finished is benign.
            StageStatus::Finished => self,
            _ => StageStatus::Finished,
        }
    }

    pub fn on_failure(self) -> Self {
        StageStatus::Failed
    }
}

/// Overall job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    Ready,
    Running,
    Finished,
    Failed,
}

/// Per-step status across the three stages, in the order the step was
/// declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub order: u32,
    pub extraction: StageStatus,
    pub transform: StageStatus,
    pub embedding: StageStatus,
}

impl StepState {
    pub fn new(order: u32) -> Self {
        Self {
            order,
            extraction: StageStatus::Idle,
            transform: StageStatus::Idle,
            embedding: StageStatus::Idle,
        }
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::Extraction => &mut self.extraction,
            Stage::Transform => &mut self.transform,
            Stage::Embedding => &mut self.embedding,
        }
    }

    pub fn all_finished_or_idle(&self) -> bool {
        [self.extraction, self.transform, self.embedding]
            .iter()
            .all(|s| matches!(s, StageStatus::Finished | StageStatus::Idle))
    }

    pub fn any_running(&self) -> bool {
        [self.extraction, self.transform, self.embedding]
            .iter()
            .any(|s| matches!(s, StageStatus::Running))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Transform,
    Embedding,
}

/// The per-job state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDocument {
    pub tenant_id: TenantId,
    pub job_id: Uuid,
    pub job_name: String,
    pub integration_id: IntegrationId,
    pub token: JobToken,
    pub overall: OverallStatus,
    /// Ordered mapping from step name to its state; order is the
    /// insertion/declaration order of the provider's step sequence.
    pub steps: BTreeMap<String, StepState>,
    pub last_sync_date: DateTime<Utc>,
    pub reset_deadline: Option<DateTime<Utc>>,
    pub reset_attempt: u32,
}

impl JobDocument {
    pub fn new(
        tenant_id: TenantId,
        integration_id: IntegrationId,
        job_id: Uuid,
        job_name: impl Into<String>,
        token: JobToken,
        step_names: &[&str],
        last_sync_date: DateTime<Utc>,
    ) -> Self {
        let steps = step_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), StepState::new(i as u32)))
            .collect();

        Self {
            tenant_id,
            job_id,
            job_name: job_name.into(),
            integration_id,
            token,
            overall: OverallStatus::Ready,
            steps,
            last_sync_date,
            reset_deadline: None,
            reset_attempt: 0,
        }
    }

    /// Apply a `first_item` marker: flips the stage to running and, if
    /// this is the first message of the job's first step, flips overall
    /// to `Running`.
    pub fn apply_first_item(&mut self, step_name: &str, stage: Stage) {
        let is_first_step = self
            .steps
            .get(step_name)
            .map(|s| s.order == 0)
            .unwrap_or(false);

        if let Some(step) = self.steps.get_mut(step_name) {
            let current = *step.stage_mut(stage);
            *step.stage_mut(stage) = current.on_first_item();
        }

        if is_first_step && self.overall == OverallStatus::Ready {
            self.overall = OverallStatus::Running;
        }
    }

    pub fn apply_last_item(&mut self, step_name: &str, stage: Stage) {
        if let Some(step) = self.steps.get_mut(step_name) {
            let current = *step.stage_mut(stage);
            *step.stage_mut(stage) = current.on_last_item();
        }
    }

    pub fn apply_failure(&mut self, step_name: &str, stage: Stage) {
        if let Some(step) = self.steps.get_mut(step_name) {
            *step.stage_mut(stage) = StageStatus::Failed;
        }
        // overall goes FAILED only if every path to completion is
        // blocked: a failed stage blocks only once no step can still
        // reach embedding=finished.
        if self.steps.values().all(|s| matches!(s.embedding, StageStatus::Failed | StageStatus::Finished))
            && self.steps.values().any(|s| matches!(s.embedding, StageStatus::Failed))
        {
            self.overall = OverallStatus::Failed;
        }
    }

    /// True once every step's every stage is finished or idle (settle
    /// check).
    pub fn all_steps_settled(&self) -> bool {
        self.steps.values().all(|s| s.all_finished_or_idle())
    }

    /// Caller (the embedding worker, on `last_job_item`) is responsible
    /// for persisting the new watermark to the integration separately;
    /// this only updates the job document fields.
    pub fn complete(&mut self, new_last_sync_date: DateTime<Utc>, initial_deadline: DateTime<Utc>) {
        self.last_sync_date = new_last_sync_date;
        self.overall = OverallStatus::Finished;
        self.reset_deadline = Some(initial_deadline);
        self.reset_attempt = 0;
    }

    /// Settle-and-reset: transition back to READY.
    pub fn reset_to_ready(&mut self) {
        for step in self.steps.values_mut() {
            step.extraction = StageStatus::Idle;
            step.transform = StageStatus::Idle;
            step.embedding = StageStatus::Idle;
        }
        self.overall = OverallStatus::Ready;
        self.reset_deadline = None;
        self.reset_attempt = 0;
    }

    /// Settle-and-reset backoff: wait by the configured schedule, indexed
    /// by `reset_attempt`, clamped to the last entry if attempts exceed
    /// the schedule length.
    pub fn defer_reset(&mut self, now: DateTime<Utc>, schedule: &[std::time::Duration]) {
        let idx = (self.reset_attempt as usize).min(schedule.len() - 1);
        let wait = chrono::Duration::from_std(schedule[idx]).unwrap_or(chrono::Duration::seconds(60));
        self.reset_deadline = Some(now + wait);
        self.reset_attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> JobDocument {
        JobDocument::new(
            TenantId(1),
            IntegrationId(1),
            Uuid::nil(),
            "sync",
            Uuid::nil(),
            &["step_a", "step_b"],
            Utc::now(),
        )
    }

    #[test]
    fn first_message_of_first_step_moves_overall_to_running() {
        let mut d = doc();
        assert_eq!(d.overall, OverallStatus::Ready);
        d.apply_first_item("step_a", Stage::Extraction);
        assert_eq!(d.overall, OverallStatus::Running);
        assert_eq!(d.steps["step_a"].extraction, StageStatus::Running);
    }

    #[test]
    fn first_message_of_later_step_does_not_move_overall() {
        let mut d = doc();
        d.apply_first_item("step_b", Stage::Extraction);
        assert_eq!(d.overall, OverallStatus::Ready);
    }

    #[test]
    fn late_last_item_after_finished_does_not_regress() {
        let mut d = doc();
        d.apply_first_item("step_a", Stage::Extraction);
        d.apply_last_item("step_a", Stage::Extraction);
        assert_eq!(d.steps["step_a"].extraction, StageStatus::Finished);
        // A duplicate redelivered last_item is benign.
        d.apply_last_item("step_a", Stage::Extraction);
        assert_eq!(d.steps["step_a"].extraction, StageStatus::Finished);
    }

    #[test]
    fn settle_and_reset_round_trip() {
        let mut d = doc();
        for step in ["step_a", "step_b"] {
            for stage in [Stage::Extraction, Stage::Transform, Stage::Embedding] {
                d.apply_first_item(step, stage);
                d.apply_last_item(step, stage);
            }
        }
        assert!(d.all_steps_settled());
        let now = Utc::now();
        d.complete(now, now + chrono::Duration::seconds(30));
        assert_eq!(d.overall, OverallStatus::Finished);

        d.defer_reset(now, &[std::time::Duration::from_secs(60), std::time::Duration::from_secs(180)]);
        assert_eq!(d.reset_attempt, 1);

        d.reset_to_ready();
        assert_eq!(d.overall, OverallStatus::Ready);
        assert!(d.steps.values().all(|s| matches!(s.extraction, StageStatus::Idle)));
    }
}
