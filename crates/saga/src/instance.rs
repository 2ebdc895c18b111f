//! Saga instance and its steps.

use chrono::{DateTime, Utc};
use common::{CorrelationId, JobId, OrderId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::order::OrderRequest;
use crate::state::{SagaStatus, StepName, StepStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaStep {
    #[serde(rename = "step")]
    pub name: StepName,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// What the downstream system returned, e.g. the reservation or invoice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl SagaStep {
    fn pending(name: StepName) -> Self {
        Self {
            name,
            status: StepStatus::Pending,
            job_id: None,
            completed_at: None,
            error: None,
            output: None,
        }
    }
}

/// One order moving through the four-step saga.
///
/// Steps execute strictly in order. At any time the steps read as a prefix
/// of completed steps, at most one non-pending step, then pending steps;
/// during compensation completed steps unwind to compensated in reverse.
/// The transition methods reject anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaInstance {
    pub(crate) order_id: OrderId,
    pub(crate) correlation_id: CorrelationId,
    pub(crate) status: SagaStatus,
    pub(crate) steps: Vec<SagaStep>,
    pub(crate) request: OrderRequest,
    pub(crate) needs_intervention: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl SagaInstance {
    /// Creates a received saga with all steps pending.
    pub fn new(order_id: OrderId, correlation_id: CorrelationId, request: OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            correlation_id,
            status: SagaStatus::Received,
            steps: StepName::ALL.into_iter().map(SagaStep::pending).collect(),
            request,
            needs_intervention: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    pub fn step(&self, name: StepName) -> &SagaStep {
        &self.steps[name.index()]
    }

    pub fn request(&self) -> &OrderRequest {
        &self.request
    }

    /// True when compensation itself failed and an operator must step in.
    pub fn needs_intervention(&self) -> bool {
        self.needs_intervention
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The queued or processing step, if any.
    pub fn active_step(&self) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.status.is_active())
    }

    /// Completed steps, last first.
    pub fn completed_steps_reversed(&self) -> Vec<StepName> {
        self.steps
            .iter()
            .rev()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.name)
            .collect()
    }

    fn step_mut(&mut self, name: StepName) -> &mut SagaStep {
        &mut self.steps[name.index()]
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn invalid(&self, step: StepName, to: StepStatus) -> SagaError {
        SagaError::InvalidTransition {
            order_id: self.order_id,
            step,
            from: self.step(step).status,
            to,
        }
    }

    fn predecessor_completed(&self, step: StepName) -> bool {
        step.previous()
            .is_none_or(|prev| self.step(prev).status == StepStatus::Completed)
    }

    /// Assigns a job to the step.
    ///
    /// Allowed from pending once the predecessor completed, and from an
    /// active status when the step is re-dispatched after a restart.
    pub fn mark_queued(&mut self, step: StepName, job_id: JobId) -> Result<()> {
        let current = self.step(step).status;
        let allowed = match current {
            StepStatus::Pending => self.predecessor_completed(step) && self.active_step().is_none(),
            StepStatus::Queued | StepStatus::Processing => true,
            _ => false,
        };
        if !allowed || !matches!(self.status, SagaStatus::Received | SagaStatus::Processing) {
            return Err(self.invalid(step, StepStatus::Queued));
        }

        let entry = self.step_mut(step);
        entry.status = StepStatus::Queued;
        entry.job_id = Some(job_id);
        entry.error = None;
        self.status = SagaStatus::Processing;
        self.touch();
        Ok(())
    }

    /// Records that a worker picked up the step's job.
    pub fn mark_processing(&mut self, step: StepName, job_id: JobId) -> Result<()> {
        let entry = self.step(step);
        if !entry.status.is_active() || entry.job_id != Some(job_id) {
            return Err(self.invalid(step, StepStatus::Processing));
        }
        self.step_mut(step).status = StepStatus::Processing;
        self.touch();
        Ok(())
    }

    /// Completes the active step with its output.
    pub fn complete_step(&mut self, step: StepName, output: serde_json::Value) -> Result<()> {
        if !self.step(step).status.is_active() || !self.predecessor_completed(step) {
            return Err(self.invalid(step, StepStatus::Completed));
        }
        let entry = self.step_mut(step);
        entry.status = StepStatus::Completed;
        entry.completed_at = Some(Utc::now());
        entry.error = None;
        entry.output = Some(output);
        self.touch();
        Ok(())
    }

    /// Fails the active step.
    ///
    /// The saga becomes failed if nothing needs undoing, otherwise it starts
    /// compensating. Returns true in the latter case.
    pub fn fail_step(&mut self, step: StepName, error: impl Into<String>) -> Result<bool> {
        if !self.step(step).status.is_active() {
            return Err(self.invalid(step, StepStatus::Failed));
        }
        let entry = self.step_mut(step);
        entry.status = StepStatus::Failed;
        entry.error = Some(error.into());

        let compensate = !self.completed_steps_reversed().is_empty();
        self.status = if compensate {
            SagaStatus::Compensating
        } else {
            SagaStatus::Failed
        };
        self.touch();
        Ok(compensate)
    }

    /// Marks the saga completed once every step has completed.
    pub fn complete(&mut self) -> Result<()> {
        if let Some(step) = self
            .steps
            .iter()
            .find(|s| s.status != StepStatus::Completed)
        {
            return Err(self.invalid(step.name, StepStatus::Completed));
        }
        self.status = SagaStatus::Completed;
        self.touch();
        Ok(())
    }

    /// Marks a completed step as undone.
    ///
    /// Only the latest completed step may be compensated, so steps unwind
    /// in reverse order.
    pub fn mark_compensated(&mut self, step: StepName) -> Result<()> {
        let latest = self.completed_steps_reversed().first().copied();
        if self.status != SagaStatus::Compensating || latest != Some(step) {
            return Err(self.invalid(step, StepStatus::Compensated));
        }
        self.step_mut(step).status = StepStatus::Compensated;
        if self.completed_steps_reversed().is_empty() {
            self.status = SagaStatus::Compensated;
        }
        self.touch();
        Ok(())
    }

    /// Records that compensating `step` failed for good.
    pub fn compensation_exhausted(&mut self, step: StepName, error: impl Into<String>) {
        self.step_mut(step).error = Some(error.into());
        self.status = SagaStatus::Failed;
        self.needs_intervention = true;
        self.touch();
    }
}
