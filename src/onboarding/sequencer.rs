//! Step sequencer: validates submissions, persists progress and completes
//! the flow.
//!
//! Progress writes are conditional on the version that was read, so two
//! submissions from the same base state cannot both advance. Completion
//! inserts the configuration only if absent and provisions only when that
//! insert happened, which keeps provisioning at most once per (user, flow).

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::{DatabaseError, OnboardingError};
use crate::provisioning::Provisioner;
use crate::store::Database;

use super::model::{FormData, OnboardingFlow, Step};
use super::state::{AgentConfiguration, OnboardingProgress, SequencerState};
use super::validate::{ValidationReport, Validator, apply_defaults};

/// Result of submitting a step.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// Moved to the next step.
    Advanced { progress: OnboardingProgress },
    /// Nothing was persisted; the user stays on the same step.
    Invalid { report: ValidationReport },
    /// The flow is finished. Repeated completions return the same configuration.
    Completed { configuration: AgentConfiguration },
}

/// Drives users through one flow.
pub struct Sequencer {
    flow: Arc<OnboardingFlow>,
    db: Arc<dyn Database>,
    provisioner: Arc<dyn Provisioner>,
    validator: Validator,
}

impl Sequencer {
    pub fn new(
        flow: Arc<OnboardingFlow>,
        db: Arc<dyn Database>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            flow,
            db,
            provisioner,
            validator: Validator::new(),
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn flow(&self) -> &OnboardingFlow {
        &self.flow
    }

    /// Stored progress for `user_id`, or a fresh start at step 0.
    pub async fn load(&self, user_id: &str) -> Result<OnboardingProgress, OnboardingError> {
        Ok(self
            .db
            .get_progress(user_id, &self.flow.id)
            .await?
            .unwrap_or_else(|| OnboardingProgress::new(user_id, &self.flow.id)))
    }

    /// The step `progress` points at.
    pub fn current_step(&self, progress: &OnboardingProgress) -> Result<&Step, OnboardingError> {
        self.flow
            .step(progress.current_step)
            .ok_or_else(|| OnboardingError::FlowExhausted {
                flow_id: self.flow.id.clone(),
                index: progress.current_step,
            })
    }

    pub fn validate_step(&self, step: &Step, form: &FormData) -> ValidationReport {
        self.validator.validate_step(step, form)
    }

    /// The step before the current one, for redisplay. Nothing is validated
    /// or persisted.
    pub fn back(&self, progress: &OnboardingProgress) -> Option<&Step> {
        match progress.state() {
            SequencerState::AtStep(i) if i > 0 => self.flow.step(i - 1),
            _ => None,
        }
    }

    /// Submit `form` for `step_id`, which must be the current step.
    pub async fn advance(
        &self,
        progress: &OnboardingProgress,
        step_id: &str,
        form: &FormData,
    ) -> Result<AdvanceOutcome, OnboardingError> {
        if progress.is_completed() {
            return self.existing_configuration(progress).await;
        }

        let step = self.current_step(progress)?;
        if step.id != step_id {
            return Err(OnboardingError::StepMismatch {
                submitted: step_id.to_string(),
                current: step.id.clone(),
            });
        }

        let report = self.validate_step(step, form);
        if !report.is_valid() {
            tracing::debug!(
                user_id = %progress.user_id,
                step = %step.id,
                errors = report.errors.len(),
                "Step failed validation"
            );
            return Ok(AdvanceOutcome::Invalid { report });
        }

        let mut next = progress.clone();
        next.merge(&apply_defaults(step, form));
        next.updated_at = Utc::now();

        match progress.state().next(self.flow.len()) {
            Some(SequencerState::AtStep(index)) => {
                next.current_step = index;
                next.version = self.db.save_progress(&next, progress.version).await?;
                tracing::info!(
                    user_id = %next.user_id,
                    flow_id = %next.flow_id,
                    step = index,
                    "Onboarding advanced"
                );
                Ok(AdvanceOutcome::Advanced { progress: next })
            }
            Some(SequencerState::Completed) => self.complete(progress, next).await,
            None => self.existing_configuration(progress).await,
        }
    }

    /// Load progress for `user_id` and advance it.
    pub async fn submit(
        &self,
        user_id: &str,
        step_id: &str,
        form: &FormData,
    ) -> Result<AdvanceOutcome, OnboardingError> {
        let progress = self.load(user_id).await?;
        self.advance(&progress, step_id, form).await
    }

    pub async fn configuration(
        &self,
        user_id: &str,
    ) -> Result<Option<AgentConfiguration>, OnboardingError> {
        Ok(self.db.get_configuration(user_id, &self.flow.id).await?)
    }

    async fn complete(
        &self,
        base: &OnboardingProgress,
        mut merged: OnboardingProgress,
    ) -> Result<AdvanceOutcome, OnboardingError> {
        // Claims the final step; a concurrent completion from the same base loses here.
        merged.version = match self.db.save_progress(&merged, base.version).await {
            Ok(version) => version,
            Err(DatabaseError::VersionConflict { user_id, .. }) => {
                // A retry after the winner finished sees its configuration.
                return match self
                    .db
                    .get_configuration(&merged.user_id, &merged.flow_id)
                    .await?
                {
                    Some(configuration) => {
                        tracing::debug!(
                            user_id = %user_id,
                            config_id = %configuration.id,
                            "Stale completion answered with stored configuration"
                        );
                        Ok(AdvanceOutcome::Completed { configuration })
                    }
                    None => Err(OnboardingError::ConcurrentUpdate { user_id }),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let candidate = AgentConfiguration::from_progress(&merged, &self.flow.vertical);
        let configuration = if self.db.insert_configuration(&candidate).await? {
            if let Err(e) = self.provisioner.provision(&candidate).await {
                tracing::warn!(
                    config_id = %candidate.id,
                    provisioner = self.provisioner.name(),
                    error = %e,
                    "Provisioning failed"
                );
            }
            candidate
        } else {
            self.db
                .get_configuration(&merged.user_id, &merged.flow_id)
                .await?
                .ok_or_else(|| self.exhausted(&merged))?
        };

        self.db
            .mark_progress_completed(&merged.user_id, &merged.flow_id)
            .await?;
        tracing::info!(
            user_id = %merged.user_id,
            flow_id = %merged.flow_id,
            config_id = %configuration.id,
            "Onboarding completed"
        );
        Ok(AdvanceOutcome::Completed { configuration })
    }

    async fn existing_configuration(
        &self,
        progress: &OnboardingProgress,
    ) -> Result<AdvanceOutcome, OnboardingError> {
        let configuration = self
            .db
            .get_configuration(&progress.user_id, &progress.flow_id)
            .await?
            .ok_or_else(|| self.exhausted(progress))?;
        Ok(AdvanceOutcome::Completed { configuration })
    }

    fn exhausted(&self, progress: &OnboardingProgress) -> OnboardingError {
        OnboardingError::FlowExhausted {
            flow_id: self.flow.id.clone(),
            index: progress.current_step,
        }
    }
}
