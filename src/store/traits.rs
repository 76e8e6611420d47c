//! `Database` trait: single async interface for onboarding persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::onboarding::state::{AgentConfiguration, OnboardingProgress};

/// Backend-agnostic store for onboarding progress and agent configurations.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Progress ────────────────────────────────────────────────────

    /// Progress for (user, flow), if any has been saved.
    async fn get_progress(
        &self,
        user_id: &str,
        flow_id: &str,
    ) -> Result<Option<OnboardingProgress>, DatabaseError>;

    /// Write `progress` if the stored row is still at `expected_version`
    /// (0 means "no row yet"). Returns the new version.
    ///
    /// Fails with `DatabaseError::VersionConflict` when another writer got
    /// there first.
    async fn save_progress(
        &self,
        progress: &OnboardingProgress,
        expected_version: i64,
    ) -> Result<i64, DatabaseError>;

    /// Mark progress completed. No-op when already completed.
    async fn mark_progress_completed(
        &self,
        user_id: &str,
        flow_id: &str,
    ) -> Result<(), DatabaseError>;

    // ── Configurations ──────────────────────────────────────────────

    /// Insert unless a configuration for (user, flow) already exists.
    /// Returns whether this call inserted it.
    async fn insert_configuration(&self, config: &AgentConfiguration)
    -> Result<bool, DatabaseError>;

    async fn get_configuration(
        &self,
        user_id: &str,
        flow_id: &str,
    ) -> Result<Option<AgentConfiguration>, DatabaseError>;
}
