//! Onboarding: a fixed, ordered sequence of form steps per vertical.
//!
//! Users submit one step at a time. Each submission is validated, merged
//! into the stored progress and, on the last step, turned into an
//! `AgentConfiguration` that is provisioned once.

pub mod flows;
pub mod model;
pub mod routes;
pub mod sequencer;
pub mod state;
pub mod validate;

pub use flows::FlowCatalog;
pub use model::{Field, FieldKind, FormData, OnboardingFlow, Pattern, Step, StepKind, ValidationRule};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use sequencer::{AdvanceOutcome, Sequencer};
pub use state::{AgentConfiguration, OnboardingProgress, ProgressStatus, SequencerState};
pub use validate::{ValidationReport, Validator, validate_step};
