//! Flow catalog: the set of onboarding flows the service can run.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::OnboardingError;

use super::model::OnboardingFlow;

/// Flow used when no flow directory is configured.
const DEFAULT_FLOW: &str = include_str!("../../flows/standard-intake.json");

/// Read-only set of verified flows keyed by id.
#[derive(Debug, Clone, Default)]
pub struct FlowCatalog {
    flows: BTreeMap<String, Arc<OnboardingFlow>>,
}

impl FlowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding only the embedded standard intake flow.
    pub fn builtin() -> Result<Self, OnboardingError> {
        let mut catalog = Self::new();
        catalog.insert(OnboardingFlow::from_json(DEFAULT_FLOW)?)?;
        Ok(catalog)
    }

    /// Load every `*.json` file in `dir`. Any invalid file fails the load.
    pub fn load_dir(dir: &Path) -> Result<Self, OnboardingError> {
        let io_err = |e: std::io::Error| OnboardingError::InvalidFlow {
            flow_id: dir.display().to_string(),
            reason: e.to_string(),
        };

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut catalog = Self::new();
        for path in paths {
            let json = std::fs::read_to_string(&path).map_err(io_err)?;
            let flow = OnboardingFlow::from_json(&json).map_err(|e| match e {
                OnboardingError::InvalidFlow { flow_id, reason } => OnboardingError::InvalidFlow {
                    flow_id,
                    reason: format!("{}: {reason}", path.display()),
                },
                other => other,
            })?;
            tracing::info!(flow = %flow.id, vertical = %flow.vertical, steps = flow.len(), "Loaded onboarding flow");
            catalog.insert(flow)?;
        }

        if catalog.is_empty() {
            tracing::warn!(dir = %dir.display(), "No onboarding flows found");
        }
        Ok(catalog)
    }

    /// Add a flow. Ids must be unique.
    pub fn insert(&mut self, flow: OnboardingFlow) -> Result<(), OnboardingError> {
        flow.verify()?;
        if self.flows.contains_key(&flow.id) {
            return Err(OnboardingError::InvalidFlow {
                flow_id: flow.id.clone(),
                reason: "duplicate flow id".into(),
            });
        }
        self.flows.insert(flow.id.clone(), Arc::new(flow));
        Ok(())
    }

    pub fn get(&self, flow_id: &str) -> Result<Arc<OnboardingFlow>, OnboardingError> {
        self.flows
            .get(flow_id)
            .cloned()
            .ok_or_else(|| OnboardingError::UnknownFlow(flow_id.to_string()))
    }

    /// First flow (by id) for a vertical.
    pub fn for_vertical(&self, vertical: &str) -> Option<Arc<OnboardingFlow>> {
        self.flows.values().find(|f| f.vertical == vertical).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<OnboardingFlow>> {
        self.flows.values()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
