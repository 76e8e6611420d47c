//! Provisioning: what happens to an agent configuration once a flow completes.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProvisionError;
use crate::onboarding::state::AgentConfiguration;

/// Receives each completed configuration. Called at most once per (user, flow).
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &str;

    async fn provision(&self, config: &AgentConfiguration) -> Result<(), ProvisionError>;
}

/// Logs the configuration and does nothing else.
#[derive(Debug, Default)]
pub struct LoggingProvisioner;

#[async_trait]
impl Provisioner for LoggingProvisioner {
    fn name(&self) -> &str {
        "log"
    }

    async fn provision(&self, config: &AgentConfiguration) -> Result<(), ProvisionError> {
        tracing::info!(
            config_id = %config.id,
            user_id = %config.user_id,
            flow_id = %config.flow_id,
            vertical = %config.vertical,
            fields = config.values.len(),
            "Agent configuration ready for provisioning"
        );
        Ok(())
    }
}

/// POSTs the configuration as JSON to a fixed URL.
pub struct WebhookProvisioner {
    client: reqwest::Client,
    url: String,
}

impl WebhookProvisioner {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProvisionError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Provisioner for WebhookProvisioner {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn provision(&self, config: &AgentConfiguration) -> Result<(), ProvisionError> {
        let resp = self
            .client
            .post(&self.url)
            .json(config)
            .send()
            .await
            .map_err(|e| ProvisionError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProvisionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(config_id = %config.id, url = %self.url, "Provisioning webhook accepted");
        Ok(())
    }
}
