//! Decision routine implementations

use super::DecisionRoutine;
use crate::config::DecisionConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Posts `{"account_id": N}` to an HTTP endpoint and waits for it to finish
pub struct WebhookDecision {
    url: String,
    client: Client,
}

impl WebhookDecision {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DecisionRoutine for WebhookDecision {
    async fn invoke(&self, account_id: i64) -> anyhow::Result<()> {
        tracing::debug!(url = %self.url, account_id, "Calling decision webhook");

        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "account_id": account_id }))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Decision webhook returned status: {}", response.status());
        }

        Ok(())
    }
}

/// Logs the trigger and returns; used when no webhook is configured
#[derive(Debug, Default)]
pub struct LogOnlyDecision;

#[async_trait]
impl DecisionRoutine for LogOnlyDecision {
    async fn invoke(&self, account_id: i64) -> anyhow::Result<()> {
        tracing::info!(account_id, "Decision routine triggered (no webhook configured)");
        Ok(())
    }
}

/// Build the decision routine described by `config`
pub fn decision_from_config(config: &DecisionConfig) -> anyhow::Result<Arc<dyn DecisionRoutine>> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookDecision::new(
            url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(LogOnlyDecision)),
    }
}
