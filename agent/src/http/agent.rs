//! Agent endpoints of base

use openapi_client::models::{AgentTokenResponse, StatusRequest, StatusResponse, Task};

use crate::errors::AgentError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Exchange the bootstrap token for a short-lived agent token
    pub async fn exchange_agent_token(&self, bootstrap_token: &str) -> Result<String, AgentError> {
        let response: AgentTokenResponse = self
            .post::<_, ()>("/v1/agent/token", bootstrap_token, None)
            .await
            .map_err(|e| AgentError::TokenError(e.to_string()))?;

        if !response.success {
            return Err(AgentError::TokenError(
                response
                    .message
                    .unwrap_or_else(|| "token exchange rejected".to_string()),
            ));
        }

        response
            .data
            .map(|data| data.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AgentError::TokenError("token missing from response".to_string()))
    }

    /// Report status and completed tasks; returns the new tasks issued by base
    pub async fn report_status(
        &self,
        instance_id: &str,
        agent_token: &str,
        request: &StatusRequest,
    ) -> Result<Vec<Task>, AgentError> {
        let path = format!("/v1/agent/instances/{}/status", instance_id);
        let response: StatusResponse = self.post(&path, agent_token, Some(request)).await?;

        if !response.success {
            return Err(AgentError::SyncError(format!(
                "status rejected by base: {}",
                response.message
            )));
        }

        Ok(response.data.map(|data| data.tasks).unwrap_or_default())
    }
}
