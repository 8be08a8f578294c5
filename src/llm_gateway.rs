use std::env;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::AgentError;

/// Remote execution state as reported by the task runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl ExecutionStatus {
    pub fn parse(raw: &str) -> ExecutionStatus {
        match raw {
            "succeeded" => ExecutionStatus::Succeeded,
            "failed" => ExecutionStatus::Failed,
            "running" | "starting" | "queued" => ExecutionStatus::Running,
            other => ExecutionStatus::Other(other.to_string()),
        }
    }

    /// Terminal states never change again; polling can stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// Remote plan-generation backend: submit a prompt, then poll the returned
/// execution until it reaches a terminal status.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn submit(&self, prompt: &str) -> Result<String>;
    async fn execution(&self, id: &str) -> Result<ExecutionState>;
}

const DEFAULT_BASE_URL: &str = "https://api.julep.ai/api";
const AGENT_MODEL: &str = "gpt-4o-mini";

/// HTTP client for the Julep task runner. The agent and task template are
/// created once at startup; executions are created per request.
pub struct JulepGateway {
    client: Client,
    api_key: String,
    base_url: String,
    task_id: String,
}

impl JulepGateway {
    /// Connects and bootstraps the remote agent plus its task template.
    /// Any failure here is startup-fatal: without a task template the
    /// system must not start accepting commands.
    pub async fn connect() -> Result<Self> {
        let api_key = env::var("JULEP_API_KEY")
            .map_err(|_| AgentError::Config("JULEP_API_KEY not set in .env".to_string()))?;
        let base_url =
            env::var("JULEP_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let mut gateway = Self {
            client,
            api_key,
            base_url,
            task_id: String::new(),
        };

        let agent = gateway
            .post_json(
                "/agents",
                &json!({
                    "name": "VoiceControl",
                    "model": AGENT_MODEL,
                    "about": "System control assistant that outputs valid JSON commands",
                }),
            )
            .await?;
        let agent_id = agent["id"]
            .as_str()
            .ok_or_else(|| AgentError::Gateway("agent response missing id".to_string()))?
            .to_string();

        let task = gateway
            .post_json(
                &format!("/agents/{}/tasks", agent_id),
                &json!({
                    "name": "Voice Command Handler",
                    "description": "Interpret a user command and return system-level actions as JSON",
                    "main": [
                        {
                            "prompt": [
                                {
                                    "role": "system",
                                    "content": "You are a system control agent. Return a JSON array of commands only.",
                                },
                                {
                                    "role": "user",
                                    "content": "$ f\"\"\"{steps[0].input.prompt}\"\"\"",
                                },
                            ],
                        },
                    ],
                }),
            )
            .await?;
        gateway.task_id = task["id"]
            .as_str()
            .ok_or_else(|| AgentError::Gateway("task response missing id".to_string()))?
            .to_string();

        Ok(gateway)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Gateway(format!("{} -> {}: {}", path, status, text)).into());
        }
        Ok(response.json().await?)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Gateway(format!("{} -> {}: {}", path, status, text)).into());
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TaskBackend for JulepGateway {
    async fn submit(&self, prompt: &str) -> Result<String> {
        let execution = self
            .post_json(
                &format!("/tasks/{}/executions", self.task_id),
                &json!({ "input": { "prompt": prompt } }),
            )
            .await?;
        let id = execution["id"]
            .as_str()
            .ok_or_else(|| AgentError::Gateway("execution response missing id".to_string()))?;
        Ok(id.to_string())
    }

    async fn execution(&self, id: &str) -> Result<ExecutionState> {
        let body = self.get_json(&format!("/executions/{}", id)).await?;
        let status = ExecutionStatus::parse(body["status"].as_str().unwrap_or(""));
        let output = match body.get("output") {
            Some(Value::Null) | None => None,
            Some(value) => Some(value.clone()),
        };
        let error = body["error"].as_str().map(|s| s.to_string());
        Ok(ExecutionState {
            status,
            output,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!(ExecutionStatus::parse("succeeded"), ExecutionStatus::Succeeded);
        assert_eq!(ExecutionStatus::parse("failed"), ExecutionStatus::Failed);
        assert_eq!(ExecutionStatus::parse("running"), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::parse("queued"), ExecutionStatus::Running);
        assert_eq!(
            ExecutionStatus::parse("cancelled"),
            ExecutionStatus::Other("cancelled".to_string())
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Other("cancelled".to_string()).is_terminal());
    }
}
