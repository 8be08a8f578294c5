use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Task execution failed: {0}")]
    Task(String),

    #[error("Plan parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Input injection error: {0}")]
    Input(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
