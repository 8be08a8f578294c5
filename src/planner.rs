use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::AgentError;
use crate::llm_gateway::{ExecutionState, ExecutionStatus, TaskBackend};
use crate::prompts;
use crate::schema::{Action, PlanStep};
use crate::sink::EventSink;
use crate::window;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const MAX_POLL_ATTEMPTS: u32 = 30;

/// How many past exchanges are replayed into each new prompt.
const CONTEXT_TURNS: usize = 3;

/// One completed exchange: what the user asked, what the model answered,
/// and the window that was in front at the time.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
    pub window: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only conversation history. Prompts only ever read the tail;
/// the full log is kept for the process lifetime.
#[derive(Default)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn recent(&self, count: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(count);
        &self.turns[start..]
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Turns a user request into an ordered action plan via the remote task
/// runner. Every failure mode degrades to an empty plan plus a log line;
/// this component never raises past its boundary.
pub struct Planner {
    backend: Arc<dyn TaskBackend>,
    sink: Arc<dyn EventSink>,
    history: ConversationLog,
}

impl Planner {
    pub fn new(backend: Arc<dyn TaskBackend>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            backend,
            sink,
            history: ConversationLog::default(),
        }
    }

    #[allow(dead_code)]
    pub fn history(&self) -> &ConversationLog {
        &self.history
    }

    pub async fn generate(&mut self, text: &str) -> Vec<PlanStep> {
        let current_window = window::active_window_title();
        let prompt = prompts::build_prompt(
            text,
            &current_window,
            &Action::NAMES,
            self.history.recent(CONTEXT_TURNS),
        );

        let execution_id = match self.backend.submit(&prompt).await {
            Ok(id) => id,
            Err(e) => {
                self.sink.log(&format!("Plan request failed: {}", e));
                return Vec::new();
            }
        };

        let state = match self.poll(&execution_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                self.sink.log("Plan generation timed out waiting for the task runner");
                return Vec::new();
            }
            Err(e) => {
                self.sink.log(&format!("Command processing failed: {}", e));
                return Vec::new();
            }
        };

        if state.status != ExecutionStatus::Succeeded {
            let detail = state.error.unwrap_or_else(|| "Unknown error".to_string());
            self.sink.log(&AgentError::Task(detail).to_string());
            return Vec::new();
        }

        let Some(output) = state.output else {
            self.sink.log("No output in succeeded execution");
            return Vec::new();
        };
        let Some(raw_text) = extract_output(&output) else {
            self.sink.log("No valid response found in task output");
            return Vec::new();
        };

        let clean_text = strip_code_fences(&raw_text);
        match parse_plan(&clean_text) {
            Ok(steps) => {
                self.history.push(ConversationTurn {
                    user: text.to_string(),
                    assistant: raw_text,
                    window: current_window,
                    timestamp: Utc::now(),
                });
                steps
            }
            Err(e) => {
                self.sink.log(&format!(
                    "Failed to parse JSON response: {}\nResponse: {}",
                    e, clean_text
                ));
                Vec::new()
            }
        }
    }

    /// Polls the execution until a terminal status or the attempt budget
    /// runs out. `Ok(None)` means the budget ran out before the last
    /// observed status, if any, turned terminal.
    async fn poll(&self, execution_id: &str) -> Result<Option<ExecutionState>> {
        let mut last: Option<ExecutionState> = None;
        for _ in 0..MAX_POLL_ATTEMPTS {
            let state = self.backend.execution(execution_id).await?;
            let terminal = state.status.is_terminal();
            last = Some(state);
            if terminal {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        match last {
            Some(state) if state.status.is_terminal() => Ok(Some(state)),
            _ => Ok(None),
        }
    }
}

/// Pulls the model's text out of a payload whose shape is not guaranteed.
/// Ordered fallback chain; the order is a robustness contract against an
/// uncontrolled upstream schema, so keep it explicit.
pub fn extract_output(output: &Value) -> Option<String> {
    extract_assistant_message(output)
        .or_else(|| extract_choice_content(output))
        .or_else(|| extract_plain_content(output))
        .or_else(|| extract_bracketed(&output.to_string()))
}

fn extract_assistant_message(output: &Value) -> Option<String> {
    let items = output.as_array()?;
    for item in items {
        if item["role"].as_str() == Some("assistant") {
            if let Some(content) = item["content"].as_str() {
                return Some(content.to_string());
            }
        }
    }
    None
}

fn extract_choice_content(output: &Value) -> Option<String> {
    let choice = output.get("choices")?.get(0)?;
    if let Some(content) = choice["message"]["content"].as_str() {
        return Some(content.to_string());
    }
    choice["content"].as_str().map(|s| s.to_string())
}

fn extract_plain_content(output: &Value) -> Option<String> {
    if output.is_array() {
        return None;
    }
    output.get("content")?.as_str().map(|s| s.to_string())
}

static JSON_ARRAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[\s*\{.*\}\s*\]").expect("array regex"));

fn extract_bracketed(text: &str) -> Option<String> {
    JSON_ARRAY_RE.find(text).map(|m| m.as_str().to_string())
}

pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// Direct parse first; if the model wrapped the array in prose, retry on
/// the first-`[` to last-`]` substring before giving up.
pub fn parse_plan(text: &str) -> Result<Vec<PlanStep>> {
    match serde_json::from_str::<Vec<PlanStep>>(text) {
        Ok(steps) => Ok(steps),
        Err(first_err) => {
            if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
                if start < end {
                    if let Ok(steps) = serde_json::from_str::<Vec<PlanStep>>(&text[start..=end]) {
                        return Ok(steps);
                    }
                }
            }
            Err(AgentError::Parse(first_err).into())
        }
    }
}
