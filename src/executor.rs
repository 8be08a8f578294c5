use crate::actions::ActionRunner;
use crate::schema::{Action, PlanStep};

/// Walks a plan strictly in order. One bad step never aborts the rest:
/// unknown commands are skipped, handler failures are logged, and the
/// walk continues. Actions are not transactional; there is no rollback.
pub struct Executor {
    runner: ActionRunner,
}

impl Executor {
    pub fn new(runner: ActionRunner) -> Self {
        Self { runner }
    }

    pub async fn execute(&self, plan: &[PlanStep]) {
        for step in plan {
            match Action::parse(&step.command) {
                None => {
                    self.runner
                        .sink()
                        .log(&format!("Unknown command: {}", step.command));
                }
                Some(action) => {
                    if let Err(e) = self.runner.dispatch(action, &step.parameters).await {
                        self.runner.sink().log(&format!(
                            "Error executing command {}: {}",
                            action.name(),
                            e
                        ));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::sink::MemorySink;
    use crate::speech::{EngineFactory, Speech};
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn test_executor() -> (Executor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let factory: EngineFactory =
            Box::new(|| Err(AgentError::Speech("test engine disabled".to_string()).into()));
        let speech = Arc::new(Speech::new(factory, sink.clone()));
        let runner = ActionRunner::new(speech, sink.clone(), Arc::new(AtomicBool::new(true)));
        (Executor::new(runner), sink)
    }

    fn step(command: &str, parameters: serde_json::Value) -> PlanStep {
        PlanStep {
            command: command.to_string(),
            parameters: parameters.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_unknown_command_is_skipped_in_order() {
        let (executor, sink) = test_executor();
        let plan = vec![
            step("llm_response", json!({"text": "one"})),
            step("warp_drive", json!({})),
            step("llm_response", json!({"text": "two"})),
        ];

        executor.execute(&plan).await;

        let lines = sink.lines();
        let first = lines.iter().position(|l| l == "Assistant: one").unwrap();
        let skipped = lines
            .iter()
            .position(|l| l == "Unknown command: warp_drive")
            .unwrap();
        let second = lines.iter().position(|l| l == "Assistant: two").unwrap();
        assert!(first < skipped && skipped < second);
    }

    #[tokio::test]
    async fn test_failing_step_does_not_halt_the_plan() {
        let (executor, sink) = test_executor();
        let plan = vec![
            step("llm_response", json!({"text": "before"})),
            // parse_button rejects this before any OS interaction
            step("hold_mouse", json!({"button": "bogus"})),
            step("llm_response", json!({"text": "after"})),
        ];

        executor.execute(&plan).await;

        let lines = sink.lines();
        assert!(lines
            .iter()
            .any(|l| l.starts_with("Error executing command hold_mouse")));
        let failed = lines
            .iter()
            .position(|l| l.starts_with("Error executing command"))
            .unwrap();
        let after = lines.iter().position(|l| l == "Assistant: after").unwrap();
        assert!(failed < after);
    }

    #[tokio::test]
    async fn test_empty_plan_is_a_no_op() {
        let (executor, sink) = test_executor();
        let before = sink.lines().len();
        executor.execute(&[]).await;
        assert_eq!(sink.lines().len(), before);
    }
}
