mod actions;
mod error;
mod executor;
mod keys;
mod llm_gateway;
mod planner;
mod prompts;
mod schema;
mod sink;
mod speech;
mod window;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

use crate::actions::ActionRunner;
use crate::executor::Executor;
use crate::llm_gateway::JulepGateway;
use crate::planner::Planner;
use crate::sink::{AgentStatus, ConsoleSink, EventSink};
use crate::speech::{Speech, SystemTts};

/// Wake word that reactivates the agent after an `abrogate`.
const WAKE_WORD: &str = "arise";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🎙️ Voice OS Agent started!");
    println!("--------------------------------------------------");
    println!("Type a request, 'help' for commands, 'quit' to exit.");
    println!("--------------------------------------------------");

    let sink: Arc<dyn EventSink> = Arc::new(ConsoleSink);

    // Startup-fatal: without the remote task template there is nothing to
    // interpret commands with, so refuse to start.
    let gateway = Arc::new(JulepGateway::connect().await?);

    let speech = Arc::new(Speech::new(SystemTts::factory(), sink.clone()));
    let activated = Arc::new(AtomicBool::new(true));
    let runner = ActionRunner::new(speech.clone(), sink.clone(), activated.clone());
    let executor = Executor::new(runner);
    let mut planner = Planner::new(gateway, sink.clone());

    sink.update_status(AgentStatus::Listening);

    let stdin = io::stdin();
    let mut reader = io::BufReader::new(stdin);
    let mut buffer = String::new();

    print!("> ");
    let _ = io::stdout().flush().await;

    while reader.read_line(&mut buffer).await? > 0 {
        let input = buffer.trim().to_string();
        buffer.clear();

        if input.is_empty() {
            print!("> ");
            let _ = io::stdout().flush().await;
            continue;
        }

        match input.as_str() {
            "quit" | "exit" => break,
            "help" => {
                println!("Say anything and it becomes an action plan. Special words:");
                println!("  abrogate         - stop listening (as a request: 'stop listening')");
                println!("  {}            - wake the agent up again", WAKE_WORD);
                println!("  quit             - exit");
            }
            _ if !activated.load(Ordering::SeqCst) => {
                if input.eq_ignore_ascii_case(WAKE_WORD) {
                    activated.store(true, Ordering::SeqCst);
                    sink.log("🔊 Reactivated.");
                    sink.update_status(AgentStatus::Listening);
                }
                // Everything else is ignored while deactivated.
            }
            request => {
                sink.update_status(AgentStatus::Working);
                let plan = planner.generate(request).await;
                if plan.is_empty() {
                    sink.log("No actions generated.");
                } else {
                    executor.execute(&plan).await;
                }
                sink.update_status(if activated.load(Ordering::SeqCst) {
                    AgentStatus::Listening
                } else {
                    AgentStatus::Waiting
                });
            }
        }

        print!("> ");
        let _ = io::stdout().flush().await;
    }

    speech.stop();
    Ok(())
}
