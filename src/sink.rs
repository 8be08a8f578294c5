use std::fmt;

/// Coarse agent state shown by the surrounding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Listening,
    Working,
    Waiting,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Listening => write!(f, "listening"),
            AgentStatus::Working => write!(f, "working"),
            AgentStatus::Waiting => write!(f, "waiting"),
        }
    }
}

/// Destination for human-readable log lines and status updates.
/// Owned by whatever front end hosts the agent; the pipeline itself
/// never renders UI.
pub trait EventSink: Send + Sync {
    fn log(&self, line: &str);
    fn update_status(&self, status: AgentStatus);
}

pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn log(&self, line: &str) {
        println!("{}", line);
    }

    fn update_status(&self, status: AgentStatus) {
        println!("[status] {}", status);
    }
}

#[cfg(test)]
pub struct MemorySink {
    pub lines: std::sync::Mutex<Vec<String>>,
    pub statuses: std::sync::Mutex<Vec<AgentStatus>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        Self {
            lines: std::sync::Mutex::new(Vec::new()),
            statuses: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl EventSink for MemorySink {
    fn log(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn update_status(&self, status: AgentStatus) {
        self.statuses.lock().unwrap().push(status);
    }
}
