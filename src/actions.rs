use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use arboard::Clipboard;
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use serde_json::{Map, Value};

use crate::error::AgentError;
use crate::keys;
use crate::schema::Action;
use crate::sink::{AgentStatus, EventSink};
use crate::speech::Speech;

/// Inter-character delay while simulating human typing.
const TYPE_DELAY_SECS: f64 = 0.05;

/// Smoothed pointer moves take this long regardless of distance.
const MOUSE_MOVE_DURATION: Duration = Duration::from_millis(500);
const MOUSE_MOVE_STEPS: u32 = 20;

/// Cap on downward selection extensions in `read_from_cursor`.
const MAX_CAPTURE_EXTENSIONS: usize = 10;

/// Executes the primitive actions. Holds the shared speech subsystem, the
/// log/status sink, and the caller-owned activation flag.
pub struct ActionRunner {
    speech: Arc<Speech>,
    sink: Arc<dyn EventSink>,
    activated: Arc<AtomicBool>,
}

impl ActionRunner {
    pub fn new(
        speech: Arc<Speech>,
        sink: Arc<dyn EventSink>,
        activated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            speech,
            sink,
            activated,
        }
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Runs one action with its wire parameters. Missing parameters fall
    /// back to per-action defaults; values are coerced best-effort.
    pub async fn dispatch(&self, action: Action, params: &Map<String, Value>) -> Result<()> {
        match action {
            Action::PressKeys => self.press_keys(param_string_list(params, "keys")).await,
            Action::RunCommand => {
                self.run_command(&param_str(params, "command", ""));
                Ok(())
            }
            Action::TypeText => {
                self.type_text(
                    param_str(params, "text", ""),
                    param_f64(params, "delay", TYPE_DELAY_SECS),
                )
                .await
            }
            Action::OpenUrl => {
                self.open_url(&param_str(params, "url", ""));
                Ok(())
            }
            Action::Abrogate => {
                self.pause_command();
                Ok(())
            }
            Action::LeftClick => self.click(Button::Left).await,
            Action::RightClick => self.click(Button::Right).await,
            Action::Scroll => {
                self.scroll(param_f64(params, "scroll_amount", 5.0) as i32)
                    .await
            }
            Action::MoveMouse => {
                self.move_mouse(
                    param_f64(params, "move_x", 0.5),
                    param_f64(params, "move_y", 0.5),
                )
                .await
            }
            Action::LlmResponse => {
                self.llm_response(&param_str(params, "text", ""));
                Ok(())
            }
            Action::Sleep => {
                self.sleep(param_f64(params, "duration", 1.0)).await;
                Ok(())
            }
            Action::SpeakText => {
                self.speech.speak(&param_str(params, "text", ""));
                Ok(())
            }
            Action::ReadFromCursor => self.read_from_cursor().await,
            Action::StopSpeaking => {
                self.speech.stop();
                Ok(())
            }
            Action::HoldMouse => {
                self.mouse_button(&param_str(params, "button", "left"), Direction::Press)
                    .await
            }
            Action::ReleaseMouse => {
                self.mouse_button(&param_str(params, "button", "left"), Direction::Release)
                    .await
            }
        }
    }

    /// Multiple keys are sent as a simultaneous combination, a single key
    /// is pressed and released, an empty list is a no-op. Key failures are
    /// logged, never propagated.
    async fn press_keys(&self, names: Vec<String>) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let result = run_input(move || {
            let resolved = names
                .iter()
                .map(|name| {
                    keys::lookup(name)
                        .ok_or_else(|| AgentError::Input(format!("unrecognized key '{}'", name)))
                })
                .collect::<Result<Vec<Key>, _>>()?;

            let mut enigo = new_enigo()?;
            if resolved.len() > 1 {
                for key in &resolved {
                    enigo.key(*key, Direction::Press).map_err(input_err)?;
                }
                for key in resolved.iter().rev() {
                    enigo.key(*key, Direction::Release).map_err(input_err)?;
                }
            } else if let Some(key) = resolved.first() {
                enigo.key(*key, Direction::Click).map_err(input_err)?;
            }
            Ok(())
        })
        .await;

        if let Err(e) = result {
            self.sink.log(&format!("Key press failed: {}", e));
        }
        Ok(())
    }

    /// Spawns the command detached and hidden through the platform shell.
    /// Returns whether the spawn itself succeeded.
    pub fn run_command(&self, command: &str) -> bool {
        match spawn_detached(command) {
            Ok(()) => true,
            Err(e) => {
                self.sink.log(&format!("Command execution error: {}", e));
                false
            }
        }
    }

    /// Emits each character individually with a fixed delay.
    async fn type_text(&self, text: String, delay: f64) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.sink.log(&text);
        let pause = Duration::from_secs_f64(delay.max(0.0));
        run_input(move || {
            let mut enigo = new_enigo()?;
            for ch in text.chars() {
                enigo.text(&ch.to_string()).map_err(input_err)?;
                thread::sleep(pause);
            }
            Ok(())
        })
        .await
    }

    pub fn open_url(&self, url: &str) {
        if url.is_empty() {
            self.sink.log("Failed to open URL: no url given");
            return;
        }
        if let Err(e) = spawn_opener(url) {
            self.sink.log(&format!("Failed to open URL: {}", e));
        }
    }

    async fn click(&self, button: Button) -> Result<()> {
        run_input(move || {
            let mut enigo = new_enigo()?;
            enigo.button(button, Direction::Click).map_err(input_err)
        })
        .await
    }

    /// Positive amounts scroll up.
    async fn scroll(&self, amount: i32) -> Result<()> {
        run_input(move || {
            let mut enigo = new_enigo()?;
            enigo.scroll(-amount, Axis::Vertical).map_err(input_err)
        })
        .await
    }

    /// Coordinates are fractions of the screen; the pointer glides to the
    /// target instead of teleporting.
    async fn move_mouse(&self, move_x: f64, move_y: f64) -> Result<()> {
        run_input(move || {
            let mut enigo = new_enigo()?;
            let (width, height) = enigo.main_display().map_err(input_err)?;
            let target_x = to_pixel(move_x, width);
            let target_y = to_pixel(move_y, height);
            let (start_x, start_y) = enigo.location().unwrap_or((target_x, target_y));

            let pause = MOUSE_MOVE_DURATION / MOUSE_MOVE_STEPS;
            for step in 1..=MOUSE_MOVE_STEPS {
                let t = f64::from(step) / f64::from(MOUSE_MOVE_STEPS);
                let x = start_x + (f64::from(target_x - start_x) * t).round() as i32;
                let y = start_y + (f64::from(target_y - start_y) * t).round() as i32;
                enigo.move_mouse(x, y, Coordinate::Abs).map_err(input_err)?;
                thread::sleep(pause);
            }
            Ok(())
        })
        .await
    }

    async fn mouse_button(&self, name: &str, direction: Direction) -> Result<()> {
        let button = parse_button(name)?;
        run_input(move || {
            let mut enigo = new_enigo()?;
            enigo.button(button, direction).map_err(input_err)
        })
        .await
    }

    /// The only action allowed to deliberately stall the executor.
    async fn sleep(&self, duration: f64) {
        let duration = if duration.is_finite() {
            // Keep a nonsense duration from wedging the plan for years.
            duration.clamp(0.0, 86_400.0)
        } else {
            1.0
        };
        tokio::time::sleep(Duration::from_secs_f64(duration)).await;
    }

    /// Verbal response passthrough for the surrounding front end.
    pub fn llm_response(&self, text: &str) {
        if !text.is_empty() {
            self.sink.log(&format!("Assistant: {}", text));
        }
    }

    /// Best-effort text capture at the cursor: select to the end of the
    /// line, then keep extending one line down until the copied text stops
    /// changing. The prior clipboard content is restored on every path.
    async fn read_from_cursor(&self) -> Result<()> {
        let speech = Arc::clone(&self.speech);
        let sink = Arc::clone(&self.sink);
        run_input(move || {
            let mut clipboard = Clipboard::new()
                .map_err(|e| AgentError::Input(format!("clipboard unavailable: {}", e)))?;
            let original = clipboard.get_text().unwrap_or_default();

            let captured = capture_selection(&mut clipboard);

            // Restore before acting on the result, whatever happened above.
            if let Err(e) = clipboard.set_text(original) {
                sink.log(&format!("Clipboard restore failed: {}", e));
            }

            match captured? {
                Some(text) => speech.speak(&text),
                None => sink.log("No text detected"),
            }
            Ok(())
        })
        .await
    }

    /// `abrogate`: stop accepting voice commands until the caller wakes
    /// the agent again.
    pub fn pause_command(&self) {
        self.activated.store(false, Ordering::SeqCst);
        self.sink.log("🛑 Deactivated. Say 'arise' to wake me.");
        self.sink.update_status(AgentStatus::Waiting);
    }
}

async fn run_input<F>(job: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| AgentError::Input(e.to_string()))?
}

fn new_enigo() -> Result<Enigo> {
    Enigo::new(&Settings::default()).map_err(|e| AgentError::Input(e.to_string()).into())
}

fn input_err(e: enigo::InputError) -> anyhow::Error {
    AgentError::Input(e.to_string()).into()
}

fn parse_button(name: &str) -> Result<Button> {
    match name.trim().to_lowercase().as_str() {
        "left" | "" => Ok(Button::Left),
        "right" => Ok(Button::Right),
        "middle" => Ok(Button::Middle),
        other => Err(AgentError::Input(format!("unrecognized mouse button '{}'", other)).into()),
    }
}

/// Fraction of a screen dimension to an absolute pixel; 1.0 lands on the
/// last addressable pixel, not one past it.
fn to_pixel(fraction: f64, extent: i32) -> i32 {
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.5 };
    (fraction * f64::from((extent - 1).max(0))).round() as i32
}

fn capture_selection(clipboard: &mut Clipboard) -> Result<Option<String>> {
    let mut enigo = new_enigo()?;

    // Drop any existing selection first.
    enigo.key(Key::Escape, Direction::Click).map_err(input_err)?;
    thread::sleep(Duration::from_millis(200));

    combo(&mut enigo, Key::Shift, Key::End)?;
    thread::sleep(Duration::from_millis(300));
    copy_selection(&mut enigo)?;
    thread::sleep(Duration::from_millis(500));

    let mut current = clipboard.get_text().unwrap_or_default().trim().to_string();
    if current.is_empty() {
        return Ok(None);
    }

    for _ in 0..MAX_CAPTURE_EXTENSIONS {
        combo(&mut enigo, Key::Shift, Key::DownArrow)?;
        thread::sleep(Duration::from_millis(200));
        copy_selection(&mut enigo)?;
        thread::sleep(Duration::from_millis(300));

        let next = clipboard.get_text().unwrap_or_default().trim().to_string();
        if next.is_empty() || next == current {
            break;
        }
        current = next;
    }

    Ok(Some(collapse_lines(&current)))
}

fn combo(enigo: &mut Enigo, modifier: Key, key: Key) -> Result<()> {
    enigo.key(modifier, Direction::Press).map_err(input_err)?;
    enigo.key(key, Direction::Click).map_err(input_err)?;
    enigo.key(modifier, Direction::Release).map_err(input_err)?;
    Ok(())
}

fn copy_selection(enigo: &mut Enigo) -> Result<()> {
    combo(enigo, copy_modifier(), Key::Unicode('c'))
}

#[cfg(target_os = "macos")]
fn copy_modifier() -> Key {
    Key::Meta
}

#[cfg(not(target_os = "macos"))]
fn copy_modifier() -> Key {
    Key::Control
}

fn collapse_lines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

fn spawn_detached(command: &str) -> std::io::Result<()> {
    let mut process = shell_command(command);
    process
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn shell_command(command: &str) -> Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let mut process = Command::new("cmd");
    process
        .args(["/C", &shell_invocation(command)])
        .creation_flags(CREATE_NO_WINDOW);
    process
}

#[cfg(target_os = "windows")]
fn shell_invocation(command: &str) -> String {
    const LAUNCHERS: [&str; 3] = ["cmd ", "start ", "explorer "];
    if LAUNCHERS.iter().any(|prefix| command.starts_with(prefix)) {
        command.to_string()
    } else {
        format!("cmd /c \"{}\"", command)
    }
}

#[cfg(not(target_os = "windows"))]
fn shell_command(command: &str) -> Command {
    let mut process = Command::new("sh");
    process.args(["-c", command]);
    process
}

fn spawn_opener(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    let mut process = {
        let mut p = Command::new("open");
        p.arg(url);
        p
    };
    #[cfg(target_os = "linux")]
    let mut process = {
        let mut p = Command::new("xdg-open");
        p.arg(url);
        p
    };
    #[cfg(target_os = "windows")]
    let mut process = {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        let mut p = Command::new("cmd");
        p.args(["/C", "start", "", url]).creation_flags(CREATE_NO_WINDOW);
        p
    };
    process
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

fn param_str(params: &Map<String, Value>, key: &str, default: &str) -> String {
    match params.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

fn param_f64(params: &Map<String, Value>, key: &str, default: f64) -> f64 {
    match params.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn param_string_list(params: &Map<String, Value>, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::speech::EngineFactory;
    use serde_json::json;

    fn test_runner() -> (ActionRunner, Arc<MemorySink>, Arc<AtomicBool>) {
        let sink = Arc::new(MemorySink::new());
        // No engine: speech degrades to silence, which is all these
        // tests need.
        let factory: EngineFactory =
            Box::new(|| Err(AgentError::Speech("test engine disabled".to_string()).into()));
        let speech = Arc::new(Speech::new(factory, sink.clone()));
        let activated = Arc::new(AtomicBool::new(true));
        let runner = ActionRunner::new(speech, sink.clone(), Arc::clone(&activated));
        (runner, sink, activated)
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_to_pixel_screen_corners() {
        assert_eq!(to_pixel(0.0, 1920), 0);
        assert_eq!(to_pixel(1.0, 1920), 1919);
        assert_eq!(to_pixel(0.0, 1080), 0);
        assert_eq!(to_pixel(1.0, 1080), 1079);
    }

    #[test]
    fn test_to_pixel_clamps_out_of_range() {
        assert_eq!(to_pixel(-0.5, 1920), 0);
        assert_eq!(to_pixel(3.0, 1920), 1919);
        assert_eq!(to_pixel(f64::NAN, 100), to_pixel(0.5, 100));
    }

    #[test]
    fn test_collapse_lines() {
        assert_eq!(collapse_lines("one\ntwo\r\nthree"), "one two three");
        assert_eq!(collapse_lines("flat"), "flat");
    }

    #[test]
    fn test_parse_button_names() {
        assert_eq!(parse_button("left").unwrap(), Button::Left);
        assert_eq!(parse_button("Right").unwrap(), Button::Right);
        assert_eq!(parse_button("middle").unwrap(), Button::Middle);
        assert!(parse_button("bogus").is_err());
    }

    #[test]
    fn test_param_coercion() {
        let p = params(json!({"duration": "2.5", "count": 3, "text": "hi"}));
        assert_eq!(param_f64(&p, "duration", 1.0), 2.5);
        assert_eq!(param_f64(&p, "count", 1.0), 3.0);
        assert_eq!(param_f64(&p, "missing", 1.0), 1.0);
        assert_eq!(param_str(&p, "text", ""), "hi");
        assert_eq!(param_str(&p, "count", ""), "3");
        assert_eq!(param_str(&p, "missing", "fallback"), "fallback");
    }

    #[test]
    fn test_param_string_list() {
        let p = params(json!({"keys": ["ctrl", "shift", "esc"]}));
        assert_eq!(param_string_list(&p, "keys"), vec!["ctrl", "shift", "esc"]);

        let single = params(json!({"keys": "enter"}));
        assert_eq!(param_string_list(&single, "keys"), vec!["enter"]);

        let missing = params(json!({}));
        assert!(param_string_list(&missing, "keys").is_empty());
    }

    #[test]
    fn test_llm_response_routes_to_sink() {
        let (runner, sink, _) = test_runner();
        runner.llm_response("the answer is 42");
        runner.llm_response("");
        let assistant_lines: Vec<_> = sink
            .lines()
            .into_iter()
            .filter(|l| l.starts_with("Assistant:"))
            .collect();
        assert_eq!(assistant_lines, vec!["Assistant: the answer is 42"]);
    }

    #[test]
    fn test_pause_command_deactivates() {
        let (runner, sink, activated) = test_runner();
        runner.pause_command();
        assert!(!activated.load(Ordering::SeqCst));
        assert!(sink.lines().iter().any(|l| l.contains("Deactivated")));
        assert_eq!(
            *sink.statuses.lock().unwrap().last().unwrap(),
            AgentStatus::Waiting
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_reports_spawn_result() {
        let (runner, _sink, _) = test_runner();
        assert!(runner.run_command("true"));
    }

    #[tokio::test]
    async fn test_empty_press_keys_is_a_no_op() {
        let (runner, sink, _) = test_runner();
        let before = sink.lines().len();
        runner.press_keys(Vec::new()).await.unwrap();
        assert_eq!(sink.lines().len(), before);
    }

    #[tokio::test]
    async fn test_unrecognized_key_is_logged_not_fatal() {
        let (runner, sink, _) = test_runner();
        let result = runner.press_keys(vec!["notakey".to_string()]).await;
        assert!(result.is_ok());
        assert!(sink.lines().iter().any(|l| l.contains("Key press failed")));
    }

    #[tokio::test]
    async fn test_empty_type_text_is_a_no_op() {
        let (runner, sink, _) = test_runner();
        let before = sink.lines().len();
        runner.type_text(String::new(), 0.0).await.unwrap();
        assert_eq!(sink.lines().len(), before);
    }
}
