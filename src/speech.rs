use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::warn;

use crate::error::AgentError;
use crate::sink::EventSink;

/// Target speaking rate in words per minute, clamped to engine limits.
const SPEECH_RATE: f32 = 150.0;
const SPEECH_VOLUME: f32 = 0.9;

/// Bounded wait for the utterance thread to observe a stop request.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Playback backend. `speak_blocking` returns only when the utterance has
/// finished or was stopped; `stop` may be called from another thread while
/// an utterance is in flight.
pub trait SpeechEngine: Send + Sync {
    fn speak_blocking(&self, text: &str) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

pub type EngineFactory = Box<dyn Fn() -> Result<Arc<dyn SpeechEngine>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechPhase {
    Idle,
    Speaking,
    Resetting,
}

struct SpeechState {
    phase: SpeechPhase,
    engine: Option<Arc<dyn SpeechEngine>>,
    task: Option<thread::JoinHandle<()>>,
}

/// Owns the text-to-speech engine. One utterance at a time: starting a new
/// one forcibly stops the prior one, and `stop` recreates the engine before
/// returning to Idle (engines can wedge after a forced stop).
pub struct Speech {
    state: Mutex<SpeechState>,
    speaking: Arc<AtomicBool>,
    factory: EngineFactory,
    sink: Arc<dyn EventSink>,
}

impl Speech {
    pub fn new(factory: EngineFactory, sink: Arc<dyn EventSink>) -> Self {
        let engine = match factory() {
            Ok(engine) => Some(engine),
            Err(e) => {
                sink.log(&format!("TTS Error: {}", e));
                None
            }
        };
        Self {
            state: Mutex::new(SpeechState {
                phase: SpeechPhase::Idle,
                engine,
                task: None,
            }),
            speaking: Arc::new(AtomicBool::new(false)),
            factory,
            sink,
        }
    }

    /// True while an utterance is actually playing.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn phase(&self) -> SpeechPhase {
        let state = self.lock_state();
        // A naturally finished utterance leaves the recorded phase behind;
        // the atomic flag is the ground truth.
        if state.phase == SpeechPhase::Speaking && !self.is_speaking() {
            SpeechPhase::Idle
        } else {
            state.phase
        }
    }

    /// Speaks `text` on a background thread. Supersedes any in-progress
    /// utterance. The caller is never blocked by utterance duration.
    pub fn speak(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut state = self.lock_state();
        if self.is_speaking() {
            self.stop_locked(&mut state);
        }
        let Some(engine) = state.engine.clone() else {
            return;
        };

        self.speaking.store(true, Ordering::SeqCst);
        state.phase = SpeechPhase::Speaking;

        let speaking = Arc::clone(&self.speaking);
        let sink = Arc::clone(&self.sink);
        let text = text.to_string();
        state.task = Some(thread::spawn(move || {
            if let Err(e) = engine.speak_blocking(&text) {
                sink.log(&format!("Speech Error: {}", e));
            }
            speaking.store(false, Ordering::SeqCst);
        }));
    }

    /// Forcibly halts any in-progress utterance and returns the subsystem
    /// to Idle. Synchronous from the caller's view: the prior utterance
    /// thread is waited on (bounded) before this returns.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        self.stop_locked(&mut state);
    }

    fn stop_locked(&self, state: &mut MutexGuard<'_, SpeechState>) {
        state.phase = SpeechPhase::Resetting;

        if let Some(engine) = &state.engine {
            if let Err(e) = engine.stop() {
                warn!("TTS stop failed: {}", e);
            }
        }

        if let Some(task) = state.task.take() {
            wait_bounded(task, STOP_JOIN_TIMEOUT);
        }

        // Recreate the engine rather than trusting the stopped one.
        state.engine = match (self.factory)() {
            Ok(engine) => Some(engine),
            Err(e) => {
                self.sink.log(&format!("TTS Reset Error: {}", e));
                None
            }
        };

        self.speaking.store(false, Ordering::SeqCst);
        state.phase = SpeechPhase::Idle;
    }

    fn lock_state(&self) -> MutexGuard<'_, SpeechState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn wait_bounded(task: thread::JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !task.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    if task.is_finished() {
        let _ = task.join();
    }
    // An unresponsive utterance thread is abandoned; the fresh engine
    // created by the caller takes over.
}

/// Production engine backed by the platform speech command (`say`,
/// `spd-say`, Windows SAPI). The child process is owned by the utterance
/// thread; stopping is signalled through a flag the utterance loop polls,
/// which then kills the child.
pub struct SystemTts {
    cancel: AtomicBool,
}

impl SystemTts {
    pub fn create() -> Result<Arc<dyn SpeechEngine>> {
        // Probe for the speech command so a missing engine surfaces at
        // startup instead of on the first utterance.
        if !speech_command_available() {
            return Err(AgentError::Speech(format!(
                "speech command '{}' not available",
                SPEECH_PROGRAM
            ))
            .into());
        }
        Ok(Arc::new(SystemTts {
            cancel: AtomicBool::new(false),
        }))
    }

    pub fn factory() -> EngineFactory {
        Box::new(SystemTts::create)
    }
}

impl SpeechEngine for SystemTts {
    fn speak_blocking(&self, text: &str) -> Result<()> {
        let mut child = speech_command(text)
            .spawn()
            .map_err(|e| AgentError::Speech(e.to_string()))?;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                if let Err(e) = child.kill() {
                    warn!("TTS stop failed: {}", e);
                }
                let _ = child.wait();
                return Ok(());
            }
            match child.try_wait() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(e) => return Err(AgentError::Speech(e.to_string()).into()),
            }
        }
    }

    fn stop(&self) -> Result<()> {
        self.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(target_os = "macos")]
const SPEECH_PROGRAM: &str = "say";

#[cfg(target_os = "macos")]
fn speech_command(text: &str) -> std::process::Command {
    let mut command = std::process::Command::new(SPEECH_PROGRAM);
    command
        .arg("-r")
        .arg(format!("{}", SPEECH_RATE))
        .arg(format!("[[volm {}]] {}", SPEECH_VOLUME, text));
    command
}

#[cfg(target_os = "linux")]
const SPEECH_PROGRAM: &str = "spd-say";

#[cfg(target_os = "linux")]
fn speech_command(text: &str) -> std::process::Command {
    // spd-say rate is -100..100 relative to the service default; volume
    // is -100..100 as well.
    let rate_offset = (SPEECH_RATE - 175.0).clamp(-100.0, 100.0) as i32;
    let volume_offset = ((SPEECH_VOLUME * 2.0 - 1.0) * 100.0).clamp(-100.0, 100.0) as i32;
    let mut command = std::process::Command::new(SPEECH_PROGRAM);
    command
        .arg("--wait")
        .arg("-r")
        .arg(rate_offset.to_string())
        .arg("-i")
        .arg(volume_offset.to_string())
        .arg(text);
    command
}

#[cfg(target_os = "windows")]
const SPEECH_PROGRAM: &str = "powershell";

#[cfg(target_os = "windows")]
fn speech_command(text: &str) -> std::process::Command {
    let escaped = text.replace('\'', "''");
    let script = format!(
        "Add-Type -AssemblyName System.Speech; \
         $s = New-Object System.Speech.Synthesis.SpeechSynthesizer; \
         $s.Volume = {}; $s.Rate = {}; $s.Speak('{}')",
        (SPEECH_VOLUME * 100.0) as i32,
        ((SPEECH_RATE - 175.0) / 25.0).clamp(-10.0, 10.0) as i32,
        escaped
    );
    let mut command = std::process::Command::new(SPEECH_PROGRAM);
    command.args(["-NoProfile", "-Command", &script]);
    command
}

fn speech_command_available() -> bool {
    which(SPEECH_PROGRAM)
}

fn which(program: &str) -> bool {
    let path = match std::env::var_os("PATH") {
        Some(path) => path,
        None => return false,
    };
    std::env::split_paths(&path).any(|dir| {
        let candidate = dir.join(program);
        candidate.is_file() || candidate.with_extension("exe").is_file()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Condvar;

    /// Engine that blocks in `speak_blocking` until stopped, tracking how
    /// many utterances ever overlap.
    struct FakeEngine {
        stopped: (Mutex<bool>, Condvar),
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl SpeechEngine for FakeEngine {
        fn speak_blocking(&self, _text: &str) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let (lock, cvar) = &self.stopped;
            let guard = lock.lock().unwrap();
            let _guard = cvar
                .wait_timeout_while(guard, Duration::from_secs(2), |stopped| !*stopped)
                .unwrap();

            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            let (lock, cvar) = &self.stopped;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
            Ok(())
        }
    }

    struct Counters {
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    fn fake_factory() -> (EngineFactory, Counters) {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            active: Arc::clone(&active),
            max_active: Arc::clone(&max_active),
            stops: Arc::clone(&stops),
        };
        let factory: EngineFactory = Box::new(move || {
            Ok(Arc::new(FakeEngine {
                stopped: (Mutex::new(false), Condvar::new()),
                active: Arc::clone(&active),
                max_active: Arc::clone(&max_active),
                stops: Arc::clone(&stops),
            }) as Arc<dyn SpeechEngine>)
        });
        (factory, counters)
    }

    fn wait_until(predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !predicate() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(predicate(), "condition not reached in time");
    }

    #[test]
    fn test_second_speak_supersedes_first() {
        let (factory, counters) = fake_factory();
        let speech = Speech::new(factory, Arc::new(MemorySink::new()));

        speech.speak("first utterance");
        wait_until(|| counters.active.load(Ordering::SeqCst) == 1);

        speech.speak("second utterance");
        wait_until(|| counters.active.load(Ordering::SeqCst) == 1);

        assert_eq!(counters.max_active.load(Ordering::SeqCst), 1);
        assert!(counters.stops.load(Ordering::SeqCst) >= 1);
        assert!(speech.is_speaking());

        speech.stop();
        assert!(!speech.is_speaking());
    }

    #[test]
    fn test_stop_returns_to_idle_while_speaking() {
        let (factory, counters) = fake_factory();
        let speech = Speech::new(factory, Arc::new(MemorySink::new()));

        speech.speak("something long");
        wait_until(|| counters.active.load(Ordering::SeqCst) == 1);
        assert_eq!(speech.phase(), SpeechPhase::Speaking);

        speech.stop();
        assert_eq!(speech.phase(), SpeechPhase::Idle);
        assert!(!speech.is_speaking());
        wait_until(|| counters.active.load(Ordering::SeqCst) == 0);
    }

    #[test]
    fn test_stop_without_speech_is_harmless() {
        let (factory, _counters) = fake_factory();
        let speech = Speech::new(factory, Arc::new(MemorySink::new()));

        speech.stop();
        speech.stop();
        assert_eq!(speech.phase(), SpeechPhase::Idle);
    }

    #[test]
    fn test_empty_text_is_a_no_op() {
        let (factory, counters) = fake_factory();
        let speech = Speech::new(factory, Arc::new(MemorySink::new()));

        speech.speak("");
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counters.active.load(Ordering::SeqCst), 0);
        assert!(!speech.is_speaking());
    }

    #[test]
    fn test_engine_failure_degrades_to_silence() {
        let factory: EngineFactory =
            Box::new(|| Err(AgentError::Speech("no engine".to_string()).into()));
        let sink = Arc::new(MemorySink::new());
        let speech = Speech::new(factory, sink.clone());

        speech.speak("hello");
        assert!(!speech.is_speaking());
        assert!(sink.lines().iter().any(|l| l.contains("TTS Error")));
    }
}
