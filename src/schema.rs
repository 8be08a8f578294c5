use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of a model-generated plan. `parameters` is optional on the
/// wire; missing keys fall back to each action's declared defaults.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PlanStep {
    pub command: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// The closed set of primitive actions the model may emit. Internal
/// callers get exhaustiveness checking; model-supplied strings are
/// rejected at runtime through [`Action::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PressKeys,
    RunCommand,
    TypeText,
    OpenUrl,
    Abrogate,
    LeftClick,
    RightClick,
    Scroll,
    MoveMouse,
    LlmResponse,
    Sleep,
    SpeakText,
    ReadFromCursor,
    StopSpeaking,
    HoldMouse,
    ReleaseMouse,
}

impl Action {
    /// Every valid command name, in the order advertised to the model.
    pub const NAMES: [&'static str; 16] = [
        "press_keys",
        "run_command",
        "type_text",
        "open_url",
        "abrogate",
        "left_click",
        "right_click",
        "scroll",
        "move_mouse",
        "llm_response",
        "sleep",
        "speak_text",
        "read_from_cursor",
        "stop_speaking",
        "hold_mouse",
        "release_mouse",
    ];

    pub fn parse(name: &str) -> Option<Action> {
        match name {
            "press_keys" => Some(Action::PressKeys),
            "run_command" => Some(Action::RunCommand),
            "type_text" => Some(Action::TypeText),
            "open_url" => Some(Action::OpenUrl),
            "abrogate" => Some(Action::Abrogate),
            "left_click" => Some(Action::LeftClick),
            "right_click" => Some(Action::RightClick),
            "scroll" => Some(Action::Scroll),
            "move_mouse" => Some(Action::MoveMouse),
            "llm_response" => Some(Action::LlmResponse),
            "sleep" => Some(Action::Sleep),
            "speak_text" => Some(Action::SpeakText),
            "read_from_cursor" => Some(Action::ReadFromCursor),
            "stop_speaking" => Some(Action::StopSpeaking),
            "hold_mouse" => Some(Action::HoldMouse),
            "release_mouse" => Some(Action::ReleaseMouse),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::PressKeys => "press_keys",
            Action::RunCommand => "run_command",
            Action::TypeText => "type_text",
            Action::OpenUrl => "open_url",
            Action::Abrogate => "abrogate",
            Action::LeftClick => "left_click",
            Action::RightClick => "right_click",
            Action::Scroll => "scroll",
            Action::MoveMouse => "move_mouse",
            Action::LlmResponse => "llm_response",
            Action::Sleep => "sleep",
            Action::SpeakText => "speak_text",
            Action::ReadFromCursor => "read_from_cursor",
            Action::StopSpeaking => "stop_speaking",
            Action::HoldMouse => "hold_mouse",
            Action::ReleaseMouse => "release_mouse",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_advertised_name_parses() {
        for name in Action::NAMES {
            let action = Action::parse(name).unwrap_or_else(|| panic!("{} did not parse", name));
            assert_eq!(action.name(), name);
        }
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        assert_eq!(Action::parse("format_disk"), None);
        assert_eq!(Action::parse(""), None);
        assert_eq!(Action::parse("Press_Keys"), None);
    }

    #[test]
    fn test_step_without_parameters_deserializes() {
        let step: PlanStep = serde_json::from_str(r#"{"command": "left_click"}"#).unwrap();
        assert_eq!(step.command, "left_click");
        assert!(step.parameters.is_empty());
    }

    #[test]
    fn test_step_with_parameters_deserializes() {
        let raw = r#"{"command": "type_text", "parameters": {"text": "hello", "delay": 0.1}}"#;
        let step: PlanStep = serde_json::from_str(raw).unwrap();
        assert_eq!(step.parameters["text"].as_str().unwrap(), "hello");
    }
}
