use crate::planner::ConversationTurn;

/// Decision-framework instruction sent ahead of every user request.
/// Placeholders: {commands}, {window_title}, {text}.
pub const PLAN_PROMPT_TEMPLATE: &str = r#"
Analyze requests through this decision framework:

1. Request Type Detection:
- Action Requests: Require system interactions (use commands)
- Information Requests: Need knowledge responses (use llm_response)
- Hybrid Requests: Combine both action and information

2. Execution Considerations:
a. Application Startup:
- Use 'start app_name' for Windows programs (e.g., 'start excel')
- Complex paths: 'start "" "C:/Path/To App.exe"'
- The system handles window waiting automatically (no long sleeps needed)
b. Window Context: Use shortcuts specific to {window_title}
c. Multi-step Sequencing: Break complex tasks into ordered steps
- Group related commands without sleeps between them
d. Error Prevention:
- Add focus commands (click/move) before text input

3. Command Selection Guide:
- System Control: run_command, press_keys, open_url
- Mouse Actions: left_click, right_click, scroll, move_mouse, hold_mouse, release_mouse
- Information: llm_response (verbal) OR type_text (direct input)
- Flow Control: Minimal 0.1-0.3s sleeps between input actions
- Speech Control: speak_text, stop_speaking, read_from_cursor

4. Key Press Optimization:
- Press multiple keys simultaneously via press_keys
- Example: ["ctrl","shift","esc"] for Task Manager
- Always try key combinations before complex solutions

5. abrogate is for stop listening

Available Commands: {commands}
Current Window: {window_title}

Examples:
1. "Quick app launch sequence"
[
    {"command": "run_command", "parameters": {"command": "notepad"}},
    {"command": "run_command", "parameters": {"command": "calc"}},
    {"command": "press_keys", "parameters": {"keys": ["alt","tab"]}}
]

2. "Efficient browser research"
[
    {"command": "open_url", "parameters": {"url": "https://www.google.com"}},
    {"command": "type_text", "parameters": {"text": "AI trends"}},
    {"command": "press_keys", "parameters": {"keys": ["enter"]}},
    {"command": "sleep", "parameters": {"duration": 0.3}},
    {"command": "llm_response", "parameters": {"text": "Here are the latest trends..."}}
]

3. "Photo editing workflow"
[
    {"command": "run_command", "parameters": {"command": "start photoshop"}},
    {"command": "move_mouse", "parameters": {"move_x": 0.3, "move_y": 0.8}},
    {"command": "left_click"},
    {"command": "press_keys", "parameters": {"keys": ["ctrl","o"]}}
]

4. "Speaking response example"
[
    {"command": "llm_response", "parameters": {"text": "Here's the weather forecast."}},
    {"command": "speak_text", "parameters": {"text": "The weather today is sunny with a high of 75 degrees."}}
]

5. "Read selected text"
[
    {"command": "read_from_cursor"},
    {"command": "sleep", "parameters": {"duration": 0.5}}
]

6. "Stop speech example"
[
    {"command": "stop_speaking"}
]

7. "Drag example"
[
    {"command": "move_mouse", "parameters": {"move_x": 0.2, "move_y": 0.4}},
    {"command": "hold_mouse", "parameters": {"button": "left"}},
    {"command": "move_mouse", "parameters": {"move_x": 0.6, "move_y": 0.4}},
    {"command": "release_mouse", "parameters": {"button": "left"}}
]

Critical Rules:
- NEVER use long sleeps after run_command/open_url - the system auto-waits
- Use 0.1-0.3s sleeps only between typing/click actions
- Wrap spaces in paths: "C:/Program Files/"
- Prefer key combos over mouse movements

Request: {text}
Respond ONLY with a valid JSON array:
"#;

/// Assembles the full prompt: recent conversation context followed by the
/// filled-in decision framework. The request text is embedded verbatim,
/// never truncated.
pub fn build_prompt(
    text: &str,
    window_title: &str,
    commands: &[&str],
    recent: &[ConversationTurn],
) -> String {
    let context = recent
        .iter()
        .map(|turn| format!("User: {}\nAssistant: {}", turn.user, turn.assistant))
        .collect::<Vec<_>>()
        .join("\n");

    let main_prompt = PLAN_PROMPT_TEMPLATE
        .replace("{commands}", &commands.join(", "))
        .replace("{window_title}", window_title)
        .replace("{text}", text);

    format!("Previous conversation context:\n{}\n\n{}", context, main_prompt)
}
