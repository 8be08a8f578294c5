use anyhow::Result;
use tracing::debug;

/// Placeholder title used whenever the foreground window cannot be
/// resolved, so prompts always carry a window context field.
pub const UNKNOWN_WINDOW: &str = "Unknown Window";

/// Title of the currently focused application window. Never fails;
/// lookup problems degrade to [`UNKNOWN_WINDOW`].
pub fn active_window_title() -> String {
    match fetch_title() {
        Ok(title) if !title.is_empty() => title,
        Ok(_) => UNKNOWN_WINDOW.to_string(),
        Err(e) => {
            debug!("Foreground window lookup failed: {}", e);
            UNKNOWN_WINDOW.to_string()
        }
    }
}

#[cfg(target_os = "macos")]
fn fetch_title() -> Result<String> {
    let script = r#"
        tell application "System Events"
            set frontApp to first application process whose frontmost is true
            set windowTitle to name of frontApp
            try
                set windowTitle to name of front window of frontApp
            end try
        end tell
        return windowTitle
    "#;
    run_capture("osascript", &["-e", script])
}

#[cfg(target_os = "linux")]
fn fetch_title() -> Result<String> {
    run_capture("xdotool", &["getactivewindow", "getwindowname"])
}

#[cfg(target_os = "windows")]
fn fetch_title() -> Result<String> {
    let script = r#"
        Add-Type @"
        using System;
        using System.Runtime.InteropServices;
        using System.Text;
        public class Fg {
            [DllImport("user32.dll")] public static extern IntPtr GetForegroundWindow();
            [DllImport("user32.dll")] public static extern int GetWindowText(IntPtr h, StringBuilder s, int n);
        }
"@
        $sb = New-Object System.Text.StringBuilder 256
        [Fg]::GetWindowText([Fg]::GetForegroundWindow(), $sb, 256) | Out-Null
        $sb.ToString()
    "#;
    run_capture("powershell", &["-NoProfile", "-Command", script])
}

fn run_capture(program: &str, args: &[&str]) -> Result<String> {
    let output = std::process::Command::new(program).args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(anyhow::anyhow!("{} failed: {}", program, stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
