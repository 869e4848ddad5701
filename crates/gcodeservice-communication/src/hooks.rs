//! Command hooks
//!
//! Recognise outgoing lines that represent a machine action worth
//! publishing as a `gcode_action:<kind>` event.

use gcodeservice_core::{ActionKind, GcodeAction};

/// Map a command code to its action category
pub fn action_kind(code: &str) -> Option<ActionKind> {
    match code {
        // Unconditional stop, spindle, laser
        "M0" | "M1" | "M3" | "M4" | "M6" => Some(ActionKind::Milling),
        "M104" | "M109" | "M140" | "M190" => Some(ActionKind::Heating),
        "M106" | "M107" => Some(ActionKind::Cooling),
        // Speed and flow factors
        "M220" | "M221" => Some(ActionKind::Printing),
        // Camera, scanning laser, probing
        "M240" | "M700" | "M401" | "M402" => Some(ActionKind::Scanning),
        "M117" => Some(ActionKind::Message),
        _ => None,
    }
}

/// Inspect an outgoing line and build the action it represents, if any
pub fn process_command(line: &str) -> Option<GcodeAction> {
    let line = line.trim();
    let code = line.split_whitespace().next()?.to_ascii_uppercase();
    let kind = action_kind(&code)?;

    let (value, message) = match kind {
        ActionKind::Message => {
            let text = line[code.len()..].trim();
            (None, Some(text.to_string()))
        }
        _ => (s_value(line), None),
    };

    Some(GcodeAction {
        kind,
        code,
        value,
        message,
    })
}

/// The `S` word of a line, e.g. `210` for `M109 S210`
fn s_value(line: &str) -> Option<f64> {
    line.split_whitespace()
        .skip(1)
        .find_map(|word| word.strip_prefix('S').or_else(|| word.strip_prefix('s')))
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heating_with_value() {
        let action = process_command("M109 S210").expect("heating action");
        assert_eq!(action.kind, ActionKind::Heating);
        assert_eq!(action.code, "M109");
        assert_eq!(action.value, Some(210.0));
        assert_eq!(action.message, None);
    }

    #[test]
    fn test_value_absent_or_not_first_word() {
        let action = process_command("M107").expect("cooling action");
        assert_eq!(action.kind, ActionKind::Cooling);
        assert_eq!(action.value, None);

        let action = process_command("M106 P0 S255").expect("cooling action");
        assert_eq!(action.value, Some(255.0));
    }

    #[test]
    fn test_message() {
        let action = process_command("M117 Printing layer 3").expect("message action");
        assert_eq!(action.kind, ActionKind::Message);
        assert_eq!(action.message.as_deref(), Some("Printing layer 3"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(action_kind("M3"), Some(ActionKind::Milling));
        assert_eq!(action_kind("M221"), Some(ActionKind::Printing));
        assert_eq!(action_kind("M700"), Some(ActionKind::Scanning));
        assert_eq!(action_kind("G1"), None);
    }

    #[test]
    fn test_non_action_lines() {
        assert!(process_command("G1 X10 Y10").is_none());
        assert!(process_command("").is_none());
        assert!(process_command("M105").is_none());
    }
}
