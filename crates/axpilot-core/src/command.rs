//! Primitive device commands and their per-command results.
//!
//! On the wire a primitive is `{"action": str, "params": {...}, "timestamp": f64}`.
//! The action stays an open string so a target can report an unknown action
//! as a per-command failure instead of rejecting the whole batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::input::MouseButton;

/// Seconds since the Unix epoch, with microsecond precision.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A decoded primitive action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum Action {
    MouseMove {
        x: u32,
        y: u32,
    },
    MouseClick {
        x: u32,
        y: u32,
        #[serde(default)]
        button: MouseButton,
    },
    MousePress {
        x: u32,
        y: u32,
        #[serde(default)]
        button: MouseButton,
    },
    MouseRelease {
        x: u32,
        y: u32,
        #[serde(default)]
        button: MouseButton,
    },
    Hotkey {
        keys: Vec<String>,
    },
    KeyPress {
        key: String,
    },
    /// Positive scrolls up/away, negative down/toward the user.
    MouseScroll {
        clicks: i32,
    },
}

impl Action {
    pub const NAMES: [&'static str; 7] = [
        "mouse_move",
        "mouse_click",
        "mouse_press",
        "mouse_release",
        "hotkey",
        "key_press",
        "mouse_scroll",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::MouseMove { .. } => "mouse_move",
            Action::MouseClick { .. } => "mouse_click",
            Action::MousePress { .. } => "mouse_press",
            Action::MouseRelease { .. } => "mouse_release",
            Action::Hotkey { .. } => "hotkey",
            Action::KeyPress { .. } => "key_press",
            Action::MouseScroll { .. } => "mouse_scroll",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid params for {action}: {reason}")]
    InvalidParams { action: String, reason: String },
}

/// One primitive as carried in an `execute_batch` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveCommand {
    pub action: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub timestamp: f64,
}

impl PrimitiveCommand {
    /// Stamp an action with the current time.
    pub fn new(action: Action) -> Self {
        Self::with_timestamp(action, now_timestamp())
    }

    pub fn with_timestamp(action: Action, timestamp: f64) -> Self {
        let name = action.name().to_string();
        let params = match serde_json::to_value(&action) {
            Ok(Value::Object(mut map)) => map.remove("params").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Self {
            action: name,
            params,
            timestamp,
        }
    }

    /// A primitive with an arbitrary action name, as a remote peer may send.
    pub fn raw(action: &str, params: Value) -> Self {
        Self {
            action: action.to_string(),
            params,
            timestamp: now_timestamp(),
        }
    }

    pub fn decode(&self) -> Result<Action, CommandError> {
        if !Action::NAMES.contains(&self.action.as_str()) {
            return Err(CommandError::UnknownAction(self.action.clone()));
        }
        let tagged = serde_json::json!({
            "action": self.action,
            "params": self.params,
        });
        serde_json::from_value(tagged).map_err(|e| CommandError::InvalidParams {
            action: self.action.clone(),
            reason: e.to_string(),
        })
    }
}

/// The primitives compiled from one semantic operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBatch {
    /// Semantic operation that produced the batch, e.g. `"click"`.
    pub operation: String,
    pub commands: Vec<PrimitiveCommand>,
}

impl CommandBatch {
    pub fn new(operation: &str, actions: Vec<Action>) -> Self {
        Self {
            operation: operation.to_string(),
            commands: actions.into_iter().map(PrimitiveCommand::new).collect(),
        }
    }

    /// Decoded actions, skipping any that fail to decode.
    pub fn actions(&self) -> Vec<Action> {
        self.commands.iter().filter_map(|c| c.decode().ok()).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Outcome of one primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub action: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(action: &str) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            error: None,
        }
    }

    pub fn failed(action: &str, error: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Per-command results of a batch, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<CommandResult>,
}

impl BatchOutcome {
    /// Logical AND of every per-command result.
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_form_of_click() {
        let cmd = PrimitiveCommand::with_timestamp(
            Action::MouseClick {
                x: 5,
                y: 6,
                button: MouseButton::Right,
            },
            1.5,
        );
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "mouse_click",
                "params": {"x": 5, "y": 6, "button": "right"},
                "timestamp": 1.5
            })
        );
    }

    #[test]
    fn test_decode_every_action() {
        let actions = vec![
            Action::MouseMove { x: 1, y: 2 },
            Action::MouseClick {
                x: 1,
                y: 2,
                button: MouseButton::Left,
            },
            Action::MousePress {
                x: 1,
                y: 2,
                button: MouseButton::Left,
            },
            Action::MouseRelease {
                x: 1,
                y: 2,
                button: MouseButton::Middle,
            },
            Action::Hotkey {
                keys: vec!["ctrl".into(), "a".into()],
            },
            Action::KeyPress { key: "Delete".into() },
            Action::MouseScroll { clicks: -3 },
        ];
        for action in actions {
            let cmd = PrimitiveCommand::new(action.clone());
            assert_eq!(cmd.action, action.name());
            assert_eq!(cmd.decode(), Ok(action));
        }
    }

    #[test]
    fn test_button_defaults_to_left() {
        let cmd = PrimitiveCommand::raw("mouse_click", json!({"x": 3, "y": 4}));
        assert_eq!(
            cmd.decode(),
            Ok(Action::MouseClick {
                x: 3,
                y: 4,
                button: MouseButton::Left
            })
        );
    }

    #[test]
    fn test_unknown_action() {
        let cmd = PrimitiveCommand::raw("teleport", json!({}));
        let err = cmd.decode().unwrap_err();
        assert_eq!(err, CommandError::UnknownAction("teleport".into()));
        assert!(err.to_string().starts_with("unknown action"));
    }

    #[test]
    fn test_invalid_params() {
        let cmd = PrimitiveCommand::raw("mouse_move", json!({"x": "left"}));
        assert!(matches!(
            cmd.decode(),
            Err(CommandError::InvalidParams { .. })
        ));
    }

    #[test]
    fn test_timestamp_is_recent() {
        let cmd = PrimitiveCommand::new(Action::MouseScroll { clicks: 1 });
        // After 2020-01-01.
        assert!(cmd.timestamp > 1_577_836_800.0);
    }

    #[test]
    fn test_outcome_aggregate() {
        let mut outcome = BatchOutcome {
            results: vec![CommandResult::ok("mouse_move"), CommandResult::ok("mouse_click")],
        };
        assert!(outcome.success());
        outcome
            .results
            .push(CommandResult::failed("hotkey", "invalid key: \"hyper\""));
        assert!(!outcome.success());
        assert_eq!(outcome.failed_count(), 1);

        let json = serde_json::to_value(&outcome.results[0]).unwrap();
        assert!(json.get("error").is_none());
    }
}
