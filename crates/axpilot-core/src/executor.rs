//! Command Executor: applies a primitive batch to the host input backend.
//!
//! Primitives run strictly in order. A primitive that fails, including one
//! whose backend call panics, is recorded as a failure and execution moves
//! on to the next one. The settle delay follows every primitive.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::command::{Action, BatchOutcome, CommandResult, PrimitiveCommand};
use crate::geometry::Point;
use crate::input::{parse_combo, parse_key, InvalidKey, Key, MouseButton};

/// Default delay after each primitive.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum InputError {
    #[error(transparent)]
    InvalidKey(#[from] InvalidKey),

    #[error("input backend failed: {0}")]
    Backend(String),
}

/// Host input simulation.
pub trait InputBackend {
    fn move_pointer(&mut self, to: Point) -> Result<(), InputError>;

    fn click_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError>;

    fn press_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError>;

    fn release_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError>;

    /// Hold every key in order, then release them in reverse.
    fn press_key_combo(&mut self, keys: &[Key]) -> Result<(), InputError>;

    fn press_key(&mut self, key: Key) -> Result<(), InputError>;

    fn scroll_wheel(&mut self, clicks: i32) -> Result<(), InputError>;
}

/// Run every primitive of `commands` against `backend`.
pub fn execute(
    commands: &[PrimitiveCommand],
    backend: &mut dyn InputBackend,
    settle: Duration,
) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        results: Vec::with_capacity(commands.len()),
    };

    for (index, command) in commands.iter().enumerate() {
        let result = match apply(command, backend) {
            Ok(()) => {
                debug!(index, action = %command.action, "Primitive succeeded");
                CommandResult::ok(&command.action)
            }
            Err(error) => {
                warn!(index, action = %command.action, %error, "Primitive failed");
                CommandResult::failed(&command.action, error)
            }
        };
        outcome.results.push(result);

        if !settle.is_zero() {
            thread::sleep(settle);
        }
    }

    outcome
}

fn apply(command: &PrimitiveCommand, backend: &mut dyn InputBackend) -> Result<(), String> {
    let action = command.decode().map_err(|e| e.to_string())?;
    let run = AssertUnwindSafe(|| dispatch(&action, backend));
    match panic::catch_unwind(run) {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn dispatch(action: &Action, backend: &mut dyn InputBackend) -> Result<(), InputError> {
    match action {
        Action::MouseMove { x, y } => backend.move_pointer(Point::new(*x, *y)),
        Action::MouseClick { x, y, button } => backend.click_pointer(Point::new(*x, *y), *button),
        Action::MousePress { x, y, button } => backend.press_pointer(Point::new(*x, *y), *button),
        Action::MouseRelease { x, y, button } => {
            backend.release_pointer(Point::new(*x, *y), *button)
        }
        Action::Hotkey { keys } => backend.press_key_combo(&parse_combo(keys)?),
        Action::KeyPress { key } => backend.press_key(parse_key(key)?),
        Action::MouseScroll { clicks } => backend.scroll_wheel(*clicks),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("input backend panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("input backend panicked: {}", s)
    } else {
        "input backend panicked".to_string()
    }
}

/// A host input event as seen by [`RecordingInput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Move(Point),
    Click(Point, MouseButton),
    Press(Point, MouseButton),
    Release(Point, MouseButton),
    Combo(Vec<Key>),
    Key(Key),
    Scroll(i32),
}

/// Backend that records events instead of driving a real device.
///
/// Clones share the same event log.
#[derive(Debug, Clone, Default)]
pub struct RecordingInput {
    events: Arc<Mutex<Vec<InputEvent>>>,
}

impl RecordingInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn record(&self, event: InputEvent) -> Result<(), InputError> {
        self.events
            .lock()
            .map_err(|_| InputError::Backend("event log poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

impl InputBackend for RecordingInput {
    fn move_pointer(&mut self, to: Point) -> Result<(), InputError> {
        self.record(InputEvent::Move(to))
    }

    fn click_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
        self.record(InputEvent::Click(at, button))
    }

    fn press_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
        self.record(InputEvent::Press(at, button))
    }

    fn release_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
        self.record(InputEvent::Release(at, button))
    }

    fn press_key_combo(&mut self, keys: &[Key]) -> Result<(), InputError> {
        self.record(InputEvent::Combo(keys.to_vec()))
    }

    fn press_key(&mut self, key: Key) -> Result<(), InputError> {
        self.record(InputEvent::Key(key))
    }

    fn scroll_wheel(&mut self, clicks: i32) -> Result<(), InputError> {
        self.record(InputEvent::Scroll(clicks))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use serde_json::json;

    use super::*;
    use crate::compiler;
    use crate::geometry::Rectangle;

    /// Fails or panics on scroll, delegating everything else.
    struct FaultyInput {
        inner: RecordingInput,
        panic_on_scroll: bool,
    }

    impl InputBackend for FaultyInput {
        fn move_pointer(&mut self, to: Point) -> Result<(), InputError> {
            self.inner.move_pointer(to)
        }
        fn click_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
            self.inner.click_pointer(at, button)
        }
        fn press_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
            self.inner.press_pointer(at, button)
        }
        fn release_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
            self.inner.release_pointer(at, button)
        }
        fn press_key_combo(&mut self, keys: &[Key]) -> Result<(), InputError> {
            self.inner.press_key_combo(keys)
        }
        fn press_key(&mut self, key: Key) -> Result<(), InputError> {
            self.inner.press_key(key)
        }
        fn scroll_wheel(&mut self, _clicks: i32) -> Result<(), InputError> {
            if self.panic_on_scroll {
                panic!("wheel device vanished");
            }
            Err(InputError::Backend("no wheel".to_string()))
        }
    }

    #[test]
    fn test_partial_failure_continues() {
        let mut backend = RecordingInput::new();
        let commands = vec![
            PrimitiveCommand::new(Action::MouseMove { x: 1, y: 1 }),
            PrimitiveCommand::raw("bogus", json!({})),
            PrimitiveCommand::new(Action::MouseClick {
                x: 1,
                y: 1,
                button: MouseButton::Left,
            }),
        ];

        let outcome = execute(&commands, &mut backend, Duration::ZERO);

        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results[0].success);
        assert!(!outcome.results[1].success);
        assert!(outcome.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("unknown action"));
        assert!(outcome.results[2].success);
        assert!(!outcome.success());
        assert_eq!(
            backend.events(),
            vec![
                InputEvent::Move(Point::new(1, 1)),
                InputEvent::Click(Point::new(1, 1), MouseButton::Left)
            ]
        );
    }

    #[test]
    fn test_all_success_aggregate() {
        let mut backend = RecordingInput::new();
        let batch = compiler::set_text(&Rectangle::new(0, 0, 10, 10), "ok");
        let outcome = execute(&batch.commands, &mut backend, Duration::ZERO);
        assert!(outcome.success());
        assert_eq!(
            backend.events(),
            vec![
                InputEvent::Move(Point::new(5, 5)),
                InputEvent::Click(Point::new(5, 5), MouseButton::Left),
                InputEvent::Combo(vec![Key::Control, Key::Char('a')]),
                InputEvent::Key(Key::Delete),
                InputEvent::Key(Key::Char('o')),
                InputEvent::Key(Key::Char('k')),
            ]
        );
    }

    #[test]
    fn test_invalid_key_fails_only_that_primitive() {
        let mut backend = RecordingInput::new();
        let commands = vec![
            PrimitiveCommand::new(Action::KeyPress { key: "warp".into() }),
            PrimitiveCommand::new(Action::KeyPress { key: "Escape".into() }),
        ];
        let outcome = execute(&commands, &mut backend, Duration::ZERO);
        assert!(outcome.results[0].error.as_deref().unwrap().contains("invalid key"));
        assert!(outcome.results[1].success);
        assert_eq!(backend.events(), vec![InputEvent::Key(Key::Escape)]);
    }

    #[test]
    fn test_backend_error_and_panic_are_caught() {
        for panic_on_scroll in [false, true] {
            let mut backend = FaultyInput {
                inner: RecordingInput::new(),
                panic_on_scroll,
            };
            let batch = compiler::drag(Point::new(0, 0), Point::new(9, 9));
            let mut commands = batch.commands.clone();
            commands.insert(2, PrimitiveCommand::new(Action::MouseScroll { clicks: 1 }));

            let outcome = execute(&commands, &mut backend, Duration::ZERO);

            assert_eq!(outcome.failed_count(), 1);
            assert!(!outcome.results[2].success);
            // The release after the failure still fires.
            assert_eq!(
                backend.inner.events().last(),
                Some(&InputEvent::Release(Point::new(9, 9), MouseButton::Left))
            );
            if panic_on_scroll {
                assert!(outcome.results[2]
                    .error
                    .as_deref()
                    .unwrap()
                    .contains("wheel device vanished"));
            }
        }
    }

    #[test]
    fn test_settle_delay_follows_every_primitive() {
        let mut backend = RecordingInput::new();
        let commands = vec![
            PrimitiveCommand::new(Action::MouseScroll { clicks: 1 }),
            PrimitiveCommand::raw("bogus", json!(null)),
        ];
        let start = Instant::now();
        execute(&commands, &mut backend, Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_empty_batch_succeeds() {
        let mut backend = RecordingInput::new();
        let outcome = execute(&[], &mut backend, Duration::ZERO);
        assert!(outcome.success());
        assert!(outcome.results.is_empty());
    }
}
