//! Key and pointer-button names shared by the compiler, the executor and the
//! host input backends.
//!
//! Key names are case-insensitive. Any single character is a key on its own;
//! longer strings must be one of the named keys below.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A key the host input backend can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    Space,
    Backspace,
    Delete,
    Escape,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Up,
    Down,
    Left,
    Right,
    /// Function keys F1 through F12.
    F(u8),
    Control,
    Alt,
    Shift,
    Meta,
}

impl Key {
    pub fn is_modifier(&self) -> bool {
        matches!(self, Key::Control | Key::Alt | Key::Shift | Key::Meta)
    }
}

/// Error for a key name that maps to no key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key: {0:?}")]
pub struct InvalidKey(pub String);

/// Parse a key name such as `"a"`, `"Delete"` or `"ctrl"`.
pub fn parse_key(name: &str) -> Result<Key, InvalidKey> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(match c {
            '\n' | '\r' => Key::Enter,
            '\t' => Key::Tab,
            ' ' => Key::Space,
            c => Key::Char(c),
        });
    }

    let lower = name.trim().to_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Enter,
        "tab" => Key::Tab,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "escape" | "esc" => Key::Escape,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "pgup" => Key::PageUp,
        "pagedown" | "pgdn" => Key::PageDown,
        "insert" | "ins" => Key::Insert,
        "up" => Key::Up,
        "down" => Key::Down,
        "left" => Key::Left,
        "right" => Key::Right,
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        "shift" => Key::Shift,
        "meta" | "super" | "win" | "cmd" => Key::Meta,
        other => match other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
            Some(n @ 1..=12) => Key::F(n),
            _ => return Err(InvalidKey(name.to_string())),
        },
    };
    Ok(key)
}

/// Parse every key of a combo, failing on the first invalid name.
pub fn parse_combo<S: AsRef<str>>(keys: &[S]) -> Result<Vec<Key>, InvalidKey> {
    keys.iter().map(|k| parse_key(k.as_ref())).collect()
}

/// Pointer button for click, press and release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MouseButton::Left => write!(f, "left"),
            MouseButton::Right => write!(f, "right"),
            MouseButton::Middle => write!(f, "middle"),
        }
    }
}

impl FromStr for MouseButton {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(format!("unknown mouse button: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_characters_are_keys() {
        assert_eq!(parse_key("a"), Ok(Key::Char('a')));
        assert_eq!(parse_key("A"), Ok(Key::Char('A')));
        assert_eq!(parse_key("7"), Ok(Key::Char('7')));
        assert_eq!(parse_key("+"), Ok(Key::Char('+')));
        assert_eq!(parse_key("é"), Ok(Key::Char('é')));
    }

    #[test]
    fn test_whitespace_characters_map_to_named_keys() {
        assert_eq!(parse_key(" "), Ok(Key::Space));
        assert_eq!(parse_key("\n"), Ok(Key::Enter));
        assert_eq!(parse_key("\t"), Ok(Key::Tab));
    }

    #[test]
    fn test_named_keys_case_insensitive() {
        assert_eq!(parse_key("Delete"), Ok(Key::Delete));
        assert_eq!(parse_key("DEL"), Ok(Key::Delete));
        assert_eq!(parse_key("Return"), Ok(Key::Enter));
        assert_eq!(parse_key("esc"), Ok(Key::Escape));
        assert_eq!(parse_key("PageDown"), Ok(Key::PageDown));
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(parse_key("F1"), Ok(Key::F(1)));
        assert_eq!(parse_key("f12"), Ok(Key::F(12)));
        assert!(parse_key("F13").is_err());
        assert!(parse_key("F0").is_err());
    }

    #[test]
    fn test_modifiers() {
        assert_eq!(parse_key("Ctrl"), Ok(Key::Control));
        assert_eq!(parse_key("control"), Ok(Key::Control));
        assert_eq!(parse_key("Win"), Ok(Key::Meta));
        assert!(Key::Shift.is_modifier());
        assert!(!Key::Char('a').is_modifier());
    }

    #[test]
    fn test_unknown_key_name() {
        let err = parse_key("hyperdrive").unwrap_err();
        assert!(err.to_string().contains("invalid key"));
        assert!(parse_key("").is_err());
    }

    #[test]
    fn test_parse_combo() {
        assert_eq!(
            parse_combo(&["ctrl", "a"]),
            Ok(vec![Key::Control, Key::Char('a')])
        );
        assert!(parse_combo(&["ctrl", "bogus"]).is_err());
    }

    #[test]
    fn test_mouse_button_serde_and_parse() {
        assert_eq!(serde_json::to_string(&MouseButton::Right).unwrap(), "\"right\"");
        let b: MouseButton = serde_json::from_str("\"middle\"").unwrap();
        assert_eq!(b, MouseButton::Middle);
        assert_eq!("LEFT".parse::<MouseButton>(), Ok(MouseButton::Left));
        assert!("side".parse::<MouseButton>().is_err());
        assert_eq!(MouseButton::default(), MouseButton::Left);
    }
}
