//! Command Compiler: expands semantic operations into primitive batches.
//!
//! Every function here is pure. Element rectangles are resolved by the
//! caller; the compiler only decides which primitives to emit and where.

use crate::command::{Action, CommandBatch};
use crate::geometry::{Point, Rectangle};
use crate::input::MouseButton;
use crate::path::ElementPath;

/// Role constraint applied to the item segment of a combo-box selection.
pub const COMBO_ITEM_ROLE: &str = "menu item";

/// Keys sent to select all text in a focused field.
pub const SELECT_ALL: [&str; 2] = ["ctrl", "a"];

fn move_to_point(p: Point) -> Action {
    Action::MouseMove { x: p.x, y: p.y }
}

fn click_at(p: Point, button: MouseButton) -> Action {
    Action::MouseClick {
        x: p.x,
        y: p.y,
        button,
    }
}

fn type_chars(text: &str) -> impl Iterator<Item = Action> + '_ {
    text.chars().map(|c| Action::KeyPress { key: c.to_string() })
}

/// Move to the center of `rect` and left-click.
pub fn click(rect: &Rectangle) -> CommandBatch {
    let c = rect.center();
    CommandBatch::new("click", vec![move_to_point(c), click_at(c, MouseButton::Left)])
}

/// Two left clicks at the center of `rect`, in one batch.
pub fn double_click(rect: &Rectangle) -> CommandBatch {
    let c = rect.center();
    CommandBatch::new(
        "double_click",
        vec![
            move_to_point(c),
            click_at(c, MouseButton::Left),
            click_at(c, MouseButton::Left),
        ],
    )
}

pub fn right_click(rect: &Rectangle) -> CommandBatch {
    let c = rect.center();
    CommandBatch::new(
        "right_click",
        vec![move_to_point(c), click_at(c, MouseButton::Right)],
    )
}

/// Replace the contents of a text field.
///
/// Focuses the field, selects everything, deletes it, then types `text` one
/// key per character.
pub fn set_text(rect: &Rectangle, text: &str) -> CommandBatch {
    let c = rect.center();
    let mut actions = vec![
        move_to_point(c),
        click_at(c, MouseButton::Left),
        Action::Hotkey {
            keys: SELECT_ALL.iter().map(|k| k.to_string()).collect(),
        },
        Action::KeyPress {
            key: "Delete".to_string(),
        },
    ];
    actions.extend(type_chars(text));
    CommandBatch::new("set_text", actions)
}

/// Type `text`, optionally focusing an element first. Existing text is kept.
pub fn input_text(rect: Option<&Rectangle>, text: &str) -> CommandBatch {
    let mut actions = Vec::with_capacity(text.len() + 2);
    if let Some(rect) = rect {
        let c = rect.center();
        actions.push(move_to_point(c));
        actions.push(click_at(c, MouseButton::Left));
    }
    actions.extend(type_chars(text));
    CommandBatch::new("input_text", actions)
}

/// Path of a combo-box item: the item name appended under the combo with
/// the menu-item role.
pub fn combo_item_path(combo: &ElementPath, item: &str) -> ElementPath {
    combo.child(item, Some(COMBO_ITEM_ROLE))
}

/// Open a combo box and click one of its items.
pub fn select_combo_item(combo: &Rectangle, item: &Rectangle) -> CommandBatch {
    let (a, b) = (combo.center(), item.center());
    CommandBatch::new(
        "select_combo_item",
        vec![
            move_to_point(a),
            click_at(a, MouseButton::Left),
            move_to_point(b),
            click_at(b, MouseButton::Left),
        ],
    )
}

/// Press at `start`, move to `end` and release there.
pub fn drag(start: Point, end: Point) -> CommandBatch {
    drag_named("drag", start, end)
}

/// Drag from one element's center to another's.
pub fn drag_between(from: &Rectangle, to: &Rectangle) -> CommandBatch {
    drag_named("drag_item", from.center(), to.center())
}

/// Drag between two fractional points of a reference rectangle.
pub fn drag_by_percentage(reference: &Rectangle, start: (f64, f64), end: (f64, f64)) -> CommandBatch {
    drag_named(
        "drag_by_percentage",
        reference.point_at(start.0, start.1),
        reference.point_at(end.0, end.1),
    )
}

fn drag_named(operation: &str, start: Point, end: Point) -> CommandBatch {
    let button = MouseButton::Left;
    CommandBatch::new(
        operation,
        vec![
            move_to_point(start),
            Action::MousePress {
                x: start.x,
                y: start.y,
                button,
            },
            move_to_point(end),
            Action::MouseRelease {
                x: end.x,
                y: end.y,
                button,
            },
        ],
    )
}

pub fn hotkey<S: AsRef<str>>(keys: &[S]) -> CommandBatch {
    CommandBatch::new(
        "hotkey",
        vec![Action::Hotkey {
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
        }],
    )
}

/// Positive `clicks` scroll up, negative scroll down.
pub fn scroll(clicks: i32) -> CommandBatch {
    CommandBatch::new("scroll", vec![Action::MouseScroll { clicks }])
}

pub fn move_to(point: Point) -> CommandBatch {
    CommandBatch::new("move_to", vec![move_to_point(point)])
}
