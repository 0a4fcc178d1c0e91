//! Host backends for the target: input injection, screen capture and the
//! UI tree source.
//!
//! Without the `desktop` feature the target runs headless: input is logged
//! rather than injected, and screenshots come from a still image if one was
//! given.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use axpilot_core::executor::{InputBackend, InputError};
use axpilot_core::geometry::{Point, Rectangle, Size};
use axpilot_core::input::{Key, MouseButton};
use axpilot_core::tree::{FixtureTree, NodeKey, TreeError, UiTree};
use axpilot_core::vision::{self, CaptureError, ScreenCapture};
use image::RgbaImage;
use tracing::{info, warn};

/// Logs every primitive instead of touching a real device.
#[derive(Debug, Default)]
pub struct DryRunInput;

impl InputBackend for DryRunInput {
    fn move_pointer(&mut self, to: Point) -> Result<(), InputError> {
        info!(x = to.x, y = to.y, "[dry-run] move pointer");
        Ok(())
    }

    fn click_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
        info!(x = at.x, y = at.y, %button, "[dry-run] click");
        Ok(())
    }

    fn press_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
        info!(x = at.x, y = at.y, %button, "[dry-run] press");
        Ok(())
    }

    fn release_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
        info!(x = at.x, y = at.y, %button, "[dry-run] release");
        Ok(())
    }

    fn press_key_combo(&mut self, keys: &[Key]) -> Result<(), InputError> {
        info!(?keys, "[dry-run] key combo");
        Ok(())
    }

    fn press_key(&mut self, key: Key) -> Result<(), InputError> {
        info!(?key, "[dry-run] key");
        Ok(())
    }

    fn scroll_wheel(&mut self, clicks: i32) -> Result<(), InputError> {
        info!(clicks, "[dry-run] scroll");
        Ok(())
    }
}

/// Capture source used when the target has no screen at all.
#[derive(Debug, Default)]
pub struct NoScreen;

impl ScreenCapture for NoScreen {
    fn capture(&mut self, _region: Option<Rectangle>) -> Result<RgbaImage, CaptureError> {
        Err(CaptureError::Unavailable(
            "no screen configured for this target".to_string(),
        ))
    }
}

/// Serves crops of a fixed screenshot.
pub struct StaticScreen {
    image: RgbaImage,
}

impl StaticScreen {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read screen image {}", path.display()))?;
        let image = vision::decode_image(&bytes)
            .with_context(|| format!("Failed to decode screen image {}", path.display()))?;
        Ok(Self::new(image))
    }
}

impl ScreenCapture for StaticScreen {
    fn capture(&mut self, region: Option<Rectangle>) -> Result<RgbaImage, CaptureError> {
        match region {
            Some(r) => vision::crop(&self.image, r),
            None => Ok(self.image.clone()),
        }
    }
}

/// Fixture tree backed by a JSON file, reloaded when the file changes.
pub struct FileTree {
    path: PathBuf,
    /// Modification time and length seen at the last load.
    modified: Option<(SystemTime, u64)>,
    tree: FixtureTree,
}

impl FileTree {
    pub fn load(path: &Path) -> Result<Self, TreeError> {
        let modified = file_stamp(path);
        let tree = FixtureTree::load(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            modified,
            tree,
        })
    }

    fn reload(&mut self) -> Result<(), TreeError> {
        let json = std::fs::read_to_string(&self.path)?;
        let applications = serde_json::from_str(&json)?;
        self.tree.replace(applications);
        Ok(())
    }
}

/// Coarse mtimes can miss a rewrite within the same tick; the length
/// usually catches it.
fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

impl UiTree for FileTree {
    fn root(&self) -> NodeKey {
        self.tree.root()
    }

    fn application(&self, name: &str) -> Option<NodeKey> {
        self.tree.application(name)
    }

    fn find_child(&self, parent: NodeKey, name: &str, role: Option<&str>) -> Option<NodeKey> {
        self.tree.find_child(parent, name, role)
    }

    fn position(&self, node: NodeKey) -> Option<Point> {
        self.tree.position(node)
    }

    fn size(&self, node: NodeKey) -> Option<Size> {
        self.tree.size(node)
    }

    fn name(&self, node: NodeKey) -> Option<String> {
        self.tree.name(node)
    }

    fn role(&self, node: NodeKey) -> Option<String> {
        self.tree.role(node)
    }

    fn generation(&self) -> u64 {
        self.tree.generation()
    }

    fn refresh(&mut self) -> bool {
        let modified = file_stamp(&self.path);
        if modified == self.modified {
            return false;
        }
        self.modified = modified;
        match self.reload() {
            Ok(()) => {
                info!(path = %self.path.display(), nodes = self.tree.node_count(), "Reloaded UI tree");
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Keeping previous UI tree");
                false
            }
        }
    }
}

#[cfg(feature = "desktop")]
pub use desktop::{DesktopInput, DesktopScreen};

#[cfg(feature = "desktop")]
mod desktop {
    use std::io::Cursor;

    use axpilot_core::executor::{InputBackend, InputError};
    use axpilot_core::geometry::{Point, Rectangle};
    use axpilot_core::input::{Key, MouseButton};
    use axpilot_core::vision::{self, CaptureError, ScreenCapture};
    use enigo::{Axis, Button, Coordinate, Direction, Enigo, Keyboard, Mouse, Settings};
    use image::RgbaImage;
    use screenshots::image::ImageOutputFormat;
    use screenshots::Screen;

    fn failed(e: impl std::fmt::Display) -> InputError {
        InputError::Backend(e.to_string())
    }

    fn to_button(button: MouseButton) -> Button {
        match button {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
            MouseButton::Middle => Button::Middle,
        }
    }

    fn to_enigo_key(key: Key) -> Result<enigo::Key, InputError> {
        let k = match key {
            Key::Char(c) => enigo::Key::Unicode(c),
            Key::Enter => enigo::Key::Return,
            Key::Tab => enigo::Key::Tab,
            Key::Space => enigo::Key::Space,
            Key::Backspace => enigo::Key::Backspace,
            Key::Delete => enigo::Key::Delete,
            Key::Escape => enigo::Key::Escape,
            Key::Home => enigo::Key::Home,
            Key::End => enigo::Key::End,
            Key::PageUp => enigo::Key::PageUp,
            Key::PageDown => enigo::Key::PageDown,
            #[cfg(not(target_os = "macos"))]
            Key::Insert => enigo::Key::Insert,
            #[cfg(target_os = "macos")]
            Key::Insert => return Err(failed("Insert is not available on this platform")),
            Key::Up => enigo::Key::UpArrow,
            Key::Down => enigo::Key::DownArrow,
            Key::Left => enigo::Key::LeftArrow,
            Key::Right => enigo::Key::RightArrow,
            Key::F(1) => enigo::Key::F1,
            Key::F(2) => enigo::Key::F2,
            Key::F(3) => enigo::Key::F3,
            Key::F(4) => enigo::Key::F4,
            Key::F(5) => enigo::Key::F5,
            Key::F(6) => enigo::Key::F6,
            Key::F(7) => enigo::Key::F7,
            Key::F(8) => enigo::Key::F8,
            Key::F(9) => enigo::Key::F9,
            Key::F(10) => enigo::Key::F10,
            Key::F(11) => enigo::Key::F11,
            Key::F(12) => enigo::Key::F12,
            Key::F(n) => return Err(failed(format!("no such function key F{}", n))),
            Key::Control => enigo::Key::Control,
            Key::Alt => enigo::Key::Alt,
            Key::Shift => enigo::Key::Shift,
            Key::Meta => enigo::Key::Meta,
        };
        Ok(k)
    }

    fn coord(v: u32) -> i32 {
        i32::try_from(v).unwrap_or(i32::MAX)
    }

    /// Injects real pointer and keyboard events through enigo.
    ///
    /// A fresh `Enigo` is opened for every primitive so the backend stays
    /// `Send` and survives display reconnects.
    #[derive(Debug, Default)]
    pub struct DesktopInput;

    impl DesktopInput {
        fn enigo() -> Result<Enigo, InputError> {
            Enigo::new(&Settings::default()).map_err(failed)
        }
    }

    impl InputBackend for DesktopInput {
        fn move_pointer(&mut self, to: Point) -> Result<(), InputError> {
            Self::enigo()?
                .move_mouse(coord(to.x), coord(to.y), Coordinate::Abs)
                .map_err(failed)
        }

        fn click_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
            let mut enigo = Self::enigo()?;
            enigo
                .move_mouse(coord(at.x), coord(at.y), Coordinate::Abs)
                .map_err(failed)?;
            enigo.button(to_button(button), Direction::Click).map_err(failed)
        }

        fn press_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
            let mut enigo = Self::enigo()?;
            enigo
                .move_mouse(coord(at.x), coord(at.y), Coordinate::Abs)
                .map_err(failed)?;
            enigo.button(to_button(button), Direction::Press).map_err(failed)
        }

        fn release_pointer(&mut self, at: Point, button: MouseButton) -> Result<(), InputError> {
            let mut enigo = Self::enigo()?;
            enigo
                .move_mouse(coord(at.x), coord(at.y), Coordinate::Abs)
                .map_err(failed)?;
            enigo.button(to_button(button), Direction::Release).map_err(failed)
        }

        fn press_key_combo(&mut self, keys: &[Key]) -> Result<(), InputError> {
            let keys = keys
                .iter()
                .map(|k| to_enigo_key(*k))
                .collect::<Result<Vec<_>, _>>()?;
            let Some((last, held)) = keys.split_last() else {
                return Ok(());
            };
            let mut enigo = Self::enigo()?;
            for k in held {
                enigo.key(*k, Direction::Press).map_err(failed)?;
            }
            let result = enigo.key(*last, Direction::Click).map_err(failed);
            // Release even if the final key failed.
            for k in held.iter().rev() {
                enigo.key(*k, Direction::Release).map_err(failed)?;
            }
            result
        }

        fn press_key(&mut self, key: Key) -> Result<(), InputError> {
            Self::enigo()?
                .key(to_enigo_key(key)?, Direction::Click)
                .map_err(failed)
        }

        fn scroll_wheel(&mut self, clicks: i32) -> Result<(), InputError> {
            // enigo scrolls down for positive lengths.
            Self::enigo()?
                .scroll(-clicks, Axis::Vertical)
                .map_err(failed)
        }
    }

    /// Captures the primary monitor through `screenshots`.
    #[derive(Debug, Default)]
    pub struct DesktopScreen;

    impl DesktopScreen {
        fn primary() -> Result<Screen, CaptureError> {
            let mut screens = Screen::all().map_err(|e| CaptureError::Failed(e.to_string()))?;
            if screens.is_empty() {
                return Err(CaptureError::Unavailable("no monitor found".to_string()));
            }
            let index = screens
                .iter()
                .position(|s| s.display_info.is_primary)
                .unwrap_or(0);
            Ok(screens.swap_remove(index))
        }
    }

    impl ScreenCapture for DesktopScreen {
        fn capture(&mut self, region: Option<Rectangle>) -> Result<RgbaImage, CaptureError> {
            let screen = Self::primary()?;
            let shot = match region {
                Some(r) => screen.capture_area(
                    i32::try_from(r.x).unwrap_or(i32::MAX),
                    i32::try_from(r.y).unwrap_or(i32::MAX),
                    r.width,
                    r.height,
                ),
                None => screen.capture(),
            }
            .map_err(|e| CaptureError::Failed(e.to_string()))?;

            // Round-trip through PNG: screenshots bundles its own image version.
            let mut buffer = Cursor::new(Vec::new());
            shot.write_to(&mut buffer, ImageOutputFormat::Png)
                .map_err(|e| CaptureError::Failed(e.to_string()))?;
            vision::decode_image(&buffer.into_inner())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axpilot_core::tree::NodeSpec;
    use image::Rgba;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "axpilot-host-{}-{}-{}",
            name,
            std::process::id(),
            uuid::Uuid::new_v4()
        ))
    }

    fn write_tree(path: &Path, apps: &[NodeSpec]) {
        std::fs::write(path, serde_json::to_string(apps).unwrap()).unwrap();
    }

    #[test]
    fn test_dry_run_accepts_everything() {
        let mut input = DryRunInput;
        assert!(input.move_pointer(Point::new(1, 2)).is_ok());
        assert!(input.press_key_combo(&[Key::Control, Key::Char('s')]).is_ok());
        assert!(input.scroll_wheel(-3).is_ok());
    }

    #[test]
    fn test_no_screen_is_unavailable() {
        assert!(matches!(
            NoScreen.capture(None),
            Err(CaptureError::Unavailable(_))
        ));
    }

    #[test]
    fn test_static_screen_crops() {
        let path = temp_path("screen.png");
        let image = RgbaImage::from_pixel(20, 10, Rgba([1, 2, 3, 255]));
        std::fs::write(&path, vision::encode_png(&image).unwrap()).unwrap();

        let mut screen = StaticScreen::load(&path).unwrap();
        assert_eq!(screen.capture(None).unwrap().dimensions(), (20, 10));
        let crop = screen.capture(Some(Rectangle::new(5, 5, 4, 4))).unwrap();
        assert_eq!(crop.dimensions(), (4, 4));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_static_screen_rejects_garbage() {
        let path = temp_path("bad.png");
        std::fs::write(&path, b"nope").unwrap();
        assert!(StaticScreen::load(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_file_tree_reloads_on_change() {
        let path = temp_path("tree.json");
        write_tree(&path, &[NodeSpec::new("calc", "application", [0, 0, 100, 100])]);
        let mut tree = FileTree::load(&path).unwrap();
        assert!(!tree.refresh());
        assert!(tree.application("calc").is_some());

        write_tree(&path, &[NodeSpec::new("gedit", "application", [0, 0, 100, 100])]);
        // Force a distinct mtime regardless of filesystem timestamp granularity.
        tree.modified = None;

        assert!(tree.refresh());
        assert_eq!(tree.generation(), 1);
        assert!(tree.application("gedit").is_some());
        assert!(tree.application("calc").is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_file_tree_keeps_old_tree_on_bad_reload() {
        let path = temp_path("tree-bad.json");
        write_tree(&path, &[NodeSpec::new("calc", "application", [0, 0, 1, 1])]);
        let mut tree = FileTree::load(&path).unwrap();

        std::fs::write(&path, "[{").unwrap();
        tree.modified = None;

        assert!(!tree.refresh());
        assert!(tree.application("calc").is_some());
        assert_eq!(tree.generation(), 0);

        let _ = std::fs::remove_file(&path);
    }
}
