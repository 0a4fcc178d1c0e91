//! Target-side session state.
//!
//! A [`Session`] owns the UI tree, the bound application, the resolution
//! cache and the host backends. Every request is handled through an
//! explicit `&mut Session`; there is no process-global state.

use std::time::Duration;

use tracing::{debug, info};

use crate::cache::{ResolutionCache, DEFAULT_CACHE_CAPACITY};
use crate::command::{BatchOutcome, PrimitiveCommand};
use crate::error::ApiError;
use crate::executor::{self, InputBackend, DEFAULT_SETTLE};
use crate::geometry::Rectangle;
use crate::locator::{self, ElementCache, ResolvedElement};
use crate::path::ElementPath;
use crate::protocol::{Command, Request, Response, ResponseData, MAX_FRAME_SIZE};
use crate::tree::{NodeKey, UiTree};
use crate::vision::{self, ScreenCapture};

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub cache_capacity: usize,
    /// Delay after each executed primitive.
    pub settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            settle: DEFAULT_SETTLE,
        }
    }
}

/// Room left in a screenshot response for everything but the hex payload.
const SCREENSHOT_ENVELOPE: usize = 256;

/// Fail early when a PNG of `png_len` bytes would not fit in one response
/// frame once hex-encoded.
fn check_screenshot_fits(png_len: usize) -> Result<(), ApiError> {
    let framed = png_len.saturating_mul(2).saturating_add(SCREENSHOT_ENVELOPE);
    if framed > MAX_FRAME_SIZE {
        return Err(ApiError::frame_too_large(framed, MAX_FRAME_SIZE));
    }
    Ok(())
}

/// A PNG screenshot ready for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub png: Vec<u8>,
}

impl Screenshot {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.png)
    }
}

pub struct Session {
    tree: Box<dyn UiTree + Send>,
    /// Name of the bound application; `None` means the whole desktop.
    application: Option<String>,
    cache: ElementCache,
    input: Box<dyn InputBackend + Send>,
    screen: Box<dyn ScreenCapture + Send>,
    settle: Duration,
}

impl Session {
    pub fn new(
        tree: Box<dyn UiTree + Send>,
        input: Box<dyn InputBackend + Send>,
        screen: Box<dyn ScreenCapture + Send>,
        config: SessionConfig,
    ) -> Self {
        Self {
            tree,
            application: None,
            cache: ResolutionCache::new(config.cache_capacity),
            input,
            screen,
            settle: config.settle,
        }
    }

    /// Bind paths to the named application instead of the desktop root.
    pub fn bind_application(&mut self, name: &str) -> Result<(), ApiError> {
        self.tree
            .application(name)
            .ok_or_else(|| ApiError::application_not_found(name))?;
        info!(application = name, "Bound application");
        self.application = Some(name.to_string());
        self.cache.clear();
        Ok(())
    }

    pub fn application(&self) -> Option<&str> {
        self.application.as_deref()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        debug!(entries = self.cache.len(), "Clearing resolution cache");
        self.cache.clear();
    }

    fn root(&self) -> Result<NodeKey, ApiError> {
        match &self.application {
            Some(name) => self
                .tree
                .application(name)
                .ok_or_else(|| ApiError::application_not_found(name)),
            None => Ok(self.tree.root()),
        }
    }

    pub fn resolve(&mut self, path: &ElementPath) -> Result<ResolvedElement, ApiError> {
        if self.tree.refresh() {
            info!(generation = self.tree.generation(), "UI tree changed");
        }
        let root = self.root()?;
        locator::resolve(self.tree.as_ref(), root, &mut self.cache, path).map_err(ApiError::from)
    }

    /// Rectangle of the bound application.
    pub fn app_region(&mut self) -> Result<Rectangle, ApiError> {
        self.tree.refresh();
        let name = self.application.as_deref().ok_or_else(ApiError::no_application)?;
        let app = self
            .tree
            .application(name)
            .ok_or_else(|| ApiError::application_not_found(name))?;
        match (self.tree.position(app), self.tree.size(app)) {
            (Some(position), Some(size)) => Ok(Rectangle::from_parts(position, size)),
            _ => Err(ApiError::internal(format!(
                "Application '{}' reported no geometry",
                name
            ))),
        }
    }

    pub fn screenshot(&mut self, region: Option<Rectangle>) -> Result<Screenshot, ApiError> {
        if let Some(r) = region.filter(Rectangle::is_empty) {
            return Err(ApiError::invalid_input_with_suggestion(
                format!("Screenshot region {:?} has zero area", r.to_array()),
                "Pass a region with non-zero width and height, or omit it for the whole screen",
            ));
        }
        let image = self.screen.capture(region)?;
        let png = vision::encode_png(&image)?;
        check_screenshot_fits(png.len())?;
        Ok(Screenshot { png })
    }

    pub fn execute(&mut self, commands: &[PrimitiveCommand]) -> BatchOutcome {
        executor::execute(commands, self.input.as_mut(), self.settle)
    }

    /// Handle one request. `Disconnect` clears the cache; closing the
    /// connection is up to the caller.
    pub fn handle(&mut self, request: Request) -> Response {
        match request.command {
            Command::ResolveElement {
                path,
                role_constraints,
            } => {
                let path = ElementPath::parse(&path, &role_constraints);
                match self.resolve(&path) {
                    Ok(found) => Response::success(ResponseData::Element {
                        position: found.rect.position(),
                        size: found.rect.size(),
                        name: found.name,
                        role: found.role,
                    }),
                    Err(e) => Response::error(e),
                }
            }
            Command::GetAppRegion {} => match self.app_region() {
                Ok(rect) => Response::success(ResponseData::Region {
                    region: rect.to_array(),
                }),
                Err(e) => Response::error(e),
            },
            Command::GetScreenshot { region } => {
                match self.screenshot(region.map(Rectangle::from_array)) {
                    Ok(shot) => Response::success(ResponseData::Screenshot {
                        image_bytes_hex: shot.to_hex(),
                        size: shot.png.len(),
                    }),
                    Err(e) => Response::error(e),
                }
            }
            Command::ExecuteBatch { commands } => {
                let outcome = self.execute(&commands);
                Response::batch(outcome.results)
            }
            Command::Disconnect {} => {
                self.clear_cache();
                Response::ok("Disconnected")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::command::{Action, CommandResult};
    use crate::error::ErrorCode;
    use crate::executor::{InputEvent, RecordingInput};
    use crate::geometry::Point;
    use crate::input::MouseButton;
    use crate::tree::{FixtureTree, NodeSpec};
    use crate::vision::CaptureError;

    struct SolidScreen;

    impl ScreenCapture for SolidScreen {
        fn capture(&mut self, region: Option<Rectangle>) -> Result<RgbaImage, CaptureError> {
            let r = region.unwrap_or(Rectangle::new(0, 0, 64, 48));
            Ok(RgbaImage::from_pixel(r.width, r.height, Rgba([0, 128, 255, 255])))
        }
    }

    struct NoScreen;

    impl ScreenCapture for NoScreen {
        fn capture(&mut self, _: Option<Rectangle>) -> Result<RgbaImage, CaptureError> {
            Err(CaptureError::Unavailable("no display".into()))
        }
    }

    fn tree() -> FixtureTree {
        FixtureTree::new(vec![
            NodeSpec::new("QGIS3", "application", [0, 0, 1280, 800]).with_children(vec![
                NodeSpec::new("Project Toolbar", "tool bar", [0, 30, 400, 32]).with_children(vec![
                    NodeSpec::new("New", "push button", [4, 32, 28, 28]),
                ]),
            ]),
            NodeSpec::new("gedit", "application", [0, 0, 640, 480])
                .with_children(vec![NodeSpec::new("New", "push button", [600, 0, 20, 20])]),
        ])
    }

    fn session_with(screen: Box<dyn ScreenCapture + Send>) -> (Session, RecordingInput) {
        let input = RecordingInput::new();
        let session = Session::new(
            Box::new(tree()),
            Box::new(input.clone()),
            screen,
            SessionConfig {
                cache_capacity: 8,
                settle: Duration::ZERO,
            },
        );
        (session, input)
    }

    fn request(command: Command) -> Request {
        Request::new(command)
    }

    #[test]
    fn test_resolve_element_request() {
        let (mut session, _) = session_with(Box::new(SolidScreen));
        session.bind_application("QGIS3").unwrap();

        let response = session.handle(request(Command::ResolveElement {
            path: "Project Toolbar/New".into(),
            role_constraints: vec![None, Some("push button".into())],
        }));

        assert!(response.success);
        assert_eq!(
            response.data,
            Some(ResponseData::Element {
                position: Point::new(4, 32),
                size: crate::geometry::Size::new(28, 28),
                name: "New".into(),
                role: "push button".into(),
            })
        );
        assert_eq!(session.cached_entries(), 2);
    }

    #[test]
    fn test_binding_scopes_resolution() {
        let (mut session, _) = session_with(Box::new(SolidScreen));
        session.bind_application("gedit").unwrap();
        let found = session.resolve(&ElementPath::unconstrained("New")).unwrap();
        assert_eq!(found.rect.x, 600);
    }

    #[test]
    fn test_bind_unknown_application_fails() {
        let (mut session, _) = session_with(Box::new(SolidScreen));
        let err = session.bind_application("firefox").unwrap_err();
        assert_eq!(err.code, ErrorCode::NoApplication);
        assert_eq!(session.application(), None);
    }

    #[test]
    fn test_resolve_not_found_response() {
        let (mut session, _) = session_with(Box::new(SolidScreen));
        let response = session.handle(request(Command::ResolveElement {
            path: "QGIS3/Project Toolbar/Save".into(),
            role_constraints: vec![],
        }));
        assert!(!response.success);
        assert_eq!(response.code, Some(ErrorCode::ElementNotFound));
        assert!(response.error.unwrap().contains("QGIS3/Project Toolbar/Save"));
        assert!(response.suggestion.unwrap().contains("QGIS3/Project Toolbar"));
    }

    #[test]
    fn test_app_region() {
        let (mut session, _) = session_with(Box::new(SolidScreen));
        let response = session.handle(request(Command::GetAppRegion {}));
        assert_eq!(response.code, Some(ErrorCode::NoApplication));

        session.bind_application("gedit").unwrap();
        let response = session.handle(request(Command::GetAppRegion {}));
        assert_eq!(
            response.data,
            Some(ResponseData::Region {
                region: [0, 0, 640, 480]
            })
        );
    }

    #[test]
    fn test_screenshot_hex_matches_size() {
        let (mut session, _) = session_with(Box::new(SolidScreen));
        let response = session.handle(request(Command::GetScreenshot {
            region: Some([0, 0, 8, 4]),
        }));
        match response.data {
            Some(ResponseData::Screenshot {
                image_bytes_hex,
                size,
            }) => {
                assert_eq!(image_bytes_hex.len(), size * 2);
                let png = hex::decode(image_bytes_hex).unwrap();
                let img = vision::decode_image(&png).unwrap();
                assert_eq!(img.dimensions(), (8, 4));
            }
            other => panic!("unexpected response data: {:?}", other),
        }
    }

    #[test]
    fn test_screenshot_errors() {
        let (mut session, _) = session_with(Box::new(NoScreen));
        let response = session.handle(request(Command::GetScreenshot { region: None }));
        assert_eq!(response.code, Some(ErrorCode::CaptureFailed));

        let response = session.handle(request(Command::GetScreenshot {
            region: Some([0, 0, 0, 10]),
        }));
        assert_eq!(response.code, Some(ErrorCode::InvalidInput));
    }

    #[test]
    fn test_screenshot_must_fit_one_frame() {
        let largest = (MAX_FRAME_SIZE - SCREENSHOT_ENVELOPE) / 2;
        assert!(check_screenshot_fits(largest).is_ok());

        let err = check_screenshot_fits(largest + 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtocolError);
        assert!(err.suggestion.unwrap().contains("smaller screenshot region"));
    }

    #[test]
    fn test_execute_batch_partial_failure() {
        let (mut session, input) = session_with(Box::new(SolidScreen));
        let response = session.handle(request(Command::ExecuteBatch {
            commands: vec![
                PrimitiveCommand::new(Action::MouseMove { x: 3, y: 4 }),
                PrimitiveCommand::raw("bogus", serde_json::json!({})),
                PrimitiveCommand::new(Action::MouseClick {
                    x: 3,
                    y: 4,
                    button: MouseButton::Left,
                }),
            ],
        }));

        assert!(!response.success);
        assert_eq!(response.code, Some(ErrorCode::CommandFailed));
        match response.data {
            Some(ResponseData::Batch { results }) => {
                assert_eq!(results[0], CommandResult::ok("mouse_move"));
                assert!(!results[1].success);
                assert_eq!(results[2], CommandResult::ok("mouse_click"));
            }
            other => panic!("unexpected response data: {:?}", other),
        }
        assert_eq!(input.events().len(), 2);
        assert_eq!(input.events()[0], InputEvent::Move(Point::new(3, 4)));
    }

    #[test]
    fn test_disconnect_clears_cache() {
        let (mut session, _) = session_with(Box::new(SolidScreen));
        session
            .resolve(&ElementPath::unconstrained("QGIS3/Project Toolbar/New"))
            .unwrap();
        assert!(session.cached_entries() > 0);

        let response = session.handle(request(Command::Disconnect {}));

        assert!(response.success);
        assert_eq!(session.cached_entries(), 0);
    }
}
