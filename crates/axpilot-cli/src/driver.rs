//! Driver-side operations: resolve, compile, dispatch.
//!
//! Each semantic operation resolves the elements it needs over the wire,
//! compiles one batch and sends it as a unit. Dispatched batches are kept
//! in a history that can be exported as JSON.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use axpilot_core::cache::ResolutionCache;
use axpilot_core::command::{BatchOutcome, CommandBatch};
use axpilot_core::compiler;
use axpilot_core::error::{ApiError, ErrorCode};
use axpilot_core::geometry::{Point, Rectangle};
use axpilot_core::locator::ResolvedElement;
use axpilot_core::path::ElementPath;
use axpilot_core::vision::{self, CaptureError, ImageMatch, NccMatcher, ScreenCapture, VisionError};
use image::RgbaImage;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::daemon::TargetClient;

/// Corners of a region as fractions of the application rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentRegion {
    pub start: (f64, f64),
    pub end: (f64, f64),
}

/// How long to keep retrying a lookup, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polling {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Polling {
    /// A single attempt.
    pub const ONCE: Polling = Polling {
        timeout: Duration::ZERO,
        interval: Duration::ZERO,
    };

    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    /// Sleep until the next attempt. `false` once the deadline has passed.
    async fn pause(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(self.interval.min(deadline - now)).await;
        true
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ApiError>(), Some(api) if api.code == ErrorCode::ElementNotFound)
}

pub struct Driver {
    client: TargetClient,
    /// Rectangles resolved earlier in this connection, if enabled.
    cache: Option<ResolutionCache<ElementPath, ResolvedElement>>,
    history: Vec<CommandBatch>,
    matcher: NccMatcher,
}

impl Driver {
    pub fn new(client: TargetClient) -> Self {
        Self {
            client,
            cache: None,
            history: Vec::new(),
            matcher: NccMatcher,
        }
    }

    /// Remember resolved rectangles locally, skipping the round trip.
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = Some(ResolutionCache::new(capacity));
        self
    }

    pub fn client_mut(&mut self) -> &mut TargetClient {
        &mut self.client
    }

    /// Entries in the driver-side cache.
    pub fn cached_entries(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    fn clear_cache(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }

    /// Batches dispatched so far, oldest first.
    pub fn history(&self) -> &[CommandBatch] {
        &self.history
    }

    pub async fn resolve(&mut self, path: &ElementPath) -> Result<ResolvedElement> {
        if !self.client.is_connected() && self.cached_entries() > 0 {
            // Filled on a connection that is gone; the target may have moved on.
            debug!("Connection lost, dropping driver cache");
            self.clear_cache();
        }
        if let Some(found) = self.cache.as_mut().and_then(|c| c.get(path).cloned()) {
            debug!(path = %path, "Driver cache hit");
            return Ok(found);
        }
        let found = self.client.resolve_element(path).await?;
        if let Some(cache) = self.cache.as_mut() {
            cache.put(path.clone(), found.clone());
        }
        Ok(found)
    }

    /// Poll until `path` resolves. Only a not-found answer is retried; the
    /// last one is returned once `polling.timeout` has passed.
    pub async fn wait_for_element(&mut self, path: &ElementPath, polling: Polling) -> Result<ResolvedElement> {
        let deadline = polling.deadline();
        loop {
            match self.resolve(path).await {
                Ok(found) => return Ok(found),
                Err(e) if is_not_found(&e) => {
                    if !polling.pause(deadline).await {
                        return Err(e.context(format!(
                            "'{}' did not appear within {:?}",
                            path, polling.timeout
                        )));
                    }
                    debug!(path = %path, "Element not there yet");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn rect(&mut self, path: &ElementPath) -> Result<Rectangle> {
        Ok(self.resolve(path).await?.rect)
    }

    async fn dispatch(&mut self, batch: CommandBatch) -> Result<BatchOutcome> {
        debug!(operation = %batch.operation, primitives = batch.len(), "Dispatching batch");
        let outcome = self.client.execute_batch(&batch).await;
        self.history.push(batch);
        let outcome = outcome?;
        if !outcome.success() {
            warn!(
                failed = outcome.failed_count(),
                total = outcome.results.len(),
                "Batch finished with failures"
            );
        }
        Ok(outcome)
    }

    pub async fn click(&mut self, path: &ElementPath) -> Result<BatchOutcome> {
        let rect = self.rect(path).await?;
        self.dispatch(compiler::click(&rect)).await
    }

    pub async fn right_click(&mut self, path: &ElementPath) -> Result<BatchOutcome> {
        let rect = self.rect(path).await?;
        self.dispatch(compiler::right_click(&rect)).await
    }

    pub async fn set_text(&mut self, path: &ElementPath, text: &str) -> Result<BatchOutcome> {
        let rect = self.rect(path).await?;
        self.dispatch(compiler::set_text(&rect, text)).await
    }

    /// Type into `path` if given, else wherever focus already is.
    pub async fn input_text(&mut self, path: Option<&ElementPath>, text: &str) -> Result<BatchOutcome> {
        let rect = match path {
            Some(p) => Some(self.rect(p).await?),
            None => None,
        };
        self.dispatch(compiler::input_text(rect.as_ref(), text)).await
    }

    pub async fn select_combo_item(&mut self, combo: &ElementPath, item: &str) -> Result<BatchOutcome> {
        let combo_rect = self.rect(combo).await?;
        let item_rect = self.rect(&compiler::combo_item_path(combo, item)).await?;
        self.dispatch(compiler::select_combo_item(&combo_rect, &item_rect))
            .await
    }

    /// Drag one element onto another, center to center.
    pub async fn drag_item_to(&mut self, item: &ElementPath, target: &ElementPath) -> Result<BatchOutcome> {
        let from = self.rect(item).await?;
        let to = self.rect(target).await?;
        self.dispatch(compiler::drag_between(&from, &to)).await
    }

    pub async fn drag_by_percentage(
        &mut self,
        reference: &ElementPath,
        start: (f64, f64),
        end: (f64, f64),
    ) -> Result<BatchOutcome> {
        let rect = self.rect(reference).await?;
        self.dispatch(compiler::drag_by_percentage(&rect, start, end))
            .await
    }

    pub async fn drag(&mut self, start: Point, end: Point) -> Result<BatchOutcome> {
        self.dispatch(compiler::drag(start, end)).await
    }

    pub async fn hotkey<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<BatchOutcome> {
        self.dispatch(compiler::hotkey(keys)).await
    }

    /// Positive scrolls up, negative down.
    pub async fn scroll(&mut self, clicks: i32) -> Result<BatchOutcome> {
        self.dispatch(compiler::scroll(clicks)).await
    }

    pub async fn move_to(&mut self, point: Point) -> Result<BatchOutcome> {
        self.dispatch(compiler::move_to(point)).await
    }

    pub async fn move_to_element_center(&mut self, path: &ElementPath) -> Result<BatchOutcome> {
        let rect = self.rect(path).await?;
        self.dispatch(compiler::move_to(rect.center())).await
    }

    /// The bound application's rectangle, or `None` when the target is
    /// driving the whole desktop.
    async fn default_region(&mut self) -> Result<Option<Rectangle>> {
        match self.client.app_region().await {
            Ok(region) => Ok(Some(region)),
            Err(e) => match e.downcast_ref::<ApiError>() {
                Some(api) if api.code == ErrorCode::NoApplication => Ok(None),
                _ => Err(e),
            },
        }
    }

    /// One capture-and-match attempt over `region`.
    async fn search_screen(
        &mut self,
        reference: &[u8],
        region: Option<Rectangle>,
        threshold: f32,
    ) -> Result<Option<ImageMatch>> {
        let png = self.client.screenshot(region).await?;
        let mut screen = FetchedScreen { png };
        match vision::find_image(&mut screen, &self.matcher, reference, region, threshold) {
            Ok(found) => {
                info!(rect = ?found.rect.to_array(), confidence = found.confidence, "Image found");
                Ok(Some(found))
            }
            Err(VisionError::NotFound) => Ok(None),
            Err(VisionError::Capture(e)) => Err(ApiError::from(e).into()),
        }
    }

    /// Look for `reference` (encoded image bytes) on screen, retrying until
    /// `polling.timeout` runs out.
    ///
    /// `region` defaults to the bound application, else the whole screen.
    /// Returns `Ok(None)` when nothing scores at least `threshold`.
    pub async fn find_image(
        &mut self,
        reference: &[u8],
        region: Option<Rectangle>,
        threshold: f32,
        polling: Polling,
    ) -> Result<Option<ImageMatch>> {
        let region = match region {
            Some(r) => Some(r),
            None => self.default_region().await?,
        };
        let deadline = polling.deadline();
        loop {
            if let Some(found) = self.search_screen(reference, region, threshold).await? {
                return Ok(Some(found));
            }
            if !polling.pause(deadline).await {
                debug!(threshold, "Image not found");
                return Ok(None);
            }
        }
    }

    /// [`Driver::find_image`] within a fractional sub-region of the bound
    /// application.
    pub async fn find_image_in_percentage_region(
        &mut self,
        reference: &[u8],
        region: PercentRegion,
        threshold: f32,
        polling: Polling,
    ) -> Result<Option<ImageMatch>> {
        let app = self.client.app_region().await?;
        let area = app.sub_region(region.start, region.end);
        self.find_image(reference, Some(area), threshold, polling).await
    }

    /// Find `reference` and click its center. `Ok(None)` if it never
    /// showed up; nothing is dispatched in that case.
    pub async fn click_image(
        &mut self,
        reference: &[u8],
        threshold: f32,
        polling: Polling,
    ) -> Result<Option<BatchOutcome>> {
        let found = self.find_image(reference, None, threshold, polling).await?;
        self.dispatch_on(found, compiler::click).await
    }

    pub async fn double_click_image(
        &mut self,
        reference: &[u8],
        threshold: f32,
        polling: Polling,
    ) -> Result<Option<BatchOutcome>> {
        let found = self.find_image(reference, None, threshold, polling).await?;
        self.dispatch_on(found, compiler::double_click).await
    }

    pub async fn click_image_in_percentage_region(
        &mut self,
        reference: &[u8],
        region: PercentRegion,
        threshold: f32,
        polling: Polling,
    ) -> Result<Option<BatchOutcome>> {
        let found = self
            .find_image_in_percentage_region(reference, region, threshold, polling)
            .await?;
        self.dispatch_on(found, compiler::click).await
    }

    async fn dispatch_on(
        &mut self,
        found: Option<ImageMatch>,
        compile: fn(&Rectangle) -> CommandBatch,
    ) -> Result<Option<BatchOutcome>> {
        match found {
            Some(found) => self.dispatch(compile(&found.rect)).await.map(Some),
            None => Ok(None),
        }
    }

    /// Write every dispatched batch to `path` as pretty JSON.
    pub fn export_history(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.history)
            .context("Failed to serialize command history")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write history to {}", path.display()))?;
        info!(batches = self.history.len(), path = %path.display(), "Exported command history");
        Ok(())
    }

    /// Drop cached rectangles and close the connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.clear_cache();
        self.client.disconnect().await
    }
}

/// A screenshot already fetched from the target, served to the matcher.
struct FetchedScreen {
    png: Vec<u8>,
}

impl ScreenCapture for FetchedScreen {
    fn capture(&mut self, _region: Option<Rectangle>) -> Result<RgbaImage, CaptureError> {
        vision::decode_image(&self.png)
    }
}
