//! Vision Locator: finds a reference image on screen by template matching.
//!
//! Both images are reduced to luma before matching. The matcher produces a
//! correlation surface with one score per candidate top-left position; the
//! first position in row-major order whose score reaches the threshold wins,
//! which is not necessarily the global maximum.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};
use thiserror::Error;
use tracing::debug;

use crate::error::ApiError;
use crate::geometry::{Point, Rectangle};

/// Default confidence threshold for image matches.
pub const DEFAULT_THRESHOLD: f32 = 0.7;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("screen capture unavailable: {0}")]
    Unavailable(String),

    #[error("screen capture failed: {0}")]
    Failed(String),

    #[error("captured image could not be decoded: {0}")]
    Decode(String),
}

impl From<CaptureError> for ApiError {
    fn from(err: CaptureError) -> Self {
        ApiError::capture_failed(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("reference image not found on screen")]
    NotFound,

    #[error(transparent)]
    Capture(CaptureError),
}

/// Source of screenshots.
pub trait ScreenCapture {
    /// Capture `region` in screen coordinates, or the whole screen.
    fn capture(&mut self, region: Option<Rectangle>) -> Result<RgbaImage, CaptureError>;
}

/// Scores of every candidate placement of a template over an image.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationSurface {
    width: u32,
    height: u32,
    scores: Vec<f32>,
}

impl CorrelationSurface {
    /// Build a surface from row-major scores. Returns `None` on a size mismatch.
    pub fn from_scores(width: u32, height: u32, scores: Vec<f32>) -> Option<Self> {
        (scores.len() == (width as usize) * (height as usize)).then_some(Self {
            width,
            height,
            scores,
        })
    }

    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            scores: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn score(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.scores.get((y as usize) * (self.width as usize) + x as usize).copied()
    }

    /// First position in row-major order scoring at least `threshold`.
    pub fn first_at_or_above(&self, threshold: f32) -> Option<(Point, f32)> {
        let width = self.width.max(1) as usize;
        self.scores
            .iter()
            .position(|&s| s >= threshold)
            .map(|i| {
                let point = Point::new((i % width) as u32, (i / width) as u32);
                (point, self.scores[i])
            })
    }
}

/// Pixel template-matching backend.
pub trait TemplateMatcher {
    fn match_template(&self, image: &GrayImage, template: &GrayImage) -> CorrelationSurface;
}

/// Zero-mean normalized cross-correlation.
///
/// Scores lie in `[-1, 1]`. A flat window scores 1 against a flat template of
/// the same intensity and 0 otherwise. Window means and variances come from
/// summed-area tables, so only the cross term is computed per template pixel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NccMatcher;

impl TemplateMatcher for NccMatcher {
    fn match_template(&self, image: &GrayImage, template: &GrayImage) -> CorrelationSurface {
        let (iw, ih) = image.dimensions();
        let (tw, th) = template.dimensions();
        if tw == 0 || th == 0 || tw > iw || th > ih {
            return CorrelationSurface::empty();
        }

        let (iw, tw, th) = (iw as usize, tw as usize, th as usize);
        let n = (tw * th) as u128;
        let (t_sum, t_sq) = template.as_raw().iter().fold((0u128, 0u128), |(s, q), &v| {
            let v = u128::from(v);
            (s + v, q + v * v)
        });
        let t_mean = t_sum as f64 / n as f64;
        let t_var = (n * t_sq - t_sum * t_sum) as f64 / n as f64;
        let t_dev: Vec<f32> = template
            .as_raw()
            .iter()
            .map(|&v| (f64::from(v) - t_mean) as f32)
            .collect();

        let table = IntegralTable::new(image);
        let pixels: Vec<f32> = image.as_raw().iter().map(|&v| f32::from(v)).collect();
        let (sw, sh) = (iw - tw + 1, ih as usize - th + 1);
        let mut scores = Vec::with_capacity(sw * sh);

        for y in 0..sh {
            for x in 0..sw {
                let (sum, sum_sq) = table.window(x, y, tw, th);
                let (sum, sum_sq) = (u128::from(sum), u128::from(sum_sq));
                let w_mean = sum as f64 / n as f64;
                let w_var = (n * sum_sq - sum * sum) as f64 / n as f64;

                let score = if t_var == 0.0 || w_var == 0.0 {
                    if t_var == 0.0 && w_var == 0.0 && (w_mean - t_mean).abs() < 0.5 {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    let cross: f64 = t_dev
                        .chunks_exact(tw)
                        .enumerate()
                        .map(|(ty, t_row)| {
                            let start = (y + ty) * iw + x;
                            f64::from(dot(&pixels[start..start + tw], t_row))
                        })
                        .sum();
                    (cross / (t_var * w_var).sqrt()).clamp(-1.0, 1.0)
                };
                scores.push(score as f32);
            }
        }

        CorrelationSurface {
            width: sw as u32,
            height: sh as u32,
            scores,
        }
    }
}

/// Summed-area tables of pixel values and their squares, one row and one
/// column larger than the image.
struct IntegralTable {
    stride: usize,
    sums: Vec<u64>,
    squares: Vec<u64>,
}

impl IntegralTable {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];
        let mut squares = vec![0u64; stride * (h + 1)];
        for (y, row) in image.as_raw().chunks_exact(w).enumerate() {
            let (mut row_sum, mut row_sq) = (0u64, 0u64);
            for (x, &v) in row.iter().enumerate() {
                let v = u64::from(v);
                row_sum += v;
                row_sq += v * v;
                let at = (y + 1) * stride + x + 1;
                sums[at] = sums[at - stride] + row_sum;
                squares[at] = squares[at - stride] + row_sq;
            }
        }
        Self {
            stride,
            sums,
            squares,
        }
    }

    /// Sum and sum of squares over the `w` x `h` window at (`x`, `y`).
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (u64, u64) {
        let top = y * self.stride + x;
        let bottom = (y + h) * self.stride + x;
        let area = |t: &[u64]| t[bottom + w] + t[top] - t[top + w] - t[bottom];
        (area(&self.sums), area(&self.squares))
    }
}

/// Dot product with independent lanes so the loop vectorizes.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut lanes = [0.0f32; 8];
    let chunks = a.chunks_exact(8).zip(b.chunks_exact(8));
    for (ca, cb) in chunks {
        for (lane, (x, y)) in lanes.iter_mut().zip(ca.iter().zip(cb)) {
            *lane += x * y;
        }
    }
    let tail = a.len() - a.len() % 8;
    let rest: f32 = a[tail..].iter().zip(&b[tail..]).map(|(x, y)| x * y).sum();
    lanes.iter().sum::<f32>() + rest
}

/// A located reference image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageMatch {
    /// Screen-space rectangle of the match.
    pub rect: Rectangle,
    pub confidence: f32,
}

/// Search a captured image for `reference`.
///
/// `origin` is the screen position of the captured image's top-left corner.
pub fn locate(
    screenshot: &DynamicImage,
    reference: &DynamicImage,
    origin: Point,
    matcher: &dyn TemplateMatcher,
    threshold: f32,
) -> Option<ImageMatch> {
    let haystack = screenshot.to_luma8();
    let needle = reference.to_luma8();
    let surface = matcher.match_template(&haystack, &needle);
    let (at, confidence) = surface.first_at_or_above(threshold)?;
    Some(ImageMatch {
        rect: Rectangle::new(
            origin.x.saturating_add(at.x),
            origin.y.saturating_add(at.y),
            needle.width(),
            needle.height(),
        ),
        confidence,
    })
}

/// Capture `region` (or the whole screen) and find the encoded `reference`.
///
/// An undecodable reference or screenshot is reported as not found.
pub fn find_image(
    capture: &mut dyn ScreenCapture,
    matcher: &dyn TemplateMatcher,
    reference: &[u8],
    region: Option<Rectangle>,
    threshold: f32,
) -> Result<ImageMatch, VisionError> {
    let reference = match image::load_from_memory(reference) {
        Ok(img) => img,
        Err(e) => {
            debug!(error = %e, "Reference image failed to decode");
            return Err(VisionError::NotFound);
        }
    };

    let screenshot = match capture.capture(region) {
        Ok(img) => DynamicImage::ImageRgba8(img),
        Err(CaptureError::Decode(e)) => {
            debug!(error = %e, "Screenshot failed to decode");
            return Err(VisionError::NotFound);
        }
        Err(e) => return Err(VisionError::Capture(e)),
    };

    let origin = region.map(|r| r.position()).unwrap_or(Point::new(0, 0));
    locate(&screenshot, &reference, origin, matcher, threshold).ok_or(VisionError::NotFound)
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| CaptureError::Failed(format!("PNG encoding failed: {}", e)))?;
    Ok(buffer.into_inner())
}

/// Decode PNG (or any supported format) bytes into RGBA.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, CaptureError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| CaptureError::Decode(e.to_string()))
}

/// Crop `region` out of a full-screen image, clamped to its bounds.
pub fn crop(image: &RgbaImage, region: Rectangle) -> Result<RgbaImage, CaptureError> {
    let (w, h) = image.dimensions();
    if region.x >= w || region.y >= h {
        return Err(CaptureError::Failed(format!(
            "region {:?} lies outside the {}x{} screen",
            region.to_array(),
            w,
            h
        )));
    }
    let width = region.width.min(w - region.x);
    let height = region.height.min(h - region.y);
    Ok(image::imageops::crop_imm(image, region.x, region.y, width, height).to_image())
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgba};

    use super::*;

    /// Serves a fixed image, cropping when a region is requested.
    struct StillScreen(RgbaImage);

    impl ScreenCapture for StillScreen {
        fn capture(&mut self, region: Option<Rectangle>) -> Result<RgbaImage, CaptureError> {
            match region {
                Some(r) => crop(&self.0, r),
                None => Ok(self.0.clone()),
            }
        }
    }

    /// Returns a canned surface regardless of input.
    struct FixedMatcher(CorrelationSurface);

    impl TemplateMatcher for FixedMatcher {
        fn match_template(&self, _: &GrayImage, _: &GrayImage) -> CorrelationSurface {
            self.0.clone()
        }
    }

    /// 40x30 gray screen with a distinctive 4x4 checker patch at (20, 10).
    fn screen_with_patch() -> RgbaImage {
        let mut img = RgbaImage::from_pixel(40, 30, Rgba([128, 128, 128, 255]));
        for (i, (dx, dy)) in (0..4).flat_map(|y| (0..4).map(move |x| (x, y))).enumerate() {
            let v = if (dx + dy) % 2 == 0 { 255 } else { 0 };
            let v = if i == 5 { 40 } else { v };
            img.put_pixel(20 + dx, 10 + dy, Rgba([v, v, v, 255]));
        }
        img
    }

    fn patch_png(screen: &RgbaImage) -> Vec<u8> {
        let patch = crop(screen, Rectangle::new(20, 10, 4, 4)).unwrap();
        encode_png(&patch).unwrap()
    }

    #[test]
    fn test_find_image_whole_screen() {
        let screen = screen_with_patch();
        let reference = patch_png(&screen);
        let mut capture = StillScreen(screen);

        let found = find_image(&mut capture, &NccMatcher, &reference, None, 0.99).unwrap();

        assert_eq!(found.rect, Rectangle::new(20, 10, 4, 4));
        assert!(found.confidence > 0.99);
    }

    #[test]
    fn test_find_image_in_region_reports_screen_coordinates() {
        let screen = screen_with_patch();
        let reference = patch_png(&screen);
        let mut capture = StillScreen(screen);

        let region = Rectangle::new(15, 5, 20, 20);
        let found = find_image(&mut capture, &NccMatcher, &reference, Some(region), 0.99).unwrap();

        assert_eq!(found.rect.position(), Point::new(20, 10));
    }

    #[test]
    fn test_find_image_outside_region_not_found() {
        let screen = screen_with_patch();
        let reference = patch_png(&screen);
        let mut capture = StillScreen(screen);

        let region = Rectangle::new(0, 0, 15, 15);
        let result = find_image(&mut capture, &NccMatcher, &reference, Some(region), 0.9);
        assert!(matches!(result, Err(VisionError::NotFound)));
    }

    #[test]
    fn test_undecodable_reference_is_not_found() {
        let mut capture = StillScreen(screen_with_patch());
        let result = find_image(&mut capture, &NccMatcher, b"not an image", None, 0.5);
        assert!(matches!(result, Err(VisionError::NotFound)));
    }

    #[test]
    fn test_threshold_boundary() {
        let threshold = 0.8_f32;
        let below = f32::from_bits(threshold.to_bits() - 1);
        let screen = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let reference = DynamicImage::ImageRgba8(RgbaImage::new(2, 2));

        let at = FixedMatcher(CorrelationSurface::from_scores(2, 1, vec![0.1, threshold]).unwrap());
        let found = locate(&screen, &reference, Point::new(0, 0), &at, threshold).unwrap();
        assert_eq!(found.rect.position(), Point::new(1, 0));
        assert_eq!(found.confidence, threshold);

        let under = FixedMatcher(CorrelationSurface::from_scores(2, 1, vec![0.1, below]).unwrap());
        assert!(locate(&screen, &reference, Point::new(0, 0), &under, threshold).is_none());
    }

    #[test]
    fn test_first_qualifying_location_wins() {
        let surface = CorrelationSurface::from_scores(3, 2, vec![0.0, 0.0, 0.75, 0.99, 0.0, 0.0]).unwrap();
        let (at, score) = surface.first_at_or_above(0.7).unwrap();
        assert_eq!(at, Point::new(2, 0));
        assert_eq!(score, 0.75);
        assert_eq!(surface.score(0, 1), Some(0.99));
        assert_eq!(surface.score(3, 0), None);
    }

    #[test]
    fn test_ncc_scores() {
        let mut img = GrayImage::from_pixel(6, 6, Luma([10]));
        img.put_pixel(3, 3, Luma([200]));
        let mut template = GrayImage::from_pixel(2, 2, Luma([10]));
        template.put_pixel(1, 1, Luma([200]));

        let surface = NccMatcher.match_template(&img, &template);
        assert_eq!((surface.width(), surface.height()), (5, 5));
        assert!((surface.score(2, 2).unwrap() - 1.0).abs() < 1e-4);
        assert!(surface.score(0, 0).unwrap() < 0.5);
    }

    /// Direct evaluation of the score at one position, for comparison.
    fn direct_score(image: &GrayImage, template: &GrayImage, x: u32, y: u32) -> f64 {
        let n = f64::from(template.width() * template.height());
        let t: Vec<f64> = template.pixels().map(|p| f64::from(p.0[0])).collect();
        let w: Vec<f64> = template
            .enumerate_pixels()
            .map(|(tx, ty, _)| f64::from(image.get_pixel(x + tx, y + ty).0[0]))
            .collect();
        let t_mean = t.iter().sum::<f64>() / n;
        let w_mean = w.iter().sum::<f64>() / n;
        let cross: f64 = t.iter().zip(&w).map(|(a, b)| (a - t_mean) * (b - w_mean)).sum();
        let t_var: f64 = t.iter().map(|a| (a - t_mean).powi(2)).sum();
        let w_var: f64 = w.iter().map(|b| (b - w_mean).powi(2)).sum();
        cross / (t_var * w_var).sqrt()
    }

    #[test]
    fn test_ncc_matches_direct_evaluation() {
        // Deterministic pseudo-random texture; 11 wide to exercise the dot tail.
        let mut seed = 0x2545_f491_u32;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed & 0xff) as u8
        };
        let img = GrayImage::from_fn(37, 23, |_, _| Luma([next()]));
        let template = image::imageops::crop_imm(&img, 9, 5, 11, 7).to_image();

        let surface = NccMatcher.match_template(&img, &template);
        assert_eq!((surface.width(), surface.height()), (27, 17));
        for (x, y) in [(0, 0), (9, 5), (26, 16), (13, 2)] {
            let expected = direct_score(&img, &template, x, y);
            let got = f64::from(surface.score(x, y).unwrap());
            assert!((got - expected).abs() < 1e-4, "({}, {}): {} vs {}", x, y, got, expected);
        }
        let (at, _) = surface.first_at_or_above(0.999).unwrap();
        assert_eq!(at, Point::new(9, 5));
    }

    #[test]
    fn test_ncc_flat_windows() {
        let img = GrayImage::from_pixel(5, 5, Luma([60]));
        let surface = NccMatcher.match_template(&img, &GrayImage::from_pixel(2, 2, Luma([60])));
        assert_eq!(surface.score(1, 1), Some(1.0));
        let surface = NccMatcher.match_template(&img, &GrayImage::from_pixel(2, 2, Luma([90])));
        assert_eq!(surface.score(1, 1), Some(0.0));
    }

    #[test]
    fn test_template_larger_than_image() {
        let surface = NccMatcher.match_template(&GrayImage::new(2, 2), &GrayImage::new(3, 3));
        assert_eq!(surface.first_at_or_above(-1.0), None);
    }

    #[test]
    fn test_crop_clamps_and_rejects() {
        let img = RgbaImage::new(10, 10);
        let cropped = crop(&img, Rectangle::new(8, 8, 5, 5)).unwrap();
        assert_eq!(cropped.dimensions(), (2, 2));
        assert!(crop(&img, Rectangle::new(10, 0, 1, 1)).is_err());
    }

    #[test]
    fn test_png_round_trip() {
        let img = screen_with_patch();
        let bytes = encode_png(&img).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        assert_eq!(decode_image(&bytes).unwrap(), img);
        assert!(matches!(decode_image(b"junk"), Err(CaptureError::Decode(_))));
    }
}
