//! Screen geometry shared by the locators, compiler and protocol.

use serde::{Deserialize, Serialize};

/// A screen coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Width and height of an element or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// An axis-aligned screen rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_parts(position: Point, size: Size) -> Self {
        Self::new(position.x, position.y, size.width, size.height)
    }

    /// Wire form `[x, y, width, height]`.
    pub fn from_array(region: [u32; 4]) -> Self {
        Self::new(region[0], region[1], region[2], region[3])
    }

    pub fn to_array(self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Center point, using integer division on the size.
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            self.x.saturating_add(self.width / 2),
            self.y.saturating_add(self.height / 2),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Point at a fractional offset inside the rectangle.
    ///
    /// Fractions are clamped at zero and the scaled offset is truncated, so
    /// `(0.5, 0.5)` of a 200x100 rectangle at (100, 100) is (200, 150).
    #[must_use]
    pub fn point_at(&self, x_pct: f64, y_pct: f64) -> Point {
        Point::new(
            self.x.saturating_add(scale(self.width, x_pct)),
            self.y.saturating_add(scale(self.height, y_pct)),
        )
    }

    /// Sub-rectangle spanning two fractional corners.
    #[must_use]
    pub fn sub_region(&self, start: (f64, f64), end: (f64, f64)) -> Rectangle {
        let a = self.point_at(start.0, start.1);
        let b = self.point_at(end.0, end.1);
        let (x0, x1) = (a.x.min(b.x), a.x.max(b.x));
        let (y0, y1) = (a.y.min(b.y), a.y.max(b.y));
        Rectangle::new(x0, y0, x1 - x0, y1 - y0)
    }
}

fn scale(length: u32, pct: f64) -> u32 {
    let scaled = f64::from(length) * pct.max(0.0);
    // Truncation toward zero; saturates on overflow.
    scaled as u32
}
