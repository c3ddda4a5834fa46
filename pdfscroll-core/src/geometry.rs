/// Axis-aligned rectangle with a top-left origin and `y` growing downwards.
///
/// The same type is used for document space (PDF points) and canvas space
/// (pixels at the current zoom); [`PageTransform`] converts between them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center_x(&self) -> f32 {
        (self.x0 + self.x1) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    pub fn is_valid(&self) -> bool {
        self.x0.is_finite()
            && self.y0.is_finite()
            && self.x1.is_finite()
            && self.y1.is_finite()
            && self.x1 >= self.x0
            && self.y1 >= self.y0
    }

    /// Inclusive on every edge, matching how clicks on a glyph border behave.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        self.x0 <= x && x <= self.x1 && self.y0 <= y && y <= self.y1
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn expand(&self, amount: f32) -> Rect {
        Rect {
            x0: self.x0 - amount,
            y0: self.y0 - amount,
            x1: self.x1 + amount,
            y1: self.y1 + amount,
        }
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect {
            x0: self.x0 + dx,
            y0: self.y0 + dy,
            x1: self.x1 + dx,
            y1: self.y1 + dy,
        }
    }

    /// Bounding box of a sequence of rectangles, `None` when empty.
    pub fn bounding<'a, I>(rects: I) -> Option<Rect>
    where
        I: IntoIterator<Item = &'a Rect>,
    {
        rects
            .into_iter()
            .fold(None, |acc: Option<Rect>, rect| match acc {
                Some(bounds) => Some(bounds.union(rect)),
                None => Some(*rect),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Maps document-space coordinates of one page onto the canvas: a uniform
/// zoom followed by the page's placement offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTransform {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl PageTransform {
    pub fn new(scale: f32, offset_x: f32, offset_y: f32) -> Self {
        Self {
            scale,
            offset_x,
            offset_y,
        }
    }

    pub fn apply(&self, rect: &Rect) -> Rect {
        Rect {
            x0: rect.x0 * self.scale + self.offset_x,
            y0: rect.y0 * self.scale + self.offset_y,
            x1: rect.x1 * self.scale + self.offset_x,
            y1: rect.y1 * self.scale + self.offset_y,
        }
    }

    pub fn apply_y(&self, y: f32) -> f32 {
        y * self.scale + self.offset_y
    }
}

impl Default for PageTransform {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_scales_then_offsets() {
        let transform = PageTransform::new(2.0, 5.0, 100.0);
        let rect = transform.apply(&Rect::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(rect, Rect::new(7.0, 104.0, 11.0, 108.0));
        assert_eq!(transform.apply_y(10.0), 120.0);
    }

    #[test]
    fn bounding_of_empty_is_none() {
        assert!(Rect::bounding(std::iter::empty()).is_none());
        let rects = [Rect::new(0.0, 0.0, 1.0, 1.0), Rect::new(4.0, -2.0, 5.0, 0.5)];
        assert_eq!(
            Rect::bounding(rects.iter()),
            Some(Rect::new(0.0, -2.0, 5.0, 1.0))
        );
    }

    #[test]
    fn contains_is_inclusive() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(rect.contains(10.0, 0.0));
        assert!(!rect.contains(10.01, 5.0));
    }
}
