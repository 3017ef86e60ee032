//! Screen-space geometry for video placement

use crate::config::ViewSettings;

/// Axis-aligned rectangle given by its corners
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// 2D point
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Rect {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        }
    }

    /// Parts of `self` not covered by `other`: above, below, left, right.
    ///
    /// With no overlap the whole rect is returned.
    pub fn subtract(&self, other: &Rect) -> Vec<Rect> {
        let inter = self.intersect(other);
        if inter.is_empty() {
            return vec![*self];
        }

        [
            Rect::new(self.x1, self.y1, self.x2, inter.y1),
            Rect::new(self.x1, inter.y2, self.x2, self.y2),
            Rect::new(self.x1, inter.y1, inter.x1, inter.y2),
            Rect::new(inter.x2, inter.y1, self.x2, inter.y2),
        ]
        .into_iter()
        .filter(|r| !r.is_empty())
        .collect()
    }
}

/// Two triangles per bar, in the vertex order the solid-color shader expects
pub fn bar_vertices(bars: &[Rect]) -> Vec<Point> {
    let mut vertices = vec![Point::default(); bars.len() * 6];
    for (quad, chunk) in bars.iter().zip(vertices.chunks_mut(6)) {
        chunk[1] = Point { x: quad.x1, y: quad.y1 };
        chunk[0] = Point { x: quad.x1, y: quad.y2 };
        chunk[5] = chunk[0];
        chunk[2] = Point { x: quad.x2, y: quad.y1 };
        chunk[3] = chunk[2];
        chunk[4] = Point { x: quad.x2, y: quad.y2 };
    }
    vertices
}

/// Display rotation applied to the video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    /// Any other angle falls back to no rotation
    pub fn from_degrees(degrees: u32) -> Self {
        match degrees % 360 {
            90 => Self::Deg90,
            180 => Self::Deg180,
            270 => Self::Deg270,
            _ => Self::Deg0,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    fn point_offset(self) -> usize {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 1,
            Self::Deg180 => 2,
            Self::Deg270 => 3,
        }
    }
}

/// Destination corners (top-left, top-right, bottom-right, bottom-left)
/// after rotation.
///
/// For quarter turns the destination rect already has the rotated aspect, so
/// each corner is pushed by half the width/height difference to rebuild the
/// unrotated quad around the same centre.
pub fn rotated_corners(dest: &Rect, orientation: Orientation) -> [Point; 4] {
    let corners = [
        Point { x: dest.x1, y: dest.y1 },
        Point { x: dest.x2, y: dest.y1 },
        Point { x: dest.x2, y: dest.y2 },
        Point { x: dest.x1, y: dest.y2 },
    ];
    let change_aspect = orientation.swaps_axes();
    let diff = ((dest.height() - dest.width()) / 2.0).trunc();

    let mut out = [Point::default(); 4];
    for (dest_idx, point) in out.iter_mut().enumerate() {
        let src_idx = (dest_idx + orientation.point_offset()) % 4;
        *point = corners[src_idx];
        if change_aspect {
            match src_idx {
                0 => {
                    point.x -= diff;
                    point.y += diff;
                }
                1 => {
                    point.x += diff;
                    point.y += diff;
                }
                2 => {
                    point.x += diff;
                    point.y -= diff;
                }
                _ => {
                    point.x -= diff;
                    point.y -= diff;
                }
            }
        }
    }
    out
}

/// Fit a frame of the given aspect ratio into the window.
///
/// Pixel ratio stretches horizontally, zoom scales around the centre and the
/// vertical shift moves the picture by a fraction of the window height.
pub fn fit_dest_rect(
    window: &Rect,
    frame_aspect: f32,
    orientation: Orientation,
    view: &ViewSettings,
) -> Rect {
    let mut aspect = frame_aspect * view.pixel_ratio;
    if orientation.swaps_axes() {
        aspect = 1.0 / aspect;
    }
    if !aspect.is_finite() || aspect <= 0.0 {
        return *window;
    }

    let mut width = window.width();
    let mut height = width / aspect;
    if height > window.height() {
        height = window.height();
        width = height * aspect;
    }
    width *= view.zoom;
    height *= view.zoom;

    let cx = window.x1 + window.width() / 2.0;
    let cy = window.y1 + window.height() / 2.0 + view.vertical_shift * window.height();
    Rect::new(
        (cx - width / 2.0).round(),
        (cy - height / 2.0).round(),
        (cx + width / 2.0).round(),
        (cy + height / 2.0).round(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract_letterbox() {
        let window = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        let dest = Rect::new(0.0, 140.0, 1920.0, 940.0);
        let bars = window.subtract(&dest);
        assert_eq!(
            bars,
            vec![
                Rect::new(0.0, 0.0, 1920.0, 140.0),
                Rect::new(0.0, 940.0, 1920.0, 1080.0),
            ]
        );
    }

    #[test]
    fn test_subtract_pillarbox() {
        let window = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        let dest = Rect::new(240.0, 0.0, 1680.0, 1080.0);
        let bars = window.subtract(&dest);
        assert_eq!(
            bars,
            vec![
                Rect::new(0.0, 0.0, 240.0, 1080.0),
                Rect::new(1680.0, 0.0, 1920.0, 1080.0),
            ]
        );
    }

    #[test]
    fn test_subtract_full_cover_and_disjoint() {
        let window = Rect::new(0.0, 0.0, 100.0, 100.0);
        assert!(window.subtract(&window).is_empty());
        let outside = Rect::new(200.0, 200.0, 300.0, 300.0);
        assert_eq!(window.subtract(&outside), vec![window]);
    }

    #[test]
    fn test_bar_vertices() {
        let v = bar_vertices(&[Rect::new(0.0, 0.0, 10.0, 5.0)]);
        assert_eq!(v.len(), 6);
        assert_eq!(v[0], Point { x: 0.0, y: 5.0 });
        assert_eq!(v[1], Point { x: 0.0, y: 0.0 });
        assert_eq!(v[2], Point { x: 10.0, y: 0.0 });
        assert_eq!(v[3], v[2]);
        assert_eq!(v[4], Point { x: 10.0, y: 5.0 });
        assert_eq!(v[5], v[0]);
    }

    #[test]
    fn test_rotated_corners_identity() {
        let dest = Rect::new(10.0, 20.0, 110.0, 70.0);
        let c = rotated_corners(&dest, Orientation::Deg0);
        assert_eq!(c[0], Point { x: 10.0, y: 20.0 });
        assert_eq!(c[2], Point { x: 110.0, y: 70.0 });
    }

    #[test]
    fn test_rotated_corners_180() {
        let dest = Rect::new(0.0, 0.0, 100.0, 50.0);
        let c = rotated_corners(&dest, Orientation::Deg180);
        assert_eq!(c[0], Point { x: 100.0, y: 50.0 });
        assert_eq!(c[1], Point { x: 0.0, y: 50.0 });
        assert_eq!(c[2], Point { x: 0.0, y: 0.0 });
        assert_eq!(c[3], Point { x: 100.0, y: 0.0 });
    }

    #[test]
    fn test_rotated_corners_90() {
        // portrait destination holding a rotated landscape frame
        let dest = Rect::new(0.0, 0.0, 50.0, 100.0);
        let c = rotated_corners(&dest, Orientation::Deg90);
        // top-left texel lands on the top-right corner of the rebuilt quad
        assert_eq!(c[0], Point { x: 75.0, y: 25.0 });
        assert_eq!(c[1], Point { x: 75.0, y: 75.0 });
        assert_eq!(c[2], Point { x: -25.0, y: 75.0 });
        assert_eq!(c[3], Point { x: -25.0, y: 25.0 });
    }

    #[test]
    fn test_fit_letterbox() {
        let window = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        let dest = fit_dest_rect(&window, 2.4, Orientation::Deg0, &ViewSettings::default());
        assert_eq!(dest, Rect::new(0.0, 140.0, 1920.0, 940.0));
    }

    #[test]
    fn test_fit_rotated() {
        let window = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        let dest = fit_dest_rect(&window, 16.0 / 9.0, Orientation::Deg90, &ViewSettings::default());
        assert_eq!(dest.height(), 1080.0);
        assert_eq!(dest.width(), 608.0);
    }

    #[test]
    fn test_orientation_from_degrees() {
        assert_eq!(Orientation::from_degrees(270), Orientation::Deg270);
        assert_eq!(Orientation::from_degrees(45), Orientation::Deg0);
    }
}
