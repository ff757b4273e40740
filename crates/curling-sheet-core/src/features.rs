use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// A circle in image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircleFeature {
    pub x: f32,
    pub y: f32,
    pub r: f32,
}

impl CircleFeature {
    pub fn center(&self) -> Point2<f32> {
        Point2::new(self.x, self.y)
    }
}

/// A straight segment with its acute angle to the horizontal.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    pub p1: Point2<f32>,
    pub p2: Point2<f32>,
    pub length: f32,
    /// Acute angle to the x-axis in degrees, always in `[0, 90)`.
    pub angle_deg: f32,
}

/// Fold a direction angle (any sign, any turn) into `[0, 90)`.
///
/// A segment and its 180° twin map to the same value, as do mirror
/// images across the horizontal.
pub fn acute_angle_deg(dx: f32, dy: f32) -> f32 {
    // Folding the inputs keeps twins bit-identical.
    let a = dy.abs().atan2(dx.abs()).to_degrees(); // [0, 90]
    if a >= 90.0 {
        // Exactly vertical folds onto the largest representable value.
        f32::from_bits(90.0_f32.to_bits() - 1)
    } else {
        a
    }
}

impl LineSegment {
    pub fn new(p1: Point2<f32>, p2: Point2<f32>) -> Self {
        let d = p2 - p1;
        Self {
            p1,
            p2,
            length: d.norm(),
            angle_deg: acute_angle_deg(d.x, d.y),
        }
    }

    pub fn midpoint(&self) -> Point2<f32> {
        Point2::new(0.5 * (self.p1.x + self.p2.x), 0.5 * (self.p1.y + self.p2.y))
    }

    /// x of the segment at height `y`, clamped to the segment's extent.
    pub fn x_at_y(&self, y: f32) -> f32 {
        let dy = self.p2.y - self.p1.y;
        if dy.abs() < f32::EPSILON {
            return 0.5 * (self.p1.x + self.p2.x);
        }
        let t = ((y - self.p1.y) / dy).clamp(0.0, 1.0);
        self.p1.x + t * (self.p2.x - self.p1.x)
    }
}
