//! Four-corner sheet outline with a permutation-independent corner order.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Quadrilateral with corners ordered TL, TR, BR, BL.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quadrilateral {
    pub corners: [Point2<f32>; 4],
}

/// `(x + y, y - x)` of a point.
fn sum_diff(p: &Point2<f32>) -> (f32, f32) {
    (p.x + p.y, p.y - p.x)
}

fn lex(a: (f32, f32), b: (f32, f32)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1))
}

impl Quadrilateral {
    /// Order four points by coordinate sums and differences.
    ///
    /// TL has the smallest `x + y`, BR the largest; TR has the smallest
    /// `y - x`, BL the largest. Ties on one key are settled by the other
    /// (a square at 45° keeps four distinct corners). When one point still
    /// wins two slots the corners are taken clockwise around the centroid,
    /// starting from TL. The result does not depend on input order.
    pub fn from_unordered(pts: [Point2<f32>; 4]) -> Self {
        let mut pts = pts;
        pts.sort_by(|a, b| lex((a.x, a.y), (b.x, b.y)));

        let pick = |key: fn(&Point2<f32>) -> (f32, f32), smallest: bool| {
            let mut best = pts[0];
            for p in &pts[1..] {
                let ord = lex(key(p), key(&best));
                if (smallest && ord == Ordering::Less) || (!smallest && ord == Ordering::Greater) {
                    best = *p;
                }
            }
            best
        };
        let tl = pick(sum_diff, true);
        let br = pick(sum_diff, false);
        let tr = pick(|p| (p.y - p.x, -(p.x + p.y)), true);
        let bl = pick(|p| (p.y - p.x, -(p.x + p.y)), false);
        let corners = [tl, tr, br, bl];

        let distinct = (0..4).all(|i| (i + 1..4).all(|j| corners[i] != corners[j]));
        if distinct {
            return Self { corners };
        }
        Self {
            corners: Self::clockwise_from(pts, tl),
        }
    }

    /// Sort by angle around the centroid (clockwise on screen, y down) and
    /// rotate so `first` leads.
    fn clockwise_from(mut pts: [Point2<f32>; 4], first: Point2<f32>) -> [Point2<f32>; 4] {
        let cx = pts.iter().map(|p| p.x).sum::<f32>() / 4.0;
        let cy = pts.iter().map(|p| p.y).sum::<f32>() / 4.0;
        pts.sort_by(|a, b| {
            let ta = (a.y - cy).atan2(a.x - cx);
            let tb = (b.y - cy).atan2(b.x - cx);
            ta.total_cmp(&tb).then(lex((a.x, a.y), (b.x, b.y)))
        });
        let lead = pts.iter().position(|p| *p == first).unwrap_or(0);
        pts.rotate_left(lead);
        pts
    }

    #[inline]
    pub fn top_left(&self) -> Point2<f32> {
        self.corners[0]
    }

    #[inline]
    pub fn top_right(&self) -> Point2<f32> {
        self.corners[1]
    }

    #[inline]
    pub fn bottom_right(&self) -> Point2<f32> {
        self.corners[2]
    }

    #[inline]
    pub fn bottom_left(&self) -> Point2<f32> {
        self.corners[3]
    }

    /// Multiply every coordinate by `factor` (working copy → full resolution).
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            corners: self.corners.map(|p| Point2::new(p.x * factor, p.y * factor)),
        }
    }

    /// Top and bottom edge lengths.
    pub fn widths(&self) -> (f32, f32) {
        (
            (self.top_right() - self.top_left()).norm(),
            (self.bottom_right() - self.bottom_left()).norm(),
        )
    }

    /// Left and right edge lengths.
    pub fn heights(&self) -> (f32, f32) {
        (
            (self.bottom_left() - self.top_left()).norm(),
            (self.bottom_right() - self.top_right()).norm(),
        )
    }
}
