//! Perspective rectification of the located sheet into an axis-aligned image.

use curling_sheet_core::{homography_from_4pt, warp_perspective_rgb, Homography, Quadrilateral};
use image::RgbImage;
use log::{debug, warn};
use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyParams {
    /// Lower bound for both output dimensions.
    pub min_side: u32,
}

impl Default for RectifyParams {
    fn default() -> Self {
        Self { min_side: 100 }
    }
}

/// Rectified sheet plus the mapping back into the source photo.
#[derive(Clone, Debug)]
pub struct RectifiedSheet {
    pub image: RgbImage,
    /// Maps rectified pixel coordinates into the source image.
    pub h_img_from_rect: Homography,
}

/// Output size from the longer of each pair of opposite edges, clamped
/// from below by `min_side`.
pub fn target_size(quad: &Quadrilateral, min_side: u32) -> (u32, u32) {
    let (w0, w1) = quad.widths();
    let (h0, h1) = quad.heights();
    let w = (w0.max(w1).round() as u32).max(min_side);
    let h = (h0.max(h1).round() as u32).max(min_side);
    (w, h)
}

/// Corners of a `w x h` output in TL, TR, BR, BL order.
fn rect_corners(w: u32, h: u32) -> [Point2<f32>; 4] {
    let (x1, y1) = ((w - 1) as f32, (h - 1) as f32);
    [
        Point2::new(0.0, 0.0),
        Point2::new(x1, 0.0),
        Point2::new(x1, y1),
        Point2::new(0.0, y1),
    ]
}

/// Solved transforms must be invertible and land every corner where asked.
fn is_usable(hm: &Homography, rect: &[Point2<f32>; 4], quad: &Quadrilateral) -> bool {
    hm.h.determinant().abs() > 1e-9
        && rect
            .iter()
            .zip(&quad.corners)
            .all(|(r, q)| (hm.apply(*r) - q).norm() < 0.5)
}

/// Axis-aligned stretch of the output onto the quad's bounding box; used
/// when the four corners do not define a projective transform.
fn bounding_box_mapping(quad: &Quadrilateral, w: u32, h: u32) -> Homography {
    let xs = quad.corners.map(|p| p.x);
    let ys = quad.corners.map(|p| p.y);
    let min_x = xs.iter().copied().fold(f32::INFINITY, f32::min);
    let max_x = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let min_y = ys.iter().copied().fold(f32::INFINITY, f32::min);
    let max_y = ys.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sx = ((max_x - min_x).max(1.0) / (w.max(2) - 1) as f32) as f64;
    let sy = ((max_y - min_y).max(1.0) / (h.max(2) - 1) as f32) as f64;
    Homography::new(Matrix3::new(
        sx,
        0.0,
        min_x as f64,
        0.0,
        sy,
        min_y as f64,
        0.0,
        0.0,
        1.0,
    ))
}

/// Warp the quadrilateral region of `img` into an upright rectangle.
///
/// Never fails: a tiny quad still yields at least `min_side` pixels per
/// side, and corners that admit no homography are mapped by their
/// bounding box instead.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(img, quad, params), fields(width = img.width(), height = img.height()))
)]
pub fn rectify_sheet(img: &RgbImage, quad: &Quadrilateral, params: &RectifyParams) -> RectifiedSheet {
    let (w, h) = target_size(quad, params.min_side.max(2));
    let rect = rect_corners(w, h);
    let solved = homography_from_4pt(&rect, &quad.corners).filter(|hm| is_usable(hm, &rect, quad));
    let h_img_from_rect = match solved {
        Some(hm) => hm,
        None => {
            warn!("sheet corners are degenerate, stretching their bounding box");
            bounding_box_mapping(quad, w, h)
        }
    };
    debug!("rectified size {w}x{h}");
    RectifiedSheet {
        image: warp_perspective_rgb(img, h_img_from_rect, w, h),
        h_img_from_rect,
    }
}
