//! Sheet boundary localisation on a downscaled working copy.

use curling_sheet_core::primitives::{
    adaptive_threshold, clahe, close_square, downscale_to_max_side, external_contours,
    gaussian_blur, rect_sides, to_gray, Contour,
};
use curling_sheet_core::Quadrilateral;
use image::RgbImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Parameters of the sheet boundary search.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetLocatorParams {
    /// Longest side of the working copy, in pixels.
    pub max_working_side: u32,
    pub blur_sigma: f32,
    /// CLAHE clip limit (relative to a flat histogram).
    pub clahe_clip_limit: f32,
    /// CLAHE tile grid, same count on both axes.
    pub clahe_tiles: u32,
    /// Half-width of the adaptive threshold averaging window.
    pub threshold_block_radius: u32,
    /// A pixel is foreground when brighter than its local mean by more than this.
    pub threshold_offset: i32,
    /// Closing kernel half-width (square kernel of side `2k+1`).
    pub close_radius: u8,
    pub close_iterations: usize,
    /// Contours below this fraction of the working image area are noise.
    pub min_area_frac: f64,
    /// Accepted long/short side ratio of the rotated rectangle.
    pub min_aspect: f32,
    pub max_aspect: f32,
}

impl Default for SheetLocatorParams {
    fn default() -> Self {
        Self {
            max_working_side: 1200,
            blur_sigma: 1.1,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            threshold_block_radius: 17,
            threshold_offset: 5,
            close_radius: 3,
            close_iterations: 2,
            min_area_frac: 0.02,
            min_aspect: 1.6,
            max_aspect: 12.0,
        }
    }
}

/// Errors returned by the sheet locator.
#[derive(thiserror::Error, Debug)]
pub enum LocateError {
    #[error("no sheet contour found")]
    NoSheetDetected,
}

/// Located sheet outline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SheetLocation {
    /// Ordered corners in full-resolution coordinates.
    pub quad: Quadrilateral,
    /// `working / original` scale used for the search.
    pub working_scale: f32,
    /// False when no contour passed the aspect filter and the largest
    /// contour was used instead.
    pub aspect_accepted: bool,
}

/// Find the rotated bounding quadrilateral of the playing surface.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(img, params), fields(width = img.width(), height = img.height()))
)]
pub fn locate_sheet(
    img: &RgbImage,
    params: &SheetLocatorParams,
) -> Result<SheetLocation, LocateError> {
    let (small, scale) = downscale_to_max_side(img, params.max_working_side);
    let gray = gaussian_blur(&to_gray(&small), params.blur_sigma);
    let equalized = clahe(
        &gray,
        params.clahe_clip_limit,
        params.clahe_tiles,
        params.clahe_tiles,
    );
    let binary = adaptive_threshold(
        &equalized,
        params.threshold_block_radius,
        params.threshold_offset,
    );
    let closed = close_square(&binary, params.close_radius, params.close_iterations);

    let contours = external_contours(&closed);
    if contours.is_empty() {
        return Err(LocateError::NoSheetDetected);
    }

    let image_area = small.width() as f64 * small.height() as f64;
    let min_area = params.min_area_frac * image_area;
    let areas: Vec<f64> = contours.iter().map(Contour::area).collect();

    let mut best: Option<(usize, f64)> = None;
    let mut survivors = 0usize;
    for (idx, (contour, &area)) in contours.iter().zip(&areas).enumerate() {
        if area < min_area {
            continue;
        }
        survivors += 1;
        let (long, short) = rect_sides(&contour.min_area_rect());
        if short <= 0.0 {
            continue;
        }
        let aspect = long / short;
        if aspect >= params.min_aspect
            && aspect <= params.max_aspect
            && best.is_none_or(|(_, a)| area > a)
        {
            best = Some((idx, area));
        }
    }
    debug!(
        "{} external contours, {} above area floor {:.0}",
        contours.len(),
        survivors,
        min_area
    );

    let (chosen, aspect_accepted) = match best {
        Some((idx, _)) => (idx, true),
        None => {
            warn!("no contour passed the aspect filter, using the largest contour");
            let idx = areas
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .ok_or(LocateError::NoSheetDetected)?;
            (idx, false)
        }
    };

    let rect = contours[chosen].min_area_rect();
    let quad = Quadrilateral::from_unordered(rect).scaled(1.0 / scale);
    debug!("sheet corners {:?}", quad.corners);

    Ok(SheetLocation {
        quad,
        working_scale: scale,
        aspect_accepted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn rotated_sheet(w: u32, h: u32, half: (f32, f32), angle_deg: f32) -> RgbImage {
        let (s, c) = angle_deg.to_radians().sin_cos();
        let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
        RgbImage::from_fn(w, h, |x, y| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let u = c * dx + s * dy;
            let v = -s * dx + c * dy;
            if u.abs() <= half.0 && v.abs() <= half.1 {
                Rgb([225, 228, 232])
            } else {
                Rgb([35, 30, 30])
            }
        })
    }

    #[test]
    fn finds_rotated_long_rectangle() {
        let img = rotated_sheet(600, 500, (220.0, 90.0), 15.0);
        let loc = locate_sheet(&img, &SheetLocatorParams::default()).expect("sheet");
        assert!(loc.aspect_accepted);
        assert_eq!(loc.working_scale, 1.0);
        let (w0, w1) = loc.quad.widths();
        let (h0, h1) = loc.quad.heights();
        let long = w0.max(w1).max(h0).max(h1);
        let short = w0.min(w1).min(h0).min(h1);
        assert!((long - 440.0).abs() < 8.0, "long side {long}");
        assert!((short - 180.0).abs() < 8.0, "short side {short}");
        let cx = loc.quad.corners.iter().map(|p| p.x).sum::<f32>() / 4.0;
        let cy = loc.quad.corners.iter().map(|p| p.y).sum::<f32>() / 4.0;
        assert!((cx - 300.0).abs() < 3.0 && (cy - 250.0).abs() < 3.0);
    }

    #[test]
    fn rescales_corners_to_full_resolution() {
        let img = rotated_sheet(1600, 1000, (600.0, 200.0), 0.0);
        let params = SheetLocatorParams {
            max_working_side: 800,
            ..SheetLocatorParams::default()
        };
        let loc = locate_sheet(&img, &params).expect("sheet");
        assert!((loc.working_scale - 0.5).abs() < 1e-6);
        let tl = loc.quad.top_left();
        let br = loc.quad.bottom_right();
        assert!((tl.x - 200.0).abs() < 8.0 && (tl.y - 300.0).abs() < 8.0, "{tl:?}");
        assert!((br.x - 1400.0).abs() < 8.0 && (br.y - 700.0).abs() < 8.0, "{br:?}");
    }

    #[test]
    fn square_blob_falls_back_to_largest_contour() {
        let img = rotated_sheet(400, 400, (100.0, 100.0), 0.0);
        let loc = locate_sheet(&img, &SheetLocatorParams::default()).expect("fallback");
        assert!(!loc.aspect_accepted);
    }

    #[test]
    fn blank_image_has_no_sheet() {
        let img = RgbImage::from_pixel(300, 200, Rgb([128, 128, 128]));
        let err = locate_sheet(&img, &SheetLocatorParams::default()).unwrap_err();
        assert!(matches!(err, LocateError::NoSheetDetected));
    }
}
