use curling_sheet_core::primitives::{canny, gaussian_blur, to_gray};
use curling_sheet_core::{CircleFeature, Deadline};
use image::{imageops, RgbImage};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::hough::{detect_circles, CircleVoteParams};

/// Parameters for house ring detection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HouseDetectorParams {
    /// Search band as fractions of image height, `[top, bottom)`.
    pub band_top_frac: f32,
    pub band_bottom_frac: f32,
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Radius bounds relative to the band's shorter side.
    pub min_radius_frac: f32,
    pub max_radius_frac: f32,
    /// Candidates farther than this fraction of width/height from the
    /// median centre are dropped.
    pub cluster_frac: f32,
    pub voting: CircleVoteParams,
}

impl Default for HouseDetectorParams {
    fn default() -> Self {
        Self {
            band_top_frac: 0.15,
            band_bottom_frac: 0.65,
            blur_sigma: 1.5,
            canny_low: 60.0,
            canny_high: 180.0,
            min_radius_frac: 0.08,
            max_radius_frac: 0.45,
            cluster_frac: 0.06,
            voting: CircleVoteParams::default(),
        }
    }
}

/// House rings found on the sheet. Everything empty when no ring was seen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HouseGeometry {
    /// Mean of the member circle centres.
    #[serde(rename = "center_px")]
    pub center: Option<Point2<f32>>,
    /// Member radii, ascending.
    #[serde(rename = "radii_px")]
    pub radii: Vec<f32>,
    #[serde(rename = "circles_px")]
    pub circles: Vec<CircleFeature>,
}

impl HouseGeometry {
    pub fn is_absent(&self) -> bool {
        self.center.is_none()
    }

    /// Build from surviving circles: sort by radius and average the centres.
    fn from_members(mut circles: Vec<CircleFeature>) -> Self {
        if circles.is_empty() {
            return Self::default();
        }
        circles.sort_by(|a, b| a.r.total_cmp(&b.r));
        let n = circles.len() as f32;
        let (sx, sy) = circles
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), c| (sx + c.x, sy + c.y));
        Self {
            center: Some(Point2::new(sx / n, sy / n)),
            radii: circles.iter().map(|c| c.r).collect(),
            circles,
        }
    }
}

fn median(mut values: Vec<f32>) -> f32 {
    values.sort_by(f32::total_cmp);
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Keep candidates near the median centre; all of them if none qualify.
pub fn cluster_concentric(
    candidates: Vec<CircleFeature>,
    width: u32,
    height: u32,
    frac: f32,
) -> Vec<CircleFeature> {
    if candidates.len() <= 1 {
        return candidates;
    }
    let mx = median(candidates.iter().map(|c| c.x).collect());
    let my = median(candidates.iter().map(|c| c.y).collect());
    let (tx, ty) = (frac * width as f32, frac * height as f32);
    let kept: Vec<CircleFeature> = candidates
        .iter()
        .filter(|c| (c.x - mx).abs() < tx && (c.y - my).abs() < ty)
        .copied()
        .collect();
    if kept.is_empty() {
        debug!("median filter rejected all {} circles, keeping them", candidates.len());
        candidates
    } else {
        kept
    }
}

/// Detect the concentric house rings inside the central band of a cropped sheet.
pub fn detect_house(img: &RgbImage, params: &HouseDetectorParams) -> HouseGeometry {
    detect_house_until(img, params, &Deadline::never())
}

/// [`detect_house`] that gives up on circle voting once `deadline` passes.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(img, params, deadline), fields(width = img.width(), height = img.height()))
)]
pub fn detect_house_until(
    img: &RgbImage,
    params: &HouseDetectorParams,
    deadline: &Deadline,
) -> HouseGeometry {
    let (w, h) = img.dimensions();
    let y0 = (params.band_top_frac * h as f32) as u32;
    let y1 = ((params.band_bottom_frac * h as f32) as u32).min(h);
    if y1 <= y0 || w == 0 {
        return HouseGeometry::default();
    }

    let band = imageops::crop_imm(img, 0, y0, w, y1 - y0).to_image();
    let gray = gaussian_blur(&to_gray(&band), params.blur_sigma);
    let edges = canny(&gray, params.canny_low, params.canny_high);

    let short_side = w.min(y1 - y0) as f32;
    let min_r = ((params.min_radius_frac * short_side) as u32).max(1);
    let max_r = (params.max_radius_frac * short_side) as u32;

    let candidates: Vec<CircleFeature> =
        detect_circles(&gray, &edges, min_r, max_r, &params.voting, deadline)
            .into_iter()
            .map(|s| CircleFeature {
                y: s.circle.y + y0 as f32,
                ..s.circle
            })
            .collect();
    debug!(
        "band rows {y0}..{y1}, radius {min_r}..={max_r}: {} candidates",
        candidates.len()
    );

    let house = HouseGeometry::from_members(cluster_concentric(
        candidates,
        w,
        h,
        params.cluster_frac,
    ));
    if let Some(c) = house.center {
        debug!("house centre ({:.1}, {:.1}), radii {:?}", c.x, c.y, house.radii);
    }
    house
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::Rgb;

    fn circle(x: f32, y: f32, r: f32) -> CircleFeature {
        CircleFeature { x, y, r }
    }

    fn sheet_with_rings(w: u32, h: u32, cx: f32, cy: f32, radii: &[f32]) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let d = (x as f32 - cx).hypot(y as f32 - cy);
            if radii.iter().any(|r| (d - r).abs() <= 1.5) {
                Rgb([30, 30, 40])
            } else {
                Rgb([232, 234, 236])
            }
        })
    }

    #[test]
    fn blank_sheet_has_no_house() {
        let img = RgbImage::from_pixel(300, 600, Rgb([240, 240, 240]));
        let house = detect_house(&img, &HouseDetectorParams::default());
        assert!(house.is_absent());
        assert!(house.radii.is_empty() && house.circles.is_empty());
    }

    #[test]
    fn finds_rings_in_band_with_full_image_coordinates() {
        let img = sheet_with_rings(400, 600, 200.0, 240.0, &[30.0, 60.0, 90.0]);
        let house = detect_house(&img, &HouseDetectorParams::default());
        let c = house.center.expect("house");
        assert!((c.x - 200.0).abs() < 2.0 && (c.y - 240.0).abs() < 2.0, "{c:?}");
        assert_eq!(house.radii.len(), 3, "{:?}", house.radii);
        for (got, want) in house.radii.iter().zip([30.0, 60.0, 90.0]) {
            assert!((got - want).abs() < 3.0, "{:?}", house.radii);
        }
        assert!(house.radii.windows(2).all(|p| p[0] <= p[1]));
    }

    #[test]
    fn passed_deadline_gives_an_absent_house() {
        let img = sheet_with_rings(400, 600, 200.0, 240.0, &[30.0, 60.0, 90.0]);
        let passed = Deadline::at(std::time::Instant::now());
        let house = detect_house_until(&img, &HouseDetectorParams::default(), &passed);
        assert!(house.is_absent());
    }

    #[test]
    fn rings_outside_band_are_ignored() {
        // Centre at 5% of height: the band starts at 15%.
        let img = sheet_with_rings(400, 600, 200.0, 30.0, &[20.0]);
        assert!(detect_house(&img, &HouseDetectorParams::default()).is_absent());
    }

    #[test]
    fn clustering_drops_outliers() {
        let cands = vec![
            circle(100.0, 100.0, 30.0),
            circle(101.0, 99.0, 60.0),
            circle(99.0, 101.0, 90.0),
            circle(300.0, 40.0, 25.0),
        ];
        let kept = cluster_concentric(cands, 400, 400, 0.06);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|c| c.x < 200.0));
    }

    #[test]
    fn clustering_falls_back_to_all_candidates() {
        let cands = vec![circle(10.0, 10.0, 30.0), circle(300.0, 300.0, 40.0)];
        let kept = cluster_concentric(cands.clone(), 400, 400, 0.06);
        assert_eq!(kept, cands);
    }

    #[test]
    fn geometry_sorts_radii_and_averages_centres() {
        let g = HouseGeometry::from_members(vec![
            circle(10.0, 20.0, 50.0),
            circle(12.0, 22.0, 10.0),
            circle(11.0, 21.0, 30.0),
        ]);
        assert_eq!(g.radii, vec![10.0, 30.0, 50.0]);
        let c = g.center.expect("centre");
        assert_abs_diff_eq!(c.x, 11.0, epsilon = 1e-5);
        assert_abs_diff_eq!(c.y, 21.0, epsilon = 1e-5);
    }

    #[test]
    fn serializes_with_pixel_suffixes() {
        let g = HouseGeometry::from_members(vec![circle(1.0, 2.0, 3.0)]);
        let v = serde_json::to_value(&g).unwrap();
        assert_eq!(v["center_px"], serde_json::json!([1.0, 2.0]));
        assert_eq!(v["radii_px"], serde_json::json!([3.0]));
        assert_eq!(v["circles_px"][0]["r"], serde_json::json!(3.0));
        let absent = serde_json::to_value(HouseGeometry::default()).unwrap();
        assert!(absent["center_px"].is_null());
    }
}
