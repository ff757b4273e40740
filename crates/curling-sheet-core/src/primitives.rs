//! Imaging primitives consumed by the detection stages.
//!
//! Thin wrappers over `image`/`imageproc` plus a few operations with
//! semantics those crates do not match: tile-blended contrast
//! equalization, a mean-offset adaptive threshold and OpenCV-scaled HSV.
//! Stages above this module only rely on the contracts documented here:
//!
//! - binary masks are `GrayImage`s holding 0 or 255;
//! - all coordinates are pixel indices with the origin at the top-left;
//! - hue is on the 0..180 scale, saturation and value on 0..255.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::geometry::contour_area;
use imageproc::point::Point;
use nalgebra::Point2;

pub use imageproc::hough::PolarLine;

/// Luma conversion.
pub fn to_gray(img: &RgbImage) -> GrayImage {
    imageops::grayscale(img)
}

/// Gaussian blur; a non-positive sigma returns a copy.
pub fn gaussian_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return img.clone();
    }
    imageproc::filter::gaussian_blur_f32(img, sigma)
}

/// Resize so that the longest side is at most `max_side`.
///
/// Returns the (possibly unchanged) image and the applied scale factor
/// `working / original`.
pub fn downscale_to_max_side(img: &RgbImage, max_side: u32) -> (RgbImage, f32) {
    let longest = img.width().max(img.height());
    if max_side == 0 || longest <= max_side {
        return (img.clone(), 1.0);
    }
    let scale = max_side as f32 / longest as f32;
    let w = ((img.width() as f32 * scale) as u32).max(1);
    let h = ((img.height() as f32 * scale) as u32).max(1);
    (imageops::resize(img, w, h, FilterType::Triangle), scale)
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into `tiles_x × tiles_y` tiles; each tile gets a
/// clipped, redistributed histogram and the resulting lookup tables are
/// blended bilinearly between neighbouring tile centers.
pub fn clahe(img: &GrayImage, clip_limit: f32, tiles_x: u32, tiles_y: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let tx = tiles_x.clamp(1, w) as usize;
    let ty = tiles_y.clamp(1, h) as usize;
    let bounds = |n: usize, total: u32, i: usize| -> (u32, u32) {
        let a = (i as u64 * total as u64 / n as u64) as u32;
        let b = ((i as u64 + 1) * total as u64 / n as u64) as u32;
        (a, b)
    };

    let mut luts = vec![[0u8; 256]; tx * ty];
    for j in 0..ty {
        let (y0, y1) = bounds(ty, h, j);
        for i in 0..tx {
            let (x0, x1) = bounds(tx, w, i);
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[img.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)).max(1);
            let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for v in hist.iter_mut() {
                if *v > limit {
                    excess += *v - limit;
                    *v = limit;
                }
            }
            let bonus = excess / 256;
            let residual = (excess % 256) as usize;
            for (k, v) in hist.iter_mut().enumerate() {
                *v += bonus + u32::from(k < residual);
            }
            let lut = &mut luts[j * tx + i];
            let mut cdf = 0u32;
            for (k, v) in hist.iter().enumerate() {
                cdf += v;
                lut[k] = ((cdf as f32 * 255.0 / area as f32).round()).min(255.0) as u8;
            }
        }
    }

    let tile_w = w as f32 / tx as f32;
    let tile_h = h as f32 / ty as f32;
    let neighbours = |pos: f32, size: f32, n: usize| -> (usize, usize, f32) {
        let f = pos / size - 0.5;
        if f <= 0.0 {
            return (0, 0, 0.0);
        }
        let i0 = f.floor() as usize;
        if i0 + 1 >= n {
            return (n - 1, n - 1, 0.0);
        }
        (i0, i0 + 1, f - i0 as f32)
    };

    GrayImage::from_fn(w, h, |x, y| {
        let v = img.get_pixel(x, y)[0] as usize;
        let (i0, i1, ax) = neighbours(x as f32 + 0.5, tile_w, tx);
        let (j0, j1, ay) = neighbours(y as f32 + 0.5, tile_h, ty);
        let l = |i: usize, j: usize| luts[j * tx + i][v] as f32;
        let top = l(i0, j0) * (1.0 - ax) + l(i1, j0) * ax;
        let bottom = l(i0, j1) * (1.0 - ax) + l(i1, j1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

/// Local-mean binarization: 255 where `p > mean(block) + offset`.
///
/// `block_radius` is the half-width of the square averaging window.
pub fn adaptive_threshold(img: &GrayImage, block_radius: u32, offset: i32) -> GrayImage {
    let means = imageproc::filter::box_filter(img, block_radius, block_radius);
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y)[0] as i32;
        let m = means.get_pixel(x, y)[0] as i32;
        Luma([if p > m + offset { 255 } else { 0 }])
    })
}

/// Global threshold picked by Otsu's method.
pub fn otsu_level(img: &GrayImage) -> u8 {
    imageproc::contrast::otsu_level(img)
}

/// 255 where `p > level`.
pub fn binarize(img: &GrayImage, level: u8) -> GrayImage {
    threshold(img, level, ThresholdType::Binary)
}

/// Swap foreground and background of a 0/255 mask.
pub fn invert(mask: &GrayImage) -> GrayImage {
    threshold(mask, 127, ThresholdType::BinaryInverted)
}

/// Morphological closing with a `(2k+1)²` square, applied `iterations` times.
pub fn close_square(mask: &GrayImage, k: u8, iterations: usize) -> GrayImage {
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = imageproc::morphology::close(&out, Norm::LInf, k);
    }
    out
}

/// Morphological opening with a `(2k+1)²` diamond, applied `iterations` times.
pub fn open_diamond(mask: &GrayImage, k: u8, iterations: usize) -> GrayImage {
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = imageproc::morphology::open(&out, Norm::L1, k);
    }
    out
}

pub fn canny(img: &GrayImage, low: f32, high: f32) -> GrayImage {
    imageproc::edges::canny(img, low, high)
}

/// Horizontal and vertical Sobel responses.
pub fn sobel_gradients(
    img: &GrayImage,
) -> (
    image::ImageBuffer<Luma<i16>, Vec<i16>>,
    image::ImageBuffer<Luma<i16>, Vec<i16>>,
) {
    (
        imageproc::gradients::horizontal_sobel(img),
        imageproc::gradients::vertical_sobel(img),
    )
}

/// Infinite lines voted by the standard Hough transform over a binary mask.
///
/// `r = x·cos θ + y·sin θ` with θ in whole degrees `[0, 180)`.
pub fn hough_lines(edges: &GrayImage, vote_threshold: u32, suppression_radius: u32) -> Vec<PolarLine> {
    imageproc::hough::detect_lines(
        edges,
        imageproc::hough::LineDetectionOptions {
            vote_threshold,
            suppression_radius,
        },
    )
}

/// HSV on the OpenCV 8-bit scale: H in `0..180`, S and V in `0..=255`.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let r = rgb[0] as f32;
    let g = rgb[1] as f32;
    let b = rgb[2] as f32;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut hue = if delta <= 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }
    [
        ((hue / 2.0).round() as u32 % 180) as u8,
        s.round() as u8,
        max as u8,
    ]
}

/// A top-level outer border traced in a binary mask.
#[derive(Clone, Debug)]
pub struct Contour {
    pub points: Vec<Point<i32>>,
}

/// Outer borders of connected foreground regions not enclosed by any other
/// region (hole contents are skipped).
pub fn external_contours(mask: &GrayImage) -> Vec<Contour> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter(|c| !c.points.is_empty())
        .map(|c| Contour { points: c.points })
        .collect()
}

impl Contour {
    /// Polygon area enclosed by the traced border.
    pub fn area(&self) -> f64 {
        if self.points.len() < 3 {
            return 0.0;
        }
        contour_area(&self.points).abs()
    }

    /// Axis-aligned bounding box as `(x, y, width, height)`.
    pub fn bounding_rect(&self) -> (u32, u32, u32, u32) {
        let (mut x0, mut y0) = (i32::MAX, i32::MAX);
        let (mut x1, mut y1) = (i32::MIN, i32::MIN);
        for p in &self.points {
            x0 = x0.min(p.x);
            y0 = y0.min(p.y);
            x1 = x1.max(p.x);
            y1 = y1.max(p.y);
        }
        (
            x0.max(0) as u32,
            y0.max(0) as u32,
            (x1 - x0 + 1).max(1) as u32,
            (y1 - y0 + 1).max(1) as u32,
        )
    }

    /// Minimal-area rotated rectangle, corners in hull order.
    pub fn min_area_rect(&self) -> [Point2<f32>; 4] {
        let mut distinct = self.points.clone();
        distinct.sort_by_key(|p| (p.x, p.y));
        distinct.dedup();
        if distinct.len() < 3 {
            let (x, y, w, h) = self.bounding_rect();
            let (x, y) = (x as f32, y as f32);
            let (x1, y1) = (x + w as f32 - 1.0, y + h as f32 - 1.0);
            return [
                Point2::new(x, y),
                Point2::new(x1, y),
                Point2::new(x1, y1),
                Point2::new(x, y1),
            ];
        }
        imageproc::geometry::min_area_rect(&distinct).map(|p| Point2::new(p.x as f32, p.y as f32))
    }
}

/// Side lengths `(long, short)` of a rotated rectangle given by its corners.
pub fn rect_sides(corners: &[Point2<f32>; 4]) -> (f32, f32) {
    let a = (corners[1] - corners[0]).norm();
    let b = (corners[2] - corners[1]).norm();
    (a.max(b), a.min(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_rect(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            Luma([if x >= x0 && x < x1 && y >= y0 && y < y1 { 255 } else { 0 }])
        })
    }

    #[test]
    fn hsv_matches_opencv_scale() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
        // Hue wraps: a slightly blue-ish red lands near 180.
        assert!(rgb_to_hsv([255, 0, 20])[0] > 170);
    }

    #[test]
    fn external_contours_skip_nested_regions() {
        let mut mask = filled_rect(60, 60, 5, 5, 55, 55);
        for y in 15..45 {
            for x in 15..45 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        for y in 25..35 {
            for x in 25..35 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let contours = external_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].bounding_rect(), (5, 5, 50, 50));
        let area = contours[0].area();
        assert!((area - 49.0 * 49.0).abs() < 1.0, "area {area}");
    }

    #[test]
    fn binarize_and_invert_are_complementary() {
        let img = GrayImage::from_fn(4, 1, |x, _| Luma([[0, 99, 100, 250][x as usize]]));
        let mask = binarize(&img, 99);
        assert_eq!(mask.as_raw(), &vec![0, 0, 255, 255]);
        assert_eq!(invert(&mask).as_raw(), &vec![255, 255, 0, 0]);
    }

    #[test]
    fn triangle_area_ignores_winding() {
        let ccw = Contour {
            points: vec![Point::new(0, 0), Point::new(10, 0), Point::new(0, 6)],
        };
        let cw = Contour {
            points: ccw.points.iter().rev().copied().collect(),
        };
        assert_eq!(ccw.area(), 30.0);
        assert_eq!(cw.area(), 30.0);
        let degenerate = Contour {
            points: vec![Point::new(3, 3), Point::new(4, 3)],
        };
        assert_eq!(degenerate.area(), 0.0);
    }

    #[test]
    fn min_area_rect_of_axis_aligned_block() {
        let mask = filled_rect(50, 40, 10, 5, 40, 25);
        let contours = external_contours(&mask);
        let rect = contours[0].min_area_rect();
        let (long, short) = rect_sides(&rect);
        assert!((long - 29.0).abs() < 1.01, "long {long}");
        assert!((short - 19.0).abs() < 1.01, "short {short}");
    }

    #[test]
    fn adaptive_threshold_marks_bright_side_of_edges_only() {
        let img = GrayImage::from_fn(80, 40, |x, _| Luma([if x < 40 { 40 } else { 220 }]));
        let bin = adaptive_threshold(&img, 5, 5);
        // Uniform regions stay background.
        assert_eq!(bin.get_pixel(5, 20)[0], 0);
        assert_eq!(bin.get_pixel(70, 20)[0], 0);
        // Bright side next to the step is foreground.
        assert_eq!(bin.get_pixel(41, 20)[0], 255);
        assert_eq!(bin.get_pixel(38, 20)[0], 0);
    }

    #[test]
    fn clahe_keeps_uniform_images_uniform() {
        let img = GrayImage::from_pixel(64, 48, Luma([90]));
        let out = clahe(&img, 2.0, 8, 8);
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn clahe_stretches_low_contrast_gradient() {
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x / 8) as u8]));
        let out = clahe(&img, 4.0, 2, 2);
        let lo = out.get_pixel(0, 10)[0];
        let hi = out.get_pixel(63, 10)[0];
        assert!(hi as i32 - lo as i32 > 7, "lo {lo} hi {hi}");
    }

    #[test]
    fn downscale_caps_longest_side() {
        let img = RgbImage::new(2400, 1200);
        let (small, scale) = downscale_to_max_side(&img, 1200);
        assert_eq!(small.dimensions(), (1200, 600));
        assert!((scale - 0.5).abs() < 1e-6);
        let (same, s1) = downscale_to_max_side(&small, 1200);
        assert_eq!(same.dimensions(), (1200, 600));
        assert_eq!(s1, 1.0);
    }
}
