//! Long straight segments: Hough seeds refined by least squares, then
//! split wherever the supporting edges leave a gap.

use curling_sheet_core::primitives::{canny, gaussian_blur, hough_lines, to_gray, PolarLine};
use curling_sheet_core::{Deadline, LineSegment};
use image::{GrayImage, Luma, RgbImage};
use log::debug;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// How the width- and height-relative minimum lengths combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinLengthRule {
    /// Every segment needs the larger of the two.
    #[default]
    Larger,
    /// Every segment needs the smaller of the two.
    Smaller,
    /// Mostly-horizontal segments need the width share, mostly-vertical
    /// ones the height share.
    PerOrientation,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentParams {
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Hough accumulator votes needed to seed a line.
    pub seed_votes: u32,
    /// Non-maximum suppression radius in the Hough accumulator.
    pub seed_suppression: u32,
    /// Edge pixels this close to the image border are ignored.
    pub border_margin_px: u32,
    /// Edge pixels within this distance of a line support it. Wider than a
    /// painted stroke so both of its edges are fitted together and the
    /// refined line runs down the middle of the stroke.
    pub gather_band_px: f32,
    pub refine_iterations: usize,
    /// Largest hole allowed inside one segment.
    pub max_gap_px: f32,
    pub min_length_width_frac: f32,
    pub min_length_height_frac: f32,
    pub min_length_rule: MinLengthRule,
    /// Segments closer than these tolerances describe the same line.
    pub duplicate_angle_deg: f32,
    pub duplicate_offset_px: f32,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            canny_low: 40.0,
            canny_high: 120.0,
            seed_votes: 120,
            seed_suppression: 8,
            border_margin_px: 3,
            gather_band_px: 6.0,
            refine_iterations: 2,
            max_gap_px: 18.0,
            min_length_width_frac: 0.4,
            min_length_height_frac: 0.6,
            min_length_rule: MinLengthRule::Larger,
            duplicate_angle_deg: 2.0,
            duplicate_offset_px: 4.0,
        }
    }
}

impl SegmentParams {
    /// Minimum accepted length for a segment at `angle_deg` in a `w x h` image.
    pub fn min_length(&self, w: u32, h: u32, angle_deg: f32) -> f32 {
        let by_width = self.min_length_width_frac * w as f32;
        let by_height = self.min_length_height_frac * h as f32;
        match self.min_length_rule {
            MinLengthRule::Larger => by_width.max(by_height),
            MinLengthRule::Smaller => by_width.min(by_height),
            MinLengthRule::PerOrientation if angle_deg >= 45.0 => by_height,
            MinLengthRule::PerOrientation => by_width,
        }
    }

    /// Smallest length any segment could be accepted with.
    fn length_floor(&self, w: u32, h: u32) -> f32 {
        match self.min_length_rule {
            MinLengthRule::Larger => self.min_length(w, h, 0.0),
            _ => (self.min_length_width_frac * w as f32).min(self.min_length_height_frac * h as f32),
        }
    }
}

/// Infinite line through `origin` along the unit vector `dir`.
#[derive(Clone, Copy, Debug)]
struct Line {
    origin: Point2<f32>,
    dir: Vector2<f32>,
}

impl Line {
    fn from_polar(p: &PolarLine) -> Self {
        let theta = (p.angle_in_degrees as f32).to_radians();
        let (s, c) = theta.sin_cos();
        Self {
            origin: Point2::new(p.r * c, p.r * s),
            dir: Vector2::new(-s, c),
        }
    }

    fn normal(&self) -> Vector2<f32> {
        Vector2::new(-self.dir.y, self.dir.x)
    }

    fn distance(&self, p: &Point2<f32>) -> f32 {
        self.normal().dot(&(p - self.origin)).abs()
    }

    fn along(&self, p: &Point2<f32>) -> f32 {
        self.dir.dot(&(p - self.origin))
    }

    fn at(&self, t: f32) -> Point2<f32> {
        self.origin + self.dir * t
    }
}

/// Total least squares line through `points`.
fn fit_line(points: &[Point2<f32>]) -> Option<Line> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0f64, 0.0f64), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
    let (mx, my) = (sx / n, sy / n);
    let (mut sxx, mut sxy, mut syy) = (0.0f64, 0.0f64, 0.0f64);
    for p in points {
        let (dx, dy) = (p.x as f64 - mx, p.y as f64 - my);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx + syy <= f64::EPSILON {
        return None;
    }
    // Principal axis of the scatter matrix.
    let phi = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(Line {
        origin: Point2::new(mx as f32, my as f32),
        dir: Vector2::new(phi.cos() as f32, phi.sin() as f32),
    })
}

fn gather(points: &[Point2<f32>], line: &Line, band: f32) -> Vec<Point2<f32>> {
    points
        .iter()
        .filter(|p| line.distance(p) <= band)
        .copied()
        .collect()
}

/// Edge map with a cleared border, plus its foreground pixel list.
fn edge_points(img: &RgbImage, params: &SegmentParams) -> (GrayImage, Vec<Point2<f32>>) {
    let gray = gaussian_blur(&to_gray(img), params.blur_sigma);
    let mut edges = canny(&gray, params.canny_low, params.canny_high);
    let (w, h) = edges.dimensions();
    let m = params.border_margin_px;
    let mut points = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if edges.get_pixel(x, y)[0] == 0 {
                continue;
            }
            if x < m || y < m || x + m >= w || y + m >= h {
                edges.put_pixel(x, y, Luma([0]));
            } else {
                points.push(Point2::new(x as f32, y as f32));
            }
        }
    }
    (edges, points)
}

/// Split the support of `line` into runs with gaps no larger than `max_gap`
/// and return those spanning at least `min_len`, refitted per run.
fn walk_runs(
    support: &[Point2<f32>],
    line: &Line,
    max_gap: f32,
    min_len: f32,
) -> Vec<LineSegment> {
    let mut along: Vec<(f32, Point2<f32>)> = support.iter().map(|p| (line.along(p), *p)).collect();
    along.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=along.len() {
        let split = i == along.len() || along[i].0 - along[i - 1].0 > max_gap;
        if !split {
            continue;
        }
        let run = &along[start..i];
        start = i;
        let (Some(first), Some(last)) = (run.first(), run.last()) else {
            continue;
        };
        if last.0 - first.0 < min_len {
            continue;
        }
        let pts: Vec<Point2<f32>> = run.iter().map(|(_, p)| *p).collect();
        let fitted = fit_line(&pts).unwrap_or(*line);
        let p1 = fitted.at(fitted.along(&first.1));
        let p2 = fitted.at(fitted.along(&last.1));
        out.push(LineSegment::new(p1, p2));
    }
    out
}

fn same_line(a: &LineSegment, b: &LineSegment, params: &SegmentParams) -> bool {
    if (a.angle_deg - b.angle_deg).abs() > params.duplicate_angle_deg {
        return false;
    }
    let Some(dir) = (a.p2 - a.p1).try_normalize(f32::EPSILON) else {
        return false;
    };
    let line = Line { origin: a.p1, dir };
    if line.distance(&b.midpoint()) > params.duplicate_offset_px {
        return false;
    }
    let (a0, a1) = (0.0, a.length);
    let (t1, t2) = (line.along(&b.p1), line.along(&b.p2));
    t1.min(t2) <= a1 && t1.max(t2) >= a0
}

/// Long straight segments of the image, longest first.
///
/// Every returned segment already satisfies the configured minimum length
/// for its orientation.
pub fn extract_segments(img: &RgbImage, params: &SegmentParams) -> Vec<LineSegment> {
    extract_segments_until(img, params, &Deadline::never())
}

/// [`extract_segments`] that stops refining Hough seeds once `deadline`
/// passes.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(img, params, deadline), fields(width = img.width(), height = img.height()))
)]
pub fn extract_segments_until(
    img: &RgbImage,
    params: &SegmentParams,
    deadline: &Deadline,
) -> Vec<LineSegment> {
    let (w, h) = img.dimensions();
    let (edges, points) = edge_points(img, params);
    if points.is_empty() {
        return Vec::new();
    }
    let floor = params.length_floor(w, h);

    let seeds = hough_lines(&edges, params.seed_votes, params.seed_suppression);
    let mut found: Vec<LineSegment> = Vec::new();
    for (i, seed) in seeds.iter().enumerate() {
        if deadline.expired() {
            debug!("deadline reached after {i} of {} Hough seeds", seeds.len());
            break;
        }
        let mut line = Line::from_polar(seed);
        for _ in 0..params.refine_iterations {
            match fit_line(&gather(&points, &line, params.gather_band_px)) {
                Some(refined) => line = refined,
                None => break,
            }
        }
        let support = gather(&points, &line, params.gather_band_px);
        found.extend(
            walk_runs(&support, &line, params.max_gap_px, floor)
                .into_iter()
                .filter(|s| s.length >= params.min_length(w, h, s.angle_deg)),
        );
    }

    found.sort_by(|a, b| b.length.total_cmp(&a.length));
    let mut kept: Vec<LineSegment> = Vec::with_capacity(found.len());
    for s in found {
        if !kept.iter().any(|k| same_line(k, &s, params)) {
            kept.push(s);
        }
    }
    debug!(
        "{} edge pixels, {} Hough seeds, {} segments of length >= {:.0}",
        points.len(),
        seeds.len(),
        kept.len(),
        floor
    );
    kept
}
