//! Gradient Hough voting for circle centres, followed by a radius
//! histogram per centre.
//!
//! Every edge pixel casts votes along its gradient direction (both ways)
//! for all radii in range. Centres of concentric rings collect votes from
//! every ring, so one accumulator peak can yield several radii; each radius
//! must be supported by edges that point at the centre and spread around
//! the circumference.

use std::f32::consts::TAU;

use curling_sheet_core::primitives::sobel_gradients;
use curling_sheet_core::{CircleFeature, Deadline};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Angular sectors used to check that support surrounds the centre.
const SECTORS: u32 = 16;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleVoteParams {
    /// Gaussian sigma applied to the centre accumulator.
    pub accumulator_sigma: f32,
    /// Absolute floor for a smoothed accumulator peak.
    pub min_center_votes: f32,
    /// Peaks weaker than this fraction of the strongest one are ignored.
    pub min_center_rel: f32,
    pub max_centers: usize,
    /// Centre peaks closer than this are merged.
    pub center_suppression_px: f32,
    /// Minimum |cos| between an edge gradient and the direction to the centre.
    pub min_radial_alignment: f32,
    /// Half-width of the radius window that counts supporting edges.
    pub radius_window_px: u32,
    /// Supporting edge pixels per pixel of visible circumference.
    pub min_coverage: f32,
    /// Fraction of visible angular sectors that must hold support.
    pub min_sector_frac: f32,
    /// Longest allowed run of visible sectors without support. Straight
    /// edges only support a narrow cone, so a line cross leaves long gaps.
    pub max_empty_sector_run: u32,
    /// Circles with less of their circumference inside the image are skipped.
    pub min_visible_frac: f32,
    /// Radii found at one centre differ by at least this much.
    pub min_radius_gap_px: f32,
}

impl Default for CircleVoteParams {
    fn default() -> Self {
        Self {
            accumulator_sigma: 2.0,
            min_center_votes: 2.0,
            min_center_rel: 0.2,
            max_centers: 12,
            center_suppression_px: 10.0,
            min_radial_alignment: 0.9,
            radius_window_px: 2,
            min_coverage: 0.5,
            min_sector_frac: 0.6,
            max_empty_sector_run: 3,
            min_visible_frac: 0.5,
            min_radius_gap_px: 6.0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct EdgePixel {
    x: f32,
    y: f32,
    /// Unit gradient direction.
    gx: f32,
    gy: f32,
}

/// Circle with the evidence that accepted it.
#[derive(Clone, Copy, Debug)]
pub struct ScoredCircle {
    pub circle: CircleFeature,
    pub coverage: f32,
}

fn edge_pixels(gray: &GrayImage, edges: &GrayImage) -> Vec<EdgePixel> {
    let (sx, sy) = sobel_gradients(gray);
    edges
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .filter_map(|(x, y, _)| {
            let gx = sx.get_pixel(x, y)[0] as f32;
            let gy = sy.get_pixel(x, y)[0] as f32;
            let mag = gx.hypot(gy);
            (mag > 0.0).then(|| EdgePixel {
                x: x as f32,
                y: y as f32,
                gx: gx / mag,
                gy: gy / mag,
            })
        })
        .collect()
}

type Accumulator = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Edge pixels voted between two deadline polls.
const DEADLINE_STRIDE: usize = 256;

fn vote_centers(
    edges: &[EdgePixel],
    w: u32,
    h: u32,
    min_r: u32,
    max_r: u32,
    deadline: &Deadline,
) -> Accumulator {
    let mut acc = Accumulator::new(w, h);
    for (i, e) in edges.iter().enumerate() {
        if i % DEADLINE_STRIDE == 0 && deadline.expired() {
            debug!("deadline reached after {i} of {} edge pixels", edges.len());
            break;
        }
        for sign in [-1.0f32, 1.0] {
            for r in min_r..=max_r {
                let cx = (e.x + sign * e.gx * r as f32).round();
                let cy = (e.y + sign * e.gy * r as f32).round();
                // The ray has left the image and cannot come back.
                if cx < 0.0 || cy < 0.0 || cx >= w as f32 || cy >= h as f32 {
                    break;
                }
                acc.get_pixel_mut(cx as u32, cy as u32)[0] += 1.0;
            }
        }
    }
    acc
}

/// Gaussian-smoothed accumulator, row-major.
fn smooth(acc: Accumulator, sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        return acc.into_raw();
    }
    gaussian_blur_f32(&acc, sigma).into_raw()
}

/// Strongest accumulator maxima, greedily separated by the suppression radius.
fn center_peaks(acc: &[f32], w: usize, h: usize, params: &CircleVoteParams) -> Vec<(f32, f32, f32)> {
    let global = acc.iter().copied().fold(0.0f32, f32::max);
    let floor = params.min_center_votes.max(params.min_center_rel * global);

    let mut maxima: Vec<(f32, usize, usize)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let v = acc[y * w + x];
            if v < floor {
                continue;
            }
            let mut is_max = true;
            'nbhd: for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    if acc[ny * w + nx] > v {
                        is_max = false;
                        break 'nbhd;
                    }
                }
            }
            if is_max {
                maxima.push((v, x, y));
            }
        }
    }
    maxima.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut peaks: Vec<(f32, f32, f32)> = Vec::new();
    for (v, x, y) in maxima {
        if peaks.len() >= params.max_centers {
            break;
        }
        let (cx, cy) = refine_peak(acc, w, h, x, y);
        let separated = peaks
            .iter()
            .all(|&(px, py, _)| (px - cx).hypot(py - cy) >= params.center_suppression_px);
        if separated {
            peaks.push((cx, cy, v));
        }
    }
    peaks
}

/// Weighted centroid of the 3x3 neighbourhood.
fn refine_peak(acc: &[f32], w: usize, h: usize, x: usize, y: usize) -> (f32, f32) {
    let (mut sx, mut sy, mut sw) = (0.0f32, 0.0f32, 0.0f32);
    for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
        for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
            let v = acc[ny * w + nx];
            sx += v * nx as f32;
            sy += v * ny as f32;
            sw += v;
        }
    }
    if sw > 0.0 {
        (sx / sw, sy / sw)
    } else {
        (x as f32, y as f32)
    }
}

fn sector_of(dx: f32, dy: f32) -> u32 {
    let a = dy.atan2(dx).rem_euclid(TAU);
    ((a / TAU * SECTORS as f32) as u32).min(SECTORS - 1)
}

/// Fraction of the circumference inside the image and the matching sector mask.
fn visibility(cx: f32, cy: f32, r: f32, w: usize, h: usize) -> (f32, u32) {
    const SAMPLES: u32 = 64;
    let mut inside = 0u32;
    let mut mask = 0u32;
    for i in 0..SAMPLES {
        let a = (i as f32 + 0.5) / SAMPLES as f32 * TAU;
        let (s, c) = a.sin_cos();
        let (x, y) = (cx + r * c, cy + r * s);
        if x >= 0.0 && y >= 0.0 && x < w as f32 && y < h as f32 {
            inside += 1;
            mask |= 1 << sector_of(c, s);
        }
    }
    (inside as f32 / SAMPLES as f32, mask)
}

/// Longest cyclic run of visible sectors that hold no support. Sectors
/// outside the image neither extend nor break a run.
fn longest_empty_run(occupied: u32, visible: u32) -> u32 {
    let seq: Vec<bool> = (0..SECTORS)
        .filter(|i| visible & (1 << i) != 0)
        .map(|i| occupied & (1 << i) != 0)
        .collect();
    if !seq.iter().any(|&o| o) {
        return seq.len() as u32;
    }
    let (mut best, mut run) = (0u32, 0u32);
    for &o in seq.iter().chain(seq.iter()) {
        run = if o { 0 } else { run + 1 };
        best = best.max(run);
    }
    best
}

#[derive(Clone, Default)]
struct RadiusHistogram {
    count: Vec<u32>,
    dist_sum: Vec<f32>,
    sectors: Vec<u32>,
}

impl RadiusHistogram {
    fn window(&self, r: usize, half: usize) -> (u32, f32, u32) {
        let lo = r.saturating_sub(half);
        let hi = (r + half).min(self.count.len().saturating_sub(1));
        (lo..=hi).fold((0, 0.0, 0), |(n, d, m), i| {
            (n + self.count[i], d + self.dist_sum[i], m | self.sectors[i])
        })
    }
}

fn radius_histogram(
    edges: &[EdgePixel],
    cx: f32,
    cy: f32,
    bins: usize,
    min_alignment: f32,
) -> RadiusHistogram {
    let mut hist = RadiusHistogram {
        count: vec![0; bins],
        dist_sum: vec![0.0; bins],
        sectors: vec![0; bins],
    };
    for e in edges {
        let (vx, vy) = (e.x - cx, e.y - cy);
        let d = vx.hypot(vy);
        if d < 1.0 {
            continue;
        }
        let bin = d.round() as usize;
        if bin >= bins {
            continue;
        }
        if (e.gx * vx + e.gy * vy).abs() / d < min_alignment {
            continue;
        }
        hist.count[bin] += 1;
        hist.dist_sum[bin] += d;
        hist.sectors[bin] |= 1 << sector_of(vx, vy);
    }
    hist
}

#[allow(clippy::too_many_arguments)]
fn radii_at_center(
    edges: &[EdgePixel],
    cx: f32,
    cy: f32,
    w: usize,
    h: usize,
    min_r: u32,
    max_r: u32,
    params: &CircleVoteParams,
) -> Vec<ScoredCircle> {
    let half = params.radius_window_px as usize;
    let gap = params.min_radius_gap_px.max(1.0).ceil() as usize;
    let bins = max_r as usize + half + gap + 2;
    let hist = radius_histogram(edges, cx, cy, bins, params.min_radial_alignment);
    let support = |r: usize| hist.window(r, half).0;

    let mut out = Vec::new();
    for r in min_r as usize..=max_r as usize {
        let (visible, visible_mask) = visibility(cx, cy, r as f32, w, h);
        if visible < params.min_visible_frac {
            continue;
        }
        let (n, dist_sum, sectors) = hist.window(r, half);
        if n == 0 {
            continue;
        }
        let coverage = n as f32 / (TAU * r as f32 * visible);
        if coverage < params.min_coverage {
            continue;
        }
        let occupied = sectors & visible_mask;
        if (occupied.count_ones() as f32) < params.min_sector_frac * visible_mask.count_ones() as f32 {
            continue;
        }
        if longest_empty_run(occupied, visible_mask) > params.max_empty_sector_run {
            continue;
        }
        // Local maximum of support; ties resolve towards the smaller radius.
        let is_peak = (r.saturating_sub(gap)..=r + gap)
            .filter(|&q| q != r && q >= 1)
            .all(|q| if q < r { n > support(q) } else { n >= support(q) });
        if !is_peak {
            continue;
        }
        out.push(ScoredCircle {
            circle: CircleFeature {
                x: cx,
                y: cy,
                r: dist_sum / n as f32,
            },
            coverage,
        });
    }
    out
}

/// Circles in `gray` with radii in `[min_r, max_r]`.
///
/// `edges` is the binary edge map of `gray`. The result is ordered by
/// decreasing coverage, with duplicates found from neighbouring centres
/// removed. Voting and the per-centre radius search stop once `deadline`
/// passes, so the result is then incomplete.
pub fn detect_circles(
    gray: &GrayImage,
    edges: &GrayImage,
    min_r: u32,
    max_r: u32,
    params: &CircleVoteParams,
    deadline: &Deadline,
) -> Vec<ScoredCircle> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    if w == 0 || h == 0 || min_r == 0 || max_r < min_r {
        return Vec::new();
    }
    let edge_px = edge_pixels(gray, edges);
    if edge_px.is_empty() {
        return Vec::new();
    }

    let acc = smooth(
        vote_centers(&edge_px, gray.width(), gray.height(), min_r, max_r, deadline),
        params.accumulator_sigma,
    );
    let peaks = center_peaks(&acc, w, h, params);
    trace!("{} edge pixels, {} centre peaks", edge_px.len(), peaks.len());

    let mut found: Vec<ScoredCircle> = peaks
        .iter()
        .take_while(|_| !deadline.expired())
        .flat_map(|&(cx, cy, _)| radii_at_center(&edge_px, cx, cy, w, h, min_r, max_r, params))
        .collect();
    found.sort_by(|a, b| b.coverage.total_cmp(&a.coverage));

    let mut kept: Vec<ScoredCircle> = Vec::with_capacity(found.len());
    for c in found {
        let duplicate = kept.iter().any(|k| {
            (k.circle.x - c.circle.x).hypot(k.circle.y - c.circle.y) < params.center_suppression_px
                && (k.circle.r - c.circle.r).abs() < params.min_radius_gap_px
        });
        if !duplicate {
            kept.push(c);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use curling_sheet_core::primitives::{canny, gaussian_blur};

    fn rings(w: u32, h: u32, cx: f32, cy: f32, radii: &[f32]) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let d = (x as f32 - cx).hypot(y as f32 - cy);
            let on_ring = radii.iter().any(|r| (d - r).abs() <= 1.5);
            Luma([if on_ring { 30 } else { 230 }])
        })
    }

    fn run(img: &GrayImage, min_r: u32, max_r: u32) -> Vec<ScoredCircle> {
        let blurred = gaussian_blur(img, 1.5);
        let edges = canny(&blurred, 60.0, 180.0);
        detect_circles(
            &blurred,
            &edges,
            min_r,
            max_r,
            &CircleVoteParams::default(),
            &Deadline::never(),
        )
    }

    #[test]
    fn finds_single_ring() {
        let img = rings(200, 160, 97.0, 81.0, &[40.0]);
        let found = run(&img, 12, 70);
        assert_eq!(found.len(), 1, "{found:?}");
        let c = found[0].circle;
        assert!((c.x - 97.0).abs() < 1.5 && (c.y - 81.0).abs() < 1.5, "{c:?}");
        assert!((c.r - 40.0).abs() < 2.0, "{c:?}");
    }

    #[test]
    fn concentric_rings_share_one_centre() {
        let img = rings(320, 260, 160.0, 130.0, &[30.0, 60.0, 90.0]);
        let found = run(&img, 20, 117);
        let mut radii: Vec<f32> = found.iter().map(|c| c.circle.r).collect();
        radii.sort_by(f32::total_cmp);
        assert_eq!(radii.len(), 3, "{radii:?}");
        for (got, want) in radii.iter().zip([30.0, 60.0, 90.0]) {
            assert!((got - want).abs() < 2.0, "{radii:?}");
        }
        for c in &found {
            assert!((c.circle.x - 160.0).abs() < 1.5 && (c.circle.y - 130.0).abs() < 1.5);
        }
    }

    #[test]
    fn crossing_lines_are_not_circles() {
        let img = GrayImage::from_fn(300, 300, |x, y| {
            let on_line = (148..=151).contains(&x) || (148..=151).contains(&y);
            Luma([if on_line { 30 } else { 230 }])
        });
        assert!(run(&img, 24, 135).is_empty());
    }

    #[test]
    fn empty_runs_skip_sectors_outside_the_image() {
        let all = (1u32 << SECTORS) - 1;
        assert_eq!(longest_empty_run(all, all), 0);
        assert_eq!(longest_empty_run(0, all), SECTORS);
        // Support only in two neighbouring quadrants.
        let cones = 0b1100_0000_0011_1111;
        assert_eq!(longest_empty_run(cones, all), 8);
        // Hide the empty half except for its two ends: they join up.
        let visible = cones | (1 << 6) | (1 << 13);
        assert_eq!(longest_empty_run(cones, visible), 2);
        // Runs wrap around sector 0.
        let wrap = 0b0000_0011_1111_1100;
        assert_eq!(longest_empty_run(wrap, all), 8);
    }

    #[test]
    fn expired_deadline_stops_voting() {
        let img = rings(200, 160, 97.0, 81.0, &[40.0]);
        let blurred = gaussian_blur(&img, 1.5);
        let edges = canny(&blurred, 60.0, 180.0);
        let params = CircleVoteParams::default();
        let passed = Deadline::at(std::time::Instant::now());
        assert!(detect_circles(&blurred, &edges, 12, 70, &params, &passed).is_empty());
        assert_eq!(
            detect_circles(&blurred, &edges, 12, 70, &params, &Deadline::never()).len(),
            1
        );
    }

    #[test]
    fn blank_image_has_no_circles() {
        let img = GrayImage::from_pixel(200, 100, Luma([200]));
        assert!(run(&img, 8, 45).is_empty());
    }

    #[test]
    fn smoothing_spreads_a_spike_without_moving_it() {
        let w = 31;
        let mut acc = Accumulator::new(w as u32, w as u32);
        acc.put_pixel(15, 15, Luma([100.0]));
        let s = smooth(acc, 2.0);
        assert_eq!(s.len(), w * w);
        let total: f32 = s.iter().sum();
        assert!((total - 100.0).abs() < 0.5, "{total}");
        let peak = s.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)).map(|(i, _)| i);
        assert_eq!(peak, Some(15 * w + 15));
        assert!(s[15 * w + 15] > s[15 * w + 17] && s[15 * w + 17] > 0.0);
        assert_relative_eq!(s[15 * w + 17], s[17 * w + 15], max_relative = 1e-5);
    }

    #[test]
    fn zero_sigma_leaves_votes_untouched() {
        let mut acc = Accumulator::new(5, 4);
        acc.put_pixel(3, 1, Luma([7.0]));
        let s = smooth(acc, 0.0);
        assert_eq!(s[5 + 3], 7.0);
        assert_eq!(s.iter().sum::<f32>(), 7.0);
    }

    #[test]
    fn sectors_cover_the_full_turn() {
        assert_eq!(sector_of(1.0, 0.0), 0);
        assert_eq!(sector_of(0.0, 1.0), SECTORS / 4);
        assert_eq!(sector_of(-1.0, 1e-6), SECTORS / 2 - 1);
        assert_eq!(sector_of(1.0, -1e-6), SECTORS - 1);
    }
}
