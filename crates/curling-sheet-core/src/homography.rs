use crate::sample_bilinear_rgb;
use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, Point2, SMatrix, Vector3};

/// Projective map between two image planes, stored with `h[(2, 2)] == 1`
/// when built by [`homography_from_4pt`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    /// Map a point; the result is non-finite when it lands on the line at
    /// infinity.
    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.h * Vector3::new(f64::from(p.x), f64::from(p.y), 1.0);
        Point2::new((q.x / q.z) as f32, (q.y / q.z) as f32)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Similarity moving the centroid of `pts` to the origin with an average
/// radius of sqrt(2), plus the conditioned points.
fn condition(pts: &[Point2<f32>; 4]) -> (Matrix3<f64>, [Point2<f64>; 4]) {
    let pts = pts.map(|p| Point2::new(f64::from(p.x), f64::from(p.y)));
    let centroid = pts.iter().map(|p| p.coords).sum::<nalgebra::Vector2<f64>>() / 4.0;
    let spread = pts.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / 4.0;
    let scale = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };
    let t = Matrix3::new(
        scale, 0.0, -scale * centroid.x, //
        0.0, scale, -scale * centroid.y, //
        0.0, 0.0, 1.0,
    );
    (t, pts.map(|p| Point2::from((p.coords - centroid) * scale)))
}

/// Homography `H` with `dst ~ H * src` from four correspondences.
///
/// Solves the conditioned DLT system through its SVD null vector. Returns
/// `None` when three or more points are collinear or the result does not
/// normalize.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let (t_src, s) = condition(src);
    let (t_dst, d) = condition(dst);

    // Two rows per correspondence; the ninth row stays zero so the system
    // is square and the null vector is the last right singular vector.
    let mut a = SMatrix::<f64, 9, 9>::zeros();
    for (k, (p, q)) in s.iter().zip(d.iter()).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        a.set_row(
            2 * k,
            &SMatrix::<f64, 1, 9>::from_row_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]),
        );
        a.set_row(
            2 * k + 1,
            &SMatrix::<f64, 1, 9>::from_row_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]),
        );
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (smallest, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    // A rank-deficient system has a second (near) zero singular value.
    let mut sorted: Vec<f64> = svd.singular_values.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted[1] < 1e-9 * sorted[8].max(1e-300) {
        return None;
    }

    let n = v_t.row(smallest);
    let hn = Matrix3::new(n[0], n[1], n[2], n[3], n[4], n[5], n[6], n[7], n[8]);
    let h = t_dst.try_inverse()? * hn * t_src;
    let w = h[(2, 2)];
    if w.abs() < 1e-12 || h.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(Homography::new(h / w))
}

/// Resample `src` into an `out_w x out_h` image: every output pixel is
/// pulled from `h_img_from_rect(x, y)` with bilinear interpolation.
pub fn warp_perspective_rgb(
    src: &RgbImage,
    h_img_from_rect: Homography,
    out_w: u32,
    out_h: u32,
) -> RgbImage {
    let mut out = RgbImage::new(out_w, out_h);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let at = h_img_from_rect.apply(Point2::new(x as f32, y as f32));
        *px = Rgb(sample_bilinear_rgb(src, at.x, at.y));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assert_maps(h: &Homography, from: Point2<f32>, to: Point2<f32>, tol: f32) {
        let got = h.apply(from);
        assert_abs_diff_eq!(got.x, to.x, epsilon = tol);
        assert_abs_diff_eq!(got.y, to.y, epsilon = tol);
    }

    #[test]
    fn corners_of_sheet_map_onto_photo_quad() {
        let rect = [
            Point2::new(0.0_f32, 0.0),
            Point2::new(799.0, 0.0),
            Point2::new(799.0, 459.0),
            Point2::new(0.0, 459.0),
        ];
        let photo = [
            Point2::new(141.0_f32, 63.0),
            Point2::new(922.0, 174.0),
            Point2::new(870.0, 640.0),
            Point2::new(98.0, 512.0),
        ];
        let h = homography_from_4pt(&rect, &photo).expect("solvable");
        assert_abs_diff_eq!(h.h[(2, 2)], 1.0, epsilon = 1e-12);
        for (r, p) in rect.iter().zip(&photo) {
            assert_maps(&h, *r, *p, 1e-2);
        }
    }

    #[test]
    fn recovers_known_perspective_and_its_inverse() {
        let truth = Homography::new(Matrix3::new(
            1.05, -0.12, 35.0, //
            0.08, 0.93, 12.0, //
            -0.0006, 0.0011, 1.0,
        ));
        let rect = [
            Point2::new(0.0_f32, 0.0),
            Point2::new(240.0, 0.0),
            Point2::new(240.0, 90.0),
            Point2::new(0.0, 90.0),
        ];
        let h = homography_from_4pt(&rect, &rect.map(|p| truth.apply(p))).expect("solvable");
        for p in [Point2::new(17.0_f32, 80.0), Point2::new(120.0, 45.0)] {
            assert_maps(&h, p, truth.apply(p), 1e-3);
        }
        let back = h.inverse().expect("invertible");
        let p = Point2::new(200.0_f32, 10.0);
        assert_maps(&back, h.apply(p), p, 1e-3);
    }

    #[test]
    fn collinear_points_are_rejected() {
        let line = [
            Point2::new(0.0_f32, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 20.0),
            Point2::new(30.0, 30.0),
        ];
        let square = [
            Point2::new(0.0_f32, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ];
        assert!(homography_from_4pt(&line, &square).is_none());
    }

    #[test]
    fn shifted_warp_reads_offset_pixels() {
        let src = RgbImage::from_fn(6, 5, |x, y| Rgb([(10 * x) as u8, (10 * y) as u8, 7]));
        let shift = Homography::new(Matrix3::new(1.0, 0.0, 2.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0));
        let out = warp_perspective_rgb(&src, shift, 3, 3);
        assert_eq!(out.dimensions(), (3, 3));
        assert_eq!(out.get_pixel(0, 0).0, [20, 10, 7]);
        assert_eq!(out.get_pixel(2, 1).0, [40, 20, 7]);
    }
}
