//! Tight crop of the oriented sheet to its bright playing surface.

use curling_sheet_core::primitives::{
    binarize, close_square, external_contours, invert, otsu_level, to_gray, Contour,
};
use image::{imageops, GrayImage, RgbImage};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CropParams {
    pub close_radius: u8,
    pub close_iterations: usize,
}

impl Default for CropParams {
    fn default() -> Self {
        Self {
            close_radius: 3,
            close_iterations: 2,
        }
    }
}

/// Window cut out of the oriented image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Mean gray level of pixels where `mask` equals `on`; `None` if there are none.
fn masked_mean(gray: &GrayImage, mask: &GrayImage, on: bool) -> Option<f64> {
    let (sum, n) = gray
        .pixels()
        .zip(mask.pixels())
        .filter(|(_, m)| (m.0[0] > 0) == on)
        .fold((0u64, 0u64), |(s, n), (g, _)| (s + g.0[0] as u64, n + 1));
    (n > 0).then(|| sum as f64 / n as f64)
}

/// Binary mask of the sheet surface: Otsu split, flipped when the
/// brighter class is not the foreground.
fn surface_mask(gray: &GrayImage) -> GrayImage {
    let mask = binarize(gray, otsu_level(gray));
    let flip = match (masked_mean(gray, &mask, true), masked_mean(gray, &mask, false)) {
        (Some(fg), Some(bg)) => fg < bg,
        // Nothing above the level: the whole image is one class.
        (None, _) => true,
        (Some(_), None) => false,
    };
    if flip {
        invert(&mask)
    } else {
        mask
    }
}

/// Crop to the bounding box of the largest external foreground contour.
///
/// An image that is surface everywhere (uniform ones included) comes back
/// unchanged with the full-extent window. Returns the input unchanged, with
/// no window, when no contour exists.
pub fn crop_tight(img: RgbImage, params: &CropParams) -> (RgbImage, Option<CropWindow>) {
    let gray = to_gray(&img);
    let mask = close_square(&surface_mask(&gray), params.close_radius, params.close_iterations);

    // Contour tracing needs a background pixel to start from.
    if mask.pixels().all(|p| p[0] > 0) {
        debug!("whole image is surface, keeping it");
        let window = CropWindow {
            x: 0,
            y: 0,
            width: img.width(),
            height: img.height(),
        };
        return (img, Some(window));
    }

    let largest = external_contours(&mask)
        .into_iter()
        .max_by(|a, b| a.area().total_cmp(&b.area()));
    let Some(contour) = largest else {
        debug!("no foreground contour, keeping the full image");
        return (img, None);
    };

    let window = clamp_window(&contour, img.width(), img.height());
    debug!(
        "crop window {}x{} at ({}, {})",
        window.width, window.height, window.x, window.y
    );
    if (window.x, window.y, window.width, window.height) == (0, 0, img.width(), img.height()) {
        return (img, Some(window));
    }
    let cropped = imageops::crop_imm(&img, window.x, window.y, window.width, window.height).to_image();
    (cropped, Some(window))
}

fn clamp_window(contour: &Contour, w: u32, h: u32) -> CropWindow {
    let (x, y, cw, ch) = contour.bounding_rect();
    let x = x.min(w.saturating_sub(1));
    let y = y.min(h.saturating_sub(1));
    CropWindow {
        x,
        y,
        width: cw.min(w - x).max(1),
        height: ch.min(h - y).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn crops_bright_surface_out_of_dark_border() {
        let mut img = RgbImage::from_pixel(200, 120, Rgb([20, 25, 30]));
        for y in 10..100 {
            for x in 30..180 {
                img.put_pixel(x, y, Rgb([230, 230, 235]));
            }
        }
        // A dark line across the surface must not split the crop.
        for y in 10..100 {
            for x in 100..103 {
                img.put_pixel(x, y, Rgb([30, 30, 30]));
            }
        }
        let (out, window) = crop_tight(img, &CropParams::default());
        assert_eq!(
            window,
            Some(CropWindow {
                x: 30,
                y: 10,
                width: 150,
                height: 90
            })
        );
        assert_eq!(out.dimensions(), (150, 90));
    }

    #[test]
    fn thin_dark_frame_is_cut_away() {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([220, 220, 220]));
        for y in 40..60 {
            for x in 10..90 {
                img.put_pixel(x, y, Rgb([200, 200, 200]));
            }
        }
        for y in 0..100 {
            for x in 0..100 {
                if !(5..95).contains(&x) || !(5..95).contains(&y) {
                    img.put_pixel(x, y, Rgb([10, 10, 10]));
                }
            }
        }
        let (out, window) = crop_tight(img, &CropParams::default());
        assert_eq!(window.map(|w| (w.x, w.y)), Some((5, 5)));
        assert_eq!(out.dimensions(), (90, 90));
    }

    #[test]
    fn dark_uniform_image_keeps_full_window() {
        let img = RgbImage::from_pixel(64, 48, Rgb([12, 12, 12]));
        let (out, window) = crop_tight(img.clone(), &CropParams::default());
        assert_eq!(out, img);
        assert_eq!(window.map(|w| (w.x, w.y, w.width, w.height)), Some((0, 0, 64, 48)));
    }

    #[test]
    fn uniform_image_is_returned_unchanged() {
        let img = RgbImage::from_pixel(120, 80, Rgb([240, 240, 240]));
        let (out, window) = crop_tight(img.clone(), &CropParams::default());
        assert_eq!(out, img);
        assert_eq!(
            window,
            Some(CropWindow {
                x: 0,
                y: 0,
                width: 120,
                height: 80
            })
        );
    }
}
