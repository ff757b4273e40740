#![allow(dead_code)]

use image::{Rgb, RgbImage};
use nalgebra::{Point2, Rotation2, Vector2};

pub const CANVAS_W: u32 = 1000;
pub const CANVAS_H: u32 = 800;
pub const SHEET_W: f32 = 800.0;
pub const SHEET_H: f32 = 460.0;
pub const ROTATION_DEG: f32 = 12.0;

pub const TEE_V: f32 = 190.0;
pub const BACK_V: f32 = 230.0;
pub const HOG_V: f32 = 50.0;
/// Behind the back line, farther from the tee than it.
pub const HACK_V: f32 = 400.0;
pub const CENTER_U: f32 = 400.0;
pub const RING_RADII: [f32; 3] = [30.0, 60.0, 90.0];

const FLOOR: Rgb<u8> = Rgb([30, 32, 35]);
const ICE: Rgb<u8> = Rgb([230, 232, 235]);
const PAINT: Rgb<u8> = Rgb([40, 40, 45]);
const HALF_STROKE: f32 = 1.5;

/// Pose of the synthetic sheet on the canvas.
pub struct SheetTruth {
    rotation: Rotation2<f32>,
    center: Vector2<f32>,
}

impl SheetTruth {
    fn new() -> Self {
        Self {
            rotation: Rotation2::new(ROTATION_DEG.to_radians()),
            center: Vector2::new(CANVAS_W as f32 / 2.0, CANVAS_H as f32 / 2.0),
        }
    }

    /// Sheet-local `(u, v)` to canvas pixels.
    pub fn to_canvas(&self, u: f32, v: f32) -> Point2<f32> {
        let local = Vector2::new(u - SHEET_W / 2.0, v - SHEET_H / 2.0);
        Point2::from(self.center + self.rotation * local)
    }

    fn to_sheet(&self, x: f32, y: f32) -> (f32, f32) {
        let local = self.rotation.inverse() * (Vector2::new(x, y) - self.center);
        (local.x + SHEET_W / 2.0, local.y + SHEET_H / 2.0)
    }
}

fn is_paint(u: f32, v: f32) -> bool {
    let horizontal = [TEE_V, BACK_V, HOG_V, HACK_V]
        .iter()
        .any(|&lv| (v - lv).abs() <= HALF_STROKE);
    let vertical = (u - CENTER_U).abs() <= HALF_STROKE;
    let d = ((u - CENTER_U).powi(2) + (v - TEE_V).powi(2)).sqrt();
    let ring = RING_RADII.iter().any(|&r| (d - r).abs() <= HALF_STROKE);
    horizontal || vertical || ring
}

/// Overhead photo of a marked sheet, rotated on a dark floor.
pub fn synthetic_sheet() -> (RgbImage, SheetTruth) {
    let truth = SheetTruth::new();
    let img = RgbImage::from_fn(CANVAS_W, CANVAS_H, |x, y| {
        let (u, v) = truth.to_sheet(x as f32, y as f32);
        if !(0.0..SHEET_W).contains(&u) || !(0.0..SHEET_H).contains(&v) {
            FLOOR
        } else if is_paint(u, v) {
            PAINT
        } else {
            ICE
        }
    });
    (img, truth)
}

/// Uniform floor with no sheet in it.
pub fn empty_floor() -> RgbImage {
    RgbImage::from_pixel(320, 240, FLOOR)
}
