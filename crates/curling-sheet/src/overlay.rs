//! Annotated copy of the cropped sheet for visual inspection.

use curling_sheet_core::LineSegment;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut};

use crate::pipeline::GeometryRecord;

const CIRCLE: Rgb<u8> = Rgb([0, 255, 0]);
const CENTER: Rgb<u8> = Rgb([255, 0, 0]);
const CENTERLINE: Rgb<u8> = Rgb([0, 0, 255]);
const TEELINE: Rgb<u8> = Rgb([255, 165, 0]);
const BACKLINE: Rgb<u8> = Rgb([255, 0, 0]);
const HOGLINE: Rgb<u8> = Rgb([255, 255, 0]);

const CIRCLE_THICKNESS: i32 = 2;
const CENTER_RADIUS: i32 = 4;
const LINE_THICKNESS: i32 = 3;

fn draw_thick_segment(img: &mut RgbImage, seg: &LineSegment, color: Rgb<u8>) {
    let d = seg.p2 - seg.p1;
    let len = d.norm();
    let (nx, ny) = if len > f32::EPSILON {
        (-d.y / len, d.x / len)
    } else {
        (0.0, 0.0)
    };
    let half = LINE_THICKNESS / 2;
    for k in -half..=half {
        let (ox, oy) = (nx * k as f32, ny * k as f32);
        draw_line_segment_mut(
            img,
            (seg.p1.x + ox, seg.p1.y + oy),
            (seg.p2.x + ox, seg.p2.y + oy),
            color,
        );
    }
}

/// Draw house circles, the house centre and the four line roles on a copy
/// of `img`.
pub fn draw_overlay(img: &RgbImage, record: &GeometryRecord) -> RgbImage {
    let mut out = img.clone();

    if let Some(center) = record.house.center {
        for c in &record.house.circles {
            let cx = (c.x.round() as i32, c.y.round() as i32);
            let r = c.r.round() as i32;
            for t in 0..CIRCLE_THICKNESS {
                draw_hollow_circle_mut(&mut out, cx, r - t, CIRCLE);
            }
        }
        draw_filled_circle_mut(
            &mut out,
            (center.x.round() as i32, center.y.round() as i32),
            CENTER_RADIUS,
            CENTER,
        );
    }

    let lines = &record.lines;
    for (seg, color) in [
        (lines.centerline, CENTERLINE),
        (lines.teeline, TEELINE),
        (lines.backline, BACKLINE),
        (lines.hogline, HOGLINE),
    ] {
        if let Some(seg) = seg {
            draw_thick_segment(&mut out, &seg, color);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ImageSize;
    use crate::{HouseGeometry, SheetLineMap};
    use curling_sheet_core::CircleFeature;
    use nalgebra::Point2;

    fn record() -> GeometryRecord {
        GeometryRecord {
            image_size: ImageSize {
                width: 200,
                height: 120,
            },
            house: HouseGeometry {
                center: Some(Point2::new(100.0, 60.0)),
                radii: vec![30.0],
                circles: vec![CircleFeature {
                    x: 100.0,
                    y: 60.0,
                    r: 30.0,
                }],
            },
            lines: SheetLineMap {
                teeline: Some(LineSegment::new(
                    Point2::new(0.0, 80.0),
                    Point2::new(199.0, 80.0),
                )),
                hogline: Some(LineSegment::new(
                    Point2::new(0.0, 10.0),
                    Point2::new(199.0, 10.0),
                )),
                ..SheetLineMap::default()
            },
        }
    }

    #[test]
    fn draws_each_feature_in_its_colour() {
        let img = RgbImage::from_pixel(200, 120, Rgb([255, 255, 255]));
        let out = draw_overlay(&img, &record());
        assert_eq!(out.dimensions(), img.dimensions());
        assert_eq!(*out.get_pixel(100, 60), CENTER);
        assert_eq!(*out.get_pixel(100, 30), CIRCLE);
        assert_eq!(*out.get_pixel(10, 79), TEELINE);
        assert_eq!(*out.get_pixel(10, 81), TEELINE);
        assert_eq!(*out.get_pixel(150, 10), HOGLINE);
        assert_eq!(*out.get_pixel(150, 40), Rgb([255, 255, 255]));
    }

    #[test]
    fn absent_house_draws_nothing() {
        let img = RgbImage::from_pixel(50, 40, Rgb([7, 7, 7]));
        let empty = GeometryRecord {
            image_size: ImageSize {
                width: 50,
                height: 40,
            },
            house: HouseGeometry::default(),
            lines: SheetLineMap::default(),
        };
        assert_eq!(draw_overlay(&img, &empty), img);
    }
}
