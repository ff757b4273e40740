//! Rotation of the rectified sheet so the house sits at the requested edge.

use curling_sheet_core::primitives::{open_diamond, rgb_to_hsv};
use image::{imageops, GrayImage, Luma, RgbImage};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Edge of the output image the house should end up at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HouseEdge {
    Top,
    Bottom,
    /// Leave the orientation as rectified.
    #[default]
    None,
}

impl FromStr for HouseEdge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "bottom" => Ok(Self::Bottom),
            "none" => Ok(Self::None),
            other => Err(format!("expected top, bottom or none, got {other:?}")),
        }
    }
}

impl fmt::Display for HouseEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::None => "none",
        })
    }
}

/// End of the sheet the house was found at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HouseEnd {
    Top,
    Bottom,
}

/// Decides which end of a rectified sheet carries the house.
pub trait HouseEndClassifier {
    /// `None` when the evidence is inconclusive.
    fn classify(&self, img: &RgbImage) -> Option<HouseEnd>;
}

/// Thresholds for [`ColorDensityVote`]. Hue on the 0..180 scale.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationParams {
    /// Height of each end band as a fraction of image height.
    pub band_frac: f32,
    pub min_band_px: u32,
    /// Below this many colored pixels overall the vote is inconclusive.
    pub min_total_px: usize,
    /// The winning band needs at least this many colored pixels.
    pub min_band_count: usize,
    pub red_low_hue_max: u8,
    pub red_high_hue_min: u8,
    pub blue_hue_min: u8,
    pub blue_hue_max: u8,
    pub min_saturation: u8,
    pub min_value: u8,
    pub open_radius: u8,
    pub open_iterations: usize,
}

impl Default for OrientationParams {
    fn default() -> Self {
        Self {
            band_frac: 0.2,
            min_band_px: 5,
            min_total_px: 100,
            min_band_count: 50,
            red_low_hue_max: 10,
            red_high_hue_min: 170,
            blue_hue_min: 95,
            blue_hue_max: 135,
            min_saturation: 70,
            min_value: 60,
            open_radius: 2,
            open_iterations: 2,
        }
    }
}

/// Counts saturated red/blue pixels near the top and bottom edges.
#[derive(Clone, Debug, Default)]
pub struct ColorDensityVote {
    pub params: OrientationParams,
}

impl ColorDensityVote {
    pub fn new(params: OrientationParams) -> Self {
        Self { params }
    }

    fn ring_color_mask(&self, img: &RgbImage) -> GrayImage {
        let p = &self.params;
        let mut mask = GrayImage::new(img.width(), img.height());
        for (x, y, px) in img.enumerate_pixels() {
            let [hue, sat, val] = rgb_to_hsv(px.0);
            if sat < p.min_saturation || val < p.min_value {
                continue;
            }
            let red = hue <= p.red_low_hue_max || hue >= p.red_high_hue_min;
            let blue = (p.blue_hue_min..=p.blue_hue_max).contains(&hue);
            if red || blue {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        open_diamond(&mask, p.open_radius, p.open_iterations)
    }
}

impl HouseEndClassifier for ColorDensityVote {
    fn classify(&self, img: &RgbImage) -> Option<HouseEnd> {
        let p = &self.params;
        let mask = self.ring_color_mask(img);
        let h = img.height();

        let total = mask.pixels().filter(|px| px.0[0] > 0).count();
        if total < p.min_total_px {
            debug!("{total} ring-colored pixels, inconclusive");
            return None;
        }

        let band = ((p.band_frac * h as f32) as u32).max(p.min_band_px);
        let (mut top, mut bottom) = (0usize, 0usize);
        for (_, y, px) in mask.enumerate_pixels() {
            if px.0[0] == 0 {
                continue;
            }
            if y < band {
                top += 1;
            }
            if y > h.saturating_sub(band) {
                bottom += 1;
            }
        }
        debug!("ring-colored pixels: top band {top}, bottom band {bottom}");

        if top.max(bottom) < p.min_band_count {
            return None;
        }
        Some(if top >= bottom {
            HouseEnd::Top
        } else {
            HouseEnd::Bottom
        })
    }
}

/// Result of orientation normalization.
#[derive(Clone, Debug)]
pub struct OrientedSheet {
    pub image: RgbImage,
    pub house_end: Option<HouseEnd>,
    pub rotated: bool,
}

/// Rotate by 180 degrees when the house is detected at the opposite edge.
///
/// `HouseEdge::None` skips classification entirely. An inconclusive vote
/// leaves the image unchanged.
pub fn normalize_orientation(
    img: RgbImage,
    edge: HouseEdge,
    classifier: &dyn HouseEndClassifier,
) -> OrientedSheet {
    let want = match edge {
        HouseEdge::None => {
            return OrientedSheet {
                image: img,
                house_end: None,
                rotated: false,
            }
        }
        HouseEdge::Top => HouseEnd::Top,
        HouseEdge::Bottom => HouseEnd::Bottom,
    };

    let found = classifier.classify(&img);
    match found {
        Some(end) if end != want => {
            info!("house found at the {end:?} end, rotating 180 degrees");
            OrientedSheet {
                image: imageops::rotate180(&img),
                house_end: found,
                rotated: true,
            }
        }
        _ => OrientedSheet {
            image: img,
            house_end: found,
            rotated: false,
        },
    }
}
