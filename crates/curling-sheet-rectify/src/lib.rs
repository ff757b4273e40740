//! Geometric normalization of an overhead curling photo.
//!
//! The stages run in order:
//!
//! 1. [`locate_sheet`] finds the rotated outline of the playing surface,
//! 2. [`rectify_sheet`] warps it into an upright rectangle,
//! 3. [`normalize_orientation`] optionally rotates it so the house sits at
//!    a chosen edge,
//! 4. [`crop_tight`] trims the remaining border.

mod crop;
mod locate;
mod orient;
mod rectify;

pub use crop::{crop_tight, CropParams, CropWindow};
pub use locate::{locate_sheet, LocateError, SheetLocation, SheetLocatorParams};
pub use orient::{
    normalize_orientation, ColorDensityVote, HouseEdge, HouseEnd, HouseEndClassifier,
    OrientationParams, OrientedSheet,
};
pub use rectify::{rectify_sheet, target_size, RectifiedSheet, RectifyParams};
