//! Ice line detection on a rectified, cropped curling sheet.
//!
//! [`extract_segments`] finds long straight segments; [`classify_lines`]
//! assigns them to the centerline, tee, back and hog roles using the house
//! centre and the expected spacing between the lines. Extraction does not
//! depend on the house, so it can run alongside house detection.

mod classify;
mod segments;

pub use classify::{classify_lines, LineClassifierParams, SheetLineMap};
pub use segments::{extract_segments, extract_segments_until, MinLengthRule, SegmentParams};
