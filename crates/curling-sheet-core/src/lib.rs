//! Core types and utilities for curling sheet analysis.
//!
//! Holds the pieces every detector stage shares: the ordered sheet
//! quadrilateral, circle and segment features, 4-point homographies with
//! perspective resampling, the per-image deadline, and the imaging
//! primitives the stages are built on.

mod deadline;
mod features;
mod homography;
mod logger;
pub mod primitives;
mod quad;
mod sampling;

pub use deadline::Deadline;
pub use features::{acute_angle_deg, CircleFeature, LineSegment};
pub use homography::{homography_from_4pt, warp_perspective_rgb, Homography};
pub use quad::Quadrilateral;
pub use sampling::sample_bilinear_rgb;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
