//! House (target ring) detection on a rectified, cropped curling sheet.
//!
//! [`detect_house`] searches a horizontal band of the image for concentric
//! circles with gradient Hough voting ([`hough`]), keeps the candidates
//! clustered around the median centre and reports them as a
//! [`HouseGeometry`]. Finding nothing is a normal outcome.

mod detector;
pub mod hough;

pub use detector::{
    cluster_concentric, detect_house, detect_house_until, HouseDetectorParams, HouseGeometry,
};
pub use hough::CircleVoteParams;
