//! Curling sheet geometry from a single overhead photograph.
//!
//! This crate provides:
//! - re-exports of the stage crates (`core`, `rectify`, `house`, `lines`)
//! - [`SheetPipeline`], which chains sheet localisation, rectification,
//!   orientation, cropping and feature detection into one call
//! - overlay rendering and JSON config/report helpers
//! - (feature `cli`) the `curling-sheet` command-line tool
//!
//! ## Quickstart
//!
//! ```no_run
//! use curling_sheet::{HouseEdge, PipelineParams, SheetPipeline};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = SheetPipeline::new(PipelineParams::default());
//! let analysis = pipeline.process_path("sheet.jpg", HouseEdge::Top)?;
//! println!("{}", serde_json::to_string_pretty(&analysis.record)?);
//! # Ok(())
//! # }
//! ```
//!
//! All coordinates in the [`GeometryRecord`] are pixels of the cropped
//! sheet image, origin at the top-left.

pub use curling_sheet_core as core;
pub use curling_sheet_house as house;
pub use curling_sheet_lines as lines;
pub use curling_sheet_rectify as rectify;

pub use curling_sheet_house::HouseGeometry;
pub use curling_sheet_lines::SheetLineMap;
pub use curling_sheet_rectify::HouseEdge;

pub mod io;
pub mod overlay;
pub mod pipeline;

pub use io::{write_outputs, OutputPaths, SheetDetectConfig, SheetIoError};
pub use overlay::draw_overlay;
pub use pipeline::{
    GeometryRecord, ImageSize, PipelineError, PipelineParams, SheetAnalysis, SheetPipeline,
};
