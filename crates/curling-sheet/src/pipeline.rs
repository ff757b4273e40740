//! End-to-end sheet analysis: raw photo in, geometry record out.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use curling_sheet_core::{Deadline, Homography, LineSegment};
use curling_sheet_house::{detect_house_until, HouseDetectorParams, HouseGeometry};
use curling_sheet_lines::{
    classify_lines, extract_segments_until, LineClassifierParams, SegmentParams, SheetLineMap,
};
use curling_sheet_rectify::{
    crop_tight, locate_sheet, normalize_orientation, rectify_sheet, ColorDensityVote, CropParams,
    CropWindow, HouseEdge, HouseEnd, HouseEndClassifier, LocateError, OrientationParams,
    RectifyParams, SheetLocation, SheetLocatorParams,
};
use image::RgbImage;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Parameters of every stage, plus an optional per-image time budget.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    pub locator: SheetLocatorParams,
    pub rectify: RectifyParams,
    pub orientation: OrientationParams,
    pub crop: CropParams,
    pub house: HouseDetectorParams,
    pub segments: SegmentParams,
    pub lines: LineClassifierParams,
    /// Wall-clock limit per image in milliseconds. Checked between stages
    /// and polled inside circle voting and segment refinement.
    pub time_budget_ms: Option<u64>,
}

/// Errors that abort the analysis of one image.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("failed to load image {}: {source}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error("time budget of {budget_ms} ms exceeded after the {stage} stage")]
    TimeBudgetExceeded { stage: &'static str, budget_ms: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Structured geometry of one sheet, in cropped-image pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub image_size: ImageSize,
    pub house: HouseGeometry,
    pub lines: SheetLineMap,
}

/// Everything produced for one image.
#[derive(Clone, Debug)]
pub struct SheetAnalysis {
    /// Rectified, oriented and cropped sheet.
    pub cropped: RgbImage,
    pub location: SheetLocation,
    /// Maps rectified (pre-orientation) pixels into the input photo.
    pub h_img_from_rect: Homography,
    pub house_end: Option<HouseEnd>,
    /// Whether the rectified sheet was turned by 180 degrees.
    pub rotated: bool,
    /// Window of the oriented image kept by the crop.
    pub crop_window: Option<CropWindow>,
    /// All long segments, before role assignment.
    pub segments: Vec<LineSegment>,
    pub record: GeometryRecord,
}

/// Per-image time budget. The deadline is handed to the voting stages so
/// they stop early; `check` turns an overrun into an error between stages.
struct Budget {
    started: Instant,
    limit_ms: Option<u64>,
    deadline: Deadline,
}

impl Budget {
    fn start(limit_ms: Option<u64>) -> Self {
        let started = Instant::now();
        Self {
            started,
            limit_ms,
            deadline: Deadline::from_budget(started, limit_ms.map(Duration::from_millis)),
        }
    }

    fn check(&self, stage: &'static str) -> Result<(), PipelineError> {
        debug!(
            "{stage} done at {:.1} ms",
            self.started.elapsed().as_secs_f64() * 1e3
        );
        match self.limit_ms {
            Some(budget_ms) if self.deadline.expired() => {
                Err(PipelineError::TimeBudgetExceeded { stage, budget_ms })
            }
            _ => Ok(()),
        }
    }
}

/// Runs all stages on one image at a time; share it across threads to
/// process several images concurrently.
pub struct SheetPipeline {
    params: PipelineParams,
    classifier: Box<dyn HouseEndClassifier + Send + Sync>,
}

impl SheetPipeline {
    /// Pipeline with the colour-density house end vote.
    pub fn new(params: PipelineParams) -> Self {
        let classifier = Box::new(ColorDensityVote::new(params.orientation.clone()));
        Self { params, classifier }
    }

    /// Replace the house end classifier used for orientation.
    pub fn with_classifier(
        mut self,
        classifier: impl HouseEndClassifier + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// Load an image from disk and analyse it.
    pub fn process_path(
        &self,
        path: impl AsRef<Path>,
        edge: HouseEdge,
    ) -> Result<SheetAnalysis, PipelineError> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|source| PipelineError::ImageLoad {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        info!("loaded {} ({}x{})", path.display(), img.width(), img.height());
        self.process(&img, edge)
    }

    /// Analyse one photo.
    ///
    /// Only a missing sheet and an exhausted time budget are errors; every
    /// later stage degrades to partial output instead.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, img), fields(width = img.width(), height = img.height()))
    )]
    pub fn process(&self, img: &RgbImage, edge: HouseEdge) -> Result<SheetAnalysis, PipelineError> {
        let p = &self.params;
        let budget = Budget::start(p.time_budget_ms);

        let location = locate_sheet(img, &p.locator)?;
        budget.check("locate")?;

        let rectified = rectify_sheet(img, &location.quad, &p.rectify);
        budget.check("rectify")?;

        let oriented = normalize_orientation(rectified.image, edge, self.classifier.as_ref());
        budget.check("orient")?;

        let (cropped, crop_window) = crop_tight(oriented.image, &p.crop);
        budget.check("crop")?;

        let (house, segments) = rayon::join(
            || detect_house_until(&cropped, &p.house, &budget.deadline),
            || extract_segments_until(&cropped, &p.segments, &budget.deadline),
        );
        budget.check("detect")?;

        let (width, height) = cropped.dimensions();
        let lines = classify_lines(&segments, house.center, width, height, &p.lines);
        info!(
            "sheet {}x{}: house {}, {} radii, {} of 4 lines",
            width,
            height,
            if house.is_absent() { "absent" } else { "found" },
            house.radii.len(),
            lines.found()
        );

        Ok(SheetAnalysis {
            record: GeometryRecord {
                image_size: ImageSize { width, height },
                house,
                lines,
            },
            cropped,
            location,
            h_img_from_rect: rectified.h_img_from_rect,
            house_end: oriented.house_end,
            rotated: oriented.rotated,
            crop_window,
            segments,
        })
    }
}

impl Default for SheetPipeline {
    fn default() -> Self {
        Self::new(PipelineParams::default())
    }
}
