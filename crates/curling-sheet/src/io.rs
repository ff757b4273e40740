//! JSON configuration and output helpers for sheet analysis.

use crate::overlay::draw_overlay;
use crate::pipeline::{GeometryRecord, PipelineParams, SheetAnalysis, SheetPipeline};
use curling_sheet_rectify::HouseEdge;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum SheetIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Configuration for one sheet analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetDetectConfig {
    pub image_path: String,
    #[serde(default)]
    pub cropped_path: Option<String>,
    #[serde(default)]
    pub overlay_path: Option<String>,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub house: HouseEdge,
    #[serde(default)]
    pub params: Option<PipelineParams>,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
}

impl SheetDetectConfig {
    /// Config for `image_path` with every other field at its default.
    pub fn for_image(image_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            cropped_path: None,
            overlay_path: None,
            json_path: None,
            house: HouseEdge::None,
            params: None,
            time_budget_ms: None,
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SheetIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), SheetIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Resolve the three output paths, filling gaps with names beside the
    /// input image.
    pub fn output_paths(&self) -> OutputPaths {
        let beside = OutputPaths::beside(&self.image_path);
        let pick = |p: &Option<String>, fallback: PathBuf| p.as_ref().map(PathBuf::from).unwrap_or(fallback);
        OutputPaths {
            cropped: pick(&self.cropped_path, beside.cropped),
            overlay: pick(&self.overlay_path, beside.overlay),
            json: pick(&self.json_path, beside.json),
        }
    }

    /// Build pipeline parameters, applying the top-level budget override.
    pub fn build_params(&self) -> PipelineParams {
        let mut params = self.params.clone().unwrap_or_default();
        if let Some(budget) = self.time_budget_ms {
            params.time_budget_ms = Some(budget);
        }
        params
    }

    pub fn build_pipeline(&self) -> SheetPipeline {
        SheetPipeline::new(self.build_params())
    }
}

/// Where the cropped image, the overlay and the JSON record are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub cropped: PathBuf,
    pub overlay: PathBuf,
    pub json: PathBuf,
}

impl OutputPaths {
    /// `<stem>_cropped.jpg`, `<stem>_overlay.png` and `<stem>_features.json`
    /// in the directory of `input`.
    pub fn beside(input: impl AsRef<Path>) -> Self {
        let input = input.as_ref();
        let root = input.with_extension("");
        let with_suffix = |suffix: &str| {
            let mut name = root.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            cropped: with_suffix("_cropped.jpg"),
            overlay: with_suffix("_overlay.png"),
            json: with_suffix("_features.json"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [self.cropped.as_path(), self.overlay.as_path(), self.json.as_path()].into_iter()
    }
}

impl GeometryRecord {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SheetIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this record to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), SheetIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<(), SheetIoError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(fs::create_dir_all(dir)?),
        _ => Ok(()),
    }
}

/// Save the cropped sheet, its overlay and the geometry record.
pub fn write_outputs(analysis: &SheetAnalysis, paths: &OutputPaths) -> Result<(), SheetIoError> {
    for path in paths.iter() {
        ensure_parent(path)?;
    }
    analysis.cropped.save(&paths.cropped)?;
    draw_overlay(&analysis.cropped, &analysis.record).save(&paths.overlay)?;
    analysis.record.write_json(&paths.json)?;
    Ok(())
}
