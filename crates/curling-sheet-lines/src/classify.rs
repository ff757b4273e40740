use curling_sheet_core::LineSegment;
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Thresholds for assigning ice line roles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LineClassifierParams {
    /// Segments steeper than this are vertical candidates.
    pub vertical_min_deg: f32,
    /// Segments flatter than this are horizontal candidates.
    pub horizontal_max_deg: f32,
    /// Dead zone around the tee line, as a fraction of image height.
    pub tee_margin_frac: f32,
    /// Expected tee-to-hog distance over tee-to-back distance.
    pub hog_to_back_ratio: f32,
    /// Relative deviation from the expected hog distance still accepted.
    pub hog_tolerance: f32,
}

impl Default for LineClassifierParams {
    fn default() -> Self {
        Self {
            vertical_min_deg: 70.0,
            horizontal_max_deg: 20.0,
            tee_margin_frac: 0.01,
            hog_to_back_ratio: 3.5,
            hog_tolerance: 0.25,
        }
    }
}

/// The four ice lines used for stone position analysis. Any may be missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetLineMap {
    pub centerline: Option<LineSegment>,
    #[serde(rename = "tline")]
    pub teeline: Option<LineSegment>,
    pub backline: Option<LineSegment>,
    pub hogline: Option<LineSegment>,
}

impl SheetLineMap {
    /// Number of roles that were assigned.
    pub fn found(&self) -> usize {
        [self.centerline, self.teeline, self.backline, self.hogline]
            .iter()
            .filter(|l| l.is_some())
            .count()
    }
}

fn nearest_by<'a>(
    items: impl Iterator<Item = &'a (f32, LineSegment)>,
    key: impl Fn(f32) -> f32,
) -> Option<(f32, LineSegment)> {
    items
        .min_by(|a, b| key(a.0).total_cmp(&key(b.0)))
        .copied()
}

/// Assign centerline, tee, back and hog roles from long segments.
///
/// `house_center` anchors the centerline and tee search; the image centre
/// is used when it is absent. "Below" means larger y than the tee line.
pub fn classify_lines(
    segments: &[LineSegment],
    house_center: Option<Point2<f32>>,
    width: u32,
    height: u32,
    params: &LineClassifierParams,
) -> SheetLineMap {
    let reference = house_center
        .unwrap_or_else(|| Point2::new(width as f32 / 2.0, height as f32 / 2.0));

    let centerline = segments
        .iter()
        .filter(|s| s.angle_deg > params.vertical_min_deg)
        .min_by(|a, b| {
            let da = (a.x_at_y(reference.y) - reference.x).abs();
            let db = (b.x_at_y(reference.y) - reference.x).abs();
            da.total_cmp(&db)
        })
        .copied();

    let mut horizontals: Vec<(f32, LineSegment)> = segments
        .iter()
        .filter(|s| s.angle_deg < params.horizontal_max_deg)
        .map(|s| (s.midpoint().y, *s))
        .collect();
    horizontals.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut map = SheetLineMap {
        centerline,
        ..SheetLineMap::default()
    };
    let Some((tee_y, tee)) = nearest_by(horizontals.iter(), |y| (y - reference.y).abs()) else {
        debug!("no horizontal segments");
        return map;
    };
    map.teeline = Some(tee);

    let margin = params.tee_margin_frac * height as f32;
    let below = horizontals.iter().filter(|(y, _)| *y > tee_y + margin);
    let above: Vec<&(f32, LineSegment)> = horizontals
        .iter()
        .filter(|(y, _)| *y < tee_y - margin)
        .collect();

    let back = nearest_by(below, |y| (y - tee_y).abs());
    map.backline = back.map(|(_, s)| s);

    // Horizontals are sorted by y, so the first "above" entry is the farthest.
    let farthest = above.first().map(|(_, s)| *s);
    map.hogline = match back {
        Some((back_y, _)) => {
            let target = params.hog_to_back_ratio * (back_y - tee_y).abs();
            match nearest_by(above.iter().copied(), |y| ((tee_y - y) - target).abs()) {
                Some((hog_y, hog)) if ((tee_y - hog_y) - target).abs() <= params.hog_tolerance * target => {
                    Some(hog)
                }
                Some(_) => {
                    debug!("no hog candidate near {target:.1}px from the tee, using the farthest");
                    farthest
                }
                None => None,
            }
        }
        None => farthest,
    };

    debug!(
        "{} segments -> {} horizontal, roles found: {}",
        segments.len(),
        horizontals.len(),
        map.found()
    );
    map
}
