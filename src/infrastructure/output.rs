use crate::domain::heatmap_grid::HeatmapGrid;
use crate::domain::layout::LayoutResult;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub username: String,
    pub grid: HeatmapGrid,
    pub layout: LayoutResult,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render ran out of memory: {0}")]
    ResourceExhausted(String),
    #[error("render failed: {0}")]
    Failed(String),
}

/// Draws a grid into an artifact. Implementations must not touch the
/// published output; that is the publisher's job.
pub trait HeatmapRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest) -> Result<Artifact, RenderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    Path(PathBuf),
    Default,
}

#[async_trait]
pub trait OutputPublisher: Send + Sync {
    async fn publish(&self, artifact: &Artifact, target: &PublishTarget) -> Result<(), InfraError>;
}

#[derive(Debug, Serialize)]
struct RenderedCell {
    date: NaiveDate,
    count: u32,
    bucket: u8,
    today: bool,
    x: f64,
    y: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderModel<'a> {
    username: &'a str,
    generated_at: String,
    range_start: NaiveDate,
    range_end: NaiveDate,
    weeks: usize,
    cell_size: f64,
    spacing: f64,
    width: f64,
    height: f64,
    cells: Vec<RenderedCell>,
}

/// Emits a positioned cell list as JSON for an external drawing surface.
#[derive(Debug, Clone, Default)]
pub struct JsonGridRenderer;

impl HeatmapRenderer for JsonGridRenderer {
    fn render(&self, request: &RenderRequest) -> Result<Artifact, RenderError> {
        let layout = request.layout;
        let pitch = layout.cell_size + layout.spacing;
        let mut cells = Vec::new();
        cells
            .try_reserve(request.grid.num_weeks() * 7)
            .map_err(|error| RenderError::ResourceExhausted(error.to_string()))?;

        for (week_index, week) in request.grid.weeks.iter().enumerate() {
            for (day_index, cell) in week.iter().enumerate() {
                let Some(date) = cell.date else {
                    continue;
                };
                cells.push(RenderedCell {
                    date,
                    count: cell.count,
                    bucket: cell.intensity().bucket(),
                    today: cell.is_today,
                    // Column 0 is the weekday label column.
                    x: (week_index + 1) as f64 * pitch + layout.spacing,
                    y: day_index as f64 * pitch,
                });
            }
        }

        let model = RenderModel {
            username: &request.username,
            generated_at: request.generated_at.to_rfc3339(),
            range_start: request.grid.range_start,
            range_end: request.grid.range_end,
            weeks: request.grid.num_weeks(),
            cell_size: layout.cell_size,
            spacing: layout.spacing,
            width: layout.grid_width(request.grid.num_weeks()) + pitch,
            height: layout.grid_height(),
            cells,
        };
        let bytes = serde_json::to_vec_pretty(&model)
            .map_err(|error| RenderError::Failed(error.to_string()))?;
        Ok(Artifact {
            content_type: "application/json",
            bytes,
        })
    }
}

/// Writes artifacts to disk, replacing the previous file in one rename so a
/// reader never sees a half-written artifact.
#[derive(Debug, Clone)]
pub struct FilePublisher {
    default_path: PathBuf,
}

impl FilePublisher {
    pub fn new(default_path: impl AsRef<Path>) -> Self {
        Self {
            default_path: default_path.as_ref().to_path_buf(),
        }
    }

    fn resolve<'a>(&'a self, target: &'a PublishTarget) -> &'a Path {
        match target {
            PublishTarget::Path(path) => path,
            PublishTarget::Default => &self.default_path,
        }
    }
}

#[async_trait]
impl OutputPublisher for FilePublisher {
    async fn publish(&self, artifact: &Artifact, target: &PublishTarget) -> Result<(), InfraError> {
        let path = self.resolve(target);
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut staging = path.as_os_str().to_owned();
        staging.push(".partial");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, &artifact.bytes).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }
}
