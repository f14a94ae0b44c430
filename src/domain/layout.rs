use crate::domain::heatmap_grid::DAYS_PER_WEEK;
use serde::{Deserialize, Serialize};

const ROWS: f64 = DAYS_PER_WEEK as f64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LayoutRequest {
    pub available_width: f64,
    pub available_height: f64,
    pub weeks: usize,
    pub spacing: f64,
    pub min_cell_size: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LayoutResult {
    pub cell_size: f64,
    pub spacing: f64,
}

impl LayoutResult {
    pub fn grid_width(&self, weeks: usize) -> f64 {
        weeks as f64 * (self.cell_size + self.spacing) + self.spacing
    }

    pub fn grid_height(&self) -> f64 {
        ROWS * (self.cell_size + self.spacing) - self.spacing
    }
}

/// Largest square cell that fits both axes, never below `min_cell_size`.
///
/// One extra column is reserved on the left for weekday labels, so the width
/// is divided by `weeks + 1`.
pub fn solve_layout(request: &LayoutRequest) -> LayoutResult {
    let spacing = non_negative(request.spacing);
    let min_cell_size = non_negative(request.min_cell_size);
    let columns = (request.weeks + 1) as f64;

    let from_width = (request.available_width - columns * spacing) / columns;
    let from_height = (request.available_height - ROWS * spacing) / ROWS;
    let cell_size = from_width.min(from_height);

    LayoutResult {
        cell_size: if cell_size.is_finite() {
            cell_size.max(min_cell_size)
        } else {
            min_cell_size
        },
        spacing,
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}
