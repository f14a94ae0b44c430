pub mod calendar_index;
pub mod color_scale;
pub mod heatmap_grid;
pub mod layout;
pub mod models;
pub mod reminders;
