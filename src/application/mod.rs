pub mod app;
pub mod apply_guard;
pub mod bootstrap;
pub mod heatmap_service;
pub mod profile_sync;
pub mod reminder_service;
pub mod scheduler;
