pub mod application;
pub mod domain;
pub mod infrastructure;

use application::app::{init_tracing, App};
use application::bootstrap::bootstrap_workspace;
use infrastructure::error::InfraError;
use std::path::PathBuf;

pub use application::heatmap_service::{RefreshError, RefreshReport};
pub use application::profile_sync::{Freshness, ProfileOutcome, ProfileUpdate};
pub use domain::models::ProfileSnapshot;

/// Runs the refresh loop for the workspace at `root` (current directory when
/// `None`) until ctrl-c.
pub async fn run(root: Option<PathBuf>) -> Result<(), InfraError> {
    let workspace_root = match root {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let bootstrap = bootstrap_workspace(&workspace_root)?;
    let _log_guard = init_tracing(&bootstrap.logs_dir)?;
    tracing::info!(
        workspace_root = %bootstrap.workspace_root.display(),
        database_path = %bootstrap.database_path.display(),
        "workspace ready"
    );

    let app = App::from_workspace(&bootstrap)?;
    app.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    app.shutdown().await;
    Ok(())
}
