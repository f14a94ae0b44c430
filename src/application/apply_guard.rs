use crate::infrastructure::error::InfraError;
use crate::infrastructure::output::{
    HeatmapRenderer, OutputPublisher, PublishTarget, RenderError, RenderRequest,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("render failed: {0}")]
    Render(String),
    #[error("render exhausted resources: {0}")]
    ResourceExhausted(String),
    #[error("publish failed: {0}")]
    Publish(#[source] InfraError),
}

impl From<RenderError> for ApplyError {
    fn from(error: RenderError) -> Self {
        match error {
            RenderError::ResourceExhausted(message) => Self::ResourceExhausted(message),
            RenderError::Failed(message) => Self::Render(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub target: PublishTarget,
    pub fell_back: bool,
    pub bytes: usize,
}

/// Single-flight render and publish. One instance per process, shared by `Arc`.
pub struct ApplyGuard {
    lock: Mutex<()>,
    renderer: Arc<dyn HeatmapRenderer>,
    publisher: Arc<dyn OutputPublisher>,
}

impl ApplyGuard {
    pub fn new(renderer: Arc<dyn HeatmapRenderer>, publisher: Arc<dyn OutputPublisher>) -> Self {
        Self {
            lock: Mutex::new(()),
            renderer,
            publisher,
        }
    }

    /// Waits for any in-flight apply, then renders and publishes. A failed
    /// publish to an explicit target is retried once on the default target.
    pub async fn apply(
        &self,
        request: &RenderRequest,
        target: &PublishTarget,
    ) -> Result<ApplyReport, ApplyError> {
        let _held = self.lock.lock().await;

        let artifact = self.renderer.render(request).map_err(|error| {
            tracing::warn!(username = %request.username, error = %error, "heatmap render failed; previous output kept");
            ApplyError::from(error)
        })?;
        let bytes = artifact.bytes.len();

        match self.publisher.publish(&artifact, target).await {
            Ok(()) => Ok(ApplyReport {
                target: target.clone(),
                fell_back: false,
                bytes,
            }),
            Err(error) if *target != PublishTarget::Default => {
                tracing::warn!(publish_target = ?target, error = %error, "publish failed; falling back to default target");
                self.publisher
                    .publish(&artifact, &PublishTarget::Default)
                    .await
                    .map_err(ApplyError::Publish)?;
                Ok(ApplyReport {
                    target: PublishTarget::Default,
                    fell_back: true,
                    bytes,
                })
            }
            Err(error) => Err(ApplyError::Publish(error)),
        }
    }
}
