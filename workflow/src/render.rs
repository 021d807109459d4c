//! Document renderer plugin seam.
//!
//! Rendering itself lives outside the core; orchestrations invoke whatever
//! renderer the bootstrap wired in.

use async_trait::async_trait;
use protocol::{DocumentArtifact, OrchestratorResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Renderer failed: {0}")]
    Failed(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Renders a workflow result into document artifacts.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(
        &self,
        result: &OrchestratorResult,
        formats: &[String],
    ) -> Result<Vec<DocumentArtifact>, RenderError>;
}
