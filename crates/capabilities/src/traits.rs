//! Capability contracts consumed by the scheduler core.
//!
//! Each trait is a narrow, cancellable interface to an external collaborator
//! (script generation, video assembly, upload). The core never inspects how
//! an implementation does its work — only these request/response types and
//! the progress/cancel hooks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cps_domain::error::Result;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;

/// Reports 0-100 progress within a single capability call. Implementations
/// should call this at a reasonable cadence, not on every byte processed.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

pub fn no_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub topic: String,
    pub style: String,
    pub duration_seconds: u32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub text: String,
    pub estimated_duration_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembleRequest {
    pub script: Script,
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoArtifact {
    pub id: String,
    pub path: String,
    pub duration_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub privacy: cps_domain::job::Privacy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub artifact: VideoArtifact,
    pub metadata: UploadMetadata,
    #[serde(default)]
    pub publish_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub video_id: String,
    pub url: String,
}

/// Text -> script artifact. Must be cancellable.
#[async_trait::async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(&self, req: ScriptRequest, cancel: CancelToken) -> Result<Script>;
}

/// Script + assets -> rendered video file. Reports progress 0-100.
#[async_trait::async_trait]
pub trait VideoAssembler: Send + Sync {
    async fn assemble(
        &self,
        req: AssembleRequest,
        progress: ProgressCallback,
        cancel: CancelToken,
    ) -> Result<VideoArtifact>;
}

/// Video file + metadata -> remote id/URL. Accepts an optional `publish_at`
/// for scheduled publication.
#[async_trait::async_trait]
pub trait YoutubeUploader: Send + Sync {
    async fn upload(
        &self,
        req: UploadRequest,
        progress: ProgressCallback,
        cancel: CancelToken,
    ) -> Result<UploadResult>;
}
