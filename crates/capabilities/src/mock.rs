//! In-process stand-ins for the three capabilities. Real deployments wire in
//! adapters that call an actual script-generation service, renderer, and the
//! YouTube Data API; these mocks exist so the scheduler core can be exercised
//! end to end without network access.

use std::time::Duration;

use cps_domain::error::{Error, Result};
use tokio::time::sleep;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::traits::{
    AssembleRequest, ProgressCallback, Script, ScriptGenerator, ScriptRequest, UploadRequest,
    UploadResult, VideoArtifact, VideoAssembler, YoutubeUploader,
};

pub struct MockScriptGenerator;

#[async_trait::async_trait]
impl ScriptGenerator for MockScriptGenerator {
    async fn generate(&self, req: ScriptRequest, cancel: CancelToken) -> Result<Script> {
        if cancel.is_cancelled() {
            return Err(Error::Terminal("cancelled before script generation".into()));
        }
        sleep(Duration::from_millis(10)).await;
        Ok(Script {
            id: format!("script_{}", Uuid::new_v4().simple()),
            text: format!("A {} second video about {}.", req.duration_seconds, req.topic),
            estimated_duration_seconds: req.duration_seconds,
        })
    }
}

pub struct MockVideoAssembler;

#[async_trait::async_trait]
impl VideoAssembler for MockVideoAssembler {
    async fn assemble(
        &self,
        req: AssembleRequest,
        progress: ProgressCallback,
        cancel: CancelToken,
    ) -> Result<VideoArtifact> {
        for pct in [25u8, 50, 75, 100] {
            if cancel.is_cancelled() {
                return Err(Error::Terminal("cancelled during assembly".into()));
            }
            sleep(Duration::from_millis(5)).await;
            progress(pct);
        }
        Ok(VideoArtifact {
            id: format!("video_{}", Uuid::new_v4().simple()),
            path: format!("/tmp/{}.mp4", req.script.id),
            duration_seconds: req.script.estimated_duration_seconds,
        })
    }
}

pub struct MockYoutubeUploader;

#[async_trait::async_trait]
impl YoutubeUploader for MockYoutubeUploader {
    async fn upload(
        &self,
        req: UploadRequest,
        progress: ProgressCallback,
        cancel: CancelToken,
    ) -> Result<UploadResult> {
        for pct in [50u8, 100] {
            if cancel.is_cancelled() {
                return Err(Error::Terminal("cancelled during upload".into()));
            }
            sleep(Duration::from_millis(5)).await;
            progress(pct);
        }
        let video_id = format!("yt_{}", Uuid::new_v4().simple());
        Ok(UploadResult {
            url: format!("https://youtube.example/watch?v={video_id}"),
            video_id,
        })
    }
}
