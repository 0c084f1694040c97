//! The three-stage production pipeline: script -> assemble -> upload.
//!
//! This is the operation handed to `JobExecutor::execute` for a due job. It
//! owns no state of its own; every stage transition and progress tick is
//! reported through `on_update` so the caller (the scheduler) can persist it
//! and publish it on the event bus.

use std::sync::Arc;

use cps_capabilities::{
    AssembleRequest, CancelToken, ProgressCallback, ScriptGenerator, ScriptRequest, UploadMetadata,
    UploadRequest, VideoAssembler, YoutubeUploader,
};
use cps_domain::error::Result;
use cps_domain::job::{Job, JobResult, Stage};

/// The three external collaborators a pipeline run needs. Held behind `Arc`
/// so the same set can be shared across every concurrently-running job.
pub struct Capabilities {
    pub scripts: Arc<dyn ScriptGenerator>,
    pub assembler: Arc<dyn VideoAssembler>,
    pub uploader: Arc<dyn YoutubeUploader>,
}

#[derive(Debug, Clone, Copy)]
pub struct StageUpdate {
    pub stage: Stage,
    pub progress: u8,
}

pub type StageCallback = Arc<dyn Fn(StageUpdate) + Send + Sync>;

/// Run one attempt of the pipeline for `job`. Each call starts fresh at the
/// SCRIPT stage — attempts are not resumable across stage boundaries.
pub async fn run(
    capabilities: &Capabilities,
    job: &Job,
    on_update: StageCallback,
    cancel: CancelToken,
) -> Result<JobResult> {
    on_update(StageUpdate {
        stage: Stage::Script,
        progress: 0,
    });
    let script = capabilities
        .scripts
        .generate(
            ScriptRequest {
                topic: job.topic.clone(),
                style: job.style.clone(),
                duration_seconds: job.duration_seconds,
                tags: job.tags.clone(),
            },
            cancel.clone(),
        )
        .await?;
    on_update(StageUpdate {
        stage: Stage::Script,
        progress: 33,
    });

    let assemble_update = on_update.clone();
    let assemble_progress: ProgressCallback = Arc::new(move |pct: u8| {
        let mapped = 33 + (pct as u32 * 33 / 100) as u8;
        assemble_update(StageUpdate {
            stage: Stage::Assemble,
            progress: mapped.min(66),
        });
    });
    let artifact = capabilities
        .assembler
        .assemble(
            AssembleRequest {
                script: script.clone(),
                assets: Vec::new(),
                voice: None,
            },
            assemble_progress,
            cancel.clone(),
        )
        .await?;
    on_update(StageUpdate {
        stage: Stage::Assemble,
        progress: 66,
    });

    let upload_update = on_update.clone();
    let upload_progress: ProgressCallback = Arc::new(move |pct: u8| {
        let mapped = 66 + (pct as u32 * 34 / 100) as u8;
        upload_update(StageUpdate {
            stage: Stage::Upload,
            progress: mapped.min(100),
        });
    });
    let upload_result = capabilities
        .uploader
        .upload(
            UploadRequest {
                artifact: artifact.clone(),
                metadata: UploadMetadata {
                    title: job.topic.clone(),
                    tags: job.tags.clone(),
                    category: job.category.clone(),
                    privacy: job.privacy,
                },
                publish_at: job.publish_at,
            },
            upload_progress,
            cancel,
        )
        .await?;

    on_update(StageUpdate {
        stage: Stage::Done,
        progress: 100,
    });

    Ok(JobResult {
        script_id: Some(script.id),
        video_path: Some(artifact.path),
        video_id: Some(upload_result.video_id),
        url: Some(upload_result.url),
    })
}
