pub mod cancel;
pub mod mock;
pub mod traits;

pub use cancel::CancelToken;
pub use traits::{
    no_progress, AssembleRequest, ProgressCallback, Script, ScriptGenerator, ScriptRequest,
    UploadMetadata, UploadRequest, UploadResult, VideoArtifact, VideoAssembler, YoutubeUploader,
};
