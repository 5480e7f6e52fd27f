pub mod http;
pub mod queue;

use crate::api::TrackInfo;
use crate::config::AudioFormat;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    ResolvingUrl,
    Downloading,
    Succeeded,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Succeeded | DownloadStatus::Failed)
    }
}

/// One queued, independent file-write operation derived from a selected
/// track. Tasks never retry automatically and never affect their siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: String,
    pub track: TrackInfo,
    /// 1-based position among the selected tracks, assigned at submission
    /// time. Stable regardless of completion order.
    pub number: u32,
    pub output_path: PathBuf,
    pub status: DownloadStatus,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Transport used to pull track bytes. The production implementation is
/// [`http::HttpTrackSource`]; tests substitute fakes.
#[async_trait::async_trait]
pub trait TrackSource: Send + Sync {
    /// Streams the media at `url` into `sink`, returning the byte count.
    async fn fetch(
        &self,
        url: &str,
        sink: &mut (dyn tokio::io::AsyncWrite + Unpin + Send),
    ) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Album directory the files are written into.
    pub dir: PathBuf,
    pub format: AudioFormat,
    /// Prefix file names with a zero-padded number sized to the selection.
    pub number_files: bool,
    pub max_concurrency: usize,
    /// Auth cookie passed to URL resolution; may be empty.
    pub cookie: String,
}
