use crate::api::client::MetadataApi;
use crate::api::TrackInfo;
use crate::downloader::{DownloadOptions, DownloadStatus, DownloadTask, TrackSource};
use crate::errors::{AppError, Result};
use crate::pool::WorkerPool;
use crate::utils::{ensure_dir_exists, generate_task_id, int_width, sanitize_filename};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Result messages emitted while a download run is in flight. One
/// `Complete` is always the final message once every task is terminal.
#[derive(Debug)]
pub enum DownloadEvent {
    TaskState {
        number: u32,
        track_id: u64,
        status: DownloadStatus,
    },
    TaskFinished {
        number: u32,
        track_id: u64,
        title: String,
        error: Option<String>,
    },
    Complete {
        succeeded: usize,
        failed: usize,
    },
}

/// Running counters for aggregate progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounts {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueCounts {
    pub fn pending(&self) -> usize {
        self.total - self.completed - self.failed
    }
}

struct Counters {
    completed: AtomicUsize,
    failed: AtomicUsize,
    finished: AtomicUsize,
    total: usize,
}

/// Holds one download run's tasks and drives them through a dedicated
/// worker pool. Tasks are mutually independent: a failure never blocks,
/// cancels, or retries a sibling.
pub struct DownloadQueue {
    tasks: Arc<Mutex<HashMap<String, DownloadTask>>>,
    task_order: Vec<String>,
    counters: Arc<Counters>,
    pool: WorkerPool,
    dir: PathBuf,
    format: crate::config::AudioFormat,
    cookie: String,
}

impl DownloadQueue {
    /// Builds the task set for a selection of tracks. Numbering restarts at
    /// 1 for each run and the zero-pad width is sized to the selection, so
    /// file names sort in selection order.
    pub fn plan(tracks: Vec<TrackInfo>, album_title: &str, options: DownloadOptions) -> Self {
        let width = int_width(tracks.len());
        let extension = options.format.extension();

        let mut album_dir_name = sanitize_filename(album_title);
        if album_dir_name.is_empty() {
            album_dir_name = "album".to_string();
        }
        let dir = options.dir.join(album_dir_name);

        let total = tracks.len();
        let mut task_map = HashMap::with_capacity(total);
        let mut task_order = Vec::with_capacity(total);

        for (position, track) in tracks.into_iter().enumerate() {
            let number = (position + 1) as u32;
            let mut name = sanitize_filename(&track.title);
            if name.is_empty() {
                name = format!("track-{}", track.id);
            }
            let file_name = if options.number_files {
                format!("{:0width$} - {}.{}", number, name, extension, width = width)
            } else {
                format!("{}.{}", name, extension)
            };

            let id = generate_task_id();
            task_order.push(id.clone());
            task_map.insert(
                id.clone(),
                DownloadTask {
                    id,
                    track,
                    number,
                    output_path: dir.join(file_name),
                    status: DownloadStatus::Pending,
                    error: None,
                    created_at: chrono::Utc::now(),
                    completed_at: None,
                },
            );
        }

        Self {
            tasks: Arc::new(Mutex::new(task_map)),
            task_order,
            counters: Arc::new(Counters {
                completed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                total,
            }),
            pool: WorkerPool::new(options.max_concurrency),
            dir,
            format: options.format,
            cookie: options.cookie,
        }
    }

    /// Submits every task to the pool and returns the event stream.
    pub async fn start(
        &self,
        api: Arc<dyn MetadataApi>,
        source: Arc<dyn TrackSource>,
    ) -> Result<mpsc::UnboundedReceiver<DownloadEvent>> {
        let (events, receiver) = mpsc::unbounded_channel();

        if self.task_order.is_empty() {
            let _ = events.send(DownloadEvent::Complete {
                succeeded: 0,
                failed: 0,
            });
            return Ok(receiver);
        }

        ensure_dir_exists(&self.dir).await?;
        info!(
            "Starting download of {} tracks into {:?} ({} at a time)",
            self.task_order.len(),
            self.dir,
            self.pool.max_concurrency()
        );

        for task_id in &self.task_order {
            let api = Arc::clone(&api);
            let source = Arc::clone(&source);
            let tasks = Arc::clone(&self.tasks);
            let counters = Arc::clone(&self.counters);
            let events = events.clone();
            let task_id = task_id.clone();
            let cookie = self.cookie.clone();
            let format = self.format;
            let dir = self.dir.clone();

            self.pool.submit(async move {
                Self::run_task(api, source, tasks, counters, events, task_id, cookie, format, dir)
                    .await;
            });
        }

        Ok(receiver)
    }

    /// Snapshot of the aggregate progress counters.
    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            total: self.counters.total,
        }
    }

    /// Snapshot of all tasks in numbering order.
    pub async fn tasks(&self) -> Vec<DownloadTask> {
        let tasks = self.tasks.lock().await;
        let mut list: Vec<DownloadTask> = tasks.values().cloned().collect();
        list.sort_by_key(|task| task.number);
        list
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_task(
        api: Arc<dyn MetadataApi>,
        source: Arc<dyn TrackSource>,
        tasks: Arc<Mutex<HashMap<String, DownloadTask>>>,
        counters: Arc<Counters>,
        events: mpsc::UnboundedSender<DownloadEvent>,
        task_id: String,
        cookie: String,
        format: crate::config::AudioFormat,
        dir: PathBuf,
    ) {
        let (track, output_path) = {
            let tasks = tasks.lock().await;
            match tasks.get(&task_id) {
                Some(task) => (task.track.clone(), task.output_path.clone()),
                None => return,
            }
        };

        // Resolve lazily: only when the eagerly-fetched URL is absent.
        let url = match track.url_for(format) {
            Some(url) => Ok(url.to_string()),
            None => {
                Self::set_status(&tasks, &events, &task_id, DownloadStatus::ResolvingUrl).await;
                api.resolve_track_url(track.id, &cookie).await
            }
        };

        let url = match url {
            Ok(url) => url,
            Err(error) => {
                // Resolution failed: the task terminates without ever
                // issuing a write.
                Self::finish_task(&tasks, &counters, &events, &task_id, Err(error)).await;
                return;
            }
        };

        Self::set_status(&tasks, &events, &task_id, DownloadStatus::Downloading).await;

        let result = Self::write_track(source.as_ref(), &url, &output_path, &dir).await;
        Self::finish_task(&tasks, &counters, &events, &task_id, result).await;
    }

    /// Streams the track into a temporary file in the target directory and
    /// persists it only on success; every failure path drops the temp file.
    async fn write_track(
        source: &dyn TrackSource,
        url: &str,
        output_path: &Path,
        dir: &Path,
    ) -> Result<u64> {
        let temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| AppError::Filesystem(format!("Could not create temp file: {}", e)))?;
        let std_file = temp
            .as_file()
            .try_clone()
            .map_err(|e| AppError::Filesystem(format!("Could not clone temp handle: {}", e)))?;
        let mut sink = tokio::fs::File::from_std(std_file);

        let written = source.fetch(url, &mut sink).await?;

        temp.persist(output_path)
            .map_err(|e| AppError::Filesystem(format!("Could not persist {:?}: {}", output_path, e)))?;

        Ok(written)
    }

    async fn set_status(
        tasks: &Arc<Mutex<HashMap<String, DownloadTask>>>,
        events: &mpsc::UnboundedSender<DownloadEvent>,
        task_id: &str,
        status: DownloadStatus,
    ) {
        let mut tasks = tasks.lock().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.status = status;
            let _ = events.send(DownloadEvent::TaskState {
                number: task.number,
                track_id: task.track.id,
                status,
            });
        }
    }

    async fn finish_task(
        tasks: &Arc<Mutex<HashMap<String, DownloadTask>>>,
        counters: &Arc<Counters>,
        events: &mpsc::UnboundedSender<DownloadEvent>,
        task_id: &str,
        result: Result<u64>,
    ) {
        let (number, track_id, title, error) = {
            let mut tasks = tasks.lock().await;
            let task = match tasks.get_mut(task_id) {
                Some(task) => task,
                None => return,
            };

            task.completed_at = Some(chrono::Utc::now());
            match &result {
                Ok(bytes) => {
                    task.status = DownloadStatus::Succeeded;
                    info!(
                        "Track {} ({}) finished, {} bytes",
                        task.track.id, task.track.title, bytes
                    );
                }
                Err(error) => {
                    task.status = DownloadStatus::Failed;
                    task.error = Some(error.to_string());
                    warn!(
                        "Track {} ({}) failed: {}",
                        task.track.id, task.track.title, error
                    );
                }
            }

            (
                task.number,
                task.track.id,
                task.track.title.clone(),
                task.error.clone(),
            )
        };

        match result {
            Ok(_) => counters.completed.fetch_add(1, Ordering::SeqCst),
            Err(_) => counters.failed.fetch_add(1, Ordering::SeqCst),
        };

        let _ = events.send(DownloadEvent::TaskFinished {
            number,
            track_id,
            title,
            error,
        });

        // The last task to finish emits the terminal event.
        let finished = counters.finished.fetch_add(1, Ordering::SeqCst) + 1;
        if finished == counters.total {
            let _ = events.send(DownloadEvent::Complete {
                succeeded: counters.completed.load(Ordering::SeqCst),
                failed: counters.failed.load(Ordering::SeqCst),
            });
        }
    }
}
