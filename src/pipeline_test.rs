use crate::api::client::MetadataApi;
use crate::api::{AlbumInfo, AlbumType, PageRequest, TrackInfo, TrackPage, PAGE_SIZE};
use crate::config::AudioFormat;
use crate::downloader::queue::{DownloadEvent, DownloadQueue};
use crate::downloader::{DownloadOptions, DownloadStatus, TrackSource};
use crate::errors::{AppError, Result};
use crate::fetcher::{AlbumFetcher, FetchEvent, TrackList};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct MockApi {
    album: AlbumInfo,
    tracks: Vec<TrackInfo>,
    failing_pages: HashSet<u32>,
    /// `Some` resolves to this URL with `{id}` substituted; `None` fails
    /// resolution with an auth error.
    resolve_url: Option<String>,
    page_requests: Mutex<Vec<u32>>,
    first_page_done: AtomicBool,
    premature_page: AtomicBool,
    resolve_calls: AtomicUsize,
}

impl MockApi {
    fn new(album_type: AlbumType, tracks: Vec<TrackInfo>) -> Self {
        Self {
            album: AlbumInfo {
                id: 12345,
                title: "Mock Album".to_string(),
                track_count: tracks.len() as u32,
                album_type,
            },
            tracks,
            failing_pages: HashSet::new(),
            resolve_url: Some("http://resolved.example/{id}.mp3".to_string()),
            page_requests: Mutex::new(Vec::new()),
            first_page_done: AtomicBool::new(false),
            premature_page: AtomicBool::new(false),
            resolve_calls: AtomicUsize::new(0),
        }
    }

    fn with_failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    fn with_auth_failure(mut self) -> Self {
        self.resolve_url = None;
        self
    }

    fn total_pages(&self) -> u32 {
        ((self.tracks.len() as u32 + PAGE_SIZE - 1) / PAGE_SIZE).max(1)
    }
}

#[async_trait]
impl MetadataApi for MockApi {
    async fn fetch_album_info(&self, album_id: u64) -> Result<AlbumInfo> {
        if album_id != self.album.id {
            return Err(AppError::NotFound(format!("Album {} does not exist", album_id)));
        }
        Ok(self.album.clone())
    }

    async fn fetch_track_page(&self, request: &PageRequest) -> Result<TrackPage> {
        self.page_requests.lock().unwrap().push(request.page);
        if request.page >= 2 && !self.first_page_done.load(Ordering::SeqCst) {
            self.premature_page.store(true, Ordering::SeqCst);
        }
        // Keep page 1 slow enough that a prematurely submitted sibling
        // would be observed above.
        if request.page == 1 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let result = if self.failing_pages.contains(&request.page) {
            Err(AppError::Network(format!(
                "simulated failure on page {}",
                request.page
            )))
        } else {
            let start = ((request.page - 1) * PAGE_SIZE) as usize;
            let end = (start + PAGE_SIZE as usize).min(self.tracks.len());
            let tracks = if start >= self.tracks.len() {
                Vec::new()
            } else {
                self.tracks[start..end].to_vec()
            };
            Ok(TrackPage {
                tracks,
                total_pages: self.total_pages(),
            })
        };

        if request.page == 1 {
            self.first_page_done.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn resolve_track_url(&self, track_id: u64, _cookie: &str) -> Result<String> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        match &self.resolve_url {
            Some(url) => Ok(url.replace("{id}", &track_id.to_string())),
            None => Err(AppError::Auth("Cookie is missing or expired".to_string())),
        }
    }
}

struct MockSource {
    fail_urls_containing: Option<String>,
    fetch_calls: AtomicUsize,
    fetched_urls: Mutex<Vec<String>>,
}

impl MockSource {
    fn new() -> Self {
        Self {
            fail_urls_containing: None,
            fetch_calls: AtomicUsize::new(0),
            fetched_urls: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(pattern: &str) -> Self {
        Self {
            fail_urls_containing: Some(pattern.to_string()),
            ..Self::new()
        }
    }
}

#[async_trait]
impl TrackSource for MockSource {
    async fn fetch(
        &self,
        url: &str,
        sink: &mut (dyn tokio::io::AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        use tokio::io::AsyncWriteExt;

        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetched_urls.lock().unwrap().push(url.to_string());

        if let Some(pattern) = &self.fail_urls_containing {
            if url.contains(pattern) {
                return Err(AppError::Filesystem("simulated write failure".to_string()));
            }
        }

        let payload = b"audio-bytes";
        sink.write_all(payload)
            .await
            .map_err(|e| AppError::Filesystem(e.to_string()))?;
        Ok(payload.len() as u64)
    }
}

fn make_tracks(count: u32, with_urls: bool) -> Vec<TrackInfo> {
    (1..=count as u64)
        .map(|id| TrackInfo {
            id,
            title: format!("Episode {}", id),
            duration_secs: 300,
            index: id as u32,
            mp3_url: with_urls.then(|| format!("http://static.example/{}.mp3", id)),
            m4a_url: None,
        })
        .collect()
}

/// Drives one fetch to completion and aggregates the pages, the way the
/// control path does.
async fn run_fetch(api: Arc<MockApi>) -> (TrackList, u32, u32) {
    let fetcher = AlbumFetcher::new(api.clone() as Arc<dyn MetadataApi>, 4);
    let mut events = fetcher.fetch_album(12345, true);

    let mut list: Option<TrackList> = None;
    let mut fetched = 0;
    let mut failed = 0;
    while let Some(event) = events.recv().await {
        match event {
            FetchEvent::Album(album) => list = Some(TrackList::new(album)),
            FetchEvent::AlbumFailed { error, .. } => panic!("album fetch failed: {}", error),
            FetchEvent::Page { result, .. } => {
                if let (Some(list), Ok(tracks)) = (list.as_mut(), result) {
                    list.extend_from_page(tracks);
                }
            }
            FetchEvent::Complete {
                pages_fetched,
                pages_failed,
            } => {
                fetched = pages_fetched;
                failed = pages_failed;
                break;
            }
        }
    }

    (list.expect("album event missing"), fetched, failed)
}

fn download_options(dir: PathBuf) -> DownloadOptions {
    DownloadOptions {
        dir,
        format: AudioFormat::Mp3,
        number_files: true,
        max_concurrency: 2,
        cookie: String::new(),
    }
}

async fn drain_to_completion(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<DownloadEvent>,
) -> (usize, usize) {
    while let Some(event) = events.recv().await {
        if let DownloadEvent::Complete { succeeded, failed } = event {
            return (succeeded, failed);
        }
    }
    panic!("event stream ended without a Complete event");
}

#[tokio::test]
async fn twenty_five_tracks_need_exactly_two_page_jobs() {
    let api = Arc::new(MockApi::new(AlbumType::Subscription, make_tracks(25, true)));
    let (list, fetched, failed) = run_fetch(api.clone()).await;

    let mut pages = api.page_requests.lock().unwrap().clone();
    pages.sort_unstable();
    assert_eq!(pages, vec![1, 2]);
    assert_eq!((fetched, failed), (2, 0));

    assert_eq!(list.len(), 25);
    let unique: HashSet<u64> = list.tracks().iter().map(|t| t.id).collect();
    assert_eq!(unique.len(), 25);
}

#[tokio::test]
async fn later_pages_wait_for_page_one() {
    // 90 tracks = 5 pages; plenty of siblings to submit prematurely if the
    // gate were broken.
    let api = Arc::new(MockApi::new(AlbumType::Subscription, make_tracks(90, true)));
    let (list, fetched, _) = run_fetch(api.clone()).await;

    assert!(!api.premature_page.load(Ordering::SeqCst));
    assert_eq!(fetched, 5);
    assert_eq!(list.len(), 90);
}

#[tokio::test]
async fn page_failure_is_isolated_from_siblings() {
    let api = Arc::new(
        MockApi::new(AlbumType::Subscription, make_tracks(45, true)).with_failing_page(2),
    );
    let (list, fetched, failed) = run_fetch(api.clone()).await;

    assert_eq!((fetched, failed), (2, 1));
    // Pages 1 and 3 still delivered their 20 + 5 tracks.
    assert_eq!(list.len(), 25);
}

#[tokio::test]
async fn repeated_fetch_yields_identical_track_sets() {
    let api = Arc::new(MockApi::new(AlbumType::Subscription, make_tracks(25, true)));

    let (first, _, _) = run_fetch(api.clone()).await;
    let (second, _, _) = run_fetch(api.clone()).await;

    let mut first_ids: Vec<u64> = first.tracks().iter().map(|t| t.id).collect();
    let mut second_ids: Vec<u64> = second.tracks().iter().map(|t| t.id).collect();
    first_ids.sort_unstable();
    second_ids.sort_unstable();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn failed_task_does_not_disturb_siblings() {
    let temp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockApi::new(AlbumType::Subscription, make_tracks(5, true)));
    let source = Arc::new(MockSource::failing_on("/3.mp3"));

    let queue = DownloadQueue::plan(
        make_tracks(5, true),
        "Mock Album",
        download_options(temp.path().to_path_buf()),
    );
    let mut events = queue
        .start(api as Arc<dyn MetadataApi>, source)
        .await
        .unwrap();

    let (succeeded, failed) = drain_to_completion(&mut events).await;
    assert_eq!((succeeded, failed), (4, 1));

    let counts = queue.counts();
    assert_eq!(counts.completed, 4);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.pending(), 0);

    for task in queue.tasks().await {
        if task.track.id == 3 {
            assert_eq!(task.status, DownloadStatus::Failed);
            assert!(task.error.is_some());
            assert!(!task.output_path.exists());
        } else {
            assert_eq!(task.status, DownloadStatus::Succeeded);
            assert!(task.output_path.exists());
        }
    }
}

#[tokio::test]
async fn cleared_url_resolves_exactly_once_before_downloading() {
    let temp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockApi::new(AlbumType::Paid, make_tracks(1, false)));
    let source = Arc::new(MockSource::new());

    let queue = DownloadQueue::plan(
        make_tracks(1, false),
        "Mock Album",
        download_options(temp.path().to_path_buf()),
    );
    let mut events = queue
        .start(api.clone() as Arc<dyn MetadataApi>, source.clone())
        .await
        .unwrap();

    let (succeeded, failed) = drain_to_completion(&mut events).await;
    assert_eq!((succeeded, failed), (1, 0));

    assert_eq!(api.resolve_calls.load(Ordering::SeqCst), 1);
    let fetched = source.fetched_urls.lock().unwrap().clone();
    assert_eq!(fetched, vec!["http://resolved.example/1.mp3".to_string()]);
}

#[tokio::test]
async fn auth_failure_terminates_task_without_a_write() {
    let temp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockApi::new(AlbumType::Paid, make_tracks(1, false)).with_auth_failure());
    let source = Arc::new(MockSource::new());

    let queue = DownloadQueue::plan(
        make_tracks(1, false),
        "Mock Album",
        download_options(temp.path().to_path_buf()),
    );
    let mut events = queue
        .start(api.clone() as Arc<dyn MetadataApi>, source.clone())
        .await
        .unwrap();

    let (succeeded, failed) = drain_to_completion(&mut events).await;
    assert_eq!((succeeded, failed), (0, 1));

    assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 0);

    let tasks = queue.tasks().await;
    assert_eq!(tasks[0].status, DownloadStatus::Failed);
    assert!(tasks[0].error.as_deref().unwrap().contains("Authentication"));
    assert!(!tasks[0].output_path.exists());

    // The album directory exists but no track file was ever created.
    let dir = tasks[0].output_path.parent().unwrap();
    assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0);
}

#[tokio::test]
async fn download_run_numbers_restart_at_one() {
    let temp = tempfile::tempdir().unwrap();
    // Select tracks 21..=23 out of a larger album; numbering must still
    // start at 1.
    let selected: Vec<TrackInfo> = make_tracks(23, true).split_off(20);
    let queue = DownloadQueue::plan(
        selected,
        "Mock Album",
        download_options(temp.path().to_path_buf()),
    );

    let numbers: Vec<u32> = queue.tasks().await.iter().map(|t| t.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}
