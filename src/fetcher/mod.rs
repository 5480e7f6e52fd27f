use crate::api::client::MetadataApi;
use crate::api::{AlbumInfo, PageRequest, TrackInfo};
use crate::errors::AppError;
use crate::pool::WorkerPool;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Result messages emitted while an album fetch is in flight. Consumed by
/// the control path; one `Complete` is always the final message of a run
/// that got past the album summary.
#[derive(Debug)]
pub enum FetchEvent {
    Album(AlbumInfo),
    AlbumFailed {
        album_id: u64,
        error: AppError,
    },
    Page {
        page: u32,
        result: Result<Vec<TrackInfo>, AppError>,
    },
    Complete {
        pages_fetched: u32,
        pages_failed: u32,
    },
}

/// Drives one album's metadata retrieval: the album summary first, then
/// page 1, then the remaining pages fanned out over the worker pool.
pub struct AlbumFetcher {
    api: Arc<dyn MetadataApi>,
    pool: WorkerPool,
}

impl AlbumFetcher {
    pub fn new(api: Arc<dyn MetadataApi>, fetch_concurrency: usize) -> Self {
        Self {
            api,
            pool: WorkerPool::new(fetch_concurrency),
        }
    }

    /// Starts fetching and returns the event stream. Pages 2..=N are only
    /// submitted after page 1 has succeeded, because the total page count is
    /// not known before that. Page jobs are independent: a failed page is
    /// reported on its own and never cancels its siblings.
    pub fn fetch_album(&self, album_id: u64, ascending: bool) -> mpsc::UnboundedReceiver<FetchEvent> {
        let (events, receiver) = mpsc::unbounded_channel();
        let api = Arc::clone(&self.api);
        let pool = self.pool.clone();

        tokio::spawn(async move {
            Self::run(api, pool, album_id, ascending, events).await;
        });

        receiver
    }

    async fn run(
        api: Arc<dyn MetadataApi>,
        pool: WorkerPool,
        album_id: u64,
        ascending: bool,
        events: mpsc::UnboundedSender<FetchEvent>,
    ) {
        let album = {
            let (result_tx, result_rx) = oneshot::channel();
            let api = Arc::clone(&api);
            pool.submit(async move {
                let _ = result_tx.send(api.fetch_album_info(album_id).await);
            });

            match result_rx.await {
                Ok(Ok(album)) => album,
                Ok(Err(error)) => {
                    warn!("Failed to fetch album {}: {}", album_id, error);
                    let _ = events.send(FetchEvent::AlbumFailed { album_id, error });
                    return;
                }
                Err(_) => return,
            }
        };

        info!(
            "Album {}: \"{}\", {} tracks ({})",
            album_id,
            album.title,
            album.track_count,
            album.album_type.as_str()
        );
        let _ = events.send(FetchEvent::Album(album));

        let first_page = {
            let (result_tx, result_rx) = oneshot::channel();
            let api = Arc::clone(&api);
            let request = PageRequest {
                album_id,
                page: 1,
                ascending,
            };
            pool.submit(async move {
                let _ = result_tx.send(api.fetch_track_page(&request).await);
            });

            match result_rx.await {
                Ok(result) => result,
                Err(_) => return,
            }
        };

        let total_pages = match first_page {
            Ok(page) => {
                let total = page.total_pages;
                let _ = events.send(FetchEvent::Page {
                    page: 1,
                    result: Ok(page.tracks),
                });
                total
            }
            Err(error) => {
                warn!("Failed to fetch page 1 of album {}: {}", album_id, error);
                let _ = events.send(FetchEvent::Page {
                    page: 1,
                    result: Err(error),
                });
                let _ = events.send(FetchEvent::Complete {
                    pages_fetched: 0,
                    pages_failed: 1,
                });
                return;
            }
        };

        let mut pages_fetched = 1u32;
        let mut pages_failed = 0u32;

        let (page_tx, mut page_rx) = mpsc::unbounded_channel();
        for page in 2..=total_pages {
            let api = Arc::clone(&api);
            let page_tx = page_tx.clone();
            let request = PageRequest {
                album_id,
                page,
                ascending,
            };
            pool.submit(async move {
                let _ = page_tx.send((page, api.fetch_track_page(&request).await));
            });
        }
        drop(page_tx);

        // Completions arrive in whatever order the pool finishes them.
        while let Some((page, result)) = page_rx.recv().await {
            match result {
                Ok(track_page) => {
                    pages_fetched += 1;
                    let _ = events.send(FetchEvent::Page {
                        page,
                        result: Ok(track_page.tracks),
                    });
                }
                Err(error) => {
                    pages_failed += 1;
                    warn!(
                        "Failed to fetch page {} of album {}: {}",
                        page, album_id, error
                    );
                    let _ = events.send(FetchEvent::Page {
                        page,
                        result: Err(error),
                    });
                }
            }
        }

        let _ = events.send(FetchEvent::Complete {
            pages_fetched,
            pages_failed,
        });
    }
}

/// The visible track list for the current album. Owned and mutated only by
/// the control path; pages are appended in arrival order, which may differ
/// from ordinal order when pages complete out of order. Callers that need
/// strict order re-sort by [`TrackInfo::index`].
pub struct TrackList {
    album: AlbumInfo,
    tracks: Vec<TrackInfo>,
    seen: HashSet<u64>,
}

impl TrackList {
    pub fn new(album: AlbumInfo) -> Self {
        Self {
            tracks: Vec::with_capacity(album.track_count as usize),
            seen: HashSet::new(),
            album,
        }
    }

    /// Appends one page's tracks, preserving their in-page order. Duplicate
    /// track ids (a re-delivered page) are dropped, and the list never grows
    /// past the album's reported track count. Eager URLs are cleared when
    /// the album type marks them as trial stubs.
    pub fn extend_from_page(&mut self, page: Vec<TrackInfo>) -> usize {
        let mut added = 0;
        for mut track in page {
            if self.tracks.len() >= self.album.track_count as usize {
                warn!(
                    "Dropping track {} beyond the reported count of album {}",
                    track.id, self.album.id
                );
                break;
            }
            if !self.seen.insert(track.id) {
                continue;
            }
            if !self.album.album_type.eager_urls_usable() {
                track.clear_urls();
            }
            self.tracks.push(track);
            added += 1;
        }
        added
    }

    pub fn album(&self) -> &AlbumInfo {
        &self.album
    }

    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn into_tracks(self) -> Vec<TrackInfo> {
        self.tracks
    }
}
