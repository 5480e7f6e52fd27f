use crate::api::{AlbumInfo, AlbumType, PageRequest, TrackInfo, TrackPage, PAGE_SIZE};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use log::debug;
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

const ALBUM_INFO_URL: &str = "https://mobile.ximalaya.com/mobile/v1/album/basic";
const TRACK_PAGE_URL: &str = "https://mobile.ximalaya.com/mobile/v1/album/track";
const TRACK_PAY_URL: &str = "https://mpay.ximalaya.com/mobile/track/pay";

/// Upper sanity bound for album ids, matching the id input validation of the
/// web client.
pub const MAX_ALBUM_ID: u64 = 100_000_000;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Metadata API surface used by the fetch and download pipelines. The
/// concrete implementation is [`XimalayaClient`]; tests substitute mocks.
#[async_trait]
pub trait MetadataApi: Send + Sync {
    async fn fetch_album_info(&self, album_id: u64) -> Result<AlbumInfo>;

    async fn fetch_track_page(&self, request: &PageRequest) -> Result<TrackPage>;

    /// Resolves a currently-valid playable URL for a track whose eager URL
    /// is absent or known-invalid. `cookie` may be empty for tracks that do
    /// not require authentication.
    async fn resolve_track_url(&self, track_id: u64, cookie: &str) -> Result<String>;
}

pub struct XimalayaClient {
    client: Client,
    resolved_urls: Cache<u64, String>,
}

impl XimalayaClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            // Resolved pay-track URLs expire server-side after a while, so
            // cache them only briefly.
            resolved_urls: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(30 * 60))
                .build(),
        })
    }

    pub fn validate_album_id(album_id: u64) -> Result<()> {
        if album_id == 0 || album_id >= MAX_ALBUM_ID {
            return Err(AppError::Validation(format!(
                "Album id {} is out of range (1..{})",
                album_id, MAX_ALBUM_ID
            )));
        }
        Ok(())
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)], cookie: &str) -> Result<Value> {
        let mut request = self.client.get(url).query(query);
        if !cookie.is_empty() {
            request = request.header("Cookie", cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Request to {} failed: {}", url, e)))?;

        check_status(response.status(), url)?;

        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::MalformedResponse(format!("Invalid JSON from {}: {}", url, e)))
    }
}

#[async_trait]
impl MetadataApi for XimalayaClient {
    async fn fetch_album_info(&self, album_id: u64) -> Result<AlbumInfo> {
        Self::validate_album_id(album_id)?;

        let json = self
            .get_json(
                ALBUM_INFO_URL,
                &[("albumId", album_id.to_string())],
                "",
            )
            .await?;

        check_ret_code(&json, &format!("album {}", album_id))?;

        let album = &json["data"]["album"];
        if album.is_null() {
            return Err(AppError::NotFound(format!("Album {} does not exist", album_id)));
        }

        Ok(AlbumInfo {
            id: album_id,
            title: json_str(album, "title")?,
            track_count: json_u64(album, "tracks")? as u32,
            album_type: AlbumType::from_code(album["priceTypeId"].as_i64().unwrap_or(0)),
        })
    }

    async fn fetch_track_page(&self, request: &PageRequest) -> Result<TrackPage> {
        Self::validate_album_id(request.album_id)?;
        if request.page == 0 {
            return Err(AppError::Validation("Page numbers start at 1".to_string()));
        }

        let json = self
            .get_json(
                TRACK_PAGE_URL,
                &[
                    ("albumId", request.album_id.to_string()),
                    ("pageId", request.page.to_string()),
                    ("pageSize", PAGE_SIZE.to_string()),
                    ("isAsc", request.ascending.to_string()),
                ],
                "",
            )
            .await?;

        check_ret_code(&json, &format!("album {} page {}", request.album_id, request.page))?;

        let data = &json["data"];
        let total_pages = json_u64(data, "maxPageId")? as u32;
        let list = data["list"]
            .as_array()
            .ok_or_else(|| {
                AppError::MalformedResponse(format!(
                    "Track list missing for album {} page {}",
                    request.album_id, request.page
                ))
            })?;

        let mut tracks = Vec::with_capacity(list.len());
        for entry in list {
            tracks.push(TrackInfo {
                id: json_u64(entry, "trackId")?,
                title: json_str(entry, "title")?,
                duration_secs: entry["duration"].as_u64().unwrap_or(0) as u32,
                index: entry["orderNo"].as_u64().unwrap_or(0) as u32,
                mp3_url: non_empty(entry["playUrl64"].as_str()),
                m4a_url: non_empty(entry["playPathAacv164"].as_str()),
            });
        }

        debug!(
            "Fetched page {}/{} of album {} ({} tracks)",
            request.page,
            total_pages,
            request.album_id,
            tracks.len()
        );

        Ok(TrackPage { tracks, total_pages })
    }

    async fn resolve_track_url(&self, track_id: u64, cookie: &str) -> Result<String> {
        if let Some(url) = self.resolved_urls.get(&track_id).await {
            debug!("Resolved URL for track {} served from cache", track_id);
            return Ok(url);
        }

        let json = self
            .get_json(
                TRACK_PAY_URL,
                &[
                    ("trackId", track_id.to_string()),
                    ("device", "pc".to_string()),
                ],
                cookie,
            )
            .await?;

        match json["ret"].as_i64() {
            Some(0) => {}
            Some(726) | Some(727) => {
                return Err(AppError::Auth(format!(
                    "Cookie is missing or expired; track {} requires login",
                    track_id
                )))
            }
            Some(1001) => {
                return Err(AppError::Auth(format!(
                    "Track {} has not been purchased by this account",
                    track_id
                )))
            }
            Some(code) => {
                return Err(AppError::MalformedResponse(format!(
                    "Pay endpoint returned code {} for track {}: {}",
                    code,
                    track_id,
                    json["msg"].as_str().unwrap_or("no message")
                )))
            }
            None => {
                return Err(AppError::MalformedResponse(format!(
                    "Pay endpoint response for track {} has no ret code",
                    track_id
                )))
            }
        }

        let resolved = json_str(&json["data"], "playUrl")?;
        url::Url::parse(&resolved).map_err(|e| {
            AppError::MalformedResponse(format!(
                "Resolved URL for track {} is not a valid URL: {}",
                track_id, e
            ))
        })?;

        self.resolved_urls.insert(track_id, resolved.clone()).await;
        Ok(resolved)
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<()> {
    match status {
        StatusCode::NOT_FOUND => Err(AppError::NotFound(format!("{} returned 404", url))),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::Auth(format!(
            "{} rejected the request with {}",
            url, status
        ))),
        s if !s.is_success() => Err(AppError::Network(format!("{} returned {}", url, s))),
        _ => Ok(()),
    }
}

/// The mobile endpoints signal application-level failure through a `ret`
/// field even on HTTP 200.
fn check_ret_code(json: &Value, context: &str) -> Result<()> {
    match json["ret"].as_i64() {
        Some(0) | None => Ok(()),
        Some(404) => Err(AppError::NotFound(format!("{} does not exist", context))),
        Some(code) => Err(AppError::MalformedResponse(format!(
            "Request for {} failed with code {}: {}",
            context,
            code,
            json["msg"].as_str().unwrap_or("no message")
        ))),
    }
}

fn json_str(value: &Value, field: &str) -> Result<String> {
    value[field]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::MalformedResponse(format!("Missing string field `{}`", field)))
}

fn json_u64(value: &Value, field: &str) -> Result<u64> {
    value[field]
        .as_u64()
        .ok_or_else(|| AppError::MalformedResponse(format!("Missing numeric field `{}`", field)))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(|s| s.to_string())
}
