pub mod client;

use crate::config::AudioFormat;
use serde::{Deserialize, Serialize};

/// Number of tracks per metadata page, fixed by the track-list endpoint.
pub const PAGE_SIZE: u32 = 20;

/// Server-side album classifier. Only subscription albums carry usable
/// static play URLs; everything else serves trial stubs that must be
/// resolved through the pay-track endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlbumType {
    Subscription,
    Paid,
    Trial,
    Unknown,
}

impl AlbumType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => AlbumType::Subscription,
            2 => AlbumType::Paid,
            3 => AlbumType::Trial,
            _ => AlbumType::Unknown,
        }
    }

    /// Whether the eagerly-fetched per-track URLs can be used as-is.
    pub fn eager_urls_usable(self) -> bool {
        matches!(self, AlbumType::Subscription)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlbumType::Subscription => "subscription",
            AlbumType::Paid => "paid",
            AlbumType::Trial => "trial",
            AlbumType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumInfo {
    pub id: u64,
    pub title: String,
    pub track_count: u32,
    pub album_type: AlbumType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: u64,
    pub title: String,
    pub duration_secs: u32,
    /// Ordinal position within the album, independent of arrival order.
    pub index: u32,
    pub mp3_url: Option<String>,
    pub m4a_url: Option<String>,
}

impl TrackInfo {
    pub fn url_for(&self, format: AudioFormat) -> Option<&str> {
        match format {
            AudioFormat::Mp3 => self.mp3_url.as_deref(),
            AudioFormat::M4a => self.m4a_url.as_deref(),
        }
    }

    /// Drops the eagerly-fetched URLs so downloads go through on-demand
    /// resolution instead.
    pub fn clear_urls(&mut self) {
        self.mp3_url = None;
        self.m4a_url = None;
    }
}

/// One page of track metadata plus the total page count reported alongside it.
#[derive(Debug, Clone)]
pub struct TrackPage {
    pub tracks: Vec<TrackInfo>,
    pub total_pages: u32,
}

/// A request for one page of an album's track list. Stateless and idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub album_id: u64,
    pub page: u32,
    pub ascending: bool,
}
