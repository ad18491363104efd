use chrono::{DateTime, Utc};

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, serde::Serialize)]
pub struct PlayRecord {
    pub id: i64,
    pub name: String,
    // one or more artist names joined with ", "
    pub artist: String,
    // assigned when the poller inserts the play
    pub recorded_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl PlayRecord {
    /// The instant this play is expected to have finished. A duration that
    /// runs off the end of the calendar never finishes.
    pub fn ends_at(&self) -> DateTime<Utc> {
        chrono::Duration::try_milliseconds(self.duration_ms)
            .and_then(|d| self.recorded_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPlay {
    pub name: String,
    pub artist: String,
    pub recorded_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenState {
    // a spotify access token, short lived
    pub access_token: String,
    // a spotify token that can be used to get a new `access_token`.
    // spotify may hand back a replacement when refreshing.
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenState {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One page of play history, newest first
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page {
    pub tracks: Vec<PlayRecord>,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

/// Live "now playing" snapshot shown to callers
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CurrentTrack {
    pub name: String,
    pub artist: String,
    pub album_cover: Option<String>,
}
