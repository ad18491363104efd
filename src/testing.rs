//! Shared fixtures for unit tests
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::spotify::{Playback, Provider, TokenGrant};
use crate::{se, Result};

pub const KEY: &[u8] = b"01234567890123456789012345678901";

/// A single-connection in-memory database with the schema applied.
/// The connection is never recycled since that would drop the data.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    crate::db::migrate(&pool).await.expect("migrations");
    pool
}

/// A currently-playing body for a track that is playing
pub fn playing(name: &str, artists: &[&str], duration_ms: i64) -> serde_json::Value {
    json!({
        "is_playing": true,
        "progress_ms": 1_000,
        "item": {
            "name": name,
            "duration_ms": duration_ms,
            "artists": artists.iter().map(|a| json!({"name": a})).collect::<Vec<_>>(),
            "album": {"images": [{"url": "https://i.scdn.co/image/cover"}]},
        },
    })
}

/// Scripted stand-in for spotify. Refresh and exchange results are fixed,
/// currently-playing responses are replayed in order and the last one repeats.
pub struct FakeProvider {
    pub grant: Mutex<std::result::Result<TokenGrant, String>>,
    pub playback: Mutex<VecDeque<std::result::Result<Playback, String>>>,
    pub refresh_calls: AtomicUsize,
    pub playing_calls: AtomicUsize,
    pub seen_tokens: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            grant: Mutex::new(Ok(TokenGrant {
                access_token: "fresh-access".to_string(),
                expires_in: 3600,
                refresh_token: None,
            })),
            playback: Mutex::new(VecDeque::from(vec![Ok(Playback::Nothing)])),
            refresh_calls: AtomicUsize::new(0),
            playing_calls: AtomicUsize::new(0),
            seen_tokens: Mutex::new(vec![]),
        }
    }

    pub fn failing_refresh(self, message: &str) -> Self {
        *self.grant.lock().unwrap() = Err(message.to_string());
        self
    }

    pub fn set_grant(&self, grant: TokenGrant) {
        *self.grant.lock().unwrap() = Ok(grant);
    }

    pub fn push(&self, playback: std::result::Result<Playback, String>) {
        self.playback.lock().unwrap().push_back(playback);
    }

    /// Replace the queue so every call returns `playback`
    pub fn always(&self, playback: std::result::Result<Playback, String>) {
        let mut q = self.playback.lock().unwrap();
        q.clear();
        q.push_back(playback);
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.playing_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for FakeProvider {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        if code == "bad" {
            return Err(se!("token endpoint returned 400 Bad Request"));
        }
        Ok(TokenGrant {
            access_token: format!("access-for-{}", code),
            expires_in: 3600,
            refresh_token: Some(format!("refresh-for-{}", code)),
        })
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.grant.lock().unwrap().clone().map_err(|e| se!("{}", e))
    }

    async fn currently_playing(&self, access_token: &str) -> Result<Playback> {
        self.playing_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens
            .lock()
            .unwrap()
            .push(access_token.to_string());
        let mut q = self.playback.lock().unwrap();
        let next = if q.len() > 1 {
            q.pop_front()
        } else {
            q.front().cloned()
        };
        next.unwrap_or(Ok(Playback::Nothing))
            .map_err(|e| se!("{}", e))
    }
}
