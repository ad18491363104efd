use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::history::History;
use crate::models::{NewPlay, PlayRecord};
use crate::spotify::{NowPlaying, Playback, Provider};
use crate::tokens::TokenService;
use crate::{Result, LOG};

#[derive(Debug, PartialEq)]
pub enum PollOutcome {
    NotAuthenticated,
    NothingPlaying,
    /// same play as the latest record, nothing written
    Unchanged,
    Recorded(PlayRecord),
}

/// A report of `now_playing` at `now` is the same play as `last` if the
/// track and artists match and `last` should still be playing.
pub fn is_same_play(last: &PlayRecord, now_playing: &NowPlaying, now: DateTime<Utc>) -> bool {
    last.name == now_playing.name && last.artist == now_playing.artist && now < last.ends_at()
}

/// Where the tick after `scheduled` lands given the poll finished at
/// `finished`, along with how many ticks were missed while it ran.
pub fn next_tick(scheduled: Instant, finished: Instant, period: Duration) -> (Instant, u32) {
    let next = scheduled + period;
    if finished < next {
        return (next, 0);
    }
    let behind = finished.duration_since(next).as_nanos();
    let skipped = (behind / period.as_nanos().max(1)) as u32 + 1;
    (next + period * skipped, skipped)
}

pub struct Poller {
    tokens: Arc<TokenService>,
    provider: Arc<dyn Provider>,
    history: History,
    interval: Duration,
}

impl Poller {
    pub fn new(
        tokens: Arc<TokenService>,
        provider: Arc<dyn Provider>,
        history: History,
        interval: Duration,
    ) -> Self {
        Self {
            tokens,
            provider,
            history,
            interval,
        }
    }

    pub async fn poll_once(&self) -> Result<PollOutcome> {
        self.poll_at(Utc::now()).await
    }

    /// One poll as of `now`: refresh if needed, ask spotify what's playing
    /// and record it unless it's the play we already have.
    pub async fn poll_at(&self, now: DateTime<Utc>) -> Result<PollOutcome> {
        self.tokens.ensure_valid_token_at(false, now).await;
        let access_token = match self.tokens.access_token().await {
            None => return Ok(PollOutcome::NotAuthenticated),
            Some(token) => token,
        };

        let current = match self.provider.currently_playing(&access_token).await? {
            Playback::Nothing => return Ok(PollOutcome::NothingPlaying),
            Playback::State(current) => current,
        };
        let now_playing = match NowPlaying::from_value(&current)? {
            None => return Ok(PollOutcome::NothingPlaying),
            Some(now_playing) => now_playing,
        };

        if let Some(last) = self.history.latest().await? {
            if is_same_play(&last, &now_playing, now) {
                slog::debug!(
                    LOG, "currently listening to {} (no change)", now_playing.name;
                    "progress_ms" => now_playing.progress_ms,
                );
                return Ok(PollOutcome::Unchanged);
            }
        }

        let record = self
            .history
            .append(&NewPlay {
                name: now_playing.name,
                artist: now_playing.artist,
                recorded_at: now,
                duration_ms: now_playing.duration_ms,
            })
            .await?;
        slog::info!(
            LOG, "new current song {}", record.name;
            "artist" => &record.artist,
            "play_id" => record.id,
            "duration_ms" => record.duration_ms,
        );
        Ok(PollOutcome::Recorded(record))
    }

    /// Poll forever, once per interval. A poll that runs past its tick
    /// delays the next one instead of overlapping it.
    pub async fn run(self) {
        slog::info!(
            LOG, "starting currently playing poll";
            "interval_ms" => self.interval.as_millis() as u64,
        );
        let mut scheduled = Instant::now() + self.interval;
        loop {
            let now = Instant::now();
            if scheduled > now {
                async_std::task::sleep(scheduled - now).await;
            }
            if let Err(e) = self.poll_once().await {
                slog::error!(LOG, "error while running currently playing poll"; "error" => %e);
            }
            let (next, skipped) = next_tick(scheduled, Instant::now(), self.interval);
            if skipped > 0 {
                slog::warn!(LOG, "poll overran its interval"; "skipped_ticks" => skipped);
            }
            scheduled = next;
        }
    }
}
