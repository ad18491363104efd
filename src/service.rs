use std::sync::Arc;

use cached::Cached;
use chrono::{DateTime, Utc};

use crate::history::History;
use crate::models::{CurrentTrack, PlayRecord};
use crate::spotify::{self, NowPlaying, Playback, Provider};
use crate::tokens::TokenService;
use crate::{html, resp, se, utils, Result, CONFIG, LOG};

const SCOPE: &str = "user-read-currently-playing";

#[derive(Clone)]
pub struct Context {
    pub tokens: Arc<TokenService>,
    pub provider: Arc<dyn Provider>,
    pub history: History,
}

pub fn app(ctx: Context) -> tide::Server<Context> {
    let mut app = tide::with_state(ctx);
    app.at("/").get(index);
    app.at("/status").get(status);
    app.at("/login").get(login);
    app.at("/callback").get(auth_callback);
    app.at("/currently-playing").get(currently_playing);
    app.at("/current-track").get(current_track);
    app.at("/tracks").get(tracks);
    app.at("/track-list").get(track_list);
    app.with(crate::logging::LogMiddleware::new());
    app
}

pub async fn start(ctx: Context) -> Result<()> {
    let app = app(ctx);
    slog::info!(LOG, "running at {}", CONFIG.host());
    app.listen(CONFIG.host())
        .await
        .map_err(|e| se!("server error {}", e))?;
    Ok(())
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(_req: tide::Request<Context>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &CONFIG.version
    }))
}

/// Send the user to spotify to grant access. Spotify sends them back to
/// `/callback` with a code we can trade for access and refresh tokens.
async fn login(_req: tide::Request<Context>) -> tide::Result {
    let state = new_one_time_login_token().await;
    let redirect_uri = CONFIG.spotify_redirect_url();
    let url = tide::http::Url::parse_with_params(
        &format!("{}/authorize", spotify::ACCOUNTS_URL),
        &[
            ("client_id", CONFIG.spotify_client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", SCOPE),
            ("state", state.as_str()),
        ],
    )?;
    slog::info!(LOG, "redirecting to spotify-auth"; "redirect_uri" => &redirect_uri);
    Ok(tide::Redirect::new(url.to_string()).into())
}

#[derive(Debug, serde::Deserialize)]
struct SpotifyAuthCallback {
    code: Option<String>,
    state: Option<String>,
    // set instead of `code` when the user declines
    error: Option<String>,
}

/// `state` is the one-time token we sent along in `/login`, it has to
/// match exactly once for the `code` to be accepted.
async fn auth_callback(req: tide::Request<Context>) -> tide::Result {
    slog::info!(LOG, "got login redirect");
    let ctx = req.state();
    let callback: SpotifyAuthCallback = match req.query() {
        Ok(callback) => callback,
        Err(e) => {
            slog::warn!(LOG, "invalid callback query params"; "error" => %e);
            return Ok(resp!(status => 400, message => "invalid query parameters"));
        }
    };
    if let Some(error) = callback.error {
        slog::warn!(LOG, "spotify authorization declined"; "error" => &error);
        return Ok(resp!(status => 400, json => serde_json::json!({
            "error": format!("spotify authorization failed: {}", error)
        })));
    }
    let state = callback.state.unwrap_or_default();
    if !is_valid_one_time_login_token(&state).await {
        return Ok(resp!(status => 400, json => serde_json::json!({
            "error": format!("invalid one-time login token {}", state)
        })));
    }
    let code = match callback.code {
        Some(code) if !code.is_empty() => code,
        _ => {
            return Ok(resp!(status => 400, json => serde_json::json!({
                "error": "missing authorization code"
            })))
        }
    };
    match ctx.tokens.authorize(&code).await {
        Ok(_) => Ok(tide::Redirect::new("/").into()),
        Err(e) => {
            slog::error!(LOG, "error exchanging authorization code"; "error" => %e);
            Ok(resp!(status => 400, message => "Error getting Spotify token"))
        }
    }
}

async fn new_one_time_login_token() -> String {
    let s = uuid::Uuid::new_v4().simple().to_string();
    let mut lock = crate::ONE_TIME_TOKENS.lock().await;
    lock.cache_set(s.clone(), ());
    s
}

async fn is_valid_one_time_login_token(state: &str) -> bool {
    let mut lock = crate::ONE_TIME_TOKENS.lock().await;
    lock.cache_remove(&state.to_string()).is_some()
}

/// Refresh if needed, then ask spotify what's playing.
/// `None` when nobody has logged in yet.
async fn fetch_playback(ctx: &Context) -> Option<Result<Playback>> {
    ctx.tokens.ensure_valid_token(false).await;
    let access_token = ctx.tokens.access_token().await?;
    Some(ctx.provider.currently_playing(&access_token).await)
}

fn current_track_of(playback: Playback) -> Result<Option<CurrentTrack>> {
    match playback {
        Playback::Nothing => Ok(None),
        Playback::State(current) => {
            Ok(NowPlaying::from_value(&current)?.map(|now| now.current_track()))
        }
    }
}

async fn currently_playing(req: tide::Request<Context>) -> tide::Result {
    match fetch_playback(req.state()).await {
        None => Ok(resp!(status => 401, message => "Not authenticated")),
        Some(Ok(Playback::State(current))) => Ok(resp!(json => current)),
        Some(Ok(Playback::Nothing)) => Ok(resp!(json => serde_json::json!({
            "message": "No track is currently playing."
        }))),
        Some(Err(e)) => {
            slog::error!(LOG, "error fetching currently playing"; "error" => %e);
            Ok(resp!(status => 400, message => "Error fetching currently playing track"))
        }
    }
}

#[derive(serde::Serialize)]
struct CurrentTrackResponse {
    current_track: Option<CurrentTrack>,
}

async fn current_track(req: tide::Request<Context>) -> tide::Result {
    let current = match fetch_playback(req.state()).await {
        None => return Ok(resp!(status => 401, message => "Not authenticated")),
        Some(playback) => playback.and_then(current_track_of),
    };
    match current {
        Ok(current_track) => Ok(resp!(json => CurrentTrackResponse { current_track })),
        Err(e) => {
            slog::error!(LOG, "error fetching current track"; "error" => %e);
            Ok(resp!(status => 400, message => "Error fetching currently playing track"))
        }
    }
}

#[derive(serde::Serialize)]
struct TrackEntry {
    name: String,
    artist: String,
    timestamp: DateTime<Utc>,
}

async fn tracks(req: tide::Request<Context>) -> tide::Result {
    let all: Vec<TrackEntry> = req
        .state()
        .history
        .all()
        .await?
        .into_iter()
        .map(|play| TrackEntry {
            name: play.name,
            artist: play.artist,
            timestamp: play.recorded_at,
        })
        .collect();
    Ok(resp!(json => all))
}

#[derive(Debug, Default, serde::Deserialize)]
struct PageParams {
    page: Option<String>,
    limit: Option<String>,
}
impl PageParams {
    fn resolve(&self) -> (u32, u32) {
        (
            utils::positive_or(self.page.as_deref(), 1),
            utils::positive_or(self.limit.as_deref(), CONFIG.page_size),
        )
    }
}

#[derive(serde::Serialize)]
struct TrackListEntry {
    name: String,
    artist: String,
    timestamp: String,
}
impl From<PlayRecord> for TrackListEntry {
    fn from(play: PlayRecord) -> Self {
        Self {
            timestamp: play.recorded_at.format(html::TIMESTAMP_FORMAT).to_string(),
            name: play.name,
            artist: play.artist,
        }
    }
}

#[derive(serde::Serialize)]
struct TrackListResponse {
    tracks: Vec<TrackListEntry>,
    total_pages: u32,
}

async fn track_list(req: tide::Request<Context>) -> tide::Result {
    let params: PageParams = req.query().unwrap_or_default();
    let (page, limit) = params.resolve();
    let page = req.state().history.page(page, limit).await?;
    Ok(resp!(json => TrackListResponse {
        total_pages: page.total_pages,
        tracks: page.tracks.into_iter().map(TrackListEntry::from).collect(),
    }))
}

async fn index(req: tide::Request<Context>) -> tide::Result {
    let ctx = req.state();
    let params: PageParams = req.query().unwrap_or_default();
    let (page, limit) = params.resolve();

    let authenticated = ctx.tokens.get().await.is_some();
    let current = match fetch_playback(ctx).await {
        None => None,
        Some(playback) => match playback.and_then(current_track_of) {
            Ok(current) => current,
            Err(e) => {
                slog::warn!(LOG, "error fetching live track for index"; "error" => %e);
                None
            }
        },
    };
    let page = ctx.history.page(page, limit).await?;
    let body = html::index(authenticated, current.as_ref(), &page, limit, CONFIG.page_size);
    Ok(tide::Response::builder(200)
        .content_type(tide::http::mime::HTML)
        .body(body)
        .build())
}
