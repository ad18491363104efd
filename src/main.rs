use async_mutex::Mutex;
use cached::stores::TimedCache;
use chrono::Utc;
use slog::o;
use slog::Drain;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};

mod crypto;
mod db;
mod history;
mod html;
mod logging;
mod models;
mod poller;
mod service;
mod spotify;
#[cfg(test)]
mod testing;
mod tokens;
mod utils;

pub type Result<T> = anyhow::Result<T>;

/// Build an error from a format string
#[macro_export]
macro_rules! se {
    ($($arg:tt)*) => {{
        anyhow::anyhow!($($arg)*)
    }};
}

/// Response shorthands for tide handlers
#[macro_export]
macro_rules! resp {
    (json => $obj:expr) => {{
        tide::Response::builder(200)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (status => $status:expr, json => $obj:expr) => {{
        tide::Response::builder($status)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (status => $status:expr, message => $msg:expr) => {{
        tide::Response::builder($status).body($msg).build()
    }};
}

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

lazy_static::lazy_static! {
    pub static ref CONFIG: Config = Config::load();

    // The "base" logger that all crates should branch off of
    pub static ref BASE_LOG: slog::Logger = {
        let level: slog::Level = CONFIG.log_level
                .parse()
                .expect("invalid log_level");
        if CONFIG.log_format == "pretty" {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::CompactFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        } else {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        }
    };

    // Base logger
    pub static ref LOG: slog::Logger = BASE_LOG.new(slog::o!("app" => "spot-history"));

    // one-time `state` tokens handed to spotify during login
    pub static ref ONE_TIME_TOKENS: Arc<Mutex<TimedCache<String, ()>>> = Arc::new(Mutex::new(TimedCache::with_lifespan(30)));
}

pub struct Config {
    pub version: String,
    pub ssl: bool,
    pub host: String,
    pub real_hostname: Option<String>,
    pub port: u16,
    pub log_format: String,
    pub log_level: String,
    pub spotify_client_id: String,
    pub spotify_secret_id: String,
    pub spotify_redirect_uri: Option<String>,
    pub db_url: String,
    pub enc_key: String,
    pub poll_interval_millis: u64,
    pub request_timeout_seconds: u64,
    pub page_size: u32,
    // tokens from an earlier authorization, only used when the
    // settings table is still empty
    pub seed_access_token: Option<String>,
    pub seed_refresh_token: Option<String>,
    pub seed_token_expires_at: Option<String>,
}
impl Config {
    pub fn load() -> Self {
        let version = fs::File::open("commit_hash.txt")
            .map(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s).expect("Error reading commit_hash");
                s.trim().to_string()
            })
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            version,
            ssl: env_or("SSL", "false") == "true",
            host: env_or("HOST", "localhost"),
            real_hostname: env::var("REAL_HOSTNAME").ok(),
            port: env_or("PORT", "3030").parse().expect("invalid port"),
            log_format: env_or("LOG_FORMAT", "json")
                .to_lowercase()
                .trim()
                .to_string(),
            log_level: env_or("LOG_LEVEL", "INFO"),
            spotify_client_id: env_or("SPOTIFY_CLIENT_ID", "fake"),
            spotify_secret_id: env_or("SPOTIFY_SECRET_ID", "fake"),
            spotify_redirect_uri: env::var("SPOTIFY_REDIRECT_URI").ok(),
            db_url: env_or("DATABASE_URL", "sqlite://spot_history.db"),
            enc_key: env_or("ENC_KEY", "01234567890123456789012345678901"),
            poll_interval_millis: env_or("POLL_INTERVAL_MILLIS", "1000")
                .parse()
                .expect("invalid poll_interval_millis"),
            request_timeout_seconds: env_or("REQUEST_TIMEOUT_SECONDS", "10")
                .parse()
                .expect("invalid request_timeout_seconds"),
            page_size: env_or("PAGE_SIZE", "10")
                .parse()
                .expect("invalid page_size"),
            seed_access_token: env::var("SPOTIFY_ACCESS_TOKEN").ok(),
            seed_refresh_token: env::var("SPOTIFY_REFRESH_TOKEN").ok(),
            seed_token_expires_at: env::var("SPOTIFY_TOKEN_EXPIRES_AT").ok(),
        }
    }
    pub fn initialize(&self) -> anyhow::Result<()> {
        slog::info!(
            LOG, "initialized config";
            "version" => &CONFIG.version,
            "ssl" => &CONFIG.ssl,
            "host" => &CONFIG.host,
            "port" => &CONFIG.port,
            "log_format" => &CONFIG.log_format,
            "log_level" => &CONFIG.log_level,
            "db_url" => &CONFIG.db_url,
            "poll_interval_millis" => &CONFIG.poll_interval_millis,
            "request_timeout_seconds" => &CONFIG.request_timeout_seconds,
        );
        if self.enc_key.len() != 32 {
            anyhow::bail!("ENC_KEY must be exactly 32 bytes, got {}", self.enc_key.len());
        }
        if self.poll_interval_millis == 0 {
            anyhow::bail!("POLL_INTERVAL_MILLIS must be positive");
        }
        Ok(())
    }
    pub fn host(&self) -> String {
        let p = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", p, self.host, self.port)
    }
    pub fn redirect_host(&self) -> String {
        self.real_hostname.clone().unwrap_or_else(|| self.host())
    }
    pub fn spotify_redirect_url(&self) -> String {
        self.spotify_redirect_uri
            .clone()
            .unwrap_or_else(|| format!("{}/callback", self.redirect_host()))
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Token state from the environment, if a refresh token was provided.
    /// A missing expiry is treated as already expired.
    pub fn seed_token_state(&self) -> Result<Option<models::TokenState>> {
        let refresh_token = match &self.seed_refresh_token {
            Some(t) if !t.is_empty() => t.clone(),
            _ => return Ok(None),
        };
        let expires_at = match &self.seed_token_expires_at {
            Some(s) => utils::parse_timestamp(s)?,
            None => Utc::now(),
        };
        Ok(Some(models::TokenState {
            access_token: self.seed_access_token.clone().unwrap_or_default(),
            refresh_token,
            expires_at,
        }))
    }
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env if one exists
    dotenv::dotenv().ok();
    CONFIG.initialize()?;

    let pool = db::connect(&CONFIG.db_url).await?;
    let provider: Arc<dyn spotify::Provider> =
        Arc::new(spotify::SpotifyClient::from_config(&CONFIG));
    let store = tokens::SettingsStore::new(pool.clone(), CONFIG.enc_key.as_bytes());
    let tokens = Arc::new(tokens::TokenService::load(store, provider.clone()).await?);
    if tokens.get().await.is_none() {
        if let Some(seed) = CONFIG.seed_token_state()? {
            slog::info!(
                LOG, "seeding token state from environment";
                "expires_at" => seed.expires_at.to_rfc3339(),
            );
            tokens.set(seed).await?;
        }
    }

    let history = history::History::new(pool);
    let poller = poller::Poller::new(
        tokens.clone(),
        provider.clone(),
        history.clone(),
        CONFIG.poll_interval(),
    );
    async_std::task::spawn(poller.run());

    service::start(service::Context {
        tokens,
        provider,
        history,
    })
    .await?;
    Ok(())
}
