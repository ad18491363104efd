use std::sync::Arc;

use async_mutex::Mutex;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::crypto::{self, Sealed};
use crate::models::TokenState;
use crate::spotify::{Provider, TokenGrant};
use crate::{se, utils, Result, LOG};

const ACCESS_TOKEN: &str = "access_token";
const REFRESH_TOKEN: &str = "refresh_token";
const EXPIRES_AT: &str = "token_expires_at";

/// Durable key-value home of the token state. Token values are
/// AES_256_GCM encrypted with the application key, the expiry is
/// stored as plain RFC 3339.
#[derive(Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
    key: Vec<u8>,
}

impl SettingsStore {
    pub fn new(pool: SqlitePool, key: &[u8]) -> Self {
        Self {
            pool,
            key: key.to_vec(),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("select value from settings where key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| se!("error reading setting {}: {}", key, e))
    }

    pub async fn load(&self) -> Result<Option<TokenState>> {
        let (access, refresh, expires) = (
            self.get(ACCESS_TOKEN).await?,
            self.get(REFRESH_TOKEN).await?,
            self.get(EXPIRES_AT).await?,
        );
        let (access, refresh, expires) = match (access, refresh, expires) {
            (Some(a), Some(r), Some(e)) => (a, r, e),
            _ => return Ok(None),
        };
        Ok(Some(TokenState {
            access_token: crypto::open(&Sealed::from_stored(&access)?, &self.key)?,
            refresh_token: crypto::open(&Sealed::from_stored(&refresh)?, &self.key)?,
            expires_at: utils::parse_timestamp(&expires)?,
        }))
    }

    /// Write all three values in one transaction, overwriting in place
    pub async fn save(&self, state: &TokenState) -> Result<()> {
        let rows = [
            (
                ACCESS_TOKEN,
                crypto::seal(&state.access_token, &self.key)?.to_stored(),
            ),
            (
                REFRESH_TOKEN,
                crypto::seal(&state.refresh_token, &self.key)?.to_stored(),
            ),
            (EXPIRES_AT, state.expires_at.to_rfc3339()),
        ];
        let mut tr = self
            .pool
            .begin()
            .await
            .map_err(|e| se!("error starting settings transaction {}", e))?;
        for (key, value) in rows.iter() {
            sqlx::query(
                "
                insert into settings (key, value) values (?, ?)
                on conflict (key) do update set value = excluded.value
                ",
            )
            .bind(*key)
            .bind(value)
            .execute(&mut tr)
            .await
            .map_err(|e| se!("error writing setting {}: {}", key, e))?;
        }
        tr.commit()
            .await
            .map_err(|e| se!("error committing settings {}", e))?;
        Ok(())
    }
}

/// Owner of the one spotify token state. Every provider call should
/// go through `ensure_valid_token` first.
pub struct TokenService {
    state: Mutex<Option<TokenState>>,
    store: SettingsStore,
    provider: Arc<dyn Provider>,
}

impl TokenService {
    /// Build the service from whatever the settings table holds
    pub async fn load(store: SettingsStore, provider: Arc<dyn Provider>) -> Result<Self> {
        let state = store.load().await?;
        match &state {
            Some(s) => slog::info!(
                LOG, "loaded token state";
                "expires_at" => s.expires_at.to_rfc3339(),
            ),
            None => slog::info!(LOG, "no token state stored, login required"),
        }
        Ok(Self {
            state: Mutex::new(state),
            store,
            provider,
        })
    }

    pub async fn get(&self) -> Option<TokenState> {
        self.state.lock().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.get().await.map(|s| s.access_token)
    }

    /// Replace the token state, persisting it first
    pub async fn set(&self, state: TokenState) -> Result<()> {
        let mut lock = self.state.lock().await;
        self.store.save(&state).await?;
        *lock = Some(state);
        Ok(())
    }

    /// Complete a login: trade the authorization `code` for a token pair
    pub async fn authorize(&self, code: &str) -> Result<TokenState> {
        let grant = self.provider.exchange_code(code).await?;
        let refresh_token = grant
            .refresh_token
            .clone()
            .ok_or_else(|| se!("authorization response is missing a refresh token"))?;
        let state = TokenState {
            access_token: grant.access_token,
            refresh_token,
            expires_at: expires_at(Utc::now(), grant.expires_in),
        };
        self.set(state.clone()).await?;
        slog::info!(LOG, "authorized"; "expires_at" => state.expires_at.to_rfc3339());
        Ok(state)
    }

    pub async fn ensure_valid_token(&self, force: bool) {
        self.ensure_valid_token_at(force, Utc::now()).await
    }

    /// Refresh the access token if `force` is set or it has expired as of `now`.
    /// Failures are logged and leave the current state untouched; callers keep
    /// using whatever token is there.
    pub async fn ensure_valid_token_at(&self, force: bool, now: DateTime<Utc>) {
        let mut lock = self.state.lock().await;
        let current = match &*lock {
            None => {
                slog::debug!(LOG, "no token state, skipping refresh");
                return;
            }
            Some(current) => current,
        };
        if !force && !current.is_expired_at(now) {
            return;
        }

        slog::info!(LOG, "refreshing access token"; "forced" => force);
        let grant = match self
            .provider
            .refresh_access_token(&current.refresh_token)
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                slog::warn!(LOG, "failed to refresh access token, keeping the current one"; "error" => %e);
                return;
            }
        };
        let refreshed = refreshed_state(current, grant, now);
        if let Err(e) = self.store.save(&refreshed).await {
            slog::error!(LOG, "error persisting refreshed token state"; "error" => %e);
        }
        slog::info!(LOG, "refreshed token"; "expires_at" => refreshed.expires_at.to_rfc3339());
        *lock = Some(refreshed);
    }
}

// spotify hands out hour-long tokens, anything claiming more than a day is capped
const MAX_EXPIRES_IN: u64 = 24 * 60 * 60;

fn expires_at(now: DateTime<Utc>, expires_in: u64) -> DateTime<Utc> {
    let secs = expires_in.min(MAX_EXPIRES_IN) as i64;
    now.checked_add_signed(chrono::Duration::seconds(secs))
        .unwrap_or(now)
}

fn refreshed_state(current: &TokenState, grant: TokenGrant, now: DateTime<Utc>) -> TokenState {
    TokenState {
        access_token: grant.access_token,
        refresh_token: grant
            .refresh_token
            .unwrap_or_else(|| current.refresh_token.clone()),
        expires_at: expires_at(now, grant.expires_in),
    }
}
