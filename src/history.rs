use sqlx::SqlitePool;

use crate::models::{NewPlay, Page, PlayRecord};
use crate::{se, utils, Result};

/// Append-only log of plays seen by the poller
#[derive(Clone)]
pub struct History {
    pool: SqlitePool,
}

impl History {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a single play. One statement, so it either lands whole or not at all.
    pub async fn append(&self, play: &NewPlay) -> Result<PlayRecord> {
        sqlx::query_as::<_, PlayRecord>(
            "
            insert into plays (name, artist, recorded_at, duration_ms)
            values (?, ?, ?, ?)
            returning id, name, artist, recorded_at, duration_ms
            ",
        )
        .bind(&play.name)
        .bind(&play.artist)
        .bind(play.recorded_at)
        .bind(play.duration_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| se!("failed to insert play {:?}: {}", play.name, e))
    }

    pub async fn latest(&self) -> Result<Option<PlayRecord>> {
        sqlx::query_as::<_, PlayRecord>(
            "
            select id, name, artist, recorded_at, duration_ms
            from plays
            order by recorded_at desc, id desc
            limit 1
            ",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| se!("failed fetching latest play {}", e))
    }

    /// Newest-first page of plays. `page` is 1-based; both arguments are
    /// clamped to at least 1. Pages past the end come back empty.
    pub async fn page(&self, page: u32, page_size: u32) -> Result<Page> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total: i64 = sqlx::query_scalar("select count(*) from plays")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| se!("failed counting plays {}", e))?;
        let total_pages = utils::total_pages(total.max(0) as u64, page_size);
        let offset = match i64::from(page - 1).checked_mul(i64::from(page_size)) {
            Some(offset) if offset < total => offset,
            _ => {
                return Ok(Page {
                    tracks: vec![],
                    page,
                    page_size,
                    total_pages,
                })
            }
        };
        let tracks = sqlx::query_as::<_, PlayRecord>(
            "
            select id, name, artist, recorded_at, duration_ms
            from plays
            order by recorded_at desc, id desc
            limit ? offset ?
            ",
        )
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| se!("failed fetching page {} of plays {}", page, e))?;
        Ok(Page {
            tracks,
            page,
            page_size,
            total_pages,
        })
    }

    /// Every play in insertion order
    pub async fn all(&self) -> Result<Vec<PlayRecord>> {
        sqlx::query_as::<_, PlayRecord>(
            "select id, name, artist, recorded_at, duration_ms from plays order by id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| se!("failed fetching plays {}", e))
    }
}
