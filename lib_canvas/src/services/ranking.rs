//! # Rankings
//!
//! Recomputes the all-time and daily user ranks in one statement each.

use anyhow::Context;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::info;

use crate::core::startup::RankingService;

const UPDATE_RANKING: &str = "\
UPDATE users SET ranking = r.rank FROM (
    SELECT id, RANK() OVER (ORDER BY total_pixels DESC) AS rank FROM users WHERE total_pixels > 0
) r WHERE users.id = r.id";

const UPDATE_DAILY_RANKING: &str = "\
UPDATE users SET daily_ranking = r.rank FROM (
    SELECT id, RANK() OVER (ORDER BY daily_total_pixels DESC) AS rank FROM users WHERE daily_total_pixels > 0
) r WHERE users.id = r.id";

/// Rankings stored in the `users` table.
#[derive(Clone)]
pub struct PgRanking {
    pool: Pool,
}

impl PgRanking {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RankingService for PgRanking {
    async fn update_ranking(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await.context("no database connection for ranking update")?;
        let ranked = client
            .execute(UPDATE_RANKING, &[])
            .await
            .context("updating total ranking")?;
        client
            .execute(UPDATE_DAILY_RANKING, &[])
            .await
            .context("updating daily ranking")?;
        info!(ranked, "rankings updated");
        Ok(())
    }
}
