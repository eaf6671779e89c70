//! # Factions and Bans
//!
//! Faction member counts are recomputed in the database. The active bans are
//! mirrored into an in-memory [`BanList`], replaced wholesale on every reload
//! and swept by the memory reclaimer.

use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};

use anyhow::Context;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::info;

use crate::core::{reclaim::Reclaim, startup::FactionService};

const UPDATE_MEMBER_COUNTS: &str = "\
UPDATE factions SET member_count = (
    SELECT COUNT(*) FROM faction_members fm WHERE fm.faction_id = factions.id
)";

const SELECT_ACTIVE_BANS: &str = "SELECT ip FROM bans WHERE expires_at IS NULL OR expires_at > now()";

/// # Ban List
///
/// In-memory snapshot of the active bans, replaced wholesale on reload.
#[derive(Debug, Default)]
pub struct BanList {
    ips: RwLock<HashSet<String>>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a fresh set of banned addresses.
    pub fn replace<I>(&self, ips: I)
    where
        I: IntoIterator<Item = String>,
    {
        let fresh: HashSet<String> = ips.into_iter().collect();
        *self.ips.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    pub fn len(&self) -> usize {
        self.ips.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Reclaim for BanList {
    fn label(&self) -> &str {
        "ban-list"
    }

    fn reclaim(&self) -> usize {
        let mut ips = self.ips.write().unwrap_or_else(PoisonError::into_inner);
        let before = ips.capacity();
        ips.shrink_to_fit();
        before.saturating_sub(ips.capacity())
    }
}

/// Faction state and bans stored in Postgres.
#[derive(Clone)]
pub struct PgFactions {
    pool: Pool,
    bans: Arc<BanList>,
}

impl PgFactions {
    pub fn new(pool: Pool, bans: Arc<BanList>) -> Self {
        Self { pool, bans }
    }
}

#[async_trait]
impl FactionService for PgFactions {
    async fn update(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await.context("no database connection for faction update")?;
        let factions = client
            .execute(UPDATE_MEMBER_COUNTS, &[])
            .await
            .context("recomputing faction member counts")?;
        info!(factions, "faction state updated");
        Ok(())
    }

    async fn update_bans(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await.context("no database connection for ban reload")?;
        let rows = client.query(SELECT_ACTIVE_BANS, &[]).await.context("loading active bans")?;
        let ips = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()
            .context("decoding ban rows")?;
        self.bans.replace(ips);
        info!(bans = self.bans.len(), "ban list reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ban_list_replace_is_wholesale() {
        let bans = BanList::new();
        bans.replace(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
        assert_eq!(bans.len(), 2);

        bans.replace(vec!["10.0.0.3".to_string()]);
        let ips = bans.ips.read().unwrap();
        assert!(!ips.contains("10.0.0.1"));
        assert!(ips.contains("10.0.0.3"));
        assert_eq!(ips.len(), 1);
    }

    #[test]
    fn test_ban_list_reclaim() {
        let bans = BanList::new();
        bans.replace((0..1000).map(|i| format!("10.0.{}.{}", i / 256, i % 256)));
        bans.replace(Vec::new());
        bans.reclaim();
        assert!(bans.is_empty());
        assert_eq!(bans.ips.read().unwrap().capacity(), 0);
    }
}
