//! # Web Module
//!
//! Everything between the TCP listener and the handlers.
//!
//! - **`listener`**: the accept loop, hyper connections with upgrades.
//! - **`upgrade`**: intercepts upgrade requests and feeds the
//!   [`UpgradeRouter`](crate::core::UpgradeRouter).
//! - **`routes`**: the HTTP surface and its precedence order.
//! - **`static_files`**, **`chunks`**, **`pages`**: the handlers behind it.

use std::sync::Arc;

use crate::core::upgrade_router::UpgradeRouter;

pub mod chunks;
pub mod listener;
pub mod pages;
pub mod routes;
pub mod static_files;
pub mod upgrade;

pub use chunks::{ChunkError, ChunkSource, DirChunkSource};
pub use pages::{AssetManifest, ManifestError, PageCache};
pub use routes::{build_router, RouteCollaborators};
pub use static_files::StaticFiles;
pub use upgrade::{ConnectionKill, HttpUpgrade};

/// # Canvas Context
///
/// The shared, immutable state built once in `main` and handed to every
/// handler.
#[derive(Clone)]
pub struct CanvasContext {
    /// Pre-rendered pages and their tags.
    pub pages: Arc<PageCache>,
    /// Target of `/discord`.
    pub discord_invite: Arc<str>,
    /// Chunk bitmaps.
    pub chunks: Arc<dyn ChunkSource>,
    /// The public directory.
    pub static_files: StaticFiles,
    /// Upgrade dispatch to the two channel subsystems.
    pub upgrades: Arc<UpgradeRouter<HttpUpgrade>>,
}

impl CanvasContext {
    pub fn new(
        pages: PageCache,
        discord_invite: &str,
        chunks: Arc<dyn ChunkSource>,
        static_files: StaticFiles,
        upgrades: UpgradeRouter<HttpUpgrade>,
    ) -> Self {
        Self {
            pages: Arc::new(pages),
            discord_invite: Arc::from(discord_invite),
            chunks,
            static_files,
            upgrades: Arc::new(upgrades),
        }
    }
}
