// Persistence seams for progress records: the storefront backend is authoritative,
// the local sqlite cache is the audiobook fallback.

mod remote;
mod sqlite;

pub use sqlite::SqliteProgressCache;

use crate::domain::models::{ContentId, ContentKind, ProgressRecord};
use crate::error::AccessResult;

#[async_trait::async_trait]
pub trait ProgressBackend: Send + Sync {
    async fn fetch(
        &self,
        content_id: &ContentId,
        kind: ContentKind,
    ) -> AccessResult<Option<ProgressRecord>>;
    async fn push(&self, record: &ProgressRecord) -> AccessResult<()>;
}

#[async_trait::async_trait]
pub trait ProgressCache: Send + Sync {
    async fn get(&self, content_id: &ContentId) -> anyhow::Result<Option<ProgressRecord>>;
    async fn put(&self, record: &ProgressRecord) -> anyhow::Result<()>;
    async fn remove(&self, content_id: &ContentId) -> anyhow::Result<()>;
}

/// Fresh migrated in-memory cache for tests.
#[cfg(test)]
pub(crate) async fn memory_cache() -> SqliteProgressCache {
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ConnectOptions, Database};

    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    SqliteProgressCache::new(std::sync::Arc::new(db))
}
