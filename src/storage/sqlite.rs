use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use entities::progress_cache;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait, sea_query::OnConflict};

use super::ProgressCache;
use crate::domain::models::{ContentId, ContentKind, ProgressRecord};

/// Local progress cache backed by the `progress_cache` table.
#[derive(Clone, Debug)]
pub struct SqliteProgressCache {
    db: Arc<DatabaseConnection>,
}

impl SqliteProgressCache {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl ProgressCache for SqliteProgressCache {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, content_id: &ContentId) -> anyhow::Result<Option<ProgressRecord>> {
        let row = progress_cache::Entity::find_by_id(content_id.as_str().to_string())
            .one(self.db.as_ref())
            .await
            .with_context(|| format!("failed to read cached progress for {}", content_id))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let kind = ContentKind::from_label(&row.kind)
            .with_context(|| format!("corrupt cache row for {}", content_id))?;
        let record = ProgressRecord::new(content_id.clone(), kind, row.position, row.total)
            .at(row.updated_at);
        Ok(Some(record))
    }

    #[tracing::instrument(level = "debug", skip(self, record), fields(content_id = %record.content_id))]
    async fn put(&self, record: &ProgressRecord) -> anyhow::Result<()> {
        let row = progress_cache::ActiveModel {
            content_id: Set(record.content_id.as_str().to_string()),
            kind: Set(record.kind.wire_name().to_string()),
            position: Set(record.position),
            total: Set(record.total),
            percent_complete: Set(record.percent_complete),
            updated_at: Set(record.updated_at.unwrap_or_else(Utc::now)),
        };
        progress_cache::Entity::insert(row)
            .on_conflict(
                OnConflict::column(progress_cache::Column::ContentId)
                    .update_columns([
                        progress_cache::Column::Kind,
                        progress_cache::Column::Position,
                        progress_cache::Column::Total,
                        progress_cache::Column::PercentComplete,
                        progress_cache::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await
            .with_context(|| format!("failed to cache progress for {}", record.content_id))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn remove(&self, content_id: &ContentId) -> anyhow::Result<()> {
        progress_cache::Entity::delete_by_id(content_id.as_str().to_string())
            .exec(self.db.as_ref())
            .await
            .with_context(|| format!("failed to drop cached progress for {}", content_id))?;
        Ok(())
    }
}
