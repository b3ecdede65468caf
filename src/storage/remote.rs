use super::ProgressBackend;
use crate::{
    domain::models::{ContentId, ContentKind, ProgressRecord},
    error::{AccessError, AccessResult},
    storefront_client::{MissingCredentials, ProgressPayload, StorefrontClient},
};

fn sync_error(err: anyhow::Error) -> AccessError {
    if err.downcast_ref::<MissingCredentials>().is_some() {
        AccessError::AuthRequired
    } else {
        AccessError::SyncFailed(format!("{:#}", err))
    }
}

#[async_trait::async_trait]
impl ProgressBackend for StorefrontClient {
    async fn fetch(
        &self,
        content_id: &ContentId,
        kind: ContentKind,
    ) -> AccessResult<Option<ProgressRecord>> {
        let envelope = self.get_progress(content_id).await.map_err(sync_error)?;
        Ok(envelope.into_record(content_id, kind))
    }

    async fn push(&self, record: &ProgressRecord) -> AccessResult<()> {
        self.post_progress(&record.content_id, &ProgressPayload::from(record))
            .await
            .map_err(sync_error)
    }
}
