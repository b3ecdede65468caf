// Progress persistence: storefront backend first, local cache as the audiobook fallback.
// Sync is best-effort; nothing here ever fails the caller.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    domain::models::{ContentId, ContentKind, ProgressRecord},
    error::AccessError,
    storage::{ProgressBackend, ProgressCache},
};

pub struct ProgressStore {
    backend: Arc<dyn ProgressBackend>,
    cache: Arc<dyn ProgressCache>,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn ProgressBackend>, cache: Arc<dyn ProgressCache>) -> Self {
        Self { backend, cache }
    }

    /// Saved position for a title, if any. Audiobooks fall back to the local cache when
    /// the backend fails, is signed out, or has nothing; ebooks only trust the backend.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn fetch(&self, content_id: &ContentId, kind: ContentKind) -> Option<ProgressRecord> {
        let remote = match self.backend.fetch(content_id, kind).await {
            Ok(found) => found,
            Err(AccessError::AuthRequired) => {
                tracing::debug!(%content_id, "signed out; skipping remote progress");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, %content_id, "progress fetch failed");
                None
            }
        };
        if remote.is_some() || kind != ContentKind::Audiobook {
            return remote;
        }

        match self.cache.get(content_id).await {
            Ok(Some(local)) if local.kind == kind => {
                tracing::debug!(%content_id, position = local.position, "using cached progress");
                Some(local)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), %content_id, "cached progress unreadable");
                None
            }
        }
    }

    /// Persist a position. Records below the first page / second are never written so
    /// untouched titles keep their "never started" state. Returns whether a write was attempted.
    #[tracing::instrument(level = "debug", skip(self, record), fields(content_id = %record.content_id, position = record.position))]
    pub async fn save(&self, record: &ProgressRecord) -> bool {
        if !record.is_meaningful() {
            tracing::debug!("position too small to persist");
            return false;
        }
        let mut record = record.clone();
        if record.updated_at.is_none() {
            record.updated_at = Some(Utc::now());
        }

        if record.kind == ContentKind::Audiobook {
            if let Err(e) = self.cache.put(&record).await {
                tracing::warn!(error = %format!("{:#}", e), "failed to cache progress locally");
            }
        }
        self.push(&record).await;
        true
    }

    /// Forget the saved position: drop the local entry and reset the remote one to zero.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn clear(&self, content_id: &ContentId, kind: ContentKind) {
        if let Err(e) = self.cache.remove(content_id).await {
            tracing::warn!(error = %format!("{:#}", e), "failed to drop cached progress");
        }
        let reset = ProgressRecord::new(content_id.clone(), kind, 0.0, 0.0).at(Utc::now());
        self.push(&reset).await;
    }

    async fn push(&self, record: &ProgressRecord) {
        match self.backend.push(record).await {
            Ok(()) => {}
            Err(AccessError::AuthRequired) => {
                tracing::debug!(content_id = %record.content_id, "signed out; progress kept local only");
            }
            Err(e) => {
                tracing::warn!(error = %e, content_id = %record.content_id, "progress sync failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_cache;
    use crate::testing::FakeBackend;

    fn id(raw: &str) -> ContentId {
        ContentId::parse(raw).unwrap()
    }

    async fn store_with(backend: Arc<FakeBackend>) -> (ProgressStore, Arc<dyn ProgressCache>) {
        let cache: Arc<dyn ProgressCache> = Arc::new(memory_cache().await);
        (ProgressStore::new(backend, cache.clone()), cache)
    }

    #[tokio::test]
    async fn remote_record_wins() {
        let backend = Arc::new(FakeBackend::default());
        backend.seed(ProgressRecord::new(id("a1"), ContentKind::Audiobook, 40.0, 100.0));
        let (store, cache) = store_with(backend).await;
        cache
            .put(&ProgressRecord::new(id("a1"), ContentKind::Audiobook, 10.0, 100.0))
            .await
            .unwrap();

        let rec = store.fetch(&id("a1"), ContentKind::Audiobook).await.unwrap();
        assert_eq!(rec.position, 40.0);
    }

    #[tokio::test]
    async fn audiobook_falls_back_to_cache() {
        let backend = Arc::new(FakeBackend::failing());
        let (store, cache) = store_with(backend).await;
        cache
            .put(&ProgressRecord::new(id("a1"), ContentKind::Audiobook, 10.0, 100.0))
            .await
            .unwrap();

        let rec = store.fetch(&id("a1"), ContentKind::Audiobook).await.unwrap();
        assert_eq!(rec.position, 10.0);
    }

    #[tokio::test]
    async fn ebook_has_no_local_fallback() {
        let backend = Arc::new(FakeBackend::signed_out());
        let (store, cache) = store_with(backend).await;
        cache
            .put(&ProgressRecord::new(id("b1"), ContentKind::Ebook, 10.0, 100.0))
            .await
            .unwrap();

        assert!(store.fetch(&id("b1"), ContentKind::Ebook).await.is_none());
    }

    #[tokio::test]
    async fn save_writes_cache_and_remote_for_audiobooks() {
        let backend = Arc::new(FakeBackend::default());
        let (store, cache) = store_with(backend.clone()).await;

        let rec = ProgressRecord::new(id("a1"), ContentKind::Audiobook, 30.0, 120.0);
        assert!(store.save(&rec).await);

        assert_eq!(backend.pushes().len(), 1);
        assert!(backend.pushes()[0].updated_at.is_some());
        assert_eq!(cache.get(&id("a1")).await.unwrap().unwrap().position, 30.0);
    }

    #[tokio::test]
    async fn save_skips_trivial_positions_and_ebook_cache() {
        let backend = Arc::new(FakeBackend::default());
        let (store, cache) = store_with(backend.clone()).await;

        assert!(!store.save(&ProgressRecord::new(id("a1"), ContentKind::Audiobook, 0.4, 120.0)).await);
        assert!(backend.pushes().is_empty());

        assert!(store.save(&ProgressRecord::new(id("b1"), ContentKind::Ebook, 3.0, 10.0)).await);
        assert_eq!(backend.pushes().len(), 1);
        assert!(cache.get(&id("b1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remote_failure_is_swallowed() {
        let backend = Arc::new(FakeBackend::failing());
        let (store, cache) = store_with(backend).await;

        let rec = ProgressRecord::new(id("a1"), ContentKind::Audiobook, 30.0, 120.0);
        assert!(store.save(&rec).await);
        assert!(cache.get(&id("a1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_resets_both_sides() {
        let backend = Arc::new(FakeBackend::default());
        let (store, cache) = store_with(backend.clone()).await;
        store
            .save(&ProgressRecord::new(id("a1"), ContentKind::Audiobook, 60.0, 120.0))
            .await;

        store.clear(&id("a1"), ContentKind::Audiobook).await;

        assert!(cache.get(&id("a1")).await.unwrap().is_none());
        let remote = backend.stored(&id("a1")).unwrap();
        assert_eq!(remote.position, 0.0);
        assert!(!remote.is_resumable());
        assert!(store.fetch(&id("a1"), ContentKind::Audiobook).await.map_or(true, |r| !r.is_resumable()));
    }
}
