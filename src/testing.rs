// In-memory fakes for the persistence and content seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::{
    domain::models::{ContentId, ContentKind, ProgressRecord},
    error::{AccessError, AccessResult},
    progress::ProgressStore,
    session::{
        ContentSource, ContentStream, LibraryEvent, SessionContext, SessionSettings, UserIdentity,
        guard::TamperMonitor,
    },
    storage::{ProgressBackend, ProgressCache},
};

#[derive(Default)]
enum BackendMode {
    #[default]
    Healthy,
    Failing,
    SignedOut,
    Stalled(Duration),
}

/// Remote progress backend that remembers every push.
#[derive(Default)]
pub struct FakeBackend {
    mode: BackendMode,
    records: Mutex<HashMap<ContentId, ProgressRecord>>,
    pushes: Mutex<Vec<ProgressRecord>>,
    fetches: AtomicUsize,
}

impl FakeBackend {
    pub fn failing() -> Self {
        Self {
            mode: BackendMode::Failing,
            ..Default::default()
        }
    }

    pub fn signed_out() -> Self {
        Self {
            mode: BackendMode::SignedOut,
            ..Default::default()
        }
    }

    /// Every fetch and push sleeps for `delay` before it is answered.
    pub fn stalled(delay: Duration) -> Self {
        Self {
            mode: BackendMode::Stalled(delay),
            ..Default::default()
        }
    }

    pub fn seed(&self, record: ProgressRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.content_id.clone(), record);
    }

    pub fn pushes(&self) -> Vec<ProgressRecord> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn stored(&self, content_id: &ContentId) -> Option<ProgressRecord> {
        self.records.lock().unwrap().get(content_id).cloned()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProgressBackend for FakeBackend {
    async fn fetch(
        &self,
        content_id: &ContentId,
        _kind: ContentKind,
    ) -> AccessResult<Option<ProgressRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            BackendMode::Failing => Err(AccessError::SyncFailed("backend offline".into())),
            BackendMode::SignedOut => Err(AccessError::AuthRequired),
            BackendMode::Stalled(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.stored(content_id))
            }
            BackendMode::Healthy => Ok(self.stored(content_id)),
        }
    }

    async fn push(&self, record: &ProgressRecord) -> AccessResult<()> {
        match self.mode {
            BackendMode::Failing => return Err(AccessError::SyncFailed("backend offline".into())),
            BackendMode::SignedOut => return Err(AccessError::AuthRequired),
            BackendMode::Stalled(delay) => tokio::time::sleep(delay).await,
            BackendMode::Healthy => {}
        }
        self.pushes.lock().unwrap().push(record.clone());
        self.seed(record.clone());
        Ok(())
    }
}

/// Local cache without sqlite, safe under a paused tokio clock.
#[derive(Default)]
pub struct MemoryCache {
    records: Mutex<HashMap<ContentId, ProgressRecord>>,
}

#[async_trait::async_trait]
impl ProgressCache for MemoryCache {
    async fn get(&self, content_id: &ContentId) -> anyhow::Result<Option<ProgressRecord>> {
        Ok(self.records.lock().unwrap().get(content_id).cloned())
    }

    async fn put(&self, record: &ProgressRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.content_id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, content_id: &ContentId) -> anyhow::Result<()> {
        self.records.lock().unwrap().remove(content_id);
        Ok(())
    }
}

/// Content endpoint stand-in.
pub struct FakeSource {
    result: AccessResult<ContentStream>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn serving(body: Bytes, duration_secs: Option<f64>) -> Self {
        Self {
            result: Ok(ContentStream {
                body,
                content_type: None,
                duration_secs,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: AccessError) -> Self {
        Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContentSource for FakeSource {
    async fn open_stream(&self, _kind: ContentKind, _content_id: &ContentId) -> AccessResult<ContentStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Wiring shared by the session and controller tests.
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub cache: Arc<MemoryCache>,
    pub source: Arc<FakeSource>,
    pub tamper: TamperMonitor,
    pub events: broadcast::Receiver<LibraryEvent>,
    pub ctx: SessionContext,
}

impl Harness {
    pub fn new(backend: FakeBackend, source: FakeSource) -> Self {
        let backend = Arc::new(backend);
        let cache = Arc::new(MemoryCache::default());
        let source = Arc::new(source);
        let tamper = TamperMonitor::default();
        let (tx, events) = broadcast::channel(16);
        let ctx = SessionContext {
            identity: Some(UserIdentity {
                label: "reader@example.com".into(),
            }),
            source: source.clone(),
            store: Arc::new(ProgressStore::new(backend.clone(), cache.clone())),
            tamper: tamper.clone(),
            settings: SessionSettings::default(),
            library_events: tx,
        };
        Self {
            backend,
            cache,
            source,
            tamper,
            events,
            ctx,
        }
    }
}

pub fn id(raw: &str) -> ContentId {
    ContentId::parse(raw).unwrap()
}
