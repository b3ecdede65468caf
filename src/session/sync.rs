use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    domain::models::{ContentId, ContentKind, ProgressRecord},
    progress::ProgressStore,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    Save(ProgressRecord),
    Clear {
        content_id: ContentId,
        kind: ContentKind,
    },
    Shutdown,
}

/// Cheap handle used by timers to queue progress writes.
#[derive(Debug, Clone)]
pub struct SyncSender {
    tx: mpsc::UnboundedSender<SyncCommand>,
}

impl SyncSender {
    pub fn send(&self, command: SyncCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("sync worker already stopped; dropping command");
        }
    }
}

/// Per-session writer. Commands are applied strictly in order, one at a time,
/// so a newer position always lands after an older one and a clear is never
/// overtaken by a stale save.
pub struct SyncWorker {
    sender: SyncSender,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    pub fn spawn(store: Arc<ProgressStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    SyncCommand::Save(record) => {
                        store.save(&record).await;
                    }
                    SyncCommand::Clear { content_id, kind } => {
                        store.clear(&content_id, kind).await;
                    }
                    SyncCommand::Shutdown => break,
                }
            }
        });
        Self {
            sender: SyncSender { tx },
            handle,
        }
    }

    pub fn sender(&self) -> SyncSender {
        self.sender.clone()
    }

    /// Flush what is queued, waiting at most `grace`; whatever is still in flight
    /// afterwards is abandoned, not retried.
    pub async fn shutdown(mut self, grace: Duration) {
        self.sender.send(SyncCommand::Shutdown);
        if tokio::time::timeout(grace, &mut self.handle).await.is_err() {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "progress flush timed out; abandoning pending writes");
            self.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, MemoryCache};

    fn id(raw: &str) -> ContentId {
        ContentId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn commands_apply_in_order() {
        let backend = Arc::new(FakeBackend::default());
        let store = Arc::new(ProgressStore::new(backend.clone(), Arc::new(MemoryCache::default())));
        let worker = SyncWorker::spawn(store);
        let tx = worker.sender();

        tx.send(SyncCommand::Save(ProgressRecord::new(id("b1"), ContentKind::Ebook, 3.0, 10.0)));
        tx.send(SyncCommand::Save(ProgressRecord::new(id("b1"), ContentKind::Ebook, 4.0, 10.0)));
        tx.send(SyncCommand::Clear {
            content_id: id("b1"),
            kind: ContentKind::Ebook,
        });
        worker.shutdown(Duration::from_secs(1)).await;

        let positions: Vec<f64> = backend.pushes().iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![3.0, 4.0, 0.0]);

        // sending after shutdown is harmless
        tx.send(SyncCommand::Save(ProgressRecord::new(id("b1"), ContentKind::Ebook, 5.0, 10.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_gives_up_after_grace() {
        let backend = Arc::new(FakeBackend::stalled(Duration::from_secs(60)));
        let store = Arc::new(ProgressStore::new(backend.clone(), Arc::new(MemoryCache::default())));
        let worker = SyncWorker::spawn(store);
        worker
            .sender()
            .send(SyncCommand::Save(ProgressRecord::new(id("b1"), ContentKind::Ebook, 3.0, 10.0)));

        let started = tokio::time::Instant::now();
        worker.shutdown(Duration::from_secs(2)).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(backend.pushes().is_empty());
    }
}
