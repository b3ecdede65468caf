//! Content sessions: the live state of an open reader or player.
//!
//! Both kinds share one lifecycle, `Loading -> ResumeDecision -> Active -> Closed`,
//! with `Error` reachable from `Loading`. [`SessionCore`] owns that lifecycle
//! together with the guard, the surface, the progress writer and the debounce
//! timer; the ebook and audiobook sessions add position tracking on top.

pub mod audiobook;
pub mod ebook;
pub mod guard;
pub mod schedule;
pub mod surface;
pub mod sync;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    domain::models::{
        COMPLETION_THRESHOLD_PERCENT, ContentId, ContentKind, ContentRequest, ProgressRecord,
        percent_complete, position_label,
    },
    error::{AccessError, AccessResult},
    progress::ProgressStore,
    storefront_client::{ContentRejected, MissingCredentials, StorefrontClient},
};

use guard::{SessionGuard, TamperMonitor, Watermark};
use schedule::ScheduledTask;
use surface::RenderSurface;
use sync::{SyncCommand, SyncSender, SyncWorker};

pub use audiobook::AudiobookPlayerSession;
pub use ebook::EbookReaderSession;

/// Protected content as handed to a session.
#[derive(Debug, Clone)]
pub struct ContentStream {
    pub body: Bytes,
    pub content_type: Option<String>,
    /// Present when the stream announced its duration up front.
    pub duration_secs: Option<f64>,
}

#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    async fn open_stream(&self, kind: ContentKind, content_id: &ContentId) -> AccessResult<ContentStream>;
}

#[async_trait::async_trait]
impl ContentSource for StorefrontClient {
    async fn open_stream(&self, kind: ContentKind, content_id: &ContentId) -> AccessResult<ContentStream> {
        match self.get_content(kind, content_id).await {
            Ok(payload) => Ok(ContentStream {
                body: payload.body,
                content_type: payload.content_type,
                duration_secs: payload.duration_secs,
            }),
            Err(e) if e.downcast_ref::<MissingCredentials>().is_some() => Err(AccessError::AuthRequired),
            Err(e) => {
                let message = e
                    .downcast_ref::<ContentRejected>()
                    .map(ContentRejected::user_message)
                    .unwrap_or("The content service is unavailable. Please try again later.");
                tracing::error!(error = %format!("{:#}", e), %content_id, "content stream unavailable");
                Err(AccessError::StreamUnavailable(message.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub sync_debounce: Duration,
    pub save_interval: Duration,
    pub close_flush_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            sync_debounce: Duration::from_millis(1000),
            save_interval: Duration::from_secs(5),
            close_flush_timeout: Duration::from_secs(2),
        }
    }
}

/// Signed-in user, as far as sessions are concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct UserIdentity {
    pub label: String,
}

/// Emitted so the library view can refresh its progress indicators.
#[derive(Debug, Clone, PartialEq)]
pub enum LibraryEvent {
    SessionClosed { content_id: ContentId },
}

/// Everything a session needs, passed explicitly instead of living in globals.
#[derive(Clone)]
pub struct SessionContext {
    pub identity: Option<UserIdentity>,
    pub source: Arc<dyn ContentSource>,
    pub store: Arc<ProgressStore>,
    pub tamper: TamperMonitor,
    pub settings: SessionSettings,
    pub library_events: broadcast::Sender<LibraryEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    ResumeDecision,
    Active,
    Closed,
    Error,
}

impl SessionPhase {
    pub fn wire_name(&self) -> &'static str {
        match self {
            SessionPhase::Loading => "loading",
            SessionPhase::ResumeDecision => "resume_decision",
            SessionPhase::Active => "active",
            SessionPhase::Closed => "closed",
            SessionPhase::Error => "error",
        }
    }

    /// Phrase used in state errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Loading => "loading",
            SessionPhase::ResumeDecision => "awaiting a resume decision",
            SessionPhase::Active => "active",
            SessionPhase::Closed => "closed",
            SessionPhase::Error => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeChoice {
    Resume,
    Restart,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResumeOffer {
    pub position: f64,
    pub total: f64,
    pub percent_complete: f64,
    pub label: String,
}

/// What happened to a reported position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    /// Not active (loading or waiting on the resume prompt).
    Ignored,
    Advanced,
    /// Crossed the completion threshold just now; progress was cleared.
    Completed,
    /// Already finished earlier in this session; nothing is written any more.
    Suppressed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub content_id: ContentId,
    pub kind: ContentKind,
    pub title: String,
    pub phase: SessionPhase,
    pub position: f64,
    pub total: f64,
    pub percent_complete: f64,
    pub resume: Option<ResumeOffer>,
    pub watermark: Option<Watermark>,
    /// A tamper signal hit this session since its guard was enabled.
    pub tampered: bool,
    pub indicator: Option<String>,
    pub error: Option<String>,
}

pub struct SessionCore {
    id: Uuid,
    request: ContentRequest,
    ctx: SessionContext,
    phase: SessionPhase,
    position: f64,
    total: f64,
    dirty: Arc<AtomicBool>,
    finished: bool,
    offer: Option<ResumeOffer>,
    error: Option<AccessError>,
    guard: SessionGuard,
    surface: RenderSurface,
    sync: Option<SyncWorker>,
    debounce: ScheduledTask,
    torn_down: bool,
    closed: bool,
}

impl SessionCore {
    /// Refuses to start without a signed-in user.
    pub fn new(ctx: SessionContext, request: ContentRequest) -> AccessResult<Self> {
        let identity = ctx.identity.clone().ok_or(AccessError::AuthRequired)?;
        let id = Uuid::new_v4();
        let watermark = Watermark::for_session(&identity.label, &request.content_id, id);
        let guard = SessionGuard::new(&ctx.tamper, watermark);
        let sync = SyncWorker::spawn(ctx.store.clone());
        tracing::info!(session_id = %id, content_id = %request.content_id, kind = ?request.kind, "opening content session");
        Ok(SessionCore {
            id,
            position: request.kind.start_position(),
            request,
            ctx,
            phase: SessionPhase::Loading,
            total: 0.0,
            dirty: Arc::new(AtomicBool::new(false)),
            finished: false,
            offer: None,
            error: None,
            guard,
            surface: RenderSurface::attached(),
            sync: Some(sync),
            debounce: ScheduledTask::idle(),
            torn_down: false,
            closed: false,
        })
    }

    pub fn content_id(&self) -> &ContentId {
        &self.request.content_id
    }

    pub fn kind(&self) -> ContentKind {
        self.request.kind
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[cfg(test)]
    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.ctx.settings
    }

    pub(crate) fn dirty_flag(&self) -> Arc<AtomicBool> {
        self.dirty.clone()
    }

    pub(crate) fn sync_sender(&self) -> Option<SyncSender> {
        self.sync.as_ref().map(SyncWorker::sender)
    }

    pub(crate) fn set_total(&mut self, total: f64) {
        if total.is_finite() && total > 0.0 {
            self.total = total;
        }
    }

    pub(crate) fn require(&self, allowed: &[SessionPhase]) -> AccessResult<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(AccessError::InvalidState(self.phase.as_str()))
        }
    }

    /// Loading: fetch the protected stream. A failure ends the session in `Error`.
    pub(crate) async fn acquire_stream(&mut self) -> AccessResult<ContentStream> {
        self.require(&[SessionPhase::Loading])?;
        let result = self
            .ctx
            .source
            .open_stream(self.request.kind, &self.request.content_id)
            .await;
        match result {
            Ok(stream) => Ok(stream),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Move to `Error` and tear down immediately. Returns the error for propagation.
    pub(crate) fn fail(&mut self, err: AccessError) -> AccessError {
        tracing::error!(session_id = %self.id, content_id = %self.request.content_id, error = %err, "content session failed");
        self.phase = SessionPhase::Error;
        self.error = Some(err.clone());
        self.release();
        err
    }

    /// Protect the surface. Missing protection is a warning, never fatal.
    pub(crate) fn enable_guard(&mut self) {
        if let Err(e) = self.guard.enable(Arc::new(self.surface.clone())) {
            tracing::warn!(session_id = %self.id, error = %e, "continuing without content protection");
        }
    }

    pub(crate) async fn load_progress(&self) -> Option<ProgressRecord> {
        self.ctx
            .store
            .fetch(&self.request.content_id, self.request.kind)
            .await
    }

    /// Leave `Loading`: prompt when there is a meaningful unfinished position,
    /// otherwise start fresh (clearing a finished record on the way).
    pub(crate) fn decide(&mut self, saved: Option<ProgressRecord>, total: f64) -> SessionPhase {
        self.set_total(total);
        let saved = saved.map(|r| if self.total > 0.0 { r.with_total(self.total) } else { r });
        match saved {
            Some(record) if record.is_finished() => {
                tracing::info!(content_id = %self.request.content_id, percent = record.percent_complete, "saved progress is finished; starting fresh");
                self.queue(SyncCommand::Clear {
                    content_id: self.request.content_id.clone(),
                    kind: self.request.kind,
                });
                self.activate(self.request.kind.start_position());
            }
            Some(record) if record.is_resumable() => {
                self.offer = Some(ResumeOffer {
                    position: record.position,
                    total: record.total,
                    percent_complete: record.percent_complete,
                    label: record.position_label(),
                });
                self.phase = SessionPhase::ResumeDecision;
                tracing::debug!(content_id = %self.request.content_id, position = record.position, "offering resume");
            }
            _ => self.activate(self.request.kind.start_position()),
        }
        self.phase
    }

    fn activate(&mut self, position: f64) {
        self.position = position;
        self.phase = SessionPhase::Active;
    }

    /// Settle the resume prompt. Returns the position playback / reading starts from.
    pub(crate) fn resolve(&mut self, choice: ResumeChoice) -> AccessResult<f64> {
        self.require(&[SessionPhase::ResumeDecision])?;
        let offer = self.offer.take();
        let position = match (choice, offer) {
            (ResumeChoice::Resume, Some(offer)) => offer.position,
            (ResumeChoice::Restart, _) | (_, None) => {
                self.queue(SyncCommand::Clear {
                    content_id: self.request.content_id.clone(),
                    kind: self.request.kind,
                });
                self.request.kind.start_position()
            }
        };
        tracing::info!(content_id = %self.request.content_id, ?choice, position, "resume decision made");
        self.activate(position);
        Ok(position)
    }

    /// Record a new position while active. Crossing the completion threshold
    /// clears the saved progress and stops all further writes for this session.
    pub(crate) fn track(&mut self, position: f64) -> Tracked {
        if self.phase != SessionPhase::Active || !position.is_finite() {
            return Tracked::Ignored;
        }
        self.position = position.max(0.0);
        if self.finished {
            return Tracked::Suppressed;
        }
        if percent_complete(self.position, self.total) > COMPLETION_THRESHOLD_PERCENT {
            self.finished = true;
            self.dirty.store(false, Ordering::SeqCst);
            self.debounce.cancel();
            tracing::info!(content_id = %self.request.content_id, "finished; clearing saved progress");
            self.queue(SyncCommand::Clear {
                content_id: self.request.content_id.clone(),
                kind: self.request.kind,
            });
            return Tracked::Completed;
        }
        self.dirty.store(true, Ordering::SeqCst);
        Tracked::Advanced
    }

    pub(crate) fn record(&self) -> ProgressRecord {
        ProgressRecord::new(
            self.request.content_id.clone(),
            self.request.kind,
            self.position,
            self.total,
        )
    }

    /// Push the current position after the debounce window, replacing any pending push.
    pub(crate) fn schedule_save(&mut self) {
        let (Some(tx), false) = (self.sync_sender(), self.finished) else {
            return;
        };
        let dirty = self.dirty.clone();
        let record = self.record();
        self.debounce.debounce(self.ctx.settings.sync_debounce, async move {
            if dirty.swap(false, Ordering::SeqCst) {
                tx.send(SyncCommand::Save(record));
            }
        });
    }

    /// Queue a save right now if anything changed since the last one.
    pub(crate) fn save_now(&mut self) {
        if self.phase != SessionPhase::Active || self.finished {
            return;
        }
        self.debounce.cancel();
        if self.dirty.swap(false, Ordering::SeqCst) {
            self.queue(SyncCommand::Save(self.record()));
        }
    }

    fn queue(&self, command: SyncCommand) {
        match &self.sync {
            Some(worker) => worker.sender().send(command),
            None => tracing::debug!(?command, "session torn down; dropping progress command"),
        }
    }

    /// Stop protection and drop decoded buffers. Runs once per session.
    fn release(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.debounce.cancel();
        self.guard.disable();
        self.surface.release();
    }

    /// Closed: flush the last position, stop protection, release buffers and tell the
    /// library to refresh. Safe to call more than once and from any phase.
    pub async fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.save_now();
        self.release();
        if let Some(worker) = self.sync.take() {
            worker.shutdown(self.ctx.settings.close_flush_timeout).await;
        }
        if self.phase != SessionPhase::Error {
            self.phase = SessionPhase::Closed;
        }
        let _ = self.ctx.library_events.send(LibraryEvent::SessionClosed {
            content_id: self.request.content_id.clone(),
        });
        tracing::info!(session_id = %self.id, content_id = %self.request.content_id, "content session closed");
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let percent = if self.finished {
            100.0
        } else {
            percent_complete(self.position, self.total)
        };
        SessionSnapshot {
            session_id: self.id,
            content_id: self.request.content_id.clone(),
            kind: self.request.kind,
            title: self.request.title.clone(),
            phase: self.phase,
            position: self.position,
            total: self.total,
            percent_complete: percent,
            resume: self.offer.clone(),
            watermark: self.surface.watermark(),
            tampered: self.guard.is_tampered(),
            indicator: match self.phase {
                SessionPhase::Active => Some(position_label(self.request.kind, self.position)),
                _ => None,
            },
            error: self.error.as_ref().map(ToString::to_string),
        }
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        if !self.torn_down {
            tracing::debug!(session_id = %self.id, "session dropped without close");
        }
        self.release();
    }
}

/// A live reader or player; the controller routes by content kind.
pub enum ContentSession {
    Ebook(EbookReaderSession),
    Audiobook(AudiobookPlayerSession),
}

impl ContentSession {
    pub fn core(&self) -> &SessionCore {
        match self {
            ContentSession::Ebook(s) => s.core(),
            ContentSession::Audiobook(s) => s.core(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        match self {
            ContentSession::Ebook(s) => s.snapshot(),
            ContentSession::Audiobook(s) => s.snapshot(),
        }
    }

    pub fn resolve(&mut self, choice: ResumeChoice) -> AccessResult<f64> {
        match self {
            ContentSession::Ebook(s) => s.resolve(choice).map(|outcome| outcome.position),
            ContentSession::Audiobook(s) => s.resolve(choice),
        }
    }

    pub async fn close(&mut self) -> bool {
        match self {
            ContentSession::Ebook(s) => s.close().await,
            ContentSession::Audiobook(s) => s.close().await,
        }
    }
}
