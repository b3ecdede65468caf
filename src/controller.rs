// Owns the single live content session and routes UI requests to it.

use std::sync::Arc;

use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use tokio::sync::{Mutex, broadcast};

use crate::{
    document::DocumentLoader,
    domain::models::{ContentKind, ContentRequest},
    error::{AccessError, AccessResult},
    session::{
        AudiobookPlayerSession, ContentSession, ContentStream, EbookReaderSession, LibraryEvent,
        ResumeChoice, SessionContext, SessionPhase, SessionSnapshot,
        audiobook::PlaybackEvent,
        ebook::{PageVisibility, ViewportUpdate},
        guard::TamperSignal,
        surface::RasterBuffer,
    },
};

pub struct SessionController {
    ctx: SessionContext,
    loader: Arc<dyn DocumentLoader>,
    current: Mutex<Option<ContentSession>>,
}

impl SessionController {
    pub fn new(ctx: SessionContext, loader: Arc<dyn DocumentLoader>) -> Self {
        Self {
            ctx,
            loader,
            current: Mutex::new(None),
        }
    }

    /// Open a title from the library ("Read now" / "Listen now"). Re-opening the
    /// content that is already open hands back the live session; anything else
    /// closes the live session first.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn access_content(
        &self,
        kind_label: &str,
        title: &str,
        raw_id: &str,
    ) -> AccessResult<SessionSnapshot> {
        let request = ContentRequest::parse(kind_label, title, raw_id)?;
        let mut current = self.current.lock().await;

        if let Some(session) = current.as_ref() {
            let core = session.core();
            let reusable = !core.is_closed() && core.phase() != SessionPhase::Error;
            if reusable && core.content_id() == &request.content_id && core.kind() == request.kind {
                tracing::debug!(content_id = %request.content_id, "content already open");
                return Ok(session.snapshot());
            }
        }
        if let Some(mut previous) = current.take() {
            previous.close().await;
        }

        let mut session = match request.kind {
            ContentKind::Ebook => ContentSession::Ebook(
                EbookReaderSession::new(self.ctx.clone(), request, self.loader.clone())?,
            ),
            ContentKind::Audiobook => ContentSession::Audiobook(
                AudiobookPlayerSession::new(self.ctx.clone(), request)?,
            ),
        };
        let loaded = match &mut session {
            ContentSession::Ebook(s) => s.load().await,
            ContentSession::Audiobook(s) => s.load().await,
        };
        if let Err(e) = loaded {
            session.close().await;
            return Err(e);
        }
        let snapshot = session.snapshot();
        *current = Some(session);
        Ok(snapshot)
    }

    pub async fn current(&self) -> Option<SessionSnapshot> {
        self.current.lock().await.as_ref().map(ContentSession::snapshot)
    }

    pub async fn resolve_resume(&self, choice: ResumeChoice) -> AccessResult<SessionSnapshot> {
        let mut current = self.current.lock().await;
        let session = current.as_mut().ok_or(AccessError::NoActiveSession)?;
        session.resolve(choice)?;
        Ok(session.snapshot())
    }

    pub async fn report_viewport(&self, entries: &[PageVisibility]) -> AccessResult<ViewportUpdate> {
        let mut current = self.current.lock().await;
        match current.as_mut() {
            Some(ContentSession::Ebook(s)) => s.on_viewport(entries),
            Some(ContentSession::Audiobook(_)) => Err(AccessError::InvalidState("playing an audiobook")),
            None => Err(AccessError::NoActiveSession),
        }
    }

    pub async fn page(&self, page: u32) -> AccessResult<Option<RasterBuffer>> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(ContentSession::Ebook(s)) => Ok(s.page(page)),
            Some(ContentSession::Audiobook(_)) => Err(AccessError::InvalidState("playing an audiobook")),
            None => Err(AccessError::NoActiveSession),
        }
    }

    /// Protected audio of the open audiobook, for the host's media element.
    pub async fn stream(&self) -> AccessResult<ContentStream> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(ContentSession::Audiobook(s)) => s.stream().cloned().ok_or(AccessError::NoActiveSession),
            Some(ContentSession::Ebook(_)) => Err(AccessError::InvalidState("reading an ebook")),
            None => Err(AccessError::NoActiveSession),
        }
    }

    pub async fn playback(&self, event: PlaybackEvent) -> AccessResult<SessionSnapshot> {
        let mut current = self.current.lock().await;
        match current.as_mut() {
            Some(ContentSession::Audiobook(s)) => {
                s.handle(event)?;
                Ok(s.snapshot())
            }
            Some(ContentSession::Ebook(_)) => Err(AccessError::InvalidState("reading an ebook")),
            None => Err(AccessError::NoActiveSession),
        }
    }

    /// Forward a violation to every live guard. Returns how many were notified.
    pub fn report_tamper(&self, signal: TamperSignal) -> usize {
        self.ctx.tamper.report(signal)
    }

    /// Close the live session, if any.
    pub async fn close(&self) -> bool {
        let session = self.current.lock().await.take();
        match session {
            Some(mut session) => session.close().await,
            None => false,
        }
    }

    pub fn subscribe_library(&self) -> broadcast::Receiver<LibraryEvent> {
        self.ctx.library_events.subscribe()
    }

    /// Library refresh events as a stream; lagging subscribers skip what they missed.
    pub fn library_updates(&self) -> BoxStream<'static, LibraryEvent> {
        stream::unfold(self.subscribe_library(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "library update stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::document::{PageArchiveLoader, archive_with_pages};
    use crate::testing::{FakeBackend, FakeSource, Harness, id};

    fn controller(h: &Harness) -> SessionController {
        SessionController::new(h.ctx.clone(), Arc::new(PageArchiveLoader))
    }

    fn book() -> FakeSource {
        FakeSource::serving(archive_with_pages(&[b"p1", b"p2", b"p3"]), None)
    }

    #[tokio::test]
    async fn same_content_reuses_the_session() {
        let h = Harness::new(FakeBackend::default(), book());
        let c = controller(&h);

        let first = c.access_content("E-Book", "Dune", "b1").await.unwrap();
        let again = c.access_content("EBOOK", "Dune", " b1 ").await.unwrap();
        assert_eq!(first.session_id, again.session_id);
        assert_eq!(h.source.calls(), 1);
        assert!(c.close().await);
        assert!(c.current().await.is_none());
    }

    #[tokio::test]
    async fn switching_content_closes_the_previous_session() {
        let h = Harness::new(FakeBackend::default(), book());
        let c = controller(&h);
        let mut events = c.subscribe_library();

        let first = c.access_content("ebook", "Dune", "b1").await.unwrap();
        let second = c.access_content("ebook", "Emma", "b2").await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(
            events.try_recv().unwrap(),
            LibraryEvent::SessionClosed { content_id: id("b1") }
        );
        assert_eq!(h.tamper.observer_count(), 1, "old guard is gone");
        assert_eq!(c.current().await.unwrap().content_id, id("b2"));
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_stream() {
        let h = Harness::new(FakeBackend::default(), book());
        let c = controller(&h);

        assert!(matches!(
            c.access_content("ebook", "Dune", "undefined").await,
            Err(AccessError::InvalidContentId(_))
        ));
        assert!(matches!(
            c.access_content("podcast", "Dune", "b1").await,
            Err(AccessError::UnknownContentKind(_))
        ));
        assert_eq!(h.source.calls(), 0);
        assert_eq!(c.resolve_resume(ResumeChoice::Resume).await, Err(AccessError::NoActiveSession));
    }

    #[tokio::test]
    async fn failed_open_leaves_no_session() {
        let h = Harness::new(
            FakeBackend::default(),
            FakeSource::failing(AccessError::StreamUnavailable("Access denied.".into())),
        );
        let c = controller(&h);

        let err = c.access_content("audio", "Dune", "a1").await.unwrap_err();
        assert_eq!(err, AccessError::StreamUnavailable("Access denied.".into()));
        assert!(c.current().await.is_none());
        assert_eq!(h.tamper.observer_count(), 0);
        assert_eq!(h.backend.fetch_count(), 0);
    }

    #[tokio::test]
    async fn audiobook_stream_is_served_to_the_player() {
        let h = Harness::new(
            FakeBackend::default(),
            FakeSource::serving(Bytes::from_static(b"ID3\x04\x00"), Some(120.0)),
        );
        let c = controller(&h);
        assert_eq!(c.stream().await.unwrap_err(), AccessError::NoActiveSession);

        c.access_content("audiobook", "The Hobbit", "a1").await.unwrap();
        let stream = c.stream().await.unwrap();
        assert_eq!(&stream.body[..], b"ID3\x04\x00");
        assert_eq!(stream.duration_secs, Some(120.0));
        c.close().await;
    }

    #[tokio::test]
    async fn ebooks_have_no_audio_stream() {
        let h = Harness::new(FakeBackend::default(), book());
        let c = controller(&h);
        c.access_content("ebook", "Dune", "b1").await.unwrap();
        assert_eq!(
            c.stream().await.unwrap_err(),
            AccessError::InvalidState("reading an ebook")
        );
        c.close().await;
    }

    #[tokio::test]
    async fn closing_a_session_publishes_a_library_update() {
        let h = Harness::new(FakeBackend::default(), book());
        let c = controller(&h);
        let mut updates = c.library_updates();

        c.access_content("ebook", "Dune", "b1").await.unwrap();
        c.close().await;
        assert_eq!(
            updates.next().await,
            Some(LibraryEvent::SessionClosed { content_id: id("b1") })
        );
    }

    #[tokio::test]
    async fn commands_are_routed_by_kind() {
        let h = Harness::new(FakeBackend::default(), book());
        let c = controller(&h);
        c.access_content("ebook", "Dune", "b1").await.unwrap();

        assert_eq!(
            c.playback(PlaybackEvent::Play).await.unwrap_err(),
            AccessError::InvalidState("reading an ebook")
        );
        let update = c
            .report_viewport(&[PageVisibility {
                page: 2,
                ratio: 1.0,
                intersecting: true,
            }])
            .await
            .unwrap();
        assert_eq!(update.indicator.as_deref(), Some("Page 2 of 3"));
        assert_eq!(c.page(3).await.unwrap().unwrap().bytes, b"p3");
        assert_eq!(c.report_tamper(TamperSignal::DevTools), 1);
        assert!(c.page(3).await.unwrap().unwrap().is_scrubbed());
        c.close().await;
    }
}
