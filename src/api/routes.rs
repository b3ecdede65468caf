use std::sync::Arc;

use futures::stream::BoxStream;
use poem_openapi::{
    OpenApi,
    param::Path,
    payload::{EventStream, Json},
};

use super::models::{
    CloseResponse, ContinueResponse, LibraryResponse, LibraryUpdateDto, OpenSessionRequestDto,
    PageResponse, PlaybackRequestDto, ResumeRequestDto, SessionResponse, StreamResponse,
    TamperRequestDto, TamperResponse, ViewportRequestDto, ViewportResponse,
};
use super::services::{library::LibraryService, session::SessionService};
use crate::{controller::SessionController, progress::ProgressStore, storefront_client::StorefrontClient};

pub struct StorefrontApi {
    pub client: Arc<StorefrontClient>,
    pub store: Arc<ProgressStore>,
    pub controller: Arc<SessionController>,
}

#[OpenApi]
impl StorefrontApi {
    // ===== Library =====

    /// Purchased titles with their saved progress
    #[oai(path = "/v1/library", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn library(&self) -> LibraryResponse {
        LibraryService::new(&self.client, &self.store).list().await
    }

    /// Most recently read ebook and most recently heard audiobook
    #[oai(path = "/v1/library/continue", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn continue_shortcuts(&self) -> ContinueResponse {
        LibraryService::new(&self.client, &self.store)
            .continue_shortcuts()
            .await
    }

    /// Server-sent events telling library views to refresh a title's progress
    #[oai(path = "/v1/library/updates", method = "get")]
    async fn library_updates(&self) -> EventStream<BoxStream<'static, LibraryUpdateDto>> {
        SessionService::new(&self.controller).library_updates()
    }

    // ===== Content session =====

    /// Open a title ("Read now" / "Listen now")
    #[oai(path = "/v1/sessions", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn open_session(&self, body: Json<OpenSessionRequestDto>) -> SessionResponse {
        SessionService::new(&self.controller).open(body.0).await
    }

    #[oai(path = "/v1/sessions/current", method = "get")]
    async fn current_session(&self) -> SessionResponse {
        SessionService::new(&self.controller).current().await
    }

    /// Answer the resume prompt
    #[oai(path = "/v1/sessions/current/resume", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn resume(&self, body: Json<ResumeRequestDto>) -> SessionResponse {
        SessionService::new(&self.controller).resume(body.0).await
    }

    /// Page visibility changes of the reader
    #[oai(path = "/v1/sessions/current/viewport", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn viewport(&self, body: Json<ViewportRequestDto>) -> ViewportResponse {
        SessionService::new(&self.controller).viewport(body.0).await
    }

    /// Decoded bytes of one page
    #[oai(path = "/v1/sessions/current/pages/:page", method = "get")]
    #[tracing::instrument(level = "debug", skip(self, page))]
    async fn page(&self, page: Path<u32>) -> PageResponse {
        SessionService::new(&self.controller).page(page.0).await
    }

    /// Protected audio of the open audiobook
    #[oai(path = "/v1/sessions/current/stream", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn stream(&self) -> StreamResponse {
        SessionService::new(&self.controller).stream().await
    }

    /// Media element events of the player
    #[oai(path = "/v1/sessions/current/playback", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn playback(&self, body: Json<PlaybackRequestDto>) -> SessionResponse {
        SessionService::new(&self.controller).playback(body.0).await
    }

    /// Tamper violation detected by the host
    #[oai(path = "/v1/sessions/current/tamper", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn tamper(&self, body: Json<TamperRequestDto>) -> TamperResponse {
        SessionService::new(&self.controller).tamper(body.0)
    }

    /// Close the open session, flushing its progress
    #[oai(path = "/v1/sessions/current", method = "delete")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn close_session(&self) -> CloseResponse {
        SessionService::new(&self.controller).close().await
    }
}
