use futures::{StreamExt, stream::BoxStream};
use poem_openapi::payload::{Binary, EventStream, Json};

use crate::{
    api::models::{
        ClosedDto, CloseResponse, ErrorDto, LibraryUpdateDto, OpenSessionRequestDto, PageResponse,
        PlaybackRequestDto, ResumeRequestDto, SessionDto, SessionResponse, StreamResponse,
        TamperDto, TamperRequestDto, TamperResponse, ViewportRequestDto, ViewportResponse,
    },
    controller::SessionController,
};

pub struct SessionService<'a> {
    pub controller: &'a SessionController,
}

impl<'a> SessionService<'a> {
    pub fn new(controller: &'a SessionController) -> Self {
        Self { controller }
    }

    #[tracing::instrument(level = "debug", skip(self, req), fields(kind = %req.kind, id = %req.id))]
    pub async fn open(&self, req: OpenSessionRequestDto) -> SessionResponse {
        let title = req.name.as_deref().unwrap_or_default();
        match self.controller.access_content(&req.kind, title, &req.id).await {
            Ok(snapshot) => SessionResponse::Ok(Json(SessionDto::from(snapshot))),
            Err(e) if e.aborts_session() => {
                tracing::warn!(error = %e, "content could not be opened");
                SessionResponse::from(e)
            }
            Err(e) => {
                tracing::error!(error = %e, "unexpected failure while opening content");
                SessionResponse::from(e)
            }
        }
    }

    pub async fn current(&self) -> SessionResponse {
        match self.controller.current().await {
            Some(snapshot) => SessionResponse::Ok(Json(SessionDto::from(snapshot))),
            None => SessionResponse::NotFound(Json(ErrorDto {
                message: "no content session is open".into(),
            })),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, req))]
    pub async fn resume(&self, req: ResumeRequestDto) -> SessionResponse {
        match self.controller.resolve_resume(req.choice.into()).await {
            Ok(snapshot) => SessionResponse::Ok(Json(SessionDto::from(snapshot))),
            Err(e) => SessionResponse::from(e),
        }
    }

    pub async fn viewport(&self, req: ViewportRequestDto) -> ViewportResponse {
        match self.controller.report_viewport(&req.entries()).await {
            Ok(update) => ViewportResponse::Ok(Json(update.into())),
            Err(e) => ViewportResponse::from(e),
        }
    }

    pub async fn page(&self, page: u32) -> PageResponse {
        match self.controller.page(page).await {
            Ok(Some(raster)) => PageResponse::Ok(Binary(raster.bytes)),
            Ok(None) => PageResponse::NotFound(Json(ErrorDto {
                message: format!("page {} is not decoded", page),
            })),
            Err(e) => PageResponse::from(e),
        }
    }

    pub async fn stream(&self) -> StreamResponse {
        match self.controller.stream().await {
            Ok(stream) => StreamResponse::from(stream),
            Err(e) => StreamResponse::from(e),
        }
    }

    pub fn library_updates(&self) -> EventStream<BoxStream<'static, LibraryUpdateDto>> {
        EventStream::new(self.controller.library_updates().map(LibraryUpdateDto::from).boxed())
    }

    pub async fn playback(&self, req: PlaybackRequestDto) -> SessionResponse {
        let event = match req.event() {
            Ok(event) => event,
            Err(message) => return SessionResponse::BadRequest(Json(ErrorDto { message })),
        };
        match self.controller.playback(event).await {
            Ok(snapshot) => SessionResponse::Ok(Json(SessionDto::from(snapshot))),
            Err(e) => SessionResponse::from(e),
        }
    }

    pub fn tamper(&self, req: TamperRequestDto) -> TamperResponse {
        let notified = self.controller.report_tamper(req.signal.into());
        TamperResponse::Ok(Json(TamperDto {
            notified: notified as u32,
        }))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn close(&self) -> CloseResponse {
        let closed = self.controller.close().await;
        CloseResponse::Ok(Json(ClosedDto { closed }))
    }
}
