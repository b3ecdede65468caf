use chrono::{DateTime, Utc};
use poem_openapi::{
    ApiResponse, Enum, Object,
    payload::{Binary, Json},
};
use uuid::Uuid;

use crate::{
    domain::{
        library::{ContinueShortcuts, LibraryCard},
        models::ProgressRecord,
    },
    error::AccessError,
    session::{
        ContentStream, LibraryEvent, ResumeChoice, SessionSnapshot,
        audiobook::PlaybackEvent,
        ebook::{PageVisibility, ViewportUpdate},
        guard::TamperSignal,
    },
};

#[derive(Debug, Clone, Object)]
pub struct ErrorDto {
    /// Human-readable error message
    pub message: String,
}

// ===== Requests =====

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct OpenSessionRequestDto {
    /// Storefront product type, e.g. "E-Book" or "Audiobook"
    #[oai(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub id: String,
}

#[derive(Debug, Clone, Copy, Enum)]
#[oai(rename_all = "lowercase")]
pub enum ResumeChoiceDto {
    Resume,
    Restart,
}

impl From<ResumeChoiceDto> for ResumeChoice {
    fn from(choice: ResumeChoiceDto) -> Self {
        match choice {
            ResumeChoiceDto::Resume => ResumeChoice::Resume,
            ResumeChoiceDto::Restart => ResumeChoice::Restart,
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct ResumeRequestDto {
    pub choice: ResumeChoiceDto,
}

#[derive(Debug, Clone, Object)]
pub struct PageVisibilityDto {
    pub page: u32,
    pub ratio: f64,
    pub intersecting: bool,
}

#[derive(Debug, Clone, Object)]
pub struct ViewportRequestDto {
    pub entries: Vec<PageVisibilityDto>,
}

impl ViewportRequestDto {
    pub fn entries(&self) -> Vec<PageVisibility> {
        self.entries
            .iter()
            .map(|e| PageVisibility {
                page: e.page,
                ratio: e.ratio,
                intersecting: e.intersecting,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Enum)]
#[oai(rename_all = "lowercase")]
pub enum PlaybackEventKindDto {
    Metadata,
    Play,
    Pause,
    Time,
    Ended,
}

#[derive(Debug, Clone, Object)]
pub struct PlaybackRequestDto {
    pub event: PlaybackEventKindDto,
    /// Seconds played, for `time`
    pub elapsed: Option<f64>,
    /// Seconds, for `metadata`
    pub duration: Option<f64>,
}

impl PlaybackRequestDto {
    pub fn event(&self) -> Result<PlaybackEvent, String> {
        Ok(match self.event {
            PlaybackEventKindDto::Metadata => PlaybackEvent::LoadedMetadata {
                duration: self.duration.ok_or("metadata event needs a duration")?,
            },
            PlaybackEventKindDto::Play => PlaybackEvent::Play,
            PlaybackEventKindDto::Pause => PlaybackEvent::Pause,
            PlaybackEventKindDto::Time => PlaybackEvent::TimeUpdate {
                elapsed: self.elapsed.ok_or("time event needs elapsed seconds")?,
            },
            PlaybackEventKindDto::Ended => PlaybackEvent::Ended,
        })
    }
}

#[derive(Debug, Clone, Copy, Enum)]
#[oai(rename_all = "snake_case")]
pub enum TamperSignalDto {
    DevTools,
    CanvasExtraction,
    ScreenCapture,
}

impl From<TamperSignalDto> for TamperSignal {
    fn from(signal: TamperSignalDto) -> Self {
        match signal {
            TamperSignalDto::DevTools => TamperSignal::DevTools,
            TamperSignalDto::CanvasExtraction => TamperSignal::CanvasExtraction,
            TamperSignalDto::ScreenCapture => TamperSignal::ScreenCapture,
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct TamperRequestDto {
    pub signal: TamperSignalDto,
}

// ===== Responses =====

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ResumeOfferDto {
    pub position: f64,
    pub total: f64,
    pub percent_complete: f64,
    /// "Page 50" or "12:34"
    pub label: String,
}

#[derive(Debug, Clone, Object)]
pub struct WatermarkDto {
    pub label: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct SessionDto {
    pub session_id: Uuid,
    pub content_id: String,
    #[oai(rename = "type")]
    pub kind: String,
    pub title: String,
    pub phase: String,
    pub position: f64,
    pub total: f64,
    pub percent_complete: f64,
    pub resume: Option<ResumeOfferDto>,
    pub watermark: Option<WatermarkDto>,
    pub tampered: bool,
    pub indicator: Option<String>,
    pub error: Option<String>,
}

impl From<SessionSnapshot> for SessionDto {
    fn from(s: SessionSnapshot) -> Self {
        SessionDto {
            session_id: s.session_id,
            content_id: s.content_id.to_string(),
            kind: s.kind.wire_name().to_string(),
            title: s.title,
            phase: s.phase.wire_name().to_string(),
            position: s.position,
            total: s.total,
            percent_complete: s.percent_complete,
            resume: s.resume.map(|o| ResumeOfferDto {
                position: o.position,
                total: o.total,
                percent_complete: o.percent_complete,
                label: o.label,
            }),
            watermark: s.watermark.map(|w| WatermarkDto {
                label: w.label,
                fingerprint: w.fingerprint,
            }),
            tampered: s.tampered,
            indicator: s.indicator,
            error: s.error,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ViewportDto {
    pub current_page: Option<u32>,
    /// "Page N of M"
    pub indicator: Option<String>,
    pub decoded: Vec<u32>,
}

impl From<ViewportUpdate> for ViewportDto {
    fn from(u: ViewportUpdate) -> Self {
        ViewportDto {
            current_page: u.current_page,
            indicator: u.indicator,
            decoded: u.decoded,
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct TamperDto {
    /// Number of live sessions that received the report
    pub notified: u32,
}

#[derive(Debug, Clone, Object)]
pub struct ClosedDto {
    pub closed: bool,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ProgressDto {
    pub position: f64,
    pub total: f64,
    pub percent_complete: f64,
    pub label: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&ProgressRecord> for ProgressDto {
    fn from(r: &ProgressRecord) -> Self {
        ProgressDto {
            position: r.position,
            total: r.total,
            percent_complete: r.percent_complete,
            label: r.position_label(),
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct LibraryCardDto {
    pub id: String,
    pub title: String,
    #[oai(rename = "type")]
    pub kind: String,
    pub thumbnail: Option<String>,
    pub language: String,
    pub acquired_date: Option<DateTime<Utc>>,
    pub progress: Option<ProgressDto>,
}

impl From<&LibraryCard> for LibraryCardDto {
    fn from(card: &LibraryCard) -> Self {
        LibraryCardDto {
            id: card.item.content_id.to_string(),
            title: card.item.title.clone(),
            kind: card.item.kind.wire_name().to_string(),
            thumbnail: card.item.thumbnail_ref.clone(),
            language: card.item.language.clone(),
            acquired_date: card.item.acquired_date,
            progress: card.progress.as_ref().map(ProgressDto::from),
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct ContinueDto {
    pub reading: Option<LibraryCardDto>,
    pub listening: Option<LibraryCardDto>,
}

impl From<&ContinueShortcuts> for ContinueDto {
    fn from(s: &ContinueShortcuts) -> Self {
        ContinueDto {
            reading: s.reading.as_ref().map(LibraryCardDto::from),
            listening: s.listening.as_ref().map(LibraryCardDto::from),
        }
    }
}

/// Pushed to library views whenever a title's saved progress may have changed.
#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct LibraryUpdateDto {
    pub content_id: String,
    pub reason: String,
}

impl From<LibraryEvent> for LibraryUpdateDto {
    fn from(event: LibraryEvent) -> Self {
        match event {
            LibraryEvent::SessionClosed { content_id } => LibraryUpdateDto {
                content_id: content_id.to_string(),
                reason: "session_closed".into(),
            },
        }
    }
}

// ===== Response enums =====

/// Every session endpoint fails the same way; this maps access errors onto the
/// shared error variants of a response enum.
macro_rules! access_error_responses {
    ($($response:ident),+ $(,)?) => {
        $(
            impl From<AccessError> for $response {
                fn from(e: AccessError) -> Self {
                    let body = Json(ErrorDto { message: e.to_string() });
                    match e {
                        AccessError::AuthRequired => $response::Unauthorized(body),
                        AccessError::InvalidContentId(_) | AccessError::UnknownContentKind(_) => {
                            $response::BadRequest(body)
                        }
                        AccessError::NoActiveSession => $response::NotFound(body),
                        AccessError::InvalidState(_) | AccessError::GuardUnavailable(_) => {
                            $response::Conflict(body)
                        }
                        AccessError::StreamUnavailable(_) | AccessError::SyncFailed(_) => {
                            $response::BadGateway(body)
                        }
                    }
                }
            }
        )+
    };
}

#[derive(ApiResponse)]
pub enum SessionResponse {
    #[oai(status = 200)]
    Ok(Json<SessionDto>),
    /// Malformed content type or id
    #[oai(status = 400)]
    BadRequest(Json<ErrorDto>),
    /// Not signed in
    #[oai(status = 401)]
    Unauthorized(Json<ErrorDto>),
    /// No session is open
    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),
    /// Not allowed in the current session phase
    #[oai(status = 409)]
    Conflict(Json<ErrorDto>),
    /// Content service error
    #[oai(status = 502)]
    BadGateway(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum ViewportResponse {
    #[oai(status = 200)]
    Ok(Json<ViewportDto>),
    #[oai(status = 400)]
    BadRequest(Json<ErrorDto>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorDto>),
    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),
    #[oai(status = 409)]
    Conflict(Json<ErrorDto>),
    #[oai(status = 502)]
    BadGateway(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum PageResponse {
    /// Decoded page bytes
    #[oai(status = 200)]
    Ok(Binary<Vec<u8>>),
    #[oai(status = 400)]
    BadRequest(Json<ErrorDto>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorDto>),
    /// No session, or the page is not decoded
    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),
    #[oai(status = 409)]
    Conflict(Json<ErrorDto>),
    #[oai(status = 502)]
    BadGateway(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum StreamResponse {
    /// Protected audio bytes
    #[oai(status = 200)]
    Ok(Binary<Vec<u8>>, #[oai(header = "Content-Type")] String),
    #[oai(status = 400)]
    BadRequest(Json<ErrorDto>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorDto>),
    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),
    /// The open session is an ebook
    #[oai(status = 409)]
    Conflict(Json<ErrorDto>),
    #[oai(status = 502)]
    BadGateway(Json<ErrorDto>),
}

impl From<ContentStream> for StreamResponse {
    fn from(stream: ContentStream) -> Self {
        let content_type = stream
            .content_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        StreamResponse::Ok(Binary(stream.body.to_vec()), content_type)
    }
}

access_error_responses!(SessionResponse, ViewportResponse, PageResponse, StreamResponse);

#[derive(ApiResponse)]
pub enum TamperResponse {
    #[oai(status = 200)]
    Ok(Json<TamperDto>),
}

#[derive(ApiResponse)]
pub enum CloseResponse {
    #[oai(status = 200)]
    Ok(Json<ClosedDto>),
}

#[derive(ApiResponse)]
pub enum LibraryResponse {
    #[oai(status = 200)]
    Ok(Json<Vec<LibraryCardDto>>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorDto>),
    /// Upstream storefront error
    #[oai(status = 502)]
    BadGateway(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum ContinueResponse {
    #[oai(status = 200)]
    Ok(Json<ContinueDto>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorDto>),
    #[oai(status = 502)]
    BadGateway(Json<ErrorDto>),
}
