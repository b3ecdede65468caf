// Domain models shared by the storefront client, the progress store and the sessions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AccessError, AccessResult};

/// Above this percentage a title counts as finished and its progress is cleared.
pub const COMPLETION_THRESHOLD_PERCENT: f64 = 95.0;

/// Positions at or below this (1 page / 1 second) are not worth resuming or persisting.
pub const MEANINGFUL_POSITION: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentKind {
    Ebook,
    Audiobook,
}

impl ContentKind {
    /// Parse the labels the storefront uses for product types ("E-Book", "EBOOK", "Audiobook", ...).
    pub fn from_label(label: &str) -> AccessResult<Self> {
        let simplified: String = label
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match simplified.as_str() {
            "ebook" | "pdf" => Ok(ContentKind::Ebook),
            "audiobook" | "audio" => Ok(ContentKind::Audiobook),
            _ => Err(AccessError::UnknownContentKind(label.to_string())),
        }
    }

    /// Wire name used in progress payloads.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ContentKind::Ebook => "EBOOK",
            ContentKind::Audiobook => "AUDIOBOOK",
        }
    }

    /// Path segment of the protected content endpoint.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ContentKind::Ebook => "ebook",
            ContentKind::Audiobook => "audio",
        }
    }

    /// Single letter used in content identity keys.
    pub fn identity_code(&self) -> &'static str {
        match self {
            ContentKind::Ebook => "e",
            ContentKind::Audiobook => "a",
        }
    }

    /// Position a fresh session starts at. Pages are numbered from 1.
    pub fn start_position(&self) -> f64 {
        match self {
            ContentKind::Ebook => 1.0,
            ContentKind::Audiobook => 0.0,
        }
    }
}

/// Validated identifier of a purchased item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    pub fn parse(raw: &str) -> AccessResult<Self> {
        let trimmed = raw.trim();
        let placeholder = matches!(trimmed, "undefined" | "null" | "NaN");
        if trimmed.is_empty() || placeholder || trimmed.contains(['/', '?', '#']) {
            return Err(AccessError::InvalidContentId(raw.to_string()));
        }
        Ok(ContentId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the UI asks for when the user presses "Read now" / "Listen now".
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub content_id: ContentId,
    pub kind: ContentKind,
    pub title: String,
}

impl ContentRequest {
    /// Validate the raw `(type, name, id)` triple before any session is built.
    pub fn parse(kind_label: &str, title: &str, raw_id: &str) -> AccessResult<Self> {
        let kind = ContentKind::from_label(kind_label)?;
        let content_id = ContentId::parse(raw_id)?;
        Ok(ContentRequest {
            content_id,
            kind,
            title: title.trim().to_string(),
        })
    }
}

/// `position / total * 100`, clamped to `[0, 100]`. Unknown totals yield 0.
pub fn percent_complete(position: f64, total: f64) -> f64 {
    if !position.is_finite() || !total.is_finite() || total <= 0.0 {
        return 0.0;
    }
    (position / total * 100.0).clamp(0.0, 100.0)
}

/// Persisted bookmark for one content item.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub content_id: ContentId,
    pub kind: ContentKind,
    /// Page number for ebooks, elapsed seconds for audiobooks.
    pub position: f64,
    /// Page count for ebooks, duration in seconds for audiobooks.
    pub total: f64,
    pub percent_complete: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn new(content_id: ContentId, kind: ContentKind, position: f64, total: f64) -> Self {
        let position = if position.is_finite() { position.max(0.0) } else { 0.0 };
        let total = if total.is_finite() { total.max(0.0) } else { 0.0 };
        ProgressRecord {
            content_id,
            kind,
            position,
            total,
            percent_complete: percent_complete(position, total),
            updated_at: None,
        }
    }

    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Same position measured against a different total (e.g. a freshly loaded duration).
    pub fn with_total(&self, total: f64) -> Self {
        ProgressRecord {
            updated_at: self.updated_at,
            ..ProgressRecord::new(self.content_id.clone(), self.kind, self.position, total)
        }
    }

    pub fn is_meaningful(&self) -> bool {
        self.position >= MEANINGFUL_POSITION
    }

    pub fn is_finished(&self) -> bool {
        self.percent_complete > COMPLETION_THRESHOLD_PERCENT
    }

    /// A resume prompt is offered iff the position is past the first page / second
    /// and the title is not finished.
    pub fn is_resumable(&self) -> bool {
        self.position > MEANINGFUL_POSITION && !self.is_finished()
    }

    pub fn position_label(&self) -> String {
        position_label(self.kind, self.position)
    }
}

/// Item in the user's digital library.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryItem {
    pub content_id: ContentId,
    pub title: String,
    pub kind: ContentKind,
    pub thumbnail_ref: Option<String>,
    pub source_ref: Option<String>,
    pub language: String,
    pub acquired_date: Option<DateTime<Utc>>,
}

/// `m:ss` for elapsed seconds; `0:00` when unknown.
pub fn format_elapsed(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0:00".to_string();
    }
    let whole = seconds.floor() as u64;
    format!("{}:{:02}", whole / 60, whole % 60)
}

pub fn position_label(kind: ContentKind, position: f64) -> String {
    match kind {
        ContentKind::Ebook => format!("Page {}", position.max(1.0).floor() as u64),
        ContentKind::Audiobook => format_elapsed(position),
    }
}

pub fn page_indicator(page: u32, total: u32) -> String {
    format!("Page {} of {}", page, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ContentId {
        ContentId::parse(raw).unwrap()
    }

    #[test]
    fn kind_labels_from_storefront() {
        assert_eq!(ContentKind::from_label("E-Book").unwrap(), ContentKind::Ebook);
        assert_eq!(ContentKind::from_label("EBOOK").unwrap(), ContentKind::Ebook);
        assert_eq!(ContentKind::from_label(" Audiobook ").unwrap(), ContentKind::Audiobook);
        assert_eq!(ContentKind::from_label("AUDIOBOOK").unwrap(), ContentKind::Audiobook);
        assert!(matches!(
            ContentKind::from_label("Paperback"),
            Err(AccessError::UnknownContentKind(_))
        ));
    }

    #[test]
    fn content_id_rejects_placeholders() {
        for raw in ["", "   ", "undefined", "null", "a/b"] {
            assert!(
                matches!(ContentId::parse(raw), Err(AccessError::InvalidContentId(_))),
                "{raw:?} should be rejected"
            );
        }
        assert_eq!(id(" 64f0c2 ").as_str(), "64f0c2");
    }

    #[test]
    fn request_validation_fails_fast() {
        let err = ContentRequest::parse("EBOOK", "Title", "").unwrap_err();
        assert!(matches!(err, AccessError::InvalidContentId(_)));
        let ok = ContentRequest::parse("Audiobook", " Dawn ", "abc").unwrap();
        assert_eq!(ok.kind, ContentKind::Audiobook);
        assert_eq!(ok.title, "Dawn");
    }

    #[test]
    fn percent_is_derived_and_clamped() {
        let cases = [
            (50.0, 100.0, 50.0),
            (150.0, 100.0, 100.0),
            (-3.0, 100.0, 0.0),
            (10.0, 0.0, 0.0),
            (f64::NAN, 10.0, 0.0),
        ];
        for (position, total, expected) in cases {
            let rec = ProgressRecord::new(id("x"), ContentKind::Ebook, position, total);
            assert!(rec.percent_complete >= 0.0 && rec.percent_complete <= 100.0);
            assert_eq!(rec.percent_complete, expected, "{position}/{total}");
        }
    }

    #[test]
    fn resume_eligibility() {
        let halfway = ProgressRecord::new(id("x"), ContentKind::Ebook, 50.0, 100.0);
        assert!(halfway.is_resumable());

        let first_page = ProgressRecord::new(id("x"), ContentKind::Ebook, 1.0, 100.0);
        assert!(!first_page.is_resumable());

        let exactly_95 = ProgressRecord::new(id("x"), ContentKind::Audiobook, 95.0, 100.0);
        assert!(exactly_95.is_resumable());
        assert!(!exactly_95.is_finished());

        let nearly_done = ProgressRecord::new(id("x"), ContentKind::Audiobook, 118.0, 120.0);
        assert!(nearly_done.is_finished());
        assert!(!nearly_done.is_resumable());
    }

    #[test]
    fn with_total_recomputes_percent() {
        let rec = ProgressRecord::new(id("x"), ContentKind::Audiobook, 60.0, 0.0);
        assert_eq!(rec.percent_complete, 0.0);
        assert_eq!(rec.with_total(120.0).percent_complete, 50.0);
    }

    #[test]
    fn labels() {
        assert_eq!(format_elapsed(0.0), "0:00");
        assert_eq!(format_elapsed(65.9), "1:05");
        assert_eq!(format_elapsed(3600.0), "60:00");
        assert_eq!(position_label(ContentKind::Ebook, 50.0), "Page 50");
        assert_eq!(page_indicator(3, 12), "Page 3 of 12");
    }
}
