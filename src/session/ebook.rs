//! Paginated reader: lazy page decoding driven by viewport visibility, with the
//! most visible page treated as the current reading position.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::{
    document::{DocumentLoader, PagedDocument},
    domain::models::{ContentKind, ContentRequest, page_indicator},
    error::{AccessError, AccessResult},
};

use super::{
    ResumeChoice, SessionContext, SessionCore, SessionPhase, SessionSnapshot, Tracked,
    surface::RasterBuffer,
};

/// Visibility of one page placeholder, as reported by the viewport observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageVisibility {
    pub page: u32,
    /// Fraction of the page inside the viewport, `0.0..=1.0`.
    pub ratio: f64,
    pub intersecting: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportUpdate {
    pub current_page: Option<u32>,
    pub indicator: Option<String>,
    /// Pages decoded by this update, ascending.
    pub decoded: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumeOutcome {
    pub position: f64,
    /// Page to bring into view; `None` means stay at the top.
    pub scroll_to_page: Option<u32>,
}

pub struct EbookReaderSession {
    core: SessionCore,
    loader: Arc<dyn DocumentLoader>,
    document: Option<Box<dyn PagedDocument>>,
    decoded: BTreeSet<u32>,
    current_page: Option<u32>,
}

impl EbookReaderSession {
    pub fn new(
        ctx: SessionContext,
        request: ContentRequest,
        loader: Arc<dyn DocumentLoader>,
    ) -> AccessResult<Self> {
        if request.kind != ContentKind::Ebook {
            return Err(AccessError::UnknownContentKind(request.kind.wire_name().to_string()));
        }
        Ok(Self {
            core: SessionCore::new(ctx, request)?,
            loader,
            document: None,
            decoded: BTreeSet::new(),
            current_page: None,
        })
    }

    /// Fetch and parse the document, protect the surface, then look up saved progress.
    /// The stream is acquired before anything else so a failed fetch never touches progress.
    pub async fn load(&mut self) -> AccessResult<SessionPhase> {
        let stream = self.core.acquire_stream().await?;
        let document = match self.loader.load(stream.body) {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), content_id = %self.core.content_id(), "document unreadable");
                return Err(self.core.fail(AccessError::StreamUnavailable(
                    "This document could not be opened.".into(),
                )));
            }
        };
        let page_count = document.page_count();
        self.document = Some(document);
        tracing::debug!(page_count, "document parsed");

        self.core.enable_guard();
        let saved = self.core.load_progress().await;
        let phase = self.core.decide(saved, f64::from(page_count));
        if phase == SessionPhase::Active {
            self.current_page = Some(1);
        }
        Ok(phase)
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    pub fn page_count(&self) -> u32 {
        self.document.as_ref().map_or(0, |d| d.page_count())
    }

    #[cfg(test)]
    pub fn current_page(&self) -> Option<u32> {
        self.current_page
    }

    pub fn decoded_pages(&self) -> Vec<u32> {
        self.decoded.iter().copied().collect()
    }

    /// Decoded raster of `page`, if it is currently held.
    pub fn page(&self, page: u32) -> Option<RasterBuffer> {
        self.core.surface().buffer(page)
    }

    fn indicator(&self) -> Option<String> {
        self.current_page
            .map(|page| page_indicator(page, self.page_count()))
    }

    pub fn resolve(&mut self, choice: ResumeChoice) -> AccessResult<ResumeOutcome> {
        let position = self.core.resolve(choice)?;
        let page = (position.max(1.0).floor() as u32).min(self.page_count().max(1));
        self.current_page = Some(page);
        Ok(ResumeOutcome {
            position,
            scroll_to_page: (choice == ResumeChoice::Resume).then_some(page),
        })
    }

    /// Handle a viewport observation: decode what is (nearly) visible and move the
    /// current page to the most visible one. While the resume prompt is open pages
    /// still render but the position does not move.
    pub fn on_viewport(&mut self, entries: &[PageVisibility]) -> AccessResult<ViewportUpdate> {
        self.core
            .require(&[SessionPhase::ResumeDecision, SessionPhase::Active])?;
        let page_count = self.page_count();
        let visible: Vec<&PageVisibility> = entries
            .iter()
            .filter(|e| e.intersecting && e.ratio > 0.0 && (1..=page_count).contains(&e.page))
            .collect();

        let mut decoded = Vec::new();
        if let (Some(first), Some(last)) = (
            visible.iter().map(|e| e.page).min(),
            visible.iter().map(|e| e.page).max(),
        ) {
            let from = first.saturating_sub(1).max(1);
            let to = last.saturating_add(1).min(page_count);
            for page in from..=to {
                if self.decode(page) {
                    decoded.push(page);
                }
            }
        }

        // ties go to the earlier page
        let most_visible = visible
            .iter()
            .copied()
            .reduce(|best, e| {
                if e.ratio > best.ratio || (e.ratio == best.ratio && e.page < best.page) {
                    e
                } else {
                    best
                }
            })
            .map(|e| e.page);

        if let Some(page) = most_visible {
            if self.core.phase() == SessionPhase::Active && self.current_page != Some(page) {
                self.current_page = Some(page);
                if self.core.track(f64::from(page)) == Tracked::Advanced {
                    self.core.schedule_save();
                }
            }
        }

        Ok(ViewportUpdate {
            current_page: self.current_page,
            indicator: self.indicator(),
            decoded,
        })
    }

    /// Decode a page at most once. A page that fails stays undecoded so a later
    /// observation can try again.
    fn decode(&mut self, page: u32) -> bool {
        if self.decoded.contains(&page) {
            return false;
        }
        let Some(document) = self.document.as_ref() else {
            return false;
        };
        match document.decode_page(page) {
            Ok(raster) => {
                self.core.surface().store(page, raster);
                self.decoded.insert(page);
                true
            }
            Err(e) => {
                tracing::warn!(page, error = %format!("{:#}", e), "page decode failed");
                false
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self.core.snapshot();
        if snapshot.phase == SessionPhase::Active {
            snapshot.indicator = self.indicator();
        }
        snapshot
    }

    pub async fn close(&mut self) -> bool {
        let closed = self.core.close().await;
        self.document = None;
        self.decoded.clear();
        closed
    }
}
