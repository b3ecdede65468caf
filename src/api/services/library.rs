use futures::future::join_all;
use poem_openapi::payload::Json;

use crate::{
    api::models::{ContinueDto, ContinueResponse, ErrorDto, LibraryCardDto, LibraryResponse},
    domain::{
        library::{LibraryCard, build_library, continue_shortcuts},
        models::LibraryItem,
    },
    progress::ProgressStore,
    storefront_client::{MissingCredentials, StorefrontClient},
};

enum LibraryError {
    SignedOut,
    Upstream(String),
}

impl LibraryError {
    fn body(&self) -> Json<ErrorDto> {
        let message = match self {
            LibraryError::SignedOut => "please sign in to see your library".to_string(),
            LibraryError::Upstream(e) => format!("storefront error: {}", e),
        };
        Json(ErrorDto { message })
    }
}

/// Saved progress for every item, fetched concurrently; cards keep the library order.
async fn with_progress(store: &ProgressStore, items: Vec<LibraryItem>) -> Vec<LibraryCard> {
    let progress = join_all(items.iter().map(|item| store.fetch(&item.content_id, item.kind))).await;
    items
        .into_iter()
        .zip(progress)
        .map(|(item, progress)| LibraryCard { item, progress })
        .collect()
}

pub struct LibraryService<'a> {
    pub client: &'a StorefrontClient,
    pub store: &'a ProgressStore,
}

impl<'a> LibraryService<'a> {
    pub fn new(client: &'a StorefrontClient, store: &'a ProgressStore) -> Self {
        Self { client, store }
    }

    /// Purchased items, deduplicated, each with its saved progress.
    async fn cards(&self) -> Result<Vec<LibraryCard>, LibraryError> {
        let entries = self.client.get_library().await.map_err(|e| {
            if e.downcast_ref::<MissingCredentials>().is_some() {
                LibraryError::SignedOut
            } else {
                tracing::error!(error = %format!("{:?}", e), "failed to load library");
                LibraryError::Upstream(e.to_string())
            }
        })?;
        let items = build_library(&entries);
        tracing::debug!(entries = entries.len(), items = items.len(), "library loaded");

        Ok(with_progress(self.store, items).await)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list(&self) -> LibraryResponse {
        match self.cards().await {
            Ok(cards) => LibraryResponse::Ok(Json(cards.iter().map(LibraryCardDto::from).collect())),
            Err(e @ LibraryError::SignedOut) => LibraryResponse::Unauthorized(e.body()),
            Err(e) => LibraryResponse::BadGateway(e.body()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn continue_shortcuts(&self) -> ContinueResponse {
        match self.cards().await {
            Ok(cards) => ContinueResponse::Ok(Json(ContinueDto::from(&continue_shortcuts(&cards)))),
            Err(e @ LibraryError::SignedOut) => ContinueResponse::Unauthorized(e.body()),
            Err(e) => ContinueResponse::BadGateway(e.body()),
        }
    }
}
