use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::domain::models::{ContentId, ContentKind, ProgressRecord};

/// Header some media servers use to announce a stream's duration in seconds.
pub const CONTENT_DURATION_HEADER: &str = "X-Content-Duration";

#[derive(Clone, Debug)]
pub struct StorefrontClient {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl StorefrontClient {
    /// Create a new client with the given base URL (e.g. "https://shop.example.com").
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let base_url_str = base_url.into();
        tracing::debug!(base_url = %base_url_str, "creating StorefrontClient");
        Ok(StorefrontClient {
            base_url: base_url_str.trim_end_matches('/').to_string(),
            auth_token: None,
            client,
        })
    }

    /// Return a client with the user's bearer token set. Blank tokens count as signed out.
    pub fn with_auth_token(mut self, token: Option<impl Into<String>>) -> Self {
        let token: Option<String> = token.map(Into::into);
        self.auth_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.auth_token.is_some()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> anyhow::Result<reqwest::RequestBuilder> {
        let token = self
            .auth_token
            .as_ref()
            .ok_or(MissingCredentials)
            .context("storefront request needs a signed-in user")?;
        Ok(req.bearer_auth(token))
    }

    /// GET /api/content/{ebook|audio}/{id}
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_content(
        &self,
        kind: ContentKind,
        content_id: &ContentId,
    ) -> anyhow::Result<ContentPayload> {
        let url = self.url(&format!(
            "/api/content/{}/{}",
            kind.path_segment(),
            content_id
        ));
        tracing::debug!(%url, "GET content");
        let resp = self.authorized(self.client.get(&url))?.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ContentRejected(status).into());
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let duration_secs = resp
            .headers()
            .get(CONTENT_DURATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0);
        let body = resp.bytes().await?;
        Ok(ContentPayload {
            body,
            content_type,
            duration_secs,
        })
    }

    /// GET /api/progress/{id}
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_progress(&self, content_id: &ContentId) -> anyhow::Result<ProgressEnvelope> {
        let url = self.url(&format!("/api/progress/{}", content_id));
        tracing::debug!(%url, "GET progress");
        let resp = self.authorized(self.client.get(&url))?.send().await?;
        let status = resp.error_for_status()?;
        let body = status.text().await?;
        let parsed: ProgressEnvelope = serde_json::from_str(&body)
            .with_context(|| format!("malformed progress response for {}", content_id))?;
        Ok(parsed)
    }

    /// POST /api/progress/{id}
    #[tracing::instrument(level = "debug", skip(self, body))]
    pub async fn post_progress(
        &self,
        content_id: &ContentId,
        body: &ProgressPayload,
    ) -> anyhow::Result<()> {
        let url = self.url(&format!("/api/progress/{}", content_id));
        tracing::debug!(%url, kind = %body.kind, progress = body.progress, "POST progress");
        let resp = self
            .authorized(self.client.post(&url))?
            .json(body)
            .send()
            .await?;
        resp.error_for_status()?;
        Ok(())
    }

    /// GET /api/library/my-library
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_library(&self) -> anyhow::Result<Vec<LibraryEntry>> {
        let url = self.url("/api/library/my-library");
        tracing::debug!(%url, "GET library");
        let resp = self.authorized(self.client.get(&url))?.send().await?;
        let status = resp.error_for_status()?;
        let body = status.text().await?;
        match serde_json::from_str::<Vec<LibraryEntry>>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                let snippet_len = body.len().min(2000);
                let snippet = body.get(..snippet_len).unwrap_or_default();
                tracing::error!(error = %e, body_snippet = %snippet, "failed to parse library response");
                Err(e.into())
            }
        }
    }
}

/// No bearer token is configured.
#[derive(Debug, thiserror::Error)]
#[error("no storefront credentials available")]
pub struct MissingCredentials;

/// The content endpoint answered with a non-success status.
#[derive(Debug, thiserror::Error)]
#[error("content request rejected with status {0}")]
pub struct ContentRejected(pub StatusCode);

impl ContentRejected {
    pub fn user_message(&self) -> &'static str {
        match self.0 {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                "This title is not available for your account. Please make sure you are logged in."
            }
            StatusCode::NOT_FOUND => "This title could not be found.",
            _ => "The content service is unavailable. Please try again later.",
        }
    }
}

/// Raw protected content plus whatever stream metadata came with it.
#[derive(Debug, Clone)]
pub struct ContentPayload {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct ProgressEnvelope {
    pub found: bool,
    pub data: Option<RemoteProgress>,
}

#[derive(Debug, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProgress {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "de::opt_f64_from_str_or_num")]
    pub last_page: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_f64_from_str_or_num")]
    pub total_pages: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_f64_from_str_or_num")]
    pub current_time: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_f64_from_str_or_num")]
    pub total_duration: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_f64_from_str_or_num")]
    pub progress: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressEnvelope {
    /// Interpret the envelope for a given content kind. `found: false` or an empty
    /// payload mean "never started".
    pub fn into_record(self, content_id: &ContentId, kind: ContentKind) -> Option<ProgressRecord> {
        if !self.found {
            return None;
        }
        let data = self.data?;
        let (position, total) = match kind {
            ContentKind::Ebook => (data.last_page?, data.total_pages.unwrap_or(0.0)),
            ContentKind::Audiobook => (data.current_time?, data.total_duration.unwrap_or(0.0)),
        };
        let record = ProgressRecord::new(content_id.clone(), kind, position, total);
        Some(match data.updated_at {
            Some(at) => record.at(at),
            None => record,
        })
    }
}

/// Body of POST /api/progress/{id}. Field names follow the storefront backend.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_page: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<f64>,
    pub progress: f64,
}

impl From<&ProgressRecord> for ProgressPayload {
    fn from(record: &ProgressRecord) -> Self {
        let (last_page, total_pages, current_time, total_duration) = match record.kind {
            ContentKind::Ebook => (Some(record.position), Some(record.total), None, None),
            ContentKind::Audiobook => (None, None, Some(record.position), Some(record.total)),
        };
        ProgressPayload {
            kind: record.kind.wire_name().to_string(),
            last_page,
            total_pages,
            current_time,
            total_duration,
            progress: record.percent_complete,
        }
    }
}

/// One purchased item as returned by the library endpoint. Older records carry
/// `_id`/`id`/`name` instead of `productId`/`title`.
#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub product_id: Option<String>,
    #[serde(rename = "_id")]
    pub mongo_id: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub thumbnail: Option<String>,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub purchased_at: Option<DateTime<Utc>>,
}

/// Internal serde helpers
pub mod de {
    use serde::{Deserialize, Deserializer};

    /// Accept Option<f64> from either a number or a numeric string; null/"" -> None.
    pub fn opt_f64_from_str_or_num<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumOrStr {
            Num(f64),
            Str(String),
        }

        let val: Option<NumOrStr> = Option::deserialize(deserializer)?;
        Ok(match val {
            None => None,
            Some(NumOrStr::Num(n)) => Some(n),
            Some(NumOrStr::Str(s)) => s.trim().parse::<f64>().ok(),
        })
    }
}
