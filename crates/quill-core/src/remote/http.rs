//! REST implementation of the remote entry store.

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;

use super::{RemoteEntryStore, RemoteError, RemoteResult};
use crate::error::{Error, Result};
use crate::models::{EntryId, JournalEntry};
use crate::auth::non_blank;

/// Client for the `/v1/entries` REST API
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: Url,
    access_token: Option<String>,
    client: Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url.as_str())
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

/// Entries stay raw so one unreadable entry cannot sink the whole page
#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Result<Self> {
        let raw: String = base_url.into();
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("API base URL must not be empty".into()));
        }
        let base_url = Url::parse(trimmed)
            .map_err(|error| Error::InvalidInput(format!("invalid API base URL: {error}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(
                "API base URL must include http:// or https://".into(),
            ));
        }
        let client = Client::builder()
            .build()
            .map_err(|error| Error::InvalidInput(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            access_token: non_blank(access_token),
            client,
        })
    }

    /// Replace the bearer token after the session changes
    #[must_use]
    pub fn with_access_token(mut self, access_token: Option<String>) -> Self {
        self.access_token = non_blank(access_token);
        self
    }

    fn entries_url(&self, id: Option<&EntryId>) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| RemoteError::transient("API base URL cannot carry a path"))?;
            segments.pop_if_empty().extend(["v1", "entries"]);
            if let Some(id) = id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|error| RemoteError::transient(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

/// Map a non-success HTTP status onto the three remote error kinds
pub(crate) fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::NOT_FOUND | StatusCode::GONE => RemoteError::NotFound,
        _ => {
            if status.is_client_error()
                && !matches!(
                    status,
                    StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
                )
            {
                tracing::warn!(
                    "Unexpected client error from entries API treated as transient: {}",
                    status
                );
            }
            RemoteError::Transient(parse_api_error(status, body))
        }
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|payload| payload.message.or(payload.error))
        .unwrap_or_else(|| body.to_owned());
    let message = snippet(&message);
    if message.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{message} ({})", status.as_u16())
    }
}

/// Error bodies are cut short before they reach logs and events
fn snippet(text: &str) -> String {
    const MAX_CHARS: usize = 180;
    text.trim().chars().take(MAX_CHARS).collect()
}

/// Decode each listed entry on its own, skipping the unreadable ones
fn decode_entries(values: Vec<serde_json::Value>) -> Vec<JournalEntry> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<JournalEntry>(value) {
            Ok(entry) => Some(entry),
            Err(error) => {
                tracing::warn!("Skipping unreadable remote entry: {}", error);
                None
            }
        })
        .collect()
}

impl RemoteEntryStore for HttpRemoteStore {
    async fn create(&self, entry: &JournalEntry) -> RemoteResult<EntryId> {
        let url = self.entries_url(None)?;
        let response = self.send(self.client.post(url).json(entry)).await?;
        let created = response
            .json::<CreatedResponse>()
            .await
            .map_err(|error| RemoteError::transient(format!("invalid create response: {error}")))?;
        EntryId::permanent(created.id)
            .map_err(|error| RemoteError::transient(format!("invalid id in create response: {error}")))
    }

    async fn update(&self, id: &EntryId, entry: &JournalEntry) -> RemoteResult<()> {
        let url = self.entries_url(Some(id))?;
        self.send(self.client.put(url).json(entry)).await?;
        Ok(())
    }

    async fn delete(&self, id: &EntryId) -> RemoteResult<()> {
        let url = self.entries_url(Some(id))?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn list_since(
        &self,
        owner_id: &str,
        cursor: Option<i64>,
    ) -> RemoteResult<Vec<JournalEntry>> {
        let url = self.entries_url(None)?;
        let mut request = self.client.get(url).query(&[("owner_id", owner_id)]);
        if let Some(cursor) = cursor {
            request = request.query(&[("since", cursor)]);
        }
        let response = self.send(request).await?;
        let list = response
            .json::<ListResponse>()
            .await
            .map_err(|error| RemoteError::transient(format!("invalid list response: {error}")))?;
        Ok(decode_entries(list.entries))
    }
}
