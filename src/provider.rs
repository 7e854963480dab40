//! Client for the content translation provider.
//!
//! Wraps the three provider operations the workflow needs: submitting a
//! translation job, checking its status and fetching its result. The
//! client knows nothing about retries or request state.

use crate::error::{Result, TranslationError};
use crate::item::TranslationFields;
use crate::locale::{Locale, SOURCE_KEY};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Text sent for translation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContent {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    data: &'a SourceContent,
    name: &'a str,
    target_languages: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: ProviderStatus,
}

/// Job status as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Pending,
    Completed,
    Failed,
    /// Anything else the provider may report (queued, in_progress, ...)
    Unknown(String),
}

impl ProviderStatus {
    fn from_wire(status: &str) -> Self {
        match status {
            "pending" => ProviderStatus::Pending,
            "completed" => ProviderStatus::Completed,
            "failed" => ProviderStatus::Failed,
            other => ProviderStatus::Unknown(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ProviderStatus {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(ProviderStatus::from_wire(&raw))
    }
}

/// Raw result payload: one entry per locale plus the echoed `source` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct TranslationResult {
    entries: BTreeMap<String, TranslationFields>,
}

impl TranslationResult {
    pub fn new(entries: BTreeMap<String, TranslationFields>) -> Self {
        Self { entries }
    }

    /// The echoed source text, if the provider included it
    pub fn source(&self) -> Option<&TranslationFields> {
        self.entries.get(SOURCE_KEY)
    }

    /// Per-locale translations with the `source` entry removed.
    ///
    /// Keys that are not valid locale codes are skipped.
    pub fn translations(&self) -> BTreeMap<Locale, TranslationFields> {
        self.entries
            .iter()
            .filter(|(key, _)| key.as_str() != SOURCE_KEY)
            .filter_map(|(key, fields)| match Locale::parse(key) {
                Ok(locale) => Some((locale, fields.clone())),
                Err(_) => {
                    warn!("Ignoring result entry with invalid locale key '{}'", key);
                    None
                }
            })
            .collect()
    }
}

/// Operations offered by the translation provider.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Submit a translation job, returning the provider-assigned request id.
    /// Without a `callback_url` the job can only be followed by polling.
    async fn submit(
        &self,
        content: &SourceContent,
        name: &str,
        target_locales: &[Locale],
        callback_url: Option<&str>,
    ) -> Result<String>;

    async fn get_status(&self, request_id: &str) -> Result<ProviderStatus>;

    async fn get_result(&self, request_id: &str) -> Result<TranslationResult>;
}

/// HTTP client for the PTC content translation API
#[derive(Clone)]
pub struct PtcClient {
    client: reqwest::Client,
    jobs_url: reqwest::Url,
    token: String,
}

impl PtcClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TranslationError::ProviderUnavailable(format!("failed to build HTTP client: {}", e))
            })?;

        let jobs_url = format!(
            "{}/api/v1/content_translation",
            base_url.trim_end_matches('/')
        );
        let jobs_url = reqwest::Url::parse(&jobs_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                TranslationError::ProviderUnavailable(format!(
                    "invalid provider URL: {}",
                    base_url
                ))
            })?;

        Ok(Self {
            client,
            jobs_url,
            token: token.to_string(),
        })
    }

    /// URL of one job, with the id percent-encoded as a single path segment
    fn job_url(&self, request_id: &str, action: Option<&str>) -> Result<reqwest::Url> {
        // Dot segments are dropped when pushed and would address the parent
        if request_id.is_empty() || request_id == "." || request_id == ".." {
            return Err(TranslationError::RequestNotFound(request_id.to_string()));
        }

        let mut url = self.jobs_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                TranslationError::ProviderUnavailable(format!(
                    "provider URL {} cannot take a path",
                    self.jobs_url
                ))
            })?
            .push(request_id)
            .extend(action);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
        // Keep the structured error body when there is one
        let body = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => json.to_string(),
            Err(_) => body,
        };
        Err(TranslationError::ProviderRejected { status, body })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: reqwest::Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let response = Self::check(response).await?;
        response.json::<T>().await.map_err(body_error)
    }
}

/// A body that arrived but does not parse is the provider's fault; a body
/// that never arrived is a transport failure.
fn body_error(e: reqwest::Error) -> TranslationError {
    if e.is_decode() {
        TranslationError::ProviderRejected {
            status: 200,
            body: format!("unparseable response: {}", e),
        }
    } else {
        TranslationError::ProviderUnavailable(e.to_string())
    }
}

#[async_trait]
impl TranslationProvider for PtcClient {
    async fn submit(
        &self,
        content: &SourceContent,
        name: &str,
        target_locales: &[Locale],
        callback_url: Option<&str>,
    ) -> Result<String> {
        let request = SubmitRequest {
            data: content,
            name,
            target_languages: target_locales.iter().map(Locale::code).collect(),
            callback_url,
        };

        let response = self
            .client
            .post(self.jobs_url.clone())
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        let response = Self::check(response).await?;
        let submitted: SubmitResponse = response.json().await.map_err(body_error)?;

        // The provider may hand back numeric or string ids
        let request_id = match submitted.id {
            serde_json::Value::String(id) => id,
            serde_json::Value::Number(id) => id.to_string(),
            other => {
                return Err(TranslationError::ProviderRejected {
                    status: 200,
                    body: format!("submit response has unusable id: {}", other),
                })
            }
        };

        debug!("Provider accepted translation job {}", request_id);
        Ok(request_id)
    }

    async fn get_status(&self, request_id: &str) -> Result<ProviderStatus> {
        let url = self.job_url(request_id, Some("status"))?;
        let status: StatusResponse = self.get_json(url).await?;
        Ok(status.status)
    }

    async fn get_result(&self, request_id: &str) -> Result<TranslationResult> {
        let url = self.job_url(request_id, None)?;
        self.get_json(url).await
    }
}
