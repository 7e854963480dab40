//! Translation request tracking.
//!
//! A request moves `Submitted -> Polling -> Completed | Failed`. The
//! poll scheduler is the only writer of `attempt_count`; completion can
//! come from either the scheduler or the callback receiver and is guarded
//! so only the first of them performs the transition.

use crate::error::{Result, TranslationError};
use crate::item::ItemId;
use crate::locale::Locale;
use crate::provider::SourceContent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Submitted,
    Polling,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Submitted => "submitted",
            RequestStatus::Polling => "polling",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "submitted" => Ok(RequestStatus::Submitted),
            "polling" => Ok(RequestStatus::Polling),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(TranslationError::Persistence(format!(
                "unknown request status '{}'",
                other
            ))),
        }
    }
}

/// One submitted translation job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationRequest {
    pub request_id: String,
    pub item_id: ItemId,
    /// Title/description as they were when the job was submitted
    pub source_text: SourceContent,
    pub target_locales: Vec<Locale>,
    pub status: RequestStatus,
    /// Status checks issued so far
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TranslationRequest {
    pub fn new(
        request_id: impl Into<String>,
        item_id: ItemId,
        source_text: SourceContent,
        target_locales: Vec<Locale>,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: request_id.into(),
            item_id,
            source_text,
            target_locales,
            status: RequestStatus::Submitted,
            attempt_count: 0,
            max_attempts,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record that status check number `attempt` (0-indexed) is about to
    /// be issued. Moves `Submitted` to `Polling`.
    ///
    /// Returns `false`, changing nothing, once the request is terminal.
    pub fn start_attempt(&mut self, attempt: u32) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = RequestStatus::Polling;
        self.attempt_count = self.attempt_count.max(attempt + 1);
        self.updated_at = Utc::now();
        true
    }

    /// Transition to `Completed`. Returns `false` if it already was.
    ///
    /// A `Failed` request may still complete: a callback that arrives
    /// after polling gave up carries a valid result.
    pub fn complete(&mut self) -> bool {
        if self.status == RequestStatus::Completed {
            return false;
        }
        self.status = RequestStatus::Completed;
        self.failure_reason = None;
        self.updated_at = Utc::now();
        true
    }

    /// Transition to `Failed`. Returns `false` if the request is terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = RequestStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
        true
    }
}

/// Persistence for translation requests.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(&self, request: &TranslationRequest) -> Result<()>;

    async fn get(&self, request_id: &str) -> Result<Option<TranslationRequest>>;

    /// Atomically apply `TranslationRequest::start_attempt` and return the
    /// resulting status. A terminal status means the check must not run.
    async fn start_attempt(&self, request_id: &str, attempt: u32) -> Result<RequestStatus>;

    /// Compare-and-set to `Completed`. Only the first caller gets `true`.
    async fn try_complete(&self, request_id: &str) -> Result<bool>;

    /// Move a non-terminal request to `Failed`
    async fn mark_failed(&self, request_id: &str, reason: &str) -> Result<bool>;

    /// Requests still `Submitted` or `Polling`, oldest first
    async fn in_flight(&self) -> Result<Vec<TranslationRequest>>;
}

#[derive(Clone, Default)]
pub struct InMemoryRequestStore {
    requests: Arc<Mutex<HashMap<String, TranslationRequest>>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_request<T>(
        &self,
        request_id: &str,
        f: impl FnOnce(&mut TranslationRequest) -> T,
    ) -> Result<T> {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| TranslationError::RequestNotFound(request_id.to_string()))?;
        Ok(f(request))
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, request: &TranslationRequest) -> Result<()> {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests.insert(request.request_id.clone(), request.clone());
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<TranslationRequest>> {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        Ok(requests.get(request_id).cloned())
    }

    async fn start_attempt(&self, request_id: &str, attempt: u32) -> Result<RequestStatus> {
        self.with_request(request_id, |request| {
            request.start_attempt(attempt);
            request.status
        })
    }

    async fn try_complete(&self, request_id: &str) -> Result<bool> {
        self.with_request(request_id, TranslationRequest::complete)
    }

    async fn mark_failed(&self, request_id: &str, reason: &str) -> Result<bool> {
        self.with_request(request_id, |request| request.fail(reason))
    }

    async fn in_flight(&self) -> Result<Vec<TranslationRequest>> {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<TranslationRequest> = requests
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }
}
