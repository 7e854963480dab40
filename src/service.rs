//! Submission and completion entry points that tie the workflow together.

use crate::applier::{ApplyOutcome, CompletionApplier};
use crate::config::Config;
use crate::error::{Result, TranslationError};
use crate::item::{ItemId, ItemStore};
use crate::locale::{Locale, LocaleSet};
use crate::metrics::SyncMetrics;
use crate::provider::{SourceContent, TranslationProvider};
use crate::retry::{with_retry, RetryConfig};
use crate::scheduler::{OutcomeReporter, PollJob, PollPolicy, PollScheduler};
use crate::tracker::{RequestStore, TranslationRequest};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub locales: LocaleSet,
    pub target_locales: Vec<Locale>,
    /// `scheme://host` prefix for callback URLs; `None` submits without a
    /// callback so completion is only learned by polling
    pub callback_base_url: Option<String>,
    pub polling_enabled: bool,
    pub poll_policy: PollPolicy,
    pub poll_concurrency: usize,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            locales: config.locales.clone(),
            target_locales: config.target_locales.clone(),
            callback_base_url: config
                .callbacks_enabled
                .then(|| format!("{}://{}", config.protocol, config.host)),
            polling_enabled: config.polling_enabled,
            poll_policy: PollPolicy::fixed(config.poll_max_attempts, config.poll_interval),
            poll_concurrency: config.poll_concurrency,
        }
    }

    pub fn callback_url(&self, item_id: ItemId) -> Option<String> {
        self.callback_base_url
            .as_ref()
            .map(|base| format!("{}/api/posts/{}/callback", base.trim_end_matches('/'), item_id))
    }
}

pub struct TranslationService {
    settings: ServiceSettings,
    provider: Arc<dyn TranslationProvider>,
    items: Arc<dyn ItemStore>,
    requests: Arc<dyn RequestStore>,
    applier: Arc<CompletionApplier>,
    scheduler: Arc<PollScheduler>,
    metrics: Arc<SyncMetrics>,
}

impl TranslationService {
    pub fn new(
        settings: ServiceSettings,
        provider: Arc<dyn TranslationProvider>,
        items: Arc<dyn ItemStore>,
        requests: Arc<dyn RequestStore>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Self {
        let metrics = Arc::new(SyncMetrics::new());
        let applier = Arc::new(CompletionApplier::new(
            Arc::clone(&items),
            Arc::clone(&requests),
            settings.locales.clone(),
            settings.target_locales.clone(),
            Arc::clone(&metrics),
        ));
        let scheduler = Arc::new(PollScheduler::new(
            Arc::clone(&provider),
            Arc::clone(&requests),
            Arc::clone(&applier),
            settings.poll_policy.clone(),
            settings.poll_concurrency,
            reporter,
            Arc::clone(&metrics),
        ));

        Self {
            settings,
            provider,
            items,
            requests,
            applier,
            scheduler,
            metrics,
        }
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Send a post's current title and description for translation.
    ///
    /// The request is only recorded once the provider has accepted it;
    /// polling starts right away when enabled.
    pub async fn submit_item(&self, item_id: ItemId) -> Result<TranslationRequest> {
        let item = self.items.find(item_id).await?;
        let content = SourceContent {
            title: item.title.clone(),
            description: item.description.clone(),
        };
        let callback_url = self.settings.callback_url(item_id);

        let request_id = match self
            .provider
            .submit(
                &content,
                &item.title,
                &self.settings.target_locales,
                callback_url.as_deref(),
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!("Submitting post {} for translation failed: {}", item_id, e);
                self.metrics.record_submission_failure();
                return Err(e);
            }
        };
        self.metrics.record_submission();

        let request = TranslationRequest::new(
            request_id,
            item_id,
            content,
            self.settings.target_locales.clone(),
            self.settings.poll_policy.max_attempts,
        );
        self.requests.insert(&request).await?;

        info!(
            "Submitted post {} for translation as {} ({} locales, callback: {})",
            item_id,
            request.request_id,
            request.target_locales.len(),
            callback_url.is_some()
        );

        if self.settings.polling_enabled {
            self.scheduler.schedule(PollJob::resume(&request));
        }

        Ok(request)
    }

    /// Handle a provider notification that `request_id` finished.
    ///
    /// The notification itself is not trusted for content; the full result
    /// is fetched before applying.
    pub async fn handle_callback(&self, item_id: ItemId, request_id: &str) -> Result<ApplyOutcome> {
        self.metrics.record_callback();

        let operation = format!("Fetch translation {}", request_id);
        let result = with_retry(&RetryConfig::provider_read(), &operation, || {
            self.provider.get_result(request_id)
        })
        .await
        .inspect_err(|_| self.metrics.record_provider_failure())?;

        self.applier.apply(request_id, item_id, &result).await
    }

    pub async fn request(&self, request_id: &str) -> Result<TranslationRequest> {
        self.requests
            .get(request_id)
            .await?
            .ok_or_else(|| TranslationError::RequestNotFound(request_id.to_string()))
    }

    /// Restart poll chains for requests left in flight by a previous run.
    ///
    /// Returns how many chains were scheduled.
    pub async fn resume_in_flight(&self) -> Result<usize> {
        if !self.settings.polling_enabled {
            return Ok(0);
        }

        let pending = self.requests.in_flight().await?;
        for request in &pending {
            info!(
                "Resuming polling for translation {} (post {}, {} checks done)",
                request.request_id, request.item_id, request.attempt_count
            );
            self.scheduler.schedule(PollJob::resume(request));
        }
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(callbacks: bool) -> ServiceSettings {
        ServiceSettings {
            locales: LocaleSet::default(),
            target_locales: LocaleSet::default().translatable(),
            callback_base_url: callbacks.then(|| "https://blog.example.com/".to_string()),
            polling_enabled: true,
            poll_policy: PollPolicy::default(),
            poll_concurrency: 4,
        }
    }

    #[test]
    fn test_callback_url_built_from_base() {
        assert_eq!(
            settings(true).callback_url(12).as_deref(),
            Some("https://blog.example.com/api/posts/12/callback")
        );
    }

    #[test]
    fn test_no_callback_url_in_polling_only_mode() {
        assert!(settings(false).callback_url(12).is_none());
    }
}
