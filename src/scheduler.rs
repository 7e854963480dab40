use crate::applier::{ApplyOutcome, CompletionApplier};
use crate::error::{Result, TranslationError};
use crate::item::ItemId;
use crate::metrics::SyncMetrics;
use crate::provider::{ProviderStatus, TranslationProvider};
use crate::retry::{with_retry, RetryConfig};
use crate::tracker::{RequestStatus, RequestStore, TranslationRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Backoff policy for status polling
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Total status checks issued before giving up
    pub max_attempts: u32,
    /// Wait before each check
    pub interval: Duration,
    /// 1.0 keeps the interval fixed
    pub backoff_multiplier: f64,
    pub max_interval: Duration,
}

impl PollPolicy {
    /// Fixed interval between checks
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff_multiplier: 1.0,
            max_interval: interval,
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_interval = max_interval;
        self
    }

    /// Wait before check number `attempt` (0-indexed)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.interval.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_interval.max(self.interval))
    }
}

impl Default for PollPolicy {
    /// 3 checks, one minute apart
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(60))
    }
}

/// One poll chain to run
#[derive(Debug, Clone)]
pub struct PollJob {
    pub request_id: String,
    pub item_id: ItemId,
    /// Attempt to start from (non-zero when resuming after a restart)
    pub attempt: u32,
    pub max_attempts: u32,
}

impl PollJob {
    /// Continue polling a tracked request from where it left off
    pub fn resume(request: &TranslationRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            item_id: request.item_id,
            attempt: request.attempt_count,
            max_attempts: request.max_attempts,
        }
    }
}

/// How a poll chain ended
#[derive(Debug)]
pub enum PollOutcome {
    /// The provider finished and the result went through the applier
    Applied(ApplyOutcome),
    /// The request reached this terminal state elsewhere (usually a callback)
    AlreadyTerminal(RequestStatus),
    /// The chain stopped for good; the request is marked failed
    Failed(TranslationError),
}

/// Receives the terminal outcome of every poll chain.
pub trait OutcomeReporter: Send + Sync {
    fn report(&self, job: &PollJob, outcome: &PollOutcome);
}

/// Reports outcomes through the log
pub struct LogReporter;

impl OutcomeReporter for LogReporter {
    fn report(&self, job: &PollJob, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Applied(_) => {
                info!(
                    "✓ Polling finished translation {} for post {}",
                    job.request_id, job.item_id
                );
            }
            PollOutcome::AlreadyTerminal(status) => {
                debug!(
                    "Polling for translation {} stopped, request already {}",
                    job.request_id, status
                );
            }
            PollOutcome::Failed(e) => {
                error!(
                    "Translation {} for post {} failed: {}",
                    job.request_id, job.item_id, e
                );
            }
        }
    }
}

/// Outcome of a single status check
enum Check {
    Done(PollOutcome),
    NotYet,
}

pub struct PollScheduler {
    provider: Arc<dyn TranslationProvider>,
    requests: Arc<dyn RequestStore>,
    applier: Arc<CompletionApplier>,
    policy: PollPolicy,
    /// Bounds concurrent status checks across all chains
    permits: Semaphore,
    reporter: Arc<dyn OutcomeReporter>,
    metrics: Arc<SyncMetrics>,
}

impl PollScheduler {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        requests: Arc<dyn RequestStore>,
        applier: Arc<CompletionApplier>,
        policy: PollPolicy,
        concurrency: usize,
        reporter: Arc<dyn OutcomeReporter>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            provider,
            requests,
            applier,
            policy,
            permits: Semaphore::new(concurrency.max(1)),
            reporter,
            metrics,
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Start a poll chain in the background. The outcome goes to the reporter.
    pub fn schedule(self: &Arc<Self>, job: PollJob) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = scheduler.run(&job).await;
            scheduler.reporter.report(&job, &outcome);
        })
    }

    /// Run a poll chain to its end.
    ///
    /// Issues at most `job.max_attempts` status checks in total, waiting
    /// the policy delay before each one.
    pub async fn run(&self, job: &PollJob) -> PollOutcome {
        let mut attempt = job.attempt;

        loop {
            if attempt >= job.max_attempts {
                let e = TranslationError::MaxAttemptsExceeded {
                    request_id: job.request_id.clone(),
                    attempts: attempt,
                };
                self.fail_request(job, &e).await;
                return PollOutcome::Failed(e);
            }

            sleep(self.policy.delay_before(attempt)).await;

            match self.check(job, attempt).await {
                Ok(Check::Done(outcome)) => return outcome,
                Ok(Check::NotYet) => attempt += 1,
                Err(e) => {
                    self.fail_request(job, &e).await;
                    return PollOutcome::Failed(e);
                }
            }
        }
    }

    async fn check(&self, job: &PollJob, attempt: u32) -> Result<Check> {
        let status = self.requests.start_attempt(&job.request_id, attempt).await?;
        if status.is_terminal() {
            return Ok(Check::Done(PollOutcome::AlreadyTerminal(status)));
        }

        let _permit = self.permits.acquire().await.ok();
        self.metrics.record_status_check();
        debug!(
            "Checking translation {} (attempt {}/{})",
            job.request_id,
            attempt + 1,
            job.max_attempts
        );

        match self.provider.get_status(&job.request_id).await {
            Ok(ProviderStatus::Completed) => {}
            Ok(ProviderStatus::Pending) => return Ok(Check::NotYet),
            Ok(ProviderStatus::Unknown(status)) => {
                warn!(
                    "Translation {} has unrecognised status '{}', treating as pending",
                    job.request_id, status
                );
                return Ok(Check::NotYet);
            }
            Ok(ProviderStatus::Failed) => {
                return Err(TranslationError::ProviderJobFailed(job.request_id.clone()))
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    "Status check for translation {} failed ({}), will retry",
                    job.request_id, e
                );
                self.metrics.record_provider_failure();
                return Ok(Check::NotYet);
            }
            Err(e) => {
                self.metrics.record_provider_failure();
                return Err(e);
            }
        }

        let operation = format!("Fetch translation {}", job.request_id);
        let result = match with_retry(&RetryConfig::provider_read(), &operation, || {
            self.provider.get_result(&job.request_id)
        })
        .await
        {
            Ok(result) => result,
            Err(e) if e.is_retryable() => {
                self.metrics.record_provider_failure();
                return Ok(Check::NotYet);
            }
            Err(e) => {
                self.metrics.record_provider_failure();
                return Err(e);
            }
        };

        let outcome = self
            .applier
            .apply(&job.request_id, job.item_id, &result)
            .await?;
        Ok(Check::Done(PollOutcome::Applied(outcome)))
    }

    async fn fail_request(&self, job: &PollJob, e: &TranslationError) {
        match self.requests.mark_failed(&job.request_id, &e.to_string()).await {
            Ok(true) => self.metrics.record_failed_request(),
            Ok(false) => {}
            Err(store_err) => warn!(
                "Could not mark translation {} as failed: {}",
                job.request_id, store_err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{InMemoryItemStore, Item, ItemStore, TranslationFields};
    use crate::locale::{Locale, LocaleSet};
    use crate::provider::{SourceContent, TranslationResult};
    use crate::tracker::InMemoryRequestStore;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    /// Provider fake that answers status checks from a script
    struct ScriptedProvider {
        statuses: Mutex<VecDeque<Result<ProviderStatus>>>,
        status_calls: Mutex<u32>,
        result: TranslationResult,
    }

    impl ScriptedProvider {
        fn new(statuses: Vec<Result<ProviderStatus>>) -> Self {
            let entries: BTreeMap<String, TranslationFields> = [
                ("source", "Hello", "World"),
                ("fr", "Bonjour", "Monde"),
                ("de", "Hallo", "Welt"),
            ]
            .into_iter()
            .map(|(k, t, d)| {
                (
                    k.to_string(),
                    TranslationFields {
                        title: t.to_string(),
                        description: d.to_string(),
                    },
                )
            })
            .collect();
            Self {
                statuses: Mutex::new(statuses.into()),
                status_calls: Mutex::new(0),
                result: TranslationResult::new(entries),
            }
        }

        fn status_calls(&self) -> u32 {
            *self.status_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TranslationProvider for ScriptedProvider {
        async fn submit(
            &self,
            _content: &SourceContent,
            _name: &str,
            _target_locales: &[Locale],
            _callback_url: Option<&str>,
        ) -> Result<String> {
            Ok("abc123".to_string())
        }

        async fn get_status(&self, _request_id: &str) -> Result<ProviderStatus> {
            *self.status_calls.lock().unwrap() += 1;
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ProviderStatus::Pending))
        }

        async fn get_result(&self, _request_id: &str) -> Result<TranslationResult> {
            Ok(self.result.clone())
        }
    }

    struct Fixture {
        provider: Arc<ScriptedProvider>,
        items: InMemoryItemStore,
        requests: InMemoryRequestStore,
        scheduler: Arc<PollScheduler>,
    }

    async fn fixture(statuses: Vec<Result<ProviderStatus>>) -> Fixture {
        let provider = Arc::new(ScriptedProvider::new(statuses));
        let items = InMemoryItemStore::new();
        items.insert(Item::new(1, "Hello", "World"));
        let requests = InMemoryRequestStore::new();
        requests
            .insert(&TranslationRequest::new(
                "abc123",
                1,
                SourceContent {
                    title: "Hello".to_string(),
                    description: "World".to_string(),
                },
                vec![Locale::parse("fr").unwrap(), Locale::parse("de").unwrap()],
                3,
            ))
            .await
            .unwrap();

        let metrics = Arc::new(SyncMetrics::new());
        let applier = Arc::new(CompletionApplier::new(
            Arc::new(items.clone()),
            Arc::new(requests.clone()),
            LocaleSet::default(),
            LocaleSet::default().translatable(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(PollScheduler::new(
            provider.clone(),
            Arc::new(requests.clone()),
            applier,
            PollPolicy::fixed(3, Duration::from_millis(5)),
            2,
            Arc::new(LogReporter),
            metrics,
        ));
        Fixture {
            provider,
            items,
            requests,
            scheduler,
        }
    }

    fn job() -> PollJob {
        PollJob {
            request_id: "abc123".to_string(),
            item_id: 1,
            attempt: 0,
            max_attempts: 3,
        }
    }

    // ==================== Policy Tests ====================

    #[test]
    fn test_default_policy() {
        let policy = PollPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_before(0), Duration::from_secs(60));
        assert_eq!(policy.delay_before(2), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_policy_is_capped() {
        let policy = PollPolicy::fixed(5, Duration::from_secs(10))
            .with_backoff(2.0, Duration::from_secs(30));
        assert_eq!(policy.delay_before(0), Duration::from_secs(10));
        assert_eq!(policy.delay_before(1), Duration::from_secs(20));
        assert_eq!(policy.delay_before(2), Duration::from_secs(30));
        assert_eq!(policy.delay_before(4), Duration::from_secs(30));
    }

    // ==================== Poll Chain Tests ====================

    #[tokio::test]
    async fn test_pending_then_completed_applies() {
        let f = fixture(vec![Ok(ProviderStatus::Pending), Ok(ProviderStatus::Completed)]).await;

        let outcome = f.scheduler.run(&job()).await;
        assert!(matches!(outcome, PollOutcome::Applied(ApplyOutcome::Applied { .. })));
        assert_eq!(f.provider.status_calls(), 2);

        let item = f.items.find(1).await.unwrap();
        assert_eq!(
            item.translation(&Locale::parse("fr").unwrap()).unwrap().title,
            "Bonjour"
        );
        assert_eq!(
            item.translation(&Locale::parse("de").unwrap()).unwrap().title,
            "Hallo"
        );

        let request = f.requests.get("abc123").await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_fails_with_max_attempts() {
        let f = fixture(vec![]).await;

        let outcome = f.scheduler.run(&job()).await;
        match outcome {
            PollOutcome::Failed(TranslationError::MaxAttemptsExceeded { attempts, .. }) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(f.provider.status_calls(), 3);

        let request = f.requests.get("abc123").await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
        assert_eq!(request.attempt_count, 3);
        assert!(f.items.find(1).await.unwrap().translations().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_consumes_an_attempt() {
        let f = fixture(vec![
            Err(TranslationError::ProviderUnavailable("timeout".to_string())),
            Ok(ProviderStatus::Completed),
        ])
        .await;

        let outcome = f.scheduler.run(&job()).await;
        assert!(matches!(outcome, PollOutcome::Applied(_)));
        assert_eq!(f.provider.status_calls(), 2);
    }

    #[tokio::test]
    async fn test_rejection_stops_immediately() {
        let f = fixture(vec![Err(TranslationError::ProviderRejected {
            status: 401,
            body: "bad token".to_string(),
        })])
        .await;

        let outcome = f.scheduler.run(&job()).await;
        assert!(matches!(
            outcome,
            PollOutcome::Failed(TranslationError::ProviderRejected { status: 401, .. })
        ));
        assert_eq!(f.provider.status_calls(), 1);
        let request = f.requests.get("abc123").await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
    }

    #[tokio::test]
    async fn test_provider_failed_status_is_terminal() {
        let f = fixture(vec![Ok(ProviderStatus::Failed)]).await;

        let outcome = f.scheduler.run(&job()).await;
        assert!(matches!(
            outcome,
            PollOutcome::Failed(TranslationError::ProviderJobFailed(_))
        ));
        assert_eq!(f.provider.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_status_counts_as_pending() {
        let f = fixture(vec![
            Ok(ProviderStatus::Unknown("in_progress".to_string())),
            Ok(ProviderStatus::Completed),
        ])
        .await;

        let outcome = f.scheduler.run(&job()).await;
        assert!(matches!(outcome, PollOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn test_completed_request_short_circuits() {
        let f = fixture(vec![Ok(ProviderStatus::Completed)]).await;
        f.requests.try_complete("abc123").await.unwrap();

        let outcome = f.scheduler.run(&job()).await;
        assert!(matches!(
            outcome,
            PollOutcome::AlreadyTerminal(RequestStatus::Completed)
        ));
        assert_eq!(f.provider.status_calls(), 0);
        assert_eq!(f.items.save_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_continues_attempt_count() {
        let f = fixture(vec![]).await;
        let resumed = PollJob {
            attempt: 2,
            ..job()
        };

        let outcome = f.scheduler.run(&resumed).await;
        assert!(matches!(
            outcome,
            PollOutcome::Failed(TranslationError::MaxAttemptsExceeded { attempts: 3, .. })
        ));
        assert_eq!(f.provider.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_schedule_reports_outcome() {
        struct Collecting(Mutex<Vec<String>>);
        impl OutcomeReporter for Collecting {
            fn report(&self, job: &PollJob, outcome: &PollOutcome) {
                let label = match outcome {
                    PollOutcome::Applied(_) => "applied",
                    PollOutcome::AlreadyTerminal(_) => "terminal",
                    PollOutcome::Failed(_) => "failed",
                };
                self.0
                    .lock()
                    .unwrap()
                    .push(format!("{}:{}", job.request_id, label));
            }
        }

        let f = fixture(vec![]).await;
        let reporter = Arc::new(Collecting(Mutex::new(Vec::new())));
        let scheduler = Arc::new(PollScheduler::new(
            f.provider.clone(),
            Arc::new(f.requests.clone()),
            f.scheduler.applier.clone(),
            PollPolicy::fixed(3, Duration::from_millis(1)),
            1,
            reporter.clone(),
            Arc::new(SyncMetrics::new()),
        ));

        scheduler.schedule(job()).await.unwrap();
        assert_eq!(*reporter.0.lock().unwrap(), vec!["abc123:failed".to_string()]);
    }
}
