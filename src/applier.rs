//! Writes a finished translation result onto its post.
//!
//! Both completion signals (callback and polling) end up here. Writes are
//! overwrites of the per-locale fields, so applying the same result twice
//! leaves the post exactly as applying it once.

use crate::error::{Result, TranslationError};
use crate::item::{ItemId, ItemStore};
use crate::locale::{Locale, LocaleSet};
use crate::metrics::SyncMetrics;
use crate::provider::TranslationResult;
use crate::tracker::{RequestStatus, RequestStore};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The result was written (or already matched what was stored)
    Applied {
        locales: Vec<Locale>,
        /// Whether any stored field actually changed
        changed: bool,
    },
    /// The request had already been completed; nothing was written
    AlreadyCompleted,
}

pub struct CompletionApplier {
    items: Arc<dyn ItemStore>,
    requests: Arc<dyn RequestStore>,
    locales: LocaleSet,
    /// Locales to accept for requests the tracker has no record of
    default_targets: Vec<Locale>,
    metrics: Arc<SyncMetrics>,
}

impl CompletionApplier {
    pub fn new(
        items: Arc<dyn ItemStore>,
        requests: Arc<dyn RequestStore>,
        locales: LocaleSet,
        default_targets: Vec<Locale>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            items,
            requests,
            locales,
            default_targets,
            metrics,
        }
    }

    /// Apply a provider result for `request_id` to post `item_id`.
    ///
    /// When the tracker knows the request, its recorded post and target
    /// locales win over the arguments. Fails with `ItemNotFound` if the
    /// post is gone; the request is then marked failed.
    pub async fn apply(
        &self,
        request_id: &str,
        item_id: ItemId,
        result: &TranslationResult,
    ) -> Result<ApplyOutcome> {
        let tracked = self.requests.get(request_id).await?;

        let (item_id, targets) = match &tracked {
            Some(request) if request.status == RequestStatus::Completed => {
                info!(
                    "Translation {} already applied to post {}, skipping",
                    request_id, request.item_id
                );
                self.metrics.record_duplicate_completion();
                return Ok(ApplyOutcome::AlreadyCompleted);
            }
            Some(request) => {
                if request.item_id != item_id {
                    warn!(
                        "Translation {} belongs to post {}, not post {}; using post {}",
                        request_id, request.item_id, item_id, request.item_id
                    );
                }
                (request.item_id, request.target_locales.clone())
            }
            None => {
                warn!(
                    "Translation {} is not tracked, applying to post {} with configured locales",
                    request_id, item_id
                );
                (item_id, self.default_targets.clone())
            }
        };

        let mut item = match self.items.find(item_id).await {
            Ok(item) => item,
            Err(TranslationError::ItemNotFound(id)) => {
                if tracked.is_some()
                    && self
                        .requests
                        .mark_failed(request_id, &format!("post {} no longer exists", id))
                        .await?
                {
                    self.metrics.record_failed_request();
                }
                return Err(TranslationError::ItemNotFound(id));
            }
            Err(e) => return Err(e),
        };

        let mut applied = Vec::new();
        let mut changed = false;
        for (locale, fields) in result.translations() {
            if !targets.contains(&locale) || !self.locales.accepts(&locale) {
                warn!(
                    "Translation {} returned unrequested locale '{}', skipping",
                    request_id, locale
                );
                continue;
            }
            changed |= item.set_translation(locale.clone(), fields.title, fields.description);
            applied.push(locale);
        }

        let missing: Vec<&Locale> = targets.iter().filter(|l| !applied.contains(l)).collect();
        if !missing.is_empty() {
            warn!(
                "Translation {} for post {} is missing locales {:?}",
                request_id, item_id, missing
            );
        }

        if changed {
            self.items.save(&item).await?;
        }

        if tracked.is_some() && !self.requests.try_complete(request_id).await? {
            // Another completion won the race between our check and now.
            // Its data is the same provider result, so our writes were no-ops.
            self.metrics.record_duplicate_completion();
            return Ok(ApplyOutcome::AlreadyCompleted);
        }

        info!(
            "Applied translation {} to post {} ({} locales)",
            request_id,
            item_id,
            applied.len()
        );
        self.metrics.record_completion();
        Ok(ApplyOutcome::Applied {
            locales: applied,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{InMemoryItemStore, Item, TranslationFields};
    use crate::provider::SourceContent;
    use crate::tracker::{InMemoryRequestStore, TranslationRequest};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn locale(code: &str) -> Locale {
        Locale::parse(code).unwrap()
    }

    fn fields(title: &str, description: &str) -> TranslationFields {
        TranslationFields {
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    fn result(entries: &[(&str, &str, &str)]) -> TranslationResult {
        TranslationResult::new(
            entries
                .iter()
                .map(|(k, t, d)| (k.to_string(), fields(t, d)))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn standard_result() -> TranslationResult {
        result(&[
            ("source", "Hello", "World"),
            ("fr", "Bonjour", "Monde"),
            ("de", "Hallo", "Welt"),
        ])
    }

    struct Fixture {
        items: InMemoryItemStore,
        requests: InMemoryRequestStore,
        metrics: Arc<SyncMetrics>,
        applier: CompletionApplier,
    }

    async fn fixture() -> Fixture {
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
                vec![locale("fr"), locale("de")],
                3,
            ))
            .await
            .unwrap();
        let metrics = Arc::new(SyncMetrics::new());
        let applier = CompletionApplier::new(
            Arc::new(items.clone()),
            Arc::new(requests.clone()),
            LocaleSet::default(),
            vec![locale("fr"), locale("de")],
            metrics.clone(),
        );
        Fixture {
            items,
            requests,
            metrics,
            applier,
        }
    }

    #[tokio::test]
    async fn test_apply_writes_target_locales_only() {
        let f = fixture().await;

        let outcome = f.applier.apply("abc123", 1, &standard_result()).await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                locales: vec![locale("de"), locale("fr")],
                changed: true
            }
        );

        let item = f.items.find(1).await.unwrap();
        let codes: Vec<&str> = item.translations().keys().map(Locale::code).collect();
        assert_eq!(codes, vec!["de", "fr"]);
        assert_eq!(item.translation(&locale("fr")).unwrap().title, "Bonjour");
        assert_eq!(item.translation(&locale("de")).unwrap().title, "Hallo");
        assert!(item.translation(&locale("en")).is_none());

        let request = f.requests.get("abc123").await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_second_apply_is_noop() {
        let f = fixture().await;

        f.applier.apply("abc123", 1, &standard_result()).await.unwrap();
        let before = f.items.find(1).await.unwrap();

        let outcome = f.applier.apply("abc123", 1, &standard_result()).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::AlreadyCompleted);
        assert_eq!(f.items.find(1).await.unwrap(), before);
        assert_eq!(f.items.save_count(), 1);
        assert_eq!(f.metrics.completions_applied(), 1);
        assert_eq!(f.metrics.duplicate_completions(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_applies_complete_once() {
        let f = fixture().await;
        let r = standard_result();

        let (a, b) = tokio::join!(
            f.applier.apply("abc123", 1, &r),
            f.applier.apply("abc123", 1, &r)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, ApplyOutcome::Applied { .. }))
            .count();
        assert_eq!(applied, 1);
        assert_eq!(f.metrics.completions_applied(), 1);
        assert_eq!(f.items.find(1).await.unwrap().translations().len(), 2);
    }

    #[tokio::test]
    async fn test_unrequested_locale_is_skipped() {
        let f = fixture().await;
        let r = result(&[("fr", "Bonjour", "Monde"), ("es", "Hola", "Mundo")]);

        let outcome = f.applier.apply("abc123", 1, &r).await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                locales: vec![locale("fr")],
                changed: true
            }
        );
        assert!(f.items.find(1).await.unwrap().translation(&locale("es")).is_none());
    }

    #[tokio::test]
    async fn test_unknown_item_fails_request() {
        let f = fixture().await;
        f.requests
            .insert(&TranslationRequest::new(
                "gone",
                999,
                SourceContent {
                    title: "Deleted".to_string(),
                    description: "Post".to_string(),
                },
                vec![locale("fr")],
                3,
            ))
            .await
            .unwrap();

        let err = f.applier.apply("gone", 999, &standard_result()).await.unwrap_err();
        assert!(matches!(err, TranslationError::ItemNotFound(999)));

        let request = f.requests.get("gone").await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
        assert_eq!(f.items.save_count(), 0);
        assert_eq!(f.metrics.requests_failed(), 1);

        // Provider retries the webhook for the deleted post
        let err = f.applier.apply("gone", 999, &standard_result()).await.unwrap_err();
        assert!(matches!(err, TranslationError::ItemNotFound(999)));
        assert_eq!(f.metrics.requests_failed(), 1);
    }

    #[tokio::test]
    async fn test_untracked_request_uses_default_targets() {
        let f = fixture().await;

        let outcome = f.applier.apply("untracked", 1, &standard_result()).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { changed: true, .. }));
        assert_eq!(f.items.find(1).await.unwrap().translations().len(), 2);
        assert!(f.requests.get("untracked").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tracked_item_id_wins() {
        let f = fixture().await;

        f.applier.apply("abc123", 42, &standard_result()).await.unwrap();
        assert_eq!(f.items.find(1).await.unwrap().translations().len(), 2);
    }

    #[tokio::test]
    async fn test_source_only_result_completes_without_writes() {
        let f = fixture().await;
        let r = result(&[("source", "Hello", "World")]);

        let outcome = f.applier.apply("abc123", 1, &r).await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                locales: vec![],
                changed: false
            }
        );
        assert_eq!(f.items.save_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_apply_twice_equals_apply_once(
            fr_title in ".{0,40}",
            fr_desc in ".{0,80}",
            de_title in ".{0,40}",
            de_desc in ".{0,80}",
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let r = result(&[
                    ("source", "Hello", "World"),
                    ("fr", fr_title.as_str(), fr_desc.as_str()),
                    ("de", de_title.as_str(), de_desc.as_str()),
                ]);

                let once = fixture().await;
                once.applier.apply("abc123", 1, &r).await.unwrap();

                let twice = fixture().await;
                twice.applier.apply("abc123", 1, &r).await.unwrap();
                twice.applier.apply("abc123", 1, &r).await.unwrap();

                let a = once.items.find(1).await.unwrap();
                let b = twice.items.find(1).await.unwrap();
                prop_assert_eq!(a, b);
                Ok(())
            })?;
        }
    }
}
