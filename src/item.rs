//! The post being translated, and the narrow storage interface the
//! workflow needs from it.

use crate::error::{Result, TranslationError};
use crate::locale::Locale;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub type ItemId = i64;

/// Title/description pair stored per locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationFields {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    /// Title in the source locale
    pub title: String,
    /// Description in the source locale
    pub description: String,
    translations: BTreeMap<Locale, TranslationFields>,
}

impl Item {
    pub fn new(id: ItemId, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
            translations: BTreeMap::new(),
        }
    }

    /// Rebuild an item with translations already loaded from storage
    pub fn with_translations(
        mut self,
        translations: impl IntoIterator<Item = (Locale, TranslationFields)>,
    ) -> Self {
        self.translations.extend(translations);
        self
    }

    /// Set the locale-scoped title and description. Does not persist.
    ///
    /// Returns `true` when the stored value changed.
    pub fn set_translation(
        &mut self,
        locale: Locale,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> bool {
        let fields = TranslationFields {
            title: title.into(),
            description: description.into(),
        };
        match self.translations.get(&locale) {
            Some(existing) if *existing == fields => false,
            _ => {
                self.translations.insert(locale, fields);
                true
            }
        }
    }

    pub fn translation(&self, locale: &Locale) -> Option<&TranslationFields> {
        self.translations.get(locale)
    }

    pub fn translations(&self) -> &BTreeMap<Locale, TranslationFields> {
        &self.translations
    }
}

/// Storage for posts.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Load a post with its translations. Fails with `ItemNotFound`.
    async fn find(&self, id: ItemId) -> Result<Item>;

    /// Persist the post's translations. Fails with `Persistence`.
    async fn save(&self, item: &Item) -> Result<()>;
}

/// In-process item store.
///
/// Counts saves so callers can observe how many writes a workflow made.
#[derive(Clone, Default)]
pub struct InMemoryItemStore {
    items: Arc<Mutex<HashMap<ItemId, Item>>>,
    saves: Arc<Mutex<u64>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: Item) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert(item.id, item);
    }

    /// Number of successful `save` calls so far
    pub fn save_count(&self) -> u64 {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn find(&self, id: ItemId) -> Result<Item> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.get(&id).cloned().ok_or(TranslationError::ItemNotFound(id))
    }

    async fn save(&self, item: &Item) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let stored = items
            .get_mut(&item.id)
            .ok_or(TranslationError::ItemNotFound(item.id))?;
        // Per-locale upsert, matching the PostgreSQL store
        stored
            .translations
            .extend(item.translations.iter().map(|(l, f)| (l.clone(), f.clone())));
        drop(items);

        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}
