//! Keeps post translations in sync with an external translation provider.
//!
//! A post is submitted to the provider; the finished translation arrives
//! either through a webhook callback or by polling, and is written back to
//! the post exactly once.

pub mod applier;
pub mod callback;
pub mod config;
pub mod db;
pub mod error;
pub mod item;
pub mod locale;
pub mod metrics;
pub mod provider;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod tracker;

pub use error::{Result, TranslationError};
