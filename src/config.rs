use crate::locale::{self, Locale, LocaleSet};
use anyhow::{bail, Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Translation provider
    pub ptc_api_token: String,
    pub ptc_api_url: String,
    pub provider_timeout: Duration,

    // Public address used to build callback URLs
    pub host: String,
    pub protocol: String,

    // Locales
    pub locales: LocaleSet,
    pub target_locales: Vec<Locale>,

    // Completion signals
    pub callbacks_enabled: bool,
    pub polling_enabled: bool,

    // Polling
    pub poll_max_attempts: u32,
    pub poll_interval: Duration,
    pub poll_concurrency: usize,

    // Server
    pub database_url: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let source_locale = Locale::parse(
            &std::env::var("SOURCE_LOCALE").unwrap_or_else(|_| "en".to_string()),
        )
        .context("SOURCE_LOCALE is invalid")?;
        let available = locale::parse_list(
            &std::env::var("AVAILABLE_LOCALES").unwrap_or_else(|_| "en,fr,de".to_string()),
        )
        .context("AVAILABLE_LOCALES is invalid")?;
        let locales = LocaleSet::new(source_locale, available);

        let target_locales = match std::env::var("TARGET_LOCALES") {
            Ok(raw) => locale::parse_list(&raw).context("TARGET_LOCALES is invalid")?,
            Err(_) => locales.translatable(),
        };
        if let Some(unknown) = target_locales.iter().find(|l| !locales.accepts(l)) {
            bail!(
                "TARGET_LOCALES contains '{}' which is the source locale or not in AVAILABLE_LOCALES",
                unknown
            );
        }
        if target_locales.is_empty() {
            bail!("No target locales configured");
        }

        let callbacks_enabled = env_flag("TRANSLATION_CALLBACKS_ENABLED", true);
        let polling_enabled = env_flag("TRANSLATION_POLLING_ENABLED", true);
        if !callbacks_enabled && !polling_enabled {
            bail!("At least one of TRANSLATION_CALLBACKS_ENABLED or TRANSLATION_POLLING_ENABLED must be true");
        }

        let poll_max_attempts: u32 = env_parse("POLL_MAX_ATTEMPTS", 3);
        if poll_max_attempts == 0 {
            bail!("POLL_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            // Provider - Bearer Token
            ptc_api_token: std::env::var("PTC_API_TOKEN").context("PTC_API_TOKEN not set")?,
            ptc_api_url: std::env::var("PTC_API_URL")
                .unwrap_or_else(|_| "https://app.ptc.wpml.org".to_string()),
            provider_timeout: Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECS", 10)),

            host: std::env::var("HOST").context("HOST not set")?,
            protocol: std::env::var("PROTOCOL").unwrap_or_else(|_| "https".to_string()),

            locales,
            target_locales,

            callbacks_enabled,
            polling_enabled,

            poll_max_attempts,
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL_SECS", 60)),
            poll_concurrency: env_parse("POLL_CONCURRENCY", 4),

            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            port: env_parse("PORT", 8080),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
