use std::{env, fs, path::Path, time::Duration};

use regex::{Regex, RegexBuilder};

use crate::{errors::Error, Result};

const DEFAULT_PRIMARY_LANGUAGE: &str = "id";
const DEFAULT_STREAM_TIMEOUT_MS: u64 = 900_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 5_000;
const DEFAULT_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_REPLY_MIN_INTERVAL_MS: u64 = 1_000;

/// A case-insensitive text pattern from the configuration.
///
/// Entries are treated as regular expressions; an entry that is not a valid
/// expression is matched as a literal substring instead.
#[derive(Clone, Debug)]
pub struct Pattern {
    raw: String,
    matcher: Matcher,
}

#[derive(Clone, Debug)]
enum Matcher {
    Regex(Regex),
    Literal(String),
}

impl Pattern {
    pub fn new(raw: &str) -> Self {
        let matcher = match RegexBuilder::new(raw).case_insensitive(true).build() {
            Ok(re) => Matcher::Regex(re),
            Err(_) => Matcher::Literal(raw.to_lowercase()),
        };
        Self {
            raw: raw.to_string(),
            matcher,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_match(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Regex(re) => re.is_match(text),
            Matcher::Literal(needle) => text.to_lowercase().contains(needle.as_str()),
        }
    }
}

/// Which of the two template sets a reply uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LanguageSlot {
    Primary,
    Default,
}

/// The two reply purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// Invite an unsolicited reporter to participate.
    Invite,
    /// Thank a reporter and remind them to enable location.
    Thanks,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateSet {
    pub invite: String,
    pub thanks: String,
}

impl TemplateSet {
    pub fn get(&self, kind: ReplyKind) -> &str {
        match kind {
            ReplyKind::Invite => &self.invite,
            ReplyKind::Thanks => &self.thanks,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplyTemplates {
    pub primary_language: String,
    pub primary: TemplateSet,
    pub default: TemplateSet,
}

impl ReplyTemplates {
    pub fn slot_for(&self, language: Option<&str>) -> LanguageSlot {
        match language {
            Some(lang) if lang == self.primary_language => LanguageSlot::Primary,
            _ => LanguageSlot::Default,
        }
    }

    pub fn get(&self, slot: LanguageSlot, kind: ReplyKind) -> &str {
        match slot {
            LanguageSlot::Primary => self.primary.get(kind),
            LanguageSlot::Default => self.default.get(kind),
        }
    }
}

/// Unparsed settings, as read from the environment (or built in tests).
///
/// List-valued settings are comma-delimited strings.
#[derive(Clone, Debug)]
pub struct RawConfig {
    pub keywords: String,
    pub monitored_accounts: String,
    pub city: String,
    pub primary_language: String,
    pub invite_primary: String,
    pub invite_default: String,
    pub thanks_primary: String,
    pub thanks_default: String,
    pub live_send_enabled: bool,
    pub stream_enabled: bool,
    pub stream_stale_timeout_ms: u64,
    pub supervisor_poll_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub reply_blacklist: String,
    pub add_timestamp: bool,
    pub cache_capacity: usize,
    pub reply_min_interval_ms: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            keywords: String::new(),
            monitored_accounts: String::new(),
            city: String::new(),
            primary_language: DEFAULT_PRIMARY_LANGUAGE.to_string(),
            invite_primary: String::new(),
            invite_default: String::new(),
            thanks_primary: String::new(),
            thanks_default: String::new(),
            live_send_enabled: false,
            stream_enabled: true,
            stream_stale_timeout_ms: DEFAULT_STREAM_TIMEOUT_MS,
            supervisor_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            reply_blacklist: String::new(),
            add_timestamp: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            reply_min_interval_ms: DEFAULT_REPLY_MIN_INTERVAL_MS,
        }
    }
}

/// Typed, immutable configuration. Built once at startup and shared as
/// `Arc<Config>`.
#[derive(Clone, Debug)]
pub struct Config {
    // Classification
    pub keywords: Vec<Pattern>,
    pub monitored_accounts: Vec<Pattern>,
    pub city: Option<Pattern>,
    pub templates: ReplyTemplates,

    // Replies
    pub live_send_enabled: bool,
    pub reply_blacklist: Vec<String>,
    pub add_timestamp: bool,
    pub reply_min_interval: Duration,

    // Stream supervision
    pub stream_enabled: bool,
    pub stream_stale_timeout: Duration,
    pub supervisor_poll_interval: Duration,
    pub reconnect_backoff: Duration,
    pub cache_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let defaults = RawConfig::default();
        let raw = RawConfig {
            keywords: env_str("FLOODWATCH_KEYWORDS").unwrap_or_default(),
            monitored_accounts: env_str("FLOODWATCH_MONITORED_ACCOUNTS").unwrap_or_default(),
            city: env_str("FLOODWATCH_CITY").unwrap_or_default(),
            primary_language: env_str("FLOODWATCH_PRIMARY_LANGUAGE")
                .and_then(non_empty)
                .unwrap_or(defaults.primary_language),
            invite_primary: env_str("FLOODWATCH_INVITE_PRIMARY").unwrap_or_default(),
            invite_default: env_str("FLOODWATCH_INVITE_DEFAULT").unwrap_or_default(),
            thanks_primary: env_str("FLOODWATCH_THANKS_PRIMARY").unwrap_or_default(),
            thanks_default: env_str("FLOODWATCH_THANKS_DEFAULT").unwrap_or_default(),
            live_send_enabled: env_bool("FLOODWATCH_SEND_ENABLED")
                .unwrap_or(defaults.live_send_enabled),
            stream_enabled: env_bool("FLOODWATCH_STREAM_ENABLED")
                .unwrap_or(defaults.stream_enabled),
            stream_stale_timeout_ms: env_u64("FLOODWATCH_STREAM_TIMEOUT_MS")
                .unwrap_or(defaults.stream_stale_timeout_ms),
            supervisor_poll_interval_ms: env_u64("FLOODWATCH_POLL_INTERVAL_MS")
                .unwrap_or(defaults.supervisor_poll_interval_ms),
            reconnect_backoff_ms: env_u64("FLOODWATCH_RECONNECT_BACKOFF_MS")
                .unwrap_or(defaults.reconnect_backoff_ms),
            reply_blacklist: env_str("FLOODWATCH_REPLY_BLACKLIST").unwrap_or_default(),
            add_timestamp: env_bool("FLOODWATCH_ADD_TIMESTAMP").unwrap_or(defaults.add_timestamp),
            cache_capacity: env_usize("FLOODWATCH_CACHE_CAPACITY")
                .unwrap_or(defaults.cache_capacity),
            reply_min_interval_ms: env_u64("FLOODWATCH_REPLY_MIN_INTERVAL_MS")
                .unwrap_or(defaults.reply_min_interval_ms),
        };

        Self::parse(raw)
    }

    /// One-time parse of raw settings into the immutable configuration.
    pub fn parse(raw: RawConfig) -> Result<Self> {
        if raw.stream_stale_timeout_ms == 0 {
            return Err(Error::Config(
                "FLOODWATCH_STREAM_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }
        if raw.supervisor_poll_interval_ms == 0 {
            return Err(Error::Config(
                "FLOODWATCH_POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        if raw.cache_capacity == 0 {
            return Err(Error::Config(
                "FLOODWATCH_CACHE_CAPACITY must be greater than zero".to_string(),
            ));
        }

        let keywords = parse_csv(&raw.keywords)
            .iter()
            .map(|k| Pattern::new(k))
            .collect();
        let monitored_accounts = parse_csv(&raw.monitored_accounts)
            .iter()
            .map(|a| Pattern::new(a))
            .collect();
        let city = non_empty(raw.city.trim().to_string()).map(|c| Pattern::new(&c));

        let reply_blacklist = parse_csv(&raw.reply_blacklist)
            .into_iter()
            .map(|u| u.trim_start_matches('@').to_lowercase())
            .collect();

        Ok(Self {
            keywords,
            monitored_accounts,
            city,
            templates: ReplyTemplates {
                primary_language: raw.primary_language.trim().to_string(),
                primary: TemplateSet {
                    invite: raw.invite_primary,
                    thanks: raw.thanks_primary,
                },
                default: TemplateSet {
                    invite: raw.invite_default,
                    thanks: raw.thanks_default,
                },
            },
            live_send_enabled: raw.live_send_enabled,
            reply_blacklist,
            add_timestamp: raw.add_timestamp,
            reply_min_interval: Duration::from_millis(raw.reply_min_interval_ms),
            stream_enabled: raw.stream_enabled,
            stream_stale_timeout: Duration::from_millis(raw.stream_stale_timeout_ms),
            supervisor_poll_interval: Duration::from_millis(raw.supervisor_poll_interval_ms),
            reconnect_backoff: Duration::from_millis(raw.reconnect_backoff_ms),
            cache_capacity: raw.cache_capacity,
        })
    }

    pub fn is_blacklisted(&self, handle: &str) -> bool {
        let handle = handle.trim_start_matches('@').to_lowercase();
        self.reply_blacklist.iter().any(|b| *b == handle)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

/// Split a comma-delimited list, trimming entries and dropping empty ones
/// (e.g. from a trailing delimiter).
fn parse_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
