use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Engine tunables. Defaults match what the desktop client ships with.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Sliding window for outgoing sends.
    pub rate_window: Duration,
    /// Sends allowed per window.
    pub rate_max: usize,
    /// Silence after the last keystroke before "typing stopped" is sent.
    pub typing_silence: Duration,
    /// Grace delay before the stop signal after a message is actually sent.
    pub send_grace: Duration,
    /// How long a remote typist stays listed without a fresh "started".
    pub remote_typing_ttl: Duration,
    /// Gap after which a message starts a new visual group.
    pub group_gap: Duration,
    /// History page size for `load_older`.
    pub history_page: u32,
    /// Capacity of the inbound event broadcast channel.
    pub event_buffer: usize,
    /// Base delay between gateway reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            rate_window: Duration::from_secs(60),
            rate_max: 25,
            typing_silence: Duration::from_millis(2000),
            send_grace: Duration::from_millis(500),
            remote_typing_ttl: Duration::from_secs(5),
            group_gap: Duration::from_secs(5 * 60),
            history_page: 50,
            event_buffer: 1024,
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

impl SyncConfig {
    /// Read overrides from `MURMUR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            rate_window: secs(&lookup, "MURMUR_RATE_WINDOW_SECS", defaults.rate_window)?,
            rate_max: parse(&lookup, "MURMUR_RATE_MAX", defaults.rate_max)?,
            typing_silence: millis(&lookup, "MURMUR_TYPING_SILENCE_MS", defaults.typing_silence)?,
            send_grace: millis(&lookup, "MURMUR_SEND_GRACE_MS", defaults.send_grace)?,
            remote_typing_ttl: millis(
                &lookup,
                "MURMUR_REMOTE_TYPING_TTL_MS",
                defaults.remote_typing_ttl,
            )?,
            group_gap: secs(&lookup, "MURMUR_GROUP_GAP_SECS", defaults.group_gap)?,
            history_page: parse(&lookup, "MURMUR_HISTORY_PAGE", defaults.history_page)?,
            event_buffer: parse(&lookup, "MURMUR_EVENT_BUFFER", defaults.event_buffer)?,
            reconnect_delay: millis(
                &lookup,
                "MURMUR_RECONNECT_DELAY_MS",
                defaults.reconnect_delay,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_max == 0 {
            return Err(SyncError::Config("MURMUR_RATE_MAX must be at least 1".into()));
        }
        if self.rate_window.is_zero() {
            return Err(SyncError::Config("MURMUR_RATE_WINDOW_SECS must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(SyncError::Config("MURMUR_EVENT_BUFFER must be at least 1".into()));
        }
        if self.history_page == 0 || self.history_page > 200 {
            return Err(SyncError::Config("MURMUR_HISTORY_PAGE must be within 1..=200".into()));
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SyncError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}
