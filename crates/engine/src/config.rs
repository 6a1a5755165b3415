//! Startup mode selection. The decision is made exactly once per session:
//! a deck opened local-only stays local-only even if credentials appear
//! later, so collections never have to migrate between backends mid-run.

use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub key: String,
}

impl RemoteConfig {
    pub const URL_VAR: &'static str = "TASKDECK_REMOTE_URL";
    pub const KEY_VAR: &'static str = "TASKDECK_REMOTE_KEY";

    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
        }
    }

    /// Read credentials from the environment. Returns `None` when either
    /// variable is unset; blank values are handled by [`Mode::resolve`].
    pub fn from_env() -> Option<Self> {
        let url = env::var(Self::URL_VAR).ok()?;
        let key = env::var(Self::KEY_VAR).ok()?;
        Some(Self { url, key })
    }

    fn is_complete(&self) -> bool {
        let url = self.url.trim();
        (url.starts_with("http://") || url.starts_with("https://"))
            && !self.key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Local,
    Remote,
}

impl Mode {
    /// Remote requires an http(s) url and a non-blank key; anything less
    /// falls back to local-only rather than erroring.
    pub fn resolve(config: Option<&RemoteConfig>) -> Self {
        let mode = match config {
            Some(c) if c.is_complete() => Mode::Remote,
            _ => Mode::Local,
        };
        tracing::debug!(?mode, "resolved startup mode");
        mode
    }
}
