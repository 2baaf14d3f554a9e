//! Session Configuration
//!
//! Connection settings and the rules for deriving the debugger URL from the
//! page the UI is served from.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::ws::reconnect::{
    MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY, ReconnectPolicy, ReconnectPredicate,
};

pub const DEFAULT_URL: &str = "ws://localhost:7777/ws";

/// Overrides the page host when set to a non-empty value.
pub const HOST_ENV: &str = "NESTOR_WS_HOST";
/// `development` turns on debug logging.
pub const MODE_ENV: &str = "NESTOR_ENV";

const WS_PATH_SUFFIX: &str = "ws";

/// Settings of a single connection.
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: Url,
    pub debug: bool,
    pub auto_connect: bool,
    pub should_reconnect: ReconnectPredicate,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Settings {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self::default().with_url(parse_ws_url(url)?))
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = url;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_reconnect(mut self, predicate: impl Into<ReconnectPredicate>) -> Self {
        self.should_reconnect = predicate.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            predicate: self.should_reconnect.clone(),
            delay: self.reconnect_delay,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_URL).expect("default url is valid"),
            debug: false,
            auto_connect: true,
            should_reconnect: ReconnectPredicate::Always,
            reconnect_delay: RECONNECT_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Address of the page hosting the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    /// Host with optional port, e.g. `localhost:7777`.
    pub host: String,
    pub path: String,
}

impl PageLocation {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }
}

impl Default for PageLocation {
    fn default() -> Self {
        Self::new("localhost:7777", "/")
    }
}

/// Process-level configuration the session accessor builds settings from.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Fixed host; takes precedence over `HOST_ENV`.
    pub host_override: Option<String>,
    /// Read `HOST_ENV` each time a URL is resolved.
    pub host_from_env: bool,
    pub debug: bool,
    pub should_reconnect: ReconnectPredicate,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self {
            host_override: None,
            host_from_env: true,
            debug: std::env::var(MODE_ENV).is_ok_and(|mode| mode == "development"),
            should_reconnect: ReconnectPredicate::Always,
        }
    }

    pub fn with_host_override(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_reconnect(mut self, predicate: impl Into<ReconnectPredicate>) -> Self {
        self.should_reconnect = predicate.into();
        self
    }

    /// URL of the debugger endpoint as seen from `page`.
    pub fn resolve_url(&self, page: &PageLocation) -> Result<Url> {
        self.resolve_url_with(page, |key| std::env::var(key).ok())
    }

    fn resolve_url_with(
        &self,
        page: &PageLocation,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Url> {
        let from_env = if self.host_from_env { env(HOST_ENV) } else { None };
        let host = self
            .host_override
            .as_deref()
            .filter(|host| !host.trim().is_empty())
            .or(from_env.as_deref());
        resolve_url(host, page)
    }

    pub fn settings_for(&self, url: Url) -> Settings {
        Settings::default()
            .with_url(url)
            .with_debug(self.debug)
            .with_reconnect(self.should_reconnect.clone())
    }
}

/// `ws://<host>/<page path>/ws`, host taken from `host_override` unless it is
/// empty.
pub fn resolve_url(host_override: Option<&str>, page: &PageLocation) -> Result<Url> {
    let host = host_override
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .unwrap_or(page.host.as_str());

    let mut path = page.path.trim().to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if !path.ends_with('/') {
        path.push('/');
    }

    parse_ws_url(&format!("ws://{}{}{}", host, path, WS_PATH_SUFFIX))
}

fn parse_ws_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    if url.scheme() != "ws" {
        return Err(Error::UnsupportedScheme(url.scheme().to_string()));
    }
    Ok(url)
}
