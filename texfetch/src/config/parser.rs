//! `Ini` → `ConfigFile`.
//!
//! The one place where INI key names map to struct fields. Unknown sections
//! and keys are ignored.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;
use crate::fetch::clamp_http_concurrent;

/// Overlay the values found in `ini` onto `ConfigFile::default()`.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [fetch]
    if let Some(section) = ini.section(Some("fetch")) {
        let s = Section::new("fetch", section);
        if let Some(v) = s.parse::<usize>("worker_threads", "must be a positive integer")? {
            config.fetch.worker_threads = v.max(1);
        }
        if let Some(v) = s.parse::<usize>("max_http_concurrent", "must be a positive integer")? {
            config.fetch.max_http_concurrent = clamp_http_concurrent(v);
        }
        if let Some(v) = s.parse::<usize>("max_decode_concurrent", "must be a positive integer")? {
            config.fetch.max_decode_concurrent = v.max(1);
        }
        if let Some(v) = s.parse("max_http_attempts", "must be a non-negative integer")? {
            config.fetch.max_http_attempts = v;
        }
        if let Some(v) = s.parse("max_datagram_attempts", "must be a non-negative integer")? {
            config.fetch.max_datagram_attempts = v;
        }
        if let Some(v) = s.parse("max_decode_attempts", "must be a positive integer")? {
            config.fetch.max_decode_attempts = v;
        }
        if let Some(v) = s.size("bandwidth")? {
            config.fetch.bandwidth = v;
        }
        if let Some(v) = s.parse::<f32>("pushed_image_priority", "must be a number")? {
            if !v.is_finite() {
                return Err(s.invalid("pushed_image_priority", &v.to_string(), "must be finite"));
            }
            config.fetch.pushed_image_priority = v;
        }
    }

    // [timeouts]
    if let Some(section) = ini.section(Some("timeouts")) {
        let s = Section::new("timeouts", section);
        const SECONDS: &str = "must be a positive integer (seconds)";
        if let Some(v) = s.parse("cache", SECONDS)? {
            config.timeouts.cache = v;
        }
        if let Some(v) = s.parse("http", SECONDS)? {
            config.timeouts.http = v;
        }
        if let Some(v) = s.parse("datagram", SECONDS)? {
            config.timeouts.datagram = v;
        }
        if let Some(v) = s.parse("shutdown", SECONDS)? {
            config.timeouts.shutdown = v;
        }
        if let Some(v) = s.parse("request_resend", SECONDS)? {
            config.timeouts.request_resend = v;
        }
    }

    // [http]
    if let Some(section) = ini.section(Some("http")) {
        let s = Section::new("http", section);
        if let Some(v) = s.text("user_agent") {
            config.http.user_agent = v.to_string();
        }
        if let Some(v) = s.parse("connect_timeout", "must be a positive integer (seconds)")? {
            config.http.connect_timeout = v;
        }
        if let Some(v) = s.parse("pool_idle", "must be a positive integer (seconds)")? {
            config.http.pool_idle = v;
        }
    }

    // [cache]
    if let Some(section) = ini.section(Some("cache")) {
        let s = Section::new("cache", section);
        if let Some(v) = s.text("directory") {
            config.cache.directory = expand_tilde(v);
        }
        if let Some(v) = s.size("memory_size")? {
            config.cache.memory_size = v;
        }
    }

    // [logging]
    if let Some(section) = ini.section(Some("logging")) {
        let s = Section::new("logging", section);
        if let Some(v) = s.text("directory") {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = s.text("file") {
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

/// One INI section plus its name, for error reporting.
struct Section<'a> {
    name: &'static str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn new(name: &'static str, props: &'a Properties) -> Self {
        Self { name, props }
    }

    /// Trimmed value, `None` when missing or blank.
    fn text(&self, key: &str) -> Option<&'a str> {
        self.props
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigFileError> {
        match self.text(key) {
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key, v, reason)),
            None => Ok(None),
        }
    }

    fn size(&self, key: &str) -> Result<Option<usize>, ConfigFileError> {
        match self.text(key) {
            Some(v) => parse_size(v)
                .map(Some)
                .map_err(|_| self.invalid(key, v, "expected format like '500KB', '256MB' or '2GB'")),
            None => Ok(None),
        }
    }

    fn invalid(&self, key: &str, value: &str, reason: &str) -> ConfigFileError {
        ConfigFileError::InvalidValue {
            section: self.name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
