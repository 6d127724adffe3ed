//! `ConfigFile` → commented INI text.

use std::path::Path;

use super::settings::ConfigFile;
use super::size::format_size;

/// Render `config` as the commented INI written to `config.ini`.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    format!(
        r#"[fetch]
; Worker runtime threads (default: one per core, at least 2)
worker_threads = {}
; HTTP requests in flight (1-64, default: 8)
max_http_concurrent = {}
; Image decodes in flight (default: one per core)
max_decode_concurrent = {}
; Attempts per source before falling back to the next one
max_http_attempts = {}
max_datagram_attempts = {}
max_decode_attempts = {}
; Inbound bandwidth ceiling per second, 0 for unlimited
; Supports: KB, MB, GB suffixes (e.g., 500KB, 2MB)
bandwidth = {}
; Priority of images a simulator streams without being asked
pushed_image_priority = {}

[timeouts]
; All values in seconds
cache = {}
http = {}
datagram = {}
shutdown = {}
; Re-send an unanswered datagram image request after this long
request_resend = {}

[http]
user_agent = {}
; Seconds
connect_timeout = {}
; Seconds an idle pooled connection is kept open
pool_idle = {}

[cache]
; Disk cache directory
directory = {}
; Memory cache size, 0 to disable (e.g., 128MB, 1GB)
memory_size = {}

[logging]
directory = {}
file = {}
"#,
        config.fetch.worker_threads,
        config.fetch.max_http_concurrent,
        config.fetch.max_decode_concurrent,
        config.fetch.max_http_attempts,
        config.fetch.max_datagram_attempts,
        config.fetch.max_decode_attempts,
        format_size(config.fetch.bandwidth),
        config.fetch.pushed_image_priority,
        config.timeouts.cache,
        config.timeouts.http,
        config.timeouts.datagram,
        config.timeouts.shutdown,
        config.timeouts.request_resend,
        config.http.user_agent,
        config.http.connect_timeout,
        config.http.pool_idle,
        path_to_string(&config.cache.directory),
        format_size(config.cache.memory_size),
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

/// Display a path, abbreviating the home directory to `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_ini;
    use ini::Ini;

    #[test]
    fn test_written_config_parses_back() {
        let mut config = ConfigFile::default();
        config.fetch.bandwidth = 750 * 1024;
        config.fetch.max_http_attempts = 7;
        config.timeouts.datagram = 4;
        config.cache.memory_size = 64 * 1024 * 1024;
        config.logging.file = "session.log".to_string();

        let text = to_config_string(&config);
        let parsed = parse_ini(&Ini::load_from_str(&text).unwrap()).unwrap();

        assert_eq!(parsed.fetch, config.fetch);
        assert_eq!(parsed.timeouts, config.timeouts);
        assert_eq!(parsed.cache.memory_size, config.cache.memory_size);
        assert_eq!(parsed.logging.file, "session.log");
    }

    #[test]
    fn test_output_is_commented() {
        let text = to_config_string(&ConfigFile::default());
        assert!(text.contains("[fetch]"));
        assert!(text.contains("; All values in seconds"));
        assert!(text.contains("[logging]"));
    }
}
