use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

/// Controls the log format of the [`tracing`] subscriber.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format, depending on whether a terminal is attached.
    Auto,
    /// Compact human readable output.
    Simplified,
    /// Multi-line human readable output for local development.
    Pretty,
    /// Newline-delimited JSON for log aggregation.
    Json,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Log filter directives, same syntax as `RUST_LOG`.
    pub level: String,
    pub format: LogFormat,
    /// Sets `RUST_BACKTRACE=1` when enabled.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// Host and port of the statsd server. Metrics are disabled when unset.
    pub statsd: Option<String>,
    /// Prefix prepended to every metric name.
    pub prefix: String,
    /// When set, every metric carries a `host` tag with this machine's hostname.
    pub hostname_tag: Option<String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "symserver".to_owned(),
            hostname_tag: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket address the HTTP server binds to.
    pub bind: String,

    /// Directory holding converted symcache files.
    pub cache_dir: PathBuf,

    /// Upper bound for the symcache directory, in bytes. Least recently used
    /// entries are evicted once the total exceeds this.
    pub max_cache_size: u64,

    /// Base URLs of symbol sources, tried in order. Each must end in `/`.
    pub sources: Vec<Url>,

    /// Connect timeout for symbol downloads.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Overall timeout for a single symbol download.
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,

    /// How often a transiently failing download is retried per source.
    pub download_retries: usize,

    /// Number of tokio worker threads. Defaults to the number of CPUs.
    pub worker_threads: Option<usize>,

    /// DSN to report errors to Sentry. Disabled when unset.
    pub sentry_dsn: Option<String>,

    pub logging: Logging,

    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8050".to_owned(),
            cache_dir: PathBuf::from("/tmp/symserver/symcaches"),
            max_cache_size: 40 * 1024 * 1024 * 1024,
            sources: vec![Url::parse("https://symbols.mozilla.org/").unwrap()],
            connect_timeout: Duration::from_secs(15),
            download_timeout: Duration::from_secs(120),
            download_retries: 2,
            worker_threads: None,
            sentry_dsn: None,
            logging: Logging::default(),
            metrics: Metrics::default(),
        }
    }
}

impl Config {
    /// Loads the config from a YAML file, or the defaults if no path is given.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let data = fs::read(path).context("failed to open config file")?;
                serde_yaml::from_slice(&data).context("failed to parse config YAML")
            }
            None => Ok(Config::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::get(None).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8050");
        assert!(config.metrics.statsd.is_none());
        assert_eq!(config.sources.len(), 1);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(
            file,
            "bind: 127.0.0.1:9000\n\
             max_cache_size: 1024\n\
             download_timeout: 30s\n\
             sources:\n  - http://localhost:8000/\n\
             metrics:\n  statsd: 127.0.0.1:8125\n"
        )
        .unwrap();

        let config = Config::get(Some(file.path())).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.max_cache_size, 1024);
        assert_eq!(config.download_timeout, Duration::from_secs(30));
        assert_eq!(config.sources[0].as_str(), "http://localhost:8000/");
        assert_eq!(config.metrics.statsd.as_deref(), Some("127.0.0.1:8125"));
        // unset fields fall back to defaults
        assert_eq!(config.download_retries, 2);
    }
}
