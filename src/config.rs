use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

/// Configuration key holding the time to wait for cluster responses
pub const RESPONSE_TIMEOUT_KEY: &str = "cluster.response_timeout";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value for `{0}`")]
    Missing(String),

    #[error("invalid duration `{value}` for `{key}`")]
    InvalidDuration { key: String, value: String },
}

/// A source of configuration values
pub trait ConfigSource {
    fn get_duration(&self, key: &str) -> Result<Duration, ConfigError>;
}

impl ConfigSource for HashMap<String, String> {
    fn get_duration(&self, key: &str) -> Result<Duration, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))?;
        parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
            key: key.to_string(),
            value: value.clone(),
        })
    }
}

/// Reads configuration from environment variables
///
/// A key is looked up as an upper case variable name with dots replaced by
/// underscores, e.g. `cluster.response_timeout` is read from
/// `CLUSTER_RESPONSE_TIMEOUT`, optionally behind a prefix.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    prefix: Option<String>,
}

impl EnvConfig {
    pub fn new() -> Self {
        EnvConfig::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        EnvConfig {
            prefix: Some(prefix.into()),
        }
    }

    fn var_name(&self, key: &str) -> String {
        let name = key.replace('.', "_").to_uppercase();
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{name}"),
            None => name,
        }
    }
}

impl ConfigSource for EnvConfig {
    fn get_duration(&self, key: &str) -> Result<Duration, ConfigError> {
        let name = self.var_name(key);
        let value = env::var(&name).map_err(|_| ConfigError::Missing(name.clone()))?;
        parse_duration(&value).ok_or(ConfigError::InvalidDuration { key: name, value })
    }
}

/// Parse durations such as `250ms`, `30s`, `5m`, `1h`, `1d`, or a
/// bare number of seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount.parse().ok()?;

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(amount),
        "" | "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.checked_mul(60)?),
        "h" => Duration::from_secs(amount.checked_mul(3600)?),
        "d" => Duration::from_secs(amount.checked_mul(86_400)?),
        _ => return None,
    };
    Some(duration)
}

/// Dispatch options
#[derive(Clone, Debug)]
pub struct Opts {
    /// Time to wait without hearing from any node before giving up
    /// on a dispatch. Defaults to 60 seconds
    pub(crate) response_timeout: Duration,
    /// Concurrent outbound calls to worker nodes. Defaults to 5
    pub(crate) dispatch_pool_size: usize,
    /// Concurrent handling of received results. Defaults to 5
    pub(crate) result_pool_size: usize,
    /// Attempts at sending a result back to the source. Defaults to 10
    pub(crate) reply_max_attempts: u32,
    /// Base of the linear backoff between attempts. Defaults to 1 second
    pub(crate) reply_backoff_base: Duration,
    /// Result handling taking longer than this is logged. Defaults to 1 second
    pub(crate) slow_result_threshold: Duration,
    /// Time after which an untouched collector is dropped. Defaults to 1 minute
    pub(crate) registry_idle_timeout: Duration,
    /// Maximum number of live collectors
    pub(crate) registry_max_entries: usize,
}

impl Default for Opts {
    fn default() -> Self {
        Opts {
            response_timeout: Duration::from_secs(60),
            dispatch_pool_size: 5,
            result_pool_size: 5,
            reply_max_attempts: 10,
            reply_backoff_base: Duration::from_secs(1),
            slow_result_threshold: Duration::from_secs(1),
            registry_idle_timeout: Duration::from_secs(60),
            registry_max_entries: 1_000_000,
        }
    }
}

impl Opts {
    /// Default options with the response timeout read from `source`
    ///
    /// If the value cannot be read the default timeout is kept.
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        Opts::default().with_source(source)
    }

    pub fn with_source(self, source: &dyn ConfigSource) -> Self {
        match source.get_duration(RESPONSE_TIMEOUT_KEY) {
            Ok(timeout) if Instant::now().checked_add(timeout).is_none() => {
                warn!(
                    "response timeout of {timeout:?} is out of range, using {:?}",
                    self.response_timeout
                );
                self
            }
            Ok(timeout) => self.response_timeout(timeout),
            Err(err) => {
                warn!(
                    "{err}, using a response timeout of {:?}",
                    self.response_timeout
                );
                self
            }
        }
    }

    pub fn response_timeout(self, timeout: Duration) -> Self {
        let mut opts = self;
        opts.response_timeout = timeout;
        opts
    }

    pub fn dispatch_pool_size(self, size: usize) -> Self {
        let mut opts = self;
        opts.dispatch_pool_size = size.max(1);
        opts
    }

    pub fn result_pool_size(self, size: usize) -> Self {
        let mut opts = self;
        opts.result_pool_size = size.max(1);
        opts
    }

    pub fn reply_max_attempts(self, attempts: u32) -> Self {
        let mut opts = self;
        opts.reply_max_attempts = attempts.max(1);
        opts
    }

    pub fn reply_backoff_base(self, base: Duration) -> Self {
        let mut opts = self;
        opts.reply_backoff_base = base;
        opts
    }

    pub fn slow_result_threshold(self, threshold: Duration) -> Self {
        let mut opts = self;
        opts.slow_result_threshold = threshold;
        opts
    }

    pub fn registry_idle_timeout(self, timeout: Duration) -> Self {
        let mut opts = self;
        opts.registry_idle_timeout = timeout;
        opts
    }

    pub fn registry_max_entries(self, max: usize) -> Self {
        let mut opts = self;
        opts.registry_max_entries = max;
        opts
    }

    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy::new(self.reply_max_attempts, self.reply_backoff_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration(" 45 "), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172_800)));
        assert_eq!(parse_duration("10 s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5 fortnights"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_response_timeout_from_source() {
        let source = HashMap::from([(RESPONSE_TIMEOUT_KEY.to_string(), "5s".to_string())]);
        let opts = Opts::from_source(&source);
        assert_eq!(opts.response_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_response_timeout_falls_back_on_bad_config() {
        let invalid = HashMap::from([(RESPONSE_TIMEOUT_KEY.to_string(), "later".to_string())]);
        assert_eq!(
            Opts::from_source(&invalid).response_timeout,
            Duration::from_secs(60)
        );

        let missing: HashMap<String, String> = HashMap::new();
        assert_eq!(
            Opts::from_source(&missing).response_timeout,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_out_of_range_response_timeout_is_rejected() {
        let huge = HashMap::from([(
            RESPONSE_TIMEOUT_KEY.to_string(),
            format!("{}s", u64::MAX),
        )]);
        assert_eq!(
            parse_duration(&format!("{}s", u64::MAX)),
            Some(Duration::from_secs(u64::MAX))
        );
        assert_eq!(
            Opts::from_source(&huge).response_timeout,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_env_config_reads_prefixed_variables() {
        let config = EnvConfig::with_prefix("CLUSTER_DISPATCH_CONFIG_TEST");
        assert!(matches!(
            config.get_duration(RESPONSE_TIMEOUT_KEY),
            Err(ConfigError::Missing(_))
        ));

        env::set_var(
            "CLUSTER_DISPATCH_CONFIG_TEST_CLUSTER_RESPONSE_TIMEOUT",
            "1500ms",
        );
        assert_eq!(
            config.get_duration(RESPONSE_TIMEOUT_KEY).unwrap(),
            Duration::from_millis(1500)
        );
        env::remove_var("CLUSTER_DISPATCH_CONFIG_TEST_CLUSTER_RESPONSE_TIMEOUT");
    }

    #[test]
    fn test_builder_clamps_sizes() {
        let opts = Opts::default()
            .dispatch_pool_size(0)
            .result_pool_size(0)
            .reply_max_attempts(0);
        assert_eq!(opts.dispatch_pool_size, 1);
        assert_eq!(opts.result_pool_size, 1);
        assert_eq!(opts.retry_policy().max_attempts(), 1);
    }
}
