//! Configuration for benchmark runs.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `KVBENCH__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `KVBENCH__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `KVBENCH__BENCHMARK__WORKERS=50` sets the number of concurrent workers
//! - `KVBENCH__STORE__TYPE=dynamodb` selects the DynamoDB store
//! - `KVBENCH__SINK__PASSWORD=secret` sets the Elasticsearch password
//!
//! # YAML Configuration File
//!
//! ```yaml
//! benchmark:
//!   workers: 50
//!   duration: 5m
//!   table: my-table
//!
//! store:
//!   type: dynamodb
//!   endpoint: http://localhost:8000
//! ```

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "KVBENCH__";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl std::ops::Deref for ConfigSecret {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

fn secret(value: &str) -> SecretBox<ConfigSecret> {
    SecretBox::new(Box::new(ConfigSecret::from(value)))
}

/// Workload parameters.
///
/// Used in: [`Config::benchmark`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Benchmark {
    /// Number of concurrent workers.
    ///
    /// # Default
    ///
    /// `1000`
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__BENCHMARK__WORKERS`
    pub workers: usize,

    /// Capacity of the queue between workers and the metrics sink.
    ///
    /// Workers block once this many records are waiting to be published.
    ///
    /// # Default
    ///
    /// `500`
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__BENCHMARK__BUFFER`
    pub buffer: usize,

    /// Number of attributes of generated items, not counting the identifier.
    ///
    /// # Default
    ///
    /// `5`
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__BENCHMARK__ATTRIBUTES`
    pub attributes: u32,

    /// Total run time of the benchmark.
    ///
    /// # Default
    ///
    /// `30m`
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__BENCHMARK__DURATION`
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Only read existing items instead of mixing reads, writes and updates.
    ///
    /// Can also be enabled with `run --read-only`.
    ///
    /// # Default
    ///
    /// `false`
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__BENCHMARK__READ_ONLY`
    pub read_only: bool,

    /// Name of the table under test.
    ///
    /// # Default
    ///
    /// `$USER-high-velocity-table`, or `kvbench-high-velocity-table` if `USER` is not set.
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__BENCHMARK__TABLE`
    pub table: String,

    /// Seed for all random choices of the run.
    ///
    /// Runs with the same seed generate the same items and make the same choices, up to
    /// scheduling differences between workers. Without a seed, the operating system's entropy is
    /// used.
    ///
    /// # Default
    ///
    /// `None`
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__BENCHMARK__SEED`
    pub seed: Option<u64>,

    /// Upper bound for a random pause before every read-only iteration.
    ///
    /// # Default
    ///
    /// `0s` (no pause)
    #[serde(with = "humantime_serde")]
    pub read_only_jitter: Duration,

    /// Time the publisher gets to flush queued records once the run is over.
    ///
    /// # Default
    ///
    /// `5s`
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for Benchmark {
    fn default() -> Self {
        let user = std::env::var("USER")
            .ok()
            .filter(|user| !user.is_empty())
            .unwrap_or_else(|| "kvbench".to_owned());

        Self {
            workers: 1000,
            buffer: 500,
            attributes: 5,
            duration: Duration::from_secs(30 * 60),
            read_only: false,
            table: format!("{user}-high-velocity-table"),
            seed: None,
            read_only_jitter: Duration::ZERO,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// The key-value store under test.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
///
/// Used in: [`Config::store`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Store {
    /// Amazon DynamoDB, configured from the standard AWS environment.
    ///
    /// # Example
    ///
    /// ```yaml
    /// store:
    ///   type: dynamodb
    ///   endpoint: http://localhost:8000
    /// ```
    DynamoDb {
        /// Optional endpoint override, e.g. for DynamoDB Local.
        ///
        /// # Environment Variable
        ///
        /// `KVBENCH__STORE__ENDPOINT`
        #[serde(default)]
        endpoint: Option<String>,
    },

    /// A store held in process memory, for dry runs.
    InMemory {
        /// Number of reads after a mutation that still observe the previous state.
        ///
        /// # Environment Variable
        ///
        /// `KVBENCH__STORE__PROPAGATION_LAG`
        #[serde(default)]
        propagation_lag: u32,
    },
}

/// The destination of metrics records.
///
/// Used in: [`Config::sink`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Sink {
    /// An Elasticsearch cluster, authenticated with basic auth.
    ///
    /// # Example
    ///
    /// ```yaml
    /// sink:
    ///   type: elasticsearch
    ///   url: http://localhost:9200
    ///   index: dynamodb
    ///   username: elastic
    ///   password: changeme
    /// ```
    Elasticsearch {
        /// Base URL of the cluster.
        url: String,
        /// Index receiving the records.
        index: String,
        /// Basic auth user name.
        username: String,
        /// Basic auth password.
        password: SecretBox<ConfigSecret>,
    },

    /// Keep records in memory and discard them at the end of the run.
    Memory {
        /// Index receiving the records.
        index: String,
    },
}

impl Sink {
    /// The index records are published to.
    pub fn index(&self) -> &str {
        match self {
            Self::Elasticsearch { index, .. } | Self::Memory { index } => index,
        }
    }
}

impl Default for Sink {
    fn default() -> Self {
        Self::Elasticsearch {
            url: "http://localhost:9200".into(),
            index: "dynamodb".into(),
            username: "elastic".into(),
            password: secret("changeme"),
        }
    }
}

/// [Sentry](https://sentry.io/) error tracking configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided. Warnings and errors
/// logged during the run are then reported as events.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name reported with every event.
    pub environment: Option<Cow<'static, str>>,

    /// Error event sampling rate between `0.0` and `1.0`.
    ///
    /// # Default
    ///
    /// `1.0`
    pub sample_rate: f32,

    /// Enable Sentry SDK debug mode.
    pub debug: bool,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
            debug: false,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  kvbench::engine > starting benchmark
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z [kvbench::engine] INFO: starting benchmark
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, so they do not interleave with the summary printed at the
/// end of a run.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    /// At `DEBUG` and `TRACE`, every store call is logged, which slows down the benchmark.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`] for available options.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `KVBENCH__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for a benchmark run.
///
/// See individual field documentation for details on each configuration option.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Workload parameters.
    pub benchmark: Benchmark,
    /// The store under test.
    pub store: Store,
    /// Where metrics records are published.
    pub sink: Sink,
    /// Logging configuration.
    pub logging: Logging,
    /// Sentry error tracking.
    pub sentry: Sentry,
}

impl Default for Store {
    fn default() -> Self {
        Self::DynamoDb { endpoint: None }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `args`)
    /// 3. Environment variables (prefixed with `KVBENCH__`)
    ///
    /// The result is not validated; call [`validate`](Self::validate) once all overrides are
    /// applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Checks that the configuration describes a runnable benchmark.
    pub fn validate(&self) -> Result<()> {
        let benchmark = &self.benchmark;
        anyhow::ensure!(benchmark.workers >= 1, "at least one worker is required");
        anyhow::ensure!(benchmark.buffer >= 1, "the metrics buffer must hold at least one record");
        anyhow::ensure!(
            benchmark.attributes >= 1,
            "items need at least one attribute besides the id"
        );
        anyhow::ensure!(!benchmark.duration.is_zero(), "the duration must not be zero");
        anyhow::ensure!(
            !benchmark.table.trim().is_empty(),
            "the table name must not be empty"
        );
        anyhow::ensure!(
            !self.sink.index().trim().is_empty(),
            "the metrics index name must not be empty"
        );
        Ok(())
    }
}
