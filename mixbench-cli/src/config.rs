//! Configuration for a benchmark run.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `MB__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `MB__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `MB__CONCURRENCY=64` sets the number of workers
//! - `MB__STORAGE__TYPE=filesystem` sets the storage type
//! - `MB__DISTRIBUTION__DELETE=0` disables deletes
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! concurrency: 64
//!
//! storage:
//!   type: filesystem
//!   path: /data
//!
//! distribution:
//!   delete: 0
//! ```
//!
//! To spread requests across several endpoints of the same store, `storage` also accepts a list:
//!
//! ```yaml
//! storage:
//!   - type: filesystem
//!     path: /mnt/gateway-a
//!   - type: filesystem
//!     path: /mnt/gateway-b
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use mixbench::{AutoTerm, Distribution, GeneratorConfig, ObjectSize, OpType};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "MB__";

/// The store a benchmark runs against.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// Objects are kept in memory (type `"memory"`).
    ///
    /// Measures the overhead of the benchmark itself.
    Memory,

    /// Buckets are directories below `path` (type `"filesystem"`).
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: filesystem
    ///   path: /data
    /// ```
    FileSystem {
        /// Root directory of the store.
        path: PathBuf,
    },
}

/// One or more endpoints of the store under test.
///
/// All endpoints must serve the same objects. Each operation is sent to the least busy one.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Endpoints {
    /// A single endpoint.
    Single(Storage),
    /// Several endpoints, given as a list.
    Multiple(Vec<Storage>),
}

impl Endpoints {
    /// Returns all configured endpoints.
    pub fn stores(&self) -> &[Storage] {
        match self {
            Endpoints::Single(storage) => std::slice::from_ref(storage),
            Endpoints::Multiple(stores) => stores,
        }
    }
}

/// Relative weights of the operation types.
///
/// Weights do not need to add up to any particular total. DELETE must not outweigh PUT.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Weights {
    /// Weight of uploads.
    pub put: f64,
    /// Weight of downloads.
    pub get: f64,
    /// Weight of metadata lookups.
    pub stat: f64,
    /// Weight of deletions.
    pub delete: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            put: 15.0,
            get: 45.0,
            stat: 30.0,
            delete: 10.0,
        }
    }
}

impl Weights {
    /// Converts the weights into a [`Distribution`].
    pub fn to_distribution(&self) -> Distribution {
        Distribution::new()
            .with(OpType::Put, self.put)
            .with(OpType::Get, self.get)
            .with(OpType::Stat, self.stat)
            .with(OpType::Delete, self.delete)
    }
}

/// Settings of the payload generator.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Generator {
    /// Approximate share of compressible payload data, in percent.
    ///
    /// # Default
    ///
    /// `10`
    pub percent_compressible: u32,

    /// Size of a compressible chunk in bytes.
    ///
    /// # Default
    ///
    /// `32000`
    pub chunk_size: usize,

    /// Size of the circular buffer payloads are read from, in bytes.
    ///
    /// # Default
    ///
    /// `1048577`
    pub buffer_size: usize,

    /// Fixed seed for reproducible payloads and names.
    pub seed: Option<u64>,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            percent_compressible: 10,
            chunk_size: mixbench::DEFAULT_CHUNK_SIZE,
            buffer_size: mixbench::DEFAULT_BUFFER_SIZE,
            seed: None,
        }
    }
}

/// Stopping the run once throughput stabilizes.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AutoTermination {
    /// Whether auto-termination is enabled.
    pub enabled: bool,

    /// Number of consecutive one-second samples that must agree.
    pub samples: usize,

    /// Maximum relative spread of the samples.
    pub threshold: f64,

    /// Stop after this long even if throughput never stabilizes.
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,
}

impl Default for AutoTermination {
    fn default() -> Self {
        let defaults = AutoTerm::default();
        Self {
            enabled: false,
            samples: defaults.samples,
            threshold: defaults.threshold,
            max_duration: defaults.max_duration,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

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
/// Logs are always written to stderr, so they do not interleave with the run summary.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
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

/// Main configuration of a benchmark run.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The store to benchmark, or a list of its endpoints.
    ///
    /// # Default
    ///
    /// In-memory storage.
    pub storage: Endpoints,

    /// Bucket all objects are written to. Everything in it is deleted.
    ///
    /// # Default
    ///
    /// `"mixbench"`
    pub bucket: String,

    /// Number of concurrent workers.
    ///
    /// # Default
    ///
    /// `20`
    pub concurrency: usize,

    /// Number of objects uploaded before the workload starts.
    ///
    /// # Default
    ///
    /// `2500`
    pub objects: usize,

    /// How long the workload runs.
    ///
    /// # Default
    ///
    /// `5m`
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Size of uploaded objects, or the upper bound if `random_size` is set.
    ///
    /// # Default
    ///
    /// `10 MiB`
    pub object_size: ByteSize,

    /// Draw object sizes uniformly up to `object_size`.
    pub random_size: bool,

    /// Operation weights.
    pub distribution: Weights,

    /// Payload generator settings.
    pub generator: Generator,

    /// Path segment prepended to every object name.
    pub prefix: Option<String>,

    /// Stop once throughput stabilizes.
    pub auto_term: AutoTermination,

    /// Delete all objects after the run.
    ///
    /// # Default
    ///
    /// `true`
    pub cleanup: bool,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: Endpoints::Single(Storage::Memory),
            bucket: "mixbench".into(),
            concurrency: 20,
            objects: 2500,
            duration: Duration::from_secs(5 * 60),
            object_size: ByteSize::mib(10),
            random_size: false,
            distribution: Weights::default(),
            generator: Generator::default(),
            prefix: None,
            auto_term: AutoTermination::default(),
            cleanup: true,
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `MB__`)
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

    /// Builds the payload generator settings.
    pub fn generator_config(&self) -> GeneratorConfig {
        let object_size = if self.random_size {
            ObjectSize::Random {
                max: self.object_size.as_u64(),
            }
        } else {
            ObjectSize::Fixed(self.object_size.as_u64())
        };

        GeneratorConfig {
            buffer_size: self.generator.buffer_size,
            compressible_chunk_size: self.generator.chunk_size,
            percent_compressible: self.generator.percent_compressible,
            seed: self.generator.seed,
            object_size,
            prefix: self.prefix.clone(),
        }
    }

    /// Builds the auto-termination settings, if enabled.
    pub fn auto_term(&self) -> Option<AutoTerm> {
        let auto_term = &self.auto_term;
        auto_term.enabled.then(|| AutoTerm {
            samples: auto_term.samples,
            threshold: auto_term.threshold,
            max_duration: auto_term.max_duration,
            ..Default::default()
        })
    }
}
